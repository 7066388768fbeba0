//! Routing from room ids to running room tasks.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use peerdrop_signaling::{RoomId, id::generate_room_id};

use crate::{
    room::{JoinError, Joined, RoomHandle, RoomService},
    storage::RoomStorage,
    ws::Msg,
};

type Rooms = Arc<Mutex<BTreeMap<RoomId, RoomHandle>>>;

/// Owns the mapping from room id to the single running instance of that room.
///
/// Rooms are started lazily the first time they are addressed and forget
/// themselves once their task exits.
#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Rooms,
    storage: Arc<dyn RoomStorage>,
    runtime: tokio::runtime::Handle,
}

impl RoomRegistry {
    /// # Panics
    ///
    /// * If called outside of a tokio runtime
    #[must_use]
    pub fn new(storage: Arc<dyn RoomStorage>) -> Self {
        Self::with_runtime(storage, tokio::runtime::Handle::current())
    }

    /// Room tasks are spawned onto `runtime`.
    #[must_use]
    pub fn with_runtime(storage: Arc<dyn RoomStorage>, runtime: tokio::runtime::Handle) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(BTreeMap::new())),
            storage,
            runtime,
        }
    }

    /// Allocate a fresh room id.
    ///
    /// Ids held by a running room are never handed out twice. The room task
    /// itself is only started once someone joins.
    #[must_use]
    pub fn create(&self) -> RoomId {
        let rooms = self.lock();

        loop {
            let room_id = generate_room_id();
            if rooms.get(&room_id).is_none_or(|room| !room.is_running()) {
                log::debug!("Created room {room_id}");
                break room_id;
            }
            log::debug!("Room id {room_id} is taken, generating another");
        }
    }

    /// The running instance for `room_id`, starting one if there is none.
    #[must_use]
    pub fn room(&self, room_id: &str) -> RoomHandle {
        let mut rooms = self.lock();

        if let Some(room) = rooms.get(room_id).filter(|room| room.is_running()) {
            return room.clone();
        }

        let service = RoomService::new(room_id.to_string(), self.storage.clone());
        let handle = service.handle();
        rooms.insert(room_id.to_string(), handle.clone());
        drop(rooms);

        let registry = self.rooms.clone();
        let instance = handle.clone();
        self.runtime.spawn(async move {
            service.run().await;
            evict(&registry, &instance);
        });

        handle
    }

    /// Join `room_id`, starting the room if needed.
    ///
    /// A join that races with the room erasing itself is retried once on a
    /// fresh instance.
    ///
    /// # Errors
    ///
    /// * If the room is full
    /// * If the room could not be reached or its storage failed
    pub async fn join(
        &self,
        room_id: &str,
        conn_tx: flume::Sender<Msg>,
    ) -> Result<(RoomHandle, Joined), JoinError> {
        let room = self.room(room_id);

        match room.join(conn_tx.clone()).await {
            Err(JoinError::Stopped(_)) => {
                log::debug!("Room {room_id} stopped during join, retrying");
                let room = self.room(room_id);
                let joined = room.join(conn_tx).await?;
                Ok((room, joined))
            }
            result => Ok((room, result?)),
        }
    }

    /// Ids of every room with a running task.
    #[must_use]
    pub fn resident_rooms(&self) -> Vec<RoomId> {
        self.lock()
            .iter()
            .filter(|(_, room)| room.is_running())
            .map(|(room_id, _)| room_id.clone())
            .collect()
    }

    /// Stop every running room.
    pub fn shutdown(&self) {
        log::debug!("Shutting down room registry");

        for room in self.lock().values() {
            room.shutdown();
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<RoomId, RoomHandle>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn evict(rooms: &Rooms, instance: &RoomHandle) {
    let mut rooms = rooms.lock().unwrap_or_else(PoisonError::into_inner);

    if rooms
        .get(instance.room_id())
        .is_some_and(|room| room.same_instance(instance))
    {
        rooms.remove(instance.room_id());
        log::trace!("Evicted room {}", instance.room_id());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        room::{CLEANUP_GRACE_PERIOD, MAX_PEERS},
        storage::MemoryStorage,
    };

    fn registry() -> (RoomRegistry, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::default());
        (RoomRegistry::new(storage.clone()), storage)
    }

    #[test_log::test(tokio::test)]
    async fn create_hands_out_valid_ids_without_starting_rooms() {
        let (registry, _storage) = registry();

        let room_id = registry.create();

        assert!(peerdrop_signaling::id::is_valid_id(&room_id));
        assert!(registry.resident_rooms().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn the_same_id_reaches_the_same_instance() {
        let (registry, _storage) = registry();

        let first = registry.room("abc123");
        let second = registry.room("abc123");
        let other = registry.room("xyz789");

        assert!(first.same_instance(&second));
        assert!(!first.same_instance(&other));
        assert_eq!(
            registry.resident_rooms(),
            vec!["abc123".to_string(), "xyz789".to_string()]
        );
    }

    #[test_log::test(tokio::test)]
    async fn joins_share_one_room() {
        let (registry, _storage) = registry();
        let room_id = registry.create();

        let mut receivers = vec![];
        for expected in 1..=MAX_PEERS {
            let (tx, rx) = flume::unbounded();
            let (_room, joined) = registry.join(&room_id, tx).await.unwrap();
            assert_eq!(joined.peer_count, expected);
            receivers.push(rx);
        }

        let (tx, _rx) = flume::unbounded();
        assert!(matches!(
            registry.join(&room_id, tx).await,
            Err(JoinError::RoomFull)
        ));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn erased_rooms_are_evicted_and_restart_on_demand() {
        let (registry, storage) = registry();
        let room_id = registry.create();

        let (tx, _rx) = flume::unbounded();
        let (room, joined) = registry.join(&room_id, tx).await.unwrap();
        room.leave(joined.conn_id).unwrap();
        room.peer_count().await.unwrap();

        tokio::time::sleep(CLEANUP_GRACE_PERIOD + Duration::from_secs(1)).await;

        assert!(!room.is_running());
        assert!(registry.resident_rooms().is_empty());
        assert!(!storage.contains_room(&room_id).await);

        let (tx, rx) = flume::unbounded();
        let (fresh, joined) = registry.join(&room_id, tx).await.unwrap();
        assert!(!fresh.same_instance(&room));
        assert_eq!(joined.peer_count, 1);
        assert_eq!(rx.len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn stopped_instances_are_replaced() {
        let (registry, _storage) = registry();

        let stale = registry.room("abc123");
        stale.shutdown();

        let (tx, _rx) = flume::unbounded();
        let (room, joined) = registry.join("abc123", tx).await.unwrap();

        assert!(!room.same_instance(&stale));
        assert!(room.is_running());
        assert_eq!(joined.peer_count, 1);
    }

    #[test_log::test(tokio::test)]
    async fn shutdown_stops_every_room() {
        let (registry, _storage) = registry();
        let a = registry.room("aaaaaa");
        let b = registry.room("bbbbbb");

        registry.shutdown();

        assert!(!a.is_running());
        assert!(!b.is_running());
        assert!(registry.resident_rooms().is_empty());
    }
}
