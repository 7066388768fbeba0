//! Durable per-room state.
//!
//! A room actor keeps nothing about its peers in memory besides the live
//! outbound channels. Each connection's identity lives here as an
//! [`Attachment`], together with the room's pending cleanup deadline, so a
//! freshly started actor can rebuild its view of the room from storage alone.

use std::collections::BTreeMap;

use async_trait::async_trait;
use peerdrop_signaling::PeerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::RwLock, time::Instant};

use crate::ws::ConnId;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Room storage unavailable: {0}")]
    Unavailable(String),
}

/// Metadata bound to a connection for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub peer_id: PeerId,
}

#[async_trait]
pub trait RoomStorage: Send + Sync {
    /// # Errors
    ///
    /// * If the backing store fails
    async fn upsert_attachment(
        &self,
        room_id: &str,
        conn_id: ConnId,
        attachment: Attachment,
    ) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// * If the backing store fails
    async fn select_attachment(
        &self,
        room_id: &str,
        conn_id: ConnId,
    ) -> Result<Option<Attachment>, StorageError>;

    /// # Errors
    ///
    /// * If the backing store fails
    async fn select_attachments(
        &self,
        room_id: &str,
    ) -> Result<Vec<(ConnId, Attachment)>, StorageError>;

    /// # Errors
    ///
    /// * If the backing store fails
    async fn delete_attachment(&self, room_id: &str, conn_id: ConnId) -> Result<(), StorageError>;

    /// Replaces any previously stored deadline.
    ///
    /// # Errors
    ///
    /// * If the backing store fails
    async fn set_alarm(&self, room_id: &str, deadline: Instant) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// * If the backing store fails
    async fn select_alarm(&self, room_id: &str) -> Result<Option<Instant>, StorageError>;

    /// # Errors
    ///
    /// * If the backing store fails
    async fn delete_alarm(&self, room_id: &str) -> Result<(), StorageError>;

    /// Erase everything stored for the room. Erasing an unknown room is a no-op.
    ///
    /// # Errors
    ///
    /// * If the backing store fails
    async fn delete_all(&self, room_id: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
struct RoomRecord {
    attachments: BTreeMap<ConnId, Attachment>,
    alarm: Option<Instant>,
}

impl RoomRecord {
    fn is_empty(&self) -> bool {
        self.attachments.is_empty() && self.alarm.is_none()
    }
}

/// In-process [`RoomStorage`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    rooms: RwLock<BTreeMap<String, RoomRecord>>,
}

impl MemoryStorage {
    /// Whether anything is stored for `room_id`.
    pub async fn contains_room(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    async fn update(&self, room_id: &str, f: impl FnOnce(&mut RoomRecord) + Send) {
        let mut rooms = self.rooms.write().await;
        let record = rooms.entry(room_id.to_string()).or_default();
        f(record);
        if record.is_empty() {
            rooms.remove(room_id);
        }
    }
}

#[async_trait]
impl RoomStorage for MemoryStorage {
    async fn upsert_attachment(
        &self,
        room_id: &str,
        conn_id: ConnId,
        attachment: Attachment,
    ) -> Result<(), StorageError> {
        self.update(room_id, |record| {
            record.attachments.insert(conn_id, attachment);
        })
        .await;
        Ok(())
    }

    async fn select_attachment(
        &self,
        room_id: &str,
        conn_id: ConnId,
    ) -> Result<Option<Attachment>, StorageError> {
        Ok(self
            .rooms
            .read()
            .await
            .get(room_id)
            .and_then(|record| record.attachments.get(&conn_id))
            .cloned())
    }

    async fn select_attachments(
        &self,
        room_id: &str,
    ) -> Result<Vec<(ConnId, Attachment)>, StorageError> {
        Ok(self
            .rooms
            .read()
            .await
            .get(room_id)
            .map(|record| {
                record
                    .attachments
                    .iter()
                    .map(|(conn_id, attachment)| (*conn_id, attachment.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_attachment(&self, room_id: &str, conn_id: ConnId) -> Result<(), StorageError> {
        self.update(room_id, |record| {
            record.attachments.remove(&conn_id);
        })
        .await;
        Ok(())
    }

    async fn set_alarm(&self, room_id: &str, deadline: Instant) -> Result<(), StorageError> {
        self.update(room_id, |record| {
            record.alarm = Some(deadline);
        })
        .await;
        Ok(())
    }

    async fn select_alarm(&self, room_id: &str) -> Result<Option<Instant>, StorageError> {
        Ok(self
            .rooms
            .read()
            .await
            .get(room_id)
            .and_then(|record| record.alarm))
    }

    async fn delete_alarm(&self, room_id: &str) -> Result<(), StorageError> {
        self.update(room_id, |record| {
            record.alarm = None;
        })
        .await;
        Ok(())
    }

    async fn delete_all(&self, room_id: &str) -> Result<(), StorageError> {
        self.rooms.write().await.remove(room_id);
        Ok(())
    }
}
