//! A single signaling room.
//!
//! Every room runs as its own task that owns the room's live connections and
//! processes [`Command`]s one at a time, so joins, relays and departures are
//! never interleaved. Everything that identifies a peer is kept in
//! [`RoomStorage`]; the task itself only holds the outbound channel of each
//! connection.

use std::{collections::BTreeMap, ops::ControlFlow, sync::Arc, time::Duration};

use peerdrop_signaling::{
    PeerId, RoomId,
    id::generate_peer_id,
    models::{InboundMessage, OutboundMessage, PeerPayload, PongPayload, WelcomePayload},
};
use rand::Rng as _;
use strum_macros::AsRefStr;
use thiserror::Error;
use tokio::{sync::oneshot, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    storage::{Attachment, RoomStorage, StorageError},
    ws::{ConnId, Msg},
};

/// Peers a room admits at once.
pub const MAX_PEERS: usize = 2;

/// How long a room may stay empty before its state is erased.
pub const CLEANUP_GRACE_PERIOD: Duration = Duration::from_secs(3 * 60);

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("Room full")]
    RoomFull,
    #[error("Room {0} is no longer running")]
    Stopped(RoomId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Room {0} is no longer running")]
    Stopped(RoomId),
}

/// Outcome of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined {
    pub conn_id: ConnId,
    pub peer_id: PeerId,
    /// Peers in the room including the new one.
    pub peer_count: usize,
}

#[derive(Debug, AsRefStr)]
enum Command {
    Join {
        conn_tx: flume::Sender<Msg>,
        res_tx: oneshot::Sender<Result<Joined, JoinError>>,
    },
    Relay {
        conn_id: ConnId,
        text: Msg,
    },
    Leave {
        conn_id: ConnId,
    },
    Alarm {
        deadline: Instant,
    },
    PeerCount {
        res_tx: oneshot::Sender<usize>,
    },
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

struct Room {
    id: RoomId,
    storage: Arc<dyn RoomStorage>,
    /// Map of connection IDs to their message receivers.
    connections: BTreeMap<ConnId, flume::Sender<Msg>>,
    alarm_task: Option<JoinHandle<()>>,
    cmd_tx: flume::Sender<Command>,
}

impl Room {
    async fn process_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Join { conn_tx, res_tx } => {
                let result = self.join(conn_tx).await;

                if let Err(e) = &result {
                    log::debug!("Room {}: rejected join: {e}", self.id);
                }

                if let Err(Ok(joined)) = res_tx.send(result) {
                    log::debug!(
                        "Room {}: joiner of conn {} went away before the reply",
                        self.id,
                        joined.conn_id
                    );
                    self.leave(joined.conn_id).await;
                }
            }
            Command::Relay { conn_id, text } => self.relay(conn_id, &text).await,
            Command::Leave { conn_id } => self.leave(conn_id).await,
            Command::Alarm { deadline } => return self.on_alarm(deadline).await,
            Command::PeerCount { res_tx } => {
                let _ = res_tx.send(self.connections.len());
            }
        }

        ControlFlow::Continue(())
    }

    async fn join(&mut self, conn_tx: flume::Sender<Msg>) -> Result<Joined, JoinError> {
        if self.connections.len() >= MAX_PEERS {
            return Err(JoinError::RoomFull);
        }

        let attachments = self.storage.select_attachments(&self.id).await?;

        let peer_id = loop {
            let peer_id = generate_peer_id();
            if !attachments.iter().any(|(_, x)| x.peer_id == peer_id) {
                break peer_id;
            }
        };
        let conn_id = loop {
            let conn_id = rand::rng().random_range(0..ConnId::MAX);
            if !self.connections.contains_key(&conn_id)
                && !attachments.iter().any(|(id, _)| *id == conn_id)
            {
                break conn_id;
            }
        };

        self.storage
            .upsert_attachment(
                &self.id,
                conn_id,
                Attachment {
                    peer_id: peer_id.clone(),
                },
            )
            .await?;
        self.connections.insert(conn_id, conn_tx);

        let peer_count = self.connections.len();
        log::debug!(
            "Room {}: peer {peer_id} joined on conn {conn_id} ({peer_count}/{MAX_PEERS})",
            self.id
        );

        self.send_to(
            conn_id,
            &OutboundMessage::Welcome(WelcomePayload {
                peer_id: peer_id.clone(),
                peer_count,
            }),
        );
        self.broadcast(
            &OutboundMessage::PeerJoined(PeerPayload {
                peer_id: peer_id.clone(),
            }),
            Some(&peer_id),
        )
        .await;

        Ok(Joined {
            conn_id,
            peer_id,
            peer_count,
        })
    }

    async fn relay(&self, conn_id: ConnId, text: &str) {
        if !self.connections.contains_key(&conn_id) {
            log::debug!("Room {}: frame from unknown conn {conn_id}", self.id);
            return;
        }

        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                log::debug!(
                    "Room {}: dropping malformed frame from conn {conn_id}: {e:?}",
                    self.id
                );
                return;
            }
        };

        log::trace!("Room {}: received {message} from conn {conn_id}", self.id);

        match message {
            InboundMessage::Ping => {
                self.send_to(
                    conn_id,
                    &OutboundMessage::Pong(PongPayload {
                        peer_count: self.connections.len(),
                    }),
                );
            }
            InboundMessage::Unknown => {
                log::trace!("Room {}: ignoring unknown frame type", self.id);
            }
            message => {
                let Some(Attachment { peer_id }) = self.attachment(conn_id).await else {
                    log::debug!(
                        "Room {}: no attachment for conn {conn_id}, dropping {message}",
                        self.id
                    );
                    return;
                };
                if let Some(outbound) = message.into_relayed(peer_id.clone()) {
                    self.broadcast(&outbound, Some(&peer_id)).await;
                }
            }
        }
    }

    async fn leave(&mut self, conn_id: ConnId) {
        if self.connections.remove(&conn_id).is_none() {
            log::trace!("Room {}: conn {conn_id} already left", self.id);
            return;
        }

        let attachment = self.attachment(conn_id).await;

        if let Err(e) = self.storage.delete_attachment(&self.id, conn_id).await {
            log::warn!(
                "Room {}: failed to delete attachment for conn {conn_id}: {e:?}",
                self.id
            );
        }

        if let Some(Attachment { peer_id }) = attachment {
            log::debug!(
                "Room {}: peer {peer_id} left ({}/{MAX_PEERS})",
                self.id,
                self.connections.len()
            );
            self.broadcast(&OutboundMessage::PeerLeft(PeerPayload { peer_id }), None)
                .await;
        }

        if self.connections.is_empty() {
            self.arm_cleanup().await;
        }
    }

    async fn arm_cleanup(&mut self) {
        let deadline = Instant::now() + CLEANUP_GRACE_PERIOD;

        if let Err(e) = self.storage.set_alarm(&self.id, deadline).await {
            log::error!("Room {}: failed to store cleanup alarm: {e:?}", self.id);
        }

        if let Some(task) = self.alarm_task.take() {
            task.abort();
        }

        let cmd_tx = self.cmd_tx.clone();
        self.alarm_task = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = cmd_tx.send_async(Command::Alarm { deadline }).await;
        }));

        log::debug!(
            "Room {}: empty, erasing in {}s unless rejoined",
            self.id,
            CLEANUP_GRACE_PERIOD.as_secs()
        );
    }

    async fn on_alarm(&mut self, deadline: Instant) -> ControlFlow<()> {
        match self.storage.select_alarm(&self.id).await {
            Ok(Some(stored)) if stored != deadline => {
                log::trace!("Room {}: ignoring superseded alarm", self.id);
                return ControlFlow::Continue(());
            }
            Ok(_) => {}
            Err(e) => log::warn!("Room {}: failed to read cleanup alarm: {e:?}", self.id),
        }

        self.alarm_task = None;

        if let Err(e) = self.storage.delete_alarm(&self.id).await {
            log::warn!("Room {}: failed to clear cleanup alarm: {e:?}", self.id);
        }

        let live = self
            .connections
            .values()
            .filter(|tx| !tx.is_disconnected())
            .count();

        if live > 0 {
            log::debug!("Room {}: {live} peer(s) still connected", self.id);
            self.arm_cleanup().await;
            return ControlFlow::Continue(());
        }

        match self.storage.delete_all(&self.id).await {
            Ok(()) => {
                log::info!("Room {}: erased after staying empty", self.id);
                ControlFlow::Break(())
            }
            Err(e) => {
                log::error!("Room {}: failed to erase state: {e:?}", self.id);
                self.arm_cleanup().await;
                ControlFlow::Continue(())
            }
        }
    }

    async fn attachment(&self, conn_id: ConnId) -> Option<Attachment> {
        match self.storage.select_attachment(&self.id, conn_id).await {
            Ok(attachment) => attachment,
            Err(e) => {
                log::warn!(
                    "Room {}: failed to read attachment for conn {conn_id}: {e:?}",
                    self.id
                );
                None
            }
        }
    }

    fn send_to(&self, conn_id: ConnId, message: &OutboundMessage) {
        let Some(tx) = self.connections.get(&conn_id) else {
            return;
        };

        match message.to_json() {
            Ok(text) => {
                if tx.send(text).is_err() {
                    log::debug!("Room {}: conn {conn_id} is gone", self.id);
                }
            }
            Err(e) => log::error!("Room {}: failed to serialize {message}: {e:?}", self.id),
        }
    }

    /// Send `message` to every connection whose peer is not `skip`.
    ///
    /// Connections without a readable attachment are skipped.
    async fn broadcast(&self, message: &OutboundMessage, skip: Option<&str>) {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Room {}: failed to serialize {message}: {e:?}", self.id);
                return;
            }
        };

        for (conn_id, tx) in &self.connections {
            let Some(attachment) = self.attachment(*conn_id).await else {
                continue;
            };
            if skip.is_some_and(|peer_id| peer_id == attachment.peer_id) {
                continue;
            }
            if tx.send(text.clone()).is_err() {
                log::debug!("Room {}: conn {conn_id} is gone", self.id);
            }
        }
    }
}

/// The task driving a single room.
///
/// Call [`handle`](Self::handle) before spawning [`run`](Self::run).
pub struct RoomService {
    room: Room,
    token: CancellationToken,
    receiver: flume::Receiver<Command>,
}

impl RoomService {
    #[must_use]
    pub fn new(id: RoomId, storage: Arc<dyn RoomStorage>) -> Self {
        let (cmd_tx, receiver) = flume::unbounded();

        Self {
            room: Room {
                id,
                storage,
                connections: BTreeMap::new(),
                alarm_task: None,
                cmd_tx,
            },
            token: CancellationToken::new(),
            receiver,
        }
    }

    #[must_use]
    pub fn handle(&self) -> RoomHandle {
        RoomHandle {
            room_id: self.room.id.clone(),
            sender: self.room.cmd_tx.clone(),
            token: self.token.clone(),
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process commands until the room erases itself or is shut down.
    pub async fn run(mut self) {
        log::debug!("Room {}: started", self.room.id);

        while let Some(command) = tokio::select!(
            () = self.token.cancelled() => {
                log::debug!("Room {}: cancelled", self.room.id);
                None
            }
            command = self.receiver.recv_async() => command.ok()
        ) {
            log::trace!("Room {}: received command {command}", self.room.id);

            if self.room.process_command(command).await.is_break() {
                break;
            }
        }

        if let Some(task) = self.room.alarm_task.take() {
            task.abort();
        }
        self.token.cancel();

        log::debug!("Room {}: stopped", self.room.id);
    }
}

/// Handle to a running [`RoomService`].
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: flume::Sender<Command>,
    token: CancellationToken,
}

impl RoomHandle {
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Admit a connection whose outbound frames go to `conn_tx`.
    ///
    /// On success the `welcome` frame is already queued on `conn_tx`.
    ///
    /// # Errors
    ///
    /// * If the room already holds [`MAX_PEERS`] connections
    /// * If the room stopped before handling the join
    /// * If the connection's attachment could not be stored
    pub async fn join(&self, conn_tx: flume::Sender<Msg>) -> Result<Joined, JoinError> {
        let (res_tx, res_rx) = oneshot::channel();

        self.sender
            .send(Command::Join { conn_tx, res_tx })
            .map_err(|_| JoinError::Stopped(self.room_id.clone()))?;

        tokio::select! {
            biased;
            res = res_rx => res.unwrap_or_else(|_| Err(JoinError::Stopped(self.room_id.clone()))),
            () = self.token.cancelled() => Err(JoinError::Stopped(self.room_id.clone())),
        }
    }

    /// Hand a text frame received on `conn_id` to the room.
    ///
    /// # Errors
    ///
    /// * If the room is no longer running
    pub fn relay(&self, conn_id: ConnId, text: Msg) -> Result<(), CommandError> {
        self.send(Command::Relay { conn_id, text })
    }

    /// # Errors
    ///
    /// * If the room is no longer running
    pub fn leave(&self, conn_id: ConnId) -> Result<(), CommandError> {
        self.send(Command::Leave { conn_id })
    }

    /// Number of connections currently in the room.
    ///
    /// Commands are processed in order, so this also waits for every command
    /// sent before it.
    ///
    /// # Errors
    ///
    /// * If the room is no longer running
    pub async fn peer_count(&self) -> Result<usize, CommandError> {
        let (res_tx, res_rx) = oneshot::channel();

        self.send(Command::PeerCount { res_tx })?;

        tokio::select! {
            biased;
            res = res_rx => res.map_err(|_| CommandError::Stopped(self.room_id.clone())),
            () = self.token.cancelled() => Err(CommandError::Stopped(self.room_id.clone())),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.sender.is_disconnected()
    }

    /// Whether both handles drive the same room task.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        self.sender.same_channel(&other.sender)
    }

    pub fn shutdown(&self) {
        log::debug!("Room {}: shutting down", self.room_id);
        self.token.cancel();
    }

    fn send(&self, command: Command) -> Result<(), CommandError> {
        if self.token.is_cancelled() {
            return Err(CommandError::Stopped(self.room_id.clone()));
        }

        self.sender
            .send(command)
            .map_err(|_| CommandError::Stopped(self.room_id.clone()))
    }
}
