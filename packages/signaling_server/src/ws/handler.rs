use std::time::Duration;

use actix_ws::Message;
use futures_util::{
    StreamExt as _,
    future::{Either, select},
};
use tokio::{
    pin,
    time::{Instant, interval},
};

use crate::{
    room::{Joined, RoomHandle},
    ws::Msg,
};

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long before lack of client response causes a timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport level liveness settings for a room connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub interval: Duration,
    pub client_timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: HEARTBEAT_INTERVAL,
            client_timeout: CLIENT_TIMEOUT,
        }
    }
}

/// Pump frames between a joined WebSocket and its room until either side goes away.
///
/// Text frames are handed to the room, frames queued by the room are written
/// to the socket, and a client that stops answering pings is dropped. The room
/// is told about the departure exactly once, however the loop ends.
pub async fn room_ws(
    room: RoomHandle,
    joined: Joined,
    mut session: actix_ws::Session,
    mut msg_stream: actix_ws::MessageStream,
    conn_rx: flume::Receiver<Msg>,
    heartbeat: Heartbeat,
) {
    let Joined {
        conn_id, peer_id, ..
    } = joined;

    log::info!(
        "Peer {peer_id} connected to room {} (conn {conn_id})",
        room.room_id()
    );

    let mut last_heartbeat = Instant::now();
    let mut interval = interval(heartbeat.interval);

    let close_reason = loop {
        let tick = interval.tick();
        pin!(tick);

        let msg_rx = conn_rx.recv_async();
        pin!(msg_rx);

        let messages = select(msg_stream.next(), msg_rx);
        pin!(messages);

        match select(messages, tick).await {
            // frames received from the client
            Either::Left((Either::Left((Some(Ok(msg)), _)), _)) => match msg {
                Message::Ping(bytes) => {
                    last_heartbeat = Instant::now();
                    if session.pong(&bytes).await.is_err() {
                        break None;
                    }
                }

                Message::Pong(_) => {
                    last_heartbeat = Instant::now();
                }

                Message::Text(text) => {
                    last_heartbeat = Instant::now();
                    if let Err(e) = room.relay(conn_id, text.to_string()) {
                        log::debug!("Dropping frame from conn {conn_id}: {e}");
                        break None;
                    }
                }

                Message::Binary(_) | Message::Continuation(_) => {
                    last_heartbeat = Instant::now();
                    log::debug!("Ignoring non-text frame from conn {conn_id}");
                }

                Message::Close(reason) => break reason,

                Message::Nop => {}
            },

            // client WebSocket stream error
            Either::Left((Either::Left((Some(Err(e)), _)), _)) => {
                log::debug!("WebSocket error on conn {conn_id}: {e}");
                break None;
            }

            // client WebSocket stream ended
            Either::Left((Either::Left((None, _)), _)) => break None,

            // frames queued by the room
            Either::Left((Either::Right((Ok(text), _)), _)) => {
                if session.text(text).await.is_err() {
                    log::debug!("Conn {conn_id} closed while sending");
                    break None;
                }
            }

            // the room dropped this connection
            Either::Left((Either::Right((Err(_), _)), _)) => {
                log::debug!("Room {} closed conn {conn_id}", room.room_id());
                break None;
            }

            // heartbeat internal tick
            Either::Right((_inst, _)) => {
                if Instant::now().duration_since(last_heartbeat) > heartbeat.client_timeout {
                    log::info!(
                        "Conn {conn_id} has not sent heartbeat in over {:?}; disconnecting",
                        heartbeat.client_timeout
                    );
                    break None;
                }

                let _ = session.ping(b"").await;
            }
        }
    };

    if let Err(e) = room.leave(conn_id) {
        log::debug!("Leave for conn {conn_id} not delivered: {e}");
    }

    log::info!(
        "Peer {peer_id} disconnected from room {} (conn {conn_id})",
        room.room_id()
    );

    let _ = session.close(close_reason).await;
}
