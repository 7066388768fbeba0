#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! `PeerDrop` signaling server.
//!
//! Rooms are created over HTTP and joined over WebSocket. Each room is a
//! single task ([`room::RoomService`]) that admits at most two peers, relays
//! their handshake frames to one another, and erases itself once it has been
//! empty for [`room::CLEANUP_GRACE_PERIOD`]. The [`registry::RoomRegistry`]
//! guarantees a single running instance per room id.

pub mod api;
pub mod config;
pub mod registry;
pub mod room;
pub mod storage;
pub mod turn;
pub mod ws;

use registry::RoomRegistry;
use turn::TurnCredentials;
use ws::handler::Heartbeat;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: RoomRegistry,
    pub turn: TurnCredentials,
    pub heartbeat: Heartbeat,
}
