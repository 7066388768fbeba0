#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Shared types for the `PeerDrop` signaling protocol.
//!
//! A room brokers the `WebRTC` handshake between at most two peers. Every
//! WebSocket frame is a single JSON object discriminated by its `type` field;
//! see [`models`] for the inbound and outbound shapes and [`id`] for how room
//! and peer identifiers are minted.

pub mod id;
pub mod models;

/// Room identifier.
pub type RoomId = String;

/// Peer identifier, unique within its room.
pub type PeerId = String;
