//! JSON frames exchanged over a room's WebSocket.
//!
//! Inbound frames are decoded exactly once into [`InboundMessage`]. Types the
//! server does not know decode to [`InboundMessage::Unknown`] and are ignored,
//! so newer clients can add message kinds without breaking older servers.

use serde::{Deserialize, Serialize, de::Error as _};
use serde_json::{Map, Value};
use strum_macros::AsRefStr;

use crate::PeerId;

/// A frame received from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, AsRefStr)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum InboundMessage {
    Offer(SignalPayload),
    Answer(SignalPayload),
    IceCandidate(SignalPayload),
    TransferPaused,
    TransferResumed,
    Ping,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl InboundMessage {
    /// Decode a single text frame.
    ///
    /// # Errors
    ///
    /// * If the frame is not a JSON object with a string `type` field
    /// * If a known `type` carries a body of the wrong shape
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;

        // serde accepts numeric variant indices as tags; the wire only allows names
        if !value.get("type").is_some_and(Value::is_string) {
            return Err(serde_json::Error::custom("missing string `type` field"));
        }

        serde_json::from_value(value)
    }

    /// The frame forwarded to the other peers when `from` sends `self`.
    ///
    /// Returns `None` for frames that are answered by the server or ignored.
    #[must_use]
    pub fn into_relayed(self, from: PeerId) -> Option<OutboundMessage> {
        Some(match self {
            Self::Offer(payload) => OutboundMessage::Offer(RelayedSignal::new(payload, from)),
            Self::Answer(payload) => OutboundMessage::Answer(RelayedSignal::new(payload, from)),
            Self::IceCandidate(payload) => {
                OutboundMessage::IceCandidate(RelayedSignal::new(payload, from))
            }
            Self::TransferPaused => OutboundMessage::TransferPaused(FromPayload { from }),
            Self::TransferResumed => OutboundMessage::TransferResumed(FromPayload { from }),
            Self::Ping | Self::Unknown => return None,
        })
    }
}

/// The body of an `offer`, `answer` or `ice-candidate` frame, minus its `type`.
///
/// The server never looks inside; the fields are forwarded verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalPayload(pub Map<String, Value>);

/// A frame sent to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OutboundMessage {
    Welcome(WelcomePayload),
    PeerJoined(PeerPayload),
    PeerLeft(PeerPayload),
    Offer(RelayedSignal),
    Answer(RelayedSignal),
    IceCandidate(RelayedSignal),
    TransferPaused(FromPayload),
    TransferResumed(FromPayload),
    Pong(PongPayload),
}

impl std::fmt::Display for OutboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl OutboundMessage {
    /// # Errors
    ///
    /// * If the message fails to serialize
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomePayload {
    pub peer_id: PeerId,
    pub peer_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPayload {
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FromPayload {
    pub from: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
    pub peer_count: usize,
}

/// A signaling payload tagged with the id of the peer that sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedSignal {
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    pub from: PeerId,
}

impl RelayedSignal {
    /// Any `from` the sender put in the payload is replaced by `from`.
    #[must_use]
    pub fn new(payload: SignalPayload, from: PeerId) -> Self {
        let mut payload = payload.0;
        payload.remove("from");
        Self { payload, from }
    }
}
