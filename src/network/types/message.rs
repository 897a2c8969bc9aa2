use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::network::types::host::PeerAddr;

/// Identifier of one peer connection, stable for the connection's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Generate a fresh random identifier
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notifications a peer link emits towards its owner.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The socket is open
    Connect(PeerId),

    /// The remote end hung up
    End(PeerId),

    /// The connection failed or misbehaved
    Error(PeerId, String),

    /// A complete protocol message arrived
    Message(PeerId, String, Bytes),

    /// The socket is fully closed; emitted exactly once per link
    Close(PeerId),
}

impl PeerEvent {
    pub fn peer_id(&self) -> PeerId {
        match self {
            PeerEvent::Connect(id)
            | PeerEvent::End(id)
            | PeerEvent::Error(id, _)
            | PeerEvent::Message(id, _, _)
            | PeerEvent::Close(id) => *id,
        }
    }
}

/// A raw inbound message as seen by `message` subscribers
#[derive(Debug, Clone)]
pub struct PeerMessage {
    pub peer: PeerId,
    pub addr: PeerAddr,
    pub command: String,
    pub data: Bytes,
}

/// An inbound message delivered to subscribers of one command
#[derive(Debug, Clone)]
pub struct CommandMessage {
    pub peer: PeerId,
    pub addr: PeerAddr,
    pub data: Bytes,
}

impl From<&PeerMessage> for CommandMessage {
    fn from(msg: &PeerMessage) -> Self {
        Self {
            peer: msg.peer,
            addr: msg.addr.clone(),
            data: msg.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_ids_are_unique() {
        let a = PeerId::random();
        let b = PeerId::random();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }

    #[test]
    fn test_event_peer_id() {
        let id = PeerId::random();
        let event = PeerEvent::Message(id, "ping".to_string(), Bytes::from_static(b"\x01"));
        assert_eq!(event.peer_id(), id);
        assert_eq!(PeerEvent::Close(id).peer_id(), id);
    }
}
