use std::fmt;

use serde::{Deserialize, Serialize};

use crate::network::types::{PeerAddr, PeerId, PeerMessage};

/// Severity of a notification on the error channel, ordered from least to
/// most severe. None of them stop the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Notice,
    Warning,
    Error,
}

impl Severity {
    pub fn log_level(&self) -> log::Level {
        match self {
            Severity::Info | Severity::Notice => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "info",
            Severity::Notice => "notice",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(name)
    }
}

/// A severity-tagged notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
}

/// Manager event categories, used to pick a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Severity channel
    Error,

    /// Periodic status reports
    Status,

    /// Raw inbound messages
    Message,

    /// Peer lifecycle (connect, end, error, inbound accept)
    Peer,

    /// All events
    All,
}

/// Events published by the manager
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// Severity-tagged notification
    Error(Notice),

    /// Periodic status report
    Status { num_active: usize, pool_size: usize },

    /// An inbound message from any peer
    Message(PeerMessage),

    /// A peer's socket opened
    PeerConnect(PeerId, PeerAddr),

    /// A peer hung up on us
    PeerEnd(PeerId, PeerAddr),

    /// A peer connection failed
    PeerError(PeerId, PeerAddr, String),

    /// An inbound connection was accepted by the listener
    ListenConnect(PeerId, PeerAddr),
}

impl ManagerEvent {
    /// Get the event type
    pub fn get_type(&self) -> EventType {
        match self {
            ManagerEvent::Error(_) => EventType::Error,
            ManagerEvent::Status { .. } => EventType::Status,
            ManagerEvent::Message(_) => EventType::Message,
            ManagerEvent::PeerConnect(..)
            | ManagerEvent::PeerEnd(..)
            | ManagerEvent::PeerError(..)
            | ManagerEvent::ListenConnect(..) => EventType::Peer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(Severity::Info < Severity::Notice);
        assert!(Severity::Notice < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert_eq!(Severity::Warning.to_string(), "warning");
        assert_eq!(Severity::Notice.log_level(), log::Level::Info);
    }

    #[test]
    fn test_event_types() {
        let status = ManagerEvent::Status { num_active: 1, pool_size: 0 };
        assert_eq!(status.get_type(), EventType::Status);

        let connect = ManagerEvent::PeerConnect(PeerId::random(), PeerAddr::new("127.0.0.1", 8333));
        assert_eq!(connect.get_type(), EventType::Peer);
    }
}
