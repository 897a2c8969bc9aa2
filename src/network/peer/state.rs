use std::fmt;
use serde::{Serialize, Deserialize};

/// Connection state of a peer.
///
/// Lifecycle: `New -> Connecting -> Connected -> Disconnecting -> Closed`.
/// Errors are not a state of their own; they push a live peer into
/// `Disconnecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    /// Registered, dial not yet issued
    New,

    /// Attempting to connect
    Connecting,

    /// Socket open, messages flowing
    Connected,

    /// Graceful close requested, waiting for the socket to close
    Disconnecting,

    /// Socket closed; the record is about to leave the registry
    Closed,
}

impl PeerState {
    /// Whether a close is already under way
    pub fn is_closing(&self) -> bool {
        matches!(self, PeerState::Disconnecting | PeerState::Closed)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: PeerState) -> bool {
        use PeerState::*;
        matches!(
            (*self, next),
            (New, Connecting)
                | (New, Disconnecting)
                | (Connecting, Connected)
                | (Connecting, Disconnecting)
                | (Connected, Disconnecting)
                | (New, Closed)
                | (Connecting, Closed)
                | (Connected, Closed)
                | (Disconnecting, Closed)
        )
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerState::New => "new",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Disconnecting => "disconnecting",
            PeerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lifecycle of the manager itself. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    New,
    Launching,
    Running,
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_state_transitions() {
        assert!(PeerState::New.can_transition_to(PeerState::Connecting));
        assert!(PeerState::Connecting.can_transition_to(PeerState::Connected));
        assert!(PeerState::Connected.can_transition_to(PeerState::Disconnecting));
        assert!(PeerState::Disconnecting.can_transition_to(PeerState::Closed));

        // Once disconnecting, never back to connected
        assert!(!PeerState::Disconnecting.can_transition_to(PeerState::Connected));
        assert!(!PeerState::Disconnecting.can_transition_to(PeerState::Connecting));
        assert!(!PeerState::Closed.can_transition_to(PeerState::Connected));
        assert!(!PeerState::Disconnecting.can_transition_to(PeerState::Disconnecting));
    }

    #[test]
    fn test_closing_states() {
        assert!(!PeerState::Connected.is_closing());
        assert!(PeerState::Disconnecting.is_closing());
        assert!(PeerState::Closed.is_closing());
    }

    #[test]
    fn test_manager_state_order() {
        assert!(ManagerState::New < ManagerState::Launching);
        assert!(ManagerState::Running < ManagerState::Shutdown);
    }
}
