// Peer-to-peer networking layer
//
// - Candidate pool and admission control between min/max peers
// - Health sweeps evicting idle peers
// - Per-command routing of inbound messages
// - Randomized broadcast to a subset of peers

pub mod codec;
pub mod events;
pub mod peer;
pub mod service;
pub mod types;

pub use events::{EventType, ManagerEvent, Notice, Severity};
pub use peer::broadcaster::{Dispatch, PeerFilter, SendRequest};
pub use peer::link::{Connector, PeerError, PeerLink};
pub use peer::manager::{ManagerError, ManagerStatus, PeerHandle, PeerManager};
pub use peer::registry::PeerSnapshot;
pub use peer::state::{ManagerState, PeerState};
pub use types::{CommandMessage, HostSpec, PeerAddr, PeerEvent, PeerId, PeerMessage};
