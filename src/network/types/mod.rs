pub mod host;
pub mod message;

pub use host::{parse_host_list, HostSpec, PeerAddr};
pub use message::{CommandMessage, PeerEvent, PeerId, PeerMessage};
