// Peer population manager for Bitcoin-family gossip networks

pub mod config;
pub mod network;

pub use config::{Config, ConfigError, ManagerConfig};
pub use network::{PeerManager, ManagerError};

// Initialize logging
pub fn init_logger() {
    env_logger::init();
}
