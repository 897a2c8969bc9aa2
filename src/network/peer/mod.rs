// Peer management module

pub mod broadcaster;
pub mod handler;
pub mod link;
pub mod manager;
pub mod pool;
pub mod registry;
pub mod state;
pub mod sweeper;
