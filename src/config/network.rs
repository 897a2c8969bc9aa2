use std::time::Duration;
use serde::{Serialize, Deserialize};
use log::warn;

use crate::config::numeric;

/// Default protocol port
pub const DEFAULT_PORT: u16 = 8333;

/// Default network magic (Bitcoin mainnet)
pub const DEFAULT_MAGIC: u32 = 0xD9B4BEF9;

/// Peer manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Accept inbound connections on `port`
    pub listen: bool,

    /// Listen port, and the default port for hosts given without one
    #[serde(deserialize_with = "numeric::deserialize")]
    pub port: u16,

    /// Network magic prefixed to every message
    #[serde(deserialize_with = "numeric::deserialize")]
    pub magic: u32,

    /// Below this many active peers the pool is drained into connections
    #[serde(deserialize_with = "numeric::deserialize")]
    pub min_peers: usize,

    /// Above this many active peers a warning is raised
    #[serde(deserialize_with = "numeric::deserialize")]
    pub max_peers: usize,

    /// Peers silent for longer than this are disconnected
    #[serde(deserialize_with = "numeric::deserialize")]
    pub idle_timeout_ms: u64,

    /// Pause between health sweeps
    #[serde(deserialize_with = "numeric::deserialize")]
    pub sweep_interval_ms: u64,

    /// Pause between status reports
    #[serde(deserialize_with = "numeric::deserialize")]
    pub status_interval_ms: u64,

    /// Dial timeout for outbound connections
    #[serde(deserialize_with = "numeric::deserialize")]
    pub connect_timeout_ms: u64,

    /// After shutdown, peers still closing after this long are destroyed.
    /// Unset means wait indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_grace_ms: Option<u64>,

    /// Reserved for a peer address cache; currently has no effect
    pub use_cache: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            listen: true,
            port: DEFAULT_PORT,
            magic: DEFAULT_MAGIC,
            min_peers: 3,
            max_peers: 20,
            idle_timeout_ms: 30 * 60 * 1000,
            sweep_interval_ms: 60 * 1000,
            status_interval_ms: 60 * 1000,
            connect_timeout_ms: 10 * 1000,
            shutdown_grace_ms: None,
            use_cache: true,
        }
    }
}

impl ManagerConfig {
    /// Fix up inconsistent values.
    ///
    /// `max_peers` is raised to `min_peers` when smaller; zero timer
    /// intervals fall back to their defaults.
    pub fn normalize(mut self) -> Self {
        let defaults = Self::default();

        if self.min_peers > self.max_peers {
            warn!(
                "min_peers ({}) exceeds max_peers ({}); raising max_peers",
                self.min_peers, self.max_peers
            );
            self.max_peers = self.min_peers;
        }
        if self.sweep_interval_ms == 0 {
            warn!("sweep_interval_ms must be positive; using {}", defaults.sweep_interval_ms);
            self.sweep_interval_ms = defaults.sweep_interval_ms;
        }
        if self.status_interval_ms == 0 {
            warn!("status_interval_ms must be positive; using {}", defaults.status_interval_ms);
            self.status_interval_ms = defaults.status_interval_ms;
        }

        self
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Option<Duration> {
        self.shutdown_grace_ms.map(Duration::from_millis)
    }
}
