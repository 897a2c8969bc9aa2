use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A `(host, port)` endpoint of a remote peer.
///
/// Two endpoints are the same candidate when their `host:port` keys match;
/// no name resolution takes place, so `localhost` and `127.0.0.1` are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Uniqueness key used by the candidate pool
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// One host entry as accepted by `add_pool` / `add_active`.
///
/// A bare host takes the configured default port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSpec {
    Host(String),
    HostPort(String, u16),
}

impl HostSpec {
    /// Resolve to an endpoint, filling in `default_port` where needed
    pub fn resolve(&self, default_port: u16) -> PeerAddr {
        match self {
            HostSpec::Host(host) => PeerAddr::new(host.clone(), default_port),
            HostSpec::HostPort(host, port) => PeerAddr::new(host.clone(), *port),
        }
    }

    /// Interpret a free-form value: a string, a `[host, port]` array or a
    /// `{ "host": .., "port": .. }` object. Returns `None` for any other shape.
    pub fn from_value(value: &Value) -> Option<HostSpec> {
        match value {
            Value::String(host) => Self::host_only(host),
            Value::Array(items) => {
                let host = items.first()?.as_str()?;
                match items.get(1) {
                    Some(port) => Some(HostSpec::HostPort(valid_host(host)?, port_from_value(port)?)),
                    None => Self::host_only(host),
                }
            }
            Value::Object(map) => {
                let host = map.get("host")?.as_str()?;
                match map.get("port") {
                    Some(Value::Null) | None => Self::host_only(host),
                    Some(port) => Some(HostSpec::HostPort(valid_host(host)?, port_from_value(port)?)),
                }
            }
            _ => None,
        }
    }

    fn host_only(host: &str) -> Option<HostSpec> {
        valid_host(host).map(HostSpec::Host)
    }
}

fn valid_host(host: &str) -> Option<String> {
    let host = host.trim();
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Ports may be numbers or numeric strings; anything else is malformed.
fn port_from_value(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    }
}

impl From<&str> for HostSpec {
    fn from(host: &str) -> Self {
        HostSpec::Host(host.to_string())
    }
}

impl From<String> for HostSpec {
    fn from(host: String) -> Self {
        HostSpec::Host(host)
    }
}

impl From<(&str, u16)> for HostSpec {
    fn from((host, port): (&str, u16)) -> Self {
        HostSpec::HostPort(host.to_string(), port)
    }
}

impl From<(String, u16)> for HostSpec {
    fn from((host, port): (String, u16)) -> Self {
        HostSpec::HostPort(host, port)
    }
}

impl From<PeerAddr> for HostSpec {
    fn from(addr: PeerAddr) -> Self {
        HostSpec::HostPort(addr.host, addr.port)
    }
}

impl From<std::net::SocketAddr> for HostSpec {
    fn from(addr: std::net::SocketAddr) -> Self {
        HostSpec::HostPort(addr.ip().to_string(), addr.port())
    }
}

/// Normalize a free-form host list.
///
/// Accepts a single string or an array whose elements are strings,
/// `[host, port]` pairs or `{host, port}` objects. Malformed elements are
/// skipped. The second value is the number of skipped elements.
pub fn parse_host_list(value: &Value) -> (Vec<HostSpec>, usize) {
    match value {
        Value::Array(items) => {
            let specs: Vec<HostSpec> = items.iter().filter_map(HostSpec::from_value).collect();
            let skipped = items.len() - specs.len();
            (specs, skipped)
        }
        other => match HostSpec::from_value(other) {
            Some(spec) => (vec![spec], 0),
            None => (Vec::new(), 1),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_host_shapes() {
        let (specs, skipped) = parse_host_list(&json!([
            "seed.example.org",
            ["10.0.0.1", 18333],
            ["10.0.0.2"],
            {"host": "10.0.0.3", "port": "8334"},
            {"host": "10.0.0.4"},
        ]));

        assert_eq!(skipped, 0);
        let addrs: Vec<PeerAddr> = specs.iter().map(|s| s.resolve(8333)).collect();
        assert_eq!(
            addrs,
            vec![
                PeerAddr::new("seed.example.org", 8333),
                PeerAddr::new("10.0.0.1", 18333),
                PeerAddr::new("10.0.0.2", 8333),
                PeerAddr::new("10.0.0.3", 8334),
                PeerAddr::new("10.0.0.4", 8333),
            ]
        );
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let (specs, skipped) = parse_host_list(&json!([
            42,
            null,
            [],
            [7, 8333],
            ["10.0.0.1", "not-a-port"],
            ["10.0.0.1", 70000],
            {"port": 8333},
            "",
            "good.example.org",
        ]));

        assert_eq!(skipped, 8);
        assert_eq!(specs, vec![HostSpec::Host("good.example.org".to_string())]);
    }

    #[test]
    fn test_single_string() {
        let (specs, skipped) = parse_host_list(&json!("dnsseed.example.org"));
        assert_eq!(skipped, 0);
        assert_eq!(specs.len(), 1);
    }

    #[test]
    fn test_display_ipv6() {
        assert_eq!(PeerAddr::new("::1", 8333).to_string(), "[::1]:8333");
        assert_eq!(PeerAddr::new("127.0.0.1", 8333).key(), "127.0.0.1:8333");
    }
}
