use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use log::{debug, warn};

use crate::network::types::PeerAddr;

/// Connect to a peer with timeout.
///
/// Host names are resolved by the system resolver, so DNS seeds can be
/// dialled directly.
pub async fn connect_to_peer(addr: &PeerAddr, connect_timeout: Duration) -> io::Result<TcpStream> {
    debug!("Connecting to peer {}", addr);

    match timeout(connect_timeout, TcpStream::connect((addr.host.as_str(), addr.port))).await {
        Ok(Ok(stream)) => {
            if let Ok(remote) = stream.peer_addr() {
                debug!("{} resolved to {}", addr, remote);
            }
            Ok(stream)
        }
        Ok(Err(e)) => {
            warn!("Failed to connect to peer {}: {}", addr, e);
            Err(e)
        }
        Err(_) => {
            warn!("Connection to peer {} timed out", addr);
            Err(io::Error::new(io::ErrorKind::TimedOut, "Connection timed out"))
        }
    }
}
