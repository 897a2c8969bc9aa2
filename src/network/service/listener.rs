use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use log::{debug, error, info};

use crate::network::peer::manager::Command;

/// Bind the inbound listener on all interfaces
pub async fn bind_listener(port: u16) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Listening for connections on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept connections and hand them to the manager.
///
/// Holds only a weak handle on the manager, like the timers.
pub(crate) fn spawn_listener(
    listener: TcpListener,
    commands: mpsc::WeakSender<Command>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    info!("Accepted connection from {}", addr);
                    let Some(tx) = commands.upgrade() else { break };
                    if tx.send(Command::Inbound { stream, addr }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
        debug!("Listener stopped");
    })
}

/// Local address of a bound listener, if it can be determined
pub fn local_addr(listener: &TcpListener) -> Option<SocketAddr> {
    listener.local_addr().ok()
}
