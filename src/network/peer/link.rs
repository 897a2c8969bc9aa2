//! The seam between the manager and the transport.
//!
//! The manager never touches sockets. It owns one [`PeerLink`] per registry
//! record and learns what happened to it through [`PeerEvent`]s pushed onto
//! the queue it handed to the [`Connector`].

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::network::codec::FrameError;
use crate::network::types::{PeerAddr, PeerEvent, PeerId};

/// Errors raised by a peer link
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer {0} has not been connected")]
    NotConnected(PeerId),

    #[error("peer {0} is closed")]
    Closed(PeerId),

    #[error("invalid command name {0:?}")]
    BadCommand(String),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// One connection to a remote peer.
///
/// Every link emits exactly one `Close` once it is finished, whether it
/// ended by `disconnect`, `destroy`, a remote hang-up or an error.
pub trait PeerLink: Send {
    /// Start the connection. Events begin flowing after this call.
    fn connect(&mut self);

    /// Queue a message for the peer
    fn send(&self, command: &str, payload: Bytes) -> Result<(), PeerError>;

    /// Close gracefully; `Close` follows once the socket is done
    fn disconnect(&mut self);

    /// Close immediately
    fn destroy(&mut self);
}

/// Factory for outbound links
pub trait Connector: Send + Sync + 'static {
    /// Create a link to `addr` without connecting it yet
    fn open(
        &self,
        id: PeerId,
        addr: &PeerAddr,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Box<dyn PeerLink>;
}
