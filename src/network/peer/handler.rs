use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use log::{debug, info, warn};

use crate::network::codec::{is_valid_command, Frame, FrameCodec};
use crate::network::peer::link::{Connector, PeerError, PeerLink};
use crate::network::service::dialer;
use crate::network::types::{PeerAddr, PeerEvent, PeerId};

/// Requests from the link to its connection task
enum Outgoing {
    Frame(Frame),
    Close,
}

/// Emits `Close` for a link at most once, whoever gets there first
#[derive(Clone)]
struct CloseOnce {
    id: PeerId,
    events: mpsc::UnboundedSender<PeerEvent>,
    fired: Arc<AtomicBool>,
}

impl CloseOnce {
    fn fire(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(PeerEvent::Close(self.id));
        }
    }
}

/// A peer reached over TCP, speaking the framed message envelope
pub struct TcpPeer {
    id: PeerId,
    addr: PeerAddr,
    magic: u32,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<PeerEvent>,

    /// Already-accepted socket for inbound peers
    stream: Option<TcpStream>,

    outgoing: Option<mpsc::UnboundedSender<Outgoing>>,
    task: Option<JoinHandle<()>>,
    close: CloseOnce,
}

impl TcpPeer {
    /// Create a link that dials `addr` when connected
    pub fn outbound(
        id: PeerId,
        addr: PeerAddr,
        magic: u32,
        connect_timeout: Duration,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self::build(id, addr, None, magic, connect_timeout, events)
    }

    /// Wrap a socket accepted by the listener
    pub fn inbound(
        id: PeerId,
        addr: PeerAddr,
        stream: TcpStream,
        magic: u32,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self::build(id, addr, Some(stream), magic, Duration::ZERO, events)
    }

    fn build(
        id: PeerId,
        addr: PeerAddr,
        stream: Option<TcpStream>,
        magic: u32,
        connect_timeout: Duration,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        let close = CloseOnce {
            id,
            events: events.clone(),
            fired: Arc::new(AtomicBool::new(false)),
        };
        Self {
            id,
            addr,
            magic,
            connect_timeout,
            events,
            stream,
            outgoing: None,
            task: None,
            close,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn addr(&self) -> &PeerAddr {
        &self.addr
    }
}

impl PeerLink for TcpPeer {
    fn connect(&mut self) {
        if self.task.is_some() || self.close.fired.load(Ordering::SeqCst) {
            return;
        }

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        self.outgoing = Some(outgoing_tx);

        let connection = Connection {
            id: self.id,
            addr: self.addr.clone(),
            magic: self.magic,
            events: self.events.clone(),
            close: self.close.clone(),
        };
        let stream = self.stream.take();
        let connect_timeout = self.connect_timeout;
        self.task = Some(tokio::spawn(connection.run(stream, connect_timeout, outgoing_rx)));
    }

    fn send(&self, command: &str, payload: Bytes) -> Result<(), PeerError> {
        if !is_valid_command(command) {
            return Err(PeerError::BadCommand(command.to_string()));
        }
        let outgoing = self.outgoing.as_ref().ok_or(PeerError::NotConnected(self.id))?;
        outgoing
            .send(Outgoing::Frame(Frame::new(command, payload)))
            .map_err(|_| PeerError::Closed(self.id))
    }

    fn disconnect(&mut self) {
        match &self.outgoing {
            Some(outgoing) => {
                // A failed send means the connection task has already finished
                if outgoing.send(Outgoing::Close).is_err() {
                    self.close.fire();
                }
            }
            None => {
                self.stream = None;
                self.close.fire();
            }
        }
    }

    fn destroy(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.outgoing = None;
        self.stream = None;
        self.close.fire();
    }
}

impl Drop for TcpPeer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// State moved into the connection task
struct Connection {
    id: PeerId,
    addr: PeerAddr,
    magic: u32,
    events: mpsc::UnboundedSender<PeerEvent>,
    close: CloseOnce,
}

impl Connection {
    fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    async fn run(
        self,
        stream: Option<TcpStream>,
        connect_timeout: Duration,
        mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    ) {
        let stream = match stream {
            Some(stream) => stream,
            None => match dialer::connect_to_peer(&self.addr, connect_timeout).await {
                Ok(stream) => stream,
                Err(e) => {
                    self.emit(PeerEvent::Error(self.id, e.to_string()));
                    self.close.fire();
                    return;
                }
            },
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", self.addr, e);
        }

        info!("{}: connect", self.addr);
        self.emit(PeerEvent::Connect(self.id));

        let mut framed = Framed::new(stream, FrameCodec::new(self.magic));
        let mut closing = false;

        loop {
            tokio::select! {
                out = outgoing.recv(), if !closing => match out {
                    Some(Outgoing::Frame(frame)) => {
                        if let Err(e) = framed.send(frame).await {
                            warn!("Failed to send message to peer {}: {}", self.addr, e);
                            self.emit(PeerEvent::Error(self.id, e.to_string()));
                            break;
                        }
                    }
                    Some(Outgoing::Close) | None => {
                        debug!("{}: closing", self.addr);
                        closing = true;
                        if let Err(e) = framed.get_mut().shutdown().await {
                            debug!("Shutdown of {} failed: {}", self.addr, e);
                            break;
                        }
                    }
                },

                inbound = framed.next() => match inbound {
                    Some(Ok(frame)) => {
                        debug!("{}: message {} {}", self.addr, frame.command, hex::encode(&frame.payload));
                        self.emit(PeerEvent::Message(self.id, frame.command, frame.payload));
                    }
                    Some(Err(e)) => {
                        if !closing {
                            warn!("Error reading message from peer {}: {}", self.addr, e);
                            self.emit(PeerEvent::Error(self.id, e.to_string()));
                        }
                        break;
                    }
                    None => {
                        if !closing {
                            info!("{}: end", self.addr);
                            self.emit(PeerEvent::End(self.id));
                        }
                        break;
                    }
                },
            }
        }

        info!("{} is now closed", self.addr);
        self.close.fire();
    }
}

/// Opens [`TcpPeer`] links for the manager
#[derive(Debug, Clone)]
pub struct TcpConnector {
    magic: u32,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(magic: u32, connect_timeout: Duration) -> Self {
        Self { magic, connect_timeout }
    }
}

impl Connector for TcpConnector {
    fn open(
        &self,
        id: PeerId,
        addr: &PeerAddr,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Box<dyn PeerLink> {
        Box::new(TcpPeer::outbound(id, addr.clone(), self.magic, self.connect_timeout, events))
    }
}
