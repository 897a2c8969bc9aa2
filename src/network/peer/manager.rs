//! The peer population manager.
//!
//! All state lives in one task. [`PeerManager`] is a cheap handle that talks
//! to it over a command queue; peer links report to it over a second queue.
//! Nothing else touches the registry or the pool.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use log::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::network::events::{EventBus, EventType, ManagerEvent, Notice, Severity};
use crate::network::peer::broadcaster::{select_recipients, Dispatch, SendRequest};
use crate::network::peer::handler::{TcpConnector, TcpPeer};
use crate::network::peer::link::Connector;
use crate::network::peer::pool::CandidatePool;
use crate::network::peer::registry::{PeerRecord, PeerRegistry, PeerSnapshot};
use crate::network::peer::state::{ManagerState, PeerState};
use crate::network::peer::sweeper;
use crate::network::service::listener;
use crate::network::service::router::MessageRouter;
use crate::network::types::{
    parse_host_list, CommandMessage, HostSpec, PeerAddr, PeerEvent, PeerId, PeerMessage,
};

/// Pending requests before callers start waiting on the queue
const COMMAND_CAPACITY: usize = 256;

/// Peer events handled in a row before a waiting command gets a turn
const PEER_EVENT_BURST: usize = 64;

/// Errors returned by [`PeerManager`] calls
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("peer manager has stopped")]
    Closed,

    #[error("no usable host entry in {0}")]
    NoUsableHosts(String),

    #[error("listener failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Requests handled by the manager task
pub(crate) enum Command {
    Launch {
        seeds: Option<Vec<HostSpec>>,
        reply: oneshot::Sender<Result<Option<SocketAddr>, ManagerError>>,
    },
    AddPool {
        hosts: Vec<HostSpec>,
        reply: oneshot::Sender<()>,
    },
    AddActive {
        hosts: Vec<HostSpec>,
        reply: oneshot::Sender<Vec<PeerHandle>>,
    },
    DelActive {
        id: PeerId,
        reply: oneshot::Sender<bool>,
    },
    Send {
        request: SendRequest,
        reply: oneshot::Sender<HashMap<PeerId, Dispatch>>,
    },
    CheckPeers {
        done: Option<oneshot::Sender<()>>,
    },
    ReportStatus,
    Inbound {
        stream: TcpStream,
        addr: SocketAddr,
    },
    Status {
        reply: oneshot::Sender<ManagerStatus>,
    },
    Peers {
        reply: oneshot::Sender<Vec<PeerSnapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    ForceClose,
}

/// Work queued while handling a command or event, run before the next one.
///
/// Dials wait here so the caller holds its [`PeerHandle`] before the link
/// produces any event.
enum Deferred {
    Dial(PeerId),
    Refill,
}

/// Per-peer event stream returned by `add_active`
#[derive(Debug)]
pub struct PeerHandle {
    pub id: PeerId,
    pub addr: PeerAddr,
    events: mpsc::UnboundedReceiver<PeerEvent>,
}

impl PeerHandle {
    /// Next event of this peer; `None` after it closed
    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PeerEvent> {
        self.events.try_recv().ok()
    }
}

/// Point-in-time counters of a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStatus {
    pub state: ManagerState,
    pub num_active: usize,
    pub pool_size: usize,
    pub listen_addr: Option<SocketAddr>,
}

/// Handle to a running peer manager.
///
/// Clones share the same manager. Once every handle is dropped the manager
/// shuts down on its own.
#[derive(Clone)]
pub struct PeerManager {
    commands: mpsc::Sender<Command>,
    events: Arc<EventBus>,
    router: Arc<MessageRouter>,
}

impl PeerManager {
    /// Create a manager that dials peers over TCP.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: ManagerConfig) -> Self {
        let connector = TcpConnector::new(config.magic, config.connect_timeout());
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a manager with a custom link factory
    pub fn with_connector(config: ManagerConfig, connector: Arc<dyn Connector>) -> Self {
        let config = config.normalize();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let events = Arc::new(EventBus::new());
        let router = Arc::new(MessageRouter::new());

        let actor = ManagerActor {
            config,
            state: ManagerState::New,
            registry: PeerRegistry::new(),
            pool: CandidatePool::new(),
            connector,
            events: events.clone(),
            router: router.clone(),
            commands: command_tx.downgrade(),
            peer_tx,
            cancel: CancellationToken::new(),
            listen_addr: None,
            deferred: VecDeque::new(),
        };
        tokio::spawn(actor.run(command_rx, peer_rx));

        Self {
            commands: command_tx,
            events,
            router,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ManagerError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await.map_err(|_| ManagerError::Closed)?;
        rx.await.map_err(|_| ManagerError::Closed)
    }

    /// Start the manager.
    ///
    /// Binds the listener when configured, queues `seeds` into the pool (or
    /// skips seeding for `None`), runs a first admission sweep and starts the
    /// timers. Returns the listening address, if any.
    pub async fn launch(&self, seeds: Option<Vec<HostSpec>>) -> Result<Option<SocketAddr>, ManagerError> {
        self.request(|reply| Command::Launch { seeds, reply }).await?
    }

    /// Queue candidates, connecting straight away while below `min_peers`
    pub async fn add_pool<I, H>(&self, hosts: I) -> Result<(), ManagerError>
    where
        I: IntoIterator<Item = H>,
        H: Into<HostSpec>,
    {
        let hosts: Vec<HostSpec> = hosts.into_iter().map(Into::into).collect();
        self.request(|reply| Command::AddPool { hosts, reply }).await
    }

    /// Like `add_pool` for free-form input; malformed entries are skipped
    pub async fn add_pool_value(&self, hosts: &Value) -> Result<(), ManagerError> {
        let (hosts, skipped) = parse_host_list(hosts);
        if skipped > 0 {
            debug!("Skipped {} malformed pool entries", skipped);
        }
        self.add_pool(hosts).await
    }

    /// Connect to the given hosts now, bypassing the pool
    pub async fn add_active<I, H>(&self, hosts: I) -> Result<Vec<PeerHandle>, ManagerError>
    where
        I: IntoIterator<Item = H>,
        H: Into<HostSpec>,
    {
        let hosts: Vec<HostSpec> = hosts.into_iter().map(Into::into).collect();
        self.request(|reply| Command::AddActive { hosts, reply }).await
    }

    /// Like `add_active` for free-form input.
    ///
    /// Fails when the input names hosts but none of them can be used.
    pub async fn add_active_value(&self, hosts: &Value) -> Result<Vec<PeerHandle>, ManagerError> {
        let (specs, skipped) = parse_host_list(hosts);
        if specs.is_empty() && skipped > 0 {
            return Err(ManagerError::NoUsableHosts(hosts.to_string()));
        }
        self.add_active(specs).await
    }

    /// Ask for a peer to be removed.
    ///
    /// A live peer is disconnected gracefully and leaves the registry once its
    /// socket has closed. Returns `false` for a peer the manager doesn't know.
    pub async fn del_active(&self, id: PeerId) -> Result<bool, ManagerError> {
        self.request(|reply| Command::DelActive { id, reply }).await
    }

    /// Send a message to a random subset of matching peers.
    ///
    /// The returned map holds the peers actually selected.
    pub async fn send(&self, request: SendRequest) -> Result<HashMap<PeerId, Dispatch>, ManagerError> {
        self.request(|reply| Command::Send { request, reply }).await
    }

    /// Run a health sweep now
    pub async fn check_peers(&self) -> Result<(), ManagerError> {
        self.request(|done| Command::CheckPeers { done: Some(done) }).await
    }

    /// Stop admitting peers and disconnect every active one. Idempotent.
    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        match self.request(|reply| Command::Shutdown { reply }).await {
            Err(ManagerError::Closed) => Ok(()),
            other => other,
        }
    }

    pub async fn status(&self) -> Result<ManagerStatus, ManagerError> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn active_peer_count(&self) -> Result<usize, ManagerError> {
        Ok(self.status().await?.num_active)
    }

    pub async fn pool_size(&self) -> Result<usize, ManagerError> {
        Ok(self.status().await?.pool_size)
    }

    pub async fn state(&self) -> Result<ManagerState, ManagerError> {
        Ok(self.status().await?.state)
    }

    pub async fn listen_addr(&self) -> Result<Option<SocketAddr>, ManagerError> {
        Ok(self.status().await?.listen_addr)
    }

    /// Snapshots of every active peer
    pub async fn peers(&self) -> Result<Vec<PeerSnapshot>, ManagerError> {
        self.request(|reply| Command::Peers { reply }).await
    }

    /// Subscribe to manager events.
    ///
    /// Like [`PeerManager::subscribe_command`], a receiver that falls 1024
    /// events behind misses new ones until it catches up.
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<ManagerEvent> {
        self.events.subscribe(event_type).await
    }

    /// Subscribe to every inbound message carrying `command`.
    ///
    /// Delivery is lossy under lag: once 1024 messages sit unread in the
    /// receiver, further ones are dropped for it with a warning rather than
    /// stalling the manager.
    pub fn subscribe_command(&self, command: &str) -> mpsc::Receiver<CommandMessage> {
        self.router.subscribe(command)
    }
}

/// The task owning all manager state
struct ManagerActor {
    config: ManagerConfig,
    state: ManagerState,
    registry: PeerRegistry,
    pool: CandidatePool,
    connector: Arc<dyn Connector>,
    events: Arc<EventBus>,
    router: Arc<MessageRouter>,

    /// Weak, so timers and the listener never keep the manager alive
    commands: mpsc::WeakSender<Command>,

    /// Handed to every link for reporting back
    peer_tx: mpsc::UnboundedSender<PeerEvent>,

    cancel: CancellationToken,
    listen_addr: Option<SocketAddr>,
    deferred: VecDeque<Deferred>,
}

impl ManagerActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        let mut burst = 0;
        loop {
            tokio::select! {
                biased;

                Some(event) = peer_events.recv() => {
                    self.handle_peer_event(event).await;
                    burst += 1;
                    // A busy peer must not starve callers and timers
                    if burst >= PEER_EVENT_BURST {
                        burst = 0;
                        if let Ok(command) = commands.try_recv() {
                            self.run_deferred().await;
                            self.handle_command(command).await;
                        }
                    }
                }
                command = commands.recv() => match command {
                    Some(command) => {
                        burst = 0;
                        self.handle_command(command).await;
                    }
                    None => break,
                },
            }
            self.run_deferred().await;
        }

        debug!("All manager handles dropped");
        self.shutdown().await;
        for id in self.registry.ids() {
            if let Some(record) = self.registry.get_mut(&id) {
                record.link_mut().destroy();
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Launch { seeds, reply } => {
                let result = self.launch(seeds).await;
                let _ = reply.send(result);
            }
            Command::AddPool { hosts, reply } => {
                self.add_pool(hosts);
                let _ = reply.send(());
            }
            Command::AddActive { hosts, reply } => {
                let handles = self.add_active(hosts);
                let _ = reply.send(handles);
            }
            Command::DelActive { id, reply } => {
                let _ = reply.send(self.del_active(&id));
            }
            Command::Send { request, reply } => {
                let _ = reply.send(self.dispatch(request));
            }
            Command::CheckPeers { done } => {
                self.check_peers().await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            Command::ReportStatus => self.report_status().await,
            Command::Inbound { stream, addr } => self.accept(stream, addr).await,
            Command::Status { reply } => {
                let _ = reply.send(ManagerStatus {
                    state: self.state,
                    num_active: self.registry.len(),
                    pool_size: self.pool.len(),
                    listen_addr: self.listen_addr,
                });
            }
            Command::Peers { reply } => {
                let _ = reply.send(self.registry.snapshots());
            }
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
            }
            Command::ForceClose => self.force_close(),
        }
    }

    async fn run_deferred(&mut self) {
        while let Some(task) = self.deferred.pop_front() {
            match task {
                Deferred::Dial(id) => {
                    if let Some(record) = self.registry.get_mut(&id) {
                        // Disconnected before the dial came round
                        if record.state == PeerState::Connecting {
                            record.link_mut().connect();
                        }
                    }
                }
                Deferred::Refill => self.refill().await,
            }
        }
    }

    async fn launch(&mut self, seeds: Option<Vec<HostSpec>>) -> Result<Option<SocketAddr>, ManagerError> {
        if self.state != ManagerState::New {
            warn!("Peer manager already launched ({:?})", self.state);
            return Ok(self.listen_addr);
        }

        // Bind before changing state so a failed launch can be retried
        let bound = if self.config.listen {
            Some(listener::bind_listener(self.config.port).await?)
        } else {
            None
        };

        self.state = ManagerState::Launching;
        info!("Launching peer manager (min {} / max {} peers)", self.config.min_peers, self.config.max_peers);

        if let Some(bound) = bound {
            self.listen_addr = listener::local_addr(&bound);
            listener::spawn_listener(bound, self.commands.clone(), self.cancel.child_token());
        }

        match seeds {
            Some(seeds) => self.add_pool(seeds),
            None => debug!("Launching without seeds"),
        }
        self.check_peers().await;

        sweeper::spawn_health_sweeper(
            self.commands.clone(),
            self.config.sweep_interval(),
            self.cancel.child_token(),
        );
        sweeper::spawn_status_reporter(
            self.commands.clone(),
            self.config.status_interval(),
            self.cancel.child_token(),
        );

        self.state = ManagerState::Running;
        Ok(self.listen_addr)
    }

    fn add_pool(&mut self, hosts: Vec<HostSpec>) {
        for spec in hosts {
            let addr = spec.resolve(self.config.port);
            if self.registry.contains_addr(&addr) {
                debug!("{} is already active", addr);
            } else if self.state != ManagerState::Shutdown && self.registry.len() < self.config.min_peers {
                self.connect(addr);
            } else if !self.pool.push(addr.clone()) {
                debug!("{} is already queued", addr);
            }
        }
    }

    fn add_active(&mut self, hosts: Vec<HostSpec>) -> Vec<PeerHandle> {
        if self.state == ManagerState::Shutdown {
            warn!("Ignoring {} new peers after shutdown", hosts.len());
            return Vec::new();
        }

        hosts
            .into_iter()
            .map(|spec| {
                let addr = spec.resolve(self.config.port);
                let id = self.connect(addr.clone());
                let events = self
                    .registry
                    .get_mut(&id)
                    .map(PeerRecord::open_tap)
                    .unwrap_or_else(|| mpsc::unbounded_channel().1);
                PeerHandle { id, addr, events }
            })
            .collect()
    }

    /// Register an outbound peer and schedule its dial
    fn connect(&mut self, addr: PeerAddr) -> PeerId {
        let id = PeerId::random();
        self.pool.remove(&addr);

        let link = self.connector.open(id, &addr, self.peer_tx.clone());
        let mut record = PeerRecord::new(id, addr, link, false);
        record.transition(PeerState::Connecting);
        self.registry.insert(record);

        self.deferred.push_back(Deferred::Dial(id));
        id
    }

    async fn accept(&mut self, stream: TcpStream, remote: SocketAddr) {
        if self.state == ManagerState::Shutdown {
            debug!("Refusing inbound connection from {} after shutdown", remote);
            return;
        }

        let id = PeerId::random();
        let addr = PeerAddr::new(remote.ip().to_string(), remote.port());
        self.pool.remove(&addr);

        let link = TcpPeer::inbound(id, addr.clone(), stream, self.config.magic, self.peer_tx.clone());
        let mut record = PeerRecord::new(id, addr.clone(), Box::new(link), true);
        record.transition(PeerState::Connecting);
        self.registry.insert(record);
        self.deferred.push_back(Deferred::Dial(id));

        self.publish(ManagerEvent::ListenConnect(id, addr)).await;
    }

    fn del_active(&mut self, id: &PeerId) -> bool {
        let Some(record) = self.registry.get(id) else {
            debug!("Ignoring removal of unknown peer {}", id);
            return false;
        };

        if record.state.is_closing() {
            debug!("Peer {} is already closing", record.addr);
        } else {
            self.disconnect(id);
        }
        true
    }

    /// Start a graceful close. The record stays until the link reports `Close`.
    fn disconnect(&mut self, id: &PeerId) {
        if let Some(record) = self.registry.get_mut(id) {
            if record.state.is_closing() {
                return;
            }
            debug!("Disconnecting {}", record.addr);
            record.transition(PeerState::Disconnecting);
            record.link_mut().disconnect();
        }
    }

    /// Drop a closed peer and refill its slot
    fn remove(&mut self, id: &PeerId) {
        if self.registry.remove(id).is_some() && self.state != ManagerState::Shutdown {
            self.deferred.push_back(Deferred::Refill);
        }
    }

    fn dispatch(&mut self, request: SendRequest) -> HashMap<PeerId, Dispatch> {
        let candidates = self.registry.matching(&request.filter);
        let selected = select_recipients(candidates, request.count, &mut rand::thread_rng());

        let mut dispatched = HashMap::with_capacity(selected.len());
        for id in selected {
            let Some(record) = self.registry.get_mut(&id) else { continue };

            let sent = match record.link().send(&request.command, request.payload.clone()) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to send {} to {}: {}", request.command, record.addr, e);
                    false
                }
            };

            // Replies are only handled after this returns, so registering
            // after the send cannot miss one
            let reply = match request.reply_command.as_deref() {
                Some(command) if sent => {
                    let (tx, rx) = oneshot::channel();
                    record.expect_reply(command, tx);
                    Some(rx)
                }
                _ => None,
            };

            dispatched.insert(id, Dispatch {
                addr: record.addr.clone(),
                sent,
                reply,
            });
        }

        debug!("Sent {} to {} peers", request.command, dispatched.len());
        dispatched
    }

    /// Evict idle peers, then refill
    async fn check_peers(&mut self) {
        if self.state == ManagerState::Shutdown {
            return;
        }

        let timeout = self.config.idle_timeout();
        for id in self.registry.idle_peers(Instant::now(), timeout) {
            let Some(addr) = self.registry.get(&id).map(|record| record.addr.clone()) else { continue };
            self.disconnect(&id);
            let message = format!("{} has been idle for more than {:?}, disconnecting", addr, timeout);
            self.notify(Severity::Notice, message).await;
        }

        self.refill().await;
    }

    /// Draw from the pool up to `min_peers` and flag an overfull registry
    async fn refill(&mut self) {
        if self.state == ManagerState::Shutdown {
            return;
        }

        let min_peers = self.config.min_peers;
        while self.registry.len() < min_peers {
            match self.pool.pop() {
                Some(addr) => {
                    self.connect(addr);
                }
                None => break,
            }
        }

        let active = self.registry.len();
        if active < min_peers {
            let message = format!("Candidate pool exhausted with {} of {} peers active", active, min_peers);
            self.notify(Severity::Info, message).await;
        }
        if active > self.config.max_peers {
            let message = format!(
                "{} active peers exceeds the maximum of {} by {}",
                active,
                self.config.max_peers,
                active - self.config.max_peers
            );
            self.notify(Severity::Warning, message).await;
        }
    }

    async fn report_status(&mut self) {
        if self.state == ManagerState::Shutdown {
            return;
        }
        let num_active = self.registry.len();
        let pool_size = self.pool.len();
        info!("Status: {} active peers, {} in pool", num_active, pool_size);
        self.publish(ManagerEvent::Status { num_active, pool_size }).await;
    }

    async fn shutdown(&mut self) {
        if self.state == ManagerState::Shutdown {
            return;
        }
        info!("Shutting down peer manager, closing {} peers", self.registry.len());
        self.state = ManagerState::Shutdown;
        self.cancel.cancel();

        for id in self.registry.ids() {
            self.disconnect(&id);
        }

        if let Some(grace) = self.config.shutdown_grace() {
            if !self.registry.is_empty() {
                let commands = self.commands.clone();
                tokio::spawn(async move {
                    sleep(grace).await;
                    if let Some(tx) = commands.upgrade() {
                        let _ = tx.send(Command::ForceClose).await;
                    }
                });
            }
        }
    }

    /// Destroy peers whose graceful close is taking too long
    fn force_close(&mut self) {
        for id in self.registry.ids() {
            if let Some(record) = self.registry.get_mut(&id) {
                warn!("{} did not close in time, destroying", record.addr);
                record.link_mut().destroy();
            }
        }
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        let id = event.peer_id();
        let Some(record) = self.registry.get_mut(&id) else {
            debug!("Event for unknown peer {}: {:?}", id, event);
            return;
        };
        record.forward(&event);
        let addr = record.addr.clone();

        match event {
            PeerEvent::Connect(_) => {
                if record.transition(PeerState::Connected) {
                    self.publish(ManagerEvent::PeerConnect(id, addr)).await;
                }
            }
            PeerEvent::End(_) => {
                let closing = record.state.is_closing();
                self.publish(ManagerEvent::PeerEnd(id, addr)).await;
                if !closing {
                    self.disconnect(&id);
                }
            }
            PeerEvent::Error(_, error) => {
                let closing = record.state.is_closing();
                warn!("{}: {}", addr, error);
                self.publish(ManagerEvent::PeerError(id, addr, error)).await;
                if !closing {
                    self.disconnect(&id);
                }
            }
            PeerEvent::Message(_, command, data) => {
                record.touch(Instant::now());
                let replies = record.take_replies(&command);
                let message = PeerMessage {
                    peer: id,
                    addr,
                    command,
                    data,
                };

                for listener in replies {
                    let _ = listener.send(CommandMessage::from(&message));
                }
                self.router.route(&message);
                self.publish(ManagerEvent::Message(message)).await;
            }
            PeerEvent::Close(_) => {
                record.transition(PeerState::Closed);
                debug!("{} closed", addr);
                self.remove(&id);
            }
        }
    }

    async fn publish(&mut self, event: ManagerEvent) {
        self.events.publish(event).await;
    }

    /// Log and publish a severity-channel notification
    async fn notify(&mut self, severity: Severity, message: String) {
        log::log!(severity.log_level(), "{}", message);
        self.publish(ManagerEvent::Error(Notice { severity, message })).await;
    }
}
