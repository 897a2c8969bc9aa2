use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use log::debug;

use crate::network::peer::broadcaster::PeerFilter;
use crate::network::peer::link::PeerLink;
use crate::network::peer::state::PeerState;
use crate::network::types::{CommandMessage, PeerAddr, PeerEvent, PeerId};

/// One active connection and everything the manager tracks about it
pub struct PeerRecord {
    pub id: PeerId,
    pub addr: PeerAddr,
    pub state: PeerState,

    /// When the last message arrived; `None` until the first one
    pub last_seen: Option<Instant>,

    /// Whether the remote dialled us
    pub inbound: bool,

    link: Box<dyn PeerLink>,

    /// Per-peer event stream handed out by `add_active`
    tap: Option<mpsc::UnboundedSender<PeerEvent>>,

    /// One-shot listeners waiting for the next message of a command
    pending_replies: HashMap<String, Vec<oneshot::Sender<CommandMessage>>>,
}

impl PeerRecord {
    pub fn new(id: PeerId, addr: PeerAddr, link: Box<dyn PeerLink>, inbound: bool) -> Self {
        Self {
            id,
            addr,
            state: PeerState::New,
            last_seen: None,
            inbound,
            link,
            tap: None,
            pending_replies: HashMap::new(),
        }
    }

    /// Move to `next` if the state machine allows it
    pub fn transition(&mut self, next: PeerState) -> bool {
        if !self.state.can_transition_to(next) {
            debug!("Ignoring {} -> {} for peer {}", self.state, next, self.addr);
            return false;
        }
        self.state = next;
        true
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_seen = Some(now);
    }

    /// Silent for longer than `timeout`. Peers never heard from are not idle.
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        match self.last_seen {
            Some(seen) => now.saturating_duration_since(seen) > timeout,
            None => false,
        }
    }

    pub fn link(&self) -> &dyn PeerLink {
        self.link.as_ref()
    }

    pub fn link_mut(&mut self) -> &mut dyn PeerLink {
        self.link.as_mut()
    }

    /// Open the per-peer event stream
    pub fn open_tap(&mut self) -> mpsc::UnboundedReceiver<PeerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tap = Some(tx);
        rx
    }

    /// Copy an event to the per-peer stream, if anyone still listens
    pub fn forward(&mut self, event: &PeerEvent) {
        if let Some(tap) = &self.tap {
            if tap.send(event.clone()).is_err() {
                self.tap = None;
            }
        }
    }

    /// Queue a listener for the next `command` message. Listeners whose
    /// receiver has been dropped are pruned first.
    pub fn expect_reply(&mut self, command: &str, listener: oneshot::Sender<CommandMessage>) {
        let listeners = self.pending_replies.entry(command.to_string()).or_default();
        listeners.retain(|tx| !tx.is_closed());
        listeners.push(listener);
    }

    /// Listeners still waiting for `command`
    pub fn pending_reply_count(&self, command: &str) -> usize {
        self.pending_replies.get(command).map_or(0, Vec::len)
    }

    pub fn take_replies(&mut self, command: &str) -> Vec<oneshot::Sender<CommandMessage>> {
        self.pending_replies.remove(command).unwrap_or_default()
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            id: self.id,
            addr: self.addr.clone(),
            state: self.state,
            last_seen: self.last_seen,
            inbound: self.inbound,
        }
    }
}

/// Read-only view of a registry record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub addr: PeerAddr,
    pub state: PeerState,
    pub last_seen: Option<Instant>,
    pub inbound: bool,
}

/// Registry of active peers, keyed by connection id.
///
/// Its length is the active peer count.
#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, PeerRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: PeerRecord) {
        debug!("Registered peer {} at {}", record.id, record.addr);
        self.peers.insert(record.id, record);
    }

    pub fn remove(&mut self, id: &PeerId) -> Option<PeerRecord> {
        let record = self.peers.remove(id)?;
        debug!("Unregistered peer {} at {}", id, record.addr);
        Some(record)
    }

    pub fn get(&self, id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    pub fn get_mut(&mut self, id: &PeerId) -> Option<&mut PeerRecord> {
        self.peers.get_mut(id)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn contains_addr(&self, addr: &PeerAddr) -> bool {
        self.peers.values().any(|record| &record.addr == addr)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    /// Peers silent for longer than `timeout` and not already closing
    pub fn idle_peers(&self, now: Instant, timeout: Duration) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|record| !record.state.is_closing() && record.is_idle(now, timeout))
            .map(|record| record.id)
            .collect()
    }

    /// Peers matching a broadcast filter
    pub fn matching(&self, filter: &PeerFilter) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|record| filter.matches(record))
            .map(|record| record.id)
            .collect()
    }

    pub fn snapshots(&self) -> Vec<PeerSnapshot> {
        self.peers.values().map(PeerRecord::snapshot).collect()
    }
}
