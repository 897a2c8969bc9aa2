use bytes::Bytes;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::oneshot;

use crate::network::peer::registry::PeerRecord;
use crate::network::peer::state::PeerState;
use crate::network::types::{CommandMessage, PeerAddr, PeerId};

/// Which registry property a broadcast filters on, and the accepted values.
/// A record matches when its property equals any of the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFilter {
    /// Every active peer
    Any,
    State(Vec<PeerState>),
    Host(Vec<String>),
    Port(Vec<u16>),
    Id(Vec<PeerId>),
    Inbound(bool),
}

impl PeerFilter {
    /// Shorthand for the common "connected peers only" filter
    pub fn connected() -> Self {
        PeerFilter::State(vec![PeerState::Connected])
    }

    pub fn matches(&self, record: &PeerRecord) -> bool {
        match self {
            PeerFilter::Any => true,
            PeerFilter::State(states) => states.contains(&record.state),
            PeerFilter::Host(hosts) => hosts.iter().any(|h| h == &record.addr.host),
            PeerFilter::Port(ports) => ports.contains(&record.addr.port),
            PeerFilter::Id(ids) => ids.contains(&record.id),
            PeerFilter::Inbound(inbound) => record.inbound == *inbound,
        }
    }
}

/// An outbound message for a random subset of peers
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Maximum number of recipients; `None` sends to every match
    pub count: Option<usize>,
    pub filter: PeerFilter,
    pub command: String,
    pub payload: Bytes,

    /// Register a one-shot listener per recipient for this reply command
    pub reply_command: Option<String>,
}

impl SendRequest {
    /// Send `command` to every connected peer
    pub fn new(command: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            count: None,
            filter: PeerFilter::connected(),
            command: command.into(),
            payload: payload.into(),
            reply_command: None,
        }
    }

    /// Cap the number of recipients
    pub fn limit(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn filter(mut self, filter: PeerFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Listen for each recipient's next `command` message
    pub fn expect_reply(mut self, command: impl Into<String>) -> Self {
        self.reply_command = Some(command.into());
        self
    }
}

/// Outcome of a send for one selected peer
#[derive(Debug)]
pub struct Dispatch {
    pub addr: PeerAddr,

    /// Whether the link accepted the message
    pub sent: bool,

    /// Resolves with the peer's next reply, if one was requested
    pub reply: Option<oneshot::Receiver<CommandMessage>>,
}

/// Shuffle candidates uniformly and keep at most `count` of them
pub fn select_recipients<R: Rng + ?Sized>(
    mut candidates: Vec<PeerId>,
    count: Option<usize>,
    rng: &mut R,
) -> Vec<PeerId> {
    candidates.shuffle(rng);
    if let Some(count) = count {
        candidates.truncate(count);
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ids(n: usize) -> Vec<PeerId> {
        (0..n).map(|_| PeerId::random()).collect()
    }

    #[test]
    fn test_cap_and_distinct() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidates = ids(5);

        let picked = select_recipients(candidates.clone(), Some(2), &mut rng);
        assert_eq!(picked.len(), 2);
        assert_ne!(picked[0], picked[1]);
        assert!(picked.iter().all(|id| candidates.contains(id)));
    }

    #[test]
    fn test_no_cap_sends_to_all() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidates = ids(4);
        let picked: HashSet<PeerId> = select_recipients(candidates.clone(), None, &mut rng).into_iter().collect();
        assert_eq!(picked, candidates.into_iter().collect());
    }

    #[test]
    fn test_cap_larger_than_candidates() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(select_recipients(ids(3), Some(10), &mut rng).len(), 3);
        assert!(select_recipients(Vec::new(), Some(2), &mut rng).is_empty());
    }

    #[test]
    fn test_selection_is_spread_out() {
        let mut rng = StdRng::seed_from_u64(42);
        let candidates = ids(5);
        let mut hits: HashMap<PeerId, usize> = HashMap::new();
        let trials = 5_000;

        for _ in 0..trials {
            for id in select_recipients(candidates.clone(), Some(2), &mut rng) {
                *hits.entry(id).or_default() += 1;
            }
        }

        // Each peer is expected in 2/5 of the draws
        let expected = trials * 2 / 5;
        assert_eq!(hits.len(), 5);
        for count in hits.values() {
            assert!(
                (*count as f64 - expected as f64).abs() < expected as f64 * 0.1,
                "count {} too far from {}",
                count,
                expected
            );
        }
    }

    #[test]
    fn test_request_builder() {
        let request = SendRequest::new("ping", Bytes::from_static(b"\x00"))
            .limit(2)
            .filter(PeerFilter::Port(vec![8333]))
            .expect_reply("pong");

        assert_eq!(request.count, Some(2));
        assert_eq!(request.filter, PeerFilter::Port(vec![8333]));
        assert_eq!(request.reply_command.as_deref(), Some("pong"));
        assert_eq!(SendRequest::new("ping", Bytes::new()).filter, PeerFilter::connected());
    }
}
