use std::collections::{HashSet, VecDeque};

use crate::network::types::PeerAddr;

/// Backlog of known but unconnected peers.
///
/// First-in first-out, with at most one entry per `host:port` key. A
/// duplicate insert keeps the original position.
#[derive(Debug, Default)]
pub struct CandidatePool {
    entries: VecDeque<PeerAddr>,
    keys: HashSet<String>,
}

impl CandidatePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `addr` unless it is already queued. Returns whether it was added.
    pub fn push(&mut self, addr: PeerAddr) -> bool {
        if !self.keys.insert(addr.key()) {
            return false;
        }
        self.entries.push_back(addr);
        true
    }

    /// Take the oldest candidate
    pub fn pop(&mut self) -> Option<PeerAddr> {
        let addr = self.entries.pop_front()?;
        self.keys.remove(&addr.key());
        Some(addr)
    }

    /// Drop `addr` from the backlog, e.g. because it became active
    pub fn remove(&mut self, addr: &PeerAddr) -> bool {
        if !self.keys.remove(&addr.key()) {
            return false;
        }
        self.entries.retain(|entry| entry != addr);
        true
    }

    pub fn contains(&self, addr: &PeerAddr) -> bool {
        self.keys.contains(&addr.key())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerAddr> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut pool = CandidatePool::new();
        pool.push(PeerAddr::new("a", 1));
        pool.push(PeerAddr::new("b", 1));
        pool.push(PeerAddr::new("c", 1));

        assert_eq!(pool.pop(), Some(PeerAddr::new("a", 1)));
        assert_eq!(pool.pop(), Some(PeerAddr::new("b", 1)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_duplicates_keep_first_position() {
        let mut pool = CandidatePool::new();
        assert!(pool.push(PeerAddr::new("a", 1)));
        assert!(pool.push(PeerAddr::new("b", 1)));
        assert!(!pool.push(PeerAddr::new("a", 1)));
        assert!(pool.push(PeerAddr::new("a", 2)));

        let order: Vec<String> = pool.iter().map(|a| a.key()).collect();
        assert_eq!(order, vec!["a:1", "b:1", "a:2"]);
    }

    #[test]
    fn test_popped_entry_can_return() {
        let mut pool = CandidatePool::new();
        pool.push(PeerAddr::new("a", 1));
        pool.pop();
        assert!(pool.is_empty());
        assert!(pool.push(PeerAddr::new("a", 1)));
    }

    #[test]
    fn test_remove() {
        let mut pool = CandidatePool::new();
        pool.push(PeerAddr::new("a", 1));
        pool.push(PeerAddr::new("b", 1));

        assert!(pool.remove(&PeerAddr::new("a", 1)));
        assert!(!pool.remove(&PeerAddr::new("a", 1)));
        assert!(!pool.contains(&PeerAddr::new("a", 1)));
        assert_eq!(pool.len(), 1);
    }
}
