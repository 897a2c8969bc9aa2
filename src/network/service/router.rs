use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use log::{debug, warn};

use crate::network::types::{CommandMessage, PeerMessage};

/// Buffered messages per command subscriber
const ROUTE_CAPACITY: usize = 1024;

/// Router for inbound messages, keyed by command name.
///
/// Any command can be subscribed to; a message for a command with no
/// subscribers is simply not delivered anywhere.
pub struct MessageRouter {
    /// Subscribers for each command
    routes: DashMap<String, Vec<mpsc::Sender<CommandMessage>>>,
}

impl MessageRouter {
    /// Create a new message router
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
        }
    }

    /// Receive every future message carrying `command`
    pub fn subscribe(&self, command: &str) -> mpsc::Receiver<CommandMessage> {
        let (tx, rx) = mpsc::channel(ROUTE_CAPACITY);
        self.routes.entry(command.to_string()).or_default().push(tx);
        rx
    }

    /// Deliver a message to the subscribers of its command.
    ///
    /// Returns how many subscribers accepted it.
    pub fn route(&self, message: &PeerMessage) -> usize {
        let mut delivered = 0;
        let mut now_empty = false;

        if let Some(mut senders) = self.routes.get_mut(&message.command) {
            let routed = CommandMessage::from(message);
            senders.retain(|tx| match tx.try_send(routed.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!("Dropping {} message from {} for a lagging subscriber", message.command, message.addr);
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
            now_empty = senders.is_empty();
        } else {
            debug!("No subscribers for {} messages", message.command);
        }

        if now_empty {
            self.routes.remove_if(&message.command, |_, senders| senders.is_empty());
        }

        delivered
    }

    /// Number of live subscribers for a command
    pub fn subscriber_count(&self, command: &str) -> usize {
        self.routes
            .get(command)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}
