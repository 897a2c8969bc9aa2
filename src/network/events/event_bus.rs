use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use log::{debug, warn};

use crate::network::events::event_types::{EventType, ManagerEvent};

/// Buffered events per subscriber before new ones are dropped
const SUBSCRIBER_CAPACITY: usize = 1024;

/// Event bus for manager events
pub struct EventBus {
    /// Subscribers by event type
    subscribers: Arc<RwLock<HashMap<EventType, Vec<mpsc::Sender<ManagerEvent>>>>>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Never blocks: a subscriber that stopped draining loses events, and a
    /// subscriber whose receiver was dropped is removed.
    pub async fn publish(&self, event: ManagerEvent) {
        let event_type = event.get_type();
        let mut subscribers = self.subscribers.write().await;

        for key in [event_type, EventType::All] {
            if let Some(senders) = subscribers.get_mut(&key) {
                senders.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        warn!("Dropping {:?} event for a lagging subscriber", event_type);
                        true
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Removing closed {:?} subscriber", key);
                        false
                    }
                });
            }
        }
    }

    /// Subscribe to events of a specific type
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<ManagerEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);

        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(event_type).or_insert_with(Vec::new).push(tx);

        rx
    }

    /// Get the number of live subscribers for an event type
    pub async fn subscriber_count(&self, event_type: EventType) -> usize {
        let subscribers = self.subscribers.read().await;
        subscribers
            .get(&event_type)
            .map(|s| s.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::events::event_types::{Notice, Severity};

    #[tokio::test]
    async fn test_event_bus() {
        let event_bus = EventBus::new();

        let mut status_rx = event_bus.subscribe(EventType::Status).await;
        let mut all_rx = event_bus.subscribe(EventType::All).await;

        assert_eq!(event_bus.subscriber_count(EventType::Status).await, 1);
        assert_eq!(event_bus.subscriber_count(EventType::All).await, 1);

        event_bus
            .publish(ManagerEvent::Status { num_active: 2, pool_size: 5 })
            .await;

        match status_rx.recv().await.unwrap() {
            ManagerEvent::Status { num_active, pool_size } => {
                assert_eq!(num_active, 2);
                assert_eq!(pool_size, 5);
            }
            other => panic!("Expected Status event, got {:?}", other),
        }
        assert!(matches!(all_rx.recv().await.unwrap(), ManagerEvent::Status { .. }));
    }

    #[tokio::test]
    async fn test_events_filtered_by_type() {
        let event_bus = EventBus::new();
        let mut status_rx = event_bus.subscribe(EventType::Status).await;

        event_bus
            .publish(ManagerEvent::Error(Notice {
                severity: Severity::Info,
                message: "pool empty".to_string(),
            }))
            .await;

        assert!(status_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscribers_pruned() {
        let event_bus = EventBus::new();
        let rx = event_bus.subscribe(EventType::Status).await;
        drop(rx);

        event_bus
            .publish(ManagerEvent::Status { num_active: 0, pool_size: 0 })
            .await;

        assert_eq!(event_bus.subscriber_count(EventType::Status).await, 0);
    }
}
