//! Event broadcaster: the registry of live station connections and the task that fans
//! committed events out to them.
//!
//! - `emit` never blocks: it hands a batch to the dispatcher task and returns.
//! - Each connection owns a bounded queue. A full queue drops the connection instead
//!   of stalling delivery to everyone else.
//! - Events of one batch reach a given connection in emission order. Batches from
//!   concurrent commands may interleave differently per connection.
//! - Delivery is best-effort and at-least-once from the station's point of view:
//!   stations de-duplicate by event id after a reconnect snapshot.

use crate::config::BroadcastConfig;
use crate::domain::event::DomainEvent;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};

pub type ConnectionId = u64;

/// Lifecycle of a station connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

struct Connection {
    station: String,
    sender: mpsc::Sender<DomainEvent>,
    opened_at: DateTime<Utc>,
}

/// Receiving end of a connection. Yields events until the broadcaster drops the
/// connection (overflow, explicit disconnect) or the hub shuts down.
#[derive(Debug)]
pub struct Subscription {
    id: ConnectionId,
    receiver: mpsc::Receiver<DomainEvent>,
}

impl Subscription {
    pub fn new(id: ConnectionId, receiver: mpsc::Receiver<DomainEvent>) -> Self {
        Self { id, receiver }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Next event, or `None` once the connection is closed and drained.
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        self.receiver.recv().await
    }
}

#[derive(Default)]
struct Registry {
    connections: DashMap<ConnectionId, Connection>,
    next_id: AtomicU64,
}

impl Registry {
    fn fan_out(&self, batch: &[DomainEvent]) {
        let mut dropped = Vec::new();

        for entry in self.connections.iter() {
            for event in batch {
                match entry.sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(
                            connection = *entry.key(),
                            station = %entry.station,
                            event = event.id,
                            "Connection queue full, dropping connection"
                        );
                        dropped.push(*entry.key());
                        break;
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::debug!(
                            connection = *entry.key(),
                            station = %entry.station,
                            "Connection closed by station"
                        );
                        dropped.push(*entry.key());
                        break;
                    }
                }
            }
        }

        // Removal happens after iteration; DashMap shards are still read-locked above.
        for id in dropped {
            self.connections.remove(&id);
        }
    }
}

/// Handle to the broadcaster. Cheap to clone; the dispatcher task stops once every
/// handle is gone.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    outbox: mpsc::UnboundedSender<Vec<DomainEvent>>,
    queue_capacity: usize,
}

impl Broadcaster {
    /// Starts the dispatcher task on the current tokio runtime.
    pub fn spawn(config: &BroadcastConfig) -> Self {
        let registry = Arc::new(Registry::default());
        let (outbox, mut inbox) = mpsc::unbounded_channel::<Vec<DomainEvent>>();

        let dispatcher = Arc::clone(&registry);
        tokio::spawn(async move {
            while let Some(batch) = inbox.recv().await {
                dispatcher.fan_out(&batch);
            }
            tracing::debug!("Broadcaster dispatcher stopped");
        });

        Self {
            registry,
            outbox,
            queue_capacity: config.queue_capacity.max(1),
        }
    }

    /// Hands one command's events to the dispatcher. Never blocks.
    pub fn emit(&self, batch: Vec<DomainEvent>) {
        if batch.is_empty() {
            return;
        }
        if self.outbox.send(batch).is_err() {
            tracing::warn!("Broadcaster dispatcher is gone, events not delivered");
        }
    }

    /// Registers a station connection. The returned subscription is already OPEN.
    pub fn connect(&self, station: &str) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        self.registry.connections.insert(
            id,
            Connection {
                station: station.to_string(),
                sender,
                opened_at: Utc::now(),
            },
        );
        tracing::info!(
            connection = id,
            station,
            open = self.connection_count(),
            "Station connected"
        );
        Subscription::new(id, receiver)
    }

    /// Removes a connection from the registry. Returns false if it was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        match self.registry.connections.remove(&id) {
            Some((_, connection)) => {
                tracing::info!(
                    connection = id,
                    station = %connection.station,
                    open_for_secs = (Utc::now() - connection.opened_at).num_seconds(),
                    "Station disconnected"
                );
                true
            }
            None => false,
        }
    }

    /// Closes every connection, e.g. on shutdown. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.registry.connections.iter().map(|c| *c.key()).collect();
        ids.into_iter().filter(|id| self.disconnect(*id)).count()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action_log::ActionKind;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn event(id: u64) -> DomainEvent {
        DomainEvent {
            id,
            kind: ActionKind::DistributionCreated,
            student_id: Some("S1".to_string()),
            payload: json!({}),
            emitted_at: Utc::now(),
        }
    }

    async fn next(sub: &mut Subscription) -> Option<DomainEvent> {
        timeout(Duration::from_secs(1), sub.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_connection_in_order() {
        let broadcaster = Broadcaster::spawn(&BroadcastConfig::default());
        let mut a = broadcaster.connect("cash-1");
        let mut b = broadcaster.connect("checker-1");
        assert_eq!(broadcaster.connection_count(), 2);

        broadcaster.emit(vec![event(1), event(2)]);

        for sub in [&mut a, &mut b] {
            assert_eq!(next(sub).await.map(|e| e.id), Some(1));
            assert_eq!(next(sub).await.map(|e| e.id), Some(2));
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_only_the_slow_connection() {
        let broadcaster = Broadcaster::spawn(&BroadcastConfig { queue_capacity: 2 });
        let mut slow = broadcaster.connect("slow");
        let mut fast = broadcaster.connect("fast");

        broadcaster.emit(vec![event(1), event(2)]);
        assert_eq!(next(&mut fast).await.map(|e| e.id), Some(1));
        assert_eq!(next(&mut fast).await.map(|e| e.id), Some(2));

        // `slow` never reads, so the third event overflows its queue.
        broadcaster.emit(vec![event(3)]);
        assert_eq!(next(&mut fast).await.map(|e| e.id), Some(3));

        assert_eq!(broadcaster.connection_count(), 1);
        assert!(!broadcaster.disconnect(slow.id()), "slow connection already dropped");

        // The slow station drains what it had and then sees the close.
        assert_eq!(next(&mut slow).await.map(|e| e.id), Some(1));
        assert_eq!(next(&mut slow).await.map(|e| e.id), Some(2));
        assert!(next(&mut slow).await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let broadcaster = Broadcaster::spawn(&BroadcastConfig::default());
        let gone = broadcaster.connect("gone");
        let mut live = broadcaster.connect("live");
        drop(gone);

        broadcaster.emit(vec![event(1)]);
        assert_eq!(next(&mut live).await.map(|e| e.id), Some(1));
        assert_eq!(broadcaster.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_closes_stream() {
        let broadcaster = Broadcaster::spawn(&BroadcastConfig::default());
        let mut sub = broadcaster.connect("admin");
        assert!(broadcaster.disconnect(sub.id()));
        assert!(!broadcaster.disconnect(sub.id()));
        assert!(next(&mut sub).await.is_none());
    }

    #[tokio::test]
    async fn test_close_all() {
        let broadcaster = Broadcaster::spawn(&BroadcastConfig::default());
        let mut a = broadcaster.connect("a");
        let _b = broadcaster.connect("b");
        assert_eq!(broadcaster.close_all(), 2);
        assert_eq!(broadcaster.connection_count(), 0);
        assert!(next(&mut a).await.is_none());
    }
}
