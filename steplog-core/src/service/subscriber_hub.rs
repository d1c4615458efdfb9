use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{LogEntry, SourceId};

/// Handle for one live subscription
pub type SubscriberId = String;

#[derive(Debug)]
struct Subscriber {
    id: SubscriberId,
    sender: mpsc::Sender<LogEntry>,
    /// Fired when the hub drops this subscriber on its own (source closed)
    removed: CancellationToken,
}

/// Outcome of a single broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    pub delivered: usize,
    pub dropped: usize,
}

/// In-memory fan-out of live log entries to per-source subscriber queues
///
/// Every subscriber owns a bounded queue. Sends never wait: a full queue
/// loses the entry for that subscriber only.
#[derive(Clone)]
pub struct SubscriberHub {
    /// Map of source_id -> list of subscribers
    sources: Arc<DashMap<SourceId, Vec<Subscriber>>>,
    capacity: usize,
}

impl SubscriberHub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            sources: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a bounded queue under `source_id`
    ///
    /// A watcher task removes and closes the queue once `cancel` fires.
    pub fn subscribe(
        &self,
        source_id: SourceId,
        cancel: CancellationToken,
    ) -> (SubscriberId, mpsc::Receiver<LogEntry>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = format!("sub_{}", nanoid::nanoid!(10));
        let removed = CancellationToken::new();

        self.sources
            .entry(source_id.clone())
            .or_default()
            .push(Subscriber {
                id: id.clone(),
                sender: tx,
                removed: removed.clone(),
            });

        info!(
            source_id = %source_id,
            subscriber_id = %id,
            subscribers = self.subscriber_count(&source_id),
            "Subscriber registered"
        );

        let hub = self.clone();
        let watched_id = id.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    hub.unsubscribe(&source_id, &watched_id);
                }
                () = removed.cancelled() => {}
            }
        });

        (id, rx)
    }

    /// Remove one subscriber and close its queue
    ///
    /// Returns `false` when the subscriber was already gone.
    pub fn unsubscribe(&self, source_id: &SourceId, subscriber_id: &str) -> bool {
        let mut found = false;
        let mut now_empty = false;

        if let Some(mut subscribers) = self.sources.get_mut(source_id) {
            if let Some(pos) = subscribers.iter().position(|s| s.id == subscriber_id) {
                let subscriber = subscribers.remove(pos);
                subscriber.removed.cancel();
                found = true;
            }
            now_empty = subscribers.is_empty();
        }

        // Re-check under the shard lock so a concurrent subscribe is not lost
        if now_empty
            && self
                .sources
                .remove_if(source_id, |_, subs| subs.is_empty())
                .is_some()
        {
            debug!(source_id = %source_id, "Source has no more subscribers, removed");
        }

        if found {
            info!(source_id = %source_id, subscriber_id = %subscriber_id, "Subscriber removed");
        } else {
            debug!(
                source_id = %source_id,
                subscriber_id = %subscriber_id,
                "Attempted to unsubscribe unknown subscriber"
            );
        }
        found
    }

    /// Drop every subscriber of a source; their queues close once drained
    pub fn close_source(&self, source_id: &SourceId) -> usize {
        let Some((_, subscribers)) = self.sources.remove(source_id) else {
            return 0;
        };

        for subscriber in &subscribers {
            subscriber.removed.cancel();
        }
        debug!(
            source_id = %source_id,
            subscribers = subscribers.len(),
            "Closed all subscriber queues for source"
        );
        subscribers.len()
    }

    /// Offer an entry to every subscriber of its source without waiting
    pub fn broadcast(&self, source_id: &SourceId, entry: &LogEntry) -> BroadcastResult {
        let mut result = BroadcastResult::default();
        let mut disconnected = Vec::new();

        if let Some(subscribers) = self.sources.get(source_id) {
            for subscriber in subscribers.iter() {
                match subscriber.sender.try_send(entry.clone()) {
                    Ok(()) => result.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        result.dropped += 1;
                        warn!(
                            source_id = %source_id,
                            subscriber_id = %subscriber.id,
                            line_number = entry.line_number,
                            "Subscriber queue full, skipping log entry"
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        disconnected.push(subscriber.id.clone());
                    }
                }
            }
        }

        for subscriber_id in disconnected {
            self.unsubscribe(source_id, &subscriber_id);
        }

        result
    }

    /// Number of subscribers of a source
    #[must_use]
    pub fn subscriber_count(&self, source_id: &SourceId) -> usize {
        self.sources.get(source_id).map_or(0, |subs| subs.len())
    }

    /// Number of sources with at least one subscriber
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        self.sources.iter().map(|entry| entry.value().len()).sum()
    }

    #[must_use]
    pub fn has_source(&self, source_id: &SourceId) -> bool {
        self.sources.contains_key(source_id)
    }
}
