//! Change feed for observing committed table writes.
//!
//! Every committed mutation of a [`crate::Table`] produces one event, after
//! it is durable in the journal. UI layers subscribe to re-read affected
//! records; the feed carries ids only, never payloads.
//!
//! ```rust
//! use roost_core::{ChangeKind, SyncStore};
//! # use roost_core::Entity;
//! # use serde::{Deserialize, Serialize};
//! # #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! # struct Note(String);
//! # impl Entity for Note { const ENTITY_TYPE: &'static str = "note"; }
//!
//! let store = SyncStore::in_memory();
//! let notes = store.table::<Note>().unwrap();
//! let events = notes.subscribe();
//!
//! let created = notes.create(Note("hello".into())).unwrap();
//! let event = events.try_recv().unwrap();
//! assert_eq!(event.record_id, *created.id());
//! assert_eq!(event.kind, ChangeKind::Inserted);
//! ```

use crate::types::RecordId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// What a committed write did to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// The record did not exist before.
    Inserted,
    /// The record was replaced.
    Updated,
    /// The record was dropped from the table.
    Removed,
    /// The record moved to a new id (server id adoption).
    Rekeyed {
        /// The id it was stored under before.
        previous: RecordId,
    },
}

/// A single committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Per-table sequence number, strictly increasing.
    pub sequence: u64,
    /// The affected record (its new id for re-keys).
    pub record_id: RecordId,
    /// What happened.
    pub kind: ChangeKind,
}

/// Distributes committed changes to subscribers.
///
/// Dead subscribers are dropped on the next emit. A bounded history allows
/// late observers to catch up with [`ChangeFeed::poll`].
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
    history: RwLock<Vec<ChangeEvent>>,
    max_history: usize,
    sequence: AtomicU64,
}

impl ChangeFeed {
    /// Creates a feed keeping the last `max_history` events.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
            sequence: AtomicU64::new(0),
        }
    }

    /// Returns a receiver for all future events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Publishes a change and returns its sequence number.
    pub(crate) fn emit(&self, record_id: RecordId, kind: ChangeKind) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = ChangeEvent {
            sequence,
            record_id,
            kind,
        };

        if self.max_history > 0 {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        sequence
    }

    /// Returns retained events with a sequence number above `cursor`, up to
    /// `limit` of them.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<ChangeEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Sequence number of the latest event, 0 if none.
    pub fn latest_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::with_max_history(1024)
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscriber_count())
            .field("latest_sequence", &self.latest_sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn emit_and_receive() {
        let feed = ChangeFeed::default();
        let rx = feed.subscribe();

        let seq = feed.emit(RecordId::new("a"), ChangeKind::Inserted);
        let received = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(received.sequence, seq);
        assert_eq!(received.record_id, RecordId::new("a"));
        assert_eq!(received.kind, ChangeKind::Inserted);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let feed = ChangeFeed::default();
        let rx = feed.subscribe();
        let _kept = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 2);

        drop(rx);
        feed.emit(RecordId::new("a"), ChangeKind::Removed);
        assert_eq!(feed.subscriber_count(), 1);
    }

    #[test]
    fn poll_respects_cursor_and_history_bound() {
        let feed = ChangeFeed::with_max_history(3);
        for i in 0..5 {
            feed.emit(RecordId::new(format!("r{i}")), ChangeKind::Updated);
        }
        let events = feed.poll(0, 10);
        assert_eq!(
            events.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
        assert_eq!(feed.poll(4, 10).len(), 1);
        assert_eq!(feed.latest_sequence(), 5);
    }

    #[test]
    fn concurrent_emitters_get_unique_sequences() {
        let feed = Arc::new(ChangeFeed::with_max_history(1000));
        let rx = feed.subscribe();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let feed = Arc::clone(&feed);
                thread::spawn(move || {
                    for i in 0..25 {
                        feed.emit(RecordId::new(format!("{t}-{i}")), ChangeKind::Inserted);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen: Vec<u64> = rx.try_iter().map(|e| e.sequence).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 100);
    }
}
