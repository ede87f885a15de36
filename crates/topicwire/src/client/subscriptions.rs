// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local subscription table with per-topic reference counting.
//!
//! Several local subscribers may share one topic; the wire sees a single
//! Subscribe when the first one arrives and a single Unsubscribe when the
//! last one leaves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Subscriber callback. Invoked on the client reader thread.
pub type SubscriberFn<M> = Arc<dyn Fn(&M) + Send + Sync + 'static>;

struct Entry<M> {
    id: u64,
    active: Arc<AtomicBool>,
    callback: SubscriberFn<M>,
}

/// Snapshot of one subscriber, taken for delivery.
pub(crate) struct Subscriber<M> {
    active: Arc<AtomicBool>,
    callback: SubscriberFn<M>,
}

impl<M> Subscriber<M> {
    /// False once the subscription was removed, even mid-delivery.
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn call(&self, message: &M) {
        (self.callback)(message)
    }
}

pub(crate) struct SubscriptionTable<M> {
    next_id: AtomicU64,
    topics: Mutex<HashMap<String, Vec<Entry<M>>>>,
}

impl<M> Default for SubscriptionTable<M> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            topics: Mutex::new(HashMap::new()),
        }
    }
}

impl<M> SubscriptionTable<M> {
    /// Register a subscriber. Returns its id and whether it is the first on
    /// `topic`.
    pub(crate) fn add(&self, topic: &str, callback: SubscriberFn<M>) -> (u64, bool) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut topics = self.topics.lock();
        let entries = topics.entry(topic.to_string()).or_default();
        let first = entries.is_empty();
        entries.push(Entry {
            id,
            active: Arc::new(AtomicBool::new(true)),
            callback,
        });
        (id, first)
    }

    /// Remove one subscriber. Returns `Some(true)` if it was the last on
    /// `topic`, `None` if it was already gone.
    pub(crate) fn remove(&self, topic: &str, id: u64) -> Option<bool> {
        let mut topics = self.topics.lock();
        let entries = topics.get_mut(topic)?;
        let index = entries.iter().position(|e| e.id == id)?;
        let entry = entries.remove(index);
        entry.active.store(false, Ordering::Release);

        let last = entries.is_empty();
        if last {
            topics.remove(topic);
        }
        Some(last)
    }

    pub(crate) fn subscribers(&self, topic: &str) -> Vec<Subscriber<M>> {
        self.topics
            .lock()
            .get(topic)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| Subscriber {
                        active: Arc::clone(&e.active),
                        callback: Arc::clone(&e.callback),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn contains(&self, topic: &str) -> bool {
        self.topics.lock().contains_key(topic)
    }

    /// Every topic with at least one subscriber, sorted.
    pub(crate) fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn noop() -> SubscriberFn<String> {
        Arc::new(|_: &String| {})
    }

    #[test]
    fn test_first_and_last_tracking() {
        let table = SubscriptionTable::<String>::default();
        let (a, first_a) = table.add("prices", noop());
        let (b, first_b) = table.add("prices", noop());
        assert!(first_a);
        assert!(!first_b);
        assert_eq!(table.subscriber_count("prices"), 2);

        assert_eq!(table.remove("prices", a), Some(false));
        assert!(table.contains("prices"));
        assert_eq!(table.remove("prices", b), Some(true));
        assert!(!table.contains("prices"));
        assert_eq!(table.remove("prices", b), None);
    }

    #[test]
    fn test_removed_subscriber_goes_inactive() {
        let table = SubscriptionTable::<String>::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let (id, _) = table.add(
            "t",
            Arc::new(move |_: &String| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let snapshot = table.subscribers("t");
        assert_eq!(snapshot.len(), 1);
        table.remove("t", id);
        assert!(!snapshot[0].is_active());
        assert!(table.subscribers("t").is_empty());

        snapshot[0].call(&"direct".to_string());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_topics_sorted() {
        let table = SubscriptionTable::<String>::default();
        table.add("b", noop());
        table.add("a", noop());
        table.add("b", noop());
        assert_eq!(table.topics(), vec!["a".to_string(), "b".to_string()]);
    }
}
