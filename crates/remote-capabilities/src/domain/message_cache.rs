//! # Message Cache
//!
//! Per-key, per-sender store of timestamped payloads with quorum readiness
//! queries and expiry sweeps.
//!
//! The cache is a plain data structure; each owning component guards it with
//! its own lock. Keys consumed by `ready(.., delete_on_ready = true)` leave a
//! tombstone behind so that late submissions for the same key cannot form a
//! second quorum. Tombstones are collected by `delete_older_than` like any
//! other entry.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
struct Submission {
    timestamp_ms: i64,
    payload: Vec<u8>,
}

#[derive(Debug)]
struct Entry<S> {
    /// Timestamp of the first insert; never updated.
    created_at_ms: i64,
    by_sender: HashMap<S, Submission>,
    consumed: bool,
}

/// Quorum bookkeeping for keys of type `K` submitted by senders of type `S`.
#[derive(Debug)]
pub struct MessageCache<K, S> {
    entries: HashMap<K, Entry<S>>,
}

impl<K, S> Default for MessageCache<K, S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, S> MessageCache<K, S>
where
    K: Eq + Hash + Clone,
    S: Eq + Hash,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `sender`'s payload for `key`, replacing its previous one.
    ///
    /// Returns the key's creation timestamp.
    pub fn insert(&mut self, key: K, sender: S, now_ms: i64, payload: Vec<u8>) -> i64 {
        let entry = self.entries.entry(key).or_insert_with(|| Entry {
            created_at_ms: now_ms,
            by_sender: HashMap::new(),
            consumed: false,
        });
        if !entry.consumed {
            entry.by_sender.insert(
                sender,
                Submission {
                    timestamp_ms: now_ms,
                    payload,
                },
            );
        }
        entry.created_at_ms
    }

    /// Check whether at least `min_count` distinct senders submitted for
    /// `key` at or after `not_older_than_ms`.
    ///
    /// When ready, returns the payloads of those senders. With
    /// `delete_on_ready` the key is consumed in the same call, and later calls
    /// report not ready.
    pub fn ready(
        &mut self,
        key: &K,
        min_count: u32,
        not_older_than_ms: i64,
        delete_on_ready: bool,
    ) -> (bool, Vec<Vec<u8>>) {
        let Some(entry) = self.entries.get_mut(key) else {
            return (false, Vec::new());
        };
        if entry.consumed {
            return (false, Vec::new());
        }

        let fresh: Vec<&Submission> = entry
            .by_sender
            .values()
            .filter(|s| s.timestamp_ms >= not_older_than_ms)
            .collect();
        if (fresh.len() as u64) < u64::from(min_count) {
            return (false, Vec::new());
        }

        let payloads: Vec<Vec<u8>> = fresh.into_iter().map(|s| s.payload.clone()).collect();
        if delete_on_ready {
            entry.consumed = true;
            entry.by_sender.clear();
        }
        (true, payloads)
    }

    /// Mark `key` consumed without reading it, as a successful
    /// `ready(.., delete_on_ready = true)` would.
    pub fn consume(&mut self, key: &K) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.consumed = true;
            entry.by_sender.clear();
        }
    }

    pub fn delete(&mut self, key: &K) {
        self.entries.remove(key);
    }

    /// Drop every key first seen before `cutoff_ms`. Returns how many went.
    pub fn delete_older_than(&mut self, cutoff_ms: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.created_at_ms >= cutoff_ms);
        before - self.entries.len()
    }

    /// Drop every key whose newest submission predates `cutoff_ms`.
    /// Tombstones count as last active at their creation time.
    pub fn delete_inactive_since(&mut self, cutoff_ms: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| {
            let last_seen = e
                .by_sender
                .values()
                .map(|s| s.timestamp_ms)
                .max()
                .unwrap_or(e.created_at_ms);
            last_seen >= cutoff_ms
        });
        before - self.entries.len()
    }

    /// Number of keys tracked, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
