#![forbid(unsafe_code)]

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// One correlated reply. Created by a consumer worker, read at most once by
/// the matching waiter, never mutated.
#[derive(Clone, Debug)]
pub struct ReplyEntry {
    pub key: String,
    pub payload: JsonValue,
    pub received_at: Instant,
}

impl ReplyEntry {
    pub fn new(key: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            key: key.into(),
            payload,
            received_at: Instant::now(),
        }
    }
}

/// Correlation-keyed reply store with write-once inserts and age-based
/// eviction. Consumer workers insert; the router reads, and registers a
/// one-shot wait handle per correlation key so it wakes as soon as the
/// matching reply lands instead of polling.
#[derive(Default)]
pub struct ReplyCache {
    entries: Mutex<HashMap<String, ReplyEntry>>,
    waiters: Mutex<HashMap<String, Arc<Notify>>>,
}

impl ReplyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a reply. First write wins: a key that is already present keeps
    /// its original entry and the later arrival is dropped with a warning.
    /// Fires the registered wait handle, if any.
    pub fn put(&self, entry: ReplyEntry) -> bool {
        let key = entry.key.clone();
        let inserted = {
            let mut entries = self.entries.lock().expect("reply cache lock");
            if entries.contains_key(&key) {
                false
            } else {
                entries.insert(key.clone(), entry);
                true
            }
        };

        if !inserted {
            warn!(key = %key, "duplicate reply for correlation key, dropping");
            return false;
        }

        let waiter = {
            let waiters = self.waiters.lock().expect("reply waiter lock");
            waiters.get(&key).cloned()
        };
        if let Some(notify) = waiter {
            notify.notify_one();
        }

        true
    }

    /// Non-blocking lookup.
    pub fn get(&self, key: &str) -> Option<ReplyEntry> {
        self.entries
            .lock()
            .expect("reply cache lock")
            .get(key)
            .cloned()
    }

    /// Register a wait handle for a correlation key. Must happen before the
    /// request is published so a fast reply cannot slip past the waiter; the
    /// `Notify` permit covers an insert racing the first `notified().await`.
    pub fn register_waiter(&self, key: &str) -> Arc<Notify> {
        let mut waiters = self.waiters.lock().expect("reply waiter lock");
        Arc::clone(
            waiters
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    /// Drop the wait handle once the waiter is done, replied or timed out.
    pub fn release_waiter(&self, key: &str) {
        self.waiters.lock().expect("reply waiter lock").remove(key);
    }

    /// Snapshot-then-delete removal of entries older than `max_age`. Run on
    /// every router wait cycle; a late reply for an already-timed-out waiter
    /// ages out here harmlessly.
    pub fn expire_older_than(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = {
            let entries = self.entries.lock().expect("reply cache lock");
            entries
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.received_at) > max_age)
                .map(|(key, _)| key.clone())
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        debug!(count = expired.len(), "expiring correlated replies");
        let mut entries = self.entries.lock().expect("reply cache lock");
        let mut removed = 0;
        for key in expired {
            if entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("reply cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
