//! Event correlator: matches reply ids to pending waiters.
//!
//! Each id owns at most one waiter. [`Correlator::fire`] and
//! [`Correlator::unregister`] both remove the entry atomically, so for a
//! given id only the first of them completes the waiter and the other is a
//! no-op. Late or duplicate replies land on an empty slot and are dropped.

use crate::error::{WireError, WireResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// Registry of pending waiters, keyed by correlation id.
#[derive(Debug, Default)]
pub struct Correlator {
    waiters: DashMap<String, oneshot::Sender<Value>>,
}

impl Correlator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self {
            waiters: DashMap::new(),
        }
    }

    /// Store the waiter for `id`. Fails if `id` is still pending.
    pub fn register(&self, id: &str, waiter: oneshot::Sender<Value>) -> WireResult<()> {
        match self.waiters.entry(id.to_string()) {
            Entry::Occupied(_) => Err(WireError::DuplicateId(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(waiter);
                Ok(())
            }
        }
    }

    /// Remove the waiter for `id` and hand it `result`.
    ///
    /// Returns `false` when nothing was waiting on `id`.
    pub fn fire(&self, id: &str, result: Value) -> bool {
        match self.waiters.remove(id) {
            Some((_, waiter)) => {
                // The receiving side may already be gone (caller dropped the call).
                let _ = waiter.send(result);
                true
            }
            None => {
                debug!(id, "No waiter for reply (late or duplicate)");
                false
            }
        }
    }

    /// Remove the waiter for `id` without completing it.
    pub fn unregister(&self, id: &str) -> bool {
        self.waiters.remove(id).is_some()
    }

    /// Whether a waiter is registered for `id`.
    pub fn is_pending(&self, id: &str) -> bool {
        self.waiters.contains_key(id)
    }

    /// Number of registered waiters.
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Whether no waiter is registered.
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
