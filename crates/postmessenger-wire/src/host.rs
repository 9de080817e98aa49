//! Host bridge: the transport binding between a Channel and the remote side.
//!
//! The [`Host`] stands in for the environment both sides live in. It holds
//! the named send targets a Channel posts envelopes to, and the entry points
//! the remote side invokes to deliver inbound calls and replies. Entry points
//! are bound per Channel instance under qualified names, so any number of
//! Channels can share one host without colliding.

use crate::error::{WireError, WireResult};
use crate::message::Envelope;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// One-way send primitive exposed by the remote side.
///
/// No return value and no delivery signal: a lost envelope is only ever
/// observed as a timeout.
pub trait PostMessage: Send + Sync + 'static {
    /// Hand an envelope to the other side.
    fn post_message(&self, envelope: Envelope);
}

/// Entry point for inbound calls: `(id, action, data)`.
pub type CallEntry = Arc<dyn Fn(String, String, Value) + Send + Sync>;

/// Entry point for inbound replies: `(id, result)`.
pub type ReplyEntry = Arc<dyn Fn(String, Value) + Send + Sync>;

#[derive(Clone)]
enum EntryPoint {
    Call(CallEntry),
    Reply(ReplyEntry),
}

/// Shared table of send targets and entry points.
#[derive(Clone, Default)]
pub struct Host {
    targets: Arc<DashMap<String, Arc<dyn PostMessage>>>,
    entries: Arc<DashMap<String, EntryPoint>>,
}

impl Host {
    /// Create an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a named send target.
    pub fn register_target(&self, name: impl Into<String>, target: Arc<dyn PostMessage>) {
        self.targets.insert(name.into(), target);
    }

    /// Look up a send target by name.
    pub fn locate_target(&self, name: &str) -> Option<Arc<dyn PostMessage>> {
        self.targets.get(name).map(|t| Arc::clone(t.value()))
    }

    /// Bind the entry point for inbound calls.
    pub fn bind_call_entry(&self, name: impl Into<String>, entry: CallEntry) {
        self.entries.insert(name.into(), EntryPoint::Call(entry));
    }

    /// Bind the entry point for inbound replies.
    pub fn bind_reply_entry(&self, name: impl Into<String>, entry: ReplyEntry) {
        self.entries.insert(name.into(), EntryPoint::Reply(entry));
    }

    /// Remove an entry point.
    pub fn unbind(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Whether an entry point is bound under `name`.
    pub fn has_entry(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Deliver an inbound call through the named entry point.
    pub fn invoke_call(&self, name: &str, id: &str, action: &str, data: Value) -> WireResult<()> {
        // Clone out of the map before invoking so the entry may rebind freely.
        let entry = self.entries.get(name).map(|e| e.value().clone());
        match entry {
            Some(EntryPoint::Call(f)) => {
                f(id.to_string(), action.to_string(), data);
                Ok(())
            }
            _ => {
                warn!(entry = name, id, "No call entry point bound");
                Err(WireError::UnknownEntryPoint(name.to_string()))
            }
        }
    }

    /// Deliver a reply through the named entry point.
    pub fn invoke_reply(&self, name: &str, id: &str, result: Value) -> WireResult<()> {
        let entry = self.entries.get(name).map(|e| e.value().clone());
        match entry {
            Some(EntryPoint::Reply(f)) => {
                f(id.to_string(), result);
                Ok(())
            }
            _ => {
                warn!(entry = name, id, "No reply entry point bound");
                Err(WireError::UnknownEntryPoint(name.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("targets", &self.targets.len())
            .field("entries", &self.entries.len())
            .finish()
    }
}
