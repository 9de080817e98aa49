//! In-process stand-ins for the remote side.
//!
//! - [`RecordingTarget`] records every envelope posted to it and never
//!   answers; tests deliver replies by hand.
//! - [`LoopbackRemote`] behaves like a cooperative remote: it acknowledges
//!   the handshake, answers calls through an optional [`CallHandler`], and
//!   can issue calls of its own into the local channel through the entry
//!   point announced in the handshake.
//!
//! Both deliver asynchronously, the way a real message pump would.

use crate::correlator::Correlator;
use crate::dispatch::CallHandler;
use crate::error::{WireError, WireResult};
use crate::host::{Host, PostMessage};
use crate::message::{Envelope, HANDSHAKE_ACTION};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

/// Send target that records posted envelopes.
#[derive(Debug, Default)]
pub struct RecordingTarget {
    sent: Mutex<Vec<Envelope>>,
    posted: Notify,
}

impl RecordingTarget {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything posted so far, in send order.
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The most recently posted envelope.
    pub fn last(&self) -> Option<Envelope> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    /// Number of envelopes posted.
    pub fn len(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing was posted yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` envelopes have been posted.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let posted = self.posted.notified();
            if self.len() >= count {
                return;
            }
            posted.await;
        }
    }
}

impl PostMessage for RecordingTarget {
    fn post_message(&self, envelope: Envelope) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(envelope);
        self.posted.notify_waiters();
    }
}

/// A cooperative remote side living in the same process.
pub struct LoopbackRemote {
    host: Host,
    handler: Option<Arc<dyn CallHandler>>,
    received: RecordingTarget,
    silent: AtomicBool,
    call_entry: Mutex<Option<String>>,
    pending: Correlator,
}

impl LoopbackRemote {
    /// Create a remote that delivers through `host`.
    pub fn new(host: Host) -> Self {
        Self {
            host,
            handler: None,
            received: RecordingTarget::new(),
            silent: AtomicBool::new(false),
            call_entry: Mutex::new(None),
            pending: Correlator::new(),
        }
    }

    /// Answer calls with `handler`. Without one, calls are answered with `null`.
    pub fn with_handler(mut self, handler: Arc<dyn CallHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Stop (or resume) answering requests, handshake included.
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Every envelope received from the local side, in arrival order.
    pub fn received(&self) -> Vec<Envelope> {
        self.received.sent()
    }

    /// Wait until at least `count` envelopes have arrived.
    pub async fn wait_for(&self, count: usize) {
        self.received.wait_for(count).await;
    }

    /// Entry point announced by the local side's handshake.
    pub fn call_entry(&self) -> Option<String> {
        self.call_entry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Call into the local channel and wait for its reply.
    pub async fn call(&self, action: &str, data: Value) -> WireResult<Value> {
        let entry = self
            .call_entry()
            .ok_or_else(|| WireError::UnknownEntryPoint("<no handshake received>".to_string()))?;

        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.register(&id, tx)?;
        if let Err(e) = self.host.invoke_call(&entry, &id, action, data) {
            self.pending.unregister(&id);
            return Err(e);
        }
        rx.await.map_err(|_| WireError::ChannelClosed)
    }

    fn answer(&self, envelope: Envelope) {
        let Envelope {
            id,
            action,
            data,
            callback,
            ..
        } = envelope;
        let Some(callback) = callback else {
            warn!(id = %id, "Request without callback, dropping");
            return;
        };

        let handshake = action == HANDSHAKE_ACTION;
        if handshake {
            if let Some(entry) = data.as_str() {
                *self.call_entry.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(entry.to_string());
            }
        }

        let host = self.host.clone();
        let handler = self.handler.clone().filter(|_| !handshake);
        tokio::spawn(async move {
            let result = match handler {
                Some(h) => h.handle_call(&action, data).await.unwrap_or(Value::Null),
                None => Value::Null,
            };
            if let Err(e) = host.invoke_reply(&callback, &id, result) {
                debug!(id = %id, error = %e, "Reply could not be delivered");
            }
        });
    }
}

impl PostMessage for LoopbackRemote {
    fn post_message(&self, envelope: Envelope) {
        self.received.post_message(envelope.clone());

        if envelope.is_reply() {
            self.pending.fire(&envelope.id, envelope.data);
            return;
        }
        if self.silent.load(Ordering::SeqCst) {
            debug!(id = %envelope.id, action = %envelope.action, "Remote is silent, dropping");
            return;
        }
        self.answer(envelope);
    }
}
