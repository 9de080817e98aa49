//! Error types for the messenger protocol.

use thiserror::Error;

/// Errors from the messenger protocol layer.
///
/// `Clone` so that a single handshake outcome can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WireError {
    /// The named send target is not registered with the host.
    #[error("Transport target not found: {0}")]
    TargetNotFound(String),

    /// The channel was built outside a tokio runtime.
    #[error("No tokio runtime available to drive the channel")]
    NoRuntime,

    /// `send_handshake` was called after the channel connected.
    #[error("Handshake already completed")]
    AlreadyConnected,

    /// No acknowledgment for the handshake arrived in time.
    #[error("Handshake timed out after {timeout_ms} ms")]
    HandshakeTimeout { timeout_ms: u64 },

    /// No reply for a call arrived in time.
    #[error("Call {id} was not acknowledged within {timeout_ms} ms")]
    Timeout { id: String, timeout_ms: u64 },

    /// A waiter is already registered for this id.
    #[error("Duplicate pending call id: {0}")]
    DuplicateId(String),

    /// No entry point is bound under this name.
    #[error("Unknown entry point: {0}")]
    UnknownEntryPoint(String),

    /// An envelope carried a foreign protocol tag.
    #[error("Protocol mismatch: expected {expected}, got {actual}")]
    ProtocolMismatch { expected: String, actual: String },

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(String),

    /// The channel went away before the call settled.
    #[error("Channel closed")]
    ChannelClosed,
}

impl WireError {
    /// Whether this error is one of the acknowledgment timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::HandshakeTimeout { .. })
    }

    /// Whether retrying the failed operation can succeed.
    ///
    /// Only a timed-out handshake qualifies: a fresh `send_handshake` may
    /// connect. A call timeout is final for that call, and construction and
    /// protocol-misuse errors are fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::HandshakeTimeout { .. })
    }
}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

/// Alias for protocol results.
pub type WireResult<T> = Result<T, WireError>;
