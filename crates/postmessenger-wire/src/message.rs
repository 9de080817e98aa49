//! Wire envelope types.
//!
//! Every unit crossing the one-way transport is an [`Envelope`] encoded as a
//! JSON object. Requests carry the name of the entry point the remote side
//! must invoke to deliver the reply; replies echo the request id and carry
//! the reserved [`REPLY_ACTION`].

use crate::error::{WireError, WireResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol/version tag carried by every envelope.
pub const PROTOCOL_TYPE: &str = "application/x-wkpostmessenger-v1+json";

/// Reserved action of the handshake call.
pub const HANDSHAKE_ACTION: &str = "__WK_HANDSHAKE__";

/// Reserved action tagging reply envelopes.
pub const REPLY_ACTION: &str = "__WK_REPLY__";

/// A wire protocol envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol tag, always [`PROTOCOL_TYPE`] for envelopes we produce.
    #[serde(rename = "type")]
    pub protocol: String,
    /// Correlation token.
    pub id: String,
    /// Caller-chosen action, [`HANDSHAKE_ACTION`], or [`REPLY_ACTION`].
    pub action: String,
    /// Opaque payload. `null` when empty.
    #[serde(default)]
    pub data: Value,
    /// Entry point the remote side invokes to deliver the reply.
    /// Present on requests only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(
        id: impl Into<String>,
        action: impl Into<String>,
        data: Value,
        callback: impl Into<String>,
    ) -> Self {
        Self {
            protocol: PROTOCOL_TYPE.to_string(),
            id: id.into(),
            action: action.into(),
            data,
            callback: Some(callback.into()),
        }
    }

    /// Build a reply envelope echoing `id`.
    pub fn reply(id: impl Into<String>, data: Value) -> Self {
        Self {
            protocol: PROTOCOL_TYPE.to_string(),
            id: id.into(),
            action: REPLY_ACTION.to_string(),
            data,
            callback: None,
        }
    }

    /// Whether this envelope answers an earlier request.
    pub fn is_reply(&self) -> bool {
        self.action == REPLY_ACTION
    }

    /// Whether this envelope is the reserved handshake call.
    pub fn is_handshake(&self) -> bool {
        self.action == HANDSHAKE_ACTION
    }
}

/// Encode an envelope to its JSON text form.
pub fn encode_envelope(envelope: &Envelope) -> WireResult<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parse JSON text into an envelope, rejecting foreign protocol tags.
pub fn decode_envelope(text: &str) -> WireResult<Envelope> {
    let envelope: Envelope = serde_json::from_str(text)?;
    if envelope.protocol != PROTOCOL_TYPE {
        return Err(WireError::ProtocolMismatch {
            expected: PROTOCOL_TYPE.to_string(),
            actual: envelope.protocol,
        });
    }
    Ok(envelope)
}
