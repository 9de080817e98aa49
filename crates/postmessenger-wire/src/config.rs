//! Channel configuration with defaults, loadable from TOML.
//!
//! Every field is optional in the file. Handlers and id-generator overrides
//! are not serializable and are set on [`crate::ChannelBuilder`] instead.

use crate::token::IdStrategy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Configuration for a [`crate::Channel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Name used to locate the send target on the host.
    pub target_name: String,
    /// Base name of the entry point receiving inbound calls.
    pub call_entry_point: String,
    /// Base name of the entry point receiving replies.
    pub reply_entry_point: String,
    /// Handshake timeout in milliseconds (0 = wait forever).
    pub handshake_timeout_ms: u64,
    /// Default per-message timeout in milliseconds (0 = wait forever).
    pub message_timeout_ms: u64,
    /// Send the handshake as soon as the channel is built.
    pub auto_handshake: bool,
    /// Built-in token strategy.
    pub id_strategy: IdStrategy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            target_name: "wkPostMessenger".to_string(),
            call_entry_point: "__wkPostMessengerCall".to_string(),
            reply_entry_point: "__wkPostMessengerReply".to_string(),
            handshake_timeout_ms: 3000,
            message_timeout_ms: 3000,
            auto_handshake: true,
            id_strategy: IdStrategy::Timestamp,
        }
    }
}

impl ChannelConfig {
    /// Handshake timeout, `None` when disabled.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        millis(self.handshake_timeout_ms)
    }

    /// Default message timeout, `None` when disabled.
    pub fn message_timeout(&self) -> Option<Duration> {
        millis(self.message_timeout_ms)
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Load channel configuration from a TOML file, falling back to defaults.
pub fn load_config(path: Option<&Path>) -> ChannelConfig {
    let Some(path) = path else {
        return ChannelConfig::default();
    };

    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return ChannelConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<ChannelConfig>(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to parse config, using defaults"
                );
                ChannelConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "Failed to read config file, using defaults"
            );
            ChannelConfig::default()
        }
    }
}
