//! Correlation token generation.
//!
//! The default strategy concatenates an intra-millisecond counter with the
//! current Unix time in milliseconds (`<counter><timestamp>`). The counter
//! resets whenever the clock advances. If the clock stands still or steps
//! backwards the last timestamp is reused and the counter keeps climbing, so
//! two calls never see the same token.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// A token generator: any function producing a fresh id per call.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Built-in token strategies selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// `<counter><timestamp-ms>`.
    #[default]
    Timestamp,
    /// Random UUID v4.
    Uuid,
}

impl IdStrategy {
    /// Materialize the strategy as a generator.
    pub fn generator(self) -> IdGenerator {
        match self {
            Self::Timestamp => Arc::new(timestamp_token),
            Self::Uuid => Arc::new(uuid_token),
        }
    }
}

struct Clock {
    last_ms: u128,
    counter: u64,
}

static CLOCK: Mutex<Clock> = Mutex::new(Clock {
    last_ms: 0,
    counter: 0,
});

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Process-wide `<counter><timestamp>` token.
pub fn timestamp_token() -> String {
    let now = now_ms();
    let mut clock = CLOCK.lock().unwrap_or_else(|e| e.into_inner());
    if now > clock.last_ms {
        clock.last_ms = now;
        clock.counter = 0;
    } else {
        clock.counter += 1;
    }
    format!("{}{}", clock.counter, clock.last_ms)
}

/// Random UUID v4 token.
pub fn uuid_token() -> String {
    uuid::Uuid::new_v4().to_string()
}
