//! PostMessenger wire protocol: request/acknowledgment calls over a one-way
//! `postMessage` primitive.
//!
//! The host environment offers only a fire-and-forget send to the other
//! side plus entry points the other side can invoke. This crate layers a
//! correlation protocol on top: a verified handshake first, then every
//! outbound call matched to exactly one reply by an opaque token, with
//! timeout-based failure when no reply arrives.
//!
//! ## Architecture
//!
//! - **Channel**: one logical connection; outbound calls and the handshake gate
//! - **Correlator**: id → waiter registry completing pending calls
//! - **Dispatcher**: runs the user [`CallHandler`] and always replies once
//! - **Host**: named send targets and per-channel entry points
//! - **Envelope**: the JSON wire unit

pub mod channel;
pub mod config;
pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod loopback;
pub mod message;
pub mod token;

pub use channel::{Channel, ChannelBuilder, ConnectionState, HandshakeFuture, PendingCall};
pub use config::{load_config, ChannelConfig};
pub use correlator::Correlator;
pub use dispatch::{handler_fn, CallHandler, Dispatcher};
pub use error::{WireError, WireResult};
pub use host::{Host, PostMessage};
pub use loopback::{LoopbackRemote, RecordingTarget};
pub use message::{Envelope, HANDSHAKE_ACTION, PROTOCOL_TYPE, REPLY_ACTION};
pub use token::{IdGenerator, IdStrategy};
