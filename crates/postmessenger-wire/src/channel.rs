//! Channel: outbound calls and the handshake that gates them.
//!
//! A [`Channel`] owns one logical connection to the remote side. Every
//! outbound call gets a fresh token, a waiter in the [`Correlator`], an
//! optional timeout, and is then posted through the host's send target. The
//! returned [`PendingCall`] settles exactly once: with the reply payload, or
//! with [`WireError::Timeout`].
//!
//! No ordinary message is posted before the handshake call succeeds. The
//! handshake outcome is a single shared future, so concurrent callers
//! coalesce onto one handshake envelope.
//!
//! A channel is built inside a tokio runtime and keeps a handle to it, so
//! its entry points and calls may be driven from any thread afterwards.

use crate::config::ChannelConfig;
use crate::correlator::Correlator;
use crate::dispatch::{CallHandler, Dispatcher};
use crate::error::{WireError, WireResult};
use crate::host::{Host, PostMessage};
use crate::message::{Envelope, HANDSHAKE_ACTION};
use crate::token::IdGenerator;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Connection state of a channel. Only moves forward, except that a timed-out
/// handshake returns to `Unconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No handshake in flight.
    Unconnected,
    /// Handshake sent, waiting for the acknowledgment.
    Connecting,
    /// Handshake acknowledged. Terminal.
    Connected,
}

/// Shared outcome of one handshake attempt.
pub type HandshakeFuture = Shared<BoxFuture<'static, WireResult<()>>>;

/// The eventual result of one outbound call.
///
/// Dropping it before it settles removes the call's waiter, so a later
/// reply is ignored.
#[derive(Debug)]
pub struct PendingCall {
    id: String,
    rx: oneshot::Receiver<WireResult<Value>>,
}

impl PendingCall {
    /// Correlation id of the call.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for PendingCall {
    type Output = WireResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(WireError::ChannelClosed)))
    }
}

struct HandshakeSlot {
    state: ConnectionState,
    /// Latest attempt; `None` until a handshake is first initiated.
    attempt: Option<HandshakeFuture>,
}

struct Inner {
    instance_id: String,
    runtime: Handle,
    config: ChannelConfig,
    host: Host,
    target: Arc<dyn PostMessage>,
    call_entry: String,
    reply_entry: String,
    next_id: IdGenerator,
    correlator: Arc<Correlator>,
    dispatcher: Arc<Dispatcher>,
    handshake: Mutex<HandshakeSlot>,
}

impl Inner {
    fn slot(&self) -> std::sync::MutexGuard<'_, HandshakeSlot> {
        self.handshake.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish_handshake(&self, outcome: &WireResult<()>) {
        let mut slot = self.slot();
        match outcome {
            Ok(()) => {
                slot.state = ConnectionState::Connected;
                info!(channel = %self.instance_id, "Handshake complete");
            }
            Err(e) => {
                slot.state = ConnectionState::Unconnected;
                warn!(channel = %self.instance_id, error = %e, "Handshake failed");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.host.unbind(&self.call_entry);
        self.host.unbind(&self.reply_entry);
    }
}

/// Builder for [`Channel`].
pub struct ChannelBuilder {
    host: Host,
    config: ChannelConfig,
    handler: Option<Arc<dyn CallHandler>>,
    id_generator: Option<IdGenerator>,
}

impl ChannelBuilder {
    /// Start building a channel bound to `host`.
    pub fn new(host: Host) -> Self {
        Self {
            host,
            config: ChannelConfig::default(),
            handler: None,
            id_generator: None,
        }
    }

    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// Handler answering calls from the remote side.
    pub fn handler(mut self, handler: Arc<dyn CallHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Override the configured token strategy.
    pub fn id_generator(mut self, generator: IdGenerator) -> Self {
        self.id_generator = Some(generator);
        self
    }

    /// Locate the send target, bind the entry points, and (unless disabled)
    /// start the handshake.
    ///
    /// Fails with [`WireError::NoRuntime`] when called outside a tokio runtime.
    pub fn build(self) -> WireResult<Channel> {
        let runtime = Handle::try_current().map_err(|_| WireError::NoRuntime)?;
        let target = self
            .host
            .locate_target(&self.config.target_name)
            .ok_or_else(|| WireError::TargetNotFound(self.config.target_name.clone()))?;

        let instance_id = uuid::Uuid::new_v4().to_string();
        let call_entry = format!("{}:{}", self.config.call_entry_point, instance_id);
        let reply_entry = format!("{}:{}", self.config.reply_entry_point, instance_id);
        let next_id = self
            .id_generator
            .unwrap_or_else(|| self.config.id_strategy.generator());

        let inner = Arc::new(Inner {
            dispatcher: Arc::new(Dispatcher::new(
                self.handler,
                Arc::clone(&target),
                runtime.clone(),
            )),
            instance_id,
            runtime,
            config: self.config,
            host: self.host,
            target,
            call_entry,
            reply_entry,
            next_id,
            correlator: Arc::new(Correlator::new()),
            handshake: Mutex::new(HandshakeSlot {
                state: ConnectionState::Unconnected,
                attempt: None,
            }),
        });

        let weak = Arc::downgrade(&inner);
        inner.host.bind_call_entry(
            inner.call_entry.clone(),
            Arc::new(move |id: String, action: String, data: Value| {
                if let Some(inner) = weak.upgrade() {
                    debug!(id = %id, action = %action, "Inbound call");
                    inner.dispatcher.dispatch(id, action, data);
                }
            }),
        );
        let weak = Arc::downgrade(&inner);
        inner.host.bind_reply_entry(
            inner.reply_entry.clone(),
            Arc::new(move |id: String, result: Value| {
                if let Some(inner) = weak.upgrade() {
                    if inner.correlator.fire(&id, result) {
                        debug!(id = %id, "Reply delivered");
                    } else {
                        warn!(id = %id, "Ignoring reply with no pending call");
                    }
                }
            }),
        );

        info!(
            channel = %inner.instance_id,
            target = %inner.config.target_name,
            "Channel created"
        );

        let channel = Channel { inner };
        if channel.inner.config.auto_handshake {
            channel.send_handshake()?;
        }
        Ok(channel)
    }
}

/// One logical connection to the remote side. Cheap to clone.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    /// Build a channel with default configuration.
    pub fn new(host: Host) -> WireResult<Self> {
        ChannelBuilder::new(host).build()
    }

    /// Start configuring a channel.
    pub fn builder(host: Host) -> ChannelBuilder {
        ChannelBuilder::new(host)
    }

    /// Unique id of this channel instance.
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// Qualified name of the entry point receiving inbound calls.
    pub fn call_entry(&self) -> &str {
        &self.inner.call_entry
    }

    /// Qualified name of the entry point receiving replies.
    pub fn reply_entry(&self) -> &str {
        &self.inner.reply_entry
    }

    /// Effective configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.slot().state
    }

    /// Whether the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.correlator.len()
    }

    /// Issue one call and return its pending result.
    ///
    /// `None` or a zero timeout waits indefinitely. The envelope is posted before
    /// this returns.
    pub fn call(
        &self,
        action: &str,
        data: Value,
        timeout: Option<Duration>,
    ) -> WireResult<PendingCall> {
        let (pending, envelope) = self.start_call(action, data, timeout)?;
        self.post(envelope);
        Ok(pending)
    }

    /// Begin the handshake, or join the one in flight.
    ///
    /// Fails with [`WireError::AlreadyConnected`] once the handshake has
    /// completed.
    pub fn send_handshake(&self) -> WireResult<HandshakeFuture> {
        let envelope;
        let attempt;
        {
            let mut slot = self.inner.slot();
            match slot.state {
                ConnectionState::Connected => return Err(WireError::AlreadyConnected),
                ConnectionState::Connecting => {
                    if let Some(attempt) = &slot.attempt {
                        return Ok(attempt.clone());
                    }
                }
                ConnectionState::Unconnected => {}
            }

            let data = Value::String(self.inner.call_entry.clone());
            let timeout = self.inner.config.handshake_timeout();
            let (pending, env) = self.start_call(HANDSHAKE_ACTION, data, timeout)?;
            attempt = self.drive_handshake(pending);
            slot.state = ConnectionState::Connecting;
            slot.attempt = Some(attempt.clone());
            envelope = env;
        }

        debug!(channel = %self.inner.instance_id, id = %envelope.id, "Sending handshake");
        self.post(envelope);
        Ok(attempt)
    }

    /// Send a message with the configured default timeout.
    pub fn send_message(
        &self,
        action: &str,
        data: Value,
    ) -> impl Future<Output = WireResult<Value>> + Send + 'static {
        let timeout = self.inner.config.message_timeout();
        self.send_message_with_timeout(action, data, timeout)
    }

    /// Send a message once the handshake has succeeded.
    ///
    /// If no handshake was ever initiated one is started immediately. A
    /// failed handshake fails the message with the handshake's error.
    pub fn send_message_with_timeout(
        &self,
        action: &str,
        data: Value,
        timeout: Option<Duration>,
    ) -> impl Future<Output = WireResult<Value>> + Send + 'static {
        let gate = self.handshake_gate();
        let channel = self.clone();
        let action = action.to_string();
        async move {
            if let Some(gate) = gate {
                gate.await?;
            }
            channel.call(&action, data, timeout)?.await
        }
    }

    /// Deliver a reply as if the remote side invoked the reply entry point.
    pub fn deliver_reply(&self, id: &str, result: Value) -> bool {
        self.inner.correlator.fire(id, result)
    }

    /// Deliver an inbound call as if the remote side invoked the call entry point.
    pub fn deliver_call(&self, id: impl Into<String>, action: impl Into<String>, data: Value) {
        self.inner
            .dispatcher
            .dispatch(id.into(), action.into(), data);
    }

    /// The handshake a new message must wait on, if any.
    fn handshake_gate(&self) -> Option<HandshakeFuture> {
        {
            let slot = self.inner.slot();
            if slot.state == ConnectionState::Connected {
                return None;
            }
            if let Some(attempt) = &slot.attempt {
                return Some(attempt.clone());
            }
        }
        match self.send_handshake() {
            Ok(attempt) => Some(attempt),
            Err(WireError::AlreadyConnected) => None,
            Err(e) => Some(futures::future::ready(Err(e)).boxed().shared()),
        }
    }

    fn start_call(
        &self,
        action: &str,
        data: Value,
        timeout: Option<Duration>,
    ) -> WireResult<(PendingCall, Envelope)> {
        let id = (self.inner.next_id)();
        let envelope = Envelope::request(id.clone(), action, data, self.inner.reply_entry.clone());

        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner.correlator.register(&id, reply_tx)?;

        let (tx, rx) = oneshot::channel();
        self.inner.runtime.spawn(settle(
            id.clone(),
            reply_rx,
            tx,
            Arc::clone(&self.inner.correlator),
            timeout,
        ));

        Ok((PendingCall { id, rx }, envelope))
    }

    fn drive_handshake(&self, pending: PendingCall) -> HandshakeFuture {
        let (tx, rx) = oneshot::channel();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timeout_ms = self.inner.config.handshake_timeout_ms;

        self.inner.runtime.spawn(async move {
            let outcome = match pending.await {
                Ok(_) => Ok(()),
                Err(WireError::Timeout { .. }) => Err(WireError::HandshakeTimeout { timeout_ms }),
                Err(e) => Err(e),
            };
            if let Some(inner) = weak.upgrade() {
                inner.finish_handshake(&outcome);
            }
            let _ = tx.send(outcome);
        });

        async move { rx.await.unwrap_or(Err(WireError::ChannelClosed)) }
            .boxed()
            .shared()
    }

    fn post(&self, envelope: Envelope) {
        debug!(id = %envelope.id, action = %envelope.action, "Posting envelope");
        self.inner.target.post_message(envelope);
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("instance_id", &self.inner.instance_id)
            .field("state", &self.state())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

/// What woke a call's settle task.
enum Wake {
    Reply(Result<Value, oneshot::error::RecvError>),
    Deadline,
    Abandoned,
}

/// Settle one call: reply, timeout, or the caller giving up.
async fn settle(
    id: String,
    mut reply_rx: oneshot::Receiver<Value>,
    mut tx: oneshot::Sender<WireResult<Value>>,
    correlator: Arc<Correlator>,
    timeout: Option<Duration>,
) {
    let deadline = async {
        match timeout {
            Some(d) if !d.is_zero() => tokio::time::sleep(d).await,
            _ => std::future::pending::<()>().await,
        }
    };

    let wake = tokio::select! {
        biased;
        reply = &mut reply_rx => Wake::Reply(reply),
        _ = deadline => Wake::Deadline,
        _ = tx.closed() => Wake::Abandoned,
    };

    let outcome = match wake {
        Wake::Reply(reply) => reply.map_err(|_| WireError::ChannelClosed),
        Wake::Deadline if correlator.unregister(&id) => {
            let timeout_ms = timeout.map(|d| d.as_millis() as u64).unwrap_or(0);
            warn!(id = %id, timeout_ms, "Call was not acknowledged in time");
            Err(WireError::Timeout { id, timeout_ms })
        }
        Wake::Deadline => {
            // The waiter was already claimed by a reply; its payload is in flight.
            debug!(id = %id, "Reply beat the deadline");
            reply_rx.await.map_err(|_| WireError::ChannelClosed)
        }
        Wake::Abandoned => {
            correlator.unregister(&id);
            debug!(id = %id, "Call dropped before reply");
            return;
        }
    };

    let _ = tx.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::RecordingTarget;
    use serde_json::json;

    fn setup(config: ChannelConfig) -> (Channel, Arc<RecordingTarget>) {
        let host = Host::new();
        let target = Arc::new(RecordingTarget::new());
        host.register_target(config.target_name.clone(), target.clone());
        let channel = Channel::builder(host).config(config).build().unwrap();
        (channel, target)
    }

    fn manual() -> ChannelConfig {
        ChannelConfig {
            auto_handshake: false,
            ..Default::default()
        }
    }

    async fn connect(channel: &Channel, target: &RecordingTarget) {
        let attempt = channel.send_handshake().unwrap();
        let hs = target.last().unwrap();
        assert!(hs.is_handshake());
        channel.deliver_reply(&hs.id, Value::Null);
        attempt.await.unwrap();
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let host = Host::new();
        host.register_target("wkPostMessenger", Arc::new(RecordingTarget::new()));
        let err = Channel::new(host).unwrap_err();
        assert_eq!(err, WireError::NoRuntime);
    }

    #[tokio::test]
    async fn test_call_entry_from_foreign_thread() {
        let (channel, target) = setup(manual());
        let host = channel.inner.host.clone();
        let entry = channel.call_entry().to_string();

        let result = std::thread::spawn(move || host.invoke_call(&entry, "1", "echo", json!(3)))
            .join()
            .unwrap();
        assert_eq!(result, Ok(()));

        target.wait_for(1).await;
        let reply = target.last().unwrap();
        assert!(reply.is_reply());
        assert_eq!(reply.id, "1");
    }

    #[tokio::test]
    async fn test_send_message_from_foreign_thread() {
        let (channel, target) = setup(manual());

        // The implicit handshake is posted and armed from the foreign thread.
        let sender = channel.clone();
        let message = std::thread::spawn(move || sender.send_message("echo", json!(1)))
            .join()
            .unwrap();
        assert_eq!(channel.state(), ConnectionState::Connecting);
        assert!(target.last().unwrap().is_handshake());

        let reply = tokio::spawn(message);
        channel.deliver_reply(&target.last().unwrap().id, Value::Null);
        target.wait_for(2).await;
        channel.deliver_reply(&target.last().unwrap().id, json!(1));
        assert_eq!(reply.await.unwrap(), Ok(json!(1)));
    }

    #[tokio::test]
    async fn test_missing_target_fails_construction() {
        let err = Channel::new(Host::new()).unwrap_err();
        assert_eq!(err, WireError::TargetNotFound("wkPostMessenger".to_string()));
    }

    #[tokio::test]
    async fn test_auto_handshake_on_build() {
        let (channel, target) = setup(ChannelConfig::default());
        assert_eq!(channel.state(), ConnectionState::Connecting);
        let sent = target.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].is_handshake());
        assert_eq!(sent[0].data, json!(channel.call_entry()));
        assert_eq!(sent[0].callback.as_deref(), Some(channel.reply_entry()));
    }

    #[tokio::test]
    async fn test_handshake_connects() {
        let (channel, target) = setup(manual());
        assert_eq!(channel.state(), ConnectionState::Unconnected);
        connect(&channel, &target).await;
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn test_concurrent_handshakes_coalesce() {
        let (channel, target) = setup(manual());
        let first = channel.send_handshake().unwrap();
        let second = channel.send_handshake().unwrap();
        assert_eq!(target.len(), 1);

        channel.deliver_reply(&target.sent()[0].id, Value::Null);
        assert_eq!(first.await, Ok(()));
        assert_eq!(second.await, Ok(()));
        assert_eq!(target.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_reaches_every_waiter() {
        let config = ChannelConfig {
            handshake_timeout_ms: 100,
            ..manual()
        };
        let (channel, target) = setup(config);

        let first = channel.send_handshake().unwrap();
        let second = channel.send_handshake().unwrap();
        let message = channel.send_message("echo", Value::Null);
        let (first, second, message) = tokio::join!(first, second, message);

        let expected = WireError::HandshakeTimeout { timeout_ms: 100 };
        assert_eq!(first, Err(expected.clone()));
        assert_eq!(second, Err(expected.clone()));
        assert_eq!(message, Err(expected));
        assert_eq!(target.len(), 1);
        assert!(target.last().unwrap().is_handshake());
    }

    #[tokio::test]
    async fn test_handshake_after_connect_is_misuse() {
        let (channel, target) = setup(manual());
        connect(&channel, &target).await;
        assert_eq!(
            channel.send_handshake().unwrap_err(),
            WireError::AlreadyConnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_reverts_and_retries() {
        let config = ChannelConfig {
            handshake_timeout_ms: 100,
            ..manual()
        };
        let (channel, target) = setup(config);

        let attempt = channel.send_handshake().unwrap();
        assert_eq!(
            attempt.await,
            Err(WireError::HandshakeTimeout { timeout_ms: 100 })
        );
        assert_eq!(channel.state(), ConnectionState::Unconnected);

        // A fresh attempt sends a new handshake envelope.
        let retry = channel.send_handshake().unwrap();
        assert_eq!(target.len(), 2);
        channel.deliver_reply(&target.last().unwrap().id, Value::Null);
        retry.await.unwrap();
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn test_call_resolves_with_reply() {
        let (channel, target) = setup(manual());
        let pending = channel
            .call("echo", json!({"x": 1}), Some(Duration::from_secs(1)))
            .unwrap();
        let env = target.last().unwrap();
        assert_eq!(env.id, pending.id());
        assert_eq!(env.action, "echo");

        assert!(channel.deliver_reply(pending.id(), json!({"x": 1})));
        assert_eq!(pending.await.unwrap(), json!({"x": 1}));
        assert_eq!(channel.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_call_pending_until_reply() {
        let (channel, _target) = setup(manual());
        let pending = channel.call("hold", Value::Null, None).unwrap();
        let id = pending.id().to_string();

        let mut task = tokio_test::task::spawn(pending);
        tokio_test::assert_pending!(task.poll());

        channel.deliver_reply(&id, json!("done"));
        for _ in 0..10 {
            if task.is_woken() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(task.is_woken());
        tokio_test::assert_ready_eq!(task.poll(), Ok(json!("done")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_then_late_reply_is_noop() {
        let (channel, _target) = setup(manual());
        let pending = channel
            .call("slow", Value::Null, Some(Duration::from_millis(250)))
            .unwrap();
        let id = pending.id().to_string();

        match pending.await {
            Err(WireError::Timeout { id: timed_out, timeout_ms }) => {
                assert_eq!(timed_out, id);
                assert_eq!(timeout_ms, 250);
            }
            other => panic!("Expected Timeout, got {other:?}"),
        }
        assert!(!channel.deliver_reply(&id, json!("late")));
        assert_eq!(channel.pending_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_defers_to_claimed_reply() {
        // Waiter already taken out of the correlator, reply not yet sent.
        let correlator = Arc::new(Correlator::new());
        let (reply_tx, reply_rx) = oneshot::channel();
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(settle(
            "7".to_string(),
            reply_rx,
            tx,
            correlator,
            Some(Duration::from_millis(10)),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        reply_tx.send(json!("won")).unwrap();
        assert_eq!(rx.await.unwrap(), Ok(json!("won")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_without_timeout_waits() {
        let (channel, _target) = setup(manual());
        let pending = channel.call("wait", Value::Null, None).unwrap();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(channel.pending_calls(), 1);

        channel.deliver_reply(pending.id(), json!(true));
        assert_eq!(pending.await.unwrap(), json!(true));
    }

    #[tokio::test]
    async fn test_out_of_order_replies() {
        let (channel, _target) = setup(manual());
        let calls: Vec<PendingCall> = (0..5)
            .map(|i| channel.call(&format!("op{i}"), json!(i), None).unwrap())
            .collect();
        let ids: Vec<String> = calls.iter().map(|c| c.id().to_string()).collect();

        for (i, id) in ids.iter().enumerate().rev() {
            channel.deliver_reply(id, json!(i * 10));
        }
        for (i, call) in calls.into_iter().enumerate() {
            assert_eq!(call.await.unwrap(), json!(i * 10));
        }
    }

    #[tokio::test]
    async fn test_dropped_call_unregisters() {
        let (channel, _target) = setup(manual());
        let pending = channel.call("gone", Value::Null, None).unwrap();
        let id = pending.id().to_string();
        drop(pending);

        for _ in 0..10 {
            if channel.pending_calls() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(channel.pending_calls(), 0);
        assert!(!channel.deliver_reply(&id, Value::Null));
    }

    #[tokio::test]
    async fn test_send_message_waits_for_handshake() {
        let (channel, target) = setup(manual());
        let message = tokio::spawn(channel.send_message("echo", json!({"x": 1})));

        // Only the implicit handshake has been posted.
        assert_eq!(target.len(), 1);
        let hs = target.last().unwrap();
        assert!(hs.is_handshake());

        channel.deliver_reply(&hs.id, Value::Null);
        target.wait_for(2).await;
        let sent = target.sent();
        assert!(sent[0].is_handshake());
        assert_eq!(sent[1].action, "echo");
        assert_eq!(sent[1].data, json!({"x": 1}));

        channel.deliver_reply(&sent[1].id, json!({"x": 1}));
        assert_eq!(message.await.unwrap().unwrap(), json!({"x": 1}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_fails_when_handshake_fails() {
        let config = ChannelConfig {
            handshake_timeout_ms: 50,
            ..manual()
        };
        let (channel, target) = setup(config);

        let result = channel.send_message("echo", Value::Null).await;
        assert_eq!(result, Err(WireError::HandshakeTimeout { timeout_ms: 50 }));
        // The message itself was never posted.
        assert_eq!(target.len(), 1);
    }

    #[tokio::test]
    async fn test_custom_id_generator() {
        let host = Host::new();
        let target = Arc::new(RecordingTarget::new());
        host.register_target("wkPostMessenger", target.clone());
        let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let channel = Channel::builder(host)
            .config(manual())
            .id_generator(Arc::new(move || {
                let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                format!("call-{n}")
            }))
            .build()
            .unwrap();

        let a = channel.call("a", Value::Null, None).unwrap();
        let b = channel.call("b", Value::Null, None).unwrap();
        assert_eq!(a.id(), "call-0");
        assert_eq!(b.id(), "call-1");
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let host = Host::new();
        host.register_target("wkPostMessenger", Arc::new(RecordingTarget::new()));
        let channel = Channel::builder(host)
            .config(manual())
            .id_generator(Arc::new(|| "same".to_string()))
            .build()
            .unwrap();

        let _first = channel.call("a", Value::Null, None).unwrap();
        assert_eq!(
            channel.call("b", Value::Null, None).unwrap_err(),
            WireError::DuplicateId("same".to_string())
        );
    }

    #[tokio::test]
    async fn test_two_channels_share_host() {
        let host = Host::new();
        host.register_target("wkPostMessenger", Arc::new(RecordingTarget::new()));
        let a = Channel::builder(host.clone()).config(manual()).build().unwrap();
        let b = Channel::builder(host.clone()).config(manual()).build().unwrap();
        assert_ne!(a.call_entry(), b.call_entry());
        assert_ne!(a.reply_entry(), b.reply_entry());
        assert!(host.has_entry(a.reply_entry()));

        let entry = a.reply_entry().to_string();
        drop(a);
        assert!(!host.has_entry(&entry));
        assert!(host.has_entry(b.reply_entry()));
    }
}
