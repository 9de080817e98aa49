//! `postmessenger demo`: drive a channel against the loopback remote.

use postmessenger_wire::{handler_fn, Channel, ChannelConfig, Host, LoopbackRemote};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Options for one demo run.
pub struct DemoOptions {
    pub calls: usize,
    pub timeout_ms: Option<u64>,
    pub silent: bool,
}

/// Handshake, fan out `calls` echo messages, then let the remote call back in.
pub async fn run(config: ChannelConfig, opts: DemoOptions) -> anyhow::Result<()> {
    let host = Host::new();
    let remote = Arc::new(
        LoopbackRemote::new(host.clone())
            .with_handler(handler_fn(|action, data| Ok(json!({ "action": action, "echo": data })))),
    );
    remote.set_silent(opts.silent);
    host.register_target(config.target_name.clone(), remote.clone());

    let channel = Channel::builder(host)
        .config(config)
        .handler(handler_fn(|action, _| match action {
            "ping" => Ok(json!("pong")),
            other => Err(format!("unsupported action: {other}")),
        }))
        .build()?;

    let timeout = match opts.timeout_ms {
        Some(0) => None,
        Some(ms) => Some(Duration::from_millis(ms)),
        None => channel.config().message_timeout(),
    };

    info!(calls = opts.calls, "Sending echo calls");
    let calls = (0..opts.calls)
        .map(|seq| channel.send_message_with_timeout("echo", json!({ "seq": seq }), timeout));
    let results = futures::future::join_all(calls).await;

    for (seq, result) in results.iter().enumerate() {
        match result {
            Ok(value) => println!("call {seq}: {value}"),
            Err(e) => println!("call {seq}: error: {e}"),
        }
    }

    if channel.is_connected() {
        let pong = remote.call("ping", Value::Null).await?;
        println!("remote ping -> {pong}");
    }

    println!(
        "state: {:?}, pending calls: {}, envelopes seen by remote: {}",
        channel.state(),
        channel.pending_calls(),
        remote.received().len()
    );
    Ok(())
}
