//! Realtime push channel
//!
//! Best-effort duplex connection to the push endpoint, carrying
//! newline-delimited JSON envelopes tagged by `type`. Disconnects are
//! retried indefinitely after a fixed delay; this is a notification path,
//! never a correctness-critical one. Heartbeats go quiet while the
//! failover client reports offline so an outage does not generate a
//! stream of network-error noise.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::config::RealtimeConfig;
use crate::error::{ClientError, Result};

type Handler = Box<dyn Fn(&Value) + Send + Sync>;

pub struct RealtimeChannel {
    addr: String,
    reconnect_delay: Duration,
    heartbeat_interval: Duration,
    offline: Arc<AtomicBool>,
    handlers: HashMap<String, Handler>,
}

impl RealtimeChannel {
    pub fn new(config: &RealtimeConfig, offline: Arc<AtomicBool>) -> Self {
        Self {
            addr: config.addr.clone(),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            offline,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for one envelope type. A later registration for
    /// the same type replaces the earlier one.
    pub fn on<F>(&mut self, kind: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.handlers.insert(kind.to_string(), Box::new(handler));
    }

    /// Connect, dispatch, reconnect — forever. Runs as its own task.
    pub async fn run(self) {
        loop {
            match TcpStream::connect(&self.addr).await {
                Ok(stream) => {
                    tracing::info!(addr = %self.addr, "realtime channel connected");
                    if let Err(e) = self.serve(stream).await {
                        tracing::debug!(error = %e, "realtime connection lost");
                    }
                }
                Err(e) => {
                    tracing::debug!(addr = %self.addr, error = %e, "realtime connect failed");
                }
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn serve(&self, stream: TcpStream) -> Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.dispatch(&line),
                    Ok(None) => return Err(ClientError::Transport("connection closed by peer".into())),
                    Err(e) => return Err(ClientError::Transport(e.to_string())),
                },
                _ = heartbeat.tick() => {
                    if self.offline.load(Ordering::Relaxed) {
                        continue;
                    }
                    let ping = serde_json::json!({
                        "type": "ping",
                        "timestamp": chrono::Utc::now().timestamp_millis(),
                    });
                    let mut frame = ping.to_string();
                    frame.push('\n');
                    write_half
                        .write_all(frame.as_bytes())
                        .await
                        .map_err(|e| ClientError::Transport(e.to_string()))?;
                }
            }
        }
    }

    fn dispatch(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let envelope: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "discarding malformed realtime frame");
                return;
            }
        };
        let Some(kind) = envelope.get("type").and_then(|t| t.as_str()) else {
            tracing::debug!("discarding realtime frame without a type tag");
            return;
        };
        match self.handlers.get(kind) {
            Some(handler) => handler(&envelope),
            None if kind == "pong" => tracing::trace!("heartbeat acknowledged"),
            None => tracing::debug!(kind = %kind, "ignoring unknown realtime message type"),
        }
    }
}
