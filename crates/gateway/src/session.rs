// Device Session Handler
//
// Owns one inbound device connection:
// Connecting -> Identifying -> Active -> Closed
//
// The read loop only does local dispatch (table lookups and cache writes),
// so responses for other in-flight RPCs keep flowing while HTTP callers wait.

use crate::error::GatewayError;
use crate::extract::extract_metrics;
use crate::protocol::{self, DeviceFrame};
use crate::registry::DeviceSession;
use crate::state::GatewayState;
use anyhow::{Context, Result};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde_json::Value as JsonValue;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Outbound frames buffered per connection before senders wait
const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Identifying,
    Active,
    Closed,
}

/// Server-initiated keepalive policy
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Heartbeat {
    pub fn from_config(config: &voltgate_core::GatewayConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
        }
    }
}

/// Deterministic id for devices that never name themselves
pub fn synthesize_device_id(prefix: &str, peer: SocketAddr) -> String {
    format!("{}_{}", prefix, peer.ip().to_string().replace(['.', ':'], "_"))
}

pub struct SessionHandler {
    state: GatewayState,
    peer: SocketAddr,
    conn_id: String,
    outbound: mpsc::Sender<Message>,
    phase: SessionPhase,
    device_id: Option<String>,
}

impl SessionHandler {
    pub fn new(state: GatewayState, peer: SocketAddr, outbound: mpsc::Sender<Message>) -> Self {
        Self {
            state,
            peer,
            conn_id: Uuid::new_v4().to_string(),
            outbound,
            phase: SessionPhase::Connecting,
            device_id: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Transport handshake finished; wait for the first parseable frame
    pub fn handshake_complete(&mut self) {
        if self.phase == SessionPhase::Connecting {
            self.phase = SessionPhase::Identifying;
        }
    }

    /// Process one text frame. Never fails: bad frames are logged and
    /// skipped so the connection stays open.
    pub async fn handle_text(&mut self, text: &str) {
        if self.phase == SessionPhase::Closed {
            return;
        }

        let frame = match protocol::parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(peer = %self.peer, "Failed to parse frame: {}", e);
                return;
            }
        };

        if self.phase != SessionPhase::Active {
            if !frame.is_object() {
                tracing::debug!(peer = %self.peer, "Non-object frame before identification");
                return;
            }
            self.identify(&frame).await;
        }
        let Some(device_id) = self.device_id.clone() else {
            return;
        };

        match protocol::classify(frame, self.state.config.switch_id) {
            DeviceFrame::RpcResponse { id, frame } => {
                if !self.state.rpc.resolve(&id, frame) {
                    let err = GatewayError::UnknownCorrelation(id);
                    tracing::warn!(device_id = %device_id, "Dropping response: {}", err);
                }
            }
            DeviceFrame::PushNotification { method, telemetry } => {
                let metrics = extract_metrics(&telemetry);
                if metrics.is_empty() {
                    tracing::debug!(device_id = %device_id, method = %method, "Notification without metrics");
                } else {
                    tracing::debug!(
                        device_id = %device_id,
                        method = %method,
                        metrics = metrics.len(),
                        "Push notification"
                    );
                    self.state.cache.update(&device_id, metrics).await;
                }
            }
            DeviceFrame::Unclassified => {
                tracing::debug!(device_id = %device_id, "Ignoring unclassified frame");
            }
        }
    }

    /// Derive the device id from the first frame and register the session
    async fn identify(&mut self, frame: &JsonValue) {
        let device_id = match protocol::frame_source(frame) {
            Some(src) => src.to_string(),
            None => synthesize_device_id(&self.state.config.device_id_prefix, self.peer),
        };

        let session = DeviceSession::new(
            device_id.as_str(),
            self.conn_id.as_str(),
            self.peer,
            self.outbound.clone(),
        );
        self.state.registry.register(&device_id, session).await;

        tracing::info!(peer = %self.peer, device_id = %device_id, "Device identified");
        self.device_id = Some(device_id);
        self.phase = SessionPhase::Active;
    }

    /// Terminal transition. Evicts registry and cache entries unless a newer
    /// connection has already taken the device id over.
    pub async fn close(&mut self, reason: &str) {
        if self.phase == SessionPhase::Closed {
            return;
        }
        self.phase = SessionPhase::Closed;

        if let Some(device_id) = &self.device_id {
            if self
                .state
                .registry
                .unregister_session(device_id, &self.conn_id)
                .await
            {
                self.state.cache.remove(device_id).await;
            }
        }

        tracing::info!(
            peer = %self.peer,
            device_id = self.device_id.as_deref().unwrap_or("-"),
            reason = %reason,
            "Session closed"
        );
    }
}

/// Queue a ping without waiting on the read loop. Returns `false` once the
/// writer is gone. A full queue means the device stopped reading, so the ping
/// counts as sent and the pong deadline closes the session.
fn queue_ping(outbound: &mpsc::Sender<Message>, peer: SocketAddr) -> bool {
    match outbound.try_send(Message::Ping(Vec::new().into())) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(peer = %peer, "Outbound queue full, ping not sent");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Run one device connection to completion
pub async fn handle_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    state: GatewayState,
) -> Result<()> {
    let heartbeat = Heartbeat::from_config(&state.config);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
    let mut handler = SessionHandler::new(state, peer, outbound_tx.clone());

    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;

    tracing::info!("WebSocket connection established from {}", peer);
    handler.handshake_complete();

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Single writer: RPC requests and pings funnel through the channel
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                tracing::debug!("Writer for {} stopped: {}", peer, e);
                break;
            }
        }
    });

    let mut ping_timer = tokio::time::interval_at(
        Instant::now() + heartbeat.ping_interval,
        heartbeat.ping_interval,
    );
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pong_deadline: Option<Instant> = None;

    let reason = loop {
        tokio::select! {
            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text.as_str());
                        handler.handle_text(text.as_str()).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        pong_deadline = None;
                    }
                    Some(Ok(Message::Close(_))) => break "closed by peer",
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!("Ignoring binary frame from {}", peer);
                    }
                    // Pings are answered by tungstenite itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error from {}: {}", peer, e);
                        break "protocol error";
                    }
                    None => break "connection closed",
                }
            }

            _ = ping_timer.tick() => {
                if pong_deadline.is_none() {
                    if !queue_ping(&outbound_tx, peer) {
                        break "writer closed";
                    }
                    pong_deadline = Some(Instant::now() + heartbeat.pong_timeout);
                }
            }

            _ = wait_for(pong_deadline) => {
                tracing::warn!(peer = %peer, "No pong within {:?}", heartbeat.pong_timeout);
                break "heartbeat timeout";
            }
        }
    };

    handler.close(reason).await;
    drop(outbound_tx);
    writer.abort();
    Ok(())
}
