// RPC Correlation Engine
//
// Matches device responses to outstanding requests by request id. Each call
// gets a fresh UUID and its own oneshot waiter. The pending table is touched
// only under short critical sections; sending and waiting happen outside.

use crate::error::GatewayError;
use crate::protocol::RpcRequest;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Anything that can carry a serialized request to a device
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, text: String) -> Result<(), GatewayError>;
}

type Waiter = oneshot::Sender<JsonValue>;

pub struct RpcEngine {
    pending: Mutex<HashMap<String, Waiter>>,
}

/// Removes the pending entry when the call finishes, times out, or is dropped
struct PendingGuard<'a> {
    engine: &'a RpcEngine,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.engine.table().remove(&self.id);
    }
}

impl RpcEngine {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Waiter>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send `{id, method, params}` over `sink` and wait for the matching
    /// response payload, or fail with `RpcTimeout` after `timeout`. The
    /// deadline covers the send as well as the wait.
    pub async fn send_request(
        &self,
        sink: &dyn FrameSink,
        method: &str,
        params: JsonValue,
        timeout: Duration,
    ) -> Result<JsonValue, GatewayError> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        self.table().insert(id.clone(), tx);
        let _guard = PendingGuard {
            engine: self,
            id: id.clone(),
        };

        let request = RpcRequest::new(id.clone(), method, params);
        let text = serde_json::to_string(&request)
            .map_err(|e| GatewayError::internal(format!("Failed to encode request: {}", e)))?;

        let exchange = async {
            // Waits for queue space when the device has stopped reading
            sink.send_frame(text).await?;
            tracing::debug!(request_id = %id, method = %method, "Sent RPC request");

            // Sender dropped without a value; only happens if the entry was
            // cleared from elsewhere
            rx.await.map_err(|_| GatewayError::connection_lost())
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(payload)) => {
                tracing::debug!(request_id = %id, "Received RPC response");
                Ok(payload)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::error!(request_id = %id, method = %method, "RPC request timeout");
                Err(GatewayError::RpcTimeout)
            }
        }
    }

    /// Deliver `payload` to the waiter for `id`. Returns `false` when the id
    /// is unknown, already resolved, or timed out.
    pub fn resolve(&self, id: &str, payload: JsonValue) -> bool {
        let Some(waiter) = self.table().remove(id) else {
            return false;
        };

        match waiter.send(payload) {
            Ok(()) => {
                tracing::debug!(request_id = %id, "Dispatched RPC response");
                true
            }
            // Waiter gave up between the timeout firing and its entry removal
            Err(_) => false,
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.table().contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.table().len()
    }
}

impl Default for RpcEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceSession;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Captures outbound frames instead of writing to a socket
    struct ChannelSink(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl FrameSink for ChannelSink {
        async fn send_frame(&self, text: String) -> Result<(), GatewayError> {
            self.0
                .send(text)
                .map_err(|_| GatewayError::connection_lost())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl FrameSink for FailingSink {
        async fn send_frame(&self, _text: String) -> Result<(), GatewayError> {
            Err(GatewayError::Transport("socket closed".to_string()))
        }
    }

    fn sink() -> (Arc<ChannelSink>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelSink(tx)), rx)
    }

    async fn next_request(rx: &mut mpsc::UnboundedReceiver<String>) -> RpcRequest {
        let text = rx.recv().await.expect("request frame");
        serde_json::from_str(&text).expect("valid request")
    }

    #[tokio::test]
    async fn test_round_trip() {
        let engine = Arc::new(RpcEngine::new());
        let (sink, mut rx) = sink();

        let call = {
            let engine = engine.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                engine
                    .send_request(sink.as_ref(), "Switch.GetStatus", json!({"id": 0}), Duration::from_secs(5))
                    .await
            })
        };

        let request = next_request(&mut rx).await;
        assert_eq!(request.method, "Switch.GetStatus");
        assert_eq!(request.params, json!({"id": 0}));
        assert!(engine.is_pending(&request.id));

        // A foreign id is not consumed and leaves the waiter pending
        assert!(!engine.resolve("other-id", json!({"result": {}})));
        assert!(engine.is_pending(&request.id));

        let payload = json!({"id": request.id, "result": {"apower": 4.2}});
        assert!(engine.resolve(&request.id, payload.clone()));
        assert!(!engine.resolve(&request.id, payload.clone()));

        let result = call.await.unwrap().unwrap();
        assert_eq!(result, payload);
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_removes_entry() {
        let engine = RpcEngine::new();
        let (sink, mut rx) = sink();

        let started = std::time::Instant::now();
        let result = engine
            .send_request(sink.as_ref(), "Switch.GetStatus", json!({}), Duration::from_millis(50))
            .await;
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(GatewayError::RpcTimeout)));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(2));

        let request = next_request(&mut rx).await;
        assert!(!engine.resolve(&request.id, json!({"result": {}})));
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_cleans_up() {
        let engine = RpcEngine::new();
        let result = engine
            .send_request(&FailingSink, "Switch.GetStatus", json!({}), Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(GatewayError::Transport(_))));
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_deadline_covers_blocked_send() {
        // Outbound queue already full and never drained
        let (tx, mut rx) = mpsc::channel(1);
        let peer = "10.0.0.2:5000".parse().unwrap();
        let session = DeviceSession::with_new_conn_id("plug-1", peer, tx);
        session.send_frame("{}".to_string()).await.unwrap();

        let engine = RpcEngine::new();
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            engine.send_request(&session, "Switch.GetStatus", json!({"id": 0}), Duration::from_millis(50)),
        )
        .await
        .expect("deadline must bound the send");

        assert!(matches!(result, Err(GatewayError::RpcTimeout)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(engine.pending_count(), 0);

        // Only the frame queued before the call made it into the channel
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_call_cleans_up() {
        let engine = Arc::new(RpcEngine::new());
        let (sink, mut rx) = sink();

        let call = {
            let engine = engine.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                engine
                    .send_request(sink.as_ref(), "Switch.GetStatus", json!({}), Duration::from_secs(30))
                    .await
            })
        };

        let request = next_request(&mut rx).await;
        assert!(engine.is_pending(&request.id));

        call.abort();
        let _ = call.await;
        assert!(!engine.is_pending(&request.id));
        assert!(!engine.resolve(&request.id, json!({"result": {}})));
    }

    #[tokio::test]
    async fn test_concurrent_calls_resolve_out_of_order() {
        const CALLS: usize = 16;

        let engine = Arc::new(RpcEngine::new());
        let (sink, mut rx) = sink();

        let mut calls = Vec::new();
        for n in 0..CALLS {
            let engine = engine.clone();
            let sink = sink.clone();
            calls.push(tokio::spawn(async move {
                let payload = engine
                    .send_request(sink.as_ref(), "Switch.GetStatus", json!({"n": n}), Duration::from_secs(5))
                    .await;
                (n, payload)
            }));
        }

        let mut requests = Vec::new();
        for _ in 0..CALLS {
            requests.push(next_request(&mut rx).await);
        }
        let mut unique: Vec<&str> = requests.iter().map(|r| r.id.as_str()).collect();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), CALLS);

        // Answer in reverse arrival order; each result echoes the caller's tag
        for request in requests.iter().rev() {
            let payload = json!({"id": request.id, "result": {"n": request.params["n"]}});
            assert!(engine.resolve(&request.id, payload));
        }

        for call in calls {
            let (n, payload) = call.await.unwrap();
            assert_eq!(payload.unwrap()["result"]["n"], json!(n));
        }
        assert_eq!(engine.pending_count(), 0);
    }
}
