// Connection Registry
//
// Authoritative mapping from device id to its live session handle. The
// registry holds clones of the handle for lookup; the session handler task
// owns the connection itself.

use crate::error::GatewayError;
use crate::rpc::FrameSink;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Handle to one device connection
#[derive(Debug, Clone)]
pub struct DeviceSession {
    /// Device identity, fixed for the lifetime of the connection
    device_id: String,

    /// Unique per accepted connection
    conn_id: String,

    /// Remote address of the device
    peer: SocketAddr,

    /// Outbound frames, drained by the connection's writer task
    outbound: mpsc::Sender<Message>,
}

impl DeviceSession {
    pub fn new(
        device_id: impl Into<String>,
        conn_id: impl Into<String>,
        peer: SocketAddr,
        outbound: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            conn_id: conn_id.into(),
            peer,
            outbound,
        }
    }

    /// Session with a fresh connection id
    pub fn with_new_conn_id(
        device_id: impl Into<String>,
        peer: SocketAddr,
        outbound: mpsc::Sender<Message>,
    ) -> Self {
        Self::new(device_id, Uuid::new_v4().to_string(), peer, outbound)
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Whether the connection's writer task is gone
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[async_trait]
impl FrameSink for DeviceSession {
    async fn send_frame(&self, text: String) -> Result<(), GatewayError> {
        self.outbound
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| {
                tracing::debug!(device_id = %self.device_id, peer = %self.peer, "Outbound queue closed");
                GatewayError::connection_lost()
            })
    }
}

/// Device id -> session, at most one entry per id
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, DeviceSession>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace. A replaced session is abandoned, not closed: its
    /// task keeps running until the old socket dies on its own.
    pub async fn register(&self, device_id: &str, session: DeviceSession) {
        let previous = {
            let mut connections = self.connections.write().await;
            connections.insert(device_id.to_string(), session)
        };

        match previous {
            Some(old) => tracing::warn!(
                device_id = %device_id,
                old_peer = %old.peer,
                "Device re-registered, replacing previous session"
            ),
            None => tracing::info!(device_id = %device_id, "Registered device"),
        }
    }

    /// Remove if present; absent ids are a no-op
    pub async fn unregister(&self, device_id: &str) {
        let removed = self.connections.write().await.remove(device_id);
        if removed.is_some() {
            tracing::info!(device_id = %device_id, "Unregistered device");
        }
    }

    /// Remove only if the entry still belongs to connection `conn_id`.
    /// Returns whether an entry was removed.
    pub async fn unregister_session(&self, device_id: &str, conn_id: &str) -> bool {
        let owned = {
            let mut connections = self.connections.write().await;
            let owned = connections.get(device_id).map(|current| current.conn_id == conn_id);
            if owned == Some(true) {
                connections.remove(device_id);
            }
            owned
        };

        match owned {
            Some(true) => {
                tracing::info!(device_id = %device_id, "Unregistered device");
                true
            }
            Some(false) => {
                tracing::debug!(
                    device_id = %device_id,
                    "Session already replaced, leaving registry entry in place"
                );
                false
            }
            None => false,
        }
    }

    pub async fn lookup(&self, device_id: &str) -> Option<DeviceSession> {
        self.connections.read().await.get(device_id).cloned()
    }

    /// Snapshot of registered ids, sorted
    pub async fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
