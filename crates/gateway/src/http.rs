// HTTP Facade
//
// Translates collector polls into cache reads (push mode) or correlated RPC
// calls (pull mode). Every failure is mapped to a status code; handlers
// never propagate an error out of the router.

use crate::error::GatewayError;
use crate::extract::{extract_metrics, MetricMap};
use crate::protocol;
use crate::state::GatewayState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use voltgate_core::AcquisitionMode;

/// `GET /metrics` success body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceMetrics {
    pub device_id: String,
    pub metrics: MetricMap,

    /// Unix seconds of the reading
    pub timestamp: f64,

    #[serde(default)]
    pub stale: bool,
}

/// `GET /devices` body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceList {
    pub devices: Vec<String>,
    pub count: usize,
}

/// `GET /health` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub mode: String,
    pub uptime_seconds: u64,
    pub devices: usize,
    pub cached_devices: usize,
    pub pending_requests: usize,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,

    #[serde(skip)]
    pub status: StatusCode,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.error }))).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self {
            status: err.status_code(),
            error: err.to_string(),
        }
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/devices", get(devices))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn now_unix() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Produce one reading according to the configured acquisition mode
pub async fn acquire_metrics(state: &GatewayState) -> Result<DeviceMetrics, GatewayError> {
    match state.config.mode {
        AcquisitionMode::Push => push_metrics(state).await,
        AcquisitionMode::Pull => pull_metrics(state).await,
    }
}

/// Serve the first cached device's last snapshot
async fn push_metrics(state: &GatewayState) -> Result<DeviceMetrics, GatewayError> {
    let device_id = state
        .cache
        .list_ids()
        .await
        .into_iter()
        .next()
        .ok_or_else(GatewayError::not_connected)?;

    // Evicted between listing and reading
    let cached = state
        .cache
        .get(&device_id)
        .await
        .ok_or_else(GatewayError::not_connected)?;

    Ok(DeviceMetrics {
        stale: cached.is_stale(state.cache.stale_after()),
        timestamp: cached.observed_at_unix(),
        metrics: cached.metrics,
        device_id,
    })
}

/// Ask the first registered device for its status and extract metrics
async fn pull_metrics(state: &GatewayState) -> Result<DeviceMetrics, GatewayError> {
    let device_id = state
        .registry
        .list_ids()
        .await
        .into_iter()
        .next()
        .ok_or_else(GatewayError::not_connected)?;

    let session = state
        .registry
        .lookup(&device_id)
        .await
        .ok_or_else(GatewayError::connection_lost)?;
    if session.is_closed() {
        return Err(GatewayError::connection_lost());
    }

    let config = &state.config;
    let frame = state
        .rpc
        .send_request(
            &session,
            &config.rpc_method,
            json!({ "id": config.switch_id }),
            config.rpc_timeout(),
        )
        .await?;

    let result = protocol::response_result(frame)?;
    let metrics = extract_metrics(&result);

    store_pull_result(state, &device_id, session.conn_id(), &metrics).await;

    Ok(DeviceMetrics {
        device_id,
        metrics,
        timestamp: now_unix(),
        stale: false,
    })
}

/// Cache a pull result unless the answering session has since closed.
/// Closing unregisters before evicting, so a registry miss after the write
/// means the eviction may already have run and the write is undone here.
async fn store_pull_result(
    state: &GatewayState,
    device_id: &str,
    conn_id: &str,
    metrics: &MetricMap,
) {
    let owned = state
        .registry
        .lookup(device_id)
        .await
        .is_some_and(|current| current.conn_id() == conn_id);
    if !owned {
        return;
    }

    state.cache.update(device_id, metrics.clone()).await;

    if state.registry.lookup(device_id).await.is_none() {
        state.cache.remove(device_id).await;
    }
}

/// GET /metrics
async fn metrics(State(state): State<GatewayState>) -> Result<Json<DeviceMetrics>, ApiError> {
    match acquire_metrics(&state).await {
        Ok(reading) => Ok(Json(reading)),
        Err(e) => {
            let status = e.status_code();
            if status.is_server_error() {
                tracing::error!(mode = %state.config.mode, "Metrics request failed: {}", e);
            } else {
                tracing::debug!(mode = %state.config.mode, "Metrics request failed: {}", e);
            }
            Err(e.into())
        }
    }
}

/// GET /devices
async fn devices(State(state): State<GatewayState>) -> Json<DeviceList> {
    let mut devices = state.registry.list_ids().await;
    devices.extend(state.cache.list_ids().await);
    devices.sort();
    devices.dedup();

    Json(DeviceList {
        count: devices.len(),
        devices,
    })
}

/// GET /health
async fn health(State(state): State<GatewayState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: state.config.mode.as_str().to_string(),
        uptime_seconds: state.uptime_secs(),
        devices: state.registry.len().await,
        cached_devices: state.cache.len().await,
        pending_requests: state.rpc.pending_count(),
    })
}
