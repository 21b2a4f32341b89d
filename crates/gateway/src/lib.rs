// Voltgate Gateway - device session endpoint and HTTP metrics facade
//
// Power-monitoring devices dial in over WebSocket and either push telemetry
// or answer correlated RPC calls. A small HTTP surface exposes the latest
// reading to polling collectors.

pub mod cache;
pub mod client;
pub mod error;
pub mod extract;
pub mod http;
pub mod protocol;
pub mod registry;
pub mod rpc;
pub mod server;
pub mod session;
pub mod state;

pub use cache::{CachedMetricSet, MetricsCache};
pub use client::GatewayClient;
pub use error::{GatewayError, Unavailable};
pub use extract::{extract_metrics, MetricMap};
pub use http::{DeviceList, DeviceMetrics, HealthStatus};
pub use protocol::DeviceFrame;
pub use registry::{ConnectionRegistry, DeviceSession};
pub use rpc::{FrameSink, RpcEngine};
pub use server::{BoundGateway, GatewayServer};
pub use session::{SessionHandler, SessionPhase};
pub use state::GatewayState;
