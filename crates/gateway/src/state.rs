// Shared gateway state
//
// Registry, cache and correlation engine are owned here and handed to every
// session handler and HTTP request by cloning the `Arc`s.

use crate::cache::MetricsCache;
use crate::registry::ConnectionRegistry;
use crate::rpc::RpcEngine;
use std::sync::Arc;
use std::time::Instant;
use voltgate_core::GatewayConfig;

#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<ConnectionRegistry>,
    pub cache: Arc<MetricsCache>,
    pub rpc: Arc<RpcEngine>,
    pub config: Arc<GatewayConfig>,
    started_at: Instant,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            cache: Arc::new(MetricsCache::new(config.stale_after())),
            rpc: Arc::new(RpcEngine::new()),
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
