use crate::http;
use crate::session::handle_connection;
use crate::state::GatewayState;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use voltgate_core::GatewayConfig;

/// Gateway server: device listener plus HTTP facade over one shared state
pub struct GatewayServer {
    state: GatewayState,
}

/// Server with both listeners bound, ready to serve
pub struct BoundGateway {
    state: GatewayState,
    device_listener: TcpListener,
    http_listener: TcpListener,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            state: GatewayState::new(config),
        }
    }

    pub fn state(&self) -> GatewayState {
        self.state.clone()
    }

    /// Bind the device and HTTP ports. Port 0 picks a free port.
    pub async fn bind(self) -> Result<BoundGateway> {
        let device_addr = self.state.config.device_addr();
        let device_listener = TcpListener::bind(&device_addr)
            .await
            .with_context(|| format!("Failed to bind device listener on {}", device_addr))?;

        let http_addr = self.state.config.http_addr();
        let http_listener = TcpListener::bind(&http_addr)
            .await
            .with_context(|| format!("Failed to bind HTTP listener on {}", http_addr))?;

        Ok(BoundGateway {
            state: self.state,
            device_listener,
            http_listener,
        })
    }

    pub async fn start(self) -> Result<()> {
        self.bind().await?.serve().await
    }
}

impl BoundGateway {
    pub fn device_addr(&self) -> Result<SocketAddr> {
        Ok(self.device_listener.local_addr()?)
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        Ok(self.http_listener.local_addr()?)
    }

    pub fn state(&self) -> GatewayState {
        self.state.clone()
    }

    /// Run until either listener fails
    pub async fn serve(self) -> Result<()> {
        tracing::info!(
            mode = %self.state.config.mode,
            "Device endpoint listening on {}",
            self.device_addr()?
        );
        tracing::info!("HTTP facade listening on {}", self.http_addr()?);

        let app = http::router(self.state.clone());
        let http_listener = self.http_listener;
        let http_server = async move {
            axum::serve(http_listener, app)
                .await
                .context("HTTP facade stopped")
        };

        tokio::select! {
            result = accept_devices(self.device_listener, self.state) => result,
            result = http_server => result,
        }
    }
}

/// Accept loop: one task per device connection
async fn accept_devices(listener: TcpListener, state: GatewayState) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, state).await {
                        tracing::error!("Connection error from {}: {:#}", peer, e);
                    }
                });
            }
            // Transient (e.g. fd exhaustion); keep accepting
            Err(e) => {
                tracing::warn!("Failed to accept device connection: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}
