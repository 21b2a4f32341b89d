// Polling client for the HTTP facade
//
// A failed poll is "no metrics this cycle", never an error the collector
// has to handle.

use crate::http::{DeviceList, DeviceMetrics};
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use voltgate_core::ClientConfig;

pub struct GatewayClient {
    client: Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.base_url.as_str(), config.timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One poll of `GET /metrics`. Any failure is logged and yields `None`.
    pub async fn fetch_metrics(&self) -> Option<DeviceMetrics> {
        let url = format!("{}/metrics", self.base_url);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Failed to reach gateway at {}: {}", url, e);
                return None;
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::NOT_FOUND {
                tracing::debug!("No device connected to gateway");
            } else {
                tracing::warn!("Gateway returned {}: {}", status, body);
            }
            return None;
        }

        match response.json::<DeviceMetrics>().await {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                tracing::warn!("Failed to decode metrics from {}: {}", url, e);
                None
            }
        }
    }

    /// `GET /devices`
    pub async fn list_devices(&self) -> Result<DeviceList> {
        let url = format!("{}/devices", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach gateway at {}", url))?
            .error_for_status()
            .context("Gateway rejected device listing")?;

        response
            .json::<DeviceList>()
            .await
            .context("Failed to decode device list")
    }
}
