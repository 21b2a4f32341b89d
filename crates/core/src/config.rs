//! Voltgate Configuration
//!
//! Configuration structures with defaults declared through serde attributes,
//! a loader that resolves the config file, and a validator.

use crate::error::VoltgateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default bind host for both listeners
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default device session (WebSocket) port
pub const DEFAULT_DEVICE_PORT: u16 = 8765;
/// Default HTTP facade port
pub const DEFAULT_HTTP_PORT: u16 = 8766;
/// Default RPC timeout (seconds)
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 5;
/// Default server ping interval (seconds)
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 30;
/// Default pong deadline after a ping (seconds)
pub const DEFAULT_PONG_TIMEOUT_SECS: u64 = 10;
/// Default age after which cached metrics are flagged stale (seconds)
pub const DEFAULT_STALE_AFTER_SECS: u64 = 60;
/// Default status method issued in pull mode
pub const DEFAULT_RPC_METHOD: &str = "Switch.GetStatus";
/// Default prefix for device ids synthesized from the peer address
pub const DEFAULT_DEVICE_ID_PREFIX: &str = "shelly";
/// Default base URL used by the polling client
pub const DEFAULT_CLIENT_BASE_URL: &str = "http://127.0.0.1:8766";
/// Default polling client timeout (seconds)
pub const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 2;

const LOCAL_CONFIG_FILE: &str = "voltgate.yaml";

// ============================================================================
// Main Config
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Device gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Polling client configuration
    #[serde(default)]
    pub client: ClientConfig,
}

// ============================================================================
// Gateway Config
// ============================================================================

/// How `GET /metrics` acquires data
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// Serve the last pushed snapshot from the cache
    Push,
    /// Query the device on demand over RPC
    #[default]
    Pull,
}

impl AcquisitionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcquisitionMode {
    type Err = VoltgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" | "cache" => Ok(Self::Push),
            "pull" | "rpc" => Ok(Self::Pull),
            other => Err(VoltgateError::config_invalid(
                "gateway.mode",
                format!("Unknown mode '{}'. Must be one of: push, pull", other),
            )),
        }
    }
}

/// Device gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind host for both listeners
    #[serde(default = "GatewayConfig::default_host")]
    pub host: String,
    /// Port devices dial into
    #[serde(default = "GatewayConfig::default_device_port")]
    pub device_port: u16,
    /// Port of the HTTP facade
    #[serde(default = "GatewayConfig::default_http_port")]
    pub http_port: u16,
    /// Metrics acquisition mode
    #[serde(default)]
    pub mode: AcquisitionMode,
    /// RPC deadline in seconds
    #[serde(default = "GatewayConfig::default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    /// Interval between server pings in seconds
    #[serde(default = "GatewayConfig::default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Seconds to wait for a pong before closing the session
    #[serde(default = "GatewayConfig::default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
    /// Seconds after which cached metrics are flagged stale
    #[serde(default = "GatewayConfig::default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Status method issued in pull mode
    #[serde(default = "GatewayConfig::default_rpc_method")]
    pub rpc_method: String,
    /// Switch component queried and read from notifications
    #[serde(default)]
    pub switch_id: u32,
    /// Prefix for ids synthesized from the peer address
    #[serde(default = "GatewayConfig::default_device_id_prefix")]
    pub device_id_prefix: String,
}

impl GatewayConfig {
    fn default_host() -> String {
        DEFAULT_HOST.to_string()
    }
    fn default_device_port() -> u16 {
        DEFAULT_DEVICE_PORT
    }
    fn default_http_port() -> u16 {
        DEFAULT_HTTP_PORT
    }
    fn default_rpc_timeout_secs() -> u64 {
        DEFAULT_RPC_TIMEOUT_SECS
    }
    fn default_ping_interval_secs() -> u64 {
        DEFAULT_PING_INTERVAL_SECS
    }
    fn default_pong_timeout_secs() -> u64 {
        DEFAULT_PONG_TIMEOUT_SECS
    }
    fn default_stale_after_secs() -> u64 {
        DEFAULT_STALE_AFTER_SECS
    }
    fn default_rpc_method() -> String {
        DEFAULT_RPC_METHOD.to_string()
    }
    fn default_device_id_prefix() -> String {
        DEFAULT_DEVICE_ID_PREFIX.to_string()
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn device_addr(&self) -> String {
        format!("{}:{}", self.host, self.device_port)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            device_port: DEFAULT_DEVICE_PORT,
            http_port: DEFAULT_HTTP_PORT,
            mode: AcquisitionMode::default(),
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
            pong_timeout_secs: DEFAULT_PONG_TIMEOUT_SECS,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            rpc_method: DEFAULT_RPC_METHOD.to_string(),
            switch_id: 0,
            device_id_prefix: DEFAULT_DEVICE_ID_PREFIX.to_string(),
        }
    }
}

// ============================================================================
// Client Config
// ============================================================================

/// Polling client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the HTTP facade
    #[serde(default = "ClientConfig::default_base_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "ClientConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ClientConfig {
    fn default_base_url() -> String {
        DEFAULT_CLIENT_BASE_URL.to_string()
    }
    fn default_timeout_secs() -> u64 {
        DEFAULT_CLIENT_TIMEOUT_SECS
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CLIENT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_CLIENT_TIMEOUT_SECS,
        }
    }
}

// ============================================================================
// Config Loading and Validation
// ============================================================================

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from an explicit path, a default location, or
    /// fall back to built-in defaults. Environment overrides are applied last.
    pub fn load(path: Option<&str>) -> Result<Config, VoltgateError> {
        let mut config = match Self::resolve_config_path(path)? {
            Some(config_path) => Self::load_file(&config_path)?,
            None => {
                tracing::info!("No config file found, using built-in defaults");
                Config::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Parse a single YAML config file
    pub fn load_file(path: &Path) -> Result<Config, VoltgateError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VoltgateError::config_parse_error(format!("Failed to read {:?}: {}", path, e))
        })?;
        let config: Config = serde_yml::from_str(&content).map_err(|e| {
            VoltgateError::config_parse_error(format!("Failed to parse {:?}: {}", path, e))
        })?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// An explicitly passed path must exist; default locations are optional.
    fn resolve_config_path(path: Option<&str>) -> Result<Option<PathBuf>, VoltgateError> {
        if let Some(p) = path {
            let p = PathBuf::from(p);
            if !p.exists() {
                return Err(VoltgateError::config_not_found(p.display().to_string()));
            }
            return Ok(Some(p));
        }

        let mut default_paths = vec![PathBuf::from(".").join(LOCAL_CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            default_paths.push(dir.join("voltgate").join("config.yaml"));
        }

        Ok(default_paths.into_iter().find(|p| p.exists()))
    }
}

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<(), VoltgateError> {
        let gateway = &config.gateway;

        if gateway.device_port == 0 {
            return Err(VoltgateError::config_invalid(
                "gateway.device_port",
                "Port must not be 0",
            ));
        }
        if gateway.http_port == 0 {
            return Err(VoltgateError::config_invalid(
                "gateway.http_port",
                "Port must not be 0",
            ));
        }
        if gateway.device_port == gateway.http_port {
            return Err(VoltgateError::config_invalid(
                "gateway.http_port",
                format!(
                    "Device and HTTP listeners cannot share port {}",
                    gateway.http_port
                ),
            ));
        }

        for (field, value) in [
            ("gateway.rpc_timeout_secs", gateway.rpc_timeout_secs),
            ("gateway.ping_interval_secs", gateway.ping_interval_secs),
            ("gateway.pong_timeout_secs", gateway.pong_timeout_secs),
            ("gateway.stale_after_secs", gateway.stale_after_secs),
            ("client.timeout_secs", config.client.timeout_secs),
        ] {
            if value == 0 {
                return Err(VoltgateError::config_invalid(field, "Must be at least 1"));
            }
        }

        if gateway.pong_timeout_secs >= gateway.ping_interval_secs {
            return Err(VoltgateError::config_invalid(
                "gateway.pong_timeout_secs",
                "Pong timeout must be shorter than the ping interval",
            ));
        }

        if gateway.rpc_method.trim().is_empty() {
            return Err(VoltgateError::config_invalid(
                "gateway.rpc_method",
                "RPC method cannot be empty",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Config Implementation
// ============================================================================

impl Config {
    /// Load configuration (see [`ConfigLoader::load`])
    pub fn load(path: &Option<String>) -> Result<Self, VoltgateError> {
        ConfigLoader::load(path.as_deref())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), VoltgateError> {
        let content = serde_yml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Generate a sample configuration
    pub fn sample() -> Self {
        Config {
            gateway: GatewayConfig {
                mode: AcquisitionMode::Pull,
                ..GatewayConfig::default()
            },
            client: ClientConfig::default(),
        }
    }

    /// Apply environment-style overrides. `lookup` maps a variable name to
    /// its value; the binary passes `std::env::var`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), VoltgateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Legacy names first so the new names win when both are set
        for (key, target) in [
            ("SHELLY_WS_PORT", PortField::Device),
            ("SHELLY_HTTP_PORT", PortField::Http),
            ("VOLTGATE_DEVICE_PORT", PortField::Device),
            ("VOLTGATE_HTTP_PORT", PortField::Http),
        ] {
            if let Some(raw) = lookup(key) {
                let port: u16 = raw.trim().parse().map_err(|_| {
                    VoltgateError::config_invalid(key, format!("Invalid port '{}'", raw))
                })?;
                match target {
                    PortField::Device => self.gateway.device_port = port,
                    PortField::Http => self.gateway.http_port = port,
                }
            }
        }

        if let Some(raw) = lookup("VOLTGATE_MODE") {
            self.gateway.mode = raw.parse()?;
        }

        Ok(())
    }
}

enum PortField {
    Device,
    Http,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.device_port, 8765);
        assert_eq!(config.gateway.http_port, 8766);
        assert_eq!(config.gateway.mode, AcquisitionMode::Pull);
        assert_eq!(config.gateway.rpc_timeout(), Duration::from_secs(5));
        assert_eq!(config.gateway.ping_interval(), Duration::from_secs(30));
        assert_eq!(config.gateway.pong_timeout(), Duration::from_secs(10));
        assert_eq!(config.gateway.stale_after(), Duration::from_secs(60));
        assert_eq!(config.client.timeout(), Duration::from_secs(2));
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yml::from_str("gateway:\n  mode: push\n  http_port: 9000\n")
            .expect("parse");
        assert_eq!(config.gateway.mode, AcquisitionMode::Push);
        assert_eq!(config.gateway.http_port, 9000);
        assert_eq!(config.gateway.device_port, DEFAULT_DEVICE_PORT);
        assert_eq!(config.client.base_url, DEFAULT_CLIENT_BASE_URL);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("voltgate.yaml");
        let mut config = Config::sample();
        config.gateway.mode = AcquisitionMode::Push;
        config.save(&path).expect("save");

        let loaded = ConfigLoader::load_file(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_save_into_missing_dir_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("voltgate.yaml");
        let err = Config::sample().save(&path).unwrap_err();
        assert!(matches!(
            err,
            VoltgateError::Infra(crate::error::InfraError::Io(_))
        ));
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let err = ConfigLoader::load(Some("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(
            err,
            VoltgateError::Domain(crate::error::DomainError::ConfigNotFound { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SHELLY_WS_PORT", "7000"),
            ("VOLTGATE_HTTP_PORT", "7001"),
            ("VOLTGATE_MODE", "push"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .expect("overrides");
        assert_eq!(config.gateway.device_port, 7000);
        assert_eq!(config.gateway.http_port, 7001);
        assert_eq!(config.gateway.mode, AcquisitionMode::Push);
    }

    #[test]
    fn test_env_override_rejects_bad_port() {
        let mut config = Config::default();
        let result = config.apply_overrides(|key| {
            (key == "VOLTGATE_DEVICE_PORT").then(|| "not-a-port".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validator_rejects_shared_port() {
        let mut config = Config::default();
        config.gateway.http_port = config.gateway.device_port;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_validator_rejects_pong_longer_than_ping() {
        let mut config = Config::default();
        config.gateway.pong_timeout_secs = 30;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("PUSH".parse::<AcquisitionMode>().unwrap(), AcquisitionMode::Push);
        assert_eq!("rpc".parse::<AcquisitionMode>().unwrap(), AcquisitionMode::Pull);
        assert!("fanout".parse::<AcquisitionMode>().is_err());
    }
}
