// Voltgate Core - configuration and shared error types

pub mod config;
pub mod error;

pub use config::{
    AcquisitionMode, ClientConfig, Config, ConfigLoader, ConfigValidator, GatewayConfig,
};
pub use error::{DomainError, InfraError, VoltgateError};
