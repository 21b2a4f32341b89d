// Gateway error taxonomy
//
// Every failure the session handlers or the HTTP facade can observe maps to
// one of these variants. `status_code` is the single place that decides how
// a failure is surfaced to the polling collector.

use axum::http::StatusCode;
use std::fmt;
use thiserror::Error;

/// Why a device cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    /// No device is registered (or cached, in push mode)
    NotConnected,
    /// The device was listed but its session is gone
    ConnectionLost,
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => f.write_str("No device connected"),
            Self::ConnectionLost => f.write_str("Device connection lost"),
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Inbound frame could not be parsed
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Response id not present in the pending table
    #[error("unknown correlation id: {0}")]
    UnknownCorrelation(String),

    /// No response within the deadline
    #[error("RPC request timeout")]
    RpcTimeout,

    #[error("{0}")]
    DeviceUnavailable(Unavailable),

    /// The device answered with an error object
    #[error("device returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn not_connected() -> Self {
        Self::DeviceUnavailable(Unavailable::NotConnected)
    }

    pub fn connection_lost() -> Self {
        Self::DeviceUnavailable(Unavailable::ConnectionLost)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status used by the facade for this failure
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DeviceUnavailable(Unavailable::NotConnected) => StatusCode::NOT_FOUND,
            Self::DeviceUnavailable(Unavailable::ConnectionLost) => StatusCode::BAD_GATEWAY,
            Self::RpcTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::MalformedMessage(_)
            | Self::UnknownCorrelation(_)
            | Self::Rpc { .. }
            | Self::Transport(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
