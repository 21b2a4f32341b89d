// Device WebSocket Protocol
//
// Devices speak JSON envelopes over the session:
// 1. Requests from the gateway: {id, method, params}
// 2. Responses from the device: {id, result} or {id, error}
// 3. Unsolicited notifications: {src, method: "Notify...", params: {...}}
//
// Every inbound frame is classified once, up front, before any handling.

use crate::error::GatewayError;
use crate::extract::has_telemetry;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Method prefix shared by all unsolicited device notifications
pub const NOTIFY_PREFIX: &str = "Notify";

/// Request frame from gateway to device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Unique request ID
    pub id: String,

    /// Method name (e.g., "Switch.GetStatus")
    pub method: String,

    /// Method parameters
    pub params: JsonValue,
}

impl RpcRequest {
    pub fn new(id: String, method: impl Into<String>, params: JsonValue) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by a failed response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcErrorBody {
    #[serde(default)]
    pub code: i64,

    #[serde(default)]
    pub message: String,
}

/// Result of classifying one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceFrame {
    /// Answer to an earlier request; `frame` is the whole envelope
    RpcResponse { id: String, frame: JsonValue },

    /// Unsolicited telemetry; `telemetry` is the switch status object
    PushNotification { method: String, telemetry: JsonValue },

    /// Anything else (status-only heartbeats, events, device requests)
    Unclassified,
}

/// Parse raw text into JSON
pub fn parse_frame(text: &str) -> Result<JsonValue, GatewayError> {
    serde_json::from_str(text).map_err(|e| GatewayError::MalformedMessage(e.to_string()))
}

/// Explicit `src` field of a frame, if it is a non-empty string
pub fn frame_source(frame: &JsonValue) -> Option<&str> {
    frame
        .get("src")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|src| !src.is_empty())
}

/// Classify a parsed frame. `switch_id` selects the component read from
/// notification params.
pub fn classify(frame: JsonValue, switch_id: u32) -> DeviceFrame {
    let Some(obj) = frame.as_object() else {
        return DeviceFrame::Unclassified;
    };

    let has_method = obj.contains_key("method");
    let is_answer = obj.contains_key("result") || obj.contains_key("error");

    if !has_method && is_answer {
        let id = match obj.get("id") {
            Some(JsonValue::String(id)) => Some(id.clone()),
            Some(JsonValue::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        if let Some(id) = id {
            return DeviceFrame::RpcResponse { id, frame };
        }
        return DeviceFrame::Unclassified;
    }

    let method = obj.get("method").and_then(JsonValue::as_str).unwrap_or("");
    if !method.starts_with(NOTIFY_PREFIX) {
        return DeviceFrame::Unclassified;
    }

    match obj.get("params").and_then(|p| select_telemetry(p, switch_id)) {
        Some(telemetry) => DeviceFrame::PushNotification {
            method: method.to_string(),
            telemetry: telemetry.clone(),
        },
        None => DeviceFrame::Unclassified,
    }
}

/// Pick the switch component carrying telemetry out of notification params:
/// `switch:<switch_id>` first, then any `switch:*`, then the params object
/// itself.
fn select_telemetry(params: &JsonValue, switch_id: u32) -> Option<&JsonValue> {
    let obj = params.as_object()?;

    let preferred = format!("switch:{}", switch_id);
    if let Some(component) = obj.get(&preferred).filter(|c| has_telemetry(c)) {
        return Some(component);
    }

    if let Some(component) = obj
        .iter()
        .filter(|(key, _)| key.starts_with("switch:"))
        .map(|(_, value)| value)
        .find(|value| has_telemetry(value))
    {
        return Some(component);
    }

    has_telemetry(params).then_some(params)
}

/// Interpret a response envelope: the `result` member, or the device's error
pub fn response_result(frame: JsonValue) -> Result<JsonValue, GatewayError> {
    let JsonValue::Object(mut obj) = frame else {
        return Err(GatewayError::internal("Invalid RPC response"));
    };

    if let Some(error) = obj.remove("error") {
        if !error.is_null() {
            let body: RpcErrorBody = serde_json::from_value(error.clone()).unwrap_or_else(|_| {
                RpcErrorBody {
                    code: 0,
                    message: error.to_string(),
                }
            });
            return Err(GatewayError::Rpc {
                code: body.code,
                message: body.message,
            });
        }
    }

    obj.remove("result")
        .ok_or_else(|| GatewayError::internal("Invalid RPC response"))
}
