//! Device-side HTTP endpoints and the heuristics used to read their bodies
//!
//! None of these bodies follow a published format; everything here is
//! best-effort matching against what the switches are known to emit.

use crate::types::{PowerState, Telemetry};
use serde::Deserialize;
use serde_json::Value;

/// First path tried when identifying a host
pub const PRIMARY_IDENTIFY_PATH: &str = "/device";

/// Paths tried in order when the primary path does not identify the host
pub const ALTERNATE_IDENTIFY_PATHS: [&str; 3] = ["/info", "/status", "/api/info"];

/// Path polled by the status refresher
pub const STATUS_PATH: &str = "/status";

/// Path used for a toggle directive
pub const TOGGLE_PATH: &str = "/toggle";

/// Tokens whose presence marks a response as coming from a supported device.
///
/// Generic words like "model" make this match some unrelated HTTP services
/// too; the matching is kept as is.
pub const VENDOR_TOKENS: [&str; 8] = [
    "sonoff",
    "ewelink",
    "ewelink.com",
    "sonoff.tech",
    "deviceid",
    "apikey",
    "model",
    "brand",
];

/// Tokens whose presence marks a control response as successful
pub const SUCCESS_TOKENS: [&str; 4] = ["success", "ok", "true", "1"];

/// Path for an on/off directive
pub fn switch_path(state: PowerState) -> String {
    format!("/switch/{}", state)
}

/// Whether a response body looks like it came from a supported device
pub fn is_vendor_response(body: &str) -> bool {
    contains_any(body, &VENDOR_TOKENS)
}

/// Whether a control response body confirms the directive
pub fn is_success_response(body: &str) -> bool {
    contains_any(body, &SUCCESS_TOKENS)
}

fn contains_any(body: &str, tokens: &[&str]) -> bool {
    let body = body.to_lowercase();
    tokens.iter().any(|token| body.contains(token))
}

/// Identification payload as reported by the device
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct DeviceInfoPayload {
    #[serde(default)]
    pub deviceid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default, rename = "fwVersion")]
    pub fw_version: Option<String>,
    #[serde(default, rename = "hwVersion")]
    pub hw_version: Option<String>,
}

/// Decode an identification body
///
/// Returns `None` when the body is not a JSON object we can read.
pub fn parse_device_info(body: &str) -> Option<DeviceInfoPayload> {
    let trimmed = body.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// What a status probe learned about a device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    /// Switch position, if the body reported one
    pub power_state: Option<PowerState>,
    /// Readings, meaningful only for power-monitoring devices
    pub telemetry: Telemetry,
}

/// Decode a status body
///
/// Returns `None` when the body is not a JSON object.
pub fn parse_status(body: &str) -> Option<StatusReport> {
    let trimmed = body.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let json: Value = serde_json::from_str(trimmed).ok()?;
    let obj = json.as_object()?;

    let power_state = obj.get("switch").and_then(switch_state);

    Some(StatusReport {
        power_state,
        telemetry: Telemetry {
            voltage: obj.get("voltage").and_then(number),
            current: obj.get("current").and_then(number),
            power: obj.get("power").and_then(number),
            energy: obj.get("energy").and_then(number),
        },
    })
}

fn switch_state(value: &Value) -> Option<PowerState> {
    let on = match value {
        Value::String(s) => matches!(s.to_lowercase().as_str(), "on" | "1" | "true"),
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() == Some(1.0),
        _ => return None,
    };
    Some(if on { PowerState::On } else { PowerState::Off })
}

// Some firmwares quote their readings
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
