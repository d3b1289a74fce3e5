use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Device identifier
pub type DeviceId = String;

/// Prefix of ids derived from an address
const ADDRESS_ID_PREFIX: &str = "sonoff_";

/// Derive the stable registry id for a device that did not report its own
///
/// `192.168.1.99` becomes `sonoff_192_168_1_99`.
pub fn device_id_for(ip: Ipv4Addr) -> DeviceId {
    let [a, b, c, d] = ip.octets();
    format!("{ADDRESS_ID_PREFIX}{a}_{b}_{c}_{d}")
}

/// Device family, derived from the reported model string
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Basic WiFi socket
    S26,
    /// WiFi socket with power monitoring
    S31,
    /// WiFi socket with USB
    S40,
    /// WiFi socket with power monitoring and USB
    S60,
    /// WiFi socket with power monitoring
    S20,
    /// Basic WiFi socket
    S10,
    /// Stage LED controller
    #[serde(rename = "STAGE")]
    Stage,
    #[serde(rename = "unknown")]
    Unknown,
}

impl DeviceType {
    /// Model codes in match order
    const MODEL_CODES: [(&'static str, DeviceType); 7] = [
        ("s26", DeviceType::S26),
        ("s31", DeviceType::S31),
        ("s40", DeviceType::S40),
        ("s60", DeviceType::S60),
        ("s20", DeviceType::S20),
        ("s10", DeviceType::S10),
        ("stage", DeviceType::Stage),
    ];

    /// Classify a reported model string; anything unrecognised is `Unknown`
    pub fn from_model(model: &str) -> Self {
        let model = model.to_lowercase();
        Self::MODEL_CODES
            .iter()
            .find(|(code, _)| model.contains(code))
            .map(|(_, device_type)| *device_type)
            .unwrap_or(DeviceType::Unknown)
    }

    /// Whether devices of this family report voltage/current/power/energy
    pub fn supports_power_monitoring(self) -> bool {
        matches!(self, DeviceType::S31 | DeviceType::S60 | DeviceType::S20)
    }
}

/// Connectivity status of a registry entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Unknown,
    Online,
    Offline,
    Error,
}

/// Stored power state of a device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    #[default]
    Off,
}

impl PowerState {
    /// The opposite state
    pub fn toggled(self) -> Self {
        match self {
            PowerState::On => PowerState::Off,
            PowerState::Off => PowerState::On,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::On => f.write_str("on"),
            PowerState::Off => f.write_str("off"),
        }
    }
}

/// Requested power action
///
/// Unlike [`PowerState`], a directive may be `Toggle`, which resolves against
/// the last known state of the device once the device confirms it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Directive {
    On,
    Off,
    Toggle,
}

impl Directive {
    /// Resolve the directive against the current state
    pub fn resolve(self, current: PowerState) -> PowerState {
        match self {
            Directive::On => PowerState::On,
            Directive::Off => PowerState::Off,
            Directive::Toggle => current.toggled(),
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::On => f.write_str("on"),
            Directive::Off => f.write_str("off"),
            Directive::Toggle => f.write_str("toggle"),
        }
    }
}

/// How the engine reaches a device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    Local,
}

/// Optional features a device supports, inferred at identification time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub supports_power_monitoring: bool,
    pub supports_timer: bool,
    pub supports_schedule: bool,
}

/// Power monitoring readings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Telemetry {
    /// Volts
    pub voltage: Option<f64>,
    /// Amperes
    pub current: Option<f64>,
    /// Watts
    pub power: Option<f64>,
    /// Kilowatt-hours
    pub energy: Option<f64>,
}

/// Registry entry for an identified device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub model: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,

    // Network identity, never rewritten after creation
    pub ip_address: Ipv4Addr,
    pub mac_address: Option<String>,
    pub port: u16,

    pub status: DeviceStatus,
    pub power_state: PowerState,
    pub connection_type: ConnectionType,

    #[serde(flatten)]
    pub capabilities: Capabilities,

    /// Present only when `capabilities.supports_power_monitoring`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<Telemetry>,

    pub firmware_version: Option<String>,
    pub hardware_version: Option<String>,

    pub last_seen: DateTime<Utc>,
    pub last_control: Option<DateTime<Utc>>,
    pub control_count: u64,
}

/// Identification result for one address
///
/// Produced by the identifier and consumed once by registry reconciliation;
/// never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    pub id: DeviceId,
    pub name: String,
    pub model: String,
    pub device_type: DeviceType,
    pub ip_address: Ipv4Addr,
    pub mac_address: Option<String>,
    pub port: u16,
    pub capabilities: Capabilities,
    pub firmware_version: Option<String>,
    pub hardware_version: Option<String>,
}

impl ScanRecord {
    /// Minimal record for a positively identified host that told us nothing
    /// usable about itself
    pub fn from_address(ip: Ipv4Addr, port: u16, capabilities: Capabilities) -> Self {
        let id = device_id_for(ip);
        Self {
            name: format!("Sonoff Device {}", id),
            id,
            model: "Unknown".to_string(),
            device_type: DeviceType::Unknown,
            ip_address: ip,
            mac_address: None,
            port,
            capabilities: Capabilities {
                supports_power_monitoring: false,
                ..capabilities
            },
            firmware_version: None,
            hardware_version: None,
        }
    }

    /// Turn the record into a fresh registry entry
    pub(crate) fn into_device(self, now: DateTime<Utc>) -> Device {
        Device {
            id: self.id,
            name: self.name,
            model: self.model,
            device_type: self.device_type,
            ip_address: self.ip_address,
            mac_address: self.mac_address,
            port: self.port,
            status: DeviceStatus::Unknown,
            power_state: PowerState::Off,
            connection_type: ConnectionType::Local,
            capabilities: self.capabilities,
            telemetry: None,
            firmware_version: self.firmware_version,
            hardware_version: self.hardware_version,
            last_seen: now,
            last_control: None,
            control_count: 0,
        }
    }
}

/// Control request as validated by the façade
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlRequest {
    pub directive: Directive,

    /// Auto-revert timer in seconds
    #[serde(default)]
    pub timer: Option<u32>,

    /// Schedule configuration (accepted, not forwarded to the device)
    #[serde(default)]
    pub schedule: Option<serde_json::Value>,
}

impl ControlRequest {
    /// Request with only a directive
    pub fn new(directive: Directive) -> Self {
        Self {
            directive,
            timer: None,
            schedule: None,
        }
    }

    /// Attach a timer in seconds
    pub fn with_timer(mut self, seconds: u32) -> Self {
        self.timer = Some(seconds);
        self
    }
}

impl From<Directive> for ControlRequest {
    fn from(directive: Directive) -> Self {
        Self::new(directive)
    }
}

/// Outcome of a successful control dispatch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlResult {
    pub device_id: DeviceId,
    pub power_state: PowerState,
    pub control_count: u64,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_ids_are_stable() {
        let ip = Ipv4Addr::new(192, 168, 1, 99);
        assert_eq!(device_id_for(ip), "sonoff_192_168_1_99");
        assert_eq!(device_id_for(ip), device_id_for(ip));
    }

    #[test]
    fn model_classification_is_case_insensitive() {
        assert_eq!(DeviceType::from_model("SONOFF S31 Lite"), DeviceType::S31);
        assert_eq!(DeviceType::from_model("s26r2"), DeviceType::S26);
        assert_eq!(DeviceType::from_model("Stage-ESP32"), DeviceType::Stage);
        assert_eq!(DeviceType::from_model("BASICR2"), DeviceType::Unknown);
        assert_eq!(DeviceType::from_model(""), DeviceType::Unknown);
    }

    #[test]
    fn power_monitoring_families() {
        assert!(DeviceType::S31.supports_power_monitoring());
        assert!(DeviceType::S60.supports_power_monitoring());
        assert!(DeviceType::S20.supports_power_monitoring());
        assert!(!DeviceType::S26.supports_power_monitoring());
        assert!(!DeviceType::Unknown.supports_power_monitoring());
    }

    #[test]
    fn toggle_resolves_against_current_state() {
        assert_eq!(Directive::Toggle.resolve(PowerState::Off), PowerState::On);
        assert_eq!(Directive::Toggle.resolve(PowerState::On), PowerState::Off);
        assert_eq!(Directive::On.resolve(PowerState::On), PowerState::On);
        assert_eq!(Directive::Off.resolve(PowerState::On), PowerState::Off);
    }

    #[test]
    fn device_serializes_with_facade_field_names() {
        let record = ScanRecord::from_address(
            Ipv4Addr::new(10, 0, 0, 7),
            80,
            Capabilities {
                supports_power_monitoring: true,
                supports_timer: true,
                supports_schedule: true,
            },
        );
        let device = record.into_device(Utc::now());
        let json = serde_json::to_value(&device).unwrap();

        assert_eq!(json["type"], "unknown");
        assert_eq!(json["status"], "unknown");
        assert_eq!(json["power_state"], "off");
        assert_eq!(json["supports_power_monitoring"], false);
        assert_eq!(json["supports_timer"], true);
        assert!(json.get("telemetry").is_none());
    }
}
