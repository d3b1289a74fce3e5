use crate::config::EngineConfig;
use crate::device_client::DeviceClient;
use crate::protocol::{self, DeviceInfoPayload, ALTERNATE_IDENTIFY_PATHS, PRIMARY_IDENTIFY_PATH};
use crate::types::{device_id_for, Capabilities, DeviceType, ScanRecord};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Classifies hosts with an open device port
///
/// A host is identified when one of the identification paths answers 200
/// with a body matching [`protocol::is_vendor_response`]. The match is
/// permissive: unrelated HTTP services that mention words like "model" are
/// identified too.
pub struct DeviceIdentifier {
    client: DeviceClient,
    port: u16,
    primary_timeout: Duration,
    alternate_timeout: Duration,
    default_capabilities: Capabilities,
}

impl DeviceIdentifier {
    pub fn new(client: DeviceClient, config: &EngineConfig) -> Self {
        Self {
            client,
            port: config.device_port,
            primary_timeout: config.identify_timeout(),
            alternate_timeout: config.identify_alt_timeout(),
            default_capabilities: Capabilities {
                supports_power_monitoring: false,
                supports_timer: config.assume_timer_support,
                supports_schedule: config.assume_schedule_support,
            },
        }
    }

    /// Identify the host at `ip`, or `None` if no path matched
    pub async fn identify(&self, ip: Ipv4Addr) -> Option<ScanRecord> {
        let paths = std::iter::once((PRIMARY_IDENTIFY_PATH, self.primary_timeout)).chain(
            ALTERNATE_IDENTIFY_PATHS
                .iter()
                .map(|path| (*path, self.alternate_timeout)),
        );

        for (path, timeout) in paths {
            match self.client.get(ip, self.port, path, timeout).await {
                Ok(reply) if reply.is_ok() && protocol::is_vendor_response(&reply.body) => {
                    let record = self.build_record(ip, &reply.body);
                    tracing::info!(
                        ip = %ip,
                        path,
                        "Identified device {} ({})",
                        record.id,
                        record.name
                    );
                    return Some(record);
                }
                Ok(reply) => {
                    tracing::debug!(ip = %ip, path, status = reply.status, "No device signature");
                }
                Err(e) => {
                    tracing::debug!(ip = %ip, path, "Identification request failed: {}", e);
                }
            }
        }

        None
    }

    /// Build a record from an identifying body
    ///
    /// Falls back to a minimal address-only record when the body cannot be
    /// decoded, so an identified host is never dropped.
    pub fn build_record(&self, ip: Ipv4Addr, body: &str) -> ScanRecord {
        match protocol::parse_device_info(body) {
            Some(info) => self.record_from_payload(ip, info),
            None => ScanRecord::from_address(ip, self.port, self.default_capabilities),
        }
    }

    fn record_from_payload(&self, ip: Ipv4Addr, info: DeviceInfoPayload) -> ScanRecord {
        let id = info
            .deviceid
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| device_id_for(ip));
        let name = info
            .name
            .unwrap_or_else(|| format!("Sonoff Device {}", id));
        let model = info.model.unwrap_or_else(|| "Unknown".to_string());
        let device_type = DeviceType::from_model(&model);

        ScanRecord {
            id,
            name,
            model,
            device_type,
            ip_address: ip,
            mac_address: info.mac,
            port: self.port,
            capabilities: Capabilities {
                supports_power_monitoring: device_type.supports_power_monitoring(),
                ..self.default_capabilities
            },
            firmware_version: info.fw_version,
            hardware_version: info.hw_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identifier() -> DeviceIdentifier {
        DeviceIdentifier::new(DeviceClient::new().unwrap(), &EngineConfig::default())
    }

    #[tokio::test]
    async fn json_body_fills_the_record() {
        let ip = Ipv4Addr::new(192, 168, 1, 216);
        let body = concat!(
            r#"{"deviceid":"1000bb555e","name":"Stage left","model":"S31TPB","#,
            r#""mac":"D8:F1:5B:00:00:01","hwVersion":"2"}"#,
        );
        let record = identifier().build_record(ip, body);

        assert_eq!(record.id, "1000bb555e");
        assert_eq!(record.name, "Stage left");
        assert_eq!(record.device_type, DeviceType::S31);
        assert!(record.capabilities.supports_power_monitoring);
        assert!(record.capabilities.supports_timer);
        assert!(record.capabilities.supports_schedule);
        assert_eq!(record.mac_address.as_deref(), Some("D8:F1:5B:00:00:01"));
        assert_eq!(record.hardware_version.as_deref(), Some("2"));
        assert_eq!(record.port, 80);
    }

    #[tokio::test]
    async fn missing_fields_fall_back_to_address() {
        let ip = Ipv4Addr::new(192, 168, 1, 40);
        let record = identifier().build_record(ip, r#"{"model":"basic","deviceid":"  "}"#);

        assert_eq!(record.id, "sonoff_192_168_1_40");
        assert_eq!(record.name, "Sonoff Device sonoff_192_168_1_40");
        assert_eq!(record.device_type, DeviceType::Unknown);
        assert!(!record.capabilities.supports_power_monitoring);
    }

    #[tokio::test]
    async fn undecodable_body_yields_minimal_record() {
        let ip = Ipv4Addr::new(192, 168, 1, 41);
        let record = identifier().build_record(ip, "{ deviceid: oops");

        assert_eq!(record, ScanRecord::from_address(ip, 80, identifier().default_capabilities));
        assert_eq!(record.model, "Unknown");
    }

    #[tokio::test]
    async fn capability_assumptions_are_configurable() {
        let config = EngineConfig {
            assume_timer_support: false,
            ..EngineConfig::default()
        };
        let identifier = DeviceIdentifier::new(DeviceClient::new().unwrap(), &config);
        let record = identifier.build_record(Ipv4Addr::new(10, 0, 0, 2), "brand: itead");

        assert!(!record.capabilities.supports_timer);
        assert!(record.capabilities.supports_schedule);
    }
}
