use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Configuration consumed by [`DeviceEngine`](crate::DeviceEngine) at construction time
///
/// Every field has a default, so a partial document deserializes cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Subnet scanned by full discovery, in `/24` CIDR notation
    pub subnet: String,

    /// TCP port the devices' local HTTP API listens on
    pub device_port: u16,

    /// Previously confirmed device addresses for the fast path
    pub known_addresses: Vec<Ipv4Addr>,

    /// Scan only `known_addresses` when the list is non-empty
    pub prefer_known_addresses: bool,

    /// Timeout in milliseconds for a single TCP port check
    pub probe_timeout_ms: u64,

    /// Number of addresses handed to each full-scan worker
    pub chunk_size: usize,

    /// Concurrent port checks inside one worker
    pub chunk_concurrency: usize,

    /// Timeout in milliseconds for one worker chunk
    pub chunk_timeout_ms: u64,

    /// Use dedicated worker threads for full-subnet scans
    pub worker_pool: bool,

    /// Concurrent port checks in the single-runtime fallback scan
    pub fallback_concurrency: usize,

    /// Wall clock in milliseconds for the fallback scan
    pub fallback_timeout_ms: u64,

    /// Outer bound in milliseconds for one whole discovery pass
    pub discovery_timeout_ms: u64,

    /// Timeout in milliseconds for the primary identification request
    pub identify_timeout_ms: u64,

    /// Timeout in milliseconds for each alternate identification request
    pub identify_alt_timeout_ms: u64,

    /// Concurrent identifications within a discovery pass
    pub identify_concurrency: usize,

    /// Identified devices are assumed to support timers
    pub assume_timer_support: bool,

    /// Identified devices are assumed to support schedules
    pub assume_schedule_support: bool,

    /// Timeout in milliseconds for a control request
    pub control_timeout_ms: u64,

    /// Milliseconds a completed discovery stays fresh
    pub cache_window_ms: u64,

    /// Seconds between status refresh cycles
    pub refresh_interval_secs: u64,

    /// Deadline in milliseconds for one refresh cycle
    pub refresh_cycle_timeout_ms: u64,

    /// Timeout in milliseconds for one status probe
    pub status_timeout_ms: u64,

    /// Capacity of the engine event queue
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            subnet: "192.168.1.0/24".to_string(),
            device_port: 80,
            known_addresses: Vec::new(),
            prefer_known_addresses: true,
            probe_timeout_ms: 300,
            chunk_size: 50,
            chunk_concurrency: 25,
            chunk_timeout_ms: 15_000,
            worker_pool: true,
            fallback_concurrency: 100,
            fallback_timeout_ms: 20_000,
            discovery_timeout_ms: 30_000,
            identify_timeout_ms: 5_000,
            identify_alt_timeout_ms: 3_000,
            identify_concurrency: 16,
            assume_timer_support: true,
            assume_schedule_support: true,
            control_timeout_ms: 5_000,
            cache_window_ms: 300_000,
            refresh_interval_secs: 30,
            refresh_cycle_timeout_ms: 10_000,
            status_timeout_ms: 5_000,
            event_capacity: 1000,
        }
    }
}

impl EngineConfig {
    /// Set the subnet scanned by full discovery
    pub fn with_subnet(mut self, subnet: impl Into<String>) -> Self {
        self.subnet = subnet.into();
        self
    }

    /// Set the device HTTP port
    pub fn with_device_port(mut self, port: u16) -> Self {
        self.device_port = port;
        self
    }

    /// Set the known-address allow-list
    pub fn with_known_addresses(mut self, addresses: impl IntoIterator<Item = Ipv4Addr>) -> Self {
        self.known_addresses = addresses.into_iter().collect();
        self
    }

    /// Enable or disable worker threads for full-subnet scans
    pub fn with_worker_pool(mut self, enabled: bool) -> Self {
        self.worker_pool = enabled;
        self
    }

    /// Set the discovery freshness window
    pub fn with_cache_window(mut self, window: Duration) -> Self {
        self.cache_window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn identify_timeout(&self) -> Duration {
        Duration::from_millis(self.identify_timeout_ms)
    }

    pub fn identify_alt_timeout(&self) -> Duration {
        Duration::from_millis(self.identify_alt_timeout_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn cache_window(&self) -> Duration {
        Duration::from_millis(self.cache_window_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn refresh_cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_cycle_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    /// Parse the configured subnet into its network address
    pub fn subnet_base(&self) -> Result<Ipv4Addr> {
        parse_subnet_24(&self.subnet)
    }

    /// Reject configurations the engine cannot honour
    pub fn validate(&self) -> Result<()> {
        self.subnet_base()?;

        let sizes = [
            ("chunk_size", self.chunk_size),
            ("chunk_concurrency", self.chunk_concurrency),
            ("fallback_concurrency", self.fallback_concurrency),
            ("identify_concurrency", self.identify_concurrency),
            ("event_capacity", self.event_capacity),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, value)| *value == 0) {
            return Err(EngineError::InvalidConfig(format!("{} must be at least 1", name)));
        }

        if self.probe_timeout_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "probe_timeout_ms must be at least 1".to_string(),
            ));
        }

        // Inner bounds must fit inside outer ones
        if self.probe_timeout_ms >= self.chunk_timeout_ms
            || self.probe_timeout_ms >= self.fallback_timeout_ms
        {
            return Err(EngineError::InvalidConfig(
                "probe_timeout_ms must be shorter than chunk and fallback timeouts".to_string(),
            ));
        }
        if self.chunk_timeout_ms >= self.discovery_timeout_ms
            || self.fallback_timeout_ms >= self.discovery_timeout_ms
        {
            return Err(EngineError::InvalidConfig(
                "chunk and fallback timeouts must be shorter than discovery_timeout_ms".to_string(),
            ));
        }
        if self.status_timeout_ms > self.refresh_cycle_timeout_ms {
            return Err(EngineError::InvalidConfig(
                "status_timeout_ms must not exceed refresh_cycle_timeout_ms".to_string(),
            ));
        }
        if self.refresh_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "refresh_interval_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse `a.b.c.d/24` into the network address `a.b.c.0`
pub(crate) fn parse_subnet_24(subnet: &str) -> Result<Ipv4Addr> {
    let base = subnet.strip_suffix("/24").ok_or_else(|| {
        EngineError::InvalidConfig(format!(
            "subnet '{}' must be in /24 CIDR format (e.g. 192.168.1.0/24)",
            subnet
        ))
    })?;

    let ip: Ipv4Addr = base.parse().map_err(|e| {
        EngineError::InvalidConfig(format!("invalid subnet address '{}': {}", base, e))
    })?;

    let [a, b, c, _] = ip.octets();
    Ok(Ipv4Addr::new(a, b, c, 0))
}
