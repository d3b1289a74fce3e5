//! Rust library for discovering and controlling Sonoff-style WiFi power switches
//!
//! This library provides an async engine that finds power switches on a local
//! IPv4 /24 network over plain HTTP and keeps an authoritative registry of
//! them. It supports:
//!
//! - Subnet sweeps via parallel worker threads, with an in-process fallback
//! - Targeted scans of a known address list
//! - Device identification by vendor response heuristics
//! - Registry reconciliation that never drops devices outside a scan's scope
//! - Power control (on, off, toggle) with control counting
//! - Periodic status and telemetry refresh
//! - Event subscriptions for reconciliation, control and refresh
//!
//! # Quick Start
//!
//! ```no_run
//! use sonoff_lan::{DeviceEngine, Directive, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default().with_subnet("192.168.1.0/24");
//!     let engine = DeviceEngine::new(config)?;
//!
//!     // Initial discovery plus background status refresh
//!     engine.start().await;
//!
//!     for device in engine.list_devices() {
//!         println!("Found {} ({:?}) at {}", device.name, device.device_type, device.ip_address);
//!     }
//!
//!     if let Some(device) = engine.list_devices().first() {
//!         let result = engine.control_device(&device.id, Directive::On).await?;
//!         println!("{} is now {}", result.device_id, result.power_state);
//!     }
//!
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Known Addresses
//!
//! If you know where your devices live, scan only those addresses. Devices
//! registered elsewhere are left untouched by such a scan:
//!
//! ```no_run
//! use sonoff_lan::{DeviceEngine, EngineConfig, ScanScope};
//! use std::net::Ipv4Addr;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = DeviceEngine::new(EngineConfig::default())?;
//!     let scope = ScanScope::KnownAddresses(vec![Ipv4Addr::new(192, 168, 1, 216)]);
//!     let devices = engine.discover_scoped(scope, true).await;
//!     println!("{} device(s) registered", devices.len());
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Engine**: Discovery gate, freshness cache and the public API
//! - **Prober**: TCP reachability sweeps
//! - **Identifier**: Vendor detection and device info extraction
//! - **Registry**: Authoritative device map and reconciliation
//! - **Dispatcher**: Power directives
//! - **Refresher**: Background status polling
//! - **Protocol**: Device HTTP paths and payload parsing
//! - **Types**: Domain types and data structures

mod config;
mod device_client;
mod dispatcher;
mod engine;
mod error;
mod events;
mod identifier;
mod prober;
mod protocol;
mod refresher;
mod registry;
mod types;

// Public exports
pub use config::EngineConfig;
pub use device_client::{DeviceClient, HttpReply};
pub use engine::DeviceEngine;
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventReceiver, EventRecvError};
pub use identifier::DeviceIdentifier;
pub use prober::{check_port, subnet_hosts, NetworkProber, PortState};
pub use protocol::{parse_device_info, parse_status, DeviceInfoPayload, StatusReport};
pub use registry::{DeviceRegistry, ReconcileReport, ScanBatch, ScanScope};
pub use types::{
    device_id_for, Capabilities, ConnectionType, ControlRequest, ControlResult, Device, DeviceId,
    DeviceStatus, DeviceType, Directive, PowerState, ScanRecord, Telemetry,
};
