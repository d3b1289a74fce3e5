//! Canonical in-memory map of device id → device record
//!
//! The registry is the only owner of [`Device`] entries. Discovery feeds it
//! [`ScanBatch`]es through [`DeviceRegistry::reconcile`]; the dispatcher and
//! refresher mutate individual entries through narrow methods. Readers get
//! cloned snapshots.

use crate::protocol::StatusReport;
use crate::types::{Device, DeviceId, DeviceStatus, PowerState, ScanRecord};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

/// Which addresses a scan batch covered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanScope {
    /// Every host of the configured subnet
    FullSubnet,
    /// Only these addresses
    KnownAddresses(Vec<Ipv4Addr>),
}

impl ScanScope {
    /// Whether an entry at `ip` may be removed when absent from a batch of this scope
    fn covers(&self, ip: Ipv4Addr) -> bool {
        match self {
            ScanScope::FullSubnet => true,
            ScanScope::KnownAddresses(addresses) => addresses.contains(&ip),
        }
    }
}

/// Identified records from one discovery pass
#[derive(Debug, Clone)]
pub struct ScanBatch {
    pub scope: ScanScope,
    pub records: Vec<ScanRecord>,
    /// False when the pass hit its deadline before every host was identified
    pub complete: bool,
}

/// Ids touched by one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: Vec<DeviceId>,
    pub updated: Vec<DeviceId>,
    pub removed: Vec<DeviceId>,
}

/// Device registry
#[derive(Default)]
pub struct DeviceRegistry {
    devices: Mutex<BTreeMap<DeviceId, Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Entries stay consistent even if a holder panicked: every mutation
    // below completes before the guard is dropped.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<DeviceId, Device>> {
        self.devices.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Merge a scan batch into the registry
    ///
    /// Records present in the registry are updated in place without touching
    /// network identity, power state or control counters; new records are
    /// inserted. Entries absent from the batch are removed only if the batch
    /// is complete and its scope covered their address.
    pub fn reconcile(&self, batch: ScanBatch) -> ReconcileReport {
        let now = Utc::now();
        let mut report = ReconcileReport::default();

        // Last record wins for duplicate ids
        let mut incoming: BTreeMap<DeviceId, ScanRecord> = BTreeMap::new();
        for record in batch.records {
            incoming.insert(record.id.clone(), record);
        }
        let incoming_addresses: BTreeSet<Ipv4Addr> =
            incoming.values().map(|record| record.ip_address).collect();

        let mut devices = self.lock();

        if batch.complete {
            let stale: Vec<DeviceId> = devices
                .values()
                .filter(|device| !incoming.contains_key(&device.id))
                .filter(|device| batch.scope.covers(device.ip_address))
                .map(|device| device.id.clone())
                .collect();
            for id in stale {
                devices.remove(&id);
                tracing::info!(device_id = %id, "Removed device");
                report.removed.push(id);
            }
        } else {
            // An address re-identified under a new id must not leave its old
            // entry behind, even when the batch is partial
            let superseded: Vec<DeviceId> = devices
                .values()
                .filter(|device| !incoming.contains_key(&device.id))
                .filter(|device| incoming_addresses.contains(&device.ip_address))
                .map(|device| device.id.clone())
                .collect();
            for id in superseded {
                devices.remove(&id);
                tracing::info!(device_id = %id, "Removed superseded device");
                report.removed.push(id);
            }
        }

        for (id, record) in incoming {
            match devices.get_mut(&id) {
                Some(device) => {
                    apply_record(device, record, now);
                    report.updated.push(id);
                }
                None => {
                    let device = record.into_device(now);
                    tracing::info!(
                        device_id = %id,
                        ip = %device.ip_address,
                        "Created device {}",
                        device.name
                    );
                    devices.insert(id.clone(), device);
                    report.added.push(id);
                }
            }
        }

        report
    }

    /// Snapshot of every device, ordered by id
    pub fn list(&self) -> Vec<Device> {
        self.lock().values().cloned().collect()
    }

    /// Snapshot of one device
    pub fn get(&self, id: &str) -> Option<Device> {
        self.lock().get(id).cloned()
    }

    /// Snapshot of the device at `ip`
    pub fn get_by_ip(&self, ip: Ipv4Addr) -> Option<Device> {
        self.lock().values().find(|device| device.ip_address == ip).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of devices currently marked online
    pub fn online_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|device| device.status == DeviceStatus::Online)
            .count()
    }

    /// Device counts per status
    pub fn status_counts(&self) -> HashMap<DeviceStatus, usize> {
        let mut counts = HashMap::new();
        for device in self.lock().values() {
            *counts.entry(device.status).or_insert(0) += 1;
        }
        counts
    }

    /// Record a confirmed control directive
    ///
    /// `resolve` maps the last known power state to the new one. Returns the
    /// updated snapshot, or `None` if the device disappeared meanwhile.
    pub(crate) fn record_control(
        &self,
        id: &str,
        resolve: impl FnOnce(PowerState) -> PowerState,
    ) -> Option<Device> {
        let mut devices = self.lock();
        let device = devices.get_mut(id)?;
        let now = Utc::now();

        device.power_state = resolve(device.power_state);
        device.status = DeviceStatus::Online;
        device.control_count += 1;
        device.last_seen = now;
        device.last_control = Some(now);

        Some(device.clone())
    }

    /// Apply a successful status probe
    pub(crate) fn record_status(&self, id: &str, report: StatusReport) -> Option<Device> {
        let mut devices = self.lock();
        let device = devices.get_mut(id)?;

        if let Some(power_state) = report.power_state {
            device.power_state = power_state;
        }
        if device.capabilities.supports_power_monitoring {
            device.telemetry = Some(report.telemetry);
        }
        device.status = DeviceStatus::Online;
        device.last_seen = Utc::now();

        Some(device.clone())
    }
}

/// Refresh descriptive fields of an existing entry from a new record
fn apply_record(device: &mut Device, record: ScanRecord, now: chrono::DateTime<Utc>) {
    device.name = record.name;
    device.model = record.model;
    device.device_type = record.device_type;
    device.capabilities = record.capabilities;
    if record.firmware_version.is_some() {
        device.firmware_version = record.firmware_version;
    }
    if record.hardware_version.is_some() {
        device.hardware_version = record.hardware_version;
    }
    if !device.capabilities.supports_power_monitoring {
        device.telemetry = None;
    }
    device.last_seen = now;
}
