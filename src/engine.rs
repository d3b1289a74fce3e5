use crate::config::EngineConfig;
use crate::device_client::DeviceClient;
use crate::dispatcher::ControlDispatcher;
use crate::error::Result;
use crate::events::{EngineEvent, EventReceiver, EventSender};
use crate::identifier::DeviceIdentifier;
use crate::prober::NetworkProber;
use crate::refresher::{StatusProbe, StatusRefresher};
use crate::registry::{DeviceRegistry, ScanBatch, ScanScope};
use crate::types::{ControlRequest, ControlResult, Device, DeviceStatus, ScanRecord};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};

/// Discovery gate state
#[derive(Default)]
struct DiscoveryState {
    last_completed: Option<Instant>,
}

/// Device discovery and control engine
///
/// Owns the registry and wires prober, identifier, dispatcher and refresher
/// around it. Share it behind an `Arc`; every method takes `&self`.
///
/// # Example
///
/// ```no_run
/// use sonoff_lan::{DeviceEngine, Directive, EngineConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = DeviceEngine::new(EngineConfig::default())?;
///     engine.start().await;
///
///     for device in engine.discover(false).await {
///         println!("{} at {} is {}", device.name, device.ip_address, device.power_state);
///     }
///
///     if let Some(device) = engine.list_devices().first() {
///         let result = engine.control_device(&device.id, Directive::Toggle).await?;
///         println!("{}", result.message);
///     }
///
///     engine.stop().await;
///     Ok(())
/// }
/// ```
pub struct DeviceEngine {
    config: EngineConfig,
    subnet_base: Ipv4Addr,
    registry: Arc<DeviceRegistry>,
    prober: NetworkProber,
    identifier: Arc<DeviceIdentifier>,
    dispatcher: ControlDispatcher,
    // Lifecycle of the background loop only
    refresher: Mutex<StatusRefresher>,
    // On-demand refreshes, never behind the lifecycle lock
    status: Arc<StatusProbe>,
    events: EventSender,
    // Single-flight gate for discovery passes
    discovery: Mutex<DiscoveryState>,
    // Bumped once per completed pass, while the gate is held
    passes: AtomicU64,
}

impl DeviceEngine {
    /// Build an engine with an empty registry
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let subnet_base = config.subnet_base()?;
        let client = DeviceClient::new()?;
        let registry = Arc::new(DeviceRegistry::new());
        let events = EventSender::new(config.event_capacity);

        let dispatcher = ControlDispatcher::new(
            registry.clone(),
            client.clone(),
            events.clone(),
            config.control_timeout(),
        );
        let refresher = StatusRefresher::new(
            registry.clone(),
            client.clone(),
            events.clone(),
            config.refresh_interval(),
            config.status_timeout(),
            config.refresh_cycle_timeout(),
        );

        Ok(Self {
            subnet_base,
            prober: NetworkProber::new(&config),
            identifier: Arc::new(DeviceIdentifier::new(client, &config)),
            dispatcher,
            status: refresher.probe(),
            refresher: Mutex::new(refresher),
            registry,
            events,
            discovery: Mutex::new(DiscoveryState::default()),
            passes: AtomicU64::new(0),
            config,
        })
    }

    /// Start the status refresher and run an initial discovery
    pub async fn start(&self) {
        tracing::info!("Starting device engine");
        self.refresher.lock().await.start().await;
        let devices = self.discover(false).await;
        tracing::info!("Device engine started with {} device(s)", devices.len());
    }

    /// Stop the status refresher; the registry is kept
    pub async fn stop(&self) {
        tracing::info!("Stopping device engine");
        self.refresher.lock().await.stop().await;
    }

    /// Whether the background status refresher is running
    pub async fn is_refreshing(&self) -> bool {
        self.refresher.lock().await.is_running()
    }

    /// Shared handle to the registry
    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    /// Subscribe to engine events
    pub fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Scope used by [`discover`](Self::discover)
    ///
    /// The known-address list when it is set and preferred, otherwise the
    /// whole subnet.
    pub fn default_scope(&self) -> ScanScope {
        if self.config.prefer_known_addresses && !self.config.known_addresses.is_empty() {
            ScanScope::KnownAddresses(self.config.known_addresses.clone())
        } else {
            ScanScope::FullSubnet
        }
    }

    /// Discover devices using the default scope
    pub async fn discover(&self, force_refresh: bool) -> Vec<Device> {
        self.discover_scoped(self.default_scope(), force_refresh).await
    }

    /// Discover devices in `scope` and return the registry snapshot
    ///
    /// Passes are serialized. A caller that waited behind another pass gets
    /// that pass's result; otherwise a pass completed within the freshness
    /// window is reused unless `force_refresh` is set.
    pub async fn discover_scoped(&self, scope: ScanScope, force_refresh: bool) -> Vec<Device> {
        let observed = self.passes.load(Ordering::Acquire);
        let mut state = self.discovery.lock().await;

        if self.passes.load(Ordering::Acquire) != observed {
            tracing::debug!("Joined result of concurrent discovery pass");
            return self.registry.list();
        }

        if !force_refresh {
            if let Some(last) = state.last_completed {
                if last.elapsed() < self.config.cache_window() {
                    tracing::info!("Using cached device discovery results");
                    return self.registry.list();
                }
            }
        }

        let started = Instant::now();
        tracing::info!("Starting device discovery ({:?})", scope);

        let batch = self.scan(scope).await;
        let report = self.registry.reconcile(batch);
        let devices = self.registry.list();

        state.last_completed = Some(Instant::now());
        self.passes.fetch_add(1, Ordering::Release);

        tracing::info!(
            added = report.added.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            "Device discovery completed in {:?}: {} device(s)",
            started.elapsed(),
            devices.len()
        );

        self.events.emit(EngineEvent::DevicesReconciled {
            report,
            devices: devices.clone(),
        });

        devices
    }

    /// Probe and identify everything in `scope` before the discovery deadline
    async fn scan(&self, scope: ScanScope) -> ScanBatch {
        let deadline = Instant::now() + self.config.discovery_timeout();

        let probing = async {
            match &scope {
                ScanScope::FullSubnet => self.prober.probe_subnet(self.subnet_base).await,
                ScanScope::KnownAddresses(addresses) => {
                    self.prober.probe_addresses(addresses).await
                }
            }
        };

        let (records, complete) = match timeout_at(deadline, probing).await {
            Ok(open) => self.identify_all(open, deadline).await,
            Err(_) => {
                tracing::warn!("Port probing exceeded the discovery timeout");
                (Vec::new(), false)
            }
        };

        ScanBatch {
            scope,
            records,
            complete,
        }
    }

    /// Identify open hosts concurrently; `false` if the deadline cut it short
    async fn identify_all(
        &self,
        open: Vec<Ipv4Addr>,
        deadline: Instant,
    ) -> (Vec<ScanRecord>, bool) {
        if open.is_empty() {
            return (Vec::new(), true);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.identify_concurrency));
        let mut tasks = JoinSet::new();
        for ip in open {
            let identifier = self.identifier.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                identifier.identify(ip).await
            });
        }

        let mut records = Vec::new();
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(Some(record)))) => records.push(record),
                Ok(Some(Ok(None))) => {}
                Ok(Some(Err(e))) => tracing::warn!("Identification task failed: {}", e),
                Ok(None) => return (records, true),
                Err(_) => {
                    tracing::warn!(
                        "Discovery timeout reached with {} identification(s) outstanding",
                        tasks.len()
                    );
                    tasks.abort_all();
                    return (records, false);
                }
            }
        }
    }

    /// Send a power directive to a device
    pub async fn control_device(
        &self,
        device_id: &str,
        request: impl Into<ControlRequest>,
    ) -> Result<ControlResult> {
        self.dispatcher.dispatch(device_id, request.into()).await
    }

    /// Probe one device's status now and return its snapshot
    pub async fn refresh_device(&self, device_id: &str) -> Option<Device> {
        self.status.refresh_device(device_id).await
    }

    /// Run one refresh cycle now and return the devices it updated
    pub async fn refresh_all(&self) -> Vec<Device> {
        self.status.run_cycle().await
    }

    pub fn get_device(&self, device_id: &str) -> Option<Device> {
        self.registry.get(device_id)
    }

    pub fn get_device_by_ip(&self, ip: Ipv4Addr) -> Option<Device> {
        self.registry.get_by_ip(ip)
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.registry.list()
    }

    pub fn device_count(&self) -> usize {
        self.registry.len()
    }

    pub fn online_count(&self) -> usize {
        self.registry.online_count()
    }

    pub fn status_counts(&self) -> HashMap<DeviceStatus, usize> {
        self.registry.status_counts()
    }
}
