use crate::device_client::DeviceClient;
use crate::events::{EngineEvent, EventSender};
use crate::protocol::{self, STATUS_PATH};
use crate::registry::DeviceRegistry;
use crate::types::Device;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant, MissedTickBehavior};

/// Polls every known device's status on a fixed interval
///
/// The loop runs as a background task; a cycle never blocks discovery or
/// control, and no probe failure ever stops the loop.
pub struct StatusRefresher {
    probe: Arc<StatusProbe>,
    interval: Duration,
    stop_tx: Option<broadcast::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

/// Status probing, shared by the background task and on-demand refreshes
pub(crate) struct StatusProbe {
    registry: Arc<DeviceRegistry>,
    client: DeviceClient,
    events: EventSender,
    status_timeout: Duration,
    cycle_timeout: Duration,
}

impl StatusRefresher {
    pub(crate) fn new(
        registry: Arc<DeviceRegistry>,
        client: DeviceClient,
        events: EventSender,
        interval: Duration,
        status_timeout: Duration,
        cycle_timeout: Duration,
    ) -> Self {
        Self {
            probe: Arc::new(StatusProbe {
                registry,
                client,
                events,
                status_timeout,
                cycle_timeout,
            }),
            interval,
            stop_tx: None,
            task_handle: None,
        }
    }

    /// Whether the background loop is running
    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the background loop
    ///
    /// If the loop is already running, it will be stopped and restarted.
    pub async fn start(&mut self) {
        self.stop().await;

        let (stop_tx, _) = broadcast::channel(1);
        let mut stop_rx = stop_tx.subscribe();
        self.stop_tx = Some(stop_tx);

        let probe = self.probe.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            tracing::info!("Starting status refresher (every {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = probe.run_cycle() => {}
                }
            }

            tracing::info!("Status refresher stopped");
        });

        self.task_handle = Some(handle);
    }

    /// Stop the background loop
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            // Give it a moment to stop gracefully
            let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
        }
    }

    /// Shared handle for on-demand probing outside the background loop
    pub(crate) fn probe(&self) -> Arc<StatusProbe> {
        self.probe.clone()
    }
}

impl Drop for StatusRefresher {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

impl StatusProbe {
    /// Probe one device now
    ///
    /// Returns the device's snapshot after the attempt, or `None` if the id
    /// is unknown. A failed probe leaves the snapshot as it was.
    pub(crate) async fn refresh_device(&self, device_id: &str) -> Option<Device> {
        let device = self.registry.get(device_id)?;
        if let Some(updated) = self.probe(device).await {
            self.events.emit(EngineEvent::TelemetryRefreshed {
                devices: vec![updated],
            });
        }
        self.registry.get(device_id)
    }

    /// Probe every registered device concurrently under the cycle deadline
    ///
    /// Returns the devices that were updated.
    pub(crate) async fn run_cycle(self: &Arc<Self>) -> Vec<Device> {
        let devices = self.registry.list();
        if devices.is_empty() {
            tracing::trace!("Registry empty, skipping refresh cycle");
            return Vec::new();
        }

        let total = devices.len();
        let mut probes = JoinSet::new();
        for device in devices {
            let this = self.clone();
            probes.spawn(async move { this.probe(device).await });
        }

        let deadline = Instant::now() + self.cycle_timeout;
        let mut updated = Vec::new();
        loop {
            match timeout_at(deadline, probes.join_next()).await {
                Ok(Some(Ok(Some(device)))) => updated.push(device),
                Ok(Some(Ok(None))) => {}
                Ok(Some(Err(e))) => tracing::warn!("Status probe task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!(
                        "Refresh cycle hit its {:?} deadline, abandoning {} probe(s)",
                        self.cycle_timeout,
                        probes.len()
                    );
                    probes.abort_all();
                    break;
                }
            }
        }

        tracing::debug!("Refresh cycle updated {}/{} device(s)", updated.len(), total);
        if !updated.is_empty() {
            updated.sort_by(|a, b| a.id.cmp(&b.id));
            self.events.emit(EngineEvent::TelemetryRefreshed {
                devices: updated.clone(),
            });
        }

        updated
    }

    /// One status request; `Some` with the new snapshot when it was applied
    async fn probe(&self, device: Device) -> Option<Device> {
        let reply = match self
            .client
            .get(device.ip_address, device.port, STATUS_PATH, self.status_timeout)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(device_id = %device.id, "Status probe failed: {}", e);
                return None;
            }
        };

        if !reply.is_ok() {
            tracing::debug!(device_id = %device.id, status = reply.status, "Status probe rejected");
            return None;
        }

        match protocol::parse_status(&reply.body) {
            Some(report) => self.registry.record_status(&device.id, report),
            None => {
                tracing::debug!(device_id = %device.id, "Unparseable status reply");
                None
            }
        }
    }
}
