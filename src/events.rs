use crate::registry::ReconcileReport;
use crate::types::{Device, DeviceId, Directive, PowerState};
use serde::Serialize;
use tokio::sync::broadcast;

/// Notification emitted by the engine
///
/// Events are fire-and-forget: the engine never waits for or depends on a
/// subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A discovery pass was merged into the registry
    DevicesReconciled {
        report: ReconcileReport,
        devices: Vec<Device>,
    },

    /// A control directive was dispatched
    ControlDispatched {
        device_id: DeviceId,
        directive: Directive,
        success: bool,
        power_state: Option<PowerState>,
        message: String,
    },

    /// A refresh cycle updated these devices
    TelemetryRefreshed { devices: Vec<Device> },
}

/// Sending half of the engine event queue
#[derive(Clone)]
pub(crate) struct EventSender {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventSender {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Queue an event; having no subscribers is not an error
    pub(crate) fn emit(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    pub(crate) fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.tx.subscribe())
    }
}

/// Error returned when receiving engine events
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventRecvError {
    /// The engine was dropped
    #[error("Event queue closed")]
    Closed,

    /// The receiver fell behind and missed events
    #[error("Lagged by {0} events")]
    Lagged(u64),
}

/// Receiver for engine events
pub struct EventReceiver {
    rx: broadcast::Receiver<EngineEvent>,
}

impl EventReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<EngineEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event
    ///
    /// A lagged receiver gets [`EventRecvError::Lagged`] once and then
    /// continues from the oldest event still queued.
    pub async fn recv(&mut self) -> Result<EngineEvent, EventRecvError> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventRecvError::Closed,
            broadcast::error::RecvError::Lagged(n) => EventRecvError::Lagged(n),
        })
    }

    /// Try to receive an event without waiting
    ///
    /// Returns `Ok(None)` if no event is queued.
    pub fn try_recv(&mut self) -> Result<Option<EngineEvent>, EventRecvError> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(EventRecvError::Closed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(EventRecvError::Lagged(n)),
        }
    }
}
