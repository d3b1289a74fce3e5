use crate::device_client::DeviceClient;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSender};
use crate::protocol::{self, TOGGLE_PATH};
use crate::registry::DeviceRegistry;
use crate::types::{ControlRequest, ControlResult, Device, Directive, PowerState};
use std::sync::Arc;
use std::time::Duration;

/// Sends power directives to devices
///
/// Exactly one request per directive, no retries. The registry is only
/// touched after the device confirms.
pub struct ControlDispatcher {
    registry: Arc<DeviceRegistry>,
    client: DeviceClient,
    events: EventSender,
    timeout: Duration,
}

impl ControlDispatcher {
    pub(crate) fn new(
        registry: Arc<DeviceRegistry>,
        client: DeviceClient,
        events: EventSender,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            events,
            timeout,
        }
    }

    /// Dispatch `request` to the device with id `device_id`
    pub async fn dispatch(
        &self,
        device_id: &str,
        request: ControlRequest,
    ) -> Result<ControlResult> {
        let device = self
            .registry
            .get(device_id)
            .ok_or_else(|| EngineError::DeviceNotFound(device_id.to_string()))?;

        if request.schedule.is_some() {
            tracing::debug!(device_id, "Schedule payload is not forwarded to the device");
        }

        let directive = request.directive;
        let outcome = self.send(&device, &request).await.and_then(|()| {
            self.registry
                .record_control(device_id, |current| directive.resolve(current))
                .ok_or_else(|| EngineError::DeviceNotFound(device_id.to_string()))
        });

        match outcome {
            Ok(updated) => {
                let message = format!("Device {} {} successfully", device_id, directive);
                tracing::info!(
                    device_id,
                    %directive,
                    power_state = %updated.power_state,
                    "Control dispatched"
                );

                self.events.emit(EngineEvent::ControlDispatched {
                    device_id: device_id.to_string(),
                    directive,
                    success: true,
                    power_state: Some(updated.power_state),
                    message: message.clone(),
                });

                Ok(ControlResult {
                    device_id: updated.id,
                    power_state: updated.power_state,
                    control_count: updated.control_count,
                    message,
                })
            }
            Err(e) => {
                tracing::warn!(device_id, %directive, "Control failed: {}", e);

                self.events.emit(EngineEvent::ControlDispatched {
                    device_id: device_id.to_string(),
                    directive,
                    success: false,
                    power_state: Some(device.power_state),
                    message: e.to_string(),
                });

                Err(match e {
                    EngineError::DeviceNotFound(_) => e,
                    other => EngineError::ControlFailed {
                        device_id: device_id.to_string(),
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// Issue the single control request and check the confirmation
    async fn send(&self, device: &Device, request: &ControlRequest) -> Result<()> {
        let path = control_path(request);
        let reply = self
            .client
            .get(device.ip_address, device.port, &path, self.timeout)
            .await?;

        if !reply.is_success() {
            return Err(EngineError::InvalidResponse(format!(
                "device answered HTTP {}",
                reply.status
            )));
        }
        if !protocol::is_success_response(&reply.body) {
            return Err(EngineError::InvalidResponse(format!(
                "no success confirmation in reply: {}",
                truncate(&reply.body, 120)
            )));
        }

        Ok(())
    }
}

/// Request path for a control request, including the optional timer
pub(crate) fn control_path(request: &ControlRequest) -> String {
    let path = match request.directive {
        Directive::Toggle => TOGGLE_PATH.to_string(),
        Directive::On => protocol::switch_path(PowerState::On),
        Directive::Off => protocol::switch_path(PowerState::Off),
    };

    match request.timer {
        Some(seconds) => format!("{}?timer={}", path, seconds),
        None => path,
    }
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}
