//! Outbound notifications.
//!
//! The host exposes a generic event bus; the monitor only needs its publishing
//! half, modelled by [`EventPublisher`]. [`EventBus`] is an in-process bus with
//! the host's `subscribe(event_type)` / `publish(event_type, payload)` shape.

use crate::models::{Device, DeviceState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{trace, warn};

pub const DEFAULT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Generic "a plugin has something to say" channel; consumers filter by
    /// `source_id` and `event_name`.
    PluginTriggered,
}

/// Payload sent on every device transition (and on first observation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub source_id: String,
    /// `device_online` or `device_offline`
    pub event_name: String,
    pub device_name: String,
    pub device_address: String,
    pub device_port: Option<u16>,
    pub status: DeviceState,
    pub timestamp: DateTime<Utc>,
}

impl DeviceEvent {
    pub fn transition(source_id: &str, device: &Device, status: DeviceState, timestamp: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.to_string(),
            event_name: format!("device_{}", status),
            device_name: device.name.clone(),
            device_address: device.address.clone(),
            device_port: device.port.as_ref().and_then(|p| p.number()),
            status,
            timestamp,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("no subscribers for {0:?}")]
    NoSubscribers(EventType),
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("rejected by consumer: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event_type: EventType, event: &DeviceEvent) -> Result<(), PublishError>;
}

#[derive(Debug, Clone)]
pub struct HostEvent {
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

impl HostEvent {
    /// Decodes the payload as a device event emitted by `source_id`.
    pub fn device_event(&self, source_id: &str) -> Option<DeviceEvent> {
        if self.event_type != EventType::PluginTriggered {
            return None;
        }
        serde_json::from_value::<DeviceEvent>(self.payload.clone())
            .ok()
            .filter(|event| event.source_id == source_id)
    }
}

/// In-process broadcast bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<HostEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self, event_type: EventType) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            event_type,
        }
    }

    /// Returns the number of receivers the event reached.
    pub fn publish(&self, event_type: EventType, payload: serde_json::Value) -> Result<usize, PublishError> {
        let event = Arc::new(HostEvent { event_type, payload });
        let count = self
            .sender
            .send(event)
            .map_err(|_| PublishError::NoSubscribers(event_type))?;
        trace!(?event_type, receivers = count, "event published");
        Ok(count)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event_type: EventType, event: &DeviceEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_value(event)?;
        EventBus::publish(self, event_type, payload).map(|_| ())
    }
}

/// Receives the events of one type from an [`EventBus`].
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<HostEvent>>,
    event_type: EventType,
}

impl EventReceiver {
    /// Next matching event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<HostEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.event_type == self.event_type => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event receiver lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
