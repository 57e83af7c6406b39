/*!
Mock publisher for development without a host event bus

Records every device event the monitor publishes and can be switched into a
failing mode to simulate a consumer-side error.
*/

use async_trait::async_trait;
use devicecheck::events::{DeviceEvent, EventPublisher, EventType, PublishError};
use devicecheck::DeviceState;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event_type: EventType,
    pub event: DeviceEvent,
}

/// Mock publisher standing in for the host event bus
#[derive(Clone, Default)]
pub struct MockPublisher {
    published_events: Arc<Mutex<Vec<PublishedEvent>>>,
    attempts: Arc<Mutex<usize>>,
    failing: Arc<AtomicBool>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publisher rejecting every event.
    pub fn failing() -> Self {
        let publisher = Self::new();
        publisher.set_failing(true);
        publisher
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Every publish call, accepted or rejected.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }

    pub fn get_published_events(&self) -> Vec<DeviceEvent> {
        self.published_events.lock().iter().map(|p| p.event.clone()).collect()
    }

    pub fn find_events_by_device(&self, device_name: &str) -> Vec<DeviceEvent> {
        self.get_published_events()
            .into_iter()
            .filter(|event| event.device_name == device_name)
            .collect()
    }

    pub fn statuses_for(&self, device_name: &str) -> Vec<DeviceState> {
        self.find_events_by_device(device_name)
            .into_iter()
            .map(|event| event.status)
            .collect()
    }

    pub fn last_event(&self) -> Option<DeviceEvent> {
        self.published_events.lock().last().map(|p| p.event.clone())
    }

    /// Last event as the JSON payload consumers receive.
    pub fn last_json_event(&self) -> anyhow::Result<Option<serde_json::Value>> {
        match self.last_event() {
            Some(event) => Ok(Some(serde_json::to_value(event)?)),
            None => Ok(None),
        }
    }

    pub fn clear(&self) {
        self.published_events.lock().clear();
        *self.attempts.lock() = 0;
    }
}

#[async_trait]
impl EventPublisher for MockPublisher {
    async fn publish(&self, event_type: EventType, event: &DeviceEvent) -> Result<(), PublishError> {
        *self.attempts.lock() += 1;
        if self.failing.load(Ordering::Relaxed) {
            return Err(PublishError::Rejected("mock publisher in failing mode".into()));
        }

        self.published_events.lock().push(PublishedEvent {
            event_type,
            event: event.clone(),
        });
        info!("[MOCK] published {} for {}", event.event_name, event.device_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devicecheck::{Device, Port};

    fn nas_event(status: DeviceState) -> DeviceEvent {
        let device = Device::new("NAS", "10.0.0.5").with_port(Port::Valid(445));
        DeviceEvent::transition("DeviceCheck", &device, status, chrono::Utc::now())
    }

    #[tokio::test]
    async fn test_mock_publisher_records() {
        let publisher = MockPublisher::new();
        publisher
            .publish(EventType::PluginTriggered, &nas_event(DeviceState::Online))
            .await
            .unwrap();

        assert_eq!(publisher.attempts(), 1);
        assert_eq!(publisher.statuses_for("NAS"), vec![DeviceState::Online]);

        let json = publisher.last_json_event().unwrap().unwrap();
        assert_eq!(json["event_name"], "device_online");
        assert_eq!(json["device_port"], 445);
    }

    #[tokio::test]
    async fn test_failing_mode() {
        let publisher = MockPublisher::failing();
        let result = publisher
            .publish(EventType::PluginTriggered, &nas_event(DeviceState::Offline))
            .await;

        assert!(matches!(result, Err(PublishError::Rejected(_))));
        assert_eq!(publisher.attempts(), 1);
        assert!(publisher.get_published_events().is_empty());

        publisher.clear();
        assert_eq!(publisher.attempts(), 0);
    }
}
