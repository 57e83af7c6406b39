use crate::models::{DeviceSnapshot, DeviceState};
use crate::monitor::MonitorView;
use crate::mqtt::STATUS_TOPIC;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::task::{self, JoinHandle};
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct MonitorReport {
    pub source_id: String,
    pub running: bool,
    pub uptime_seconds: u64,
    pub devices_online: usize,
    pub devices_offline: usize,
    pub devices: Vec<DeviceSnapshot>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct StatusTracker {
    source_id: String,
    start_time: Instant,
    view: MonitorView,
}

impl StatusTracker {
    pub fn new(source_id: &str, view: MonitorView) -> Self {
        Self {
            source_id: source_id.to_string(),
            start_time: Instant::now(),
            view,
        }
    }

    pub fn report(&self) -> MonitorReport {
        let devices = self.view.snapshot();
        let count = |state| devices.iter().filter(|d| d.status == Some(state)).count();

        MonitorReport {
            source_id: self.source_id.clone(),
            running: self.view.is_running(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            devices_online: count(DeviceState::Online),
            devices_offline: count(DeviceState::Offline),
            devices,
            timestamp: Utc::now(),
        }
    }

    /// Publishes the report every `every` until the task is aborted.
    pub fn spawn_status_publisher(&self, client: AsyncClient, every: Duration) -> JoinHandle<()> {
        let tracker = self.clone();

        task::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let report = tracker.report();
                info!(
                    "[status] {} devices ({} online, {} offline)",
                    report.devices.len(),
                    report.devices_online,
                    report.devices_offline
                );

                match serde_json::to_vec(&report) {
                    Ok(payload) => {
                        if let Err(e) = client.try_publish(STATUS_TOPIC, QoS::AtLeastOnce, false, payload) {
                            warn!("[status] failed to publish: {:?}", e);
                        }
                    }
                    Err(e) => warn!("[status] failed to encode report: {}", e),
                }
            }
        })
    }
}
