/*!
Test harness for the device monitor

Wires a [`DeviceMonitor`] to a scripted prober and a recording publisher with
fast timings, then offers:
- Inline cycles or a real background worker
- Waiting on notifications with a deadline
- Assertions on the notification sequence and the status cache
*/

use crate::bus_stub::MockPublisher;
use crate::probe_stub::ScriptedProber;
use anyhow::Result;
use devicecheck::models::DeviceKey;
use devicecheck::monitor::StopHandle;
use devicecheck::{CycleOutcome, Device, DeviceMonitor, DeviceState, MonitorPlan, MonitorSettings, PLUGIN_ID};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Timings short enough to run many cycles in a test.
pub fn fast_settings() -> MonitorSettings {
    MonitorSettings {
        check_interval: Duration::from_millis(20),
        probe_timeout: Duration::from_millis(100),
        pacing_delay: Duration::ZERO,
        error_backoff: Duration::from_millis(20),
    }
}

pub struct TestHarness {
    pub prober: ScriptedProber,
    pub publisher: MockPublisher,
    pub monitor: DeviceMonitor,
}

impl TestHarness {
    pub fn new(devices: Vec<Device>) -> Self {
        tracing_subscriber::fmt().with_test_writer().try_init().ok();

        let prober = ScriptedProber::new();
        let publisher = MockPublisher::new();
        let monitor = DeviceMonitor::new(PLUGIN_ID, Arc::new(prober.clone()), Arc::new(publisher.clone()))
            .with_plan(MonitorPlan {
                devices,
                settings: fast_settings(),
            });

        Self {
            prober,
            publisher,
            monitor,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.monitor.stop_handle()
    }

    /// Replaces the device list, keeping the fast timings.
    pub fn reconfigure(&self, devices: Vec<Device>) {
        self.monitor.configure(MonitorPlan {
            devices,
            settings: fast_settings(),
        });
    }

    pub async fn run_cycle(&self) -> CycleOutcome {
        self.monitor.run_cycle().await
    }

    pub async fn run_cycles(&self, count: usize) -> CycleOutcome {
        for _ in 0..count {
            if self.run_cycle().await == CycleOutcome::Stopped {
                return CycleOutcome::Stopped;
            }
        }
        CycleOutcome::Completed
    }

    /// Polls until `count` notifications were published or the deadline passes.
    pub async fn wait_for_events(&self, count: usize, timeout_ms: u64) -> bool {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if self.publisher.get_published_events().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        warn!("timeout waiting for {} events", count);
        false
    }

    pub fn cached_status(&self, device: &Device) -> Option<DeviceState> {
        self.monitor.statuses().get(&device.key()).map(|cached| cached.status)
    }

    /// Assert the exact notification sequence for one device
    pub fn assert_notified(&self, device_name: &str, expected: &[DeviceState]) -> Result<()> {
        let actual = self.publisher.statuses_for(device_name);
        if actual != expected {
            anyhow::bail!(
                "notifications for '{}': expected {:?}, got {:?}",
                device_name,
                expected,
                actual
            );
        }
        info!("'{}' notified {:?} as expected", device_name, expected);
        Ok(())
    }

    pub fn assert_cached(&self, device: &Device, expected: DeviceState) -> Result<()> {
        match self.cached_status(device) {
            Some(actual) if actual == expected => Ok(()),
            other => anyhow::bail!("cache for '{}': expected {:?}, got {:?}", device.key(), expected, other),
        }
    }

    pub fn get_stats(&self) -> TestStats {
        let mut events_per_device = HashMap::new();
        for event in self.publisher.get_published_events() {
            *events_per_device.entry(event.device_name).or_insert(0) += 1;
        }

        TestStats {
            probes: self.prober.calls().len(),
            publish_attempts: self.publisher.attempts(),
            events_per_device,
            cached_keys: self.monitor.statuses().into_keys().collect(),
        }
    }
}

#[derive(Debug)]
pub struct TestStats {
    pub probes: usize,
    pub publish_attempts: usize,
    pub events_per_device: HashMap<String, usize>,
    pub cached_keys: Vec<DeviceKey>,
}
