/*!
DEVICE CHECK PLUGIN - host lifecycle glue

The host drives plugins through three calls: `init_plugin` on every
configuration load, `get_state` to know whether the plugin is active, and
`stop_service` on shutdown or before a reload. This module maps those calls
onto a [`DeviceMonitor`].

Example configuration (text device list, one device per line):

```yaml
enabled: true
check_interval: 60
timeout: 3
devices: |
  Player#192.168.1.88#
  NAS#192.168.1.89#445
```
*/

use crate::config::DeviceCheckConfig;
use crate::events::EventPublisher;
use crate::models::DeviceSnapshot;
use crate::monitor::{DeviceMonitor, MonitorView, StartOutcome};
use crate::probe::Prober;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

pub const PLUGIN_ID: &str = "DeviceCheck";

/// Lifecycle contract the host expects from a plugin.
#[async_trait]
pub trait HostPlugin: Send {
    type Config: Send + 'static;

    fn plugin_id(&self) -> &str;

    /// Called on every configuration load. `None` leaves the plugin untouched.
    async fn init_plugin(&mut self, config: Option<Self::Config>);

    fn get_state(&self) -> bool;

    async fn stop_service(&mut self);
}

pub struct DeviceCheckPlugin {
    enabled: bool,
    monitor: DeviceMonitor,
}

impl DeviceCheckPlugin {
    pub fn new(prober: Arc<dyn Prober>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            enabled: false,
            monitor: DeviceMonitor::new(PLUGIN_ID, prober, publisher),
        }
    }

    pub fn monitor(&self) -> &DeviceMonitor {
        &self.monitor
    }

    pub fn monitor_view(&self) -> MonitorView {
        self.monitor.view()
    }

    /// Per-device probing method, last status and last check time.
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.monitor.snapshot()
    }
}

#[async_trait]
impl HostPlugin for DeviceCheckPlugin {
    type Config = DeviceCheckConfig;

    fn plugin_id(&self) -> &str {
        PLUGIN_ID
    }

    async fn init_plugin(&mut self, config: Option<DeviceCheckConfig>) {
        let Some(config) = config else {
            return;
        };

        self.enabled = config.enabled;
        let plan = config.plan();
        let has_devices = !plan.devices.is_empty();
        self.monitor.configure(plan);

        if !(self.enabled && has_devices) {
            info!("device check plugin disabled or no devices configured");
            return;
        }

        match self.monitor.start() {
            Ok(StartOutcome::Started) => {
                info!("device check plugin started, monitoring {} devices", self.monitor.device_count())
            }
            Ok(_) => {}
            Err(e) => error!("device check plugin failed to start: {}", e),
        }
    }

    fn get_state(&self) -> bool {
        self.enabled && self.monitor.device_count() > 0
    }

    async fn stop_service(&mut self) {
        info!("stopping device check plugin...");
        self.monitor.stop().await;
        info!("device check plugin stopped");
    }
}
