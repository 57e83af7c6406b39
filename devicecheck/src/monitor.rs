/*!
DEVICE MONITOR - background liveness loop

Owns one worker task that walks the configured devices, probes each of them,
caches the resulting online/offline state and publishes a notification when
the state changes (or is observed for the first time).

Lifecycle:
- `start()` spawns the worker (no-op with a warning if it is already running)
- `stop()` raises the stop signal and joins the worker with a bounded wait
- the stop signal is checked before every probe and interrupts every sleep,
  so the worker exits within one probe timeout of a stop request

The status cache has a single writer (the worker); inspection views take
short read locks and may observe a state one probe behind.
*/

use crate::events::{DeviceEvent, EventPublisher, EventType};
use crate::models::{Device, DeviceSnapshot, DeviceState, DeviceStatus, StatusMap};
use crate::probe::{probe_device, Prober};
use crate::state::{new_state, new_view, Shared, SharedView};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
pub const PACING_DELAY: Duration = Duration::from_secs(1);
pub const ERROR_BACKOFF: Duration = Duration::from_secs(5);
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Wait between two cycles.
    pub check_interval: Duration,
    pub probe_timeout: Duration,
    /// Pause between two devices of the same cycle.
    pub pacing_delay: Duration,
    /// Wait after a cycle that panicked.
    pub error_backoff: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            pacing_delay: PACING_DELAY,
            error_backoff: ERROR_BACKOFF,
        }
    }
}

/// Devices and timings for the coming cycles. Replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorPlan {
    pub devices: Vec<Device>,
    pub settings: MonitorSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    /// A stop request interrupted the cycle.
    Stopped,
    /// Not run: the background worker owns the cache while it is running.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    NothingToMonitor,
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("no tokio runtime available to spawn the monitor worker")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Raises the stop signal of a monitor without owning it.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Read-only access to a monitor's plan and cache, cheap to clone.
#[derive(Clone)]
pub struct MonitorView {
    plan: Shared<Arc<MonitorPlan>>,
    statuses: SharedView<StatusMap>,
    running: Arc<AtomicBool>,
}

impl MonitorView {
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        let plan = Arc::clone(&self.plan.lock());
        let statuses = self.statuses.read();
        plan.devices
            .iter()
            .map(|device| DeviceSnapshot::capture(device, &statuses))
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

pub struct DeviceMonitor {
    source_id: Arc<str>,
    plan: Shared<Arc<MonitorPlan>>,
    statuses: SharedView<StatusMap>,
    prober: Arc<dyn Prober>,
    publisher: Arc<dyn EventPublisher>,
    stop: StopHandle,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceMonitor {
    pub fn new(source_id: &str, prober: Arc<dyn Prober>, publisher: Arc<dyn EventPublisher>) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            source_id: Arc::from(source_id),
            plan: new_state(Arc::new(MonitorPlan::default())),
            statuses: new_view(StatusMap::new()),
            prober,
            publisher,
            stop: StopHandle { tx: Arc::new(tx) },
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn with_plan(self, plan: MonitorPlan) -> Self {
        self.configure(plan);
        self
    }

    /// Replaces the device set and timings. A running worker picks them up
    /// at the start of its next cycle.
    pub fn configure(&self, plan: MonitorPlan) {
        *self.plan.lock() = Arc::new(plan);
    }

    pub fn plan(&self) -> Arc<MonitorPlan> {
        Arc::clone(&self.plan.lock())
    }

    pub fn device_count(&self) -> usize {
        self.plan.lock().devices.len()
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn view(&self) -> MonitorView {
        MonitorView {
            plan: self.plan.clone(),
            statuses: self.statuses.clone(),
            running: self.running.clone(),
        }
    }

    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.view().snapshot()
    }

    /// Copy of the whole cache, including keys no longer configured.
    pub fn statuses(&self) -> StatusMap {
        self.statuses.read().clone()
    }

    /// Spawns the worker on the current tokio runtime.
    pub fn start(&mut self) -> Result<StartOutcome, MonitorError> {
        if self.is_running() {
            warn!("device monitor already running");
            return Ok(StartOutcome::AlreadyRunning);
        }
        let device_count = self.device_count();
        if device_count == 0 {
            info!("no devices configured, monitor not started");
            return Ok(StartOutcome::NothingToMonitor);
        }

        let runtime = tokio::runtime::Handle::try_current()?;
        self.stop.tx.send_replace(false);
        self.running.store(true, Ordering::Relaxed);
        self.worker = Some(runtime.spawn(self.make_worker().run()));
        info!("device monitor started, watching {} devices", device_count);
        Ok(StartOutcome::Started)
    }

    /// Signals the worker and waits up to [`JOIN_TIMEOUT`] for it to exit.
    /// A worker that does not exit in time is aborted.
    pub async fn stop(&mut self) {
        self.stop.request_stop();

        let Some(mut handle) = self.worker.take() else {
            return;
        };
        match tokio::time::timeout(JOIN_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => debug!("device monitor worker joined"),
            Ok(Err(e)) => warn!("device monitor worker ended abnormally: {}", e),
            Err(_) => {
                warn!("device monitor worker did not stop within {:?}, aborting", JOIN_TIMEOUT);
                handle.abort();
            }
        }
        self.running.store(false, Ordering::Relaxed);
    }

    /// Runs one cycle inline. Skipped while the worker is running.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self.is_running() {
            warn!("device monitor worker is running, inline cycle skipped");
            return CycleOutcome::Skipped;
        }
        self.make_worker().run_cycle().await
    }

    fn make_worker(&self) -> MonitorWorker {
        MonitorWorker {
            source_id: self.source_id.clone(),
            plan: self.plan.clone(),
            statuses: self.statuses.clone(),
            prober: self.prober.clone(),
            publisher: self.publisher.clone(),
            stop_rx: self.stop.tx.subscribe(),
            running: self.running.clone(),
        }
    }
}

struct MonitorWorker {
    source_id: Arc<str>,
    plan: Shared<Arc<MonitorPlan>>,
    statuses: SharedView<StatusMap>,
    prober: Arc<dyn Prober>,
    publisher: Arc<dyn EventPublisher>,
    stop_rx: watch::Receiver<bool>,
    running: Arc<AtomicBool>,
}

impl MonitorWorker {
    async fn run(self) {
        info!("device monitor worker started");

        while !self.stop_requested() {
            match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                Ok(CycleOutcome::Stopped) => break,
                Ok(CycleOutcome::Completed | CycleOutcome::Skipped) => {
                    let interval = self.plan.lock().settings.check_interval;
                    if self.wait(interval).await {
                        break;
                    }
                }
                Err(panic) => {
                    let backoff = self.plan.lock().settings.error_backoff;
                    error!("device check cycle failed: {}", panic_message(panic.as_ref()));
                    if self.wait(backoff).await {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::Relaxed);
        info!("device monitor worker stopped");
    }

    async fn run_cycle(&self) -> CycleOutcome {
        let plan = Arc::clone(&self.plan.lock());

        for device in &plan.devices {
            if self.stop_requested() {
                debug!("stop requested, abandoning cycle");
                return CycleOutcome::Stopped;
            }
            if device.address.is_empty() {
                continue;
            }

            let outcome = probe_device(self.prober.as_ref(), device, plan.settings.probe_timeout).await;
            self.record(device, outcome.into()).await;

            if self.wait(plan.settings.pacing_delay).await {
                return CycleOutcome::Stopped;
            }
        }

        CycleOutcome::Completed
    }

    /// Caches `current` and notifies on first observation or change.
    async fn record(&self, device: &Device, current: DeviceState) {
        let now = Utc::now();
        let previous = self
            .statuses
            .write()
            .insert(device.key(), DeviceStatus { status: current, last_check: now })
            .map(|cached| cached.status);

        match previous {
            Some(previous) if previous == current => return,
            Some(previous) => info!(
                "device {} ({}) changed: {} -> {}",
                device.name, device.address, previous, current
            ),
            None => info!("device {} ({}) initial state: {}", device.name, device.address, current),
        }

        self.notify(device, current, now).await;
    }

    async fn notify(&self, device: &Device, status: DeviceState, at: DateTime<Utc>) {
        let event = DeviceEvent::transition(&self.source_id, device, status, at);
        match self.publisher.publish(EventType::PluginTriggered, &event).await {
            Ok(()) => debug!("sent device event: {} ({}) -> {}", device.name, device.address, status),
            Err(e) => error!("failed to send device event for {}: {}", device.name, e),
        }
    }

    fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Sleeps for `duration` unless stopped first. Returns `true` on stop.
    async fn wait(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return self.stop_requested();
        }
        let mut stop_rx = self.stop_rx.clone();
        let stopped = async move {
            // an Err means the monitor was dropped, which also stops the worker
            let _ = stop_rx.wait_for(|stop| *stop).await;
        };
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.stop_requested(),
            _ = stopped => true,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PublishError;
    use crate::models::Port;
    use crate::probe::ProbeOutcome;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Answers from a per-address table; unknown addresses are offline.
    #[derive(Default)]
    struct TableProber {
        online: Mutex<HashMap<String, bool>>,
        calls: Mutex<Vec<String>>,
    }

    impl TableProber {
        fn set(&self, address: &str, online: bool) {
            self.online.lock().insert(address.to_string(), online);
        }

        fn lookup(&self, address: &str) -> ProbeOutcome {
            self.calls.lock().push(address.to_string());
            self.online.lock().get(address).copied().unwrap_or(false).into()
        }
    }

    #[async_trait]
    impl Prober for TableProber {
        async fn probe_port(&self, address: &str, _port: u16, _timeout: Duration) -> ProbeOutcome {
            self.lookup(address)
        }

        async fn probe_ping(&self, address: &str, _timeout: Duration) -> ProbeOutcome {
            self.lookup(address)
        }
    }

    #[derive(Default)]
    struct CollectingPublisher {
        events: Mutex<Vec<DeviceEvent>>,
    }

    #[async_trait]
    impl EventPublisher for CollectingPublisher {
        async fn publish(&self, _event_type: EventType, event: &DeviceEvent) -> Result<(), PublishError> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    fn fast_settings() -> MonitorSettings {
        MonitorSettings {
            check_interval: Duration::from_millis(20),
            probe_timeout: Duration::from_millis(100),
            pacing_delay: Duration::ZERO,
            error_backoff: Duration::from_millis(20),
        }
    }

    fn monitor(devices: Vec<Device>) -> (DeviceMonitor, Arc<TableProber>, Arc<CollectingPublisher>) {
        let prober = Arc::new(TableProber::default());
        let publisher = Arc::new(CollectingPublisher::default());
        let monitor = DeviceMonitor::new("DeviceCheck", prober.clone(), publisher.clone()).with_plan(MonitorPlan {
            devices,
            settings: fast_settings(),
        });
        (monitor, prober, publisher)
    }

    #[tokio::test]
    async fn test_first_observation_notifies_once() {
        let (monitor, prober, publisher) = monitor(vec![
            Device::new("A", "10.0.0.1").with_port(Port::Valid(445)),
            Device::new("B", "10.0.0.2"),
        ]);
        prober.set("10.0.0.1", true);

        assert_eq!(monitor.run_cycle().await, CycleOutcome::Completed);

        let events = publisher.events.lock().clone();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, DeviceState::Online);
        assert_eq!(events[1].status, DeviceState::Offline);
    }

    #[tokio::test]
    async fn test_only_transitions_notify() {
        let (monitor, prober, publisher) = monitor(vec![Device::new("A", "10.0.0.1")]);
        prober.set("10.0.0.1", true);

        monitor.run_cycle().await;
        monitor.run_cycle().await;
        assert_eq!(publisher.events.lock().len(), 1);

        prober.set("10.0.0.1", false);
        monitor.run_cycle().await;
        let events = publisher.events.lock().clone();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_name, "device_offline");
    }

    #[tokio::test]
    async fn test_cache_updated_every_cycle() {
        let (monitor, _prober, _publisher) = monitor(vec![Device::new("A", "10.0.0.1")]);

        monitor.run_cycle().await;
        let first = monitor.statuses()[&Device::new("A", "10.0.0.1").key()].last_check;
        tokio::time::sleep(Duration::from_millis(5)).await;
        monitor.run_cycle().await;
        let second = monitor.statuses()[&Device::new("A", "10.0.0.1").key()].last_check;

        assert!(second > first);
    }

    #[tokio::test]
    async fn test_empty_address_skipped() {
        let (monitor, prober, publisher) = monitor(vec![Device::new("Ghost", ""), Device::new("A", "10.0.0.1")]);

        monitor.run_cycle().await;
        assert_eq!(*prober.calls.lock(), vec!["10.0.0.1"]);
        assert_eq!(publisher.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_before_cycle() {
        let (monitor, prober, _publisher) = monitor(vec![Device::new("A", "10.0.0.1")]);
        monitor.stop_handle().request_stop();

        assert_eq!(monitor.run_cycle().await, CycleOutcome::Stopped);
        assert!(prober.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_joins() {
        let (mut monitor, _prober, publisher) = monitor(vec![Device::new("A", "10.0.0.1")]);

        assert_eq!(monitor.start().unwrap(), StartOutcome::Started);
        assert_eq!(monitor.start().unwrap(), StartOutcome::AlreadyRunning);
        assert!(monitor.view().is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.stop().await;

        assert!(!monitor.is_running());
        assert!(!monitor.view().is_running());
        // offline twice or more, notified once
        assert_eq!(publisher.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_inline_cycle_skipped_while_worker_runs() {
        let (mut monitor, prober, publisher) = monitor(vec![Device::new("A", "10.0.0.1")]);
        monitor.configure(MonitorPlan {
            devices: vec![Device::new("A", "10.0.0.1")],
            settings: MonitorSettings {
                check_interval: Duration::from_secs(3600),
                ..fast_settings()
            },
        });

        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let probes = prober.calls.lock().len();

        assert_eq!(monitor.run_cycle().await, CycleOutcome::Skipped);
        assert_eq!(prober.calls.lock().len(), probes);
        assert_eq!(publisher.events.lock().len(), 1);

        monitor.stop().await;
        // the stop signal stays raised until the next start
        assert_eq!(monitor.run_cycle().await, CycleOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_start_without_devices() {
        let (mut monitor, _prober, _publisher) = monitor(vec![]);
        assert_eq!(monitor.start().unwrap(), StartOutcome::NothingToMonitor);
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_start_outside_runtime() {
        let (mut monitor, _prober, _publisher) = monitor(vec![Device::new("A", "10.0.0.1")]);
        assert!(matches!(monitor.start(), Err(MonitorError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_reconfigure_keeps_stale_keys() {
        let (monitor, _prober, _publisher) =
            monitor(vec![Device::new("NAS", "10.0.0.5").with_port(Port::Valid(445))]);
        monitor.run_cycle().await;

        monitor.configure(MonitorPlan {
            devices: vec![Device::new("NAS", "10.0.0.5")],
            settings: fast_settings(),
        });
        monitor.run_cycle().await;

        let statuses = monitor.statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(monitor.snapshot().len(), 1);
        assert_eq!(monitor.snapshot()[0].method, "ping");
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("probe exploded");
        assert_eq!(panic_message(boxed.as_ref()), "probe exploded");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
