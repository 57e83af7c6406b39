//! devicecheck - device liveness monitor plugin
//!
//! Periodically probes configured devices (TCP connect when a port is set,
//! ICMP ping otherwise), tracks their online/offline state and notifies the
//! host event bus on every transition, first observation included.

pub mod config;
pub mod events;
pub mod models;
pub mod monitor;
pub mod mqtt;
pub mod plugin;
pub mod probe;
pub mod state;
pub mod status;

pub use config::{load_config, parse_devices, DeviceCheckConfig};
pub use events::{DeviceEvent, EventBus, EventPublisher, EventType, PublishError};
pub use models::{Device, DeviceSnapshot, DeviceState, Port};
pub use monitor::{CycleOutcome, DeviceMonitor, MonitorPlan, MonitorSettings, StartOutcome};
pub use plugin::{DeviceCheckPlugin, HostPlugin, PLUGIN_ID};
pub use probe::{NetProber, ProbeOutcome, Prober};
