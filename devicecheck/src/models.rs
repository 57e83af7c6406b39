//! Device model shared by the config parser, the monitor loop and the
//! inspection views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Port attached to a device in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Port {
    Valid(u16),
    /// Present in the configuration but not a usable port number.
    /// Devices carrying one are probed by ping.
    Invalid(String),
}

impl Port {
    /// Parses a raw port field. Zero and anything outside `u16` are invalid.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<u16>() {
            Ok(port) if port > 0 => Port::Valid(port),
            _ => Port::Invalid(raw.to_string()),
        }
    }

    pub fn number(&self) -> Option<u16> {
        match self {
            Port::Valid(port) => Some(*port),
            Port::Invalid(_) => None,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Valid(port) => write!(f, "{}", port),
            Port::Invalid(raw) => f.write_str(raw),
        }
    }
}

/// A monitoring target. Replaced wholesale on reconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub name: String,
    pub address: String,
    pub port: Option<Port>,
}

impl Device {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: None,
        }
    }

    pub fn with_port(mut self, port: Port) -> Self {
        self.port = Some(port);
        self
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(&self.address, self.port.as_ref())
    }

    /// Resolves how this device is probed. An unusable port falls back to ping.
    pub fn probe_method(&self) -> ProbeMethod {
        match &self.port {
            Some(Port::Valid(port)) => ProbeMethod::Port(*port),
            Some(Port::Invalid(_)) | None => ProbeMethod::Ping,
        }
    }
}

/// Cache key: `address:port`, with an empty port segment when no port is set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    pub fn new(address: &str, port: Option<&Port>) -> Self {
        match port {
            Some(port) => Self(format!("{}:{}", address, port)),
            None => Self(format!("{}:", address)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeMethod {
    Port(u16),
    Ping,
}

impl ProbeMethod {
    pub fn label(&self) -> &'static str {
        match self {
            ProbeMethod::Port(_) => "port",
            ProbeMethod::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Online,
    Offline,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Online => "online",
            DeviceState::Offline => "offline",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-known state of a device key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub status: DeviceState,
    pub last_check: DateTime<Utc>,
}

/// Status cache. Keys of devices removed by a reconfiguration are kept until
/// the owning monitor is dropped.
pub type StatusMap = HashMap<DeviceKey, DeviceStatus>;

/// Read-only view of one configured device, for display.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub name: String,
    pub address: String,
    pub port: Option<Port>,
    pub method: &'static str,
    pub status: Option<DeviceState>,
    pub last_check: Option<DateTime<Utc>>,
}

impl DeviceSnapshot {
    pub fn capture(device: &Device, statuses: &StatusMap) -> Self {
        let cached = statuses.get(&device.key());
        Self {
            name: device.name.clone(),
            address: device.address.clone(),
            port: device.port.clone(),
            method: device.probe_method().label(),
            status: cached.map(|s| s.status),
            last_check: cached.map(|s| s.last_check),
        }
    }
}
