use crate::models::{Device, Port};
use crate::monitor::{MonitorPlan, MonitorSettings};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

pub const DEFAULT_CHECK_INTERVAL_SECS: i64 = 60;
pub const DEFAULT_TIMEOUT_SECS: i64 = 3;
pub const DEFAULT_STATUS_INTERVAL_SECS: i64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Plugin configuration as handed over by the host (or read from YAML).
///
/// Durations and devices are read leniently: a malformed value is dropped
/// with a warning and the rest of the configuration still applies.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceCheckConfig {
    pub enabled: bool,
    #[serde(deserialize_with = "lenient_devices")]
    pub devices: DevicesInput,
    /// Seconds; `None` when absent or unreadable.
    #[serde(deserialize_with = "lenient_secs")]
    pub check_interval: Option<i64>,
    #[serde(deserialize_with = "lenient_secs")]
    pub timeout: Option<i64>,
    pub mqtt: Option<MqttConf>,
    #[serde(deserialize_with = "lenient_secs")]
    pub status_interval: Option<i64>,
}

/// Devices arrive either as `name#address#port` lines or pre-structured.
#[derive(Debug, Clone)]
pub enum DevicesInput {
    Text(String),
    List(Vec<DeviceEntry>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "ip")]
    pub address: String,
    #[serde(default)]
    pub port: Option<PortEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PortEntry {
    Number(i64),
    Text(String),
    /// Floats, booleans, mappings... kept so the device falls back to ping.
    Other(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self { host: "localhost".into(), port: 1883 }
    }
}

impl Default for DevicesInput {
    fn default() -> Self {
        DevicesInput::Text(String::new())
    }
}

impl Default for DeviceCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            devices: DevicesInput::default(),
            check_interval: None,
            timeout: None,
            mqtt: Some(MqttConf::default()),
            status_interval: None,
        }
    }
}

impl DeviceCheckConfig {
    pub fn from_yaml(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(txt)?)
    }

    pub fn devices(&self) -> Vec<Device> {
        match &self.devices {
            DevicesInput::Text(text) => parse_devices(text),
            DevicesInput::List(entries) => entries.iter().filter_map(DeviceEntry::to_device).collect(),
        }
    }

    pub fn settings(&self) -> MonitorSettings {
        MonitorSettings {
            check_interval: positive_secs("check_interval", self.check_interval, DEFAULT_CHECK_INTERVAL_SECS),
            probe_timeout: positive_secs("timeout", self.timeout, DEFAULT_TIMEOUT_SECS),
            ..MonitorSettings::default()
        }
    }

    pub fn plan(&self) -> MonitorPlan {
        MonitorPlan {
            devices: self.devices(),
            settings: self.settings(),
        }
    }

    pub fn status_interval(&self) -> Duration {
        positive_secs("status_interval", self.status_interval, DEFAULT_STATUS_INTERVAL_SECS)
    }
}

impl DeviceEntry {
    fn to_device(&self) -> Option<Device> {
        let name = self.name.trim();
        let address = self.address.trim();
        if name.is_empty() || address.is_empty() {
            warn!("device config: skipping entry with empty name or address: {:?}", self);
            return None;
        }
        if address.starts_with('-') {
            warn!("device config: skipping {}, address '{}' looks like an option", name, address);
            return None;
        }

        let port = match &self.port {
            None => None,
            Some(PortEntry::Number(n)) => Some(match u16::try_from(*n) {
                Ok(port) if port > 0 => Port::Valid(port),
                _ => Port::Invalid(n.to_string()),
            }),
            Some(PortEntry::Text(raw)) if raw.trim().is_empty() => None,
            Some(PortEntry::Text(raw)) => Some(Port::parse(raw)),
            Some(PortEntry::Other(value)) => {
                let raw = serde_yaml::to_string(value).unwrap_or_default();
                Some(Port::Invalid(raw.trim().to_string()))
            }
        };

        Some(Device {
            name: name.to_string(),
            address: address.to_string(),
            port,
        })
    }
}

fn positive_secs(field: &str, value: Option<i64>, default: i64) -> Duration {
    match value {
        Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
        Some(secs) => {
            warn!("{} must be positive (got {}), using {}s", field, secs, default);
            Duration::from_secs(default as u64)
        }
        None => Duration::from_secs(default as u64),
    }
}

/// Whole seconds given as a number or a numeric string (`30`, `"30"`, `30.0`).
fn lenient_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let secs = match &value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    if secs.is_none() {
        warn!("config: expected a number of seconds, got {:?}; using the default", value);
    }
    Ok(secs)
}

/// Device list as text or a sequence of entries; unreadable entries are
/// dropped one by one.
fn lenient_devices<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DevicesInput, D::Error> {
    let devices = match Value::deserialize(deserializer)? {
        Value::Null => DevicesInput::default(),
        Value::String(text) => DevicesInput::Text(text),
        Value::Sequence(items) => DevicesInput::List(
            items
                .into_iter()
                .filter_map(|item| match serde_yaml::from_value::<DeviceEntry>(item) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!("device config: skipping unreadable entry: {}", e);
                        None
                    }
                })
                .collect(),
        ),
        other => {
            warn!("device config: expected text or a list, got {:?}", other);
            DevicesInput::default()
        }
    };
    Ok(devices)
}

/// Parses `name#address#port` lines (port optional).
///
/// Blank lines and lines starting with `#` are skipped. Malformed lines are
/// dropped with a warning; a port that is not a positive integer is dropped
/// while the device itself is kept.
pub fn parse_devices(text: &str) -> Vec<Device> {
    let mut devices = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split('#').collect();
        if parts.len() < 2 {
            warn!("device config: skipping malformed line: {}", line);
            continue;
        }

        let name = parts[0].trim();
        let address = parts[1].trim();
        if name.is_empty() || address.is_empty() {
            warn!("device config: skipping line with empty name or address: {}", line);
            continue;
        }
        if address.starts_with('-') {
            warn!("device config: skipping line, address looks like an option: {}", line);
            continue;
        }

        let mut device = Device::new(name, address);
        if let Some(raw) = parts.get(2).map(|p| p.trim()).filter(|p| !p.is_empty()) {
            match Port::parse(raw) {
                Port::Valid(port) => device.port = Some(Port::Valid(port)),
                Port::Invalid(_) => warn!("device config: invalid port '{}', ignoring port for {}", raw, name),
            }
        }
        devices.push(device);
    }

    devices
}

pub async fn load_config_from<P: AsRef<Path>>(path: P) -> Result<DeviceCheckConfig, ConfigError> {
    let txt = fs::read_to_string(path).await?;
    DeviceCheckConfig::from_yaml(&txt)
}

/// Loads `DEVICECHECK_CONFIG` (default `devicecheck.yaml`). Never fails:
/// a missing or invalid file yields the default, disabled configuration.
pub async fn load_config() -> DeviceCheckConfig {
    let path = std::env::var("DEVICECHECK_CONFIG").unwrap_or_else(|_| "devicecheck.yaml".into());
    if !Path::new(&path).exists() {
        warn!("no {} found, using default config", path);
        return DeviceCheckConfig::default();
    }

    match load_config_from(&path).await {
        Ok(config) => {
            info!("loaded config from {}", path);
            config
        }
        Err(e) => {
            warn!("invalid config {}: {}", path, e);
            DeviceCheckConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_devices_scenario() {
        let devices = parse_devices("OnlyName\nNAS#10.0.0.5#445");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "NAS");
        assert_eq!(devices[0].address, "10.0.0.5");
        assert_eq!(devices[0].port, Some(Port::Valid(445)));
    }

    #[test]
    fn test_parse_devices_skips_comments_and_blanks() {
        let text = "\n# living room\nPlayer#192.168.1.88#\n\n   \nNAS#192.168.1.89#445\n";
        let devices = parse_devices(text);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "Player");
        assert!(devices[0].port.is_none());
        assert_eq!(devices[1].port, Some(Port::Valid(445)));
    }

    #[test]
    fn test_parse_devices_drops_bad_port_keeps_device() {
        let devices = parse_devices("NAS#10.0.0.5#smb\nBox#10.0.0.7#0");
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.port.is_none()));
    }

    #[test]
    fn test_parse_devices_rejects_empty_fields() {
        assert!(parse_devices("#10.0.0.5#445").is_empty()); // comment
        assert!(parse_devices(" #10.0.0.5").is_empty());
        assert!(parse_devices("NAS# #445").is_empty());
    }

    #[test]
    fn test_structured_devices() {
        let yaml = r#"
enabled: true
devices:
  - name: NAS
    ip: 10.0.0.5
    port: 445
  - name: Player
    address: 10.0.0.6
  - name: Broken
    address: 10.0.0.7
    port: smb
  - name: ""
    address: 10.0.0.8
"#;
        let config = DeviceCheckConfig::from_yaml(yaml).unwrap();
        let devices = config.devices();
        assert!(config.enabled);
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].port, Some(Port::Valid(445)));
        assert!(devices[1].port.is_none());
        assert_eq!(devices[2].port, Some(Port::Invalid("smb".into())));
    }

    #[test]
    fn test_settings_defaults_and_validation() {
        let config = DeviceCheckConfig::from_yaml("check_interval: -5\ntimeout: 0").unwrap();
        let settings = config.settings();
        assert_eq!(settings.check_interval, Duration::from_secs(60));
        assert_eq!(settings.probe_timeout, Duration::from_secs(3));

        let config = DeviceCheckConfig::from_yaml("check_interval: 120\ntimeout: 5").unwrap();
        let settings = config.settings();
        assert_eq!(settings.check_interval, Duration::from_secs(120));
        assert_eq!(settings.probe_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_quoted_and_unreadable_durations() {
        let yaml = "enabled: true\ncheck_interval: \"30\"\ntimeout: soon\nstatus_interval: 10.0\ndevices: \"NAS#10.0.0.5#445\"";
        let config = DeviceCheckConfig::from_yaml(yaml).unwrap();
        let settings = config.settings();

        assert_eq!(settings.check_interval, Duration::from_secs(30));
        assert_eq!(settings.probe_timeout, Duration::from_secs(3));
        assert_eq!(config.status_interval(), Duration::from_secs(10));
        assert_eq!(config.devices().len(), 1);
    }

    #[test]
    fn test_odd_structured_ports_keep_siblings() {
        let yaml = r#"
enabled: true
devices:
  - name: Float
    address: 10.0.0.1
    port: 44.5
  - name: Flag
    address: 10.0.0.2
    port: true
  - name: [not, a, name]
    address: 10.0.0.3
  - name: NAS
    address: 10.0.0.5
    port: 445
"#;
        let config = DeviceCheckConfig::from_yaml(yaml).unwrap();
        let devices = config.devices();

        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].port, Some(Port::Invalid("44.5".into())));
        assert_eq!(devices[1].port, Some(Port::Invalid("true".into())));
        assert_eq!(devices[2].port, Some(Port::Valid(445)));
        assert!(devices[..2].iter().all(|d| d.probe_method() == crate::models::ProbeMethod::Ping));
    }

    #[test]
    fn test_null_devices_is_empty() {
        let config = DeviceCheckConfig::from_yaml("enabled: true\ndevices:\ncheck_interval: 45").unwrap();
        assert!(config.enabled);
        assert!(config.devices().is_empty());
        assert_eq!(config.settings().check_interval, Duration::from_secs(45));
    }

    #[test]
    fn test_option_like_addresses_rejected() {
        assert!(parse_devices("Evil#-f#\nEvil2#--flood#80").is_empty());

        let yaml = "devices:\n  - name: Evil\n    address: \"-c 100\"\n  - name: NAS\n    address: 10.0.0.5\n";
        let devices = DeviceCheckConfig::from_yaml(yaml).unwrap().devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "NAS");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = DeviceCheckConfig::from_yaml("  \n").unwrap();
        assert!(!config.enabled);
        assert!(config.devices().is_empty());
        assert_eq!(config.mqtt.unwrap().port, 1883);
    }

    #[tokio::test]
    async fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "enabled: true\ndevices: |\n  NAS#10.0.0.5#445\n  Player#10.0.0.6").unwrap();

        let config = load_config_from(file.path()).await.unwrap();
        assert!(config.enabled);
        assert_eq!(config.devices().len(), 2);
    }

    #[tokio::test]
    async fn test_load_config_from_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "enabled: [not, a, bool").unwrap();

        assert!(matches!(load_config_from(file.path()).await, Err(ConfigError::Yaml(_))));
    }
}
