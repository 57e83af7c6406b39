//! Liveness probes.
//!
//! Probes never fail: every transport error (refused, unreachable, timeout,
//! missing `ping` binary...) is folded into [`ProbeOutcome::Offline`] and
//! logged at debug level.

use crate::models::{Device, DeviceState, ProbeMethod};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Online,
    Offline,
}

impl ProbeOutcome {
    pub fn is_online(&self) -> bool {
        matches!(self, ProbeOutcome::Online)
    }
}

impl From<bool> for ProbeOutcome {
    fn from(online: bool) -> Self {
        if online {
            ProbeOutcome::Online
        } else {
            ProbeOutcome::Offline
        }
    }
}

impl From<ProbeOutcome> for DeviceState {
    fn from(outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Online => DeviceState::Online,
            ProbeOutcome::Offline => DeviceState::Offline,
        }
    }
}

#[async_trait]
pub trait Prober: Send + Sync {
    /// TCP connect to `address:port`.
    async fn probe_port(&self, address: &str, port: u16, timeout: Duration) -> ProbeOutcome;

    /// Single ICMP echo to `address`.
    async fn probe_ping(&self, address: &str, timeout: Duration) -> ProbeOutcome;
}

/// Picks the probe for `device`: TCP when it has a usable port, ping otherwise.
pub async fn probe_device(prober: &dyn Prober, device: &Device, timeout: Duration) -> ProbeOutcome {
    match device.probe_method() {
        ProbeMethod::Port(port) => prober.probe_port(&device.address, port, timeout).await,
        ProbeMethod::Ping => {
            if let Some(port) = &device.port {
                debug!("{}: port '{}' unusable, falling back to ping", device.name, port);
            }
            prober.probe_ping(&device.address, timeout).await
        }
    }
}

/// Probes the real network: tokio sockets and the system `ping`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetProber;

#[async_trait]
impl Prober for NetProber {
    async fn probe_port(&self, address: &str, port: u16, timeout: Duration) -> ProbeOutcome {
        match tokio::time::timeout(timeout, TcpStream::connect((address, port))).await {
            Ok(Ok(stream)) => {
                drop(stream);
                ProbeOutcome::Online
            }
            Ok(Err(e)) => {
                debug!("port check {}:{} failed: {}", address, port, e);
                ProbeOutcome::Offline
            }
            Err(_) => {
                debug!("port check {}:{} timed out after {:?}", address, port, timeout);
                ProbeOutcome::Offline
            }
        }
    }

    async fn probe_ping(&self, address: &str, timeout: Duration) -> ProbeOutcome {
        if address.starts_with('-') {
            debug!("ping {} refused: address would be read as an option", address);
            return ProbeOutcome::Offline;
        }
        let mut cmd = Command::new("ping");
        cmd.args(ping_args(address, timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout + Duration::from_secs(1), cmd.status()).await {
            Ok(Ok(status)) => status.success().into(),
            Ok(Err(e)) => {
                debug!("ping {} failed: {}", address, e);
                ProbeOutcome::Offline
            }
            Err(_) => {
                debug!("ping {} timed out", address);
                ProbeOutcome::Offline
            }
        }
    }
}

/// One echo request, waiting at most `timeout` for the reply.
fn ping_args(address: &str, timeout: Duration) -> Vec<String> {
    let secs = timeout.as_secs().max(1).to_string();
    if cfg!(target_os = "windows") {
        let millis = timeout.as_millis().max(1).to_string();
        vec!["-n".into(), "1".into(), "-w".into(), millis, address.into()]
    } else if cfg!(target_os = "macos") {
        vec!["-c".into(), "1".into(), "-t".into(), secs, address.into()]
    } else {
        vec!["-c".into(), "1".into(), "-W".into(), secs, address.into()]
    }
}
