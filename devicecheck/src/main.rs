/*!
DEVICECHECK - standalone runner for the device check plugin

Loads `devicecheck.yaml` (or `$DEVICECHECK_CONFIG`), publishes device
transitions and periodic status reports over MQTT, and stops cleanly on Ctrl-C.
*/

use anyhow::{Context, Result};
use devicecheck::config::load_config;
use devicecheck::mqtt::{self, MqttPublisher};
use devicecheck::status::StatusTracker;
use devicecheck::{DeviceCheckPlugin, HostPlugin, NetProber, PLUGIN_ID};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("devicecheck=info")))
        .init();

    info!("devicecheck starting...");

    let config = load_config().await;
    let mqtt_conf = config.mqtt.clone().unwrap_or_default();
    let status_interval = config.status_interval();

    let (client, eventloop) = mqtt::connect(&mqtt_conf, "devicecheck");
    let mqtt_loop = mqtt::spawn_event_loop(eventloop);
    info!("publishing to MQTT broker {}:{}", mqtt_conf.host, mqtt_conf.port);

    let mut plugin = DeviceCheckPlugin::new(Arc::new(NetProber), Arc::new(MqttPublisher::new(client.clone())));
    plugin.init_plugin(Some(config)).await;

    if !plugin.get_state() {
        warn!("nothing to monitor, exiting");
        mqtt_loop.abort();
        return Ok(());
    }

    let status = StatusTracker::new(PLUGIN_ID, plugin.monitor_view()).spawn_status_publisher(client, status_interval);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    status.abort();
    plugin.stop_service().await;
    mqtt_loop.abort();
    Ok(())
}
