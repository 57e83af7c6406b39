use crate::config::MqttConf;
use crate::events::{DeviceEvent, EventPublisher, EventType, PublishError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info};

pub const PLUGIN_TRIGGERED_TOPIC: &str = "devicecheck/plugin/triggered@v1";
pub const STATUS_TOPIC: &str = "devicecheck/status@v1";

pub fn topic_for(event_type: EventType) -> &'static str {
    match event_type {
        EventType::PluginTriggered => PLUGIN_TRIGGERED_TOPIC,
    }
}

pub fn connect(conf: &MqttConf, client_id: &str) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(client_id, &conf.host, conf.port);
    opts.set_keep_alive(Duration::from_secs(15));
    AsyncClient::new(opts, 10)
}

/// Drives the rumqttc event loop; outgoing publishes only flow while it is polled.
pub fn spawn_event_loop(mut eventloop: EventLoop) -> JoinHandle<()> {
    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => info!("MQTT connected"),
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT error: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}

/// Sends device events as JSON to the broker.
///
/// Publishing never waits on the client's request channel: when the broker is
/// unreachable and the channel is full, the event is rejected with
/// `ClientError::TryRequest` instead of stalling the monitor worker.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventPublisher for MqttPublisher {
    async fn publish(&self, event_type: EventType, event: &DeviceEvent) -> Result<(), PublishError> {
        let topic = topic_for(event_type);
        let payload = serde_json::to_vec(event)?;
        self.client.try_publish(topic, QoS::AtLeastOnce, false, payload)?;
        debug!("published {} to {}", event.event_name, topic);
        Ok(())
    }
}
