use crate::{
    frame::Frame,
    metric_collector::MetricCollector,
    mqtt_config::MqttConfig,
    mqtt_wrapper::{MqttWrapper, QoS, OFFLINE},
};

use chrono::Utc;
use log::{debug, info, warn};
use serde_derive::Deserialize;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublishConfig {
    pub topic_prefix: String,
    pub retain: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "victron/mppt".to_string(),
            retain: true,
        }
    }
}

/// Publishes every field of a frame to `<prefix>/<label>`, followed by the
/// publish time in `<prefix>/_ts`.
pub struct SimpleMqtt<MQTT: MqttWrapper> {
    client: MQTT,
    availability_topic: Option<String>,
    topic_prefix: String,
    retain: bool,
}

impl<MQTT: MqttWrapper> SimpleMqtt<MQTT> {
    pub fn new(mqtt_config: &MqttConfig, publish_config: &PublishConfig) -> Self {
        let client = MQTT::new(mqtt_config);
        Self::with_client(client, mqtt_config, publish_config)
    }

    pub fn with_client(
        client: MQTT,
        mqtt_config: &MqttConfig,
        publish_config: &PublishConfig,
    ) -> Self {
        Self {
            client,
            availability_topic: mqtt_config.availability_topic.clone(),
            topic_prefix: publish_config.topic_prefix.trim_end_matches('/').to_string(),
            retain: publish_config.retain,
        }
    }

    fn publish_value(&mut self, topic: String, payload: String) {
        debug!("{topic} = {payload}");
        if let Err(e) = self
            .client
            .publish(topic, QoS::AtMostOnce, self.retain, payload)
        {
            warn!("mqtt error: {e:?}")
        }
    }
}

impl<MQTT: MqttWrapper> MetricCollector for SimpleMqtt<MQTT> {
    fn publish(&mut self, frame: &Frame) {
        let topic_payload_pairs: Vec<_> = frame
            .publishable_fields()
            .map(|(label, value)| (format!("{}/{label}", self.topic_prefix), value.to_string()))
            .collect();

        topic_payload_pairs
            .into_iter()
            .for_each(|(topic, payload)| self.publish_value(topic, payload));

        let timestamp = Utc::now().timestamp();
        self.publish_value(format!("{}/_ts", self.topic_prefix), timestamp.to_string());
    }

    fn shutdown(&mut self) {
        if let Some(topic) = self.availability_topic.clone() {
            info!("marking {topic} {OFFLINE}");
            if let Err(e) = self.client.publish(topic, QoS::AtMostOnce, true, OFFLINE) {
                warn!("mqtt error: {e:?}")
            }
        }
        if let Err(e) = self.client.disconnect() {
            warn!("mqtt disconnect failed: {e:?}")
        }
    }
}
