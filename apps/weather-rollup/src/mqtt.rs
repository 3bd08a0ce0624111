use crate::config::Config;
use crate::error::TransportError;
use crate::pipeline::IngestStats;
use crate::source::{InboundMessage, MessageSource};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// MQTT subscription to the configured readings topic.
///
/// The event loop reconnects on its own; the topic is (re)subscribed on every ConnAck so a
/// clean-session reconnect keeps receiving. After `max_reconnects` consecutive failures
/// (0 = never) the source gives up with a [`TransportError`].
pub struct MqttSource {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
    reconnect_delay: Duration,
    max_reconnects: u32,
    consecutive_failures: u32,
    stats: Arc<IngestStats>,
}

impl MqttSource {
    pub fn new(config: &Config, stats: Arc<IngestStats>) -> Self {
        let mut mqttoptions = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_host.clone(),
            config.mqtt_port,
        );
        mqttoptions.set_keep_alive(config.mqtt_keepalive());
        mqttoptions.set_clean_session(true);
        if let Some(username) = &config.mqtt_username {
            mqttoptions.set_credentials(
                username.clone(),
                config.mqtt_password.clone().unwrap_or_default(),
            );
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 32);
        Self {
            client,
            eventloop,
            topic: config.mqtt_topic.clone(),
            reconnect_delay: config.mqtt_reconnect_delay(),
            max_reconnects: config.mqtt_max_reconnects,
            consecutive_failures: 0,
            stats,
        }
    }
}

async fn subscribe(client: &AsyncClient, topic: &str) -> Result<(), TransportError> {
    client
        .subscribe(topic, QoS::AtLeastOnce)
        .await
        .map_err(|err| TransportError::Subscribe {
            topic: topic.to_string(),
            reason: err.to_string(),
        })
}

impl MessageSource for MqttSource {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        loop {
            let failure = match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    self.consecutive_failures = 0;
                    subscribe(&self.client, &self.topic).await?;
                    self.stats.set_mqtt_connected(true);
                    tracing::info!(topic = %self.topic, "subscribed to readings topic");
                    continue;
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    return Ok(Some(InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                        received_at: Utc::now(),
                    }));
                }
                Ok(_) => continue,
                Err(err) => err.to_string(),
            };

            self.stats.set_mqtt_connected(false);
            self.stats.record_error(failure.clone());
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            if self.max_reconnects != 0 && self.consecutive_failures >= self.max_reconnects {
                return Err(TransportError::ConnectionLost {
                    attempts: self.consecutive_failures,
                    last_error: failure,
                });
            }
            tracing::warn!(
                error = %failure,
                attempt = self.consecutive_failures,
                "MQTT connection dropped; reconnecting"
            );
            sleep(self.reconnect_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            database_url: None,
            db_pool_size: 1,
            bootstrap_schema: false,
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_username: Some("station".to_string()),
            mqtt_password: None,
            mqtt_topic: "/weather_station/periodical".to_string(),
            mqtt_client_id: "weather-rollup-test".to_string(),
            mqtt_keepalive_secs: 30,
            mqtt_reconnect_delay_ms: 10,
            mqtt_max_reconnects: 1,
            http_bind: "127.0.0.1:0".to_string(),
            persist_queue: 8,
            persist_concurrency: 1,
            otlp_endpoint: None,
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn listener_future_can_be_spawned() {
        let mut source = MqttSource::new(&config(), Arc::new(IngestStats::new()));
        let next = source.next_message();
        assert_send(&next);
        drop(next);
        assert_eq!(source.topic, "/weather_station/periodical");
        assert_eq!(source.reconnect_delay, Duration::from_millis(10));
    }
}
