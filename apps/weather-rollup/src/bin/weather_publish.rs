use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use std::time::Duration;
use weather_rollup::config::parse_mqtt_url;

#[derive(Parser, Debug)]
#[command(about = "Publish simulated weather-station readings to the MQTT broker.")]
struct Args {
    #[arg(long, default_value = "mqtt://127.0.0.1:1883")]
    url: String,
    #[arg(long, default_value = "/weather_station/periodical")]
    topic: String,
    /// Repeat to simulate several stations; readings rotate through them.
    #[arg(long = "place-id", default_value = "station-1")]
    place_ids: Vec<String>,
    #[arg(long, default_value_t = 2000)]
    interval_ms: u64,
    /// Readings to send per place; 0 keeps publishing until interrupted.
    #[arg(long, default_value_t = 0)]
    count: u64,
    #[arg(long, default_value_t = 21.0)]
    base_temperature: f64,
    #[arg(long, default_value_t = 55.0)]
    base_humidity: f64,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadingPayload<'a> {
    place_id: &'a str,
    temperature: f64,
    humidity: f64,
}

/// Random walk around a base value, clamped to a plausible band.
struct Drift {
    value: f64,
    min: f64,
    max: f64,
    step: f64,
}

impl Drift {
    fn new(base: f64, min: f64, max: f64, step: f64) -> Self {
        Self {
            value: base.clamp(min, max),
            min,
            max,
            step,
        }
    }

    fn next(&mut self, rng: &mut impl Rng) -> f64 {
        let delta = rng.gen_range(-self.step..=self.step);
        self.value = (self.value + delta).clamp(self.min, self.max);
        (self.value * 10.0).round() / 10.0
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (host, port) = parse_mqtt_url(&args.url)?;
    let mut options = MqttOptions::new(
        format!("weather-publish-{}", std::process::id()),
        host,
        port,
    );
    options.set_keep_alive(Duration::from_secs(10));
    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        options.set_credentials(username, password);
    }
    let (client, mut eventloop) = AsyncClient::new(options, 10);
    let poller = tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                tracing::warn!(error = %err, "mqtt event loop error");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    let mut stations: Vec<(String, Drift, Drift)> = args
        .place_ids
        .iter()
        .map(|id| {
            (
                id.clone(),
                Drift::new(args.base_temperature, -40.0, 60.0, 0.3),
                Drift::new(args.base_humidity, 0.0, 100.0, 1.0),
            )
        })
        .collect();

    let mut rng = rand::thread_rng();
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let limit = args.count.saturating_mul(stations.len() as u64);
    let mut sent: u64 = 0;
    while limit == 0 || sent < limit {
        ticker.tick().await;
        let slot = (sent as usize) % stations.len();
        let (place_id, temperature, humidity) = &mut stations[slot];
        let payload = ReadingPayload {
            place_id,
            temperature: temperature.next(&mut rng),
            humidity: humidity.next(&mut rng),
        };
        let bytes = serde_json::to_vec(&payload)?;
        client
            .publish(args.topic.as_str(), QoS::AtLeastOnce, false, bytes)
            .await
            .context("failed to queue reading for publish")?;
        sent += 1;
        tracing::info!(
            place_id = payload.place_id,
            temperature = payload.temperature,
            humidity = payload.humidity,
            sent,
            "reading published"
        );
    }

    // give the event loop a moment to drain the last publishes
    tokio::time::sleep(Duration::from_millis(500)).await;
    client.disconnect().await.ok();
    poller.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn drift_stays_inside_band() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut drift = Drift::new(99.5, 0.0, 100.0, 5.0);
        for _ in 0..500 {
            let value = drift.next(&mut rng);
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn payload_uses_place_id_key() {
        let json = serde_json::to_value(ReadingPayload {
            place_id: "roof",
            temperature: 0.0,
            humidity: 40.5,
        })
        .unwrap();
        assert_eq!(json["placeId"], "roof");
        assert_eq!(json["temperature"], 0.0);
    }
}
