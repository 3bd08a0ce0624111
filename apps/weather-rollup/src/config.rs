use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_MQTT_URL: &str = "mqtt://127.0.0.1:1883";
const DEFAULT_MQTT_TOPIC: &str = "/weather_station/periodical";
const DEFAULT_HTTP_PORT: u16 = 3000;

fn config_override_path() -> Option<PathBuf> {
    env::var("ROLLUP_CONFIG_PATH")
        .ok()
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

/// Optional JSON file whose keys fill in anything the environment leaves unset.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigOverrides {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    mqtt_url: Option<String>,
    #[serde(default)]
    mqtt_username: Option<String>,
    #[serde(default)]
    mqtt_password: Option<String>,
    #[serde(default)]
    mqtt_topic: Option<String>,
    #[serde(default)]
    http_bind: Option<String>,
    #[serde(default)]
    persist_queue: Option<usize>,
    #[serde(default)]
    persist_concurrency: Option<usize>,
}

fn load_config_overrides() -> Option<ConfigOverrides> {
    let path = config_override_path()?;
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "weather-rollup failed to read config overrides; using env defaults"
            );
            return None;
        }
    };
    parse_overrides(contents.into_bytes())
}

fn parse_overrides(mut bytes: Vec<u8>) -> Option<ConfigOverrides> {
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(error = %err, "weather-rollup failed to parse config overrides; using env defaults");
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: Option<String>,
    pub db_pool_size: u32,
    pub bootstrap_schema: bool,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic: String,
    pub mqtt_client_id: String,
    pub mqtt_keepalive_secs: u64,
    pub mqtt_reconnect_delay_ms: u64,
    pub mqtt_max_reconnects: u32,
    pub http_bind: String,
    pub persist_queue: usize,
    pub persist_concurrency: usize,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let overrides = load_config_overrides().unwrap_or_default();

        let database_url = env_optional("ROLLUP_DATABASE_URL")
            .or_else(|| env_optional("DATABASE_URL"))
            .or_else(|| non_empty(overrides.database_url.clone()))
            .map(normalize_database_url);
        let db_pool_size = env_parse("ROLLUP_DB_POOL_SIZE").unwrap_or(10);
        let bootstrap_schema = env_optional("ROLLUP_BOOTSTRAP_SCHEMA")
            .map(|v| parse_bool(&v))
            .unwrap_or(true);

        let mqtt_url = env_optional("ROLLUP_MQTT_URL")
            .or_else(|| env_optional("MQTT_SERVER").map(|server| format!("mqtt://{server}")))
            .or_else(|| non_empty(overrides.mqtt_url.clone()))
            .unwrap_or_else(|| DEFAULT_MQTT_URL.to_string());
        let (mqtt_host, mqtt_port) = parse_mqtt_url(&mqtt_url)?;

        let mqtt_username = env_optional("ROLLUP_MQTT_USERNAME")
            .or_else(|| env_optional("MQTT_USERNAME"))
            .or_else(|| non_empty(overrides.mqtt_username.clone()));
        let mqtt_password = env_optional("ROLLUP_MQTT_PASSWORD")
            .or_else(|| env_optional("MQTT_PASSWORD"))
            .or_else(|| non_empty(overrides.mqtt_password.clone()));
        let mqtt_topic = env_optional("ROLLUP_MQTT_TOPIC")
            .or_else(|| env_optional("MQTT_TOPIC"))
            .or_else(|| non_empty(overrides.mqtt_topic.clone()))
            .unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string());
        let mqtt_client_id = env_optional("ROLLUP_MQTT_CLIENT_ID")
            .unwrap_or_else(|| format!("weather-rollup-{}", std::process::id()));
        let mqtt_keepalive_secs = env_parse("ROLLUP_MQTT_KEEPALIVE_SECS").unwrap_or(30);
        let mqtt_reconnect_delay_ms = env_parse("ROLLUP_MQTT_RECONNECT_DELAY_MS").unwrap_or(1000);
        let mqtt_max_reconnects = env_parse("ROLLUP_MQTT_MAX_RECONNECTS").unwrap_or(0);

        let http_bind = env_optional("ROLLUP_HTTP_BIND")
            .or_else(|| {
                env_parse::<u16>("PORT").map(|port| format!("0.0.0.0:{port}"))
            })
            .or_else(|| non_empty(overrides.http_bind.clone()))
            .unwrap_or_else(|| format!("0.0.0.0:{DEFAULT_HTTP_PORT}"));

        let persist_queue = env_parse("ROLLUP_PERSIST_QUEUE")
            .or(overrides.persist_queue)
            .unwrap_or(1024)
            .max(1);
        let persist_concurrency = env_parse("ROLLUP_PERSIST_CONCURRENCY")
            .or(overrides.persist_concurrency)
            .unwrap_or(4)
            .max(1);
        let otlp_endpoint = env_optional("OTEL_EXPORTER_OTLP_ENDPOINT");

        Ok(Self {
            database_url,
            db_pool_size,
            bootstrap_schema,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic,
            mqtt_client_id,
            mqtt_keepalive_secs,
            mqtt_reconnect_delay_ms,
            mqtt_max_reconnects,
            http_bind,
            persist_queue,
            persist_concurrency,
            otlp_endpoint,
        })
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn mqtt_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.mqtt_reconnect_delay_ms)
    }
}

fn env_optional(key: &str) -> Option<String> {
    non_empty(env::var(key).ok())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_optional(key).and_then(|v| v.parse::<T>().ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(raw: &str) -> bool {
    raw == "1" || raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("yes")
}

pub fn parse_mqtt_url(raw: &str) -> Result<(String, u16)> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid MQTT URL {raw:?}"))?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("MQTT URL {raw:?} is missing a host"))?
        .to_string();
    let port = url.port().unwrap_or(1883);
    Ok((host, port))
}

fn normalize_database_url(url: String) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_broker_host_and_port() {
        assert_eq!(
            parse_mqtt_url("mqtt://broker.local:1884").unwrap(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(
            parse_mqtt_url("mqtt://10.0.0.5").unwrap(),
            ("10.0.0.5".to_string(), 1883)
        );
        assert!(parse_mqtt_url("not a url").is_err());
    }

    #[test]
    fn strips_driver_suffix_from_database_url() {
        assert_eq!(
            normalize_database_url("postgresql+asyncpg://u@h/db".to_string()),
            "postgresql://u@h/db"
        );
        assert_eq!(
            normalize_database_url("postgres://u@h/db".to_string()),
            "postgres://u@h/db"
        );
    }

    #[test]
    fn reads_override_file_fields() {
        let overrides = parse_overrides(
            br#"{"mqtt_topic":"/stations/roof","persist_concurrency":8,"unknown":1}"#.to_vec(),
        )
        .expect("overrides");
        assert_eq!(overrides.mqtt_topic.as_deref(), Some("/stations/roof"));
        assert_eq!(overrides.persist_concurrency, Some(8));
        assert!(overrides.database_url.is_none());

        assert!(parse_overrides(b"{not json".to_vec()).is_none());
    }

    #[test]
    fn bool_flags_accept_common_spellings() {
        assert!(parse_bool("1"));
        assert!(parse_bool("TRUE"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("off"));
    }
}
