use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use weather_rollup::config::Config;
use weather_rollup::dispatch::IngestDispatcher;
use weather_rollup::http::{router, HttpState};
use weather_rollup::mqtt::MqttSource;
use weather_rollup::pipeline::{spawn_worker, IngestStats, PersistCommand, PipelineHandle};
use weather_rollup::rollup::CascadeAggregator;
use weather_rollup::source::run_listener;
use weather_rollup::store::{AggregateStore, MemoryAggregateStore, PostgresAggregateStore};

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,weather_rollup=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "weather-rollup"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    match &config.database_url {
        Some(url) => {
            let store = PostgresAggregateStore::connect(url, config.db_pool_size).await?;
            if config.bootstrap_schema {
                store
                    .ensure_schema()
                    .await
                    .context("failed to create aggregate tables")?;
            }
            run(config, store).await
        }
        None => {
            tracing::warn!(
                "no database URL configured; aggregates are kept in memory and lost on exit"
            );
            run(config, MemoryAggregateStore::new()).await
        }
    }
}

async fn run<S: AggregateStore>(config: Config, store: S) -> Result<()> {
    let stats = Arc::new(IngestStats::new());
    let (tx, rx) = mpsc::channel::<PersistCommand>(config.persist_queue);
    let pipeline = PipelineHandle::new(tx, stats.clone());
    let worker_handle = spawn_worker(
        store.clone(),
        rx,
        stats.clone(),
        config.persist_concurrency,
    );

    let cascade = Arc::new(CascadeAggregator::new());
    let dispatcher = IngestDispatcher::new(cascade.clone(), pipeline.clone());

    let mut mqtt_handle = {
        let source = MqttSource::new(&config, stats.clone());
        tokio::spawn(async move { run_listener(source, dispatcher).await })
    };

    let listener = TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("failed to bind weather-rollup listener on {}", config.http_bind))?;
    tracing::info!(
        bind = %config.http_bind,
        broker = %format!("{}:{}", config.mqtt_host, config.mqtt_port),
        topic = %config.mqtt_topic,
        "weather-rollup started"
    );
    let app = router(HttpState {
        store,
        stats: stats.clone(),
        cascade,
    });
    let mut http_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    let mut exit_error = None;
    tokio::select! {
        res = &mut mqtt_handle => {
            match res {
                Ok(Ok(())) => tracing::info!("MQTT listener finished"),
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "MQTT listener gave up");
                    exit_error = Some(anyhow::Error::new(err));
                }
                Err(err) => tracing::error!(error = %err, "MQTT task failed"),
            }
        }
        res = &mut http_handle => {
            if let Ok(Err(err)) = res {
                tracing::error!(error = %err, "HTTP server exited");
                exit_error = Some(anyhow::Error::new(err));
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    mqtt_handle.abort();
    http_handle.abort();
    pipeline.flush().await?;
    let snapshot = stats.snapshot();
    tracing::info!(
        persisted = snapshot.persisted,
        persist_failures = snapshot.persist_failures,
        "pending aggregates flushed"
    );
    drop(pipeline);
    worker_handle.abort();

    match exit_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_otlp_http_endpoint;

    #[test]
    fn otlp_endpoint_gets_traces_path() {
        assert_eq!(
            normalize_otlp_http_endpoint("http://collector:4318/"),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(
            normalize_otlp_http_endpoint("http://collector:4318/v1/traces"),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(normalize_otlp_http_endpoint("  "), "");
    }
}
