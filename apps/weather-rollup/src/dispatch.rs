use crate::error::ValidationError;
use crate::payload::parse_reading_payload;
use crate::pipeline::{IngestStats, PipelineHandle};
use crate::rollup::{Aggregate, CascadeAggregator, Granularity, Reading};
use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Reading accepted; carries whatever the cascade emitted (possibly nothing).
    Accepted(Vec<Aggregate>),
    Rejected(ValidationError),
}

/// Boundary between the message source and the rollup cascade.
#[derive(Clone)]
pub struct IngestDispatcher {
    cascade: Arc<CascadeAggregator>,
    pipeline: PipelineHandle,
    stats: Arc<IngestStats>,
}

impl IngestDispatcher {
    pub fn new(cascade: Arc<CascadeAggregator>, pipeline: PipelineHandle) -> Self {
        let stats = pipeline.stats();
        Self {
            cascade,
            pipeline,
            stats,
        }
    }

    pub fn cascade(&self) -> &Arc<CascadeAggregator> {
        &self.cascade
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    pub async fn flush(&self) -> anyhow::Result<()> {
        self.pipeline.flush().await
    }

    /// Decodes and ingests one raw payload. Invalid payloads are logged and dropped.
    pub async fn handle_payload(
        &self,
        topic: &str,
        payload: &mut [u8],
        received_at: DateTime<Utc>,
    ) -> DispatchOutcome {
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
        match parse_reading_payload(payload, received_at) {
            Ok(reading) => DispatchOutcome::Accepted(self.handle_reading(reading).await),
            Err(err) => {
                self.stats.readings_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %err, kind = err.kind(), topic, "dropping invalid message");
                DispatchOutcome::Rejected(err)
            }
        }
    }

    /// Runs a validated reading through the cascade and queues every emitted aggregate.
    pub async fn handle_reading(&self, reading: Reading) -> Vec<Aggregate> {
        self.stats.readings_accepted.fetch_add(1, Ordering::Relaxed);
        let emitted = self.cascade.ingest(&reading);

        for aggregate in &emitted {
            self.stats.aggregates_emitted.fetch_add(1, Ordering::Relaxed);
            if aggregate.granularity == Granularity::Minute {
                tracing::debug!(
                    location_id = %aggregate.location_id,
                    temperature = aggregate.median_temperature,
                    humidity = aggregate.median_humidity,
                    "minute aggregate computed"
                );
            } else {
                tracing::info!(
                    location_id = %aggregate.location_id,
                    granularity = %aggregate.granularity,
                    temperature = aggregate.median_temperature,
                    humidity = aggregate.median_humidity,
                    "aggregate computed"
                );
            }

            if let Err(err) = self.pipeline.enqueue(aggregate.clone()).await {
                self.stats.persist_failures.fetch_add(1, Ordering::Relaxed);
                self.stats.record_error(err.to_string());
                tracing::warn!(
                    error = %err,
                    table = aggregate.granularity.table_name(),
                    location_id = %aggregate.location_id,
                    "persistence queue closed; aggregate not saved"
                );
            }
        }

        emitted
    }
}
