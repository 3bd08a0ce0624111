use crate::rollup::Aggregate;
use crate::store::AggregateStore;
use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};

#[derive(Debug)]
pub enum PersistCommand {
    Aggregate(Aggregate),
    Flush(oneshot::Sender<()>),
}

/// Sending half of the persistence queue. Cloned into every producer.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<PersistCommand>,
    stats: Arc<IngestStats>,
}

impl PipelineHandle {
    pub fn new(tx: mpsc::Sender<PersistCommand>, stats: Arc<IngestStats>) -> Self {
        Self { tx, stats }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Queues one aggregate. Waits for room when the queue is full.
    pub async fn enqueue(&self, aggregate: Aggregate) -> Result<()> {
        let queue_depth = self.stats.queue_depth.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(
            queue_depth,
            location_id = %aggregate.location_id,
            granularity = %aggregate.granularity,
            "queued aggregate"
        );
        if let Err(err) = self.tx.send(PersistCommand::Aggregate(aggregate)).await {
            self.stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
            return Err(err.into());
        }
        Ok(())
    }

    /// Resolves once everything queued before the call has been written or has failed.
    /// Waits until every aggregate queued before this call has been written or has failed.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(PersistCommand::Flush(tx))
            .await
            .map_err(|_| anyhow!("persistence worker stopped before flush"))?;
        rx.await
            .map_err(|_| anyhow!("persistence worker stopped during flush"))
    }
}

#[derive(Debug)]
pub struct IngestStats {
    pub messages_received: AtomicU64,
    pub readings_accepted: AtomicU64,
    pub readings_rejected: AtomicU64,
    pub aggregates_emitted: AtomicU64,
    pub queue_depth: AtomicU64,
    pub inflight_persists: AtomicU64,
    pub persisted: AtomicU64,
    pub persist_failures: AtomicU64,
    pub last_persist_unix_ms: AtomicU64,
    pub mqtt_connected: AtomicBool,
    pub last_error: Mutex<Option<String>>,
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            readings_accepted: AtomicU64::new(0),
            readings_rejected: AtomicU64::new(0),
            aggregates_emitted: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            inflight_persists: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            last_persist_unix_ms: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            readings_accepted: self.readings_accepted.load(Ordering::Relaxed),
            readings_rejected: self.readings_rejected.load(Ordering::Relaxed),
            aggregates_emitted: self.aggregates_emitted.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            inflight_persists: self.inflight_persists.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            last_persist_unix_ms: self.last_persist_unix_ms.load(Ordering::Relaxed),
            mqtt_connected: self.mqtt_connected.load(Ordering::Relaxed),
            last_error: self.last_error.lock().ok().and_then(|e| e.clone()),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub readings_accepted: u64,
    pub readings_rejected: u64,
    pub aggregates_emitted: u64,
    pub queue_depth: u64,
    pub inflight_persists: u64,
    pub persisted: u64,
    pub persist_failures: u64,
    pub last_persist_unix_ms: u64,
    pub mqtt_connected: bool,
    pub last_error: Option<String>,
}

/// Drains the persistence queue, keeping at most `concurrency` store writes in flight.
///
/// A failed write is logged and counted; it is not retried and does not hold up later
/// aggregates.
pub fn spawn_worker<S: AggregateStore>(
    store: S,
    mut rx: mpsc::Receiver<PersistCommand>,
    stats: Arc<IngestStats>,
    concurrency: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut inflight: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                Some(result) = inflight.join_next(), if !inflight.is_empty() => reap(result),
                cmd = rx.recv() => {
                    match cmd {
                        Some(PersistCommand::Aggregate(aggregate)) => {
                            stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
                            while let Some(result) = inflight.try_join_next() {
                                reap(result);
                            }
                            let Ok(permit) = permits.clone().acquire_owned().await else {
                                break;
                            };
                            let store = store.clone();
                            let stats = stats.clone();
                            inflight.spawn(async move {
                                persist_one(&store, &aggregate, &stats).await;
                                drop(permit);
                            });
                        }
                        Some(PersistCommand::Flush(done)) => {
                            drain(&mut inflight).await;
                            let _ = done.send(());
                        }
                        None => {
                            drain(&mut inflight).await;
                            break;
                        }
                    }
                }
            }
        }
    })
}

async fn drain(inflight: &mut JoinSet<()>) {
    while let Some(result) = inflight.join_next().await {
        reap(result);
    }
}

fn reap(result: Result<(), JoinError>) {
    if let Err(err) = result {
        tracing::error!(error=%err, "persistence task panicked");
    }
}

async fn persist_one<S: AggregateStore>(store: &S, aggregate: &Aggregate, stats: &IngestStats) {
    let table = aggregate.granularity.table_name();
    stats.inflight_persists.fetch_add(1, Ordering::Relaxed);
    let result = store.persist(aggregate).await;
    stats.inflight_persists.fetch_sub(1, Ordering::Relaxed);

    match result {
        Ok(()) => {
            stats.persisted.fetch_add(1, Ordering::Relaxed);
            let now = Utc::now().timestamp_millis() as u64;
            stats.last_persist_unix_ms.store(now, Ordering::Relaxed);
            stats.clear_error();
            tracing::debug!(table, location_id = %aggregate.location_id, "saved aggregate");
        }
        Err(err) => {
            stats.persist_failures.fetch_add(1, Ordering::Relaxed);
            stats.record_error(err.to_string());
            tracing::warn!(
                error = %err,
                table,
                location_id = %aggregate.location_id,
                "failed to persist aggregate; dropping it"
            );
        }
    }
}
