mod memory;
mod postgres;


pub use memory::MemoryAggregateStore;
pub use postgres::PostgresAggregateStore;

use crate::error::StoreError;
use crate::rollup::{Aggregate, Granularity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;

/// One persisted aggregate as read back from a granularity table.
#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct StoredRow {
    pub place_id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&Aggregate> for StoredRow {
    fn from(aggregate: &Aggregate) -> Self {
        Self {
            place_id: aggregate.location_id.clone(),
            temperature: aggregate.median_temperature,
            humidity: aggregate.median_humidity,
            created_at: aggregate.computed_at,
        }
    }
}

/// Durable home for computed aggregates: one table per granularity keyed by place id.
pub trait AggregateStore: Clone + Send + Sync + 'static {
    /// Writes one aggregate to the table of its granularity.
    fn persist(&self, aggregate: &Aggregate) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// All rows for `location_id` at `granularity`, oldest first.
    fn query(
        &self,
        granularity: Granularity,
        location_id: &str,
    ) -> impl Future<Output = Result<Vec<StoredRow>, StoreError>> + Send;

    fn distinct_location_ids(
        &self,
        granularity: Granularity,
    ) -> impl Future<Output = Result<BTreeSet<String>, StoreError>> + Send;
}
