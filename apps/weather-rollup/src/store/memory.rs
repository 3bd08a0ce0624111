use super::{AggregateStore, StoredRow};
use crate::error::StoreError;
use crate::rollup::{Aggregate, Granularity};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

/// Process-local store. Used when no database is configured and by tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryAggregateStore {
    tables: Arc<RwLock<HashMap<Granularity, Vec<StoredRow>>>>,
}

impl MemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self, granularity: Granularity) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&granularity)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl AggregateStore for MemoryAggregateStore {
    async fn persist(&self, aggregate: &Aggregate) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables
            .entry(aggregate.granularity)
            .or_default()
            .push(StoredRow::from(aggregate));
        Ok(())
    }

    async fn query(
        &self,
        granularity: Granularity,
        location_id: &str,
    ) -> Result<Vec<StoredRow>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .get(&granularity)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.place_id == location_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn distinct_location_ids(
        &self,
        granularity: Granularity,
    ) -> Result<BTreeSet<String>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .get(&granularity)
            .map(|rows| rows.iter().map(|row| row.place_id.clone()).collect())
            .unwrap_or_default())
    }
}
