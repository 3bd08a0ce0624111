use super::{AggregateStore, StoredRow};
use crate::error::StoreError;
use crate::rollup::{Aggregate, Granularity};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct PostgresAggregateStore {
    pool: PgPool,
}

impl PostgresAggregateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(8))
            .connect(database_url)
            .await
            .context("failed to connect to the aggregate database")?;
        Ok(Self::new(pool))
    }

    /// Creates the five granularity tables when they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for granularity in Granularity::ALL {
            let table = granularity.table_name();
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id bigserial primary key,
                    place_id text not null,
                    temperature double precision not null,
                    humidity double precision not null,
                    created_at timestamptz not null default now()
                )
                "#
            ))
            .execute(&self.pool)
            .await?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS {table}_place_id_idx ON {table} (place_id)"
            ))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

impl AggregateStore for PostgresAggregateStore {
    async fn persist(&self, aggregate: &Aggregate) -> Result<(), StoreError> {
        let table = aggregate.granularity.table_name();
        let result = sqlx::query(&format!(
            "INSERT INTO {table} (place_id, temperature, humidity, created_at) VALUES ($1, $2, $3, $4)"
        ))
        .bind(&aggregate.location_id)
        .bind(aggregate.median_temperature)
        .bind(aggregate.median_humidity)
        .bind(aggregate.computed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Rejected {
                table,
                reason: format!("expected 1 row inserted, got {}", result.rows_affected()),
            });
        }
        Ok(())
    }

    async fn query(
        &self,
        granularity: Granularity,
        location_id: &str,
    ) -> Result<Vec<StoredRow>, StoreError> {
        let table = granularity.table_name();
        let rows: Vec<StoredRow> = sqlx::query_as(&format!(
            "SELECT place_id, temperature, humidity, created_at FROM {table} WHERE place_id = $1 ORDER BY created_at, id"
        ))
        .bind(location_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn distinct_location_ids(
        &self,
        granularity: Granularity,
    ) -> Result<BTreeSet<String>, StoreError> {
        let table = granularity.table_name();
        let ids: Vec<String> =
            sqlx::query_scalar(&format!("SELECT DISTINCT place_id FROM {table}"))
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().collect())
    }
}
