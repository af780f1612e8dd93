//! PostgreSQL implementation of the event store.
//!
//! Two tables back the pipeline: `hookwire_processed` holds one marker per
//! terminally-processed event identifier, and `hookwire_dead_letters` holds
//! permanently-failed events. Markers use `ON CONFLICT DO NOTHING` so
//! concurrent writers for the same event identifier collapse to one row.

use super::{DeadLetterEntry, EventStore, ProcessedMarker};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// Event store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hookwire_processed (
                event_id VARCHAR(255) PRIMARY KEY,
                event_type VARCHAR(255) NOT NULL,
                processed_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hookwire_dead_letters (
                id BIGSERIAL PRIMARY KEY,
                event_id VARCHAR(255) NOT NULL,
                event_type VARCHAR(255) NOT NULL,
                payload JSONB NOT NULL,
                reason TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                event_created_at TIMESTAMPTZ NOT NULL,
                failed_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_hookwire_dead_letters_event_id
             ON hookwire_dead_letters (event_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_processed(&self, event_id: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM hookwire_processed WHERE event_id = $1
                UNION ALL
                SELECT 1 FROM hookwire_dead_letters WHERE event_id = $1
            ) AS present
            "#,
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<bool, _>("present"))
    }

    async fn record_processed(&self, marker: ProcessedMarker) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO hookwire_processed (event_id, event_type, processed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&marker.event_id)
        .bind(&marker.event_type)
        .bind(marker.processed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_dead_letter(&self, entry: DeadLetterEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO hookwire_dead_letters (
                event_id, event_type, payload, reason, attempts,
                event_created_at, failed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&entry.event_id)
        .bind(&entry.event_type)
        .bind(&entry.payload)
        .bind(&entry.reason)
        .bind(entry.attempts as i32)
        .bind(entry.event_created_at)
        .bind(entry.failed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_dead_letters(
        &self,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<DeadLetterEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, event_type, payload, reason, attempts,
                   event_created_at, failed_at
            FROM hookwire_dead_letters
            ORDER BY failed_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit.unwrap_or(100) as i64)
        .bind(offset.unwrap_or(0) as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DeadLetterEntry {
                event_id: row.get("event_id"),
                event_type: row.get("event_type"),
                payload: row.get("payload"),
                reason: row.get("reason"),
                attempts: row.get::<i32, _>("attempts") as u32,
                event_created_at: row.get("event_created_at"),
                failed_at: row.get("failed_at"),
            })
            .collect())
    }

    async fn count_dead_letters(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM hookwire_dead_letters")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get::<i64, _>("count") as u64)
    }

    async fn purge_dead_letters(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM hookwire_dead_letters WHERE failed_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
