//! Event repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use stakewatch_core::error::{StorageError, StorageResult};
use stakewatch_core::models::Event;
use stakewatch_core::ports::EventRepository;

use super::helpers::{non_negative, to_bigint, to_int};

// =============================================================================
// Repository Implementation
// =============================================================================

/// PostgreSQL implementation of EventRepository.
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn list_events_for_block(&self, block_number: u64) -> StorageResult<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, block_number, index, section, method, data,
                   apply_extrinsic, phase, topics, block_date
            FROM events
            WHERE block_number = $1
            ORDER BY index ASC
            "#,
        )
        .bind(to_bigint(block_number, "event.block_number")?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        rows.into_iter().map(EventRow::into_event).collect()
    }

    async fn list_events_for_extrinsic(
        &self,
        block_number: u64,
        extrinsic_index: u32,
    ) -> StorageResult<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, block_number, index, section, method, data,
                   apply_extrinsic, phase, topics, block_date
            FROM events
            WHERE block_number = $1 AND apply_extrinsic = $2
            ORDER BY index ASC
            "#,
        )
        .bind(to_bigint(block_number, "event.block_number")?)
        .bind(to_int(extrinsic_index, "event.apply_extrinsic")?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        rows.into_iter().map(EventRow::into_event).collect()
    }
}

/// Delete the events of a block and write the new ones on `conn`.
pub(super) async fn replace_events(
    conn: &mut PgConnection,
    block_number: u64,
    events: &[Event],
) -> StorageResult<()> {
    sqlx::query("DELETE FROM events WHERE block_number = $1")
        .bind(to_bigint(block_number, "event.block_number")?)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

    for event in events {
        sqlx::query(
            r#"
            INSERT INTO events (
                id, block_number, index, section, method, data,
                apply_extrinsic, phase, topics, block_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&event.id)
        .bind(to_bigint(event.block_number, "event.block_number")?)
        .bind(to_int(event.index, "event.index")?)
        .bind(&event.section)
        .bind(&event.method)
        .bind(&event.data)
        .bind(
            event
                .apply_extrinsic
                .map(|i| to_int(i, "event.apply_extrinsic"))
                .transpose()?,
        )
        .bind(&event.phase)
        .bind(&event.topics)
        .bind(event.block_date)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;
    }

    Ok(())
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    block_number: i64,
    index: i32,
    section: String,
    method: String,
    data: serde_json::Value,
    apply_extrinsic: Option<i32>,
    phase: String,
    topics: Vec<String>,
    block_date: chrono::DateTime<chrono::Utc>,
}

impl EventRow {
    fn into_event(self) -> StorageResult<Event> {
        Ok(Event {
            id: self.id,
            block_number: non_negative(self.block_number, "event.block_number")?,
            index: non_negative(self.index.into(), "event.index")?,
            section: self.section,
            method: self.method,
            data: self.data,
            apply_extrinsic: self
                .apply_extrinsic
                .map(|i| non_negative(i.into(), "event.apply_extrinsic"))
                .transpose()?,
            phase: self.phase,
            topics: self.topics,
            block_date: self.block_date,
        })
    }
}
