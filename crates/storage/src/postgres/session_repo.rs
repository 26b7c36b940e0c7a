//! Session repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use stakewatch_core::error::{StorageError, StorageResult};
use stakewatch_core::models::Session;
use stakewatch_core::ports::SessionRepository;

use super::helpers::{non_negative, to_bigint, to_int};

/// PostgreSQL implementation of SessionRepository.
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_ordered(&self, query: &str) -> StorageResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(query)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(SessionRow::into_session).transpose()
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn insert_session_if_absent(&self, session: &Session) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO sessions (index, start_block_number)
            VALUES ($1, $2)
            ON CONFLICT (index) DO NOTHING
            "#,
        )
        .bind(to_int(session.index, "session.index")?)
        .bind(to_bigint(session.start_block_number, "session.start_block_number")?)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_session(&self, index: u32) -> StorageResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT index, start_block_number FROM sessions WHERE index = $1",
        )
        .bind(to_int(index, "session.index")?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn session_at_block(&self, block_number: u64) -> StorageResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT index, start_block_number
            FROM sessions
            WHERE start_block_number <= $1
            ORDER BY start_block_number DESC
            LIMIT 1
            "#,
        )
        .bind(to_bigint(block_number, "block.number")?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn latest_session(&self) -> StorageResult<Option<Session>> {
        self.fetch_one_ordered(
            "SELECT index, start_block_number FROM sessions ORDER BY start_block_number DESC LIMIT 1",
        )
        .await
    }

    async fn earliest_session(&self) -> StorageResult<Option<Session>> {
        self.fetch_one_ordered(
            "SELECT index, start_block_number FROM sessions ORDER BY start_block_number ASC LIMIT 1",
        )
        .await
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    index: i32,
    start_block_number: i64,
}

impl SessionRow {
    fn into_session(self) -> StorageResult<Session> {
        Ok(Session {
            index: non_negative(self.index.into(), "session.index")?,
            start_block_number: non_negative(self.start_block_number, "session.start_block_number")?,
        })
    }
}
