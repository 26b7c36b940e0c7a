//! Block repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use stakewatch_core::error::{StorageError, StorageResult};
use stakewatch_core::models::{Block, BlockHash};
use stakewatch_core::ports::BlockRepository;

use super::database::Database;
use super::helpers::{bytes_to_hash32_strict, non_negative, to_bigint};

/// PostgreSQL implementation of BlockRepository.
pub struct PgBlockRepository {
    pool: PgPool,
}

impl PgBlockRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl BlockRepository for PgBlockRepository {
    async fn insert_block_if_absent(&self, block: &Block) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO blocks (number, hash, start_date_time)
            VALUES ($1, $2, $3)
            ON CONFLICT (number) DO NOTHING
            "#,
        )
        .bind(to_bigint(block.number, "block.number")?)
        .bind(&block.hash.0[..])
        .bind(block.start_date_time)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>> {
        let row = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT number, hash, start_date_time
            FROM blocks
            WHERE number = $1
            "#,
        )
        .bind(to_bigint(number, "block.number")?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(BlockRow::into_block).transpose()
    }

    async fn lowest_block_number(&self) -> StorageResult<Option<u64>> {
        // MIN returns NULL when table is empty
        let row: (Option<i64>,) = sqlx::query_as("SELECT MIN(number) FROM blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.0.map(|n| non_negative(n, "block.number")).transpose()
    }

    async fn highest_block_number(&self) -> StorageResult<Option<u64>> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(number) FROM blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.0.map(|n| non_negative(n, "block.number")).transpose()
    }
}

/// Database row representation for Block.
#[derive(sqlx::FromRow)]
struct BlockRow {
    number: i64,
    hash: Vec<u8>,
    start_date_time: chrono::DateTime<chrono::Utc>,
}

impl BlockRow {
    fn into_block(self) -> StorageResult<Block> {
        Ok(Block {
            number: non_negative(self.number, "block.number")?,
            hash: BlockHash(bytes_to_hash32_strict(self.hash, "block.hash")?),
            start_date_time: self.start_date_time,
        })
    }
}
