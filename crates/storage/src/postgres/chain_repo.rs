//! Chain checkpoint repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use stakewatch_core::error::{StorageError, StorageResult};
use stakewatch_core::models::Chain;
use stakewatch_core::ports::ChainRepository;

use super::database::Database;
use super::helpers::{non_negative, to_bigint};

/// PostgreSQL implementation of ChainRepository.
pub struct PgChainRepository {
    pool: PgPool,
}

impl PgChainRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl ChainRepository for PgChainRepository {
    async fn get_chain(&self, name: &str) -> StorageResult<Option<Chain>> {
        let row = sqlx::query_as::<_, ChainRow>(
            r#"
            SELECT name, last_grabbed_block
            FROM chains
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(ChainRow::into_chain).transpose()
    }

    async fn set_last_grabbed_block(&self, name: &str, block: Option<u64>) -> StorageResult<()> {
        let result = sqlx::query("UPDATE chains SET last_grabbed_block = $1 WHERE name = $2")
            .bind(block.map(|b| to_bigint(b, "chain.last_grabbed_block")).transpose()?)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("chain {name}")));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct ChainRow {
    name: String,
    last_grabbed_block: Option<i64>,
}

impl ChainRow {
    fn into_chain(self) -> StorageResult<Chain> {
        Ok(Chain {
            name: self.name,
            last_grabbed_block: self
                .last_grabbed_block
                .map(|b| non_negative(b, "chain.last_grabbed_block"))
                .transpose()?,
        })
    }
}
