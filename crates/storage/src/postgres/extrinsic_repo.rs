//! Extrinsic repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use stakewatch_core::error::{StorageError, StorageResult};
use stakewatch_core::models::Extrinsic;
use stakewatch_core::ports::{ExtrinsicFilter, ExtrinsicRepository};

use super::helpers::{non_negative, text_to_u128, to_bigint, to_int};

// =============================================================================
// Repository Implementation
// =============================================================================

/// PostgreSQL implementation of ExtrinsicRepository.
pub struct PgExtrinsicRepository {
    pool: PgPool,
}

impl PgExtrinsicRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const EXTRINSIC_COLUMNS: &str = "id, block_number, index, section, method, args, is_signed, \
                                 signer, nonce, tip::TEXT AS tip, block_date";

#[async_trait]
impl ExtrinsicRepository for PgExtrinsicRepository {
    async fn list_extrinsics_for_block(&self, block_number: u64) -> StorageResult<Vec<Extrinsic>> {
        let query = format!(
            "SELECT {EXTRINSIC_COLUMNS} FROM extrinsics WHERE block_number = $1 ORDER BY index ASC"
        );
        let rows = sqlx::query_as::<_, ExtrinsicRow>(&query)
            .bind(to_bigint(block_number, "extrinsic.block_number")?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        rows.into_iter().map(ExtrinsicRow::into_extrinsic).collect()
    }

    async fn list_extrinsics(&self, filter: ExtrinsicFilter) -> StorageResult<Vec<Extrinsic>> {
        // Column names and operators are fixed; every value is bound.
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {EXTRINSIC_COLUMNS} FROM extrinsics WHERE TRUE"));

        if let Some(gte) = filter.block_number_gte {
            query.push(" AND block_number >= ").push_bind(to_bigint(gte, "extrinsic.block_number")?);
        }
        if let Some(lte) = filter.block_number_lte {
            query.push(" AND block_number <= ").push_bind(to_bigint(lte, "extrinsic.block_number")?);
        }
        if !filter.calls.is_empty() {
            query.push(" AND (");
            let mut calls = query.separated(" OR ");
            for (section, method) in &filter.calls {
                calls
                    .push("(section = ")
                    .push_bind_unseparated(section.clone())
                    .push_unseparated(" AND method = ")
                    .push_bind_unseparated(method.clone())
                    .push_unseparated(")");
            }
            query.push(")");
        }
        query.push(" ORDER BY block_number ASC, index ASC");

        let rows: Vec<ExtrinsicRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        rows.into_iter().map(ExtrinsicRow::into_extrinsic).collect()
    }
}

/// Delete the extrinsics of a block and write the new ones on `conn`.
pub(super) async fn replace_extrinsics(
    conn: &mut PgConnection,
    block_number: u64,
    extrinsics: &[Extrinsic],
) -> StorageResult<()> {
    sqlx::query("DELETE FROM extrinsics WHERE block_number = $1")
        .bind(to_bigint(block_number, "extrinsic.block_number")?)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

    for ext in extrinsics {
        sqlx::query(
            r#"
            INSERT INTO extrinsics (
                id, block_number, index, section, method, args,
                is_signed, signer, nonce, tip, block_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::NUMERIC, $11)
            "#,
        )
        .bind(&ext.id)
        .bind(to_bigint(ext.block_number, "extrinsic.block_number")?)
        .bind(to_int(ext.index, "extrinsic.index")?)
        .bind(&ext.section)
        .bind(&ext.method)
        .bind(&ext.args)
        .bind(ext.is_signed)
        .bind(&ext.signer)
        .bind(to_bigint(ext.nonce, "extrinsic.nonce")?)
        .bind(ext.tip.to_string())
        .bind(ext.block_date)
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
struct ExtrinsicRow {
    id: String,
    block_number: i64,
    index: i32,
    section: String,
    method: String,
    args: serde_json::Value,
    is_signed: bool,
    signer: String,
    nonce: i64,
    tip: String,
    block_date: chrono::DateTime<chrono::Utc>,
}

impl ExtrinsicRow {
    fn into_extrinsic(self) -> StorageResult<Extrinsic> {
        Ok(Extrinsic {
            id: self.id,
            block_number: non_negative(self.block_number, "extrinsic.block_number")?,
            index: non_negative(self.index.into(), "extrinsic.index")?,
            section: self.section,
            method: self.method,
            args: self.args,
            is_signed: self.is_signed,
            signer: self.signer,
            nonce: non_negative(self.nonce, "extrinsic.nonce")?,
            tip: text_to_u128(&self.tip, "extrinsic.tip")?,
            block_date: self.block_date,
        })
    }
}
