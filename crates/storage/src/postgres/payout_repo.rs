//! Payout repository implementation for PostgreSQL.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use stakewatch_core::error::{StorageError, StorageResult};
use stakewatch_core::models::{EraAttribution, EraPayout};
use stakewatch_core::ports::{PayoutRepository, PayoutScope};

use super::helpers::{non_negative, row_index, to_bigint, to_int};

/// PostgreSQL implementation of PayoutRepository.
pub struct PgPayoutRepository {
    pool: PgPool,
}

impl PgPayoutRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// `WHERE` clause and bound value selecting one scope.
fn scope_condition(scope: PayoutScope) -> StorageResult<(&'static str, i64)> {
    Ok(match scope {
        PayoutScope::Block(number) => (
            "block_number = $1",
            to_bigint(number, "era_payout.block_number")?,
        ),
        PayoutScope::MadeInEra(era) => ("made_in_era = $1", i64::from(era)),
    })
}

#[async_trait]
impl PayoutRepository for PgPayoutRepository {
    async fn list_payouts(&self, scope: PayoutScope) -> StorageResult<Vec<EraPayout>> {
        let (condition, value) = scope_condition(scope)?;
        let query = format!(
            r#"
            SELECT event_id, extrinsic_id, block_number, block_date, account_address,
                   payout, paid_by, paid_for_era, made_in_era
            FROM era_payouts
            WHERE {condition}
            ORDER BY block_number ASC, event_index ASC
            "#
        );
        let rows = sqlx::query_as::<_, PayoutRow>(&query)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        rows.into_iter().map(PayoutRow::into_payout).collect()
    }

    async fn lowest_payout_block(&self) -> StorageResult<Option<u64>> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MIN(block_number) FROM era_payouts")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.0.map(|n| non_negative(n, "era_payout.block_number")).transpose()
    }

    async fn highest_payout_block(&self) -> StorageResult<Option<u64>> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(block_number) FROM era_payouts")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.0.map(|n| non_negative(n, "era_payout.block_number")).transpose()
    }
}

/// Delete every payout in `scope` and write the new ones on `conn`.
pub(super) async fn replace_payouts(
    conn: &mut PgConnection,
    scope: PayoutScope,
    payouts: &[EraPayout],
) -> StorageResult<()> {
    let (condition, value) = scope_condition(scope)?;
    sqlx::query(&format!("DELETE FROM era_payouts WHERE {condition}"))
        .bind(value)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

    for payout in payouts {
        // A re-attributed event may still sit in another scope.
        sqlx::query(
            r#"
            INSERT INTO era_payouts (
                event_id, extrinsic_id, block_number, event_index, block_date,
                account_address, payout, paid_by, paid_for_era, made_in_era
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (event_id) DO UPDATE SET
                extrinsic_id = EXCLUDED.extrinsic_id,
                block_number = EXCLUDED.block_number,
                event_index = EXCLUDED.event_index,
                block_date = EXCLUDED.block_date,
                account_address = EXCLUDED.account_address,
                payout = EXCLUDED.payout,
                paid_by = EXCLUDED.paid_by,
                paid_for_era = EXCLUDED.paid_for_era,
                made_in_era = EXCLUDED.made_in_era
            "#,
        )
        .bind(&payout.event_id)
        .bind(&payout.extrinsic_id)
        .bind(to_bigint(payout.block_number, "era_payout.block_number")?)
        .bind(row_index(&payout.event_id)?)
        .bind(payout.block_date)
        .bind(&payout.account_address)
        .bind(payout.payout)
        .bind(&payout.paid_by)
        .bind(
            payout
                .paid_for_era
                .era()
                .map(|e| to_int(e, "era_payout.paid_for_era"))
                .transpose()?,
        )
        .bind(to_int(payout.made_in_era, "era_payout.made_in_era")?)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;
    }

    Ok(())
}

#[derive(sqlx::FromRow)]
struct PayoutRow {
    event_id: String,
    extrinsic_id: String,
    block_number: i64,
    block_date: chrono::DateTime<chrono::Utc>,
    account_address: String,
    payout: Decimal,
    paid_by: Option<String>,
    paid_for_era: Option<i32>,
    made_in_era: i32,
}

impl PayoutRow {
    fn into_payout(self) -> StorageResult<EraPayout> {
        let paid_for_era: Option<u32> = self
            .paid_for_era
            .map(|e| non_negative(e.into(), "era_payout.paid_for_era"))
            .transpose()?;

        Ok(EraPayout {
            event_id: self.event_id,
            extrinsic_id: self.extrinsic_id,
            block_number: non_negative(self.block_number, "era_payout.block_number")?,
            block_date: self.block_date,
            account_address: self.account_address,
            payout: self.payout,
            paid_by: self.paid_by,
            paid_for_era: EraAttribution::from(paid_for_era),
            made_in_era: non_negative(self.made_in_era.into(), "era_payout.made_in_era")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_select_their_column() {
        assert_eq!(
            scope_condition(PayoutScope::Block(1_200)).unwrap(),
            ("block_number = $1", 1_200)
        );
        assert_eq!(
            scope_condition(PayoutScope::MadeInEra(11)).unwrap(),
            ("made_in_era = $1", 11)
        );
        assert!(scope_condition(PayoutScope::Block(u64::MAX)).is_err());
    }
}
