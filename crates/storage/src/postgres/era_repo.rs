//! Era repository implementation for PostgreSQL.
//!
//! Covers the `eras` aggregate and its `era_validators` / `era_nominators`
//! snapshot. Snapshot writes go through [`insert_snapshot`] inside the
//! transaction opened by `PgRepositories::replace_era_snapshot`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use stakewatch_core::error::{StorageError, StorageResult};
use stakewatch_core::models::{Era, EraNominator, EraValidator};
use stakewatch_core::ports::EraRepository;

use super::helpers::{non_negative, to_int};

/// PostgreSQL implementation of EraRepository.
pub struct PgEraRepository {
    pool: PgPool,
}

impl PgEraRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ERA_COLUMNS: &str = "index, era_start_session_index, total_points, total_stake, \
                           validators_rewards, validators_arr_length";

#[async_trait]
impl EraRepository for PgEraRepository {
    async fn upsert_era(&self, era: &Era) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO eras (
                index, era_start_session_index, total_points, total_stake,
                validators_rewards, validators_arr_length
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (index) DO UPDATE SET
                era_start_session_index = EXCLUDED.era_start_session_index,
                total_points = EXCLUDED.total_points,
                total_stake = EXCLUDED.total_stake,
                validators_rewards = EXCLUDED.validators_rewards,
                validators_arr_length = EXCLUDED.validators_arr_length
            "#,
        )
        .bind(to_int(era.index, "era.index")?)
        .bind(to_int(era.era_start_session_index, "era.era_start_session_index")?)
        .bind(i64::from(era.total_points))
        .bind(era.total_stake)
        .bind(era.validators_rewards)
        .bind(to_int(era.validators_arr_length, "era.validators_arr_length")?)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn get_era(&self, index: u32) -> StorageResult<Option<Era>> {
        let query = format!("SELECT {ERA_COLUMNS} FROM eras WHERE index = $1");
        let row = sqlx::query_as::<_, EraRow>(&query)
            .bind(to_int(index, "era.index")?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(EraRow::into_era).transpose()
    }

    async fn lowest_era_index(&self) -> StorageResult<Option<u32>> {
        let row: (Option<i32>,) = sqlx::query_as("SELECT MIN(index) FROM eras")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.0.map(|i| non_negative(i.into(), "era.index")).transpose()
    }

    async fn highest_era_index(&self) -> StorageResult<Option<u32>> {
        let row: (Option<i32>,) = sqlx::query_as("SELECT MAX(index) FROM eras")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.0.map(|i| non_negative(i.into(), "era.index")).transpose()
    }

    async fn era_at_session(&self, session_index: u32) -> StorageResult<Option<Era>> {
        let query = format!(
            r#"
            SELECT {ERA_COLUMNS}
            FROM eras
            WHERE era_start_session_index <= $1
            ORDER BY era_start_session_index DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query_as::<_, EraRow>(&query)
            .bind(to_int(session_index, "session.index")?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(EraRow::into_era).transpose()
    }

    async fn list_validators(&self, era_index: u32) -> StorageResult<Vec<EraValidator>> {
        let rows = sqlx::query_as::<_, EraValidatorRow>(
            r#"
            SELECT era_index, validator_address, points, commission, blocked,
                   total_stake, own_stake, others_stake, nominators_arr_length
            FROM era_validators
            WHERE era_index = $1
            ORDER BY validator_address ASC
            "#,
        )
        .bind(to_int(era_index, "era.index")?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        rows.into_iter().map(EraValidatorRow::into_validator).collect()
    }

    async fn list_nominators(&self, era_index: u32) -> StorageResult<Vec<EraNominator>> {
        let rows = sqlx::query_as::<_, EraNominatorRow>(
            r#"
            SELECT era_index, validator_address, nominator_address, bonded
            FROM era_nominators
            WHERE era_index = $1
            ORDER BY validator_address ASC, nominator_address ASC
            "#,
        )
        .bind(to_int(era_index, "era.index")?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        rows.into_iter().map(EraNominatorRow::into_nominator).collect()
    }
}

/// Delete the snapshot of an era and write the new one on `conn`.
pub(super) async fn insert_snapshot(
    conn: &mut PgConnection,
    era_index: u32,
    validators: &[EraValidator],
    nominators: &[EraNominator],
) -> StorageResult<()> {
    sqlx::query("DELETE FROM era_nominators WHERE era_index = $1")
        .bind(to_int(era_index, "era.index")?)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

    sqlx::query("DELETE FROM era_validators WHERE era_index = $1")
        .bind(to_int(era_index, "era.index")?)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

    for validator in validators {
        sqlx::query(
            r#"
            INSERT INTO era_validators (
                era_index, validator_address, points, commission, blocked,
                total_stake, own_stake, others_stake, nominators_arr_length
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(to_int(validator.era_index, "era_validator.era_index")?)
        .bind(&validator.validator_address)
        .bind(i64::from(validator.points))
        .bind(validator.commission)
        .bind(validator.blocked)
        .bind(validator.total_stake)
        .bind(validator.own_stake)
        .bind(validator.others_stake)
        .bind(to_int(validator.nominators_arr_length, "era_validator.nominators_arr_length")?)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;
    }

    for nominator in nominators {
        sqlx::query(
            r#"
            INSERT INTO era_nominators (era_index, validator_address, nominator_address, bonded)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(to_int(nominator.era_index, "era_nominator.era_index")?)
        .bind(&nominator.validator_address)
        .bind(&nominator.nominator_address)
        .bind(nominator.bonded)
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
struct EraRow {
    index: i32,
    era_start_session_index: i32,
    total_points: i64,
    total_stake: Decimal,
    validators_rewards: Decimal,
    validators_arr_length: i32,
}

impl EraRow {
    fn into_era(self) -> StorageResult<Era> {
        Ok(Era {
            index: non_negative(self.index.into(), "era.index")?,
            era_start_session_index: non_negative(
                self.era_start_session_index.into(),
                "era.era_start_session_index",
            )?,
            total_points: non_negative(self.total_points, "era.total_points")?,
            total_stake: self.total_stake,
            validators_rewards: self.validators_rewards,
            validators_arr_length: non_negative(
                self.validators_arr_length.into(),
                "era.validators_arr_length",
            )?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EraValidatorRow {
    era_index: i32,
    validator_address: String,
    points: i64,
    commission: Decimal,
    blocked: bool,
    total_stake: Decimal,
    own_stake: Decimal,
    others_stake: Decimal,
    nominators_arr_length: i32,
}

impl EraValidatorRow {
    fn into_validator(self) -> StorageResult<EraValidator> {
        Ok(EraValidator {
            era_index: non_negative(self.era_index.into(), "era_validator.era_index")?,
            validator_address: self.validator_address,
            points: non_negative(self.points, "era_validator.points")?,
            commission: self.commission,
            blocked: self.blocked,
            total_stake: self.total_stake,
            own_stake: self.own_stake,
            others_stake: self.others_stake,
            nominators_arr_length: non_negative(
                self.nominators_arr_length.into(),
                "era_validator.nominators_arr_length",
            )?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EraNominatorRow {
    era_index: i32,
    validator_address: String,
    nominator_address: String,
    bonded: Decimal,
}

impl EraNominatorRow {
    fn into_nominator(self) -> StorageResult<EraNominator> {
        Ok(EraNominator {
            era_index: non_negative(self.era_index.into(), "era_nominator.era_index")?,
            validator_address: self.validator_address,
            nominator_address: self.nominator_address,
            bonded: self.bonded,
        })
    }
}
