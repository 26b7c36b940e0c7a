//! Storage layer for the stakewatch indexer.
//!
//! This crate provides PostgreSQL implementations of the repository traits
//! defined in `stakewatch-core`. It handles all database interactions
//! including connection pooling, migrations, chain seeding and the atomic
//! delete-then-recreate writes the ingestors rely on.
//!
//! # Architecture
//!
//! The storage layer follows the repository pattern:
//!
//! - [`postgres::Database`] - Connection pool management
//! - [`postgres::PgRepositories`] - Composite repository for all entity types
//! - Individual repositories for blocks, sessions, eras, activity, payouts
//!   and chain checkpoints
//!
//! # Usage
//!
//! ```ignore
//! use stakewatch_storage::{Database, DatabaseConfig, PgRepositories};
//!
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//! db.seed_chain("Polkadot").await?;
//!
//! let repositories = Arc::new(PgRepositories::new(Arc::new(db)));
//! ```

pub mod postgres;

pub use postgres::{Database, DatabaseConfig, PgRepositories, PurgeStats};
