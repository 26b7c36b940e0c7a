//! Error types for the indexer domain layer.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`DomainError`] - Business logic errors
//! - [`StorageError`] - Database/repository errors
//! - [`ChainError`] - Blockchain RPC errors
//! - [`IndexerError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.
//!
//! Every [`IndexerError`] belongs to exactly one [`ErrorTier`]. The traversal
//! controller branches on the tier instead of on the concrete variant.

use thiserror::Error;

// =============================================================================
// Error Tiers
// =============================================================================

/// How far the effect of an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorTier {
    /// One item failed for a reason that may disappear on the next pass
    /// (RPC hiccup, decode miss). The traversal moves on.
    Transient,
    /// The current scope (one block, one era) cannot be completed correctly.
    /// The scope is aborted, the traversal moves on.
    FatalForScope,
    /// The run cannot continue at all.
    FatalForProcess,
}

impl ErrorTier {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::FatalForScope => "fatal_for_scope",
            Self::FatalForProcess => "fatal_for_process",
        }
    }
}

// =============================================================================
// Domain Errors
// =============================================================================

/// Business logic and domain rule violations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Data decoding/deserialization failed.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// A raw balance does not fit the decimal representation.
    #[error("Balance {raw} cannot be converted with denominator {denominator}")]
    BalanceOverflow {
        /// Raw on-chain value.
        raw: u128,
        /// Scaling denominator.
        denominator: u128,
    },

    /// The era requested is older than the chain keeps history for.
    #[error("Era {era} is outside history depth {depth} (current era {current})")]
    HistoryDepthExceeded {
        /// Requested era.
        era: u32,
        /// Current era on chain.
        current: u32,
        /// Configured history depth.
        depth: u32,
    },

    /// A row required to attribute payouts is missing from the store.
    #[error("Payout attribution failed: {0}")]
    AttributionFailed(String),

    /// Generic validation error.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Database and repository errors.
///
/// These errors originate from storage operations like queries,
/// transactions, and data serialization.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to establish database connection.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// SQL query execution failed.
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// Transaction commit/rollback failed.
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Data serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

// =============================================================================
// Chain Errors
// =============================================================================

/// Blockchain RPC and connectivity errors.
#[derive(Debug, Error)]
pub enum ChainError {
    /// WebSocket connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// RPC request failed.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// No block exists at the requested height.
    #[error("Block {0} not found on chain")]
    BlockNotFound(u64),

    /// A storage value was present but had an unexpected shape.
    #[error("Unexpected value for {entry}: {message}")]
    UnexpectedValue {
        /// Storage entry, e.g. `Staking.ErasStakers`.
        entry: String,
        /// Error details.
        message: String,
    },

    /// A storage entry that must exist returned nothing.
    #[error("Missing storage value {0}")]
    MissingValue(String),
}

// =============================================================================
// Indexer Errors
// =============================================================================

/// Top-level indexer orchestration errors.
///
/// This is the error type returned by the ingestors and the traversal
/// controller. It wraps all lower-level errors and adds indexer-specific
/// variants.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Domain logic error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Storage/database error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Blockchain connectivity error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The configured chain has no record in the store.
    ///
    /// This is a fatal error that requires manual intervention (seed the chain).
    #[error("Chain '{0}' is not registered in the database")]
    ChainNotRegistered(String),

    /// Graceful shutdown was requested.
    ///
    /// This is not really an error but uses the error type for control flow.
    #[error("Indexer shutdown requested")]
    ShutdownRequested,
}

impl IndexerError {
    /// Classify the error into its tier.
    pub fn tier(&self) -> ErrorTier {
        match self {
            Self::Chain(_) => ErrorTier::Transient,
            Self::Storage(e) | Self::Domain(DomainError::Storage(e)) => match e {
                StorageError::ConnectionError(_) | StorageError::MigrationError(_) => {
                    ErrorTier::FatalForProcess
                }
                _ => ErrorTier::Transient,
            },
            Self::Domain(DomainError::DecodingError(_)) => ErrorTier::Transient,
            Self::Domain(_) => ErrorTier::FatalForScope,
            Self::ConfigError(_) | Self::ChainNotRegistered(_) | Self::ShutdownRequested => {
                ErrorTier::FatalForProcess
            }
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
