//! Core domain layer for the stakewatch indexer.
//!
//! This crate contains the domain models, port traits (interfaces), and
//! ingestion services for the staking indexer. It follows hexagonal
//! architecture principles - this is the innermost layer with no
//! dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    stakewatch (binary)                      │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │      stakewatch-storage      │     stakewatch-substrate     │
//! │         (PostgreSQL)         │            (RPC)             │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │                  stakewatch-core  ← YOU ARE HERE            │
//! │            (models, ports, traversal, ingestors)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (Block, Session, Era, EraPayout, etc.)
//! - [`ports`] - Interface traits for adapters to implement
//! - [`services`] - Traversal controller and per-entity ingestors
//! - [`balance`] - Raw balance to decimal token conversion
//! - [`error`] - Domain error types and their tiers
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Key Concepts
//!
//! ## Ports
//!
//! - [`ports::ChainSource`] - Point-in-time reads from a Substrate chain
//! - [`ports::Repositories`] - Persist and query indexed data
//!
//! ## Traversal
//!
//! Every entity kind (blocks, sessions, eras, payouts) is ingested by a
//! [`services::Grabber`]. The [`services::Traversal`] controller turns a
//! [`services::Direction`] and the persisted frontier into an ordered plan,
//! then drives the grabber index by index, classifying failures by
//! [`error::ErrorTier`].
//!
//! ## Ingestion order
//!
//! 1. Blocks, with their events and extrinsics
//! 2. Sessions, from session-index changes between blocks
//! 3. Eras, with their validator and nominator stake snapshots
//! 4. Payouts, reconciled from the stored extrinsics and events

pub mod balance;
pub mod error;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod services;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
