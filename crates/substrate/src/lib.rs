//! Substrate RPC adapter for the stakewatch indexer.
//!
//! This crate implements the [`ChainSource`] port from `stakewatch-core`,
//! reading blocks and staking storage from an archive node over WebSocket
//! RPC.
//!
//! # Features
//!
//! - Historical block and storage reads at arbitrary hashes
//! - Dynamic metadata decoding using subxt
//! - SCALE to JSON conversion for events, extrinsics and storage values
//! - Paged staking exposure fallback for newer runtimes
//! - Compact timestamp extraction from `Timestamp.set` inherent
//!
//! # Usage
//!
//! ```ignore
//! use stakewatch_substrate::{SubstrateClient, SubstrateClientConfig};
//!
//! let config = SubstrateClientConfig {
//!     ws_url: "ws://localhost:9944".to_string(),
//! };
//!
//! let client = SubstrateClient::connect(config).await?;
//! let head = client.best_number().await?;
//! let era = client.current_era().await?;
//! ```
//!
//! [`ChainSource`]: stakewatch_core::ports::ChainSource

mod client;
mod convert;
mod staking;

pub use client::{SubstrateClient, SubstrateClientConfig};
