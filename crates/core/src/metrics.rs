//! Metrics definitions for the indexer.
//!
//! This module defines all metrics used throughout the indexer.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

use crate::error::ErrorTier;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "items_ingested_total",
        "Total number of items (blocks, sessions, eras, payout scopes) successfully ingested"
    );
    describe_counter!(
        "items_deferred_total",
        "Total number of items skipped because a dependency is not ingested yet"
    );
    describe_counter!(
        "items_failed_total",
        "Total number of items that failed, labelled by error tier"
    );
    describe_histogram!(
        "item_processing_duration_seconds",
        "Time taken to process one item in seconds"
    );
    describe_counter!("payouts_written_total", "Total number of payout rows written");
    describe_counter!(
        "payout_attribution_anomalies_total",
        "Payouts whose execution era precedes the era they pay for"
    );
    describe_counter!(
        "decode_errors_total",
        "Total number of decode errors while reading chain data"
    );
}

/// Record a successfully ingested item.
pub fn record_item_ingested(kind: &'static str) {
    counter!("items_ingested_total", "kind" => kind).increment(1);
}

/// Record an item deferred on a missing dependency.
pub fn record_item_deferred(kind: &'static str) {
    counter!("items_deferred_total", "kind" => kind).increment(1);
}

/// Record a failed item.
///
/// # Arguments
/// * `kind` - The entity kind ("block", "era", ...)
/// * `tier` - The tier of the error that failed the item
pub fn record_item_failed(kind: &'static str, tier: ErrorTier) {
    counter!("items_failed_total", "kind" => kind, "tier" => tier.as_str()).increment(1);
}

/// Record item processing duration.
pub fn record_item_processing_duration(kind: &'static str, duration_secs: f64) {
    histogram!("item_processing_duration_seconds", "kind" => kind).record(duration_secs);
}

pub fn record_payouts_written(count: u64) {
    counter!("payouts_written_total").increment(count);
}

pub fn record_payout_attribution_anomaly() {
    counter!("payout_attribution_anomalies_total").increment(1);
}

/// Record a decode error.
///
/// # Arguments
/// * `error_type` - What failed to decode ("event", "extrinsic", "storage")
/// * `pallet` - The pallet name (if known)
pub fn record_decode_error(error_type: &str, pallet: &str) {
    counter!("decode_errors_total", "type" => error_type.to_string(), "pallet" => pallet.to_string())
        .increment(1);
}

/// A timer that records the duration of one item when dropped.
pub struct ProcessingTimer {
    kind: &'static str,
    start: Instant,
}

impl ProcessingTimer {
    /// Start a new processing timer for an entity kind.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            start: Instant::now(),
        }
    }
}

impl Drop for ProcessingTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_item_processing_duration(self.kind, duration);
    }
}
