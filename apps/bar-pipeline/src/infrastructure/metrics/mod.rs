//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Feed**: frames received, bars staged and dropped
//! - **Flush**: outcomes, committed rows, delete failures, duration
//! - **Replay**: active connections and frames sent
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed
    describe_counter!(
        "bar_pipeline_frames_received_total",
        "Text frames received from the live feed"
    );
    describe_counter!(
        "bar_pipeline_bars_staged_total",
        "Bars written to the staging buffer"
    );
    describe_counter!(
        "bar_pipeline_bars_dropped_total",
        "Bars not staged, by reason"
    );

    // Flush
    describe_counter!(
        "bar_pipeline_flushes_total",
        "Flush cycles by outcome"
    );
    describe_counter!(
        "bar_pipeline_rows_committed_total",
        "Bar rows committed to the durable store"
    );
    describe_counter!(
        "bar_pipeline_staging_delete_failures_total",
        "Committed staging entries that could not be deleted"
    );
    describe_histogram!(
        "bar_pipeline_flush_duration_seconds",
        "Wall time of one flush cycle"
    );

    // Replay
    describe_gauge!(
        "bar_pipeline_replay_connections",
        "Open replay connections"
    );
    describe_counter!(
        "bar_pipeline_replay_frames_sent_total",
        "Frames sent to replay clients"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons a received bar is not staged.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// Symbol outside the configured set.
    UnknownSymbol,
    /// Message could not be decoded.
    Malformed,
    /// Staging write failed.
    StagingError,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownSymbol => "unknown_symbol",
            Self::Malformed => "malformed",
            Self::StagingError => "staging_error",
        }
    }
}

/// Flush cycle outcomes.
#[derive(Debug, Clone, Copy)]
pub enum FlushOutcome {
    /// Batch committed.
    Committed,
    /// Nothing to commit.
    Empty,
    /// Transaction failed and rolled back.
    Failed,
}

impl FlushOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Empty => "empty",
            Self::Failed => "failed",
        }
    }
}

/// Record one text frame from the live feed.
pub fn record_frame_received() {
    counter!("bar_pipeline_frames_received_total").increment(1);
}

/// Record a bar written to staging.
pub fn record_bar_staged() {
    counter!("bar_pipeline_bars_staged_total").increment(1);
}

/// Record a bar that was not staged.
pub fn record_bar_dropped(reason: DropReason) {
    counter!(
        "bar_pipeline_bars_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a finished flush cycle.
pub fn record_flush(outcome: FlushOutcome, rows: u64, duration: Duration) {
    counter!(
        "bar_pipeline_flushes_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
    counter!("bar_pipeline_rows_committed_total").increment(rows);
    histogram!("bar_pipeline_flush_duration_seconds").record(duration.as_secs_f64());
}

/// Record staging deletes that failed after a commit.
pub fn record_delete_failures(count: u64) {
    counter!("bar_pipeline_staging_delete_failures_total").increment(count);
}

/// Update the open replay connection count.
pub fn set_replay_connections(count: f64) {
    gauge!("bar_pipeline_replay_connections").set(count);
}

/// Record a frame sent to a replay client.
pub fn record_replay_frame() {
    counter!("bar_pipeline_replay_frames_sent_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================
