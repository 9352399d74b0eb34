//! Ambient runtime configuration (SPEC_FULL.md "(ambient) Configuration").
//!
//! Grounded on the teacher's `ModuleConfig::new`/`ReactorConfig::load`
//! (`src/server/state.rs`, `crates/kymera-reactor/src/traits.rs`): a layered
//! `config::Config` builder over a `config/default` file, an optional
//! `config/local` override, and `SKEIN_`-prefixed environment variables,
//! deserialized into a `serde` struct with `#[serde(default = ...)]`
//! fallbacks and `humantime_serde` durations.
//!
//! None of these knobs are template/script configuration (loading, caching,
//! filter registries) — those stay out of scope per spec.md §1. They govern
//! only the ambient behavior of the runtime primitives themselves.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Ambient knobs for the async runtime core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Structural guard on `Frame::push` recursion depth. A render that
    /// nests deeper than this is treated as a compiler/generator bug
    /// (spec.md §7 `StructuralInvariantError`), not a resource limit to
    /// negotiate with the user.
    #[serde(default = "default_max_frame_depth")]
    pub max_frame_depth: usize,

    /// How long `awaitSequenceLock` should wait on a held lock before
    /// treating it as a structural error. Diagnostic only: spec.md §5
    /// states sequence locks have no cancellation, so this does not cancel
    /// the render, it only bounds how long a stuck render is silently
    /// blocked before logging a warning.
    #[serde(with = "humantime_serde", default = "default_sequence_lock_timeout")]
    pub sequence_lock_timeout: Duration,

    /// Optional cap on concurrently in-flight loop bodies in async-parallel
    /// iteration (spec.md §4.5). `None` means unbounded, matching the
    /// reference behavior.
    #[serde(default)]
    pub parallel_iteration_limit: Option<usize>,
}

fn default_max_frame_depth() -> usize {
    512
}

fn default_sequence_lock_timeout() -> Duration {
    Duration::from_secs(3600)
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_frame_depth: default_max_frame_depth(),
            sequence_lock_timeout: default_sequence_lock_timeout(),
            parallel_iteration_limit: None,
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from `config/default.{toml,yaml,...}`, an
    /// optional `config/local` override, and `SKEIN_`-prefixed environment
    /// variables, exactly as the teacher's `ModuleConfig::new` layers its
    /// sources (`src/server/state.rs`).
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("SKEIN"));
        builder.build()?.try_deserialize()
    }
}
