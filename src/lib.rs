//! Asynchronous evaluation runtime for a text-template/scripting engine.
//!
//! This crate is the public surface: `Context`, the `CommandHandlerInstance`
//! / `CommandHandlerClass` registration traits, the compiled-program calling
//! convention (`CompiledBody`/`RenderRuntime`), the top-level
//! `render_template`/`render_script` entry points, and ambient
//! `RuntimeConfig`. The primitives that make concurrent evaluation sound —
//! the lexical frame tree, the poison error model, the iteration engine,
//! sequence locks, and output flattening — live in `skein-frame` and
//! `skein-runtime`; this crate only wires them together and exposes the
//! contracts an external template/script compiler calls into (spec.md §1,
//! §6).

pub mod config;
pub mod context;
pub mod err;
pub mod handler;
pub mod metrics;
pub mod render;

pub use config::RuntimeConfig;
pub use context::Context;
pub use err::{Error, Result};
pub use handler::{CommandHandlerClass, CommandHandlerInstance};
pub use metrics::RuntimeMetrics;
pub use render::{render_script, render_template, CompiledBody, RenderRuntime};

/// Re-exports of the lower-layer crates, for callers that need to build
/// `Value`s, frame trees, or output buffers directly (e.g. a template
/// compiler emitting calls against this runtime).
pub mod prelude {
    pub use crate::{
        render_script, render_template, CommandHandlerClass, CommandHandlerInstance, CompiledBody,
        Context, Error, RenderRuntime, Result, RuntimeConfig, RuntimeMetrics,
    };
    pub use skein_core::{BoxError, PoisonError, PoisonedValue, Position, Span, Value};
    pub use skein_frame::{Frame, FrameId, FrameTree, SetTarget};
    pub use skein_runtime::call::LookupMode;
    pub use skein_runtime::output::{HandlerEnv, OutputBuffer};
}

/// Installs a `tracing_subscriber::fmt` subscriber reading its filter from
/// `RUST_LOG` (default `info`). Optional: binaries embedding this runtime
/// may call it once at startup, matching the teacher's own
/// `tracing-subscriber` initialization in its LSP entry point. A library
/// consumer that already manages its own subscriber should not call this.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
