//! Top-level aggregated error type (spec.md §7).
//!
//! Mirrors the teacher's root `kymera_ls::err::Error`: one `thiserror` enum
//! that aggregates each workspace member's own error type with `#[from]`,
//! plus a handful of errors specific to the render entry points.

use thiserror::Error;

/// The runtime's top-level error type. Every failure surfaced out of
/// `render_template`/`render_script` is one of these.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] skein_core::Error),

    #[error(transparent)]
    Frame(#[from] skein_frame::Error),

    #[error(transparent)]
    Runtime(#[from] skein_runtime::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("unknown command handler: {0}")]
    UnknownHandler(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
