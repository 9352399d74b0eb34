//! Error taxonomy for the skein evaluation runtime (spec.md §7).

use skein_core::{PoisonError, StructuralError};
use thiserror::Error;

/// Top-level runtime error. Every failure surfaced out of `skein-runtime`
/// is one of these two shapes (spec.md §7 "Error surfaces"): a structural
/// invariant violated by the generated program, or an aggregated poison.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] skein_frame::Error),

    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Poison(#[from] PoisonError),

    #[error("unknown handler: {0}")]
    UnknownHandler(String),

    #[error("unknown focusOutput target: {0}")]
    UnknownFocusTarget(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
