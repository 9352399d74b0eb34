//! Error types for the frame tree.

use skein_core::StructuralError;
use thiserror::Error;

/// Frame-tree-specific error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Structural(#[from] StructuralError),

    #[error("variable '{0}' is not declared in any enclosing frame")]
    Undeclared(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
