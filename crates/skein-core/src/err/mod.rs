//! Foundational error taxonomy for the skein runtime (spec.md §7).
//!
//! Two kinds live here: `PositionedError`, the wrapper `handle_error`
//! produces once an error is known to lack location info, and
//! `StructuralError`, raised only when a compiler-supplied write count or
//! frame invariant is violated — always a bug in the code generator that
//! emitted the compiled program, never something user code can trigger.

use crate::position::Span;
use thiserror::Error;

/// Foundation error type other crates in the workspace build on.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Positioned(#[from] PositionedError),

    #[error("{0}")]
    Structural(#[from] StructuralError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// An error enriched with `{path, lineno, colno, contextString}` and a
/// human-readable prefix, per spec.md §4.2's `handleError` primitive.
#[derive(Debug, Error)]
#[error("{}", self.format())]
pub struct PositionedError {
    pub path: Option<String>,
    pub span: Span,
    pub context: Option<String>,
    pub message: String,
}

impl PositionedError {
    pub fn new(
        message: impl Into<String>,
        span: Span,
        path: Option<String>,
        context: Option<String>,
    ) -> Self {
        Self {
            path,
            span,
            context,
            message: message.into(),
        }
    }

    fn format(&self) -> String {
        let location = format!(
            "[Line {}, Column {}]",
            self.span.lineno(),
            self.span.colno()
        );
        let path = self
            .path
            .as_deref()
            .map(|p| format!("({}) ", p))
            .unwrap_or_default();
        match &self.context {
            Some(ctx) => format!("{path}{location} doing '{ctx}': {}", self.message),
            None => format!("{path}{location}: {}", self.message),
        }
    }
}

/// Raised when compiler-supplied write counts or frame invariants are
/// inconsistent (spec.md §7 taxonomy, `StructuralInvariantError`).
#[derive(Debug, Error)]
pub enum StructuralError {
    #[error("write counter for '{name}' would go negative (attempted countdown of {attempted}, remaining {remaining})")]
    CounterUnderflow {
        name: String,
        remaining: u32,
        attempted: u32,
    },

    #[error("no write counter registered for '{name}' in this async frame")]
    MissingCounter { name: String },

    #[error("'resolveUp' is not supported for dotted names ('{name}')")]
    ResolveUpDottedName { name: String },

    #[error("cannot pop the root frame")]
    PoppedRootFrame,
}
