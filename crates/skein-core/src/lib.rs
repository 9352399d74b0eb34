//! Foundational value model, error taxonomy, source position tracking, and
//! shared utilities for the skein async evaluation runtime.

pub mod err;
pub mod position;
pub mod utils;
pub mod value;

pub use err::{Error, PositionedError, Result, StructuralError};
pub use position::{Position, Span};
pub use value::{
    box_error, pending_value, BoxError, CommandRecord, PoisonError, PoisonMarker, PoisonedValue,
    Value, ValueFuture, ValueResolver,
};

/// Re-export common traits and types
pub mod prelude {
    pub use crate::err::{Error, PositionedError, Result, StructuralError};
    pub use crate::position::{Position, Span};
    pub use crate::value::{BoxError, PoisonError, PoisonedValue, Value};
}
