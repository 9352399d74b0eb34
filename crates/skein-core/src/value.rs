//! The runtime value model (spec.md §3, §9).
//!
//! Values are a tagged variant rather than a duck-typed object graph, per
//! spec.md §9's design note: "Values are modeled as a tagged variant
//! `{ Primitive, Future, Poison, Array, Object, Handler, SafeText, Command
//! }`; no structural/duck typing required." `Poison` doubles as the
//! foundation of the error taxonomy (`PoisonError` extends `skein_core::err`),
//! which is why it lives alongside the error types in this crate rather than
//! in a higher layer: both `skein-frame` (futures placed in parent slots) and
//! `skein-runtime` (resolution, iteration, output) need to pattern-match on
//! every variant.

use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use crate::position::Span;
use crate::utils::dedup_preserve_order;

/// A type-erased, reference-counted error. Two `BoxError`s are the "same"
/// error (for dedup purposes) iff they point at the same allocation —
/// spec.md §4.2: "Deduplication is identity-preserving (by error object
/// reference)".
pub type BoxError = Arc<dyn std::error::Error + Send + Sync + 'static>;

pub fn box_error(err: impl std::error::Error + Send + Sync + 'static) -> BoxError {
    Arc::new(err)
}

fn identity_key(err: &BoxError) -> usize {
    Arc::as_ptr(err) as *const () as usize
}

/// Any runtime value: a primitive/opaque scalar, a future, a poison, a
/// plain array or object (which may transitively contain futures or
/// poisons), a command handler handle, already-escaped text, or a
/// compiler-emitted command record (spec.md §3).
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// Text that has already passed through an auto-escape wrapper and must
    /// not be escaped again when flattened (spec.md §4.7 "post-processing
    /// function items").
    SafeText(Arc<str>),
    Array(Arc<Vec<Value>>),
    Object(Arc<IndexMap<Arc<str>, Value>>),
    Poison(PoisonedValue),
    Future(ValueFuture),
    /// Opaque handle to a registered command handler instance (spec.md §6).
    /// Downcast at the call site in `skein-runtime::output`.
    Handler(Arc<dyn std::any::Any + Send + Sync>),
    Command(Arc<CommandRecord>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::SafeText(s) => write!(f, "SafeText({s:?})"),
            Value::Array(a) => f.debug_list().entries(a.iter()).finish(),
            Value::Object(o) => f.debug_map().entries(o.iter()).finish(),
            Value::Poison(p) => write!(f, "Poison({} errors)", p.errors.len()),
            Value::Future(_) => write!(f, "Future(<pending or resolved>)"),
            Value::Handler(_) => write!(f, "Handler(<opaque>)"),
            Value::Command(c) => write!(f, "Command({c:?})"),
        }
    }
}

impl Value {
    pub fn is_poison(&self) -> bool {
        matches!(self, Value::Poison(_))
    }

    pub fn is_future(&self) -> bool {
        matches!(self, Value::Future(_))
    }

    pub fn as_poison(&self) -> Option<&PoisonedValue> {
        match self {
            Value::Poison(p) => Some(p),
            _ => None,
        }
    }

    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(items))
    }

    pub fn object(map: IndexMap<Arc<str>, Value>) -> Self {
        Value::Object(Arc::new(map))
    }
}

/// An immutable record wrapping one or more errors (spec.md §3
/// `PoisonedValue`). Cheap to clone: the error list is reference-counted.
#[derive(Debug, Clone)]
pub struct PoisonedValue {
    pub errors: Arc<Vec<BoxError>>,
}

impl PoisonedValue {
    pub fn new(errors: Vec<BoxError>) -> Self {
        Self {
            errors: Arc::new(dedup_preserve_order(errors, identity_key)),
        }
    }

    pub fn single(err: BoxError) -> Self {
        Self::new(vec![err])
    }
}

/// An error aggregating a deduplicated list of underlying errors (spec.md §3
/// `PoisonError`). Flattening nested `PoisonError`s and deduplication both
/// happen in `create_poison`/`collect_errors` (skein-runtime::poison), not
/// here — this type is just the terminal shape.
#[derive(Debug, Error, Clone)]
#[error("{}", format_error_list(&self.errors))]
pub struct PoisonError {
    pub errors: Arc<Vec<BoxError>>,
}

impl PoisonError {
    pub fn new(errors: Vec<BoxError>) -> Self {
        Self {
            errors: Arc::new(dedup_preserve_order(errors, identity_key)),
        }
    }
}

fn format_error_list(errors: &[BoxError]) -> String {
    if errors.len() == 1 {
        errors[0].to_string()
    } else {
        let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        format!("{} errors: [{}]", errors.len(), joined.join("; "))
    }
}

/// A cell that starts empty and is resolved exactly once, cheap to clone and
/// await from multiple locations. Corresponds to spec.md §9's "allocate a
/// resolver + future pair, swap it into the slot" for async-block
/// promisification.
#[derive(Clone)]
pub struct ValueFuture(watch::Receiver<Option<Value>>);

impl ValueFuture {
    /// Awaits resolution and returns a clone of the resolved value. Resolves
    /// to a structural poison if the resolver was dropped without resolving
    /// (a compiler/runtime bug, never a user-triggerable condition).
    pub async fn get(&self) -> Value {
        let mut rx = self.0.clone();
        loop {
            if let Some(v) = rx.borrow().clone() {
                return v;
            }
            if rx.changed().await.is_err() {
                return Value::Poison(PoisonedValue::single(box_error(
                    DroppedResolverError,
                )));
            }
        }
    }

    /// Non-blocking peek: `Some` once resolved, `None` while pending.
    pub fn try_get(&self) -> Option<Value> {
        self.0.borrow().clone()
    }
}

#[derive(Debug, Error)]
#[error("a value future's resolver was dropped before resolving it")]
pub struct DroppedResolverError;

/// The other half of a `ValueFuture`; resolves it exactly once.
pub struct ValueResolver(watch::Sender<Option<Value>>);

impl ValueResolver {
    pub fn resolve(self, value: Value) {
        let _ = self.0.send(Some(value));
    }
}

/// Allocates a pending value future/resolver pair.
pub fn pending_value() -> (ValueFuture, ValueResolver) {
    let (tx, rx) = watch::channel(None);
    (ValueFuture(rx), ValueResolver(tx))
}

/// A compiler-emitted output buffer entry describing a call into a named
/// handler (spec.md §3 `Command record`).
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub handler: Option<Arc<str>>,
    pub command: Option<Arc<str>>,
    pub subpath: Vec<Arc<str>>,
    pub arguments: Vec<Value>,
    pub pos: Span,
}

impl CommandRecord {
    pub fn is_text(&self) -> bool {
        matches!(self.handler.as_deref(), None | Some("text"))
    }
}

/// A buffer sentinel standing in for a handler call skipped by a poisoned
/// control-flow decision (spec.md §3 `Poison marker`).
#[derive(Debug, Clone)]
pub struct PoisonMarker {
    pub errors: Arc<Vec<BoxError>>,
    pub handler: Arc<str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn value_future_resolves_once() {
        let (fut, resolver) = pending_value();
        assert!(fut.try_get().is_none());
        resolver.resolve(Value::Int(42));
        match fut.get().await {
            Value::Int(42) => {}
            other => panic!("expected Int(42), got {other:?}"),
        }
    }

    #[test]
    fn poisoned_value_dedups_by_identity() {
        #[derive(Debug, Error)]
        #[error("boom")]
        struct Boom;

        let e1 = box_error(Boom);
        let e2 = e1.clone();
        let e3 = box_error(Boom);
        let poison = PoisonedValue::new(vec![e1, e2, e3]);
        assert_eq!(poison.errors.len(), 2);
    }
}
