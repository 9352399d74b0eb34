//! The poison error model: errors travel through ordinary value channels
//! instead of rejected futures, so they can be detected synchronously and
//! aggregated across independent subcomputations (spec.md §4.2).

use skein_core::{box_error, utils::dedup_preserve_order, BoxError, PoisonError, PoisonedValue, PositionedError, Span, Value};
use std::sync::Arc;

fn identity_key(err: &BoxError) -> usize {
    Arc::as_ptr(err) as *const () as usize
}

fn dedup_by_identity(errors: Vec<BoxError>) -> Vec<BoxError> {
    dedup_preserve_order(errors, identity_key)
}

/// Flattens one level of nested `PoisonError`s into their underlying list;
/// any other error passes through as a single-element list.
fn flatten_one(err: BoxError) -> Vec<BoxError> {
    match err.downcast_ref::<PoisonError>() {
        Some(poison) => (*poison.errors).clone(),
        None => vec![err],
    }
}

/// Wraps an error lacking position info in a `PositionedError`; an error
/// that already carries one is preserved verbatim (spec.md §4.2
/// "Existing position info is preserved verbatim").
fn wrap_with_position(err: BoxError, span: Option<Span>, context: Option<&str>, path: Option<&str>) -> BoxError {
    if err.downcast_ref::<PositionedError>().is_some() {
        return err;
    }
    box_error(PositionedError::new(
        err.to_string(),
        span.unwrap_or_default(),
        path.map(String::from),
        context.map(String::from),
    ))
}

/// `createPoison(errorOrErrors, lineno?, colno?, contextString?, path?)`
/// (spec.md §4.2 "Creation"). Normalizes to a list, flattens any nested
/// poison errors, wraps position-less errors with the supplied location,
/// and returns the resulting poisoned value.
pub fn create_poison(errors: Vec<BoxError>, span: Option<Span>, context: Option<&str>, path: Option<&str>) -> Value {
    let flattened: Vec<BoxError> = errors.into_iter().flat_map(flatten_one).collect();
    let wrapped: Vec<BoxError> = flattened
        .into_iter()
        .map(|e| wrap_with_position(e, span, context, path))
        .collect();
    tracing::trace!(error_count = wrapped.len(), context = ?context, "poison created");
    Value::Poison(PoisonedValue::new(wrapped))
}

/// `isPoison(v)` — synchronous identity check via a stable marker (here,
/// the `Value::Poison` variant itself).
pub fn is_poison(v: &Value) -> bool {
    v.is_poison()
}

/// `isPoisonError(e)` — synchronous marker check on errors.
pub fn is_poison_error(err: &BoxError) -> bool {
    err.downcast_ref::<PoisonError>().is_some()
}

/// The thenable behavior of a poisoned value (spec.md §4.2 "Thenable
/// behavior"), expressed as a synchronous extension on `PoisonedValue`
/// rather than a duck-typed `then` (spec.md §9 design note).
pub trait PoisonThenable {
    /// `then(null, onR)` / `catch(onR)`: invokes `on_reject` synchronously
    /// with the aggregated `PoisonError`. A returned value becomes the
    /// fulfilled result; a returned error is folded back into a new
    /// poison.
    fn and_then_sync(&self, on_reject: impl FnOnce(PoisonError) -> Result<Value, BoxError>) -> Value;

    /// `finally(f)`: runs `f` for its side effect and returns the original
    /// poison unchanged.
    fn finally_sync(&self, f: impl FnOnce()) -> Value;
}

impl PoisonThenable for PoisonedValue {
    fn and_then_sync(&self, on_reject: impl FnOnce(PoisonError) -> Result<Value, BoxError>) -> Value {
        let err = PoisonError::new((*self.errors).clone());
        match on_reject(err) {
            Ok(v) => v,
            Err(e) => create_poison(vec![e], None, None, None),
        }
    }

    fn finally_sync(&self, f: impl FnOnce()) -> Value {
        f();
        Value::Poison(self.clone())
    }
}

/// `collectErrors(values)` (spec.md §4.2 "Aggregation"): awaits every
/// future in `values`, continuing past failures, extracts all underlying
/// errors, and returns a deduplicated list in encounter order.
pub async fn collect_errors(values: &[Value]) -> Vec<BoxError> {
    let mut errors = Vec::new();
    for v in values {
        let resolved = match v {
            Value::Future(fut) => fut.get().await,
            other => other.clone(),
        };
        if let Value::Poison(p) = resolved {
            errors.extend(p.errors.iter().cloned());
        }
    }
    dedup_by_identity(errors)
}

/// `handleError(err, lineno, colno, contextString?, path?)` (spec.md §4.2
/// "Context wrapping"): the only error transformer that touches position
/// info. For a `PoisonError`, maps every underlying error through the same
/// wrapping rule; otherwise wraps the single error.
pub fn handle_error(err: BoxError, span: Span, context: Option<&str>, path: Option<&str>) -> BoxError {
    let wrapped = if let Some(poison) = err.downcast_ref::<PoisonError>() {
        let mapped: Vec<BoxError> = poison
            .errors
            .iter()
            .cloned()
            .map(|e| wrap_with_position(e, Some(span), context, path))
            .collect();
        box_error(PoisonError::new(mapped))
    } else {
        wrap_with_position(err, Some(span), context, path)
    };
    tracing::warn!(%wrapped, "handled error");
    wrapped
}
