//! Error-collecting value resolution helpers (spec.md §4.3).
//!
//! Every helper here collects errors across independent subcomputations
//! rather than failing fast on the first poison encountered, matching
//! spec.md's contract: "a deep-resolved value is either a fully plain data
//! tree, or a single poison with the full error set."

use indexmap::IndexMap;
use skein_core::Value;
use std::sync::Arc;

use crate::poison::{collect_errors, create_poison};

/// `resolveSingle(v)` (spec.md §4.3): a non-future non-poison scalar passes
/// through unchanged; a future is awaited; arrays and objects are
/// recursively (deeply) resolved.
pub async fn resolve_single(v: Value) -> Value {
    let resolved = match v {
        Value::Future(fut) => fut.get().await,
        other => other,
    };
    match resolved {
        Value::Poison(p) => Value::Poison(p),
        Value::Array(arr) => deep_resolve_array(&arr).await,
        Value::Object(obj) => deep_resolve_object(&obj).await,
        other => other,
    }
}

/// `deepResolveArray(arr)` (spec.md §4.3): mutating deep walk; all errors
/// across every element are collected before a poison is returned.
pub async fn deep_resolve_array(arr: &[Value]) -> Value {
    let mut errors = Vec::new();
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let resolved = resolve_single(item.clone()).await;
        if let Value::Poison(p) = &resolved {
            errors.extend(p.errors.iter().cloned());
        }
        out.push(resolved);
    }
    if errors.is_empty() {
        Value::array(out)
    } else {
        create_poison(errors, None, None, None)
    }
}

/// `deepResolveObject(obj)` (spec.md §4.3): as `deep_resolve_array`, but
/// over an object's own enumerable (insertion-order) properties.
pub async fn deep_resolve_object(obj: &IndexMap<Arc<str>, Value>) -> Value {
    let mut errors = Vec::new();
    let mut out = IndexMap::with_capacity(obj.len());
    for (k, v) in obj {
        let resolved = resolve_single(v.clone()).await;
        if let Value::Poison(p) = &resolved {
            errors.extend(p.errors.iter().cloned());
        }
        out.insert(k.clone(), resolved);
    }
    if errors.is_empty() {
        Value::object(out)
    } else {
        create_poison(errors, None, None, None)
    }
}

/// `resolveObjectProperties(obj)` (spec.md §4.3): one level deep — awaits
/// each property's own future but does not recurse into nested arrays or
/// objects beyond that single level.
pub async fn resolve_object_properties(obj: &IndexMap<Arc<str>, Value>) -> Value {
    let mut errors = Vec::new();
    let mut out = IndexMap::with_capacity(obj.len());
    for (k, v) in obj {
        let resolved = match v {
            Value::Future(fut) => fut.get().await,
            other => other.clone(),
        };
        if let Value::Poison(p) = &resolved {
            errors.extend(p.errors.iter().cloned());
        }
        out.insert(k.clone(), resolved);
    }
    if errors.is_empty() {
        Value::object(out)
    } else {
        create_poison(errors, None, None, None)
    }
}

/// `resolveAll(args)` (spec.md §4.3): collects errors across every
/// argument first (awaiting all futures, never short-circuiting); returns
/// a single poison if any were found, else an array of deeply-resolved
/// values.
pub async fn resolve_all(args: &[Value]) -> Value {
    let errors = collect_errors(args).await;
    if !errors.is_empty() {
        return create_poison(errors, None, None, None);
    }
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        out.push(resolve_single(arg.clone()).await);
    }
    Value::array(out)
}
