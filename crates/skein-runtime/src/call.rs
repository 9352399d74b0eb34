//! Call and lookup primitives (spec.md §4.8): member access and function
//! invocation with poison- and future-awareness.

use skein_core::Value;
use skein_frame::FrameTree;

use crate::err::{Error, Result};
use crate::output::HandlerEnv;
use crate::poison::{collect_errors, create_poison};
use crate::resolve::resolve_single;

/// Whether absence / non-callability is a silent `Undefined` (template
/// mode) or a hard poisoned error (script mode) — spec.md §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    Template,
    Script,
}

/// `contextOrFrameLookup(context, frame, name)`: the frame chain is
/// consulted first, then the context object. In script mode, absence is a
/// hard error rather than silent `undefined`.
pub fn context_or_frame_lookup(
    frame: &FrameTree,
    context: Option<&Value>,
    name: &str,
    mode: LookupMode,
) -> Result<Value> {
    if let Some(v) = frame.lookup(name) {
        return Ok(v);
    }
    if let Some(Value::Object(obj)) = context {
        if let Some(v) = obj.get(name) {
            return Ok(v.clone());
        }
    }
    match mode {
        LookupMode::Template => Ok(Value::Undefined),
        LookupMode::Script => Err(Error::internal(format!("'{name}' is not declared in any frame or context"))),
    }
}

/// `memberLookup(obj, key)`: `undefined`/hard-error for a null/undefined
/// base depending on mode; otherwise a property lookup.
pub fn member_lookup(obj: &Value, key: &str, mode: LookupMode) -> Result<Value> {
    match obj {
        Value::Null | Value::Undefined => match mode {
            LookupMode::Template => Ok(Value::Undefined),
            LookupMode::Script => Err(Error::internal(format!("cannot read '{key}' of {obj:?}"))),
        },
        Value::Object(map) => Ok(map.get(key).cloned().unwrap_or(Value::Undefined)),
        Value::Array(items) => match key.parse::<usize>() {
            Ok(i) => Ok(items.get(i).cloned().unwrap_or(Value::Undefined)),
            Err(_) => Ok(Value::Undefined),
        },
        _ => Ok(Value::Undefined),
    }
}

/// `callWrap(obj, name, context, args)`: invokes a registered handler
/// value. `obj` must be a `Value::Handler`; the handler is resolved and
/// invoked through the render's `HandlerEnv` bridge.
pub async fn call_wrap(obj: &Value, name: &str, args: Vec<Value>, env: &dyn HandlerEnv) -> Result<Value> {
    match obj {
        Value::Handler(_) => env
            .call_handler(name, &[], None, args)
            .await
            .map_err(|e| Error::internal(e.to_string())),
        _ => Err(Error::internal(format!("'{name}' is not callable"))),
    }
}

/// Shared discipline for every `…Async` variant (spec.md §4.8): collect
/// errors across all inputs first (never short-circuit), resolve the
/// rest, and either return poison or delegate to the sync primitive.
async fn resolve_inputs_or_poison(inputs: Vec<Value>) -> std::result::Result<Vec<Value>, Value> {
    let errors = collect_errors(&inputs).await;
    if !errors.is_empty() {
        return Err(create_poison(errors, None, None, None));
    }
    let mut resolved = Vec::with_capacity(inputs.len());
    for v in inputs {
        resolved.push(resolve_single(v).await);
    }
    Ok(resolved)
}

pub async fn member_lookup_async(obj: Value, key: Value, mode: LookupMode) -> Result<Value> {
    let key_str = match &key {
        Value::Str(s) => s.to_string(),
        other => format!("{other:?}"),
    };
    match resolve_inputs_or_poison(vec![obj, key]).await {
        Err(poison) => Ok(poison),
        Ok(mut resolved) => {
            let key_resolved = resolved.pop().unwrap();
            let obj_resolved = resolved.pop().unwrap();
            if obj_resolved.is_poison() {
                return Ok(obj_resolved);
            }
            if key_resolved.is_poison() {
                return Ok(key_resolved);
            }
            member_lookup(&obj_resolved, &key_str, mode)
        }
    }
}

pub async fn call_wrap_async(obj: Value, name: &str, args: Vec<Value>, env: &dyn HandlerEnv) -> Result<Value> {
    let mut inputs = vec![obj];
    inputs.extend(args.iter().cloned());
    match resolve_inputs_or_poison(inputs).await {
        Err(poison) => Ok(poison),
        Ok(mut resolved) => {
            let resolved_args = resolved.split_off(1);
            let obj_resolved = resolved.pop().unwrap();
            if obj_resolved.is_poison() {
                return Ok(obj_resolved);
            }
            if let Some(p) = resolved_args.iter().find(|v| v.is_poison()) {
                return Ok(p.clone());
            }
            call_wrap(&obj_resolved, name, resolved_args, env).await
        }
    }
}
