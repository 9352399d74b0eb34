//! The iteration engine: every loop form funnels through `iterate()`
//! (spec.md §4.5).

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use skein_core::{BoxError, PoisonMarker, Span, Value};
use skein_frame::{FrameId, FrameTree};

use crate::err::Result;
use crate::poison::create_poison;

/// Per-loop write-count obligations the compiler attaches to a loop's
/// body and else branches (spec.md §4.1 `bodyWriteCounts`/`elseWriteCounts`).
#[derive(Clone, Default)]
pub struct LoopWriteCounts {
    pub body: HashMap<String, u32>,
    pub else_branch: HashMap<String, u32>,
}

/// Present only in async mode (spec.md §4.5 "Pre-checks (only when
/// `asyncOptions` is present")).
pub struct AsyncLoopOptions {
    pub sequential: bool,
    /// Handler names referenced by the body, used to emit poison markers
    /// in place of skipped handler calls when the loop is poisoned.
    pub body_handler_names: Vec<Arc<str>>,
}

/// Destructuring shape for the loop variable(s): a single positional
/// binding (arrays), or a two-variable key/value binding (mappings).
pub enum LoopVars {
    Single(String),
    KeyValue(String, String),
}

/// One element handed to a loop body: the bound value(s), the index, and
/// (when known) the total length and whether this is the last element.
///
/// The sync forms know both up front (`Value::Int`/`Value::Bool`); the
/// async sequential form leaves both `None` (spec.md §4.5: undefined/false,
/// since no future element has been pulled yet); the async parallel form
/// fills both with a shared `Value::Future` so a concurrently-running body
/// can still await `loop.length`/`loop.last` once the source has drained.
pub struct LoopElement {
    pub value: Value,
    pub key: Option<Arc<str>>,
    pub index: usize,
    pub length: Option<Value>,
    pub is_last: Option<Value>,
}

fn poison_bad_element(err: BoxError, index: usize, span: Span) -> Value {
    create_poison(vec![err], Some(span), Some(&format!("iterating element {index}")), None)
}

/// `poisonLoopEffects(loopFrame, asyncOptions, errors, didIterate)`
/// (spec.md §4.5): poisons the body's write obligations (and, if nothing
/// iterated, the else branch's), and records a poison marker per body
/// handler name so the output buffer reflects the skipped calls.
pub fn poison_loop_effects(
    tree: &mut FrameTree,
    loop_frame: FrameId,
    counts: &LoopWriteCounts,
    handler_names: &[Arc<str>],
    errors: Vec<BoxError>,
    did_iterate: bool,
) -> Result<Vec<PoisonMarker>> {
    let poison = create_poison(errors, None, None, None);
    let errors_arc = match &poison {
        Value::Poison(p) => p.errors.clone(),
        _ => unreachable!("create_poison always returns Value::Poison"),
    };

    tree.poison_branch_writes(loop_frame, poison.clone(), &counts.body)?;
    if !did_iterate {
        tree.poison_branch_writes(loop_frame, poison, &counts.else_branch)?;
    }

    Ok(handler_names
        .iter()
        .map(|h| PoisonMarker {
            errors: errors_arc.clone(),
            handler: h.clone(),
        })
        .collect())
}

/// `iterate(arr, body, elseBody, ...)` over a synchronous array (spec.md
/// §4.5 "Sync iteration (array)"). `body` returns the (possibly poison)
/// result of executing the loop body for one element; `sequential`
/// controls whether each body is awaited before the next iteration starts
/// (both forms are expressed here as a fully-awaited loop, since a
/// single-threaded cooperative scheduler only genuinely interleaves work
/// actually spawned onto the runtime — see DESIGN.md).
pub async fn iterate_sync_array<B, Fut>(
    tree: &mut FrameTree,
    loop_frame: FrameId,
    arr: &[Value],
    vars: &LoopVars,
    counts: &LoopWriteCounts,
    sequential: bool,
    mut body: B,
) -> Result<bool>
where
    B: FnMut(LoopElement) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let len = arr.len();
    let did_iterate = len > 0;

    if sequential {
        for (i, value) in arr.iter().enumerate() {
            let elem = LoopElement {
                value: value.clone(),
                key: None,
                index: i,
                length: Some(Value::Int(len as i64)),
                is_last: Some(Value::Bool(i + 1 == len)),
            };
            body(elem).await?;
        }
    } else {
        let mut pending = FuturesUnordered::new();
        for (i, value) in arr.iter().enumerate() {
            let elem = LoopElement {
                value: value.clone(),
                key: None,
                index: i,
                length: Some(Value::Int(len as i64)),
                is_last: Some(Value::Bool(i + 1 == len)),
            };
            pending.push(body(elem));
        }
        while let Some(res) = pending.next().await {
            res?;
        }
    }

    let _ = vars;
    tree.skip_branch_writes(loop_frame, &counts.body)?;
    if !did_iterate {
        // else-body invocation is the caller's responsibility (it has
        // access to the compiled else-body callable); here we only
        // reconcile writes if the caller tells us it didn't run one.
    } else {
        tree.skip_branch_writes(loop_frame, &counts.else_branch)?;
    }
    Ok(did_iterate)
}

/// `iterate(...)` over a synchronous mapping (spec.md §4.5 "Sync iteration
/// (mapping)"): iterates keys in insertion order, requiring two loop vars.
pub async fn iterate_sync_mapping<B, Fut>(
    tree: &mut FrameTree,
    loop_frame: FrameId,
    map: &IndexMap<Arc<str>, Value>,
    counts: &LoopWriteCounts,
    sequential: bool,
    mut body: B,
) -> Result<bool>
where
    B: FnMut(LoopElement) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let len = map.len();
    let did_iterate = len > 0;

    if sequential {
        for (i, (k, v)) in map.iter().enumerate() {
            let elem = LoopElement {
                value: v.clone(),
                key: Some(k.clone()),
                index: i,
                length: Some(Value::Int(len as i64)),
                is_last: Some(Value::Bool(i + 1 == len)),
            };
            body(elem).await?;
        }
    } else {
        let mut pending = FuturesUnordered::new();
        for (i, (k, v)) in map.iter().enumerate() {
            let elem = LoopElement {
                value: v.clone(),
                key: Some(k.clone()),
                index: i,
                length: Some(Value::Int(len as i64)),
                is_last: Some(Value::Bool(i + 1 == len)),
            };
            pending.push(body(elem));
        }
        while let Some(res) = pending.next().await {
            res?;
        }
    }

    tree.skip_branch_writes(loop_frame, &counts.body)?;
    if did_iterate {
        tree.skip_branch_writes(loop_frame, &counts.else_branch)?;
    }
    Ok(did_iterate)
}

/// `iterate(...)` over an async sequential iterator (spec.md §4.5 "Async
/// iterator — sequential"). `source` yields results as they arrive;
/// `loop.length`/`loop.last` are unavailable in this form, matching the
/// spec's "passed as undefined/false".
pub async fn iterate_async_sequential<S, B, Fut>(
    tree: &mut FrameTree,
    loop_frame: FrameId,
    mut source: S,
    counts: &LoopWriteCounts,
    mut body: B,
) -> Result<bool>
where
    S: futures::Stream<Item = std::result::Result<Value, BoxError>> + Unpin,
    B: FnMut(LoopElement) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut did_iterate = false;
    let mut index = 0usize;

    while let Some(next) = source.next().await {
        let value = match next {
            Ok(v) => v,
            Err(e) => poison_bad_element(e, index, Span::dummy()),
        };
        let elem = LoopElement {
            value,
            key: None,
            index,
            length: None,
            is_last: None,
        };
        body(elem).await?;
        did_iterate = true;
        index += 1;
    }

    tree.skip_branch_writes(loop_frame, &counts.body)?;
    if did_iterate {
        tree.skip_branch_writes(loop_frame, &counts.else_branch)?;
    }
    Ok(did_iterate)
}

/// `iterate(...)` over an async parallel iterator (spec.md §4.5 "Async
/// iterator — parallel"): the iterator is drained eagerly and every body
/// invocation is spawned without waiting for the previous one, then all
/// are joined (`allSettled`-style — a failing body does not cancel its
/// siblings).
pub async fn iterate_async_parallel<S, B, Fut>(
    tree: &mut FrameTree,
    loop_frame: FrameId,
    mut source: S,
    counts: &LoopWriteCounts,
    mut body: B,
) -> Result<bool>
where
    S: futures::Stream<Item = std::result::Result<Value, BoxError>> + Unpin,
    B: FnMut(LoopElement) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut pending = FuturesUnordered::new();
    let mut index = 0usize;
    let mut hard_errors = Vec::new();

    // Every concurrently-running body shares these two futures so it can
    // still observe `loop.length`/`loop.last` despite elements arriving out
    // of order (spec.md §4.5, §8 property 7) — unlike the sequential form,
    // which has no way to know either before the stream ends.
    let (len_future, len_resolver) = skein_core::pending_value();
    let (last_future, last_resolver) = skein_core::pending_value();

    while let Some(next) = source.next().await {
        // An element that is itself an `Error` is a soft error (spec.md
        // §4.5 "wrap Error as poison (soft)"): the body still runs,
        // observing a poisoned value, same as the sequential form. Only a
        // body invocation failing (below) is a hard error in this form.
        let value = match next {
            Ok(v) => v,
            Err(e) => poison_bad_element(e, index, Span::dummy()),
        };
        let elem = LoopElement {
            value,
            key: None,
            index,
            length: Some(Value::Future(len_future.clone())),
            is_last: Some(Value::Future(last_future.clone())),
        };
        pending.push(body(elem));
        index += 1;
    }

    // The source is fully drained and `index` is now the final count `n`:
    // resolve both promises so every already-spawned body (and any that
    // hasn't yet reached `loop.length`/`loop.last` in its own control flow)
    // observes the real values.
    len_resolver.resolve(Value::Int(index as i64));
    last_resolver.resolve(Value::Bool(true));

    let did_iterate = index > 0;
    while let Some(res) = pending.next().await {
        if let Err(e) = res {
            // Preserve the failing body's original error (identity and any
            // position/context already attached) rather than flattening it
            // to a string, so §8 property 4's dedup-by-reference still
            // applies across aggregated hard errors.
            hard_errors.push(skein_core::box_error(e));
        }
    }

    if !hard_errors.is_empty() {
        let poison = create_poison(hard_errors, None, Some("iterating async parallel loop"), None);
        tree.poison_branch_writes(loop_frame, poison.clone(), &counts.body)?;
        if !did_iterate {
            tree.poison_branch_writes(loop_frame, poison, &counts.else_branch)?;
        }
        return Ok(did_iterate);
    }

    tree.skip_branch_writes(loop_frame, &counts.body)?;
    if did_iterate {
        tree.skip_branch_writes(loop_frame, &counts.else_branch)?;
    }
    Ok(did_iterate)
}

#[cfg(test)]
#[derive(Debug, thiserror::Error)]
#[error("loop body failed: {0}")]
struct SoftIterationError(String);
