//! Sequence locks: serializing calls that must observe one another's
//! side effects in source order (spec.md §4.6).

use skein_core::{BoxError, PoisonError, Span, Value};
use skein_frame::{FrameTree, SetTarget};

use crate::call::{call_wrap, context_or_frame_lookup, member_lookup_async, LookupMode};
use crate::err::{Error, Result};
use crate::output::HandlerEnv;
use crate::poison::{create_poison, handle_error};

/// `awaitSequenceLock(frame, key)` (spec.md §4.6 step 1): awaits the lock
/// if held, re-raises if already poisoned, returns immediately if free.
pub async fn await_sequence_lock(tree: &FrameTree, key: &str) -> Result<()> {
    match tree.lookup(key) {
        Some(Value::Future(fut)) => {
            tracing::debug!(lock = key, "sequence lock held, awaiting");
            let resolved = fut.get().await;
            if let Value::Poison(p) = resolved {
                return Err(Error::Poison(PoisonError::new(p.errors.to_vec())));
            }
            Ok(())
        }
        Some(Value::Poison(p)) => Err(Error::Poison(PoisonError::new(p.errors.to_vec()))),
        _ => {
            tracing::trace!(lock = key, "sequence lock free");
            Ok(())
        }
    }
}

/// Runs `op` under the lock named `key`, implementing spec.md §4.6's
/// generic pattern (steps 2-5): await the lock, run the operation,
/// store any poison under the lock key, and otherwise release the lock
/// by setting it back to `true` (which resolves the lock's future and
/// decrements its write counter via the ordinary `set` path).
pub async fn with_sequence_lock<F, Fut>(
    tree: &mut FrameTree,
    key: &str,
    span: Span,
    context: Option<&str>,
    op: F,
) -> Result<Value>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<Value, BoxError>>,
{
    await_sequence_lock(tree, key).await?;

    let outcome = op().await;
    match outcome {
        Ok(v) if v.is_poison() => {
            tree.set(SetTarget::Direct(key), v.clone())?;
            let errors = v.as_poison().unwrap().errors.to_vec();
            Err(Error::Poison(PoisonError::new(errors)))
        }
        Ok(v) => {
            tree.set(SetTarget::Direct(key), Value::Bool(true))?;
            Ok(v)
        }
        Err(e) => {
            let wrapped = handle_error(e, span, context, None);
            let poison = create_poison(vec![wrapped], None, None, None);
            tree.set(SetTarget::Direct(key), poison.clone())?;
            let errors = poison.as_poison().unwrap().errors.to_vec();
            Err(Error::Poison(PoisonError::new(errors)))
        }
    }
}

/// `sequencedContextLookup(frame, context, name, key)`: a frame/context
/// lookup serialized behind a sequence lock. The lookup itself is
/// synchronous, so unlike the other two wrappers it does not need to go
/// through `with_sequence_lock`'s generic, owned-future `op`; it performs
/// the same five steps directly against `tree`.
pub async fn sequenced_context_lookup(
    tree: &mut FrameTree,
    context: Option<&Value>,
    name: &str,
    key: &str,
    mode: LookupMode,
    span: Span,
) -> Result<Value> {
    await_sequence_lock(tree, key).await?;

    match context_or_frame_lookup(tree, context, name, mode) {
        Ok(v) if v.is_poison() => {
            tree.set(SetTarget::Direct(key), v.clone())?;
            let errors = v.as_poison().unwrap().errors.to_vec();
            Err(Error::Poison(PoisonError::new(errors)))
        }
        Ok(v) => {
            tree.set(SetTarget::Direct(key), Value::Bool(true))?;
            Ok(v)
        }
        Err(e) => {
            let wrapped = handle_error(skein_core::box_error(SeqlockOpError(e.to_string())), span, Some("sequenced context lookup"), None);
            let poison = create_poison(vec![wrapped], None, None, None);
            tree.set(SetTarget::Direct(key), poison.clone())?;
            let errors = poison.as_poison().unwrap().errors.to_vec();
            Err(Error::Poison(PoisonError::new(errors)))
        }
    }
}

/// `sequencedMemberLookupAsync(obj, key, lockKey)`: a member lookup
/// serialized behind a sequence lock, sharing the async variants'
/// poison-collecting discipline.
pub async fn sequenced_member_lookup_async(
    tree: &mut FrameTree,
    obj: Value,
    member_key: Value,
    lock_key: &str,
    mode: LookupMode,
    span: Span,
) -> Result<Value> {
    with_sequence_lock(tree, lock_key, span, Some("sequenced member lookup"), move || async move {
        member_lookup_async(obj, member_key, mode)
            .await
            .map_err(|e| skein_core::box_error(SeqlockOpError(e.to_string())))
    })
    .await
}

/// `sequencedCallWrap(obj, name, args, lockKey)`: a handler invocation
/// serialized behind a sequence lock.
pub async fn sequenced_call_wrap(
    tree: &mut FrameTree,
    obj: Value,
    name: String,
    args: Vec<Value>,
    lock_key: &str,
    env: &dyn HandlerEnv,
    span: Span,
) -> Result<Value> {
    with_sequence_lock(tree, lock_key, span, Some("sequenced call"), move || async move {
        call_wrap(&obj, &name, args, env)
            .await
            .map_err(|e| skein_core::box_error(SeqlockOpError(e.to_string())))
    })
    .await
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct SeqlockOpError(String);

#[cfg(test)]
mod tests {
    use super::*;
    use skein_frame::FrameTree;

    #[tokio::test]
    async fn lock_resolves_to_true_after_successful_operation() {
        let mut tree = FrameTree::new();
        let result = with_sequence_lock(&mut tree, "!lock", Span::dummy(), None, || async { Ok(Value::Int(5)) }).await;
        assert!(matches!(result, Ok(Value::Int(5))));
        assert!(matches!(tree.lookup("!lock"), Some(Value::Bool(true))));
    }

    #[tokio::test]
    async fn lock_stays_poisoned_after_a_failing_operation() {
        let mut tree = FrameTree::new();
        let err: BoxError = skein_core::box_error(SeqlockOpError("boom".into()));
        let result = with_sequence_lock(&mut tree, "!lock", Span::dummy(), None, move || async move { Err(err) }).await;
        assert!(result.is_err());
        match tree.lookup("!lock") {
            Some(Value::Poison(_)) => {}
            other => panic!("expected lock to hold poison, got {other:?}"),
        }

        let second = await_sequence_lock(&tree, "!lock").await;
        assert!(second.is_err());
    }
}
