//! End-to-end render scenarios exercising the public entry points
//! together (spec.md §8 scenarios 3-6). The earlier scenarios (1, 2) are
//! covered unit-locally in `src/render.rs`; these are the remaining ones
//! that genuinely need more than one module wired together.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use skein::{render_template, CompiledBody, Context, RenderRuntime};
use skein_core::{box_error, BoxError, Value};
use skein_frame::FrameTree;
use skein_runtime::call::LookupMode;
use skein_runtime::err::Error as RuntimeError;
use skein_runtime::poison::create_poison;
use skein_runtime::seqlock::{await_sequence_lock, with_sequence_lock};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct NamedError(&'static str);

fn err(name: &'static str) -> BoxError {
    box_error(NamedError(name))
}

/// Scenario 3: two independent expressions throw `E1` and `E2`; the
/// render's aggregated `PoisonError` holds exactly `[E1, E2]`, in
/// positional order, deduplicated.
struct TwoIndependentFailures;

#[async_trait]
impl CompiledBody for TwoIndependentFailures {
    async fn call(&self, rt: &mut RenderRuntime<'_>) -> Result<(), BoxError> {
        // Both poisons are created independently (as two unrelated
        // expressions would be) before either is surfaced, so nothing
        // short-circuits between them.
        let first = create_poison(vec![err("E1")], None, Some("expr 1"), None);
        let second = create_poison(vec![err("E2")], None, Some("expr 2"), None);

        rt.output.push_value(first);
        rt.output.push_value(second);
        Ok(())
    }
}

#[tokio::test]
async fn deterministic_multi_error_aggregation_preserves_positional_order() {
    let ctx = Context::new(None, Value::object(IndexMap::new()), LookupMode::Template);
    let result = render_template(&TwoIndependentFailures, &ctx).await;

    let err = result.expect_err("render of two poisoned expressions must fail");
    let skein::Error::Runtime(RuntimeError::Poison(poison)) = err else {
        panic!("expected an aggregated poison error, got {err:?}");
    };

    assert_eq!(poison.errors.len(), 2);
    assert!(poison.errors[0].to_string().contains("E1"));
    assert!(poison.errors[1].to_string().contains("E2"));
}

/// Scenario 4: `a = obj.m1(); b = obj.m2()`, both sequenced and both
/// mutating the same shared state — `m2` must observe the state left by
/// `m1` even though nothing here otherwise orders them. `obj`'s own state
/// lives outside the frame tree (it is the handler's concern, not the
/// lexical scope's), matching spec.md §4.6's "the lock orders calls",
/// not the call's own side effects.
#[tokio::test]
async fn sequenced_member_access_serializes_side_effects() {
    let mut tree = FrameTree::new();
    let counter = Arc::new(std::sync::Mutex::new(0i64));

    // m1 observes 0, leaves the counter at 1.
    let counter_a = counter.clone();
    let a = with_sequence_lock(&mut tree, "!obj", skein_core::Span::dummy(), Some("m1"), move || {
        async move {
            let mut guard = counter_a.lock().unwrap();
            let observed = *guard;
            *guard += 1;
            Ok(Value::Int(observed))
        }
    })
    .await
    .unwrap();

    // m2, serialized behind the same lock, must observe 1 (after m1), not 0.
    let counter_b = counter.clone();
    let b = with_sequence_lock(&mut tree, "!obj", skein_core::Span::dummy(), Some("m2"), move || {
        async move {
            let mut guard = counter_b.lock().unwrap();
            let observed = *guard;
            *guard += 1;
            Ok(Value::Int(observed))
        }
    })
    .await
    .unwrap();

    assert!(matches!(a, Value::Int(0)));
    assert!(matches!(b, Value::Int(1)));
}

/// Scenario 6: a sequenced call throws; a later sequenced lookup under the
/// same lock produces a poison containing only the original error (after
/// dedup), even though both paths would otherwise wrap it again.
#[tokio::test]
async fn sequence_lock_poisoning_surfaces_only_the_original_error_once() {
    let mut tree = FrameTree::new();

    let failing_call = with_sequence_lock(&mut tree, "!resource", skein_core::Span::dummy(), Some("open"), || async {
        Err(err("connection refused"))
    })
    .await;
    assert!(failing_call.is_err());

    // A later attempt to acquire the same lock must re-raise the
    // already-recorded poison rather than hang or silently succeed.
    let later = await_sequence_lock(&tree, "!resource").await;
    let later_err = later.expect_err("a poisoned lock must re-raise");

    let skein_runtime::err::Error::Poison(poison) = later_err else {
        panic!("expected a poison error from the held lock, got {later_err:?}");
    };
    assert_eq!(poison.errors.len(), 1);
    assert!(poison.errors[0].to_string().contains("connection refused"));
}
