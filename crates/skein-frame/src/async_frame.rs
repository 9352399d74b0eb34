//! `AsyncFrame` — the write-count protocol that lets a concurrently
//! executing block body publish its writes back to the frame it was spawned
//! from (spec.md §3 `AsyncFrame`, §4.1 block entry / branch pruning).

use skein_core::{pending_value, Value, ValueResolver};
use std::collections::HashMap;

use crate::err::Result;
use crate::frame::{FrameId, FrameTree};

/// The three additional maps an `AsyncFrame` carries over a plain `Frame`,
/// all absent by default (spec.md §3).
pub(crate) struct AsyncFrameData {
    /// Local snapshots (at block entry) of variables the block reads,
    /// shadowing ancestor values for the block's duration.
    pub(crate) async_vars: HashMap<String, Value>,
    /// Per-variable remaining-writes count.
    pub(crate) write_counters: HashMap<String, u32>,
    /// Per-variable resolver handle for the future placed in the parent
    /// frame's slot.
    pub(crate) promise_resolves: HashMap<String, ValueResolver>,
    /// A loop-body frame's writes are released at loop end by
    /// `skip_branch_writes` on mutually-exclusive branches rather than
    /// auto-propagating to the parent on countdown (spec.md §3).
    pub(crate) sequential_loop_body: bool,
}

impl FrameTree {
    /// `pushAsyncBlock(readVars, writeCounters)` (spec.md §4.1).
    ///
    /// Allocates a child frame flagged as an async block, snapshots the
    /// variables it reads, and replaces each written variable's current
    /// slot with a fresh future whose resolver is retained locally.
    pub fn push_async_block(
        &mut self,
        read_vars: &[String],
        write_counters: HashMap<String, u32>,
        sequential_loop_body: bool,
    ) -> FrameId {
        let parent = self.current_id();
        let child = self.push_child(parent, false, false);

        let mut async_vars = HashMap::new();
        for name in read_vars {
            if let Some(v) = self.lookup_from(parent, name) {
                async_vars.insert(name.clone(), v);
            }
        }

        let mut promise_resolves = HashMap::new();
        for (name, _count) in &write_counters {
            // Sequence-lock names (`!`-prefixed) always resolve at the root
            // frame (spec.md §9 Open Question: consolidated design choice —
            // see DESIGN.md).
            let owner = if name.starts_with('!') {
                let root = self.root_id();
                if self.get_in(root, name).is_none() {
                    self.frame_mut(root)
                        .variables
                        .insert(name.clone(), Value::Bool(true));
                }
                root
            } else {
                self.resolve(name, false).unwrap_or(parent)
            };

            let current_value = self.get_in(owner, name).unwrap_or(Value::Undefined);
            async_vars.insert(name.clone(), current_value);

            let (future, resolver) = pending_value();
            self.write_at_owner(owner, name, Value::Future(future));
            promise_resolves.insert(name.clone(), resolver);
        }

        tracing::debug!(frame = ?child, writes = promise_resolves.len(), "async block entered");

        self.frame_mut(child).async_data = Some(AsyncFrameData {
            async_vars,
            write_counters,
            promise_resolves,
            sequential_loop_body,
        });

        child
    }

    /// `skipBranchWrites(varCounts)`: decrements every entry by its count,
    /// used when the compiler knows a branch was not taken (spec.md §4.1).
    pub fn skip_branch_writes(&mut self, frame: FrameId, var_counts: &HashMap<String, u32>) -> Result<()> {
        for (name, count) in var_counts {
            self.countdown_and_resolve_async_writes(frame, name, *count, None)?;
        }
        tracing::debug!(frame = ?frame, "async block left (branch skipped)");
        Ok(())
    }

    /// `poisonBranchWrites(errorOrPoison, varCounts)`: places the poison in
    /// the appropriate frame slot for each variable, then decrements by its
    /// count so resolution fires with poison (spec.md §4.1).
    pub fn poison_branch_writes(
        &mut self,
        frame: FrameId,
        poison: Value,
        var_counts: &HashMap<String, u32>,
    ) -> Result<()> {
        debug_assert!(poison.is_poison(), "poison_branch_writes expects a Value::Poison");
        for (name, count) in var_counts {
            let owner = self
                .resolve(name, false)
                .unwrap_or_else(|| self.current_id());
            self.write_at_owner(owner, name, poison.clone());
            self.countdown_and_resolve_async_writes(frame, name, *count, None)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SetTarget;

    #[tokio::test]
    async fn async_block_write_resolves_parent_future() {
        let mut tree = FrameTree::new();
        tree.set(SetTarget::Direct("x"), Value::Int(0)).unwrap();

        let mut counters = HashMap::new();
        counters.insert("x".to_string(), 1u32);
        let block = tree.push_async_block(&["x".to_string()], counters, false);

        // Parent slot should now hold a future.
        let root = tree.root_id();
        match tree.get_in(root, "x") {
            Some(Value::Future(fut)) => assert!(fut.try_get().is_none()),
            other => panic!("expected pending future, got {other:?}"),
        }

        // Block writes and its counter reaches zero, resolving the future.
        let saved_current = tree.current_id();
        // simulate being inside the block
        let _ = saved_current;
        tree.set(SetTarget::Direct("x"), Value::Int(1)).unwrap();

        match tree.get_in(root, "x") {
            Some(Value::Future(fut)) => {
                let resolved = fut.get().await;
                assert!(matches!(resolved, Value::Int(1)));
            }
            Some(other) => panic!("expected future even after inner set, got {other:?}"),
            None => panic!("x missing"),
        }
        let _ = block;
    }

    #[test]
    fn skip_branch_writes_resolves_without_a_write() {
        let mut tree = FrameTree::new();
        tree.set(SetTarget::Direct("x"), Value::Int(0)).unwrap();
        let root = tree.root_id();

        let mut counters = HashMap::new();
        counters.insert("x".to_string(), 1u32);
        let block = tree.push_async_block(&[], counters.clone(), false);

        tree.skip_branch_writes(block, &counters).unwrap();

        match tree.get_in(root, "x") {
            Some(Value::Future(fut)) => {
                assert_eq!(
                    fut.try_get().map(|v| matches!(v, Value::Undefined)),
                    Some(true)
                );
            }
            other => panic!("expected resolved future, got {other:?}"),
        }
    }

    proptest::proptest! {
        /// spec.md §8 property 3: a write counter never goes negative.
        /// Any sequence of decrements that sums to exactly the declared
        /// count resolves cleanly; a sequence that sums to more is
        /// rejected with `CounterUnderflow` rather than wrapping below
        /// zero.
        #[test]
        fn write_counter_never_goes_negative(
            total in 1u32..20,
            chunks in proptest::collection::vec(1u32..5, 1..10),
        ) {
            let mut tree = FrameTree::new();
            let mut counters = HashMap::new();
            counters.insert("x".to_string(), total);
            let block = tree.push_async_block(&[], counters, false);

            let mut remaining = total;
            let mut overshot = false;
            for chunk in chunks {
                if overshot {
                    break;
                }
                let dec = chunk.min(remaining.max(1));
                match tree.countdown_and_resolve_async_writes(block, "x", dec, None) {
                    Ok(()) => {
                        remaining = remaining.saturating_sub(dec);
                    }
                    Err(_) => {
                        overshot = true;
                    }
                }
            }
            // Driving the exact remaining count to zero (if anything is
            // left) must always succeed without underflowing.
            if !overshot && remaining > 0 {
                proptest::prop_assert!(tree.countdown_and_resolve_async_writes(block, "x", remaining, None).is_ok());
            }
        }

        /// Decrementing by more than the declared count is rejected, never
        /// silently wrapping below zero.
        #[test]
        fn overshooting_a_write_counter_is_a_structural_error(total in 1u32..20, excess in 1u32..10) {
            let mut tree = FrameTree::new();
            let mut counters = HashMap::new();
            counters.insert("x".to_string(), total);
            let block = tree.push_async_block(&[], counters, false);

            let result = tree.countdown_and_resolve_async_writes(block, "x", total + excess, None);
            proptest::prop_assert!(result.is_err());
        }
    }
}
