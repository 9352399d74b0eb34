//! The async block driver: `AsyncState` tracks in-flight closures along a
//! parent chain so a render can know when every spawned block has retired
//! (spec.md §4.4).

use std::future::Future;
use tokio::sync::watch;

use skein_core::{BoxError, Span, Value};
use skein_frame::FrameId;

use crate::poison::{create_poison, handle_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsyncStateId(usize);

struct AsyncStateNode {
    parent: Option<AsyncStateId>,
    #[allow(dead_code)]
    frame: FrameId,
    active_closures: u32,
    wait_threshold: Option<u32>,
    completion: Option<watch::Sender<bool>>,
}

/// An arena-indexed tree of in-flight-closure counters, one per async
/// block nesting level, mirroring the frame tree it was entered from.
pub struct AsyncState {
    nodes: Vec<AsyncStateNode>,
    current: AsyncStateId,
    root: AsyncStateId,
}

impl AsyncState {
    pub fn new(root_frame: FrameId) -> Self {
        let root = AsyncStateNode {
            parent: None,
            frame: root_frame,
            active_closures: 0,
            wait_threshold: None,
            completion: None,
        };
        Self {
            nodes: vec![root],
            current: AsyncStateId(0),
            root: AsyncStateId(0),
        }
    }

    pub fn root_id(&self) -> AsyncStateId {
        self.root
    }

    pub fn current_id(&self) -> AsyncStateId {
        self.current
    }

    fn ancestors_of(&self, id: AsyncStateId) -> Vec<AsyncStateId> {
        let mut chain = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            chain.push(c);
            cur = self.nodes[c.0].parent;
        }
        chain
    }

    /// `enterAsyncBlock(frame)`: creates a child state, records the frame,
    /// and increments active-closure counts along the parent chain.
    pub fn enter_async_block(&mut self, frame: FrameId) -> AsyncStateId {
        let parent = self.current;
        self.nodes.push(AsyncStateNode {
            parent: Some(parent),
            frame,
            active_closures: 0,
            wait_threshold: None,
            completion: None,
        });
        let id = AsyncStateId(self.nodes.len() - 1);
        for ancestor in self.ancestors_of(id) {
            self.nodes[ancestor.0].active_closures += 1;
        }
        self.current = id;
        id
    }

    /// `leaveAsyncBlock()`: decrements active counts along the parent
    /// chain; any node whose active count drops to (or below) its
    /// configured wait threshold resolves its completion signal.
    pub fn leave_async_block(&mut self, id: AsyncStateId) {
        for ancestor in self.ancestors_of(id) {
            let node = &mut self.nodes[ancestor.0];
            node.active_closures = node.active_closures.saturating_sub(1);
            if let Some(threshold) = node.wait_threshold {
                if node.active_closures <= threshold {
                    if let Some(tx) = &node.completion {
                        let _ = tx.send(true);
                    }
                }
            }
        }
    }

    /// `waitAllClosures(threshold)`: installs (or reuses) a single
    /// completion signal for `id` and waits until its active-closure count
    /// reaches `threshold` (a render's top-level call passes `0`: "wait
    /// until nothing is left running").
    pub async fn wait_all_closures(&mut self, id: AsyncStateId, threshold: u32) {
        let already_done = {
            let node = &mut self.nodes[id.0];
            node.wait_threshold = Some(threshold);
            node.active_closures <= threshold
        };
        if already_done {
            return;
        }
        let mut rx = {
            let node = &mut self.nodes[id.0];
            let tx = node
                .completion
                .get_or_insert_with(|| watch::channel(false).0);
            tx.subscribe()
        };
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// `executeAsyncBlock(astate, id, body)` (spec.md §4.4): invokes the
/// compiled block body, funnels both thrown errors and ordinary rejections
/// through `handleError`, and guarantees the closure counter is
/// decremented exactly once regardless of outcome.
pub async fn execute_async_block<F, Fut>(
    state: &mut AsyncState,
    id: AsyncStateId,
    span: Span,
    context: Option<&str>,
    path: Option<&str>,
    body: F,
) -> Value
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, BoxError>>,
{
    let outcome = body().await;
    let value = match outcome {
        Ok(v) => v,
        Err(e) => {
            let wrapped = handle_error(e, span, context, path);
            create_poison(vec![wrapped], None, None, None)
        }
    };
    state.leave_async_block(id);
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_frame::FrameTree;

    #[tokio::test]
    async fn wait_all_closures_resolves_after_nested_blocks_leave() {
        let tree = FrameTree::new();
        let mut state = AsyncState::new(tree.root_id());
        let root = state.root_id();

        let child = state.enter_async_block(tree.root_id());
        let grandchild = state.enter_async_block(tree.root_id());
        assert_eq!(state.nodes[root.0].active_closures, 2);

        state.leave_async_block(grandchild);
        state.leave_async_block(child);

        state.wait_all_closures(root, 0).await;
        assert_eq!(state.nodes[root.0].active_closures, 0);
    }

    #[tokio::test]
    async fn execute_async_block_converts_thrown_error_to_poison_and_leaves() {
        let tree = FrameTree::new();
        let mut state = AsyncState::new(tree.root_id());
        let root = state.root_id();
        let block = state.enter_async_block(tree.root_id());

        let result = execute_async_block(&mut state, block, Span::dummy(), Some("body"), None, || async {
            Err(skein_core::box_error(DummyError))
        })
        .await;

        assert!(result.is_poison());
        assert_eq!(state.nodes[root.0].active_closures, 0);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("dummy")]
    struct DummyError;
}
