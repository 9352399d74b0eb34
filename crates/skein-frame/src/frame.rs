//! The lexical frame tree (spec.md §3 `Frame`, §4.1).
//!
//! spec.md §9's design note: "frame parent/child forms a tree (acyclic) ...
//! In a systems language, frames fit naturally as stack-allocated or
//! arena-allocated nodes indexed by a numeric handle, with the parent chain
//! walked by index." `FrameTree` is that arena: frames never move once
//! created (so a `FrameId` stays valid for the render's lifetime) and the
//! parent chain is walked by following `FrameId`s rather than borrowing
//! across frames, which would otherwise fight the borrow checker the moment
//! two sibling async blocks needed to read their shared ancestor
//! concurrently.

use indexmap::IndexMap;
use skein_core::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::async_frame::AsyncFrameData;
use crate::err::{Error, Result};

/// Opaque handle to a frame in a `FrameTree`. Stable for the lifetime of the
/// tree; frames are never removed from the arena (only logically "popped",
/// i.e. no longer reachable as anyone's current frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

/// Whether a `set` targets the current frame directly or walks up to the
/// variable's declaring frame. Kept as two distinct constructors (rather
/// than a single `set(name, value, resolve_up: bool)`) so that the "resolveUp
/// is forbidden for dotted names" rule from spec.md §9's first Open Question
/// is enforced by the type system: `SetTarget::ResolveUp` only ever wraps a
/// single-segment name.
pub enum SetTarget<'a> {
    /// `set(name, value)` without `resolveUp`: dotted names create nested
    /// records at the leaf frame.
    Direct(&'a str),
    /// `set(name, value, resolveUp = true)`: walks ancestors to find the
    /// declaring frame. Only constructible for a single segment.
    ResolveUp(&'a str),
}

impl<'a> SetTarget<'a> {
    /// Attempts to build a `ResolveUp` target, rejecting dotted names per
    /// spec.md §9's Open Question #1 (resolved: enforce at the type/API
    /// boundary rather than raising a runtime `StructuralError`).
    pub fn resolve_up(name: &'a str) -> std::result::Result<Self, Error> {
        if name.contains('.') {
            return Err(Error::Structural(
                skein_core::StructuralError::ResolveUpDottedName {
                    name: name.to_string(),
                },
            ));
        }
        Ok(SetTarget::ResolveUp(name))
    }
}

/// A scoped mapping from variable names to values (spec.md §3 `Frame`).
pub struct Frame {
    pub(crate) parent: Option<FrameId>,
    pub(crate) variables: HashMap<String, Value>,
    /// Writes never cross this frame's boundary upward.
    pub(crate) isolate_writes: bool,
    /// Whether a missing name on write should materialize here or delegate
    /// to the nearest ancestor that can.
    pub(crate) create_scope: bool,
    /// Present only for frames created via `push_async_block`.
    pub(crate) async_data: Option<AsyncFrameData>,
}

impl Frame {
    fn new(parent: Option<FrameId>, isolate_writes: bool, create_scope: bool) -> Self {
        Self {
            parent,
            variables: HashMap::new(),
            isolate_writes,
            create_scope,
            async_data: None,
        }
    }

    pub fn is_async_block(&self) -> bool {
        self.async_data.is_some()
    }
}

/// An arena of `Frame`s forming the lexical scope tree for one render.
pub struct FrameTree {
    frames: Vec<Frame>,
    /// The frame every subsequent operation is relative to, absent an
    /// explicit `FrameId` argument. Mirrors the reference-implementation's
    /// single mutable "current frame" pointer.
    current: FrameId,
    root: FrameId,
}

impl FrameTree {
    /// Creates a tree with a single root frame. The root frame lives for the
    /// entire render (spec.md §3).
    pub fn new() -> Self {
        let root = Frame::new(None, false, true);
        Self {
            frames: vec![root],
            current: FrameId(0),
            root: FrameId(0),
        }
    }

    pub fn root_id(&self) -> FrameId {
        self.root
    }

    pub fn current_id(&self) -> FrameId {
        self.current
    }

    pub(crate) fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.0]
    }

    pub(crate) fn frame_mut(&mut self, id: FrameId) -> &mut Frame {
        &mut self.frames[id.0]
    }

    pub fn parent_of(&self, id: FrameId) -> Option<FrameId> {
        self.frame(id).parent
    }

    /// `push(isolateWrites)`: creates a child of the current frame and makes
    /// it current.
    pub fn push(&mut self, isolate_writes: bool) -> FrameId {
        self.push_child(self.current, isolate_writes, true)
    }

    pub fn push_child(&mut self, parent: FrameId, isolate_writes: bool, create_scope: bool) -> FrameId {
        let frame = Frame::new(Some(parent), isolate_writes, create_scope);
        self.frames.push(frame);
        let id = FrameId(self.frames.len() - 1);
        self.current = id;
        tracing::trace!(parent = parent.0, child = id.0, isolate_writes, "frame pushed");
        id
    }

    /// `pop()`: restores the parent as current. The root frame can never be
    /// popped (spec.md §7 `StructuralInvariantError`).
    pub fn pop(&mut self) -> Result<()> {
        match self.frame(self.current).parent {
            Some(parent) => {
                tracing::trace!(frame = self.current.0, parent = parent.0, "frame popped");
                self.current = parent;
                Ok(())
            }
            None => Err(skein_core::StructuralError::PoppedRootFrame.into()),
        }
    }

    /// `get(name)`: current frame only.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.get_in(self.current, name)
    }

    pub fn get_in(&self, frame: FrameId, name: &str) -> Option<Value> {
        let f = self.frame(frame);
        if let Some(data) = &f.async_data {
            if let Some(v) = data.async_vars.get(name) {
                return Some(v.clone());
            }
        }
        f.variables.get(name).cloned()
    }

    /// `lookup(name)`: walks frames from current to root; at each, prefers
    /// `asyncVars[name]` over `variables[name]`.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.lookup_from(self.current, name)
    }

    pub fn lookup_from(&self, start: FrameId, name: &str) -> Option<Value> {
        self.lookup_and_locate_from(start, name).map(|(v, _)| v)
    }

    /// `lookupAndLocate(name)`: as `lookup`, but also returns the frame that
    /// owns the binding.
    pub fn lookup_and_locate(&self, name: &str) -> Option<(Value, FrameId)> {
        self.lookup_and_locate_from(self.current, name)
    }

    pub fn lookup_and_locate_from(&self, start: FrameId, name: &str) -> Option<(Value, FrameId)> {
        let mut cur = Some(start);
        while let Some(id) = cur {
            let f = self.frame(id);
            if let Some(data) = &f.async_data {
                if let Some(v) = data.async_vars.get(name) {
                    return Some((v.clone(), id));
                }
            }
            if let Some(v) = f.variables.get(name) {
                return Some((v.clone(), id));
            }
            cur = f.parent;
        }
        None
    }

    /// `resolve(name, forWrite)`: returns the frame that currently owns
    /// `name`, honoring `isolateWrites` for writes.
    pub fn resolve(&self, name: &str, for_write: bool) -> Option<FrameId> {
        let mut cur = Some(self.current);
        while let Some(id) = cur {
            let f = self.frame(id);
            let has_async = f.async_data.as_ref().map_or(false, |d| d.async_vars.contains_key(name));
            if has_async || f.variables.contains_key(name) {
                return Some(id);
            }
            if for_write && f.isolate_writes {
                return None;
            }
            cur = f.parent;
        }
        None
    }

    /// Declares `root.rest...` in `frame`. A dotted name materializes nested
    /// `Value::Object` records along the path, writing the leaf; an
    /// undotted name just replaces the binding.
    fn declare_direct(&mut self, frame: FrameId, full_name: &str, value: Value) {
        match full_name.split_once('.') {
            None => {
                self.write_at_owner(frame, full_name, value);
            }
            Some((root, rest)) => {
                let existing = self.get_in(frame, root);
                let updated = set_nested_path(existing, rest, value);
                self.write_at_owner(frame, root, updated);
            }
        }
    }

    /// `set(name, value, resolveUp)` (spec.md §4.1). Returns the frame the
    /// value ended up declared in (the frame whose write-counter, if any,
    /// should be counted down).
    pub fn set(&mut self, target: SetTarget<'_>, value: Value) -> Result<FrameId> {
        let full_name = match target {
            SetTarget::Direct(n) | SetTarget::ResolveUp(n) => n,
        };
        // Write-count propagation and parent-slot resolution are always
        // keyed on the root segment; only the leaf write is dotted.
        let name = full_name.split('.').next().unwrap_or(full_name);

        let declaring_frame = self.declaring_frame_for_write(name);
        self.declare_direct(declaring_frame, full_name, value.clone());

        // Walk from current upward, stopping at either an ancestor whose
        // asyncVars shadows `name` (write lands there) or the declaring
        // frame itself.
        let mut cur = self.current;
        loop {
            let f = self.frame(cur);
            let shadows = f
                .async_data
                .as_ref()
                .map_or(false, |d| d.async_vars.contains_key(name));
            if shadows {
                self.frame_mut(cur)
                    .async_data
                    .as_mut()
                    .unwrap()
                    .async_vars
                    .insert(name.to_string(), value.clone());
                break;
            }
            if cur == declaring_frame {
                break;
            }
            match self.frame(cur).parent {
                Some(p) => cur = p,
                None => break,
            }
        }

        self.countdown_and_resolve_async_writes(cur, name, 1, Some(declaring_frame))?;
        Ok(declaring_frame)
    }

    /// Overwrites `name` in place at `owner`, wherever it currently lives
    /// (an async-frame's snapshot shadow, or the plain `variables` map).
    /// Used by async-block entry to swap a variable's current value for a
    /// fresh future in the owning frame's slot.
    pub(crate) fn write_at_owner(&mut self, owner: FrameId, name: &str, value: Value) {
        let f = self.frame_mut(owner);
        if let Some(data) = f.async_data.as_mut() {
            if data.async_vars.contains_key(name) {
                data.async_vars.insert(name.to_string(), value);
                return;
            }
        }
        f.variables.insert(name.to_string(), value);
    }

    /// Finds the frame `name` should be declared into for a write: the
    /// nearest ancestor that already owns it, or — if absent — the current
    /// frame (when `createScope`) or a recursive declaration in the parent.
    fn declaring_frame_for_write(&mut self, name: &str) -> FrameId {
        if let Some(id) = self.resolve(name, true) {
            return id;
        }
        // Not declared anywhere reachable: materialize per createScope.
        let mut cur = self.current;
        loop {
            if self.frame(cur).create_scope {
                return cur;
            }
            match self.frame(cur).parent {
                Some(p) => cur = p,
                None => return cur,
            }
        }
    }

    /// `_countdownAndResolveAsyncWrites(v, dec, scopeFrame?)` (spec.md §4.1).
    pub fn countdown_and_resolve_async_writes(
        &mut self,
        frame: FrameId,
        name: &str,
        dec: u32,
        declaring_frame: Option<FrameId>,
    ) -> Result<()> {
        let has_counter = self
            .frame(frame)
            .async_data
            .as_ref()
            .map_or(false, |d| d.write_counters.contains_key(name));
        if !has_counter {
            return Ok(());
        }

        let remaining = *self.frame(frame).async_data.as_ref().unwrap().write_counters.get(name).unwrap();
        if remaining < dec {
            return Err(skein_core::StructuralError::CounterUnderflow {
                name: name.to_string(),
                remaining,
                attempted: dec,
            }
            .into());
        }

        if remaining == dec {
            let (sequential_loop_body, parent) = {
                let f = self.frame_mut(frame);
                let data = f.async_data.as_mut().unwrap();
                data.write_counters.remove(name);
                let value = data
                    .async_vars
                    .get(name)
                    .cloned()
                    .unwrap_or(Value::Undefined);
                if let Some(resolver) = data.promise_resolves.remove(name) {
                    resolver.resolve(value);
                }
                (data.sequential_loop_body, f.parent)
            };
            if !sequential_loop_body {
                if let Some(parent) = parent {
                    if Some(parent) != declaring_frame {
                        self.countdown_and_resolve_async_writes(parent, name, 1, declaring_frame)?;
                    }
                }
            }
        } else {
            let f = self.frame_mut(frame);
            let data = f.async_data.as_mut().unwrap();
            *data.write_counters.get_mut(name).unwrap() -= dec;
        }

        Ok(())
    }
}

impl Default for FrameTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Rebuilds `base` with `value` written at the dotted `rest` path,
/// materializing intermediate `Value::Object`s as needed.
fn set_nested_path(base: Option<Value>, rest: &str, value: Value) -> Value {
    let mut map: IndexMap<Arc<str>, Value> = match base {
        Some(Value::Object(map)) => (*map).clone(),
        _ => IndexMap::new(),
    };
    match rest.split_once('.') {
        None => {
            map.insert(Arc::from(rest), value);
        }
        Some((head, tail)) => {
            let existing = map.get(head).cloned();
            map.insert(Arc::from(head), set_nested_path(existing, tail, value));
        }
    }
    Value::Object(Arc::new(map))
}
