//! Command handler registration contract (spec.md §6).
//!
//! Grounded on the teacher's `#[async_trait] trait` style in
//! `crates/kymera-reactor/src/traits.rs` (async methods returning a
//! crate-local `Result`). A handler is an external object: either a
//! long-lived *instance* registered once (and lazily `_init`-ed the first
//! time a render touches it) or a *class* constructed fresh per render.
//! Subpath traversal and bare `@name(args)` calls both funnel through
//! `call`, since Rust has no runtime reflection to walk an arbitrary
//! nested-method graph the way the reference implementation does — the
//! handler author interprets `subpath`/`command` itself, matching spec.md
//! §9's "no structural/duck typing required" design note.

use std::sync::Arc;

use async_trait::async_trait;
use skein_core::Value;

use crate::err::Result;

/// A registered handler instance (spec.md §6
/// `env.commandHandlerInstances[name] = instance`).
#[async_trait]
pub trait CommandHandlerInstance: Send + Sync {
    /// Called exactly once per render, the first time this handler is
    /// touched, with the render's user-variable map.
    async fn init(&self, _vars: &Value) -> Result<()> {
        Ok(())
    }

    /// Dispatches a call: `subpath` is the traversed property chain (empty
    /// for a bare `@name(args)` command or a direct method call on the
    /// handler), `command` optionally names a sub-command the handler
    /// understands, and `args` are the already-resolved, poison-free
    /// arguments (the output flattener never calls this with a poisoned
    /// argument — spec.md §4.7 "a poisoned argument causes the call to be
    /// skipped").
    async fn call(&self, subpath: &[Arc<str>], command: Option<&str>, args: Vec<Value>) -> Result<Value>;

    /// Called once at the end of a render to populate this handler's field
    /// in the render result (spec.md §6 `getReturnValue()`). `None` means
    /// "use the handler itself" (spec.md §4.7's fallback).
    fn return_value(&self) -> Option<Value> {
        None
    }
}

/// A registered handler class (spec.md §6
/// `env.commandHandlerClasses[name] = Class`), constructed fresh for each
/// render that touches it.
#[async_trait]
pub trait CommandHandlerClass: Send + Sync {
    /// `new Class(vars, env)` (spec.md §4.7 "otherwise a class is
    /// constructed with `(vars, env)`").
    async fn construct(
        &self,
        vars: &Value,
        context: &crate::context::Context,
    ) -> Result<Arc<dyn CommandHandlerInstance>>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A minimal handler used by `context.rs` and `render.rs` tests: counts
    /// invocations and echoes its arguments back as its return value.
    #[derive(Default)]
    pub struct CountingHandler {
        pub calls: std::sync::atomic::AtomicUsize,
        pub last_args: std::sync::Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl CommandHandlerInstance for CountingHandler {
        async fn call(&self, _subpath: &[Arc<str>], _command: Option<&str>, args: Vec<Value>) -> Result<Value> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            *self.last_args.lock().unwrap() = args.clone();
            Ok(Value::array(args))
        }

        fn return_value(&self) -> Option<Value> {
            Some(Value::Int(self.calls.load(std::sync::atomic::Ordering::SeqCst) as i64))
        }
    }
}
