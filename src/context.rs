//! `Context` (spec.md §3): the external object carrying the template path,
//! the user-variable map, the template-vs-script lookup discipline, and the
//! two command-handler registries.
//!
//! Grounded on the teacher's `ServerState<T>` (`src/server/state.rs`): a
//! `DashMap`-backed shared struct safe to read from multiple concurrently
//! executing async blocks. The two handler registries are `DashMap`s for
//! the same reason `ServerState` uses one for its document map — handlers
//! may be registered or looked up while other async blocks of the same
//! render are in flight.

use std::sync::Arc;

use dashmap::DashMap;
use skein_core::Value;
use skein_runtime::call::LookupMode;
use skein_runtime::output::HandlerEnv;

use crate::err::{Error, Result};
use crate::handler::{CommandHandlerClass, CommandHandlerInstance};

/// Carries everything a render needs that is *not* part of the frame tree:
/// the template's path (for error messages), the user-supplied variables,
/// which lookup discipline applies, and the handler registries (spec.md
/// §3, §6).
pub struct Context {
    path: Option<String>,
    variables: Value,
    lookup_mode: LookupMode,
    instances: DashMap<String, Arc<dyn CommandHandlerInstance>>,
    classes: DashMap<String, Arc<dyn CommandHandlerClass>>,
    /// Per-render cache of constructed/initialized handlers, keyed by name.
    /// Ensures `_init`/`construct` runs at most once per render regardless
    /// of how many commands touch the same handler (spec.md §4.7
    /// "a previously-registered instance is initialized once").
    instantiated: DashMap<String, Arc<dyn CommandHandlerInstance>>,
    /// Names of every handler actually invoked during this render, in
    /// first-touch order, so the render entry point can build the final
    /// `getReturnValue()` fields after flattening (spec.md §4.7).
    touched: DashMap<String, ()>,
}

impl Context {
    pub fn new(path: Option<String>, variables: Value, lookup_mode: LookupMode) -> Self {
        Self {
            path,
            variables,
            lookup_mode,
            instances: DashMap::new(),
            classes: DashMap::new(),
            instantiated: DashMap::new(),
            touched: DashMap::new(),
        }
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn variables(&self) -> &Value {
        &self.variables
    }

    pub fn lookup_mode(&self) -> LookupMode {
        self.lookup_mode
    }

    /// `env.commandHandlerInstances[name] = instance` (spec.md §6).
    pub fn register_instance(&self, name: impl Into<String>, instance: Arc<dyn CommandHandlerInstance>) {
        self.instances.insert(name.into(), instance);
    }

    /// `env.commandHandlerClasses[name] = Class` (spec.md §6).
    pub fn register_class(&self, name: impl Into<String>, class: Arc<dyn CommandHandlerClass>) {
        self.classes.insert(name.into(), class);
    }

    /// Every handler name actually invoked during this render so far, in
    /// first-touch order — used to build the script-mode render result's
    /// per-handler fields after flattening.
    pub fn touched_handlers(&self) -> Vec<String> {
        self.touched.iter().map(|e| e.key().clone()).collect()
    }

    /// The value to place in the render result for `name` (spec.md §4.7:
    /// `getReturnValue()` if present, else the handler itself).
    pub fn handler_result(&self, name: &str) -> Option<Value> {
        let instance = self.instantiated.get(name)?;
        Some(
            instance
                .return_value()
                .unwrap_or_else(|| Value::Handler(Arc::new(Arc::clone(instance.value())) as Arc<dyn std::any::Any + Send + Sync>)),
        )
    }

    /// Get-or-create the handler instance for `name` (spec.md §4.7): a
    /// previously-registered instance is initialized once via `_init`,
    /// otherwise a matching registered class is constructed fresh.
    async fn get_or_create(&self, name: &str) -> Result<Arc<dyn CommandHandlerInstance>> {
        if let Some(existing) = self.instantiated.get(name) {
            return Ok(Arc::clone(existing.value()));
        }
        let instance = if let Some(registered) = self.instances.get(name) {
            let instance = Arc::clone(registered.value());
            instance.init(&self.variables).await?;
            instance
        } else if let Some(class) = self.classes.get(name) {
            class.construct(&self.variables, self).await?
        } else {
            return Err(Error::UnknownHandler(name.to_string()));
        };
        self.instantiated.insert(name.to_string(), Arc::clone(&instance));
        Ok(instance)
    }
}

#[async_trait::async_trait]
impl HandlerEnv for Context {
    async fn call_handler(
        &self,
        handler: &str,
        subpath: &[Arc<str>],
        command: Option<&str>,
        args: Vec<Value>,
    ) -> std::result::Result<Value, skein_core::BoxError> {
        self.touched.insert(handler.to_string(), ());
        let instance = self
            .get_or_create(handler)
            .await
            .map_err(|e| skein_core::box_error(HandlerBridgeError(e.to_string())))?;
        instance
            .call(subpath, command, args)
            .await
            .map_err(|e| skein_core::box_error(HandlerBridgeError(e.to_string())))?;
        // spec.md §4.7: the assembled result holds `getReturnValue()` (or
        // the handler itself), not the individual call's own return value.
        Ok(self.handler_result(handler).unwrap_or(Value::Undefined))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct HandlerBridgeError(String);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::CountingHandler;
    use indexmap::IndexMap;

    #[tokio::test]
    async fn call_handler_initializes_instance_once_and_returns_getReturnValue() {
        let ctx = Context::new(None, Value::object(IndexMap::new()), LookupMode::Script);
        let handler = Arc::new(CountingHandler::default());
        ctx.register_instance("counter", handler.clone());

        let first = ctx.call_handler("counter", &[], None, vec![Value::Int(1)]).await.unwrap();
        assert!(matches!(first, Value::Int(1)));

        let second = ctx.call_handler("counter", &[], None, vec![Value::Int(2)]).await.unwrap();
        assert!(matches!(second, Value::Int(2)));

        assert_eq!(ctx.touched_handlers(), vec!["counter".to_string()]);
    }

    #[tokio::test]
    async fn call_handler_errors_on_unknown_name() {
        let ctx = Context::new(None, Value::object(IndexMap::new()), LookupMode::Script);
        assert!(ctx.call_handler("missing", &[], None, vec![]).await.is_err());
    }
}
