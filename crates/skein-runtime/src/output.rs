//! The output buffer and its flattening step (spec.md §4.7).
//!
//! Generated code appends to a tree-shaped buffer in source order; each
//! concurrently-executing sub-block owns its own sub-buffer, slotted into
//! its parent at a compile-time-determined position, so flattening later
//! reproduces source order regardless of completion order.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::Arc;

use skein_core::{box_error, BoxError, CommandRecord, PoisonError, PoisonMarker, Value};

use crate::err::{Error, Result};
use crate::poison::is_poison;

/// A post-processing function item (spec.md §4.7: "handles post-processing
/// function items by applying them to the accumulated string so far"),
/// used by auto-escape wrappers. Boxed because different wrappers close
/// over different escaping rules.
pub type PostProcessFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// One slot in the output buffer.
pub enum OutputItem {
    Text(Arc<str>),
    /// Already-escaped text (spec.md §3 `SafeText`); never re-escaped.
    SafeText(Arc<str>),
    PostProcess(PostProcessFn),
    Sub(OutputBuffer),
    Command(Arc<CommandRecord>),
    PoisonMarker(PoisonMarker),
    /// A poisoned value appended directly (e.g. an expression that
    /// evaluated to poison was interpolated).
    Poison(Value),
}

/// The tree-shaped, append-only output buffer a compiled body writes into.
#[derive(Default)]
pub struct OutputBuffer {
    items: Vec<OutputItem>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&mut self, text: impl Into<Arc<str>>) {
        self.items.push(OutputItem::Text(text.into()));
    }

    pub fn push_safe_text(&mut self, text: impl Into<Arc<str>>) {
        self.items.push(OutputItem::SafeText(text.into()));
    }

    pub fn push_post_process(&mut self, f: PostProcessFn) {
        self.items.push(OutputItem::PostProcess(f));
    }

    /// Reserves a slot for a sub-block's output at the current position and
    /// returns a handle the caller writes into once the sub-block
    /// completes (possibly out of order relative to siblings).
    pub fn push_sub(&mut self) -> &mut OutputBuffer {
        self.items.push(OutputItem::Sub(OutputBuffer::new()));
        match self.items.last_mut().expect("just pushed") {
            OutputItem::Sub(buf) => buf,
            _ => unreachable!(),
        }
    }

    pub fn push_command(&mut self, record: CommandRecord) {
        self.items.push(OutputItem::Command(Arc::new(record)));
    }

    pub fn push_poison_marker(&mut self, marker: PoisonMarker) {
        self.items.push(OutputItem::PoisonMarker(marker));
    }

    pub fn push_value(&mut self, value: Value) {
        if is_poison(&value) {
            self.items.push(OutputItem::Poison(value));
        } else {
            self.items.push(OutputItem::Text(Arc::from(render_scalar(&value))));
        }
    }

    /// Template (text-only) fast path (spec.md §4.7). No handler
    /// dispatch: command records are treated as plain text if their
    /// arguments are text, otherwise skipped.
    pub fn flatten_template(&self) -> std::result::Result<String, PoisonError> {
        let mut text = String::new();
        let mut errors: Vec<BoxError> = Vec::new();
        self.walk_template(&mut text, &mut errors);
        if errors.is_empty() {
            Ok(text)
        } else {
            Err(PoisonError::new(errors))
        }
    }

    fn walk_template(&self, text: &mut String, errors: &mut Vec<BoxError>) {
        for item in &self.items {
            match item {
                OutputItem::Text(s) | OutputItem::SafeText(s) => text.push_str(s),
                OutputItem::PostProcess(f) => {
                    let processed = f(text);
                    text.clear();
                    text.push_str(&processed);
                }
                OutputItem::Sub(buf) => buf.walk_template(text, errors),
                OutputItem::Command(cmd) => {
                    if cmd.is_text() {
                        for arg in &cmd.arguments {
                            text.push_str(&render_scalar(arg));
                        }
                    }
                }
                OutputItem::PoisonMarker(marker) => errors.extend(marker.errors.iter().cloned()),
                OutputItem::Poison(v) => {
                    if let Some(p) = v.as_poison() {
                        errors.extend(p.errors.iter().cloned());
                    }
                }
            }
        }
    }

    /// Script path (spec.md §4.7): in addition to text, dispatches command
    /// records to registered handlers and assembles a `{ text?, [handler]:
    /// ... }` result object.
    pub async fn flatten_script(&self, env: &dyn HandlerEnv) -> Result<Value> {
        let mut text = String::new();
        let mut results: IndexMap<Arc<str>, Value> = IndexMap::new();
        let mut errors: Vec<BoxError> = Vec::new();

        self.walk_script(env, &mut text, &mut results, &mut errors).await;

        if !errors.is_empty() {
            return Err(Error::Poison(PoisonError::new(errors)));
        }

        let mut out = IndexMap::new();
        if !text.is_empty() {
            out.insert(Arc::from("text"), Value::str(text));
        }
        for (name, value) in results {
            out.insert(name, value);
        }
        Ok(Value::object(out))
    }

    fn walk_script<'a>(
        &'a self,
        env: &'a dyn HandlerEnv,
        text: &'a mut String,
        results: &'a mut IndexMap<Arc<str>, Value>,
        errors: &'a mut Vec<BoxError>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + 'a>> {
        Box::pin(async move {
            for item in &self.items {
                match item {
                    OutputItem::Text(s) | OutputItem::SafeText(s) => text.push_str(s),
                    OutputItem::PostProcess(f) => {
                        let processed = f(text);
                        text.clear();
                        text.push_str(&processed);
                    }
                    OutputItem::Sub(buf) => buf.walk_script(env, text, results, errors).await,
                    OutputItem::Command(cmd) => {
                        if cmd.is_text() {
                            for arg in &cmd.arguments {
                                text.push_str(&render_scalar(arg));
                            }
                            continue;
                        }
                        let mut poisoned = false;
                        for arg in &cmd.arguments {
                            if let Some(p) = arg.as_poison() {
                                errors.extend(p.errors.iter().cloned());
                                poisoned = true;
                            }
                        }
                        if poisoned {
                            continue;
                        }
                        let handler_name: Arc<str> = cmd.handler.clone().unwrap_or_else(|| Arc::from(""));
                        match env
                            .call_handler(&handler_name, &cmd.subpath, cmd.command.as_deref(), cmd.arguments.clone())
                            .await
                        {
                            Ok(v) => {
                                results.insert(handler_name, v);
                            }
                            Err(e) => errors.push(e),
                        }
                    }
                    OutputItem::PoisonMarker(marker) => errors.extend(marker.errors.iter().cloned()),
                    OutputItem::Poison(v) => {
                        if let Some(p) = v.as_poison() {
                            errors.extend(p.errors.iter().cloned());
                        }
                    }
                }
            }
        })
    }
}

/// Picks a single named field out of a script-mode render result (spec.md
/// §6 "Render result (script mode)" `focusOutput`); an unknown target is a
/// hard error, never silently `undefined`.
pub fn focus_output(result: &Value, target: &str) -> Result<Value> {
    match result {
        Value::Object(obj) => obj
            .get(target)
            .cloned()
            .ok_or_else(|| Error::UnknownFocusTarget(target.to_string())),
        _ => Err(Error::UnknownFocusTarget(target.to_string())),
    }
}

fn render_scalar(v: &Value) -> String {
    match v {
        Value::Undefined => String::new(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Str(s) | Value::SafeText(s) => s.to_string(),
        other => format!("{other:?}"),
    }
}

/// The bridge between the output flattener and a render's registered
/// command handlers, implemented by `skein::Context` (kept here as a
/// trait so `skein-runtime` never depends on the crate that registers
/// handlers).
#[async_trait]
pub trait HandlerEnv: Send + Sync {
    async fn call_handler(
        &self,
        handler: &str,
        subpath: &[Arc<str>],
        command: Option<&str>,
        args: Vec<Value>,
    ) -> std::result::Result<Value, BoxError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        pub Handlers {}

        #[async_trait]
        impl HandlerEnv for Handlers {
            async fn call_handler(
                &self,
                handler: &str,
                subpath: &[Arc<str>],
                command: Option<&str>,
                args: Vec<Value>,
            ) -> std::result::Result<Value, BoxError>;
        }
    }

    struct NoHandlers;

    #[async_trait]
    impl HandlerEnv for NoHandlers {
        async fn call_handler(
            &self,
            handler: &str,
            _subpath: &[Arc<str>],
            _command: Option<&str>,
            _args: Vec<Value>,
        ) -> std::result::Result<Value, BoxError> {
            Err(box_error(DummyHandlerError(handler.to_string())))
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("no handler registered: {0}")]
    struct DummyHandlerError(String);

    #[test]
    fn flatten_template_concatenates_text_and_sub_buffers() {
        let mut buf = OutputBuffer::new();
        buf.push_text("hello ");
        {
            let sub = buf.push_sub();
            sub.push_text("world");
        }
        buf.push_text("!");
        assert_eq!(buf.flatten_template().unwrap(), "hello world!");
    }

    #[test]
    fn flatten_template_aggregates_poison_markers_as_errors() {
        let mut buf = OutputBuffer::new();
        buf.push_text("a");
        buf.push_poison_marker(PoisonMarker {
            errors: Arc::new(vec![box_error(DummyHandlerError("x".into()))]),
            handler: Arc::from("x"),
        });
        let err = buf.flatten_template().unwrap_err();
        assert_eq!(err.errors.len(), 1);
    }

    #[tokio::test]
    async fn flatten_script_emits_text_and_handler_results() {
        let mut buf = OutputBuffer::new();
        buf.push_command(CommandRecord {
            handler: None,
            command: None,
            subpath: vec![],
            arguments: vec![Value::str("hi")],
            pos: skein_core::Span::dummy(),
        });
        let env = NoHandlers;
        let result = buf.flatten_script(&env).await.unwrap();
        match result {
            Value::Object(obj) => match obj.get("text") {
                Some(Value::Str(s)) => assert_eq!(&**s, "hi"),
                other => panic!("expected text field, got {other:?}"),
            },
            other => panic!("expected object, got {other:?}"),
        }
    }

    /// A poisoned argument causes the call to be skipped, and its errors
    /// still reach the aggregated result (spec.md §4.7 "a poisoned
    /// argument causes the call to be skipped").
    #[tokio::test]
    async fn flatten_script_skips_handler_call_with_a_poisoned_argument() {
        let mut env = MockHandlers::new();
        env.expect_call_handler().never();

        let mut buf = OutputBuffer::new();
        let poisoned = skein_core::Value::Poison(skein_core::PoisonedValue::single(box_error(DummyHandlerError("bad arg".into()))));
        buf.push_command(CommandRecord {
            handler: Some(Arc::from("greeter")),
            command: None,
            subpath: vec![],
            arguments: vec![poisoned],
            pos: skein_core::Span::dummy(),
        });

        let err = buf.flatten_script(&env).await.unwrap_err();
        match err {
            Error::Poison(p) => assert_eq!(p.errors.len(), 1),
            other => panic!("expected a poison error, got {other:?}"),
        }
    }

    /// A non-poisoned command dispatches to the registered handler exactly
    /// once, and its result lands under the handler's own name.
    #[tokio::test]
    async fn flatten_script_dispatches_to_the_named_handler_once() {
        let mut env = MockHandlers::new();
        env.expect_call_handler()
            .times(1)
            .returning(|_handler, _subpath, _command, _args| Ok(Value::Int(42)));

        let mut buf = OutputBuffer::new();
        buf.push_command(CommandRecord {
            handler: Some(Arc::from("greeter")),
            command: None,
            subpath: vec![],
            arguments: vec![Value::str("hi")],
            pos: skein_core::Span::dummy(),
        });

        let result = buf.flatten_script(&env).await.unwrap();
        match result {
            Value::Object(obj) => match obj.get("greeter") {
                Some(Value::Int(42)) => {}
                other => panic!("expected greeter's result, got {other:?}"),
            },
            other => panic!("expected object, got {other:?}"),
        }
    }
}
