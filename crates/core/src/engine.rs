//! The execution engine seam.
//!
//! An [`ExecutionEngine`] runs source text against a [`BindingSet`] and
//! leaves whatever the source exported in `bindings.module.exports`. What
//! "source" means is entirely up to the engine: [`NativeEngine`] treats it
//! as the name of a Rust-implemented module, other engines may hand it to
//! an interpreter or a subprocess.

use crate::error::ExecutionError;
use crate::sandbox::BindingSet;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs `source` once against `bindings`.
    async fn execute(&self, source: &str, bindings: &mut BindingSet) -> Result<(), ExecutionError>;
}

/// An exported value that can be called.
#[async_trait]
pub trait Invocable: Send + Sync {
    async fn call(&self, context: Value) -> Result<Value, ExecutionError>;

    /// Applies this invocable as an expansion hook.
    ///
    /// The default passes the current extension globals in and, when the
    /// call returns an object, installs it as the new globals.
    async fn expand(&self, bindings: &mut BindingSet) -> Result<(), ExecutionError> {
        let globals = Value::Object(bindings.globals.clone());
        if let Value::Object(updated) = self.call(globals).await? {
            bindings.globals = updated;
        }
        Ok(())
    }
}

/// Invocable backed by an async closure.
pub struct FnInvocable<F>(F);

/// Wraps an async closure as an [`Invocable`].
pub fn invocable_fn<F, Fut>(f: F) -> FnInvocable<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send + 'static,
{
    FnInvocable(f)
}

#[async_trait]
impl<F, Fut> Invocable for FnInvocable<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send + 'static,
{
    async fn call(&self, context: Value) -> Result<Value, ExecutionError> {
        (self.0)(context).await
    }
}

/// Expansion hook that mutates the binding set in place.
///
/// Called as a plain function it does nothing and returns `null`.
pub struct Expander<F>(F);

pub fn expander_fn<F>(f: F) -> Expander<F>
where
    F: Fn(&mut BindingSet) -> Result<(), ExecutionError> + Send + Sync + 'static,
{
    Expander(f)
}

#[async_trait]
impl<F> Invocable for Expander<F>
where
    F: Fn(&mut BindingSet) -> Result<(), ExecutionError> + Send + Sync + 'static,
{
    async fn call(&self, _context: Value) -> Result<Value, ExecutionError> {
        Ok(Value::Null)
    }

    async fn expand(&self, bindings: &mut BindingSet) -> Result<(), ExecutionError> {
        (self.0)(bindings)
    }
}

pub type NativeModule = Arc<dyn Fn(&mut BindingSet) -> Result<(), ExecutionError> + Send + Sync>;

/// Engine whose "source" is the name of a module implemented in Rust.
///
/// Useful for embedding the daemon core in a host that ships its refs as
/// compiled code, and for exercising the daemon without an interpreter.
#[derive(Clone, Default)]
pub struct NativeEngine {
    modules: HashMap<String, NativeModule>,
}

impl NativeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, module: F)
    where
        F: Fn(&mut BindingSet) -> Result<(), ExecutionError> + Send + Sync + 'static,
    {
        self.modules.insert(name.into(), Arc::new(module));
    }

    pub fn with_module<F>(mut self, name: impl Into<String>, module: F) -> Self
    where
        F: Fn(&mut BindingSet) -> Result<(), ExecutionError> + Send + Sync + 'static,
    {
        self.register(name, module);
        self
    }
}

#[async_trait]
impl ExecutionEngine for NativeEngine {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn execute(&self, source: &str, bindings: &mut BindingSet) -> Result<(), ExecutionError> {
        let name = source.trim();
        let module = self
            .modules
            .get(name)
            .ok_or_else(|| ExecutionError::new(format!("module '{name}' is not defined")))?;
        module(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilitySet;
    use crate::sandbox::Export;
    use serde_json::json;

    fn bindings() -> BindingSet {
        BindingSet::new(CapabilitySet::default(), Vec::new())
    }

    #[tokio::test]
    async fn native_module_sets_exports() {
        let engine = NativeEngine::new().with_module("answer", |b| {
            b.module.exports = Export::Value(json!(42));
            Ok(())
        });

        let mut b = bindings();
        engine.execute("  answer\n", &mut b).await.unwrap();
        assert!(matches!(b.module.exports, Export::Value(ref v) if *v == json!(42)));
    }

    #[tokio::test]
    async fn unknown_module_fails() {
        let engine = NativeEngine::new();
        let err = engine.execute("missing", &mut bindings()).await.unwrap_err();
        assert_eq!(err.message, "module 'missing' is not defined");
    }

    #[tokio::test]
    async fn fn_invocable_calls_closure() {
        let handle = invocable_fn(|ctx: Value| async move {
            Ok::<_, ExecutionError>(json!(ctx["x"].as_i64().unwrap_or(0) * 2))
        });
        assert_eq!(handle.call(json!({ "x": 21 })).await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn default_expand_replaces_globals_with_returned_object() {
        let hook = invocable_fn(|globals: Value| async move {
            let mut globals = globals.as_object().cloned().unwrap_or_default();
            globals.insert("greeting".into(), json!("hello"));
            Ok::<_, ExecutionError>(Value::Object(globals))
        });

        let mut b = bindings();
        b.globals.insert("existing".into(), json!(true));
        hook.expand(&mut b).await.unwrap();

        assert_eq!(b.globals.get("existing"), Some(&json!(true)));
        assert_eq!(b.globals.get("greeting"), Some(&json!("hello")));
    }

    #[tokio::test]
    async fn default_expand_ignores_non_object_results() {
        let hook = invocable_fn(|_| async { Ok::<_, ExecutionError>(json!(7)) });
        let mut b = bindings();
        b.globals.insert("kept".into(), json!(1));
        hook.expand(&mut b).await.unwrap();
        assert_eq!(b.globals.get("kept"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn expander_mutates_in_place() {
        let hook = expander_fn(|b: &mut BindingSet| {
            b.globals.insert("tenant".into(), json!("acme"));
            Ok(())
        });
        let mut b = bindings();
        hook.expand(&mut b).await.unwrap();
        assert_eq!(b.globals.get("tenant"), Some(&json!("acme")));
        assert_eq!(hook.call(json!({})).await.unwrap(), Value::Null);
    }
}
