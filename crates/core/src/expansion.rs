//! Expansion hooks.
//!
//! Hooks are registered by running source once in a scratch sandbox; if that
//! source exports something callable, it is appended to the pipeline and
//! applied, in registration order, to every sandbox built afterwards.
//! Hooks are never removed or reordered.

use crate::engine::{ExecutionEngine, Invocable};
use crate::error::{ExecutionError, Result};
use crate::sandbox::BindingSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Default)]
pub struct ExpansionPipeline {
    hooks: RwLock<Vec<Arc<dyn Invocable>>>,
}

impl ExpansionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `source` in a scratch sandbox and registers its export as a hook.
    ///
    /// Returns `false`, registering nothing, if the export is not callable.
    pub async fn register(
        &self,
        engine: &dyn ExecutionEngine,
        source: &str,
        module_roots: Vec<PathBuf>,
    ) -> Result<bool> {
        let mut scratch = BindingSet::scratch(module_roots);
        engine.execute(source, &mut scratch).await?;

        let Some(hook) = scratch.module.exports.into_invocable() else {
            debug!("expansion source exported nothing callable");
            return Ok(false);
        };

        let mut hooks = self.hooks.write().await;
        hooks.push(hook);
        info!(hooks = hooks.len(), "expansion hook registered");
        Ok(true)
    }

    /// The hooks registered so far, in registration order.
    pub async fn snapshot(&self) -> Vec<Arc<dyn Invocable>> {
        self.hooks.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.hooks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.hooks.read().await.is_empty()
    }
}

/// Applies `hooks` to `bindings` one after another, awaiting each.
pub async fn apply(
    hooks: &[Arc<dyn Invocable>],
    bindings: &mut BindingSet,
) -> std::result::Result<(), ExecutionError> {
    for hook in hooks {
        hook.expand(bindings).await?;
    }
    Ok(())
}
