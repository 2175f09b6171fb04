use crate::config::ConfigStore;
use crate::engine::ExecutionEngine;
use crate::error::Result;
use crate::expansion::{self, ExpansionPipeline};
use crate::sandbox::BindingSet;
use tracing::debug;

/// Assembles binding sets for new sandboxes.
///
/// The capability set and the hook list are each read once, when a build
/// starts. Config changes and hooks registered while a build is in progress
/// only affect later builds.
pub struct SandboxBuilder<'a> {
    config: &'a ConfigStore,
    expansions: &'a ExpansionPipeline,
    engine: &'a dyn ExecutionEngine,
}

impl<'a> SandboxBuilder<'a> {
    pub fn new(
        config: &'a ConfigStore,
        expansions: &'a ExpansionPipeline,
        engine: &'a dyn ExecutionEngine,
    ) -> Self {
        Self {
            config,
            expansions,
            engine,
        }
    }

    /// Builds a fresh binding set and runs every registered hook over it.
    pub async fn build(&self) -> Result<BindingSet> {
        let snapshot = self.config.snapshot().await;
        let hooks = self.expansions.snapshot().await;

        let mut bindings = BindingSet::new(snapshot.capabilities, snapshot.module_roots());
        debug!(
            sandbox = %bindings.id,
            hooks = hooks.len(),
            disabled = ?bindings.disabled_capabilities(),
            "building sandbox"
        );

        expansion::apply(&hooks, &mut bindings).await?;
        Ok(bindings)
    }

    /// Builds a sandbox and runs `source` in it.
    pub async fn load(&self, source: &str) -> Result<BindingSet> {
        let mut bindings = self.build().await?;
        self.engine.execute(source, &mut bindings).await?;
        Ok(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{NativeEngine, expander_fn};
    use crate::error::{Error, ExecutionError};
    use crate::sandbox::Export;
    use serde_json::json;

    fn engine() -> NativeEngine {
        NativeEngine::new()
            .with_module("tag", |b| {
                b.module.exports = Export::function(expander_fn(|b: &mut BindingSet| {
                    b.globals.insert("tagged".into(), json!(true));
                    Ok(())
                }));
                Ok(())
            })
            .with_module("failing-hook", |b| {
                b.module.exports = Export::function(expander_fn(|_: &mut BindingSet| {
                    Err(ExecutionError::new("hook exploded"))
                }));
                Ok(())
            })
            .with_module("export-tagged", |b| {
                b.module.exports = Export::Value(json!(b.globals.contains_key("tagged")));
                Ok(())
            })
    }

    #[tokio::test]
    async fn build_gates_modules_by_config() {
        let config = ConfigStore::new();
        let expansions = ExpansionPipeline::new();
        let engine = engine();
        let builder = SandboxBuilder::new(&config, &expansions, &engine);

        let bindings = builder.build().await.unwrap();
        let err = bindings.modules.access().unwrap_err();
        assert_eq!(err.to_string(), "No support for require in this node");

        config.set(json!({ "modulePath": "/srv/modules" })).await;
        let bindings = builder.build().await.unwrap();
        assert!(bindings.modules.access().is_ok());
        assert!(bindings.raw_bytes.access().is_ok());
    }

    #[tokio::test]
    async fn array_module_path_enables_the_loader() {
        let config = ConfigStore::new();
        let expansions = ExpansionPipeline::new();
        let engine = engine();
        let builder = SandboxBuilder::new(&config, &expansions, &engine);

        let caps = config.set(json!({ "modulePath": ["/srv/a", "/srv/b"] })).await;
        assert!(caps.module_access);

        let bindings = builder.build().await.unwrap();
        let loader = bindings.modules.access().unwrap();
        assert_eq!(
            loader.roots(),
            &[
                std::path::PathBuf::from("/srv/a"),
                std::path::PathBuf::from("/srv/b")
            ]
        );
    }

    #[tokio::test]
    async fn config_change_does_not_touch_built_sandboxes() {
        let config = ConfigStore::new();
        config.set(json!({ "modulePath": "/srv/modules" })).await;
        let expansions = ExpansionPipeline::new();
        let engine = engine();
        let builder = SandboxBuilder::new(&config, &expansions, &engine);

        let before = builder.build().await.unwrap();
        config.set(json!({})).await;

        assert!(before.modules.is_enabled());
        assert!(!builder.build().await.unwrap().modules.is_enabled());
    }

    #[tokio::test]
    async fn hooks_run_before_source() {
        let config = ConfigStore::new();
        let expansions = ExpansionPipeline::new();
        let engine = engine();
        expansions
            .register(&engine, "tag", vec![std::env::temp_dir()])
            .await
            .unwrap();

        let builder = SandboxBuilder::new(&config, &expansions, &engine);
        let bindings = builder.load("export-tagged").await.unwrap();
        assert!(matches!(bindings.module.exports, Export::Value(ref v) if *v == json!(true)));
    }

    #[tokio::test]
    async fn failing_hook_fails_the_build() {
        let config = ConfigStore::new();
        let expansions = ExpansionPipeline::new();
        let engine = engine();
        expansions
            .register(&engine, "failing-hook", vec![std::env::temp_dir()])
            .await
            .unwrap();

        let builder = SandboxBuilder::new(&config, &expansions, &engine);
        let err = builder.build().await.unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
        assert_eq!(err.to_string(), "hook exploded");
    }
}
