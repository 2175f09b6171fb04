//! Process-wide daemon state.
//!
//! Everything a request handler can touch lives in one [`DaemonState`]:
//! the node config, the expansion hooks, the ref registry, the inflight
//! counter and the shutdown coordinator, plus the execution engine they all
//! run source through.

use crate::builder::SandboxBuilder;
use crate::capabilities::CapabilitySet;
use crate::config::ConfigStore;
use crate::digest::Digest;
use crate::engine::ExecutionEngine;
use crate::error::{Error, Result};
use crate::expansion::ExpansionPipeline;
use crate::inflight::InflightTracker;
use crate::registry::RefRegistry;
use crate::shutdown::{DrainOutcome, ShutdownCoordinator};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct DaemonState {
    pub config: ConfigStore,
    pub expansions: ExpansionPipeline,
    pub registry: RefRegistry,
    pub inflight: InflightTracker,
    pub shutdown: ShutdownCoordinator,
    engine: Arc<dyn ExecutionEngine>,
}

impl DaemonState {
    pub fn new(engine: Arc<dyn ExecutionEngine>) -> Self {
        Self {
            config: ConfigStore::new(),
            expansions: ExpansionPipeline::new(),
            registry: RefRegistry::new(),
            inflight: InflightTracker::new(),
            shutdown: ShutdownCoordinator::new(),
            engine,
        }
    }

    pub fn engine(&self) -> &dyn ExecutionEngine {
        self.engine.as_ref()
    }

    pub fn sandbox_builder(&self) -> SandboxBuilder<'_> {
        SandboxBuilder::new(&self.config, &self.expansions, self.engine.as_ref())
    }

    pub async fn deploy(&self, digest: Digest, source: &str) -> Result<Digest> {
        self.admit()?;
        self.registry
            .deploy(&self.sandbox_builder(), digest, source)
            .await
    }

    /// Invokes the ref deployed under `digest`.
    ///
    /// The invocation is counted before admission is checked, so a drain
    /// that starts concurrently either rejects it or waits for it.
    pub async fn invoke(&self, digest: &Digest, context: Option<Value>) -> Result<Value> {
        let inflight = self.inflight.begin();
        self.admit()?;
        self.registry.invoke(inflight, digest, context).await
    }

    pub async fn undeploy(&self, digest: Digest) -> Digest {
        self.registry.undeploy(&digest).await;
        digest
    }

    /// Registers an expansion hook from `source`.
    ///
    /// The scratch sandbox loads modules from the configured module path,
    /// or from the working directory when none is configured.
    pub async fn expand_sandbox(&self, source: &str) -> Result<bool> {
        let mut module_roots = self.config.snapshot().await.module_roots();
        if module_roots.is_empty() {
            module_roots.push(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        }
        self.expansions
            .register(self.engine(), source, module_roots)
            .await
    }

    pub async fn set_config(&self, config: Value) -> CapabilitySet {
        self.config.set(config).await
    }

    /// Stops admitting invocations and deploys, then drains inflight work.
    ///
    /// Termination is not signalled here; call
    /// [`ShutdownCoordinator::terminate`] once the request has been answered.
    pub async fn graceful_shutdown(&self, deadline: Option<Duration>) -> DrainOutcome {
        self.shutdown.drain(&self.inflight, deadline).await
    }

    fn admit(&self) -> Result<()> {
        if self.shutdown.is_draining() {
            Err(Error::ShuttingDown)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{NativeEngine, expander_fn, invocable_fn};
    use crate::error::ExecutionError;
    use crate::sandbox::{BindingSet, Export};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Engine with an "inspect" module whose handle reports the `greeting`
    /// global its sandbox saw, and a "greeter" hook that sets it.
    fn engine() -> Arc<dyn ExecutionEngine> {
        let engine = NativeEngine::new()
            .with_module("inspect", |b| {
                let seen = b.globals.get("greeting").cloned().unwrap_or(Value::Null);
                b.module.exports = Export::function(invocable_fn(move |_| {
                    let seen = seen.clone();
                    async move { Ok::<_, ExecutionError>(seen) }
                }));
                Ok(())
            })
            .with_module("greeter", |b| {
                b.module.exports = Export::function(expander_fn(|b: &mut BindingSet| {
                    b.globals.insert("greeting".into(), json!("hello"));
                    Ok(())
                }));
                Ok(())
            });
        Arc::new(engine)
    }

    #[tokio::test]
    async fn hooks_apply_only_to_later_sandboxes() {
        let state = DaemonState::new(engine());

        state.deploy(Digest::from("a"), "inspect").await.unwrap();
        assert!(state.expand_sandbox("greeter").await.unwrap());
        state.deploy(Digest::from("b"), "inspect").await.unwrap();

        let a = state.invoke(&Digest::from("a"), None).await.unwrap();
        let b = state.invoke(&Digest::from("b"), None).await.unwrap();
        assert_eq!(a, Value::Null);
        assert_eq!(b, json!("hello"));
    }

    #[tokio::test]
    async fn draining_rejects_new_work() {
        let state = DaemonState::new(engine());
        state.deploy(Digest::from("a"), "inspect").await.unwrap();

        let outcome = state.graceful_shutdown(None).await;
        assert!(outcome.drained);

        let err = state.invoke(&Digest::from("a"), None).await.unwrap_err();
        assert!(matches!(err, Error::ShuttingDown));
        let err = state.deploy(Digest::from("b"), "inspect").await.unwrap_err();
        assert!(matches!(err, Error::ShuttingDown));

        assert_eq!(state.undeploy(Digest::from("a")).await, Digest::from("a"));
        assert_eq!(state.inflight.count(), 0);
    }

    #[tokio::test]
    async fn set_config_reports_capabilities() {
        let state = DaemonState::new(engine());
        let caps = state.set_config(json!({ "modulePath": "/srv/modules" })).await;
        assert!(caps.module_access);
        assert!(caps.raw_bytes_access);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn drain_never_completes_ahead_of_an_admitted_invocation() {
        for _ in 0..200 {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            let engine = NativeEngine::new().with_module("count", move |b| {
                let counter = Arc::clone(&counter);
                b.module.exports = Export::function(invocable_fn(move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        tokio::task::yield_now().await;
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, ExecutionError>(Value::Null)
                    }
                }));
                Ok(())
            });
            let state = Arc::new(DaemonState::new(Arc::new(engine)));
            state.deploy(Digest::from("c"), "count").await.unwrap();

            let invoker = {
                let state = Arc::clone(&state);
                tokio::spawn(async move { state.invoke(&Digest::from("c"), None).await })
            };
            let outcome = state.graceful_shutdown(None).await;
            let calls_when_drained = calls.load(Ordering::SeqCst);
            let result = invoker.await.unwrap();

            assert!(outcome.drained);
            match result {
                Ok(_) => assert_eq!(calls_when_drained, 1, "admitted invocation outlived the drain"),
                Err(err) => assert!(matches!(err, Error::ShuttingDown)),
            }
            assert_eq!(state.inflight.count(), 0);
        }
    }

    #[tokio::test]
    async fn rejected_invocation_is_uncounted() {
        let state = DaemonState::new(engine());
        state.deploy(Digest::from("a"), "inspect").await.unwrap();
        let _held = state.inflight.begin();

        let drain = state.graceful_shutdown(Some(Duration::from_millis(20)));
        let invoke = async {
            while !state.shutdown.is_draining() {
                tokio::task::yield_now().await;
            }
            let err = state.invoke(&Digest::from("a"), None).await.unwrap_err();
            assert!(matches!(err, Error::ShuttingDown));
            assert_eq!(state.inflight.count(), 1);
        };
        let (outcome, ()) = tokio::join!(drain, invoke);
        assert!(!outcome.drained);
    }
}
