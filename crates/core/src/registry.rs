//! Digest-keyed registry of deployed refs.

use crate::builder::SandboxBuilder;
use crate::digest::Digest;
use crate::engine::Invocable;
use crate::error::{Error, Result};
use crate::inflight::InflightGuard;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Maps digests to deployed handles.
///
/// Each operation touches the map under a single lock acquisition and never
/// holds the lock while user code runs, so deploys, undeploys and invocations
/// of the same digest may interleave freely without corrupting the map.
#[derive(Default)]
pub struct RefRegistry {
    refs: RwLock<HashMap<Digest, Arc<dyn Invocable>>>,
}

impl RefRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `source` in a fresh sandbox and registers its export under
    /// `digest`.
    ///
    /// A non-callable export is accepted but registers nothing, leaving any
    /// earlier ref under the same digest in place.
    pub async fn deploy(
        &self,
        builder: &SandboxBuilder<'_>,
        digest: Digest,
        source: &str,
    ) -> Result<Digest> {
        let bindings = builder.load(source).await?;
        let sandbox = bindings.id;

        match bindings.module.exports.into_invocable() {
            Some(handle) => {
                let replaced = self
                    .refs
                    .write()
                    .await
                    .insert(digest.clone(), handle)
                    .is_some();
                info!(%digest, %sandbox, replaced, "ref deployed");
            }
            None => {
                warn!(%digest, %sandbox, "deployed source exported nothing callable; no ref registered");
            }
        }

        Ok(digest)
    }

    /// Calls the handle deployed under `digest` with `context` (an empty
    /// object when absent).
    ///
    /// The inflight guard is held from before the lookup until the call
    /// settles.
    pub async fn invoke(
        &self,
        _inflight: InflightGuard<'_>,
        digest: &Digest,
        context: Option<Value>,
    ) -> Result<Value> {
        let handle = self.refs.read().await.get(digest).cloned();
        let Some(handle) = handle else {
            debug!(%digest, "invoke of unknown digest");
            return Err(Error::NotFound {
                digest: digest.clone(),
            });
        };

        let context = context.unwrap_or_else(|| Value::Object(Map::new()));
        Ok(handle.call(context).await?)
    }

    /// Removes the ref deployed under `digest`, if any.
    pub async fn undeploy(&self, digest: &Digest) -> bool {
        let removed = self.refs.write().await.remove(digest).is_some();
        if removed {
            info!(%digest, "ref undeployed");
        } else {
            debug!(%digest, "undeploy of unknown digest");
        }
        removed
    }

    pub async fn contains(&self, digest: &Digest) -> bool {
        self.refs.read().await.contains_key(digest)
    }

    /// Deployed digests in sorted order.
    pub async fn digests(&self) -> Vec<Digest> {
        let mut digests: Vec<_> = self.refs.read().await.keys().cloned().collect();
        digests.sort();
        digests
    }

    pub async fn len(&self) -> usize {
        self.refs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.refs.read().await.is_empty()
    }
}
