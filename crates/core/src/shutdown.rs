//! Drain-based shutdown.
//!
//! A graceful shutdown first stops admitting new work, then waits for the
//! inflight counter to drain (optionally bounded by a deadline). Termination
//! is signalled separately so the caller can acknowledge the request before
//! the process goes away.

use crate::inflight::InflightTracker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    /// False if the deadline expired with invocations still in flight.
    pub drained: bool,
}

pub struct ShutdownCoordinator {
    draining: AtomicBool,
    terminate: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (terminate, _) = watch::channel(false);
        Self {
            draining: AtomicBool::new(false),
            terminate,
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Stops admitting work and waits for inflight invocations to settle.
    ///
    /// With no deadline this waits for as long as it takes.
    pub async fn drain(&self, inflight: &InflightTracker, deadline: Option<Duration>) -> DrainOutcome {
        self.draining.store(true, Ordering::SeqCst);
        info!(inflight = inflight.count(), ?deadline, "draining");

        let drained = match deadline {
            Some(deadline) => timeout(deadline, inflight.wait_drained()).await.is_ok(),
            None => {
                inflight.wait_drained().await;
                true
            }
        };

        if drained {
            info!("drained");
        } else {
            warn!(
                inflight = inflight.count(),
                "drain deadline expired with invocations in flight"
            );
        }

        DrainOutcome { drained }
    }

    /// Signals that the process should terminate.
    pub fn terminate(&self) {
        self.terminate.send_replace(true);
    }

    pub fn is_terminated(&self) -> bool {
        *self.terminate.borrow()
    }

    /// Resolves once [`terminate`](Self::terminate) has been called.
    pub async fn terminated(&self) {
        let mut rx = self.terminate.subscribe();
        let _ = rx.wait_for(|terminated| *terminated).await;
    }
}
