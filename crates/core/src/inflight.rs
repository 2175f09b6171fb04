//! Inflight invocation tracking.

use tokio::sync::watch;

/// Counter value at or below which the daemon counts as drained.
pub const DRAIN_THRESHOLD: i64 = 0;

/// Counts invocations that have started but not yet settled.
///
/// Waiters are woken on every change, so [`wait_drained`](Self::wait_drained)
/// returns as soon as the last invocation settles.
pub struct InflightTracker {
    count: watch::Sender<i64>,
}

impl Default for InflightTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InflightTracker {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    /// Marks the start of an invocation.
    ///
    /// The returned guard marks its end when dropped, however the invocation
    /// settles.
    pub fn begin(&self) -> InflightGuard<'_> {
        self.count.send_modify(|n| *n += 1);
        InflightGuard { tracker: self }
    }

    pub fn count(&self) -> i64 {
        *self.count.borrow()
    }

    pub fn is_drained(&self) -> bool {
        self.count() <= DRAIN_THRESHOLD
    }

    /// Waits until no invocation is in flight.
    pub async fn wait_drained(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|n| *n <= DRAIN_THRESHOLD).await;
    }
}

#[must_use = "the invocation is counted as finished as soon as the guard is dropped"]
pub struct InflightGuard<'a> {
    tracker: &'a InflightTracker,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.tracker.count.send_modify(|n| *n -= 1);
    }
}
