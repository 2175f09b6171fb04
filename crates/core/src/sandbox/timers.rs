use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Timer primitives exposed to a sandbox.
///
/// Every scheduled callback runs as its own tokio task; cancelling a timer
/// aborts that task. Must be used from within a tokio runtime.
#[derive(Clone, Default)]
pub struct Timers {
    inner: Arc<TimersInner>,
}

#[derive(Default)]
struct TimersInner {
    next_id: AtomicU64,
    pending: Mutex<HashMap<TimerId, AbortHandle>>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `callback` once `delay` has elapsed.
    pub fn set_timeout<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.schedule(async move {
            tokio::time::sleep(delay).await;
            callback.await;
        })
    }

    pub fn clear_timeout(&self, id: TimerId) -> bool {
        let handle = self.inner.pending.lock().unwrap().remove(&id);
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Runs `callback` after the scheduler has had one chance to run other
    /// work.
    pub fn set_immediate<F>(&self, callback: F) -> TimerId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.schedule(async move {
            tokio::task::yield_now().await;
            callback.await;
        })
    }

    pub fn clear_immediate(&self, id: TimerId) -> bool {
        self.clear_timeout(id)
    }

    /// Number of timers that have neither fired nor been cleared.
    pub fn pending(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }

    fn schedule<F>(&self, task: F) -> TimerId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = TimerId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let inner = Arc::clone(&self.inner);

        // Holding the lock across spawn keeps the task from removing its
        // entry before it has been inserted.
        let mut pending = self.inner.pending.lock().unwrap();
        let handle = tokio::spawn(async move {
            let _settled = Settled { inner, id };
            task.await;
        });
        pending.insert(id, handle.abort_handle());

        id
    }
}

/// Removes a timer's pending entry when its task ends, including when the
/// callback panics.
struct Settled {
    inner: Arc<TimersInner>,
    id: TimerId,
}

impl Drop for Settled {
    fn drop(&mut self) {
        // Unwinding from a poisoned lock here would abort the process.
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

impl fmt::Debug for Timers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timers")
            .field("pending", &self.pending())
            .finish()
    }
}
