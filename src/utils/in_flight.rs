//! In-flight call tracking & graceful draining.
//!
//! Every forwarded call (buffered attempt loop or open stream) holds an
//! [`InFlightGuard`]. Closing the tracker refuses new guards, waits for the
//! outstanding ones to drop (bounded by a timeout) and then cancels whatever
//! is still running through a shared [`CancellationToken`].
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Shared {
    active: AtomicUsize,
    closed: AtomicBool,
    idle: Notify,
}

/// Counts in-flight calls and coordinates shutdown. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct InFlightTracker {
    shared: Arc<Shared>,
    abort: CancellationToken,
}

/// Marks one call as in flight until dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    shared: Arc<Shared>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.shared.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.idle.notify_waiters();
        }
    }
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call. Returns `None` once the tracker is closed.
    pub fn track(&self) -> Option<InFlightGuard> {
        self.shared.active.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard {
            shared: self.shared.clone(),
        };
        if self.is_closed() {
            // Dropping the guard undoes the increment and wakes a pending drain.
            drop(guard);
            return None;
        }
        Some(guard)
    }

    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop admitting new calls. Returns `false` if the tracker was already closed.
    pub fn begin_close(&self) -> bool {
        self.shared
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Wait until no call is in flight. Returns `false` if `timeout` elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait_idle = async {
            loop {
                let notified = self.shared.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.active_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait_idle).await.is_ok()
    }

    /// Cancel every call still in flight.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Resolves once [`InFlightTracker::abort`] has been called.
    pub fn aborted(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.abort.cancelled()
    }

    /// Owned handle for tasks that outlive a borrow of the tracker (open streams).
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }
}
