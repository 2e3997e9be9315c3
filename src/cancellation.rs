//! Cooperative cancellation handle.
//!
//! A lightweight `Arc<AtomicBool>` plus `Notify`, grounded in the teacher's
//! preference for small cooperative flags over pulling in `tokio-util` for
//! a single boolean. The step loop polls this between steps, never mid-step;
//! agent and tool adapters receive the same handle and may honor it inside
//! a single dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct CancellationHandle {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called. Adapters that support
    /// interruption may race this against their own work.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let handle = CancellationHandle::new();
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn cancel_is_observed_by_clones() {
        let handle = CancellationHandle::new();
        let clone = handle.clone();
        handle.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let handle = CancellationHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        handle.cancel();
        task.await.unwrap();
    }
}
