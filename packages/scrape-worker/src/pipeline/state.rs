//! Process-wide worker state shared by the dispatcher and the lifecycle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Active task count, the urls those tasks are working on, and the
/// shutdown flag.
///
/// `active` and `in_flight` only move through [`ActiveTaskGuard`], so every
/// increment is paired with exactly one decrement, even if a task panics.
#[derive(Debug, Default)]
pub struct WorkerState {
    active: AtomicUsize,
    in_flight: Mutex<HashSet<String>>,
    shutting_down: AtomicBool,
    idle: Notify,
}

impl WorkerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count a task for `url` as in flight until the returned guard is
    /// dropped.
    ///
    /// Returns `None` if this process is already working on `url`.
    pub fn begin_task(self: &Arc<Self>, url: &str) -> Option<ActiveTaskGuard> {
        if !self.in_flight_urls().insert(url.to_string()) {
            return None;
        }
        self.active.fetch_add(1, Ordering::AcqRel);
        Some(ActiveTaskGuard {
            state: Arc::clone(self),
            url: url.to_string(),
        })
    }

    pub fn active_tasks(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Flip the shutdown flag. Returns true only for the first caller.
    pub fn begin_shutdown(&self) -> bool {
        !self.shutting_down.swap(true, Ordering::AcqRel)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Wait for the active count to reach zero.
    ///
    /// Returns false if `grace` elapsed with tasks still in flight.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                // Register before checking so a decrement in between is not missed
                notified.as_mut().enable();
                if self.active_tasks() == 0 {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(grace, drained).await.is_ok()
    }

    fn end_task(&self, url: &str) {
        self.in_flight_urls().remove(url);
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn in_flight_urls(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Marks one task as in flight for as long as it lives.
#[derive(Debug)]
pub struct ActiveTaskGuard {
    state: Arc<WorkerState>,
    url: String,
}

impl Drop for ActiveTaskGuard {
    fn drop(&mut self) {
        self.state.end_task(&self.url);
    }
}
