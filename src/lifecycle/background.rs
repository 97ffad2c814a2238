//! Tracked background work.
//!
//! Handlers hand slow side effects (notification delivery and the like) to
//! [`BackgroundTasks`] instead of holding the response open. The tracker
//! counts every task from the moment it is submitted until it finishes or
//! panics, and shutdown waits for that count to reach zero.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::Notify;

use crate::observability::metrics;

#[derive(Default)]
struct Inner {
    active: AtomicUsize,
    idle: Notify,
}

/// Tracker for fire-and-forget work that must still finish before exit.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    inner: Arc<Inner>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` on its own tokio task.
    ///
    /// The task is counted before it is spawned. A panic inside it is caught
    /// and logged; the caller and sibling tasks are unaffected.
    pub fn run<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.register();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
                report_panic(name, panic);
            }
        });
    }

    /// Run a blocking closure on the blocking thread pool, tracked the same
    /// way as [`run`](Self::run).
    pub fn run_blocking<F>(&self, name: &'static str, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.register();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(task)) {
                report_panic(name, panic);
            }
        });
    }

    /// Number of tasks submitted and not yet finished.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Resolve once no tracked task is running. No deadline.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register interest before reading the counter so a decrement
            // between the check and the await still wakes us.
            notified.as_mut().enable();

            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn register(&self) -> TaskGuard {
        let active = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_task_started(active);
        TaskGuard {
            inner: self.inner.clone(),
        }
    }
}

/// Decrements the live-task count when dropped, on every exit path.
struct TaskGuard {
    inner: Arc<Inner>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let remaining = self.inner.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_task_finished(remaining);
        if remaining == 0 {
            self.inner.idle.notify_waiters();
        }
    }
}

fn report_panic(name: &'static str, panic: Box<dyn Any + Send>) {
    let message = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");

    metrics::record_task_panic();
    tracing::error!(task = name, error = %message, "Background task panicked");
}
