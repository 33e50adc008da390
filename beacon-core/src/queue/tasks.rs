//! Critical-tasks gate
//!
//! Setup work (plugin registration, `load`) enters the gate before it starts;
//! the queue waits for [`CriticalTasks::done`] before dispatching anything.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Counter of in-flight setup tasks. Clones share the same counter.
#[derive(Debug, Clone)]
pub struct CriticalTasks {
    pending: Arc<watch::Sender<usize>>,
}

/// Marks one task as in flight until dropped.
#[derive(Debug)]
#[must_use = "the task is released as soon as the guard is dropped"]
pub struct TaskGuard {
    pending: Arc<watch::Sender<usize>>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl Default for CriticalTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl CriticalTasks {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0usize);
        Self {
            pending: Arc::new(tx),
        }
    }

    /// Register a task now. The gate stays closed until the guard drops.
    pub fn enter(&self) -> TaskGuard {
        self.pending.send_modify(|n| *n += 1);
        TaskGuard {
            pending: self.pending.clone(),
        }
    }

    /// Run `task` inside the gate.
    ///
    /// The task is counted from the moment `run` is called, not from the
    /// first poll of the returned future.
    pub fn run<F>(&self, task: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        let guard = self.enter();
        async move {
            let output = task.await;
            drop(guard);
            output
        }
    }

    /// Resolves once no task is in flight.
    pub async fn done(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }
}
