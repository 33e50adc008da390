//! Event delivery queue
//!
//! Every dispatched context goes through the queue:
//!
//! ```text
//!   dispatch() ──► Queued ──► Dispatching ──► Settled (ok / failed_delivery)
//!                    ▲             │
//!                    └── Requeued ─┘  (retryable error, attempts left)
//! ```
//!
//! Each accepted push spawns one flush task. A flush waits for the
//! critical-tasks gate, pops the next entry, and runs it through the current
//! registry snapshot. Flushes run concurrently, so a plugin that never
//! resolves only holds up the entry it is working on.

mod priority;
mod tasks;

pub use priority::{PriorityQueue, QueueItem};
pub use tasks::{CriticalTasks, TaskGuard};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::pipeline;
use crate::plugin::PluginRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Default number of delivery attempts per event.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

impl QueueItem for Context {
    fn id(&self) -> &str {
        Context::id(self)
    }

    fn attempts(&self) -> u32 {
        Context::attempts(self)
    }

    fn set_attempts(&mut self, attempts: u32) {
        Context::set_attempts(self, attempts)
    }
}

/// Retrying delivery queue bound to a plugin registry.
pub struct EventQueue {
    queue: Mutex<PriorityQueue<Context>>,
    registry: Arc<PluginRegistry>,
    critical_tasks: CriticalTasks,
    waiting: Mutex<HashMap<String, oneshot::Sender<Context>>>,
}

impl EventQueue {
    pub fn new(max_attempts: u32) -> Arc<Self> {
        Self::with_registry(max_attempts, Arc::new(PluginRegistry::new()))
    }

    pub fn with_registry(max_attempts: u32, registry: Arc<PluginRegistry>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(PriorityQueue::new(max_attempts)),
            registry,
            critical_tasks: CriticalTasks::new(),
            waiting: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn critical_tasks(&self) -> &CriticalTasks {
        &self.critical_tasks
    }

    pub fn max_attempts(&self) -> u32 {
        self.lock_queue().max_attempts()
    }

    /// Number of entries waiting to be popped.
    pub fn len(&self) -> usize {
        self.lock_queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_queue().is_empty()
    }

    /// Deliver `ctx` and wait until it settles.
    ///
    /// The returned context has `failed_delivery` set when every attempt
    /// failed or a plugin cancelled it without retry. `Err` is only returned
    /// if the queue is torn down before the context settles.
    pub async fn dispatch(self: &Arc<Self>, ctx: Context) -> Result<Context> {
        let (tx, rx) = oneshot::channel();
        let id = ctx.id().to_string();
        self.lock_waiting().insert(id.clone(), tx);

        let pushed = self.lock_queue().push(ctx);
        if let Err(mut refused) = pushed {
            self.lock_waiting().remove(&id);
            refused.set_failed_delivery(Error::ExhaustedRetries {
                attempts: refused.attempts(),
                cause: Box::new(Error::Plugin("event was not accepted by the queue".to_string())),
            });
            return Ok(refused);
        }

        tracing::trace!(context_id = %id, "Queued event");
        self.spawn_flush();
        rx.await.map_err(|_| Error::QueueClosed)
    }

    fn spawn_flush(self: &Arc<Self>) {
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.flush().await });
    }

    async fn flush(self: Arc<Self>) {
        self.critical_tasks.done().await;

        let popped = self.lock_queue().pop();
        let Some(mut ctx) = popped else {
            return;
        };

        let snapshot = self.registry.snapshot();
        match pipeline::run(&mut ctx, &snapshot).await {
            Ok(()) => self.settle(ctx),
            Err(error) => self.handle_failure(ctx, error),
        }
    }

    fn handle_failure(self: &Arc<Self>, mut ctx: Context, error: Error) {
        if !error.is_retryable() {
            tracing::warn!(
                context_id = ctx.id(),
                plugin = error.plugin().unwrap_or("unknown"),
                error = %error,
                "Event cancelled without retry"
            );
            ctx.set_failed_delivery(error);
            self.settle(ctx);
            return;
        }

        let attempts = ctx.attempts();
        let pushed = self.lock_queue().push(ctx);
        match pushed {
            Ok(()) => {
                tracing::debug!(attempts, error = %error, "Requeued event after failure");
                self.spawn_flush();
            }
            Err(mut ctx) => {
                tracing::warn!(
                    context_id = ctx.id(),
                    attempts,
                    error = %error,
                    "Giving up on event"
                );
                ctx.set_failed_delivery(Error::ExhaustedRetries {
                    attempts,
                    cause: Box::new(error),
                });
                self.settle(ctx);
            }
        }
    }

    fn settle(&self, ctx: Context) {
        let waiter = self.lock_waiting().remove(ctx.id());
        match waiter {
            Some(tx) => {
                // The dispatcher may have stopped waiting; nothing left to do.
                let _ = tx.send(ctx);
            }
            None => tracing::warn!(context_id = ctx.id(), "Settled event had no waiter"),
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, PriorityQueue<Context>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_waiting(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Context>>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
