//! Source middleware
//!
//! A source middleware sees every event before any other plugin. It receives
//! a copy of the event and a [`Next`] handle; the event only continues down
//! the pipeline once `next.call(event)` is invoked. Dropping `Next` without
//! calling it halts that one event: it settles without reaching enrichment or
//! destination plugins, and is neither retried nor reported as an error.
//! Holding on to `Next` keeps only that event waiting.

use super::{Phase, Plugin};
use crate::context::Context;
use crate::error::Result;
use crate::event::Event;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Continuation handle passed to a [`SourceMiddleware`].
#[derive(Debug)]
pub struct Next {
    tx: oneshot::Sender<Event>,
}

impl Next {
    /// Continue the pipeline with `event`.
    pub fn call(self, event: Event) {
        // The receiver only disappears when the pass itself was dropped.
        let _ = self.tx.send(event);
    }
}

/// Middleware that runs at the source, ahead of every other plugin.
#[async_trait]
pub trait SourceMiddleware: Send + Sync {
    fn name(&self) -> &str {
        "anonymous"
    }

    async fn handle(&self, event: Event, next: Next) -> Result<()>;
}

/// Adapter turning an async closure into a [`SourceMiddleware`].
pub struct MiddlewareFn<F> {
    name: String,
    f: F,
}

/// Wrap `f` as a named source middleware.
pub fn middleware_fn<F, Fut>(name: impl Into<String>, f: F) -> MiddlewareFn<F>
where
    F: Fn(Event, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    MiddlewareFn {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> SourceMiddleware for MiddlewareFn<F>
where
    F: Fn(Event, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: Event, next: Next) -> Result<()> {
        (self.f)(event, next).await
    }
}

/// `before`-phase plugin that runs a source middleware.
pub struct MiddlewarePlugin {
    name: String,
    middleware: Arc<dyn SourceMiddleware>,
}

impl MiddlewarePlugin {
    pub fn new(middleware: Arc<dyn SourceMiddleware>) -> Self {
        Self {
            name: format!("Source Middleware {}", middleware.name()),
            middleware,
        }
    }
}

#[async_trait]
impl Plugin for MiddlewarePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn phase(&self) -> Phase {
        Phase::Before
    }

    async fn process(&self, ctx: &mut Context) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.middleware.handle(ctx.event.clone(), Next { tx }).await?;

        match rx.await {
            Ok(event) => ctx.event = event,
            Err(_) => ctx.halt(&self.name),
        }
        Ok(())
    }
}
