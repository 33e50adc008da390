//! Dispatch pipeline
//!
//! Runs one context through a registry snapshot, one plugin at a time, in
//! phase and registration order. Plugin failures are caught here and
//! attributed to the plugin that raised them; the queue decides what happens
//! next.

use crate::context::{Context, LogLevel};
use crate::error::{Error, Result};
use crate::plugin::RegisteredPlugin;
use std::time::Instant;

/// Run `ctx` through every plugin in `snapshot`.
///
/// Stops at the first failure. A plugin that halts the context (a source
/// middleware that never calls `next`) ends the pass successfully.
pub async fn run(ctx: &mut Context, snapshot: &[RegisteredPlugin]) -> Result<()> {
    let start = Instant::now();

    for registered in snapshot {
        let name = registered.name();
        tracing::trace!(
            plugin = name,
            phase = %registered.phase(),
            context_id = ctx.id(),
            "Running plugin"
        );

        if let Err(e) = registered.plugin().process(ctx).await {
            let error = attribute(name, e);
            ctx.log(LogLevel::Warn, error.to_string());
            tracing::debug!(
                plugin = name,
                context_id = ctx.id(),
                attempts = ctx.attempts(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Pipeline pass failed"
            );
            return Err(error);
        }

        if ctx.is_halted() {
            tracing::debug!(
                plugin = name,
                context_id = ctx.id(),
                "Pipeline pass halted by middleware"
            );
            return Ok(());
        }
    }

    tracing::debug!(
        context_id = ctx.id(),
        plugins = snapshot.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Pipeline pass completed"
    );
    Ok(())
}

/// Tag an error with the plugin that raised it.
fn attribute(plugin: &str, error: Error) -> Error {
    match error {
        Error::Cancelled { reason, retry, .. } => Error::Cancelled {
            plugin: plugin.to_string(),
            reason,
            retry,
        },
        other => Error::Dispatch {
            plugin: plugin.to_string(),
            source: Box::new(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventOptions, Properties};
    use crate::factory::EventFactory;
    use crate::plugin::middleware::{middleware_fn, MiddlewarePlugin};
    use crate::plugin::{Phase, Plugin, PluginRegistry};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    /// Appends its name to `properties.trail`, optionally failing instead.
    struct Recorder {
        name: String,
        phase: Phase,
        fail: Option<fn() -> Error>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn phase(&self) -> Phase {
            self.phase
        }

        async fn process(&self, ctx: &mut Context) -> Result<()> {
            self.calls.lock().unwrap().push(self.name.clone());
            if let Some(fail) = self.fail {
                return Err(fail());
            }
            let trail = ctx
                .event
                .properties
                .entry("trail".to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(items) = trail {
                items.push(Value::String(self.name.clone()));
            }
            Ok(())
        }
    }

    fn recorder(
        name: &str,
        phase: Phase,
        calls: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn Plugin> {
        Arc::new(Recorder {
            name: name.to_string(),
            phase,
            fail: None,
            calls: calls.clone(),
        })
    }

    fn unavailable() -> Error {
        Error::Plugin("503".to_string())
    }

    fn blocked() -> Error {
        Error::cancel("blocked", false)
    }

    fn context() -> Context {
        Context::new(
            EventFactory::new()
                .track("Ordered", Properties::new(), EventOptions::user("u"))
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_runs_in_phase_then_registration_order() {
        let registry = PluginRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sys = Context::system();
        for (name, phase) in [
            ("after", Phase::After),
            ("dest-1", Phase::Destination),
            ("enrich", Phase::Enrichment),
            ("dest-2", Phase::Destination),
            ("before", Phase::Before),
        ] {
            registry.register(recorder(name, phase, &calls), &sys).await.unwrap();
        }

        let mut ctx = context();
        run(&mut ctx, &registry.snapshot()).await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["before", "enrich", "dest-1", "dest-2", "after"]
        );
        assert_eq!(ctx.event.properties["trail"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_failure_is_attributed_and_stops_pass() {
        let registry = PluginRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sys = Context::system();
        registry
            .register(
                Arc::new(Recorder {
                    name: "Broken Destination".to_string(),
                    phase: Phase::Destination,
                    fail: Some(unavailable),
                    calls: calls.clone(),
                }),
                &sys,
            )
            .await
            .unwrap();
        registry.register(recorder("after", Phase::After, &calls), &sys).await.unwrap();

        let mut ctx = context();
        let err = run(&mut ctx, &registry.snapshot()).await.unwrap_err();

        assert!(matches!(&err, Error::Dispatch { plugin, .. } if plugin == "Broken Destination"));
        assert!(err.is_retryable());
        assert_eq!(*calls.lock().unwrap(), vec!["Broken Destination"]);
    }

    #[tokio::test]
    async fn test_cancel_keeps_retry_flag_and_gains_plugin_name() {
        let registry = PluginRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(
                Arc::new(Recorder {
                    name: "Gate".to_string(),
                    phase: Phase::Enrichment,
                    fail: Some(blocked),
                    calls,
                }),
                &Context::system(),
            )
            .await
            .unwrap();

        let mut ctx = context();
        let err = run(&mut ctx, &registry.snapshot()).await.unwrap_err();
        assert!(matches!(
            &err,
            Error::Cancelled { plugin, retry: false, .. } if plugin == "Gate"
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_halted_context_skips_remaining_plugins() {
        let registry = PluginRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sys = Context::system();
        registry
            .register(
                Arc::new(MiddlewarePlugin::new(Arc::new(middleware_fn(
                    "drop-all",
                    |_event, _next| async move { Ok(()) },
                )))),
                &sys,
            )
            .await
            .unwrap();
        registry.register(recorder("dest", Phase::Destination, &calls), &sys).await.unwrap();

        let mut ctx = context();
        run(&mut ctx, &registry.snapshot()).await.unwrap();

        assert!(ctx.is_halted());
        assert!(calls.lock().unwrap().is_empty());
    }
}
