//! Ordered plugin storage with atomic snapshots
//!
//! The registry keeps its plugins in an immutable `Arc<Vec<_>>` that is
//! swapped under a lock on every mutation. A pipeline pass clones the `Arc`
//! once and iterates that snapshot, so register/deregister never affect a
//! pass that is already running.

use super::{Phase, Plugin};
use crate::context::Context;
use crate::error::{Error, Result};
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// A loaded plugin together with its registration sequence number.
#[derive(Clone)]
pub struct RegisteredPlugin {
    seq: u64,
    plugin: Arc<dyn Plugin>,
}

impl RegisteredPlugin {
    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    pub fn phase(&self) -> Phase {
        self.plugin.phase()
    }

    /// Position in registration order (assigned before `load` runs).
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl std::fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("name", &self.name())
            .field("phase", &self.phase())
            .field("seq", &self.seq)
            .finish()
    }
}

/// Registry of active plugins, ordered by (phase, registration order).
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<Arc<Vec<RegisteredPlugin>>>,
    next_seq: AtomicU64,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current plugin list. Later mutations do not affect the returned value.
    pub fn snapshot(&self) -> Arc<Vec<RegisteredPlugin>> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Load a plugin and add it to the registry once `load` resolves.
    pub async fn register(&self, plugin: Arc<dyn Plugin>, ctx: &Context) -> Result<()> {
        let seq = self.reserve_seq();
        self.load_and_insert(seq, plugin, ctx).await
    }

    /// Load several plugins concurrently.
    ///
    /// Registration order follows the input order regardless of which load
    /// finishes first. A failed load is reported in its slot of the returned
    /// vector and does not prevent the others from registering.
    pub async fn register_all(
        &self,
        plugins: Vec<Arc<dyn Plugin>>,
        ctx: &Context,
    ) -> Vec<Result<()>> {
        let loads = plugins.into_iter().map(|plugin| {
            let seq = self.reserve_seq();
            self.load_and_insert(seq, plugin, ctx)
        });
        join_all(loads.collect::<Vec<_>>()).await
    }

    /// Remove the first plugin called `name` and run its `unload` hook.
    ///
    /// Returns `Ok(false)` when no such plugin is registered.
    pub async fn deregister(&self, name: &str, ctx: &Context) -> Result<bool> {
        let removed = {
            let mut guard = self.plugins.write().unwrap_or_else(PoisonError::into_inner);
            match guard.iter().position(|p| p.name() == name) {
                Some(index) => {
                    let mut next = Vec::clone(&guard);
                    let removed = next.remove(index);
                    *guard = Arc::new(next);
                    Some(removed)
                }
                None => None,
            }
        };

        let Some(removed) = removed else {
            tracing::warn!(plugin = name, "plugin not found, nothing to deregister");
            return Ok(false);
        };

        removed
            .plugin
            .unload(ctx)
            .await
            .map_err(|e| Error::Plugin(format!("failed to unload {}: {}", name, e)))?;

        tracing::info!(plugin = name, "Deregistered plugin");
        Ok(true)
    }

    /// Get list of registered plugin names, in execution order.
    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|p| p.name().to_string()).collect()
    }

    /// Check if a plugin is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().iter().any(|p| p.name() == name)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn reserve_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    async fn load_and_insert(&self, seq: u64, plugin: Arc<dyn Plugin>, ctx: &Context) -> Result<()> {
        if let Err(e) = plugin.load(ctx).await {
            tracing::error!(plugin = plugin.name(), error = %e, "Plugin failed to load");
            return Err(Error::PluginLoad {
                plugin: plugin.name().to_string(),
                message: e.to_string(),
            });
        }

        tracing::info!(
            plugin = plugin.name(),
            phase = %plugin.phase(),
            version = plugin.version(),
            "Registered plugin"
        );

        let mut guard = self.plugins.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::clone(&guard);
        next.push(RegisteredPlugin { seq, plugin });
        next.sort_by_key(|p| (p.phase(), p.seq));
        *guard = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct TestPlugin {
        name: String,
        phase: Phase,
        load_delay_ms: u64,
        fail_load: bool,
        unloads: Arc<AtomicUsize>,
    }

    impl TestPlugin {
        fn new(name: &str, phase: Phase) -> Self {
            Self {
                name: name.to_string(),
                phase,
                load_delay_ms: 0,
                fail_load: false,
                unloads: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn slow(mut self, ms: u64) -> Self {
            self.load_delay_ms = ms;
            self
        }

        fn failing(mut self) -> Self {
            self.fail_load = true;
            self
        }
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn phase(&self) -> Phase {
            self.phase
        }

        async fn load(&self, _ctx: &Context) -> Result<()> {
            if self.load_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.load_delay_ms)).await;
            }
            if self.fail_load {
                return Err(Error::Plugin("script failed to load".to_string()));
            }
            Ok(())
        }

        async fn unload(&self, _ctx: &Context) -> Result<()> {
            self.unloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn process(&self, _ctx: &mut Context) -> Result<()> {
            Ok(())
        }
    }

    fn arc(p: TestPlugin) -> Arc<dyn Plugin> {
        Arc::new(p)
    }

    #[tokio::test]
    async fn test_orders_by_phase_then_registration() {
        let registry = PluginRegistry::new();
        let ctx = Context::system();

        registry.register(arc(TestPlugin::new("dest-a", Phase::Destination)), &ctx).await.unwrap();
        registry.register(arc(TestPlugin::new("after", Phase::After)), &ctx).await.unwrap();
        registry.register(arc(TestPlugin::new("before", Phase::Before)), &ctx).await.unwrap();
        registry.register(arc(TestPlugin::new("dest-b", Phase::Destination)), &ctx).await.unwrap();
        registry.register(arc(TestPlugin::new("enrich", Phase::Enrichment)), &ctx).await.unwrap();

        assert_eq!(
            registry.names(),
            vec!["before", "enrich", "dest-a", "dest-b", "after"]
        );
    }

    #[tokio::test]
    async fn test_register_all_keeps_input_order_despite_load_timing() {
        let registry = PluginRegistry::new();
        let ctx = Context::system();

        let results = registry
            .register_all(
                vec![
                    arc(TestPlugin::new("slow", Phase::Destination).slow(30)),
                    arc(TestPlugin::new("fast", Phase::Destination)),
                ],
                &ctx,
            )
            .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(registry.names(), vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn test_failed_load_does_not_block_others() {
        let registry = PluginRegistry::new();
        let ctx = Context::system();

        let results = registry
            .register_all(
                vec![
                    arc(TestPlugin::new("broken", Phase::Destination).failing()),
                    arc(TestPlugin::new("healthy", Phase::Destination)),
                ],
                &ctx,
            )
            .await;

        assert!(matches!(
            &results[0],
            Err(Error::PluginLoad { plugin, .. }) if plugin == "broken"
        ));
        assert!(results[1].is_ok());
        assert!(!registry.contains("broken"));
        assert!(registry.contains("healthy"));
    }

    #[tokio::test]
    async fn test_plugin_inactive_until_load_resolves() {
        let registry = Arc::new(PluginRegistry::new());
        let plugin = arc(TestPlugin::new("slow", Phase::Destination).slow(50));

        let task = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.register(plugin, &Context::system()).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!registry.contains("slow"));

        task.await.unwrap().unwrap();
        assert!(registry.contains("slow"));
    }

    #[tokio::test]
    async fn test_deregister_is_idempotent() {
        let registry = PluginRegistry::new();
        let ctx = Context::system();
        let plugin = TestPlugin::new("dest", Phase::Destination);
        let unloads = plugin.unloads.clone();
        registry.register(arc(plugin), &ctx).await.unwrap();
        registry.register(arc(TestPlugin::new("other", Phase::After)), &ctx).await.unwrap();

        assert!(registry.deregister("dest", &ctx).await.unwrap());
        let after_first = registry.names();

        assert!(!registry.deregister("dest", &ctx).await.unwrap());
        assert_eq!(registry.names(), after_first);
        assert_eq!(after_first, vec!["other"]);
        assert_eq!(unloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_mutation() {
        let registry = PluginRegistry::new();
        let ctx = Context::system();
        registry.register(arc(TestPlugin::new("a", Phase::Destination)), &ctx).await.unwrap();

        let snapshot = registry.snapshot();
        registry.deregister("a", &ctx).await.unwrap();
        registry.register(arc(TestPlugin::new("b", Phase::Destination)), &ctx).await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name(), "a");
        assert_eq!(registry.names(), vec!["b"]);
    }
}
