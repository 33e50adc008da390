//! The analytics instance
//!
//! [`Analytics`] is the entry point applications talk to. Tracking calls
//! build an event, push it through the [`EventQueue`], and report the outcome
//! on the instance's [`Emitter`] and the optional per-call callback.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use beacon_core::{Analytics, AnalyticsConfig, InitOptions, TrackParams};
//!
//! let analytics = Arc::new(Analytics::new(AnalyticsConfig::default()));
//! analytics.add_destination("Webhook", |name, settings| build_webhook(name, settings));
//! analytics.load("wk_123", InitOptions::default()).await?;
//!
//! let ctx = analytics.track(TrackParams::new("Signed Up").options(EventOptions::user("u-1"))).await?;
//! ```

use crate::config::AnalyticsConfig;
use crate::context::Context;
use crate::emitter::{Channel, Emitted, EmittedError, Emitter, ErrorCode, ListenerId};
use crate::error::{Error, Result};
use crate::event::{Event, EventOptions, Properties};
use crate::factory::EventFactory;
use crate::plugin::{MiddlewarePlugin, Plugin, SourceMiddleware};
use crate::queue::EventQueue;
use crate::settings::{CdnClient, CdnSettings, InitOptions, LoadSettings};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Halt marker on contexts tracked after [`Analytics::disable`].
pub const DISABLED: &str = "Analytics Disabled";

/// Called once a tracked event settles, with the error if delivery failed.
pub type Callback = Box<dyn FnOnce(&Context, Option<&Error>) + Send>;

/// The `load` entry point. Swappable so wrappers can intercept it.
pub type LoadFn =
    Arc<dyn Fn(LoadSettings, InitOptions) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Builds a destination plugin from its CDN settings descriptor.
pub type DestinationFactory =
    Arc<dyn Fn(&str, &Value) -> Result<Arc<dyn Plugin>> + Send + Sync>;

// ============================================
// Tracking parameters
// ============================================

/// Builder methods shared by every parameter struct.
macro_rules! call_options {
    ($params:ident) => {
        impl $params {
            pub fn options(mut self, options: EventOptions) -> Self {
                self.options = options;
                self
            }

            pub fn callback<F>(mut self, callback: F) -> Self
            where
                F: FnOnce(&Context, Option<&Error>) + Send + 'static,
            {
                self.callback = Some(Box::new(callback));
                self
            }
        }
    };
}

#[derive(Default)]
pub struct TrackParams {
    pub event: String,
    pub properties: Properties,
    pub options: EventOptions,
    pub callback: Option<Callback>,
}

impl TrackParams {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Default::default()
        }
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }
}

call_options!(TrackParams);

#[derive(Default)]
pub struct IdentifyParams {
    /// Falls back to `options.user_id`/`options.anonymous_id` when `None`
    pub user_id: Option<String>,
    pub traits: Properties,
    pub options: EventOptions,
    pub callback: Option<Callback>,
}

impl IdentifyParams {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn traits(mut self, traits: Properties) -> Self {
        self.traits = traits;
        self
    }
}

call_options!(IdentifyParams);

/// Parameters for `page` and `screen`.
#[derive(Default)]
pub struct PageParams {
    pub category: Option<String>,
    pub name: Option<String>,
    pub properties: Properties,
    pub options: EventOptions,
    pub callback: Option<Callback>,
}

impl PageParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }
}

call_options!(PageParams);

#[derive(Default)]
pub struct GroupParams {
    pub group_id: String,
    pub traits: Properties,
    pub options: EventOptions,
    pub callback: Option<Callback>,
}

impl GroupParams {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..Default::default()
        }
    }

    pub fn traits(mut self, traits: Properties) -> Self {
        self.traits = traits;
        self
    }
}

call_options!(GroupParams);

#[derive(Default)]
pub struct AliasParams {
    pub user_id: String,
    pub previous_id: String,
    pub options: EventOptions,
    pub callback: Option<Callback>,
}

impl AliasParams {
    pub fn new(user_id: impl Into<String>, previous_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            previous_id: previous_id.into(),
            ..Default::default()
        }
    }
}

call_options!(AliasParams);

// ============================================
// Instance seam used by wrappers
// ============================================

/// The parts of an analytics instance that wrappers rely on.
#[async_trait]
pub trait AnyAnalytics: Send + Sync + 'static {
    async fn add_source_middleware(&self, middleware: Arc<dyn SourceMiddleware>) -> Result<()>;

    async fn track(&self, params: TrackParams) -> Result<Context>;

    /// Anonymous id used for events the instance emits on its own behalf.
    fn anonymous_id(&self) -> String;

    fn loader(&self) -> LoadFn;

    fn set_loader(&self, loader: LoadFn);

    fn is_loaded(&self) -> bool;

    /// Stop all event delivery for the lifetime of the instance.
    fn disable(&self);

    async fn load(&self, settings: LoadSettings, options: InitOptions) -> Result<()>;
}

// ============================================
// Analytics
// ============================================

/// An analytics instance: event factory, plugin registry, delivery queue and
/// lifecycle emitter.
pub struct Analytics {
    inner: Arc<Inner>,
}

struct Inner {
    config: AnalyticsConfig,
    factory: EventFactory,
    queue: Arc<EventQueue>,
    emitter: Emitter,
    catalog: RwLock<HashMap<String, DestinationFactory>>,
    loader: RwLock<LoadFn>,
    loaded: AtomicBool,
    disabled: AtomicBool,
    anonymous_id: String,
}

impl Analytics {
    pub fn new(config: AnalyticsConfig) -> Self {
        let queue = EventQueue::new(config.max_attempts);
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
            config,
            factory: EventFactory::new(),
            queue,
            emitter: Emitter::new(),
            catalog: RwLock::new(HashMap::new()),
            loader: RwLock::new(default_loader(weak.clone())),
            loaded: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            anonymous_id: uuid::Uuid::new_v4().to_string(),
        });
        Self { inner }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.inner.config
    }

    pub fn emitter(&self) -> &Emitter {
        &self.inner.emitter
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.inner.queue
    }

    pub fn on<F>(&self, channel: Channel, listener: F) -> ListenerId
    where
        F: Fn(&Emitted) + Send + Sync + 'static,
    {
        self.inner.emitter.on(channel, listener)
    }

    pub fn once<F>(&self, channel: Channel, listener: F) -> ListenerId
    where
        F: Fn(&Emitted) + Send + Sync + 'static,
    {
        self.inner.emitter.once(channel, listener)
    }

    pub fn off(&self, channel: Channel, id: ListenerId) -> bool {
        self.inner.emitter.off(channel, id)
    }

    /// Names of active plugins, in execution order.
    pub fn plugin_names(&self) -> Vec<String> {
        self.inner.queue.registry().names()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.load(Ordering::SeqCst)
    }

    /// Stop delivering events. Irreversible.
    ///
    /// Later tracking calls return a context halted by
    /// [`DISABLED`] without running any plugin, emitting anything or
    /// invoking their callback.
    pub fn disable(&self) {
        if !self.inner.disabled.swap(true, Ordering::SeqCst) {
            tracing::info!("Analytics disabled, events will not be dispatched");
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::SeqCst)
    }

    // ---- Tracking ----

    pub async fn track(&self, params: TrackParams) -> Result<Context> {
        let TrackParams {
            event,
            properties,
            options,
            callback,
        } = params;
        let event = self.inner.factory.track(&event, properties, options)?;
        self.inner.dispatch(event, callback).await
    }

    pub async fn identify(&self, params: IdentifyParams) -> Result<Context> {
        let IdentifyParams {
            user_id,
            traits,
            options,
            callback,
        } = params;
        let event = self
            .inner
            .factory
            .identify(user_id.as_deref(), traits, options)?;
        self.inner.dispatch(event, callback).await
    }

    pub async fn page(&self, params: PageParams) -> Result<Context> {
        let PageParams {
            category,
            name,
            properties,
            options,
            callback,
        } = params;
        let event = self.inner.factory.page(
            category.as_deref(),
            name.as_deref(),
            properties,
            options,
        )?;
        self.inner.dispatch(event, callback).await
    }

    pub async fn screen(&self, params: PageParams) -> Result<Context> {
        let PageParams {
            category,
            name,
            properties,
            options,
            callback,
        } = params;
        let event = self.inner.factory.screen(
            category.as_deref(),
            name.as_deref(),
            properties,
            options,
        )?;
        self.inner.dispatch(event, callback).await
    }

    pub async fn group(&self, params: GroupParams) -> Result<Context> {
        let GroupParams {
            group_id,
            traits,
            options,
            callback,
        } = params;
        let event = self.inner.factory.group(&group_id, traits, options)?;
        self.inner.dispatch(event, callback).await
    }

    pub async fn alias(&self, params: AliasParams) -> Result<Context> {
        let AliasParams {
            user_id,
            previous_id,
            options,
            callback,
        } = params;
        let event = self.inner.factory.alias(&user_id, &previous_id, options)?;
        self.inner.dispatch(event, callback).await
    }

    // ---- Plugins ----

    /// Register plugins. Events wait for the registration to finish.
    ///
    /// The registration counts against the critical-tasks gate from the
    /// moment this is called. Every plugin that loads is registered even if
    /// another fails; the first load error is returned.
    pub fn register(
        &self,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let guard = self.inner.queue.critical_tasks().enter();
        let inner = self.inner.clone();
        async move {
            let result = inner.register_plugins(plugins).await;
            drop(guard);
            result
        }
    }

    /// Remove plugins by name. Unknown names are skipped with a warning.
    pub async fn deregister<I, S>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ctx = Context::system();
        let mut removed = Vec::new();
        for name in names {
            let name = name.as_ref();
            if self.inner.queue.registry().deregister(name, &ctx).await? {
                removed.push(name.to_string());
            }
        }
        if !removed.is_empty() {
            self.inner.emitter.emit(&Emitted::Deregister(removed));
        }
        Ok(())
    }

    /// Run `middleware` on every event before any other plugin.
    pub async fn add_source_middleware(&self, middleware: Arc<dyn SourceMiddleware>) -> Result<()> {
        self.register(vec![Arc::new(MiddlewarePlugin::new(middleware))])
            .await
    }

    /// Make a destination available to `load()` under integration `name`.
    pub fn add_destination<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&str, &Value) -> Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.inner
            .catalog
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(factory));
    }

    // ---- Loading ----

    /// Load CDN settings and register the enabled destinations.
    ///
    /// Runs whatever loader is installed at call time (see
    /// [`set_loader`](Self::set_loader)). Counts against the critical-tasks
    /// gate from the moment it is called.
    pub fn load(
        &self,
        settings: impl Into<LoadSettings>,
        options: InitOptions,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let guard = self.inner.queue.critical_tasks().enter();
        let loader = self.loader();
        let settings = settings.into();
        async move {
            let result = loader(settings, options).await;
            drop(guard);
            result
        }
    }

    /// Resolves once every pending registration and load has finished.
    pub async fn ready(&self) {
        self.inner.queue.critical_tasks().done().await;
    }

    pub fn loader(&self) -> LoadFn {
        self.inner
            .loader
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_loader(&self, loader: LoadFn) {
        *self
            .inner
            .loader
            .write()
            .unwrap_or_else(PoisonError::into_inner) = loader;
    }
}

impl Default for Analytics {
    fn default() -> Self {
        Self::new(AnalyticsConfig::default())
    }
}

#[async_trait]
impl AnyAnalytics for Analytics {
    async fn add_source_middleware(&self, middleware: Arc<dyn SourceMiddleware>) -> Result<()> {
        Analytics::add_source_middleware(self, middleware).await
    }

    async fn track(&self, params: TrackParams) -> Result<Context> {
        Analytics::track(self, params).await
    }

    fn anonymous_id(&self) -> String {
        self.inner.anonymous_id.clone()
    }

    fn loader(&self) -> LoadFn {
        Analytics::loader(self)
    }

    fn set_loader(&self, loader: LoadFn) {
        Analytics::set_loader(self, loader)
    }

    fn is_loaded(&self) -> bool {
        Analytics::is_loaded(self)
    }

    fn disable(&self) {
        Analytics::disable(self)
    }

    async fn load(&self, settings: LoadSettings, options: InitOptions) -> Result<()> {
        Analytics::load(self, settings, options).await
    }
}

fn default_loader(inner: Weak<Inner>) -> LoadFn {
    Arc::new(move |settings: LoadSettings, options: InitOptions| {
        let inner = inner.clone();
        async move {
            let inner = inner
                .upgrade()
                .ok_or_else(|| Error::Config("analytics instance was dropped".to_string()))?;
            inner.load_destinations(settings, options).await
        }
        .boxed()
    })
}

impl Inner {
    /// Run one event through the queue and report how it settled.
    async fn dispatch(&self, event: Event, callback: Option<Callback>) -> Result<Context> {
        if self.disabled.load(Ordering::SeqCst) {
            let mut ctx = Context::new(event);
            ctx.halt(DISABLED);
            return Ok(ctx);
        }

        let ctx = self.queue.dispatch(Context::new(event)).await?;

        match ctx.failed_delivery() {
            Some(reason) => self.emitter.emit(&Emitted::Error(EmittedError {
                code: ErrorCode::DeliveryFailure,
                reason: reason.clone(),
                ctx: Some(ctx.clone()),
            })),
            None if ctx.is_halted() => {}
            None => self.emitter.emit(&Emitted::Dispatched(ctx.clone())),
        }

        if let Some(callback) = callback {
            callback(&ctx, ctx.failed_delivery().map(|e| &**e));
        }
        Ok(ctx)
    }

    async fn register_plugins(&self, plugins: Vec<Arc<dyn Plugin>>) -> Result<()> {
        if plugins.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = plugins.iter().map(|p| p.name().to_string()).collect();
        let ctx = Context::system();
        let results = self.queue.registry().register_all(plugins, &ctx).await;

        let mut registered = Vec::new();
        let mut first_error = None;
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(()) => registered.push(name),
                Err(e) => {
                    let reason = Arc::new(e);
                    self.emitter.emit(&Emitted::Error(EmittedError {
                        code: ErrorCode::PluginLoad,
                        reason: reason.clone(),
                        ctx: None,
                    }));
                    first_error.get_or_insert(reason);
                }
            }
        }

        if !registered.is_empty() {
            self.emitter.emit(&Emitted::Register(registered));
        }

        match first_error {
            Some(reason) => Err(Error::PluginLoad {
                plugin: reason.plugin().unwrap_or("unknown").to_string(),
                message: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn load_destinations(&self, settings: LoadSettings, options: InitOptions) -> Result<()> {
        if self.loaded.swap(true, Ordering::SeqCst) {
            tracing::warn!("Analytics already loaded, ignoring load()");
            return Ok(());
        }

        let cdn_settings = match self.resolve_cdn_settings(&settings).await {
            Ok(cdn_settings) => cdn_settings,
            Err(e) => {
                self.loaded.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let cdn_settings = options.apply_cdn_settings(cdn_settings);

        let destinations = self.build_destinations(&cdn_settings);
        tracing::info!(
            write_key = %settings.write_key,
            integrations = cdn_settings.integrations.len(),
            destinations = destinations.len(),
            "Loading destinations"
        );
        if let Err(e) = self.register_plugins(destinations).await {
            tracing::warn!(error = %e, "Some destinations failed to load");
        }

        self.emitter.emit(&Emitted::Initialize(LoadSettings {
            cdn_settings: Some(cdn_settings),
            ..settings
        }));
        Ok(())
    }

    async fn resolve_cdn_settings(&self, settings: &LoadSettings) -> Result<CdnSettings> {
        if let Some(cdn_settings) = &settings.cdn_settings {
            return Ok(cdn_settings.clone());
        }
        let cdn_url = settings
            .cdn_url
            .as_deref()
            .or(self.config.cdn_url.as_deref());
        CdnClient::new(cdn_url, self.config.timeout_secs)?
            .fetch(&settings.write_key)
            .await
    }

    /// Instantiate catalog destinations for every enabled integration.
    fn build_destinations(&self, cdn_settings: &CdnSettings) -> Vec<Arc<dyn Plugin>> {
        let catalog = self
            .catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut destinations = Vec::new();

        for (name, descriptor) in cdn_settings.enabled_integrations() {
            let Some(factory) = catalog.get(name) else {
                tracing::debug!(integration = %name, "No destination available for integration");
                continue;
            };
            match factory(name, descriptor) {
                Ok(plugin) => destinations.push(plugin),
                Err(e) => {
                    tracing::warn!(integration = %name, error = %e, "Failed to build destination");
                    self.emitter.emit(&Emitted::Error(EmittedError {
                        code: ErrorCode::PluginLoad,
                        reason: Arc::new(e),
                        ctx: None,
                    }));
                }
            }
        }
        destinations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Phase;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct Sink {
        name: String,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for Sink {
        fn name(&self) -> &str {
            &self.name
        }

        fn phase(&self) -> Phase {
            Phase::Destination
        }

        async fn process(&self, ctx: &mut Context) -> Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push(ctx.event.event_type.to_string());
            Ok(())
        }
    }

    fn sink(name: &str, seen: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Plugin> {
        Arc::new(Sink {
            name: name.to_string(),
            seen: seen.clone(),
        })
    }

    #[tokio::test]
    async fn test_tracking_calls_emit_typed_events() {
        let analytics = Analytics::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        analytics.register(vec![sink("sink", &seen)]).await.unwrap();

        let pages = Arc::new(AtomicUsize::new(0));
        {
            let pages = pages.clone();
            analytics.on(Channel::Page, move |_| {
                pages.fetch_add(1, Ordering::SeqCst);
            });
        }

        let user = || EventOptions::user("u-1");
        analytics.track(TrackParams::new("Clicked").options(user())).await.unwrap();
        analytics.page(PageParams::named("Home").options(user())).await.unwrap();
        analytics.identify(IdentifyParams::new("u-1")).await.unwrap();
        analytics.group(GroupParams::new("org").options(user())).await.unwrap();
        analytics.alias(AliasParams::new("u-2", "u-1")).await.unwrap();
        analytics.screen(PageParams::new().options(user())).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["track", "page", "identify", "group", "alias", "screen"]
        );
        assert_eq!(pages.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_errors_are_returned_to_the_caller() {
        let analytics = Analytics::default();
        let err = analytics.track(TrackParams::new("No Identity")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidIdentity(_)));
    }

    #[tokio::test]
    async fn test_callback_receives_settled_context() {
        let analytics = Analytics::default();
        let (tx, rx) = tokio::sync::oneshot::channel();
        analytics
            .track(
                TrackParams::new("Callback")
                    .options(EventOptions::anonymous("a"))
                    .callback(move |ctx, err| {
                        let _ = tx.send((ctx.event.event.clone(), err.is_none()));
                    }),
            )
            .await
            .unwrap();

        assert_eq!(rx.await.unwrap(), (Some("Callback".to_string()), true));
    }

    #[tokio::test]
    async fn test_register_reports_load_failures_and_keeps_others() {
        struct Broken;

        #[async_trait]
        impl Plugin for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn phase(&self) -> Phase {
                Phase::Destination
            }
            async fn load(&self, _ctx: &Context) -> Result<()> {
                Err(Error::Plugin("missing script".to_string()))
            }
            async fn process(&self, _ctx: &mut Context) -> Result<()> {
                Ok(())
            }
        }

        let analytics = Analytics::default();
        let errors = Arc::new(AtomicUsize::new(0));
        {
            let errors = errors.clone();
            analytics.on(Channel::Error, move |emitted| {
                if let Emitted::Error(e) = emitted {
                    assert_eq!(e.code, ErrorCode::PluginLoad);
                    errors.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let result = analytics
            .register(vec![Arc::new(Broken) as Arc<dyn Plugin>, sink("healthy", &seen)])
            .await;

        assert!(matches!(result, Err(Error::PluginLoad { plugin, .. }) if plugin == "broken"));
        assert_eq!(analytics.plugin_names(), vec!["healthy"]);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_builds_enabled_destinations_once() {
        let analytics = Analytics::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let built = Arc::new(AtomicUsize::new(0));
        {
            let seen = seen.clone();
            let built = built.clone();
            analytics.add_destination("Webhook", move |name, _settings| {
                built.fetch_add(1, Ordering::SeqCst);
                Ok(sink(name, &seen))
            });
        }

        let cdn = CdnSettings::from_json(
            r#"{"integrations": {"Webhook": {"url": "https://hooks.example.com"}, "Unknown": {}}}"#,
        )
        .unwrap();
        analytics
            .load(LoadSettings::new("wk").with_cdn_settings(cdn.clone()), InitOptions::default())
            .await
            .unwrap();
        analytics
            .load(LoadSettings::new("wk").with_cdn_settings(cdn), InitOptions::default())
            .await
            .unwrap();

        assert!(analytics.is_loaded());
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(analytics.plugin_names(), vec!["Webhook"]);
    }

    #[tokio::test]
    async fn test_disabled_instance_never_runs_plugins() {
        let analytics = Analytics::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        analytics.register(vec![sink("sink", &seen)]).await.unwrap();
        let tracks = Arc::new(AtomicUsize::new(0));
        {
            let tracks = tracks.clone();
            analytics.on(Channel::Track, move |_| {
                tracks.fetch_add(1, Ordering::SeqCst);
            });
        }

        analytics.disable();
        let called = Arc::new(AtomicBool::new(false));
        let ctx = {
            let called = called.clone();
            analytics
                .track(
                    TrackParams::new("Ignored")
                        .options(EventOptions::user("u"))
                        .callback(move |_, _| called.store(true, Ordering::SeqCst)),
                )
                .await
                .unwrap()
        };

        assert!(analytics.is_disabled());
        assert_eq!(ctx.halted_by(), Some(DISABLED));
        assert_eq!(ctx.attempts(), 0);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(tracks.load(Ordering::SeqCst), 0);
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_halted_events_emit_nothing() {
        let analytics = Analytics::default();
        analytics
            .add_source_middleware(Arc::new(crate::plugin::middleware::middleware_fn(
                "drop",
                |_event, _next| async move { Ok(()) },
            )))
            .await
            .unwrap();

        let emitted = Arc::new(AtomicUsize::new(0));
        for channel in [Channel::Track, Channel::Error] {
            let emitted = emitted.clone();
            analytics.on(channel, move |_| {
                emitted.fetch_add(1, Ordering::SeqCst);
            });
        }

        let properties = json!({"a": 1}).as_object().cloned().unwrap();
        let ctx = analytics
            .track(
                TrackParams::new("Dropped")
                    .properties(properties)
                    .options(EventOptions::user("u")),
            )
            .await
            .unwrap();
        assert!(ctx.is_halted());
        assert_eq!(emitted.load(Ordering::SeqCst), 0);
    }
}
