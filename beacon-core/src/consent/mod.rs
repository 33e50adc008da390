//! Consent gating
//!
//! [`create_wrapper`] builds a [`Wrapper`] that replaces an analytics
//! instance's loader. The wrapped `load` resolves the user's consent before
//! any destination exists:
//!
//! ```text
//! load(settings, options)
//!   ├─ disable_all() ─────────────────────► return, nothing loads
//!   ├─ disable_consent_requirement() ─────► original load, untouched
//!   └─ should_load() / get_categories()
//!        ├─ invalid shape ────────────────► Err(Validation), nothing mutated
//!        └─ valid
//!             ├─ add consent stamping source middleware
//!             ├─ chain integration gating onto update_cdn_settings
//!             ├─ hook up register_consent_changed
//!             └─ original load
//! ```

pub mod categories;
pub mod integrations;
pub mod stamping;

pub use categories::{any_consented, validate_categories, Categories};
pub use integrations::{build_integrations, declared_categories, gate_integrations};
pub use stamping::ConsentStamping;

use crate::analytics::{AnyAnalytics, LoadFn, TrackParams};
use crate::error::{Error, Result};
use crate::event::{EventOptions, Properties};
use crate::settings::{InitOptions, LoadSettings};
use futures::future::{self, BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Integration name to the categories it requires.
pub type IntegrationCategoryMappings = BTreeMap<String, Vec<String>>;

/// Name of the event tracked when consent changes after load.
pub const CONSENT_UPDATED_EVENT: &str = "Segment Consent Preference Updated";

/// A user-supplied callback that may be sync or async.
///
/// Both kinds are stored as a function returning a boxed future, so callers
/// always `.await` the result.
pub struct Hook<T>(Arc<dyn Fn() -> BoxFuture<'static, T> + Send + Sync>);

impl<T: Send + 'static> Hook<T> {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self(Arc::new(move || future::ready(f()).boxed()))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self(Arc::new(move || f().boxed()))
    }

    pub async fn call(&self) -> T {
        (self.0)().await
    }
}

impl<T> Clone for Hook<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Receives updated categories from the consent manager.
pub type ConsentChangedCallback = Arc<dyn Fn(Value) + Send + Sync>;

type RegisterConsentChanged = Arc<dyn Fn(ConsentChangedCallback) + Send + Sync>;

/// Options for [`create_wrapper`].
#[derive(Clone, Default)]
pub struct CreateWrapperOptions {
    get_categories: Option<Hook<Value>>,
    should_load: Option<Hook<Option<Value>>>,
    disable_consent_requirement: Option<Hook<bool>>,
    disable_all: Option<Hook<bool>>,
    integration_category_mappings: Option<IntegrationCategoryMappings>,
    register_consent_changed: Option<RegisterConsentChanged>,
}

impl CreateWrapperOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current consent categories. Required.
    pub fn get_categories(mut self, hook: Hook<Value>) -> Self {
        self.get_categories = Some(hook);
        self
    }

    /// Categories to gate destinations with at load time. Falls back to
    /// `get_categories` when it yields nothing.
    pub fn should_load(mut self, hook: Hook<Option<Value>>) -> Self {
        self.should_load = Some(hook);
        self
    }

    pub fn disable_consent_requirement(mut self, hook: Hook<bool>) -> Self {
        self.disable_consent_requirement = Some(hook);
        self
    }

    /// Skip loading entirely when the hook returns `true`.
    pub fn disable_all(mut self, hook: Hook<bool>) -> Self {
        self.disable_all = Some(hook);
        self
    }

    /// Alias of [`disable_all`](Self::disable_all).
    pub fn disable_segment_initialization(self, hook: Hook<bool>) -> Self {
        self.disable_all(hook)
    }

    pub fn integration_category_mappings(mut self, mappings: IntegrationCategoryMappings) -> Self {
        self.integration_category_mappings = Some(mappings);
        self
    }

    /// Called once during load with a callback the consent manager invokes
    /// whenever the user changes their preferences.
    pub fn register_consent_changed<F>(mut self, register: F) -> Self
    where
        F: Fn(ConsentChangedCallback) + Send + Sync + 'static,
    {
        self.register_consent_changed = Some(Arc::new(register));
        self
    }
}

/// Applies consent gating to analytics instances.
#[derive(Clone)]
pub struct Wrapper {
    options: CreateWrapperOptions,
}

pub fn create_wrapper(options: CreateWrapperOptions) -> Wrapper {
    Wrapper { options }
}

impl Wrapper {
    /// Replace `analytics`' loader with the consent-aware one.
    pub fn wrap<A: AnyAnalytics>(&self, analytics: &Arc<A>) -> Result<()> {
        let get_categories = self
            .options
            .get_categories
            .clone()
            .ok_or_else(|| Error::validation("getCategories() is not function", &Value::Null))?;

        let original = analytics.loader();
        let weak = Arc::downgrade(analytics);
        let options = self.options.clone();
        let installed = Arc::new(AtomicBool::new(false));

        let loader: LoadFn = Arc::new(move |settings: LoadSettings, init: InitOptions| {
            let gated = GatedLoad {
                original: original.clone(),
                analytics: weak.clone(),
                options: options.clone(),
                get_categories: get_categories.clone(),
                installed: installed.clone(),
            };
            gated.run(settings, init).boxed()
        });

        analytics.set_loader(loader);
        tracing::debug!("Consent wrapper installed");
        Ok(())
    }
}

/// State captured for one call of the wrapped loader.
struct GatedLoad<A> {
    original: LoadFn,
    analytics: Weak<A>,
    options: CreateWrapperOptions,
    get_categories: Hook<Value>,
    /// Set once stamping and the consent-changed callback are in place
    installed: Arc<AtomicBool>,
}

impl<A: AnyAnalytics> GatedLoad<A> {
    async fn run(self, settings: LoadSettings, init: InitOptions) -> Result<()> {
        if self.analytics.upgrade().map_or(false, |a| a.is_loaded()) {
            tracing::warn!("Analytics already loaded, ignoring load()");
            return Ok(());
        }

        if let Some(disable_all) = &self.options.disable_all {
            if disable_all.call().await {
                tracing::info!("Consent wrapper: initialization disabled");
                if let Some(analytics) = self.analytics.upgrade() {
                    analytics.disable();
                }
                return Ok(());
            }
        }

        if let Some(disabled) = &self.options.disable_consent_requirement {
            if disabled.call().await {
                tracing::info!("Consent wrapper: consent requirement disabled");
                return (self.original)(settings, init).await;
            }
        }

        let initial = match &self.options.should_load {
            Some(should_load) => should_load.call().await.filter(|v| !is_empty_categories(v)),
            None => None,
        };
        let initial = match initial {
            Some(value) => value,
            None => self.get_categories.call().await,
        };
        let categories = validate_categories(&initial)?;

        let analytics = self
            .analytics
            .upgrade()
            .ok_or_else(|| Error::Config("analytics instance was dropped before load".to_string()))?;

        let init = init.chain_cdn_settings(gate_integrations(
            categories.clone(),
            self.options.integration_category_mappings.clone(),
        ));

        if !self.installed.swap(true, Ordering::SeqCst) {
            if let Err(e) = analytics
                .add_source_middleware(Arc::new(ConsentStamping::new(
                    self.get_categories.clone(),
                )))
                .await
            {
                self.installed.store(false, Ordering::SeqCst);
                return Err(e);
            }

            if let Some(register) = &self.options.register_consent_changed {
                register(consent_changed_callback(Arc::downgrade(&analytics)));
            }
        }

        tracing::info!(
            consented = categories.values().filter(|c| **c).count(),
            categories = categories.len(),
            "Consent resolved, loading"
        );
        drop(analytics);
        (self.original)(settings, init).await
    }
}

fn is_empty_categories(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Build the callback handed to `register_consent_changed`.
///
/// Each call validates the new categories and tracks a consent update event
/// on the runtime that ran `load`.
fn consent_changed_callback<A: AnyAnalytics>(analytics: Weak<A>) -> ConsentChangedCallback {
    let runtime = tokio::runtime::Handle::current();

    Arc::new(move |value: Value| {
        let categories = match validate_categories(&value) {
            Ok(categories) => categories,
            Err(e) => {
                tracing::error!(error = %e, "Ignoring invalid consent update");
                return;
            }
        };
        let Some(analytics) = analytics.upgrade() else {
            return;
        };

        let mut consent = Properties::new();
        consent.insert("categoryPreferences".to_string(), serde_json::json!(categories));
        let mut context = Properties::new();
        context.insert("consent".to_string(), Value::Object(consent));

        let options = EventOptions {
            anonymous_id: Some(analytics.anonymous_id()),
            context,
            ..Default::default()
        };
        runtime.spawn(async move {
            if let Err(e) = analytics
                .track(TrackParams::new(CONSENT_UPDATED_EVENT).options(options))
                .await
            {
                tracing::error!(error = %e, "Failed to track consent update");
            }
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_hooks_normalize_sync_and_async() {
        let sync = Hook::from_fn(|| json!({"Advertising": true}));
        let async_hook = Hook::from_async(|| async { json!({"Email": false}) });

        assert_eq!(sync.call().await["Advertising"], true);
        assert_eq!(async_hook.clone().call().await["Email"], false);
    }

    #[test]
    fn test_empty_should_load_results_fall_back() {
        assert!(is_empty_categories(&json!(null)));
        assert!(is_empty_categories(&json!({})));
        assert!(!is_empty_categories(&json!("sup")));
        assert!(!is_empty_categories(&json!({"Advertising": true})));
    }

    #[test]
    fn test_disable_segment_initialization_aliases_disable_all() {
        let options = CreateWrapperOptions::new().disable_segment_initialization(Hook::from_fn(|| true));
        assert!(options.disable_all.is_some());
    }
}
