//! Load settings and the CDN settings document
//!
//! `load()` receives a [`LoadSettings`] (a write key plus optional inline CDN
//! settings) and [`InitOptions`]. The CDN document is either taken inline or
//! fetched with [`CdnClient`], then passed through the
//! `update_cdn_settings` transform chain before destinations are built.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Settings CDN used when none is configured.
pub const DEFAULT_CDN_URL: &str = "https://cdn.segment.com";

/// Remote configuration document for a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdnSettings {
    /// Destination name to settings object, or `false` when disabled
    #[serde(default)]
    pub integrations: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_plugins: Vec<Value>,

    /// Fields this crate does not interpret, kept for round-tripping
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CdnSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Settings(format!("invalid CDN settings: {}", e)))
    }

    /// Integrations whose descriptor is not `false`, in name order.
    pub fn enabled_integrations(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.integrations
            .iter()
            .filter(|(_, descriptor)| !matches!(descriptor, Value::Bool(false)))
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.integrations
            .get(name)
            .map_or(false, |descriptor| !matches!(descriptor, Value::Bool(false)))
    }
}

/// First argument to `load()`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSettings {
    pub write_key: String,
    /// Overrides the configured settings CDN
    pub cdn_url: Option<String>,
    /// Inline settings; skips the CDN fetch when present
    pub cdn_settings: Option<CdnSettings>,
}

impl LoadSettings {
    pub fn new(write_key: impl Into<String>) -> Self {
        Self {
            write_key: write_key.into(),
            ..Default::default()
        }
    }

    pub fn with_cdn_settings(mut self, cdn_settings: CdnSettings) -> Self {
        self.cdn_settings = Some(cdn_settings);
        self
    }
}

impl From<&str> for LoadSettings {
    fn from(write_key: &str) -> Self {
        Self::new(write_key)
    }
}

impl From<String> for LoadSettings {
    fn from(write_key: String) -> Self {
        Self::new(write_key)
    }
}

/// A single-argument rewrite of the CDN settings document.
///
/// Transforms compose in order with [`then`](Self::then), so several wrappers
/// can each add a step without knowing about the others.
#[derive(Clone)]
pub struct SettingsTransform(Arc<dyn Fn(CdnSettings) -> CdnSettings + Send + Sync>);

impl SettingsTransform {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(CdnSettings) -> CdnSettings + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn identity() -> Self {
        Self::new(|settings| settings)
    }

    /// A transform that runs `self` first and `next` on its output.
    pub fn then(self, next: SettingsTransform) -> Self {
        Self::new(move |settings| next.apply(self.apply(settings)))
    }

    pub fn apply(&self, settings: CdnSettings) -> CdnSettings {
        (self.0)(settings)
    }
}

impl Default for SettingsTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for SettingsTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SettingsTransform")
    }
}

/// Second argument to `load()`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Applied to the CDN settings before destinations are built
    pub update_cdn_settings: Option<SettingsTransform>,
}

impl InitOptions {
    /// Append `transform` after any transform already present.
    pub fn chain_cdn_settings(mut self, transform: SettingsTransform) -> Self {
        self.update_cdn_settings = Some(match self.update_cdn_settings.take() {
            Some(existing) => existing.then(transform),
            None => transform,
        });
        self
    }

    /// Run the configured transform chain, or return `settings` unchanged.
    pub fn apply_cdn_settings(&self, settings: CdnSettings) -> CdnSettings {
        match &self.update_cdn_settings {
            Some(transform) => transform.apply(settings),
            None => settings,
        }
    }
}

/// HTTP client for the settings CDN.
pub struct CdnClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl CdnClient {
    pub fn new(cdn_url: Option<&str>, timeout_secs: u64) -> Result<Self> {
        let base_url = cdn_url
            .unwrap_or(DEFAULT_CDN_URL)
            .trim_end_matches('/')
            .to_string();

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn settings_url(&self, write_key: &str) -> String {
        format!(
            "{}/v1/projects/{}/settings",
            self.base_url,
            urlencoding::encode(write_key)
        )
    }

    /// Fetch the settings document for `write_key`.
    pub async fn fetch(&self, write_key: &str) -> Result<CdnSettings> {
        let url = self.settings_url(write_key);
        tracing::debug!(url = %url, "Fetching CDN settings");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Settings(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Settings(format!("failed to parse settings: {}", e)))
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Settings(format!(
                "CDN error ({}): {}",
                status, error_text
            )))
        }
    }
}
