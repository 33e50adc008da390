//! # beacon-core
//!
//! Core library for beacon - an event collection and dispatch engine.
//!
//! This library provides:
//! - Event construction and validation for the tracking calls
//! - A phase-ordered plugin registry with source middleware
//! - A bounded-retry delivery queue gated on setup work
//! - Consent gating of destinations before they load
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! track()/page()/...                                   emitter
//!      │                                                  ▲
//!      ▼                                                  │ track, page, ..., error
//! EventFactory ──► EventQueue ──► pipeline::run ──► settled Context
//!                     │  ▲            │
//!                     │  └─ requeue ──┘ (retryable failure, attempts left)
//!                     └─ waits on CriticalTasks (register, load)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use beacon_core::{Analytics, Config, EventOptions, InitOptions, LoadSettings, TrackParams};
//! use beacon_core::settings::CdnSettings;
//!
//! # async fn run() -> beacon_core::Result<()> {
//! let config = Config::load()?;
//! let analytics = Analytics::new(config.analytics);
//!
//! let cdn = CdnSettings::from_json(r#"{"integrations": {}}"#)?;
//! analytics
//!     .load(LoadSettings::new("wk_123").with_cdn_settings(cdn), InitOptions::default())
//!     .await?;
//!
//! let ctx = analytics
//!     .track(TrackParams::new("Signed Up").options(EventOptions::user("user-1")))
//!     .await?;
//! assert!(ctx.failed_delivery().is_none());
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use analytics::{
    AliasParams, Analytics, AnyAnalytics, GroupParams, IdentifyParams, PageParams, TrackParams,
};
pub use config::{AnalyticsConfig, Config};
pub use consent::{create_wrapper, CreateWrapperOptions, Hook, Wrapper};
pub use context::Context;
pub use emitter::{Channel, Emitted, Emitter};
pub use error::{Error, Result};
pub use event::{Event, EventOptions, EventType, Properties};
pub use plugin::{Phase, Plugin};
pub use settings::{CdnSettings, InitOptions, LoadSettings, SettingsTransform};

// Public modules
pub mod analytics;
pub mod config;
pub mod consent;
pub mod context;
pub mod emitter;
pub mod error;
pub mod event;
pub mod factory;
pub mod logging;
pub mod pipeline;
pub mod plugin;
pub mod queue;
pub mod settings;
