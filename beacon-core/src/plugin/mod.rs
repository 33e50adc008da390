//! Plugin framework
//!
//! Plugins observe and transform events as they pass through the dispatch
//! pipeline. Each plugin declares a [`Phase`]; the registry orders plugins by
//! phase and, within a phase, by registration order.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        PLUGIN REGISTRY                           │
//! │                                                                  │
//! │   before ──► enrichment ──► destination ──► after                │
//! │  (source     (page ctx,     (integrations)  (cleanup,            │
//! │  middleware)  consent)                        metrics)           │
//! │                                                                  │
//! │   register(): await load() ─► insert into (phase, seq) order     │
//! │   deregister(): remove ─► await unload()                         │
//! │   snapshot(): immutable list used by one pipeline pass           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use beacon_core::plugin::{Phase, Plugin};
//! use beacon_core::{Context, Result};
//!
//! pub struct Stamp;
//!
//! #[async_trait::async_trait]
//! impl Plugin for Stamp {
//!     fn name(&self) -> &str { "custom.stamp" }
//!     fn phase(&self) -> Phase { Phase::Enrichment }
//!
//!     async fn process(&self, ctx: &mut Context) -> Result<()> {
//!         ctx.event.context.insert("stamped".into(), true.into());
//!         Ok(())
//!     }
//! }
//! ```

pub mod middleware;
pub mod page;
pub mod registry;

use crate::context::Context;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use middleware::{MiddlewarePlugin, Next, SourceMiddleware};
pub use page::{PageContext, PageContextProvider, PageEnrichment};
pub use registry::{PluginRegistry, RegisteredPlugin};

/// Execution phase of a plugin. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Before,
    Enrichment,
    Destination,
    After,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Before => "before",
            Phase::Enrichment => "enrichment",
            Phase::Destination => "destination",
            Phase::After => "after",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait that all pipeline plugins must implement.
///
/// `load` is awaited before the plugin joins the pipeline; a plugin whose
/// `load` fails never sees events. `process` mutates the context in place.
/// Returning an error fails the current pass and lets the queue decide
/// whether to retry; [`Error::cancel`](crate::Error::cancel) controls that
/// decision explicitly.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique name for this plugin.
    fn name(&self) -> &str;

    /// Pipeline phase this plugin runs in.
    fn phase(&self) -> Phase;

    fn version(&self) -> &str {
        "0.0.0"
    }

    /// Prepare the plugin. Called once, before it receives events.
    async fn load(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    /// Tear the plugin down after it has been removed from the registry.
    async fn unload(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    /// Handle one event.
    async fn process(&self, ctx: &mut Context) -> Result<()>;
}
