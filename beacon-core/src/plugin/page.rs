//! Page context enrichment
//!
//! Stamps `context.page` on every event from a [`PageContextProvider`]. For
//! `page` events the page fields are also folded into `properties`, with any
//! page field the caller passed explicitly taking precedence.
//!
//! ## URL policy
//!
//! [`PageContext::from_location`] applies a single canonicalization rule:
//!
//! - `path`: pathname of the canonical link (resolved against `href`) when one
//!   is present, otherwise the pathname of `href`. Always starts with `/`.
//! - `search`: query string of `href`, including the leading `?`, or empty.
//! - `url`: the canonical link verbatim, with `search` appended when the link
//!   has no query of its own; without a canonical link, `href` with its
//!   fragment removed.

use super::{Phase, Plugin};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::event::{EventType, Properties};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Field names shared by `context.page` and page-event properties.
const PAGE_KEYS: [&str; 5] = ["path", "referrer", "search", "title", "url"];

/// Snapshot of the page an event was created on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    pub path: String,
    pub referrer: String,
    pub search: String,
    pub title: String,
    pub url: String,
}

impl PageContext {
    /// Derive a page context from a location and optional canonical link.
    pub fn from_location(
        href: &str,
        canonical: Option<&str>,
        referrer: &str,
        title: &str,
    ) -> Result<Self> {
        let location = Url::parse(href)
            .map_err(|_| Error::validation("Invalid page URL", &Value::String(href.to_string())))?;
        let search = location
            .query()
            .map(|q| format!("?{}", q))
            .unwrap_or_default();

        let canonical = canonical.map(str::trim).filter(|c| !c.is_empty());

        let path = match canonical.and_then(|c| location.join(c).ok()) {
            Some(resolved) => resolved.path().to_string(),
            None => location.path().to_string(),
        };
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };

        let url = match canonical {
            Some(c) if c.contains('?') => c.to_string(),
            Some(c) => format!("{}{}", c, search),
            None => match href.find('#') {
                Some(idx) => href[..idx].to_string(),
                None => href.to_string(),
            },
        };

        Ok(Self {
            path,
            referrer: referrer.to_string(),
            search,
            title: title.to_string(),
            url,
        })
    }

    fn to_properties(&self) -> Properties {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Properties::new(),
        }
    }
}

/// Source of the current page context, e.g. a browser shim or a fixture.
pub trait PageContextProvider: Send + Sync {
    fn page_context(&self) -> PageContext;
}

impl PageContextProvider for PageContext {
    fn page_context(&self) -> PageContext {
        self.clone()
    }
}

/// Enrichment plugin that merges page information into events.
pub struct PageEnrichment {
    provider: Arc<dyn PageContextProvider>,
}

impl PageEnrichment {
    pub const NAME: &'static str = "Page Enrichment";

    pub fn new(provider: Arc<dyn PageContextProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Plugin for PageEnrichment {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn phase(&self) -> Phase {
        Phase::Enrichment
    }

    async fn process(&self, ctx: &mut Context) -> Result<()> {
        let event = &mut ctx.event;

        // default, then provider, then whatever the caller already set
        let mut page = PageContext::default().to_properties();
        page.extend(self.provider.page_context().to_properties());
        if let Some(Value::Object(existing)) = event.context.get("page") {
            page.extend(existing.clone());
        }

        if event.event_type == EventType::Page {
            for key in PAGE_KEYS {
                if let Some(value) = event.properties.get(key) {
                    page.insert(key.to_string(), value.clone());
                }
            }

            let mut properties = page.clone();
            properties.extend(std::mem::take(&mut event.properties));
            if let Some(name) = &event.name {
                properties.insert("name".to_string(), Value::String(name.clone()));
            }
            event.properties = properties;
        }

        event.context.insert("page".to_string(), Value::Object(page));
        Ok(())
    }
}
