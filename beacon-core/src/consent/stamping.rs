//! Consent stamping middleware

use super::Hook;
use crate::error::Result;
use crate::event::{Event, Properties};
use crate::plugin::{Next, SourceMiddleware};
use async_trait::async_trait;
use serde_json::Value;

/// Source middleware that writes the current consent preferences into
/// `context.consent.categoryPreferences` on every event.
pub struct ConsentStamping {
    get_categories: Hook<Value>,
}

impl ConsentStamping {
    pub fn new(get_categories: Hook<Value>) -> Self {
        Self { get_categories }
    }
}

#[async_trait]
impl SourceMiddleware for ConsentStamping {
    fn name(&self) -> &str {
        "Consent Stamping"
    }

    async fn handle(&self, mut event: Event, next: Next) -> Result<()> {
        let categories = self.get_categories.call().await;

        let mut stamp = Properties::new();
        stamp.insert("categoryPreferences".to_string(), categories);
        event.merge_context("consent", stamp);

        next.call(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::event::EventOptions;
    use crate::factory::EventFactory;
    use crate::plugin::{MiddlewarePlugin, Plugin};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_stamps_latest_categories_and_keeps_siblings() {
        let current = Arc::new(Mutex::new(json!({"Advertising": false})));
        let hook = {
            let current = current.clone();
            Hook::from_fn(move || current.lock().unwrap().clone())
        };
        let plugin = MiddlewarePlugin::new(Arc::new(ConsentStamping::new(hook)));

        let mut options = EventOptions::user("u");
        options
            .context
            .insert("consent".to_string(), json!({"source": "cmp", "categoryPreferences": {"Old": true}}));
        let event = EventFactory::new()
            .track("Viewed", Properties::new(), options)
            .unwrap();

        *current.lock().unwrap() = json!({"Advertising": true});
        let mut ctx = Context::new(event);
        plugin.process(&mut ctx).await.unwrap();

        let consent = &ctx.event.context["consent"];
        assert_eq!(consent["source"], "cmp");
        assert_eq!(consent["categoryPreferences"], json!({"Advertising": true}));
    }
}
