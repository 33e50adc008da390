//! JSONL event replay
//!
//! Each line of a replay file is one event in wire format (`type`, `event`,
//! `userId`, `properties`, ...). Lines are turned back into tracking calls so
//! they go through the same factory, queue and plugins as live traffic.

use beacon_core::analytics::{AliasParams, GroupParams, IdentifyParams, PageParams};
use beacon_core::{Analytics, Context, EventOptions, EventType, Properties, TrackParams};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One line of a replay file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayLine {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub traits: Properties,
    #[serde(default)]
    pub context: Properties,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub anonymous_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub previous_id: Option<String>,
    #[serde(default)]
    pub integrations: Properties,
    /// Original event time, kept instead of the replay time
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_id: Option<String>,
}

impl ReplayLine {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    fn options(&self) -> EventOptions {
        EventOptions {
            user_id: self.user_id.clone(),
            anonymous_id: self.anonymous_id.clone(),
            timestamp: self.timestamp,
            context: self.context.clone(),
            integrations: self.integrations.clone(),
            message_id: self.message_id.clone(),
        }
    }

    /// Issue the tracking call this line describes.
    pub async fn dispatch(self, analytics: &Analytics) -> beacon_core::Result<Context> {
        let options = self.options();
        match self.event_type {
            EventType::Track => {
                analytics
                    .track(
                        TrackParams::new(self.event.unwrap_or_default())
                            .properties(self.properties)
                            .options(options),
                    )
                    .await
            }
            EventType::Page | EventType::Screen => {
                let params = PageParams {
                    category: self.category,
                    name: self.name,
                    properties: self.properties,
                    options,
                    callback: None,
                };
                if self.event_type == EventType::Page {
                    analytics.page(params).await
                } else {
                    analytics.screen(params).await
                }
            }
            EventType::Identify => {
                analytics
                    .identify(IdentifyParams {
                        user_id: self.user_id,
                        traits: self.traits,
                        options,
                        callback: None,
                    })
                    .await
            }
            EventType::Group => {
                analytics
                    .group(
                        GroupParams::new(self.group_id.unwrap_or_default())
                            .traits(self.traits)
                            .options(options),
                    )
                    .await
            }
            EventType::Alias => {
                analytics
                    .alias(
                        AliasParams::new(
                            self.user_id.unwrap_or_default(),
                            self.previous_id.unwrap_or_default(),
                        )
                        .options(options),
                    )
                    .await
            }
        }
    }
}

/// Outcome counts for a replay run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub delivered: usize,
    pub failed: usize,
    pub halted: usize,
    pub rejected: usize,
}

impl ReplaySummary {
    pub fn record(&mut self, ctx: &Context) {
        if ctx.failed_delivery().is_some() {
            self.failed += 1;
        } else if ctx.is_halted() {
            self.halted += 1;
        } else {
            self.delivered += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.delivered + self.failed + self.halted + self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_wire_format() {
        let line = ReplayLine::parse(
            r#"{"type":"track","event":"Signed Up","userId":"u-1","properties":{"plan":"pro"}}"#,
        )
        .unwrap();
        assert_eq!(line.event_type, EventType::Track);
        assert_eq!(line.event.as_deref(), Some("Signed Up"));
        assert_eq!(line.options().user_id.as_deref(), Some("u-1"));
        assert_eq!(line.properties["plan"], "pro");
    }

    #[tokio::test]
    async fn test_replay_keeps_original_identity_and_time() {
        let line = ReplayLine::parse(
            r#"{"type":"track","event":"Ordered","anonymousId":"a-1",
                "timestamp":"2024-03-01T12:30:00Z","messageId":"ajs-next-original",
                "integrations":{"Mailer":false}}"#,
        )
        .unwrap();

        let ctx = line.dispatch(&Analytics::default()).await.unwrap();
        assert_eq!(ctx.event.message_id, "ajs-next-original");
        assert_eq!(ctx.event.timestamp.to_rfc3339(), "2024-03-01T12:30:00+00:00");
        assert_eq!(ctx.event.integrations["Mailer"], false);
    }

    #[test]
    fn test_rejects_unknown_type() {
        assert!(ReplayLine::parse(r#"{"type":"flush"}"#).is_err());
    }

    #[tokio::test]
    async fn test_dispatch_uses_matching_call() {
        let analytics = Analytics::default();
        let line =
            ReplayLine::parse(r#"{"type":"alias","userId":"u-2","previousId":"u-1"}"#).unwrap();
        let ctx = line.dispatch(&analytics).await.unwrap();
        assert_eq!(ctx.event.event_type, EventType::Alias);
        assert_eq!(ctx.event.previous_id.as_deref(), Some("u-1"));

        let mut summary = ReplaySummary::default();
        summary.record(&ctx);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.total(), 1);
    }
}
