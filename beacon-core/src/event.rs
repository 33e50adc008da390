//! Event records emitted by the tracking API
//!
//! An [`Event`] is the normalized record built by the
//! [`EventFactory`](crate::factory::EventFactory). Plugins enrich it in place
//! while it travels through the pipeline; enrichment always merges into the
//! nested `context` objects rather than replacing them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form JSON object used for properties, traits and context.
pub type Properties = Map<String, Value>;

/// Kind of tracking call that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Track,
    Page,
    Identify,
    Alias,
    Group,
    Screen,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Track => "track",
            EventType::Page => "page",
            EventType::Identify => "identify",
            EventType::Alias => "alias",
            EventType::Group => "group",
            EventType::Screen => "screen",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "track" => Ok(EventType::Track),
            "page" => Ok(EventType::Page),
            "identify" => Ok(EventType::Identify),
            "alias" => Ok(EventType::Alias),
            "group" => Ok(EventType::Group),
            "screen" => Ok(EventType::Screen),
            _ => Err(format!("unknown event type: {}", s)),
        }
    }
}

/// A normalized analytics event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Track event name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// Page/screen name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Page/screen category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default)]
    pub properties: Properties,

    #[serde(default)]
    pub traits: Properties,

    /// Nested context; holds the `page` and `consent` sub-objects
    #[serde(default)]
    pub context: Properties,

    /// Per-destination enablement overrides
    #[serde(default)]
    pub integrations: Properties,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,

    pub timestamp: DateTime<Utc>,

    pub message_id: String,
}

impl Event {
    /// Mutable access to a nested object under `context`, created on demand.
    ///
    /// A non-object value already stored under `key` is replaced by an empty
    /// object.
    pub fn context_object_mut(&mut self, key: &str) -> &mut Properties {
        let slot = self
            .context
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        match slot {
            Value::Object(map) => map,
            _ => unreachable!("slot was just set to an object"),
        }
    }

    /// Shallow-merge `values` into `context[key]`, keeping unrelated keys.
    pub fn merge_context(&mut self, key: &str, values: Properties) {
        let target = self.context_object_mut(key);
        for (k, v) in values {
            target.insert(k, v);
        }
    }
}

/// Per-call options shared by every tracking method.
#[derive(Debug, Clone, Default)]
pub struct EventOptions {
    pub user_id: Option<String>,
    pub anonymous_id: Option<String>,
    /// Overrides the creation timestamp
    pub timestamp: Option<DateTime<Utc>>,
    /// Merged into the event context
    pub context: Properties,
    /// Merged into the event integrations
    pub integrations: Properties,
    /// Overrides the generated message id
    pub message_id: Option<String>,
}

impl EventOptions {
    /// Options carrying only a user id.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    /// Options carrying only an anonymous id.
    pub fn anonymous(anonymous_id: impl Into<String>) -> Self {
        Self {
            anonymous_id: Some(anonymous_id.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Event {
        Event {
            event_type: EventType::Track,
            event: Some("Signed Up".to_string()),
            name: None,
            category: None,
            properties: Properties::new(),
            traits: Properties::new(),
            context: Properties::new(),
            integrations: Properties::new(),
            user_id: Some("user-1".to_string()),
            anonymous_id: None,
            group_id: None,
            previous_id: None,
            timestamp: Utc::now(),
            message_id: "ajs-next-abc".to_string(),
        }
    }

    #[test]
    fn test_event_type_round_trips_as_str() {
        for ty in [
            EventType::Track,
            EventType::Page,
            EventType::Identify,
            EventType::Alias,
            EventType::Group,
            EventType::Screen,
        ] {
            assert_eq!(ty.as_str().parse::<EventType>().unwrap(), ty);
        }
        assert!("flush".parse::<EventType>().is_err());
    }

    #[test]
    fn test_serializes_camel_case() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["type"], "track");
        assert_eq!(value["userId"], "user-1");
        assert_eq!(value["messageId"], "ajs-next-abc");
        assert!(value.get("anonymousId").is_none());
    }

    #[test]
    fn test_merge_context_preserves_siblings() {
        let mut event = sample();
        event
            .context
            .insert("consent".to_string(), json!({"source": "cmp"}));

        let mut prefs = Properties::new();
        prefs.insert("categoryPreferences".to_string(), json!({"Ads": true}));
        event.merge_context("consent", prefs);

        assert_eq!(event.context["consent"]["source"], "cmp");
        assert_eq!(event.context["consent"]["categoryPreferences"]["Ads"], true);
    }

    #[test]
    fn test_context_object_mut_replaces_scalars() {
        let mut event = sample();
        event.context.insert("page".to_string(), json!("nope"));
        event
            .context_object_mut("page")
            .insert("path".to_string(), json!("/"));
        assert_eq!(event.context["page"], json!({"path": "/"}));
    }
}
