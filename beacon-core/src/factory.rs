//! Event construction and validation
//!
//! [`EventFactory`] turns tracking-call arguments into normalized [`Event`]s:
//! defaults are filled in, per-call options are merged, and the identity rules
//! are checked before anything reaches the queue.

use crate::error::{Error, Result};
use crate::event::{Event, EventOptions, EventType, Properties};
use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Builds normalized events from tracking-call arguments.
#[derive(Debug, Default, Clone)]
pub struct EventFactory;

impl EventFactory {
    pub fn new() -> Self {
        Self
    }

    pub fn track(
        &self,
        event: &str,
        properties: Properties,
        options: EventOptions,
    ) -> Result<Event> {
        let mut base = base_event(EventType::Track);
        base.event = Some(event.to_string());
        base.properties = properties;
        self.normalize(base, options)
    }

    pub fn page(
        &self,
        category: Option<&str>,
        name: Option<&str>,
        properties: Properties,
        options: EventOptions,
    ) -> Result<Event> {
        self.page_like(EventType::Page, category, name, properties, options)
    }

    pub fn screen(
        &self,
        category: Option<&str>,
        name: Option<&str>,
        properties: Properties,
        options: EventOptions,
    ) -> Result<Event> {
        self.page_like(EventType::Screen, category, name, properties, options)
    }

    pub fn identify(
        &self,
        user_id: Option<&str>,
        traits: Properties,
        mut options: EventOptions,
    ) -> Result<Event> {
        if let Some(user_id) = user_id {
            options.user_id = Some(user_id.to_string());
        }
        let mut base = base_event(EventType::Identify);
        base.traits = traits;
        self.normalize(base, options)
    }

    pub fn group(&self, group_id: &str, traits: Properties, options: EventOptions) -> Result<Event> {
        let mut base = base_event(EventType::Group);
        base.group_id = Some(group_id.to_string());
        base.traits = traits;
        self.normalize(base, options)
    }

    pub fn alias(&self, user_id: &str, previous_id: &str, mut options: EventOptions) -> Result<Event> {
        options.user_id = Some(user_id.to_string());
        let mut base = base_event(EventType::Alias);
        base.previous_id = Some(previous_id.to_string());
        self.normalize(base, options)
    }

    fn page_like(
        &self,
        event_type: EventType,
        category: Option<&str>,
        name: Option<&str>,
        mut properties: Properties,
        options: EventOptions,
    ) -> Result<Event> {
        let mut base = base_event(event_type);
        if let Some(category) = category {
            base.category = Some(category.to_string());
            properties.insert("category".to_string(), Value::String(category.to_string()));
        }
        if let Some(name) = name {
            base.name = Some(name.to_string());
            properties.insert("name".to_string(), Value::String(name.to_string()));
        }
        base.properties = properties;
        self.normalize(base, options)
    }

    /// Merge options into the event, stamp defaults and validate.
    fn normalize(&self, mut event: Event, options: EventOptions) -> Result<Event> {
        let EventOptions {
            user_id,
            anonymous_id,
            timestamp,
            context,
            integrations,
            message_id,
        } = options;

        if user_id.is_some() {
            event.user_id = user_id;
        }
        if anonymous_id.is_some() {
            event.anonymous_id = anonymous_id;
        }
        if let Some(timestamp) = timestamp {
            event.timestamp = timestamp;
        }
        event.context.extend(context);
        event.integrations.extend(integrations);

        validate_event(&event)?;

        event.message_id = match message_id {
            Some(id) => id,
            None => generate_message_id(&event),
        };
        Ok(event)
    }
}

fn base_event(event_type: EventType) -> Event {
    Event {
        event_type,
        event: None,
        name: None,
        category: None,
        properties: Properties::new(),
        traits: Properties::new(),
        context: Properties::new(),
        integrations: Properties::new(),
        user_id: None,
        anonymous_id: None,
        group_id: None,
        previous_id: None,
        timestamp: Utc::now(),
        message_id: String::new(),
    }
}

/// Placeholder event carried by contexts that are not tied to a tracking call.
pub(crate) fn system_event() -> Event {
    let mut event = base_event(EventType::Track);
    event.event = Some("system".to_string());
    event
}

fn is_present(value: &Option<String>) -> bool {
    value.as_deref().map_or(false, |v| !v.trim().is_empty())
}

/// Check the identity and shape rules for a normalized event.
pub fn validate_event(event: &Event) -> Result<()> {
    if !is_present(&event.user_id) && !is_present(&event.anonymous_id) {
        return Err(Error::InvalidIdentity(
            "userId or anonymousId is required".to_string(),
        ));
    }

    match event.event_type {
        EventType::Track if !is_present(&event.event) => Err(Error::validation(
            "Event name is missing",
            &event.event.clone().map(Value::String).unwrap_or(Value::Null),
        )),
        EventType::Group if !is_present(&event.group_id) => Err(Error::InvalidIdentity(
            "groupId is required".to_string(),
        )),
        EventType::Alias if !is_present(&event.user_id) || !is_present(&event.previous_id) => {
            Err(Error::InvalidIdentity(
                "alias requires both userId and previousId".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

/// Generate a message id: `ajs-next-` followed by 32 hex chars of
/// SHA-256(serialized event + random UUID).
fn generate_message_id(event: &Event) -> String {
    let content = serde_json::to_string(event).unwrap_or_default();
    let hash_input = format!("{}:{}", content, uuid::Uuid::new_v4());

    let mut hasher = Sha256::new();
    hasher.update(hash_input.as_bytes());
    let result = hasher.finalize();

    format!("ajs-next-{}", hex::encode(&result[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_track_applies_defaults() {
        let factory = EventFactory::new();
        let event = factory
            .track("Signed Up", Properties::new(), EventOptions::user("user-1"))
            .unwrap();

        assert_eq!(event.event_type, EventType::Track);
        assert_eq!(event.event.as_deref(), Some("Signed Up"));
        assert!(event.properties.is_empty());
        assert!(event.context.is_empty());
        assert!(event.message_id.starts_with("ajs-next-"));
        assert_eq!(event.message_id.len(), "ajs-next-".len() + 32);
    }

    #[test]
    fn test_message_ids_are_unique() {
        let factory = EventFactory::new();
        let a = factory
            .track("A", Properties::new(), EventOptions::user("u"))
            .unwrap();
        let b = factory
            .track("A", Properties::new(), EventOptions::user("u"))
            .unwrap();
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn test_options_override_timestamp_and_merge_context() {
        let factory = EventFactory::new();
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let options = EventOptions {
            anonymous_id: Some("anon-1".to_string()),
            timestamp: Some(ts),
            context: props(json!({"ip": "127.0.0.1"})),
            integrations: props(json!({"All": false})),
            ..Default::default()
        };

        let event = factory
            .track("Clicked", props(json!({"button": "buy"})), options)
            .unwrap();

        assert_eq!(event.timestamp, ts);
        assert_eq!(event.context["ip"], "127.0.0.1");
        assert_eq!(event.integrations["All"], false);
        assert_eq!(event.properties["button"], "buy");
    }

    #[test]
    fn test_missing_identity_is_rejected() {
        let factory = EventFactory::new();
        let err = factory
            .track("Signed Up", Properties::new(), EventOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidIdentity(_)));

        let blank = EventOptions::user("   ");
        let err = factory.track("Signed Up", Properties::new(), blank).unwrap_err();
        assert!(matches!(err, Error::InvalidIdentity(_)));
    }

    #[test]
    fn test_track_requires_event_name() {
        let factory = EventFactory::new();
        let err = factory
            .track("", Properties::new(), EventOptions::user("u"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_identify_uses_positional_user_id() {
        let factory = EventFactory::new();
        let event = factory
            .identify(Some("user-9"), props(json!({"plan": "pro"})), EventOptions::default())
            .unwrap();
        assert_eq!(event.user_id.as_deref(), Some("user-9"));
        assert_eq!(event.traits["plan"], "pro");

        let anon = factory
            .identify(None, Properties::new(), EventOptions::anonymous("anon"))
            .unwrap();
        assert_eq!(anon.anonymous_id.as_deref(), Some("anon"));
    }

    #[test]
    fn test_page_sets_name_and_category_properties() {
        let factory = EventFactory::new();
        let event = factory
            .page(
                Some("Docs"),
                Some("Install"),
                Properties::new(),
                EventOptions::anonymous("a"),
            )
            .unwrap();
        assert_eq!(event.name.as_deref(), Some("Install"));
        assert_eq!(event.properties["name"], "Install");
        assert_eq!(event.properties["category"], "Docs");

        let screen = factory
            .screen(None, None, Properties::new(), EventOptions::anonymous("a"))
            .unwrap();
        assert_eq!(screen.event_type, EventType::Screen);
        assert!(screen.properties.is_empty());
    }

    #[test]
    fn test_group_and_alias_validation() {
        let factory = EventFactory::new();
        assert!(factory
            .group("", Properties::new(), EventOptions::user("u"))
            .is_err());
        let group = factory
            .group("org-1", Properties::new(), EventOptions::user("u"))
            .unwrap();
        assert_eq!(group.group_id.as_deref(), Some("org-1"));

        assert!(factory.alias("new", "", EventOptions::default()).is_err());
        let alias = factory.alias("new", "old", EventOptions::default()).unwrap();
        assert_eq!(alias.user_id.as_deref(), Some("new"));
        assert_eq!(alias.previous_id.as_deref(), Some("old"));
    }

    #[test]
    fn test_explicit_message_id_is_kept() {
        let factory = EventFactory::new();
        let options = EventOptions {
            message_id: Some("fixed-id".to_string()),
            ..EventOptions::user("u")
        };
        let event = factory.track("E", Properties::new(), options).unwrap();
        assert_eq!(event.message_id, "fixed-id");
    }
}
