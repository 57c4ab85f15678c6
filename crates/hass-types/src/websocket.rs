use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::event::{parse_timestamp, scalar_to_string, EventSource, TelemetryEvent};

/// data 中由转换器单独处理、不作为普通字段透传的键
const RESERVED_DATA_KEYS: &[&str] = &[
    "entity_id",
    "domain",
    "new_state",
    "old_state",
    "state",
    "attributes",
];

/// 事件上下文
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventContext {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// WebSocket API 事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketEvent {
    pub event_type: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub attributes: Option<Map<String, Value>>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context: Option<EventContext>,
}

impl WebSocketEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            entity_id: None,
            domain: None,
            data: Map::new(),
            attributes: None,
            timestamp: None,
            context: None,
        }
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = Some(context);
        self
    }

    fn new_state(&self) -> Option<&Map<String, Value>> {
        self.data.get("new_state").and_then(|v| v.as_object())
    }

    /// 状态值：优先 `new_state.state`，其次 `data.state`
    pub fn state(&self) -> Option<String> {
        self.new_state()
            .and_then(|s| s.get("state"))
            .or_else(|| self.data.get("state"))
            .and_then(scalar_to_string)
    }

    /// 属性：优先顶层 `attributes`，其次 `new_state.attributes`，最后 `data.attributes`
    pub fn resolved_attributes(&self) -> Option<Map<String, Value>> {
        self.attributes
            .clone()
            .or_else(|| {
                self.new_state()
                    .and_then(|s| s.get("attributes"))
                    .and_then(|v| v.as_object())
                    .cloned()
            })
            .or_else(|| self.data.get("attributes").and_then(|v| v.as_object()).cloned())
    }
}

impl TelemetryEvent for WebSocketEvent {
    fn source(&self) -> EventSource {
        EventSource::WebSocket
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn entity_id(&self) -> Option<String> {
        self.entity_id.clone().or_else(|| {
            self.data
                .get("entity_id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
    }

    fn domain(&self) -> Option<String> {
        self.domain
            .clone()
            .or_else(|| {
                self.data
                    .get("domain")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .or_else(|| {
                self.entity_id()
                    .and_then(|id| id.split_once('.').map(|(d, _)| d.to_string()))
            })
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.or_else(|| {
            self.data
                .get("time_fired")
                .and_then(parse_timestamp)
                .or_else(|| {
                    self.new_state()
                        .and_then(|s| s.get("last_updated"))
                        .and_then(parse_timestamp)
                })
        })
    }

    fn tags(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        if let Some(domain) = self.domain() {
            tags.insert("domain".to_string(), domain);
        }
        if let Some(entity_id) = self.entity_id() {
            tags.insert("entity_id".to_string(), entity_id);
        }
        if let Some(context) = &self.context {
            if let Some(id) = &context.id {
                tags.insert("context_id".to_string(), id.clone());
            }
            if let Some(user_id) = &context.user_id {
                tags.insert("user_id".to_string(), user_id.clone());
            }
        }
        tags
    }

    fn fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(state) = self.state() {
            fields.insert("state".to_string(), Value::String(state));
        }
        if let Some(attributes) = self.resolved_attributes() {
            fields.insert("attributes".to_string(), Value::Object(attributes));
        }
        for (key, value) in &self.data {
            if RESERVED_DATA_KEYS.contains(&key.as_str()) || fields.contains_key(key) {
                continue;
            }
            fields.insert(key.clone(), value.clone());
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_changed_accessors() {
        let event = WebSocketEvent::new("state_changed")
            .with_data("entity_id", json!("sensor.kitchen_temperature"))
            .with_data(
                "new_state",
                json!({
                    "state": "21.5",
                    "attributes": {"unit_of_measurement": "°C"},
                    "last_updated": "2024-05-01T10:00:00+00:00"
                }),
            );

        assert_eq!(event.entity_id().as_deref(), Some("sensor.kitchen_temperature"));
        assert_eq!(event.domain().as_deref(), Some("sensor"));
        assert_eq!(event.state().as_deref(), Some("21.5"));
        assert!(event.timestamp().is_some());

        let fields = event.fields();
        assert_eq!(fields["state"], "21.5");
        assert!(!fields.contains_key("new_state"));
    }

    #[test]
    fn test_call_service_passes_scalar_data() {
        let event = WebSocketEvent::new("call_service")
            .with_data("domain", json!("light"))
            .with_data("service", json!("turn_on"))
            .with_context(EventContext {
                id: Some("01HXCTX".to_string()),
                user_id: Some("abc123".to_string()),
                parent_id: None,
            });

        assert_eq!(event.domain().as_deref(), Some("light"));
        let tags = event.tags();
        assert_eq!(tags.get("context_id").map(String::as_str), Some("01HXCTX"));
        assert_eq!(tags.get("user_id").map(String::as_str), Some("abc123"));
        assert_eq!(event.fields()["service"], "turn_on");
    }
}
