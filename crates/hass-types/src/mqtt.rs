use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::event::{parse_timestamp, scalar_to_string, EventError, EventSource, TelemetryEvent};

/// Home Assistant MQTT statestream 主题前缀
pub const TOPIC_PREFIX: &str = "homeassistant";

/// MQTT 状态事件
///
/// 主题格式：`homeassistant/<domain>/<entity_id>/state`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttEvent {
    pub topic: String,
    pub payload: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub attributes: Option<Map<String, Value>>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MqttEvent {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            state: None,
            domain: None,
            entity_id: None,
            attributes: None,
            timestamp: None,
        }
    }

    /// 从 MQTT PUBLISH 报文构造事件
    ///
    /// payload 为 JSON 对象时读取 `state`、`attributes`、`timestamp`/`last_updated`，
    /// 否则整个 payload 作为状态值。
    pub fn from_publish(topic: &str, payload: &[u8]) -> Result<Self, EventError> {
        let (domain, entity_id) = parse_topic(topic)
            .ok_or_else(|| EventError::InvalidTopic(topic.to_string()))?;

        let text = std::str::from_utf8(payload)
            .map_err(|e| EventError::InvalidPayload(e.to_string()))?;

        let mut event = MqttEvent::new(topic, text);
        event.domain = Some(domain);
        event.entity_id = Some(entity_id);

        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(obj)) => {
                event.state = obj.get("state").and_then(scalar_to_string);
                event.attributes = obj
                    .get("attributes")
                    .and_then(|v| v.as_object())
                    .cloned();
                event.timestamp = obj
                    .get("timestamp")
                    .or_else(|| obj.get("last_updated"))
                    .and_then(parse_timestamp);
            }
            _ => {
                event.state = Some(text.trim().to_string());
            }
        }

        Ok(event)
    }

    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// 主题中的最后一段（通常是 `state`）
    pub fn topic_suffix(&self) -> Option<&str> {
        self.topic.rsplit('/').next().filter(|s| !s.is_empty())
    }
}

/// 解析 `homeassistant/<domain>/<object_id>/state`，返回 (domain, entity_id)
pub fn parse_topic(topic: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 3 || parts[0] != TOPIC_PREFIX {
        return None;
    }

    let domain = parts[1];
    let object = parts[2];
    if domain.is_empty() || object.is_empty() {
        return None;
    }

    let entity_id = if object.contains('.') {
        object.to_string()
    } else {
        format!("{}.{}", domain, object)
    };

    Some((domain.to_string(), entity_id))
}

impl TelemetryEvent for MqttEvent {
    fn source(&self) -> EventSource {
        EventSource::Mqtt
    }

    fn event_type(&self) -> &str {
        "state_changed"
    }

    fn entity_id(&self) -> Option<String> {
        self.entity_id
            .clone()
            .or_else(|| parse_topic(&self.topic).map(|(_, id)| id))
    }

    fn domain(&self) -> Option<String> {
        self.domain
            .clone()
            .or_else(|| parse_topic(&self.topic).map(|(domain, _)| domain))
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    fn tags(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        if let Some(domain) = self.domain() {
            tags.insert("domain".to_string(), domain);
        }
        if let Some(entity_id) = self.entity_id() {
            tags.insert("entity_id".to_string(), entity_id);
        }
        tags
    }

    fn fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        let state = self
            .state
            .clone()
            .unwrap_or_else(|| self.payload.trim().to_string());
        fields.insert("state".to_string(), Value::String(state));
        if let Some(attributes) = &self.attributes {
            fields.insert("attributes".to_string(), Value::Object(attributes.clone()));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_topic() {
        let (domain, entity) = parse_topic("homeassistant/sensor/outdoor_temp/state").unwrap();
        assert_eq!(domain, "sensor");
        assert_eq!(entity, "sensor.outdoor_temp");

        assert!(parse_topic("zigbee2mqtt/bulb").is_none());
        assert!(parse_topic("homeassistant//x/state").is_none());
    }

    #[test]
    fn test_from_publish_plain_payload() {
        let event = MqttEvent::from_publish("homeassistant/light/kitchen/state", b" on ").unwrap();
        assert_eq!(event.state.as_deref(), Some("on"));
        assert_eq!(event.entity_id().as_deref(), Some("light.kitchen"));
        assert_eq!(event.domain().as_deref(), Some("light"));
    }

    #[test]
    fn test_from_publish_json_payload() {
        let payload = br#"{"state": 21.5, "attributes": {"unit_of_measurement": "C"}, "last_updated": "2024-05-01T10:00:00Z"}"#;
        let event = MqttEvent::from_publish("homeassistant/sensor/temp/state", payload).unwrap();
        assert_eq!(event.state.as_deref(), Some("21.5"));
        assert!(event.attributes.is_some());
        assert!(event.timestamp.is_some());

        let fields = event.fields();
        assert_eq!(fields["state"], "21.5");
        assert!(fields.contains_key("attributes"));
    }

    #[test]
    fn test_from_publish_rejects_foreign_topic() {
        assert!(MqttEvent::from_publish("devices/abc", b"1").is_err());
    }
}
