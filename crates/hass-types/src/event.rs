use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::mqtt::MqttEvent;
use crate::websocket::WebSocketEvent;

/// 事件解析错误
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Invalid MQTT topic: {0}")]
    InvalidTopic(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 事件来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Mqtt,
    WebSocket,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mqtt => "mqtt",
            Self::WebSocket => "websocket",
        }
    }
}

/// Home Assistant 事件的统一访问接口
///
/// MQTT 与 WebSocket 两种事件都通过这组方法暴露标签候选、字段和时间戳，
/// 转换器只依赖这个接口。
pub trait TelemetryEvent {
    fn source(&self) -> EventSource;

    /// 事件类型，MQTT 状态消息固定为 `state_changed`
    fn event_type(&self) -> &str;

    fn entity_id(&self) -> Option<String>;

    fn domain(&self) -> Option<String>;

    fn timestamp(&self) -> Option<DateTime<Utc>>;

    /// 原始标签候选：domain、entity_id、context_id、user_id 等
    fn tags(&self) -> BTreeMap<String, String>;

    /// 原始字段：`state`、`attributes` 以及其他标量数据
    fn fields(&self) -> Map<String, Value>;
}

/// 原始事件（MQTT 或 WebSocket）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawEvent {
    Mqtt(MqttEvent),
    WebSocket(WebSocketEvent),
}

impl RawEvent {
    /// 从 JSON 文本解析事件，按字段形状区分两种变体
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(json)?)
    }

    /// 近似原始大小（JSON 序列化后的字节数）
    pub fn encoded_len(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }
}

impl From<MqttEvent> for RawEvent {
    fn from(event: MqttEvent) -> Self {
        RawEvent::Mqtt(event)
    }
}

impl From<WebSocketEvent> for RawEvent {
    fn from(event: WebSocketEvent) -> Self {
        RawEvent::WebSocket(event)
    }
}

impl TelemetryEvent for RawEvent {
    fn source(&self) -> EventSource {
        match self {
            RawEvent::Mqtt(e) => e.source(),
            RawEvent::WebSocket(e) => e.source(),
        }
    }

    fn event_type(&self) -> &str {
        match self {
            RawEvent::Mqtt(e) => e.event_type(),
            RawEvent::WebSocket(e) => e.event_type(),
        }
    }

    fn entity_id(&self) -> Option<String> {
        match self {
            RawEvent::Mqtt(e) => e.entity_id(),
            RawEvent::WebSocket(e) => e.entity_id(),
        }
    }

    fn domain(&self) -> Option<String> {
        match self {
            RawEvent::Mqtt(e) => e.domain(),
            RawEvent::WebSocket(e) => e.domain(),
        }
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            RawEvent::Mqtt(e) => e.timestamp(),
            RawEvent::WebSocket(e) => e.timestamp(),
        }
    }

    fn tags(&self) -> BTreeMap<String, String> {
        match self {
            RawEvent::Mqtt(e) => e.tags(),
            RawEvent::WebSocket(e) => e.tags(),
        }
    }

    fn fields(&self) -> Map<String, Value> {
        match self {
            RawEvent::Mqtt(e) => e.fields(),
            RawEvent::WebSocket(e) => e.fields(),
        }
    }
}

/// 将标量 JSON 值转换为状态字符串
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// 解析 RFC 3339 时间戳
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_untagged_dispatch() {
        let mqtt = RawEvent::from_json(
            r#"{"topic":"homeassistant/light/kitchen/state","payload":"on"}"#,
        )
        .unwrap();
        assert_eq!(mqtt.source(), EventSource::Mqtt);

        let ws = RawEvent::from_json(
            r#"{"event_type":"call_service","data":{"domain":"light","service":"turn_on"}}"#,
        )
        .unwrap();
        assert_eq!(ws.source(), EventSource::WebSocket);
        assert_eq!(ws.event_type(), "call_service");
    }

    #[test]
    fn test_scalar_to_string() {
        assert_eq!(scalar_to_string(&json!(21.5)), Some("21.5".to_string()));
        assert_eq!(scalar_to_string(&json!(true)), Some("true".to_string()));
        assert_eq!(scalar_to_string(&json!({"a": 1})), None);
    }
}
