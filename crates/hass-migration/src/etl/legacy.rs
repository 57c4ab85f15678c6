use hass_timeseries::optimizer::compress::sanitize_key;
use hass_timeseries::{FieldValue, PointError, TelemetryPoint};
use hass_types::{RawEvent, WebSocketEvent};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// InfluxDB 集成为字符串属性追加的后缀
const STRING_ATTRIBUTE_SUFFIX: &str = "_str";

/// 新模式 measurement 的统一前缀
pub const NEW_SCHEMA_PREFIX: &str = "ha_";

/// 转换后仍保留到旧模式的标签
const LEGACY_TAGS: &[&str] = &["domain", "entity_id", "entity_id_hash"];

/// measurement 是否属于新模式
pub fn is_new_schema(measurement: &str) -> bool {
    measurement.starts_with(NEW_SCHEMA_PREFIX)
}

/// 旧模式数据点转为 `state_changed` 事件
///
/// 旧模式：measurement 为 domain 或单位，标签 `domain`/`entity_id`，
/// 字段 `state`/`value`，其余字段视为属性。
pub fn legacy_point_to_event(point: &TelemetryPoint) -> RawEvent {
    let mut event = WebSocketEvent::new("state_changed").with_timestamp(point.timestamp());

    if let Some(entity_id) = point.tag("entity_id") {
        event = event.with_entity(entity_id);
    }
    let domain = point
        .tag("domain")
        .map(str::to_string)
        .or_else(|| {
            point
                .tag("entity_id")
                .and_then(|id| id.split_once('.'))
                .map(|(domain, _)| domain.to_string())
        });
    if let Some(domain) = domain {
        event = event.with_domain(domain);
    }

    let mut attributes = Map::new();
    for (key, value) in point.fields() {
        match key.as_str() {
            "state" => {
                let state = match value {
                    FieldValue::Str(s) => Value::String(s.clone()),
                    other => Value::String(other.to_json().to_string()),
                };
                event = event.with_data("state", state);
            }
            "value" => {
                event = event.with_data("value", value.to_json());
            }
            other => {
                let name = other.strip_suffix(STRING_ATTRIBUTE_SUFFIX).unwrap_or(other);
                attributes.insert(name.to_string(), value.to_json());
            }
        }
    }

    for (key, value) in point.tags() {
        if key != "entity_id" && key != "domain" {
            attributes.insert(key.clone(), Value::String(value.clone()));
        }
    }

    if !attributes.is_empty() {
        event = event.with_attributes(attributes);
    }

    event.into()
}

/// 新模式数据点还原为旧模式形状
///
/// measurement 取 domain，`state_numeric` 回填为 `value`，
/// `attributes_*` 展开为独立字段，字符串属性带 `_str` 后缀。
pub fn canonical_to_legacy_point(point: &TelemetryPoint) -> Result<TelemetryPoint, PointError> {
    let domain = point.tag("domain").map(str::to_string).or_else(|| {
        point
            .tag("entity_id")
            .and_then(|id| id.split_once('.'))
            .map(|(domain, _)| domain.to_string())
    });

    let mut tags = BTreeMap::new();
    for key in LEGACY_TAGS {
        if let Some(value) = point.tag(key) {
            tags.insert(key.to_string(), value.to_string());
        }
    }
    if let Some(domain) = &domain {
        tags.insert("domain".to_string(), domain.clone());
    }

    let mut fields = BTreeMap::new();
    for (key, value) in point.fields() {
        match key.as_str() {
            "state_numeric" => {
                if !point.fields().contains_key("value") {
                    fields.insert("value".to_string(), value.clone());
                }
            }
            "attributes_common" | "attributes_custom" => {
                let parsed = value
                    .as_str()
                    .and_then(|text| serde_json::from_str::<Map<String, Value>>(text).ok());
                match parsed {
                    Some(attributes) => {
                        for (name, attribute) in attributes {
                            let (name, field) = match attribute {
                                Value::String(s) => (
                                    format!("{}{}", name, STRING_ATTRIBUTE_SUFFIX),
                                    FieldValue::Str(s),
                                ),
                                other => match FieldValue::from_json(&other) {
                                    Some(field) => (name, field),
                                    None => (name, FieldValue::Str(other.to_string())),
                                },
                            };
                            fields.insert(sanitize_key(&name), field);
                        }
                    }
                    None => {
                        fields.insert(key.clone(), value.clone());
                    }
                }
            }
            _ => {
                fields.insert(key.clone(), value.clone());
            }
        }
    }

    let measurement = domain.unwrap_or_else(|| point.measurement().to_string());
    TelemetryPoint::new(measurement, point.timestamp(), tags, fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hass_types::TelemetryEvent;

    #[test]
    fn test_legacy_point_conversion() {
        let point = TelemetryPoint::builder("temperature")
            .tag("domain", "sensor")
            .tag("entity_id", "sensor.kitchen_temperature")
            .field("state", "21.5")
            .field("value", 21.5)
            .field("friendly_name_str", "Kitchen")
            .build()
            .unwrap();

        let event = legacy_point_to_event(&point);
        assert_eq!(event.event_type(), "state_changed");
        assert_eq!(event.entity_id().as_deref(), Some("sensor.kitchen_temperature"));
        assert_eq!(event.domain().as_deref(), Some("sensor"));
        assert_eq!(event.timestamp(), Some(point.timestamp()));

        let fields = event.fields();
        assert_eq!(fields["state"], "21.5");
        assert_eq!(fields["value"], 21.5);
        assert_eq!(fields["attributes"]["friendly_name"], "Kitchen");
    }

    #[test]
    fn test_domain_from_entity_id() {
        let point = TelemetryPoint::builder("light")
            .tag("entity_id", "light.porch")
            .field("state", "on")
            .build()
            .unwrap();

        assert_eq!(legacy_point_to_event(&point).domain().as_deref(), Some("light"));
    }

    #[test]
    fn test_canonical_point_restored_to_legacy_shape() {
        let point = TelemetryPoint::builder("ha_entities")
            .tag("domain", "sensor")
            .tag("entity_id", "sensor.kitchen_temperature")
            .tag("source", "websocket")
            .field("state", "21.5")
            .field("state_numeric", 21.5)
            .field("attributes_common", r#"{"friendly_name":"Kitchen","precision":1}"#)
            .build()
            .unwrap();

        let legacy = canonical_to_legacy_point(&point).unwrap();
        assert_eq!(legacy.measurement(), "sensor");
        assert!(!is_new_schema(legacy.measurement()));
        assert_eq!(legacy.tag("entity_id"), Some("sensor.kitchen_temperature"));
        assert_eq!(legacy.tag("source"), None);
        assert_eq!(legacy.field("value"), Some(&FieldValue::Float(21.5)));
        assert_eq!(
            legacy.field("friendly_name_str"),
            Some(&FieldValue::Str("Kitchen".to_string()))
        );
        assert_eq!(legacy.field("precision"), Some(&FieldValue::Int(1)));
        assert_eq!(legacy.timestamp(), point.timestamp());

        // 再转回事件时属性名还原
        let event = legacy_point_to_event(&legacy);
        assert_eq!(event.fields()["attributes"]["friendly_name"], "Kitchen");
    }
}
