//! 原始事件到时序数据点的转换
//!
//! measurement 合并、标签/字段推导、基数控制，最后交给 [`SchemaOptimizer`]。

use chrono::Utc;
use hass_types::{EventSource, RawEvent, TelemetryEvent};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use crate::model::{FieldValue, PointError, TelemetryPoint, MAX_TAG_VALUE_LENGTH};
use crate::optimizer::compress::{fit_tag_value, hash_value, sanitize_key, short_hash};
use crate::optimizer::{OptimizerConfig, SchemaOptimizer};

/// 常见属性键，其余属性归入 `attributes_custom`
pub const COMMON_ATTRIBUTES: &[&str] = &[
    "friendly_name",
    "unit_of_measurement",
    "device_class",
    "icon",
    "assumed_state",
    "supported_features",
];

/// 合并后的规范 measurement
pub const CANONICAL_MEASUREMENTS: &[&str] = &[
    "ha_entities",
    "ha_services",
    "ha_automations",
    "ha_devices",
    "ha_system",
    "ha_metrics",
    "ha_events",
];

/// 属性值原样保留的最大长度
pub const ATTRIBUTE_PASSTHROUGH_LENGTH: usize = 256;

/// 属性值以 JSON 字符串保留的最大长度，超出则哈希
pub const ATTRIBUTE_JSON_LENGTH: usize = 512;

/// entity_group 的最大长度
pub const MAX_ENTITY_GROUP_LENGTH: usize = 32;

static RE_ENTITY_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+\.([A-Za-z0-9_]+)_[A-Za-z0-9]+$").unwrap());

/// 转换错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransformError {
    #[error("cannot derive a measurement for event '{0}'")]
    UnmappableMeasurement(String),

    #[error("invalid point: {0}")]
    Point(#[from] PointError),
}

/// 转换器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    /// 是否将事件合并到少量规范 measurement
    pub enable_consolidation: bool,

    /// 是否经过 SchemaOptimizer
    pub enable_optimization: bool,

    /// 标签值长度超过阈值时改写为 `<key>_hash`
    pub hash_thresholds: BTreeMap<String, usize>,

    pub optimizer: OptimizerConfig,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        let hash_thresholds = [("entity_id", 1000), ("context_id", 50), ("user_id", 100)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        Self {
            enable_consolidation: true,
            enable_optimization: true,
            hash_thresholds,
            optimizer: OptimizerConfig::default(),
        }
    }
}

/// 转换统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransformerStats {
    pub events_processed: u64,
    pub points_created: u64,
    pub transform_errors: u64,
    pub storage_saved_bytes: u64,
    pub total_optimization_score: f64,
}

impl TransformerStats {
    pub fn avg_optimization_score(&self) -> f64 {
        if self.points_created == 0 {
            return 0.0;
        }
        self.total_optimization_score / self.points_created as f64
    }
}

/// 事件名/候选 measurement 到规范 measurement 的映射
pub fn consolidate_measurement(name: &str) -> &'static str {
    match name {
        "state_changed" => "ha_entities",
        "call_service" => "ha_services",
        "automation_triggered" | "automation_reloaded" | "script_started" => "ha_automations",
        "device_registry_updated" | "device_tracker_new_device" | "device_tracker_see" => {
            "ha_devices"
        }
        "homeassistant_start" | "homeassistant_started" | "homeassistant_stop"
        | "homeassistant_final_write" | "component_loaded" | "core_config_updated" => "ha_system",
        "ha_sensor" | "ha_climate" | "ha_weather" => "ha_metrics",
        other if other.starts_with("ha_") => "ha_entities",
        _ => "ha_events",
    }
}

/// WebSocket 事件类别
pub fn event_category(event_type: &str) -> &'static str {
    match consolidate_measurement(event_type) {
        "ha_entities" => "state",
        "ha_services" => "service",
        "ha_automations" => "automation",
        "ha_devices" => "device",
        "ha_system" => "system",
        _ => "other",
    }
}

/// 由 entity_id 推导实体分组：对象名去掉最后一个 `_` 之后的部分
pub fn entity_group(entity_id: &str) -> Option<String> {
    let group = RE_ENTITY_GROUP.captures(entity_id)?.get(1)?.as_str();
    let valid = group.len() <= MAX_ENTITY_GROUP_LENGTH
        && group.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| group.to_string())
}

/// 状态值的数值表示：布尔类状态映射为 1/0，否则尝试解析浮点数
pub fn state_numeric(state: &str) -> Option<f64> {
    match state.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "open" | "home" | "yes" | "active" | "unlocked" => Some(1.0),
        "off" | "false" | "closed" | "not_home" | "no" | "inactive" | "locked" => Some(0.0),
        other => other.parse::<f64>().ok().filter(|f| f.is_finite()),
    }
}

fn measurement_token(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// 单个属性值的优化：短值原样保留，较长值转为截断到 512 字符的 JSON 字符串，否则哈希
fn optimize_attribute(value: &Value) -> Value {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let len = text.chars().count();
    if len <= ATTRIBUTE_PASSTHROUGH_LENGTH {
        value.clone()
    } else if len <= ATTRIBUTE_JSON_LENGTH {
        Value::String(text)
    } else {
        Value::String(hash_value(&text))
    }
}

/// 事件携带的非空属性个数，即随数据点保留的元数据规模
fn attribute_count(event: &RawEvent) -> usize {
    match event.fields().get("attributes") {
        Some(Value::Object(attributes)) => attributes.values().filter(|v| !v.is_null()).count(),
        _ => 0,
    }
}

fn to_field_value(value: &Value) -> Option<FieldValue> {
    match value {
        Value::Null => None,
        Value::Array(_) | Value::Object(_) => Some(FieldValue::Str(value.to_string())),
        scalar => FieldValue::from_json(scalar),
    }
}

/// 优化评分：从 1.0 开始，按标签/字段长度与元数据规模扣分，最低为 0
pub fn optimization_score(
    tags: &BTreeMap<String, String>,
    fields: &BTreeMap<String, FieldValue>,
    metadata_keys: usize,
) -> f64 {
    let mut score = 1.0;
    for value in tags.values() {
        let len = value.chars().count();
        if len > 64 {
            score -= 0.1;
        } else if len > 32 {
            score -= 0.05;
        }
    }
    for value in fields.values() {
        if let FieldValue::Str(s) = value {
            let len = s.chars().count();
            if len > 256 {
                score -= 0.1;
            } else if len > 128 {
                score -= 0.05;
            }
        }
    }
    if metadata_keys > 10 {
        score -= 0.1;
    }
    f64::max(score, 0.0)
}

/// 事件到数据点的转换器
#[derive(Debug)]
pub struct EventToPointTransformer {
    config: TransformerConfig,
    optimizer: SchemaOptimizer,
    stats: TransformerStats,
}

impl Default for EventToPointTransformer {
    fn default() -> Self {
        Self::new(TransformerConfig::default())
    }
}

impl EventToPointTransformer {
    pub fn new(config: TransformerConfig) -> Self {
        Self {
            optimizer: SchemaOptimizer::new(config.optimizer.clone()),
            config,
            stats: TransformerStats::default(),
        }
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    pub fn stats(&self) -> &TransformerStats {
        &self.stats
    }

    pub fn optimizer(&self) -> &SchemaOptimizer {
        &self.optimizer
    }

    pub fn optimizer_mut(&mut self) -> &mut SchemaOptimizer {
        &mut self.optimizer
    }

    /// 转换一个原始事件
    pub fn transform(&mut self, event: &RawEvent) -> Result<TelemetryPoint, TransformError> {
        self.stats.events_processed += 1;
        match self.build_point(event) {
            Ok(point) => {
                self.stats.points_created += 1;
                Ok(point)
            }
            Err(e) => {
                self.stats.transform_errors += 1;
                debug!(
                    event_type = %event.event_type(),
                    error = %e,
                    "Event transformation failed"
                );
                Err(e)
            }
        }
    }

    fn build_point(&mut self, event: &RawEvent) -> Result<TelemetryPoint, TransformError> {
        let measurement = self.measurement_for(event)?;
        let raw_tags = self.derive_tags(event);
        let fields = self.derive_fields(event);

        let score = optimization_score(&raw_tags, &fields, attribute_count(event));
        let tags = self.cap_tags(raw_tags);
        let timestamp = event.timestamp().unwrap_or_else(Utc::now);

        let point = TelemetryPoint::new(measurement, timestamp, tags, fields)?;
        let saved = event.encoded_len().saturating_sub(point.size_estimate());

        let point = point
            .with_metadata("source", json!(event.source().as_str()))
            .with_metadata("event_type", json!(event.event_type()))
            .with_metadata("optimization_score", json!(score))
            .with_metadata("storage_saved_bytes", json!(saved))
            .with_metadata("transformed_at", json!(Utc::now()));

        self.stats.total_optimization_score += score;
        self.stats.storage_saved_bytes += saved as u64;

        if self.config.enable_optimization {
            Ok(self.optimizer.optimize_point(&point)?)
        } else {
            Ok(point)
        }
    }

    fn measurement_for(&self, event: &RawEvent) -> Result<String, TransformError> {
        let candidate = match event.source() {
            EventSource::Mqtt => event
                .domain()
                .filter(|d| !d.is_empty())
                .map(|d| format!("ha_{}", measurement_token(&d))),
            EventSource::WebSocket => {
                let event_type = event.event_type();
                (!event_type.is_empty()).then(|| measurement_token(event_type))
            }
        };
        let Some(candidate) = candidate else {
            return Err(TransformError::UnmappableMeasurement(
                event.event_type().to_string(),
            ));
        };

        if self.config.enable_consolidation {
            return Ok(consolidate_measurement(&candidate).to_string());
        }

        match event.source() {
            EventSource::Mqtt => Ok(candidate),
            EventSource::WebSocket => Ok(format!("ha_{}", candidate)),
        }
    }

    fn derive_tags(&self, event: &RawEvent) -> BTreeMap<String, String> {
        let mut tags: BTreeMap<String, String> = event
            .tags()
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .collect();

        tags.insert("source".to_string(), event.source().as_str().to_string());

        match event {
            RawEvent::WebSocket(ws) => {
                tags.insert(
                    "event_category".to_string(),
                    event_category(&ws.event_type).to_string(),
                );
            }
            RawEvent::Mqtt(mqtt) => {
                let entity_type = mqtt
                    .attributes
                    .as_ref()
                    .and_then(|a| a.get("device_class"))
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .or_else(|| event.domain());
                if let Some(entity_type) = entity_type {
                    tags.insert("entity_type".to_string(), entity_type);
                }
            }
        }

        if let Some(group) = event.entity_id().as_deref().and_then(entity_group) {
            tags.insert("entity_group".to_string(), group);
        }

        tags
    }

    /// 按键的哈希阈值改写为 `<key>_hash`，其余超长值哈希后保留原键
    fn cap_tags(&self, tags: BTreeMap<String, String>) -> BTreeMap<String, String> {
        tags.into_iter()
            .map(|(key, value)| {
                let len = value.chars().count();
                if let Some(threshold) = self.config.hash_thresholds.get(&key) {
                    if len > (*threshold).min(MAX_TAG_VALUE_LENGTH) {
                        return (format!("{}_hash", key), short_hash(&value));
                    }
                }
                (sanitize_key(&key), fit_tag_value(&value))
            })
            .collect()
    }

    fn derive_fields(&self, event: &RawEvent) -> BTreeMap<String, FieldValue> {
        let raw = event.fields();
        let mut fields: BTreeMap<String, FieldValue> = BTreeMap::new();

        if let Some(state) = raw.get("state") {
            let text = match state {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if let Some(numeric) = state_numeric(&text) {
                fields.insert("state_numeric".to_string(), FieldValue::Float(numeric));
            }
            fields.insert("state".to_string(), FieldValue::Str(text));
        }

        if let Some(Value::Object(attributes)) = raw.get("attributes") {
            let mut common = Map::new();
            let mut custom = Map::new();
            for (key, value) in attributes {
                if value.is_null() {
                    continue;
                }
                let optimized = optimize_attribute(value);
                if COMMON_ATTRIBUTES.contains(&key.as_str()) {
                    common.insert(key.clone(), optimized);
                } else {
                    custom.insert(key.clone(), optimized);
                }
            }
            if !common.is_empty() {
                fields.insert(
                    "attributes_common".to_string(),
                    FieldValue::Str(Value::Object(common).to_string()),
                );
            }
            if !custom.is_empty() {
                fields.insert(
                    "attributes_custom".to_string(),
                    FieldValue::Str(Value::Object(custom).to_string()),
                );
            }
        }

        for (key, value) in &raw {
            if key == "state" || key == "attributes" {
                continue;
            }
            if let Some(field) = to_field_value(&optimize_attribute(value)) {
                fields.insert(sanitize_key(key), field);
            }
        }

        if fields.is_empty() {
            fields.insert(
                "event_type".to_string(),
                FieldValue::Str(event.event_type().to_string()),
            );
        }

        fields
    }
}
