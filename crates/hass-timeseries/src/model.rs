use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// 标签/字段键的最大长度
pub const MAX_KEY_LENGTH: usize = 64;

/// 标签值的最大长度
pub const MAX_TAG_VALUE_LENGTH: usize = 64;

/// 键中不允许出现的字符
pub const INVALID_KEY_CHARS: &[char] = &['=', ',', '\n', '\r', '\t'];

/// 数据点校验错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PointError {
    #[error("measurement must not be empty")]
    EmptyMeasurement,

    #[error("invalid measurement name '{0}': only alphanumerics, '_' and '-' are allowed")]
    InvalidMeasurement(String),

    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("tag '{key}' value is {len} chars, limit is 64")]
    TagValueTooLong { key: String, len: usize },

    #[error("tag '{0}' has an empty value")]
    EmptyTagValue(String),

    #[error("field '{0}' holds a non-finite float")]
    NonFiniteField(String),
}

/// 字段值（标量）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl FieldValue {
    /// 从 JSON 标量转换；null、数组、对象返回 None
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(FieldValue::Int)
                .or_else(|| n.as_f64().map(FieldValue::Float)),
            Value::String(s) => Some(FieldValue::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Str(s) => Value::String(s.clone()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            FieldValue::Str(s) => s.trim().parse().ok(),
            FieldValue::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// 类型名称，用于模式分析
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Str(_) => "string",
        }
    }

    /// 存储大小估算（字节）
    pub fn size_estimate(&self) -> usize {
        match self {
            FieldValue::Bool(_) => 1,
            FieldValue::Int(_) | FieldValue::Float(_) => 8,
            FieldValue::Str(s) => s.len(),
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

/// 规范化的时序存储记录
///
/// 构造时完成校验，之后不可变；任何修改都会产生新的实例。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedPoint")]
pub struct TelemetryPoint {
    measurement: String,
    timestamp: DateTime<Utc>,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    metadata: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct UncheckedPoint {
    measurement: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

impl TryFrom<UncheckedPoint> for TelemetryPoint {
    type Error = PointError;

    fn try_from(raw: UncheckedPoint) -> Result<Self, Self::Error> {
        Ok(TelemetryPoint::new(raw.measurement, raw.timestamp, raw.tags, raw.fields)?
            .with_metadata_map(raw.metadata))
    }
}

impl TelemetryPoint {
    pub fn new(
        measurement: impl Into<String>,
        timestamp: DateTime<Utc>,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, FieldValue>,
    ) -> Result<Self, PointError> {
        let measurement = measurement.into();
        validate_measurement(&measurement)?;
        for (key, value) in &tags {
            validate_key(key)?;
            validate_tag_value(key, value)?;
        }
        for (key, value) in &fields {
            validate_key(key)?;
            validate_field_value(key, value)?;
        }

        Ok(Self {
            measurement,
            timestamp,
            tags,
            fields,
            metadata: BTreeMap::new(),
        })
    }

    pub fn builder(measurement: impl Into<String>) -> TelemetryPointBuilder {
        TelemetryPointBuilder::new(measurement)
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// 以新的标签集合生成新实例
    pub fn with_tags(&self, tags: BTreeMap<String, String>) -> Result<Self, PointError> {
        let point = TelemetryPoint::new(
            self.measurement.clone(),
            self.timestamp,
            tags,
            self.fields.clone(),
        )?;
        Ok(point.with_metadata_map(self.metadata.clone()))
    }

    /// 以新的字段集合生成新实例
    pub fn with_fields(&self, fields: BTreeMap<String, FieldValue>) -> Result<Self, PointError> {
        let point = TelemetryPoint::new(
            self.measurement.clone(),
            self.timestamp,
            self.tags.clone(),
            fields,
        )?;
        Ok(point.with_metadata_map(self.metadata.clone()))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_metadata_map(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// 存储大小估算（字节）：measurement + 标签 + 字段 + 8 字节时间戳
    pub fn size_estimate(&self) -> usize {
        let tags: usize = self.tags.iter().map(|(k, v)| k.len() + v.len()).sum();
        let fields: usize = self
            .fields
            .iter()
            .map(|(k, v)| k.len() + v.size_estimate())
            .sum();
        self.measurement.len() + tags + fields + 8
    }

    /// 年龄（天，可带小数）
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_seconds() as f64 / 86_400.0
    }
}

/// 数据点构建器
pub struct TelemetryPointBuilder {
    measurement: String,
    timestamp: DateTime<Utc>,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    metadata: BTreeMap<String, Value>,
}

impl TelemetryPointBuilder {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            timestamp: Utc::now(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Result<TelemetryPoint, PointError> {
        Ok(
            TelemetryPoint::new(self.measurement, self.timestamp, self.tags, self.fields)?
                .with_metadata_map(self.metadata),
        )
    }
}

pub fn validate_measurement(measurement: &str) -> Result<(), PointError> {
    if measurement.is_empty() {
        return Err(PointError::EmptyMeasurement);
    }
    if !measurement
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(PointError::InvalidMeasurement(measurement.to_string()));
    }
    Ok(())
}

pub fn validate_key(key: &str) -> Result<(), PointError> {
    if key.is_empty() {
        return Err(PointError::InvalidKey {
            key: key.to_string(),
            reason: "empty".to_string(),
        });
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(PointError::InvalidKey {
            key: key.to_string(),
            reason: format!("longer than {} chars", MAX_KEY_LENGTH),
        });
    }
    if let Some(c) = key.chars().find(|c| INVALID_KEY_CHARS.contains(c)) {
        return Err(PointError::InvalidKey {
            key: key.to_string(),
            reason: format!("contains forbidden character {:?}", c),
        });
    }
    Ok(())
}

pub fn validate_tag_value(key: &str, value: &str) -> Result<(), PointError> {
    if value.is_empty() {
        return Err(PointError::EmptyTagValue(key.to_string()));
    }
    let len = value.chars().count();
    if len > MAX_TAG_VALUE_LENGTH {
        return Err(PointError::TagValueTooLong {
            key: key.to_string(),
            len,
        });
    }
    Ok(())
}

pub fn validate_field_value(key: &str, value: &FieldValue) -> Result<(), PointError> {
    if let FieldValue::Float(f) = value {
        if !f.is_finite() {
            return Err(PointError::NonFiniteField(key.to_string()));
        }
    }
    Ok(())
}
