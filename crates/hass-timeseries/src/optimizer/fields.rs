use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

use super::compress::{compress_value, sanitize_key};
use super::{HistoryLog, OptimizationRecord};
use crate::model::FieldValue;

static RE_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

static RE_DECIMAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?(?:\d+(?:\.\d*)?|\.\d+)$").unwrap());

/// 单次字段优化统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldStats {
    pub original_count: usize,
    pub optimized_count: usize,
    pub coerced: usize,
    pub compressed: usize,
    pub keys_sanitized: usize,
    pub nulls_dropped: usize,
    /// 清理后与其他字段重名的键数
    pub key_collisions: usize,
    /// 每个字段的大小节省比例，0 表示未变化
    pub scores: BTreeMap<String, f64>,
}

impl FieldStats {
    pub fn changed(&self) -> bool {
        self.coerced
            + self.compressed
            + self.keys_sanitized
            + self.nulls_dropped
            + self.key_collisions
            > 0
    }
}

/// 累计字段优化统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldTotals {
    pub calls: u64,
    pub fields_processed: u64,
    pub fields_coerced: u64,
    pub fields_compressed: u64,
    pub keys_sanitized: u64,
    pub nulls_dropped: u64,
}

/// 字符串的类型推断：布尔、纯数字整数、带符号或小数点的浮点数
pub fn coerce_string(value: &str) -> Option<FieldValue> {
    if value.eq_ignore_ascii_case("true") {
        return Some(FieldValue::Bool(true));
    }
    if value.eq_ignore_ascii_case("false") {
        return Some(FieldValue::Bool(false));
    }
    if RE_INTEGER.is_match(value) {
        return value.parse::<i64>().ok().map(FieldValue::Int);
    }
    if RE_DECIMAL.is_match(value) {
        return value
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(FieldValue::Float);
    }
    None
}

fn json_size(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => s.len(),
        other => other.to_string().len(),
    }
}

/// 字段优化器：类型推断、键清理、超长字符串压缩
#[derive(Debug)]
pub struct FieldOptimizer {
    compression_threshold: usize,
    history: HistoryLog,
    totals: FieldTotals,
}

impl FieldOptimizer {
    pub fn new(compression_threshold: usize, history_limit: usize) -> Self {
        Self {
            compression_threshold,
            history: HistoryLog::new(history_limit),
            totals: FieldTotals::default(),
        }
    }

    pub fn totals(&self) -> &FieldTotals {
        &self.totals
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// 优化字段集合
    ///
    /// null 与空数组被丢弃；非空数组和对象序列化为 JSON 字符串。
    pub fn optimize_fields(
        &mut self,
        fields: &Map<String, Value>,
    ) -> (BTreeMap<String, FieldValue>, FieldStats) {
        let mut optimized = BTreeMap::new();
        let mut stats = FieldStats {
            original_count: fields.len(),
            ..FieldStats::default()
        };

        for (key, value) in fields {
            let clean_key = sanitize_key(key);
            if clean_key != *key {
                stats.keys_sanitized += 1;
            }

            let converted = match value {
                Value::Null => None,
                Value::Array(items) if items.is_empty() => None,
                Value::String(s) => match coerce_string(s) {
                    Some(coerced) => {
                        stats.coerced += 1;
                        Some(coerced)
                    }
                    None => Some(FieldValue::Str(s.clone())),
                },
                Value::Array(_) | Value::Object(_) => {
                    stats.coerced += 1;
                    Some(FieldValue::Str(value.to_string()))
                }
                scalar => FieldValue::from_json(scalar),
            };

            let Some(mut converted) = converted else {
                stats.nulls_dropped += 1;
                continue;
            };

            if let FieldValue::Str(s) = &converted {
                if s.len() > self.compression_threshold {
                    converted = FieldValue::Str(compress_value(s));
                    stats.compressed += 1;
                }
            }

            // 重名时原样合法的键优先，清理得到的键让位
            if optimized.contains_key(&clean_key) {
                stats.key_collisions += 1;
                let keep_existing = clean_key != *key;
                warn!(
                    key = %key,
                    sanitized = %clean_key,
                    kept = if keep_existing { "existing" } else { "original" },
                    "Sanitized field key collides with another field"
                );
                if keep_existing {
                    continue;
                }
            }

            let before = json_size(value);
            let after = converted.size_estimate();
            let score = if before > 0 {
                (1.0 - after as f64 / before as f64).clamp(0.0, 1.0)
            } else {
                0.0
            };
            stats.scores.insert(clean_key.clone(), score);
            optimized.insert(clean_key, converted);
        }

        stats.optimized_count = optimized.len();

        self.totals.calls += 1;
        self.totals.fields_processed += fields.len() as u64;
        self.totals.fields_coerced += stats.coerced as u64;
        self.totals.fields_compressed += stats.compressed as u64;
        self.totals.keys_sanitized += stats.keys_sanitized as u64;
        self.totals.nulls_dropped += stats.nulls_dropped as u64;

        if stats.changed() {
            self.history.push(OptimizationRecord {
                kind: "fields",
                at: Utc::now(),
                original_count: stats.original_count,
                optimized_count: stats.optimized_count,
                changes: stats.coerced
                    + stats.compressed
                    + stats.keys_sanitized
                    + stats.nulls_dropped
                    + stats.key_collisions,
            });
        }

        (optimized, stats)
    }

    /// 对已校验数据点的字段做同样的优化
    pub fn optimize_point_fields(
        &mut self,
        fields: &BTreeMap<String, FieldValue>,
    ) -> (BTreeMap<String, FieldValue>, FieldStats) {
        let json: Map<String, Value> = fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        self.optimize_fields(&json)
    }
}
