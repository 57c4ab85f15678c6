//! 值压缩与哈希工具

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::model::{INVALID_KEY_CHARS, MAX_KEY_LENGTH, MAX_TAG_VALUE_LENGTH};

/// 结构化摘要中每个片段的最大长度
pub const SUMMARY_PART_LENGTH: usize = 20;

/// 结构化摘要最多保留的键值对数
pub const SUMMARY_MAX_PARTS: usize = 3;

static RE_ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2})?(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)?")
        .unwrap()
});

static RE_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v?\d+\.\d+(?:\.\d+)?(?:[-+][0-9A-Za-z.]+)?").unwrap());

static RE_PREFIXED_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{2,8}[-_:]\d{1,12}").unwrap());

/// 稳定哈希：sha256 前 16 个十六进制字符
pub fn short_hash(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// `hash_<16hex>`
pub fn hash_value(value: &str) -> String {
    format!("hash_{}", short_hash(value))
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// 结构化值的摘要
///
/// JSON 对象取前几个 `key:value`，JSON 数组取前几个元素，以 `|` 连接；
/// ISO 日期、版本号、前缀编码取匹配的前缀。无法识别时返回 None。
pub fn summarize_structured(value: &str) -> Option<String> {
    match serde_json::from_str::<Value>(value.trim()) {
        Ok(Value::Object(map)) if !map.is_empty() => {
            let parts: Vec<String> = map
                .iter()
                .take(SUMMARY_MAX_PARTS)
                .map(|(k, v)| {
                    format!(
                        "{}:{}",
                        truncate(k, SUMMARY_PART_LENGTH),
                        truncate(&scalar_text(v), SUMMARY_PART_LENGTH)
                    )
                })
                .collect();
            return Some(parts.join("|"));
        }
        Ok(Value::Array(items)) if !items.is_empty() => {
            let parts: Vec<String> = items
                .iter()
                .take(SUMMARY_MAX_PARTS)
                .map(|v| truncate(&scalar_text(v), SUMMARY_PART_LENGTH))
                .collect();
            return Some(parts.join("|"));
        }
        _ => {}
    }

    [&*RE_ISO_DATE, &*RE_VERSION, &*RE_PREFIXED_CODE]
        .iter()
        .find_map(|re| re.find(value))
        .map(|m| m.as_str().to_string())
}

/// 压缩超长值：结构化则取摘要，否则哈希
pub fn compress_value(value: &str) -> String {
    summarize_structured(value).unwrap_or_else(|| hash_value(value))
}

/// 保证标签值满足长度上限，超出则哈希
pub fn fit_tag_value(value: &str) -> String {
    if value.chars().count() > MAX_TAG_VALUE_LENGTH {
        hash_value(value)
    } else {
        value.to_string()
    }
}

/// 清理键：去除非法字符，仍超长则替换为 `key_<16hex>`
pub fn sanitize_key(key: &str) -> String {
    let valid = key.len() <= MAX_KEY_LENGTH && !key.contains(INVALID_KEY_CHARS);
    if valid && !key.is_empty() {
        return key.to_string();
    }

    let stripped: String = key
        .chars()
        .filter(|c| !INVALID_KEY_CHARS.contains(c))
        .collect();

    if stripped.is_empty() || stripped.len() > MAX_KEY_LENGTH {
        format!("key_{}", short_hash(key))
    } else {
        stripped
    }
}

/// 数值按大小分桶
pub fn numeric_bucket(value: f64) -> &'static str {
    if value < 100.0 {
        "low"
    } else if value < 1000.0 {
        "medium"
    } else {
        "high"
    }
}

/// 字符串按长度分桶
pub fn length_bucket(value: &str) -> &'static str {
    let len = value.chars().count();
    if len < 10 {
        "short"
    } else if len < 50 {
        "medium"
    } else {
        "long"
    }
}

/// 高基数值的粗粒度分组标签
pub fn group_label(value: &str) -> &'static str {
    match value.trim().parse::<f64>() {
        Ok(number) if number.is_finite() => numeric_bucket(number),
        _ => length_bucket(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        let a = hash_value("sensor.kitchen_temperature");
        assert_eq!(a, hash_value("sensor.kitchen_temperature"));
        assert_ne!(a, hash_value("sensor.kitchen_humidity"));
        assert_eq!(a.len(), "hash_".len() + 16);
    }

    #[test]
    fn test_summarize_json_object() {
        let summary =
            summarize_structured(r#"{"a":"x","bbbbbbbbbbbbbbbbbbbbbbbbbb":1,"c":true,"d":4}"#)
                .unwrap();
        assert_eq!(summary, "a:x|bbbbbbbbbbbbbbbbbbbb:1|c:true");
    }

    #[test]
    fn test_summarize_patterns() {
        assert_eq!(
            summarize_structured("2024-05-01T10:00:00Z plus a long tail").as_deref(),
            Some("2024-05-01T10:00:00Z")
        );
        assert_eq!(
            summarize_structured("v2024.5.1 release notes").as_deref(),
            Some("v2024.5.1")
        );
        assert_eq!(
            summarize_structured("ERR-4021 while polling").as_deref(),
            Some("ERR-4021")
        );
        assert_eq!(summarize_structured("just some prose"), None);
    }

    #[test]
    fn test_compress_falls_back_to_hash() {
        let long = "x".repeat(2000);
        assert!(compress_value(&long).starts_with("hash_"));
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("temperature"), "temperature");
        assert_eq!(sanitize_key("a=b,c"), "abc");
        let long = "k".repeat(80);
        assert!(sanitize_key(&long).starts_with("key_"));
        let stripped = format!("{}{}", "k".repeat(60), "=".repeat(20));
        assert_eq!(sanitize_key(&stripped), "k".repeat(60));
    }

    #[test]
    fn test_buckets() {
        assert_eq!(group_label("42"), "low");
        assert_eq!(group_label("420"), "medium");
        assert_eq!(group_label("4200"), "high");
        assert_eq!(group_label("light.a"), "short");
        assert_eq!(group_label("light.living_room_main"), "medium");
        assert_eq!(group_label(&"x".repeat(60)), "long");
    }
}
