use hass_timeseries::optimizer::compress::short_hash;
use hass_timeseries::{FieldValue, TelemetryPoint};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::MigrationBatch;

/// 必须在迁移后保持一致的字段
pub const ESSENTIAL_FIELDS: &[&str] = &["state", "value"];

/// 批次一致性判定阈值
pub const CONSISTENCY_THRESHOLD: f64 = 0.95;

/// 校验结果中保留的最大问题条数
const MAX_REPORTED_ISSUES: usize = 20;

/// 浮点比较容差
const FLOAT_TOLERANCE: f64 = 1e-9;

/// 批次校验结果
#[derive(Debug, Clone, Serialize)]
pub struct BatchValidation {
    pub batch_id: String,
    pub original_count: usize,
    pub migrated_count: usize,
    pub record_count_match: bool,
    pub records_checked: usize,
    pub consistent_records: usize,
    pub consistency_score: f64,
    pub data_consistency: bool,
    pub issues: Vec<String>,
}

/// 字段值比较：数值按数值比较，其余按文本比较
///
/// 转换会把数字字符串强转为数值，因此 `"21.5"` 与 `21.5` 视为相等。
pub fn values_equivalent(original: &FieldValue, migrated: &FieldValue) -> bool {
    if original == migrated {
        return true;
    }
    match (numeric(original), numeric(migrated)) {
        (Some(a), Some(b)) => (a - b).abs() <= FLOAT_TOLERANCE * a.abs().max(1.0),
        _ => text(original) == text(migrated),
    }
}

fn numeric(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Int(i) => Some(*i as f64),
        FieldValue::Float(f) => Some(*f),
        FieldValue::Str(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        FieldValue::Bool(_) => None,
    }
}

fn text(value: &FieldValue) -> String {
    match value {
        FieldValue::Str(s) => s.to_ascii_lowercase(),
        other => other.to_json().to_string(),
    }
}

/// 比较一对记录，返回发现的问题
pub fn compare_records(original: &TelemetryPoint, migrated: &TelemetryPoint) -> Vec<String> {
    let mut issues = Vec::new();

    if original.timestamp() != migrated.timestamp() {
        issues.push(format!(
            "timestamp mismatch: {} != {}",
            original.timestamp(),
            migrated.timestamp()
        ));
    }

    for field in ESSENTIAL_FIELDS {
        let Some(expected) = original.field(field) else {
            continue;
        };
        match migrated.field(field) {
            None => issues.push(format!("field '{}' missing", field)),
            Some(actual) if !values_equivalent(expected, actual) => issues.push(format!(
                "field '{}' changed: {:?} -> {:?}",
                field, expected, actual
            )),
            Some(_) => {}
        }
    }

    if let Some(entity_id) = original.tag("entity_id") {
        let preserved = migrated.tag("entity_id") == Some(entity_id)
            || migrated.tag("entity_id_hash") == Some(short_hash(entity_id).as_str());
        if !preserved {
            issues.push(format!("entity_id '{}' not preserved", entity_id));
        }
    }

    issues
}

/// 迁移结果校验器
#[derive(Default)]
pub struct MigrationValidator {
    validations: AtomicU64,
    passed: AtomicU64,
}

impl MigrationValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 对齐比较原始批次与迁移批次
    pub fn validate_batch_migration(
        &self,
        original: &MigrationBatch,
        migrated: &MigrationBatch,
    ) -> BatchValidation {
        let original_count = original.records.len();
        let migrated_count = migrated.records.len();
        let record_count_match = original_count == migrated_count;

        let mut issues = Vec::new();
        if !record_count_match {
            issues.push(format!(
                "record count mismatch: {} original, {} migrated",
                original_count, migrated_count
            ));
        }

        let mut consistent = 0usize;
        let pairs = original.records.iter().zip(migrated.records.iter());
        let checked = original_count.min(migrated_count);
        for (index, (before, after)) in pairs.enumerate() {
            let record_issues = compare_records(before, after);
            if record_issues.is_empty() {
                consistent += 1;
            } else {
                for issue in record_issues {
                    if issues.len() < MAX_REPORTED_ISSUES {
                        issues.push(format!("record {}: {}", index, issue));
                    }
                }
            }
        }

        let consistency_score = if checked == 0 {
            if record_count_match {
                1.0
            } else {
                0.0
            }
        } else {
            consistent as f64 / checked as f64
        };
        let data_consistency = consistency_score > CONSISTENCY_THRESHOLD;

        self.validations.fetch_add(1, Ordering::Relaxed);
        if data_consistency {
            self.passed.fetch_add(1, Ordering::Relaxed);
            debug!(
                batch_id = %original.batch_id,
                score = consistency_score,
                "Batch validation passed"
            );
        } else {
            warn!(
                batch_id = %original.batch_id,
                score = consistency_score,
                issues = issues.len(),
                "Batch validation failed"
            );
        }

        BatchValidation {
            batch_id: original.batch_id.clone(),
            original_count,
            migrated_count,
            record_count_match,
            records_checked: checked,
            consistent_records: consistent,
            consistency_score,
            data_consistency,
            issues,
        }
    }

    /// (校验次数, 通过次数)
    pub fn totals(&self) -> (u64, u64) {
        (
            self.validations.load(Ordering::Relaxed),
            self.passed.load(Ordering::Relaxed),
        )
    }
}
