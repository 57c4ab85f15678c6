use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info;

use crate::model::TelemetryPoint;

/// 触发哈希建议的标签基数
pub const HIGH_CARDINALITY_THRESHOLD: usize = 10_000;

/// 触发合并建议的 measurement 数量
pub const MEASUREMENT_CONSOLIDATION_THRESHOLD: usize = 20;

/// 触发压缩建议的平均标签长度
pub const LONG_TAG_THRESHOLD: f64 = 64.0;

/// 触发稀疏字段建议的缺失率
pub const SPARSE_FIELD_THRESHOLD: f64 = 0.5;

/// 触发标签精简建议的标签键数量
pub const TAG_KEY_THRESHOLD: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagPattern {
    pub cardinality: usize,
    pub avg_length: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldPattern {
    pub type_distribution: BTreeMap<String, usize>,
    pub null_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaAnalysis {
    pub analyzed_at: DateTime<Utc>,
    pub total_points: usize,
    pub measurement_counts: BTreeMap<String, usize>,
    pub tag_patterns: BTreeMap<String, TagPattern>,
    pub field_patterns: BTreeMap<String, FieldPattern>,
    pub suggestions: Vec<String>,
    pub evolution_recommendations: Vec<String>,
}

/// 分析结果；距离上次分析未满间隔时为 `skipped`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Skipped { next_analysis_at: DateTime<Utc> },
    Completed(SchemaAnalysis),
}

impl AnalysisOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, AnalysisOutcome::Skipped { .. })
    }

    pub fn analysis(&self) -> Option<&SchemaAnalysis> {
        match self {
            AnalysisOutcome::Completed(analysis) => Some(analysis),
            AnalysisOutcome::Skipped { .. } => None,
        }
    }
}

/// 模式演化分析器
#[derive(Debug)]
pub struct SchemaEvolutionAnalyzer {
    interval: Duration,
    last_analysis: Option<DateTime<Utc>>,
}

impl SchemaEvolutionAnalyzer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_analysis: None,
        }
    }

    pub fn last_analysis(&self) -> Option<DateTime<Utc>> {
        self.last_analysis
    }

    pub fn analyze_schema_patterns(&mut self, points: &[TelemetryPoint]) -> AnalysisOutcome {
        self.analyze_at(points, Utc::now())
    }

    /// 以给定时刻执行分析（便于测试间隔门控）
    pub fn analyze_at(&mut self, points: &[TelemetryPoint], now: DateTime<Utc>) -> AnalysisOutcome {
        if let Some(last) = self.last_analysis {
            let next = last + self.interval;
            if now < next {
                return AnalysisOutcome::Skipped {
                    next_analysis_at: next,
                };
            }
        }
        self.last_analysis = Some(now);

        let analysis = analyze(points, now);
        info!(
            points = analysis.total_points,
            measurements = analysis.measurement_counts.len(),
            suggestions = analysis.suggestions.len(),
            "Schema pattern analysis completed"
        );
        AnalysisOutcome::Completed(analysis)
    }
}

fn analyze(points: &[TelemetryPoint], now: DateTime<Utc>) -> SchemaAnalysis {
    let mut measurement_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut tag_values: HashMap<&str, HashSet<&str>> = HashMap::new();
    let mut tag_lengths: HashMap<&str, (usize, usize)> = HashMap::new();
    let mut field_types: HashMap<&str, BTreeMap<String, usize>> = HashMap::new();
    let mut field_measurements: HashMap<&str, HashSet<&str>> = HashMap::new();

    for point in points {
        *measurement_counts
            .entry(point.measurement().to_string())
            .or_default() += 1;

        for (key, value) in point.tags() {
            tag_values
                .entry(key.as_str())
                .or_default()
                .insert(value.as_str());
            let (total, count) = tag_lengths.entry(key.as_str()).or_default();
            *total += value.chars().count();
            *count += 1;
        }

        for (key, value) in point.fields() {
            *field_types
                .entry(key.as_str())
                .or_default()
                .entry(value.type_name().to_string())
                .or_default() += 1;
            field_measurements
                .entry(key.as_str())
                .or_default()
                .insert(point.measurement());
        }
    }

    let tag_patterns: BTreeMap<String, TagPattern> = tag_values
        .iter()
        .map(|(key, values)| {
            let (total, count) = tag_lengths.get(key).copied().unwrap_or((0, 0));
            let avg_length = if count > 0 {
                total as f64 / count as f64
            } else {
                0.0
            };
            (
                key.to_string(),
                TagPattern {
                    cardinality: values.len(),
                    avg_length,
                },
            )
        })
        .collect();

    // 缺失率只在出现过该字段的 measurement 范围内计算
    let field_patterns: BTreeMap<String, FieldPattern> = field_types
        .into_iter()
        .map(|(key, type_distribution)| {
            let present: usize = type_distribution.values().sum();
            let scope: usize = field_measurements
                .get(key)
                .map(|ms| ms.iter().filter_map(|m| measurement_counts.get(*m)).sum())
                .unwrap_or(present);
            let null_rate = if scope > 0 {
                1.0 - present as f64 / scope as f64
            } else {
                0.0
            };
            (
                key.to_string(),
                FieldPattern {
                    type_distribution,
                    null_rate,
                },
            )
        })
        .collect();

    let mut suggestions = Vec::new();
    for (key, pattern) in &tag_patterns {
        if pattern.cardinality > HIGH_CARDINALITY_THRESHOLD {
            suggestions.push(format!(
                "tag '{}' cardinality {} > {}: consider hashing or grouping",
                key, pattern.cardinality, HIGH_CARDINALITY_THRESHOLD
            ));
        }
        if pattern.avg_length > LONG_TAG_THRESHOLD {
            suggestions.push(format!(
                "tag '{}' average length {:.1} > {}: consider compression",
                key, pattern.avg_length, LONG_TAG_THRESHOLD
            ));
        }
    }
    for (key, pattern) in &field_patterns {
        if pattern.type_distribution.len() > 1 {
            let types: Vec<&str> = pattern.type_distribution.keys().map(String::as_str).collect();
            suggestions.push(format!(
                "field '{}' has mixed types ({}): normalize to a single type",
                key,
                types.join(", ")
            ));
        }
        if pattern.null_rate > SPARSE_FIELD_THRESHOLD {
            suggestions.push(format!(
                "field '{}' missing in {:.0}% of points: consider moving it to a separate measurement",
                key,
                pattern.null_rate * 100.0
            ));
        }
    }

    let mut evolution_recommendations = Vec::new();
    if measurement_counts.len() > MEASUREMENT_CONSOLIDATION_THRESHOLD {
        evolution_recommendations.push(format!(
            "measurement count {} > {}: consolidate measurements",
            measurement_counts.len(),
            MEASUREMENT_CONSOLIDATION_THRESHOLD
        ));
    }
    if tag_patterns.len() > TAG_KEY_THRESHOLD {
        evolution_recommendations.push(format!(
            "tag key count {} > {}: move rarely filtered tags to fields",
            tag_patterns.len(),
            TAG_KEY_THRESHOLD
        ));
    }
    let high_cardinality = tag_patterns
        .values()
        .filter(|p| p.cardinality > HIGH_CARDINALITY_THRESHOLD)
        .count();
    if high_cardinality > 0 {
        evolution_recommendations.push(format!(
            "{} high-cardinality tag keys: enable hashing in the transformer",
            high_cardinality
        ));
    }

    SchemaAnalysis {
        analyzed_at: now,
        total_points: points.len(),
        measurement_counts,
        tag_patterns,
        field_patterns,
        suggestions,
        evolution_recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(measurement: &str, entity: &str) -> TelemetryPoint {
        TelemetryPoint::builder(measurement)
            .tag("entity_id", entity)
            .field("state", "on")
            .build()
            .unwrap()
    }

    #[test]
    fn test_interval_gating() {
        let mut analyzer = SchemaEvolutionAnalyzer::new(Duration::seconds(300));
        let now = Utc::now();
        let points = vec![point("ha_entities", "light.a")];

        assert!(!analyzer.analyze_at(&points, now).is_skipped());
        assert!(analyzer
            .analyze_at(&points, now + Duration::seconds(10))
            .is_skipped());
        assert!(!analyzer
            .analyze_at(&points, now + Duration::seconds(301))
            .is_skipped());
    }

    #[test]
    fn test_skipped_serializes_status() {
        let mut analyzer = SchemaEvolutionAnalyzer::new(Duration::seconds(300));
        analyzer.analyze_schema_patterns(&[]);
        let skipped = serde_json::to_value(analyzer.analyze_schema_patterns(&[])).unwrap();
        assert_eq!(skipped["status"], "skipped");
    }

    #[test]
    fn test_patterns_and_recommendations() {
        let mut points = Vec::new();
        for i in 0..25 {
            points.push(point(&format!("ha_m{}", i), &format!("sensor.s{}", i)));
        }
        points.push(
            TelemetryPoint::builder("ha_m0")
                .tag("entity_id", "sensor.s0")
                .field("state", 1i64)
                .field("battery", 90i64)
                .build()
                .unwrap(),
        );

        let mut analyzer = SchemaEvolutionAnalyzer::new(Duration::seconds(300));
        let outcome = analyzer.analyze_schema_patterns(&points);
        let analysis = outcome.analysis().unwrap();

        assert_eq!(analysis.total_points, 26);
        assert_eq!(analysis.measurement_counts["ha_m0"], 2);
        assert_eq!(analysis.tag_patterns["entity_id"].cardinality, 25);
        assert_eq!(analysis.field_patterns["state"].type_distribution.len(), 2);
        assert!((analysis.field_patterns["battery"].null_rate - 0.5).abs() < 1e-9);
        assert!(analysis
            .suggestions
            .iter()
            .any(|s| s.contains("mixed types")));
        assert!(analysis
            .evolution_recommendations
            .iter()
            .any(|r| r.contains("consolidate")));
    }
}
