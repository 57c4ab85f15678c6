//! 模式优化：标签基数控制、字段类型推断与压缩、模式演化分析

pub mod cardinality;
pub mod compress;
pub mod evolution;
pub mod fields;
pub mod tags;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;
use tracing::debug;

use crate::model::{PointError, TelemetryPoint};
pub use cardinality::{CardinalityEntry, CardinalityTracker};
pub use evolution::{AnalysisOutcome, SchemaAnalysis, SchemaEvolutionAnalyzer};
pub use fields::{FieldOptimizer, FieldStats, FieldTotals};
pub use tags::{TagOptimizer, TagStats, TagTotals};

/// 优化器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// 单个标签键允许的最大基数
    pub max_cardinality: usize,

    /// 标签值压缩阈值（字节）
    pub tag_compression_threshold: usize,

    /// 字段字符串压缩阈值（字节）
    pub field_compression_threshold: usize,

    /// 模式分析最小间隔（秒）
    pub analysis_interval_secs: u64,

    /// 优化历史保留条数
    pub history_limit: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_cardinality: 10_000,
            tag_compression_threshold: 1000,
            field_compression_threshold: 256,
            analysis_interval_secs: 300,
            history_limit: 1000,
        }
    }
}

/// 优化历史条目
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationRecord {
    pub kind: &'static str,
    pub at: DateTime<Utc>,
    pub original_count: usize,
    pub optimized_count: usize,
    pub changes: usize,
}

/// 有界优化历史，超出上限时丢弃最旧的条目
#[derive(Debug, Clone)]
pub struct HistoryLog {
    limit: usize,
    entries: VecDeque<OptimizationRecord>,
}

impl HistoryLog {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, record: OptimizationRecord) {
        if self.limit == 0 {
            return;
        }
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn recent(&self, n: usize) -> Vec<OptimizationRecord> {
        self.entries.iter().rev().take(n).cloned().collect()
    }
}

/// 优化器累计统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizerStats {
    pub points_processed: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub storage_saved_bytes: u64,
    pub total_latency_us: u64,
}

impl OptimizerStats {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.points_processed == 0 {
            return 0.0;
        }
        self.total_latency_us as f64 / self.points_processed as f64 / 1000.0
    }

    /// `1 - size_after / size_before`
    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_before == 0 {
            return 0.0;
        }
        1.0 - self.bytes_after as f64 / self.bytes_before as f64
    }
}

/// 优化报告
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    pub generated_at: DateTime<Utc>,
    pub points_processed: u64,
    pub storage_saved_bytes: u64,
    pub avg_latency_ms: f64,
    pub compression_ratio: f64,
    pub tags: TagTotals,
    pub fields: FieldTotals,
    pub high_cardinality_tags: Vec<CardinalityEntry>,
    pub history_size: usize,
    pub recent_optimizations: Vec<OptimizationRecord>,
    pub last_analysis: Option<DateTime<Utc>>,
}

/// 模式优化器：组合标签优化、字段优化与模式演化分析
#[derive(Debug)]
pub struct SchemaOptimizer {
    config: OptimizerConfig,
    tags: TagOptimizer,
    fields: FieldOptimizer,
    analyzer: SchemaEvolutionAnalyzer,
    stats: OptimizerStats,
}

impl Default for SchemaOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

impl SchemaOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            tags: TagOptimizer::new(
                config.max_cardinality,
                config.tag_compression_threshold,
                config.history_limit,
            ),
            fields: FieldOptimizer::new(config.field_compression_threshold, config.history_limit),
            analyzer: SchemaEvolutionAnalyzer::new(Duration::seconds(
                config.analysis_interval_secs as i64,
            )),
            stats: OptimizerStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn stats(&self) -> &OptimizerStats {
        &self.stats
    }

    pub fn tag_optimizer(&self) -> &TagOptimizer {
        &self.tags
    }

    pub fn tag_optimizer_mut(&mut self) -> &mut TagOptimizer {
        &mut self.tags
    }

    pub fn field_optimizer_mut(&mut self) -> &mut FieldOptimizer {
        &mut self.fields
    }

    /// 优化单个数据点，返回新的实例
    pub fn optimize_point(&mut self, point: &TelemetryPoint) -> Result<TelemetryPoint, PointError> {
        let started = Instant::now();
        let size_before = point.size_estimate();

        let (tags, tag_stats) = self.tags.optimize_tags(point.tags());
        let tags = tags
            .into_iter()
            .map(|(k, v)| (compress::sanitize_key(&k), compress::fit_tag_value(&v)))
            .collect();
        let (fields, field_stats) = self.fields.optimize_point_fields(point.fields());

        let mut metadata = point.metadata().clone();
        metadata.insert("original_tag_count".into(), json!(tag_stats.original_count));
        metadata.insert("optimized_tag_count".into(), json!(tag_stats.optimized_count));
        metadata.insert("original_field_count".into(), json!(field_stats.original_count));
        metadata.insert(
            "optimized_field_count".into(),
            json!(field_stats.optimized_count),
        );
        metadata.insert(
            "field_optimization_scores".into(),
            json!(field_stats.scores),
        );
        metadata.insert("original_timestamp".into(), json!(point.timestamp()));
        metadata.insert("optimized_at".into(), json!(Utc::now()));

        let optimized = TelemetryPoint::new(point.measurement(), point.timestamp(), tags, fields)?
            .with_metadata_map(metadata);

        let size_after = optimized.size_estimate();
        let latency_us = started.elapsed().as_micros() as u64;

        self.stats.points_processed += 1;
        self.stats.bytes_before += size_before as u64;
        self.stats.bytes_after += size_after as u64;
        self.stats.storage_saved_bytes += size_before.saturating_sub(size_after) as u64;
        self.stats.total_latency_us += latency_us;

        debug!(
            measurement = %point.measurement(),
            size_before = size_before,
            size_after = size_after,
            "Point optimized"
        );

        Ok(optimized)
    }

    pub fn analyze_schema_patterns(&mut self, points: &[TelemetryPoint]) -> AnalysisOutcome {
        self.analyzer.analyze_schema_patterns(points)
    }

    pub fn get_optimization_report(&self) -> OptimizationReport {
        let mut recent = self.tags.history().recent(10);
        recent.extend(self.fields.history().recent(10));
        recent.sort_by(|a, b| b.at.cmp(&a.at));
        recent.truncate(10);

        OptimizationReport {
            generated_at: Utc::now(),
            points_processed: self.stats.points_processed,
            storage_saved_bytes: self.stats.storage_saved_bytes,
            avg_latency_ms: self.stats.avg_latency_ms(),
            compression_ratio: self.stats.compression_ratio(),
            tags: self.tags.totals().clone(),
            fields: self.fields.totals().clone(),
            high_cardinality_tags: self
                .tags
                .tracker()
                .high_cardinality_keys(self.config.max_cardinality),
            history_size: self.tags.history().len() + self.fields.history().len(),
            recent_optimizations: recent,
            last_analysis: self.analyzer.last_analysis(),
        }
    }

    /// 重建所有子优化器，清空基数跟踪与统计
    pub fn reset_statistics(&mut self) {
        *self = SchemaOptimizer::new(self.config.clone());
    }

    /// 基数快照
    pub fn cardinality_snapshot(&self) -> BTreeMap<String, usize> {
        self.tags.tracker().snapshot()
    }
}
