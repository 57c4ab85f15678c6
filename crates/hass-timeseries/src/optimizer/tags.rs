use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use super::cardinality::CardinalityTracker;
use super::compress::{compress_value, group_label};
use super::{HistoryLog, OptimizationRecord};

/// 单次标签优化统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagStats {
    pub original_count: usize,
    pub optimized_count: usize,
    pub grouped: usize,
    pub compressed: usize,
}

impl TagStats {
    pub fn changed(&self) -> bool {
        self.grouped + self.compressed > 0
    }
}

/// 累计标签优化统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct TagTotals {
    pub calls: u64,
    pub tags_processed: u64,
    pub tags_grouped: u64,
    pub tags_compressed: u64,
}

/// 标签优化器：基数分组 + 超长值压缩
#[derive(Debug)]
pub struct TagOptimizer {
    max_cardinality: usize,
    compression_threshold: usize,
    tracker: CardinalityTracker,
    history: HistoryLog,
    totals: TagTotals,
}

impl TagOptimizer {
    pub fn new(max_cardinality: usize, compression_threshold: usize, history_limit: usize) -> Self {
        Self {
            max_cardinality,
            compression_threshold,
            tracker: CardinalityTracker::new(),
            history: HistoryLog::new(history_limit),
            totals: TagTotals::default(),
        }
    }

    pub fn tracker(&self) -> &CardinalityTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut CardinalityTracker {
        &mut self.tracker
    }

    pub fn totals(&self) -> &TagTotals {
        &self.totals
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// 优化标签集合
    ///
    /// 基数超过 `max_cardinality` 的键改写为 `<key>_grouped`，值替换为粗粒度分组；
    /// 字节长度超过 `compression_threshold` 的值被压缩。两者都未触发时原样返回。
    pub fn optimize_tags(
        &mut self,
        tags: &BTreeMap<String, String>,
    ) -> (BTreeMap<String, String>, TagStats) {
        let mut optimized = BTreeMap::new();
        let mut stats = TagStats {
            original_count: tags.len(),
            ..TagStats::default()
        };

        for (key, value) in tags {
            let cardinality = self.tracker.observe(key, value);

            if cardinality > self.max_cardinality {
                debug!(
                    tag = %key,
                    cardinality = cardinality,
                    "Tag over cardinality limit, grouping"
                );
                optimized.insert(format!("{}_grouped", key), group_label(value).to_string());
                stats.grouped += 1;
                continue;
            }

            if value.len() > self.compression_threshold {
                optimized.insert(key.clone(), compress_value(value));
                stats.compressed += 1;
                continue;
            }

            optimized.insert(key.clone(), value.clone());
        }

        stats.optimized_count = optimized.len();

        self.totals.calls += 1;
        self.totals.tags_processed += tags.len() as u64;
        self.totals.tags_grouped += stats.grouped as u64;
        self.totals.tags_compressed += stats.compressed as u64;

        if stats.changed() {
            self.history.push(OptimizationRecord {
                kind: "tags",
                at: Utc::now(),
                original_count: stats.original_count,
                optimized_count: stats.optimized_count,
                changes: stats.grouped + stats.compressed,
            });
        }

        (optimized, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_identity_below_thresholds() {
        let mut optimizer = TagOptimizer::new(10_000, 1000, 100);
        let input = tags(&[("domain", "light"), ("entity_id", "light.kitchen")]);
        let (output, stats) = optimizer.optimize_tags(&input);
        assert_eq!(output, input);
        assert!(!stats.changed());
        assert!(optimizer.history().is_empty());
    }

    #[test]
    fn test_high_cardinality_entity_grouped() {
        let mut optimizer = TagOptimizer::new(10_000, 1000, 100);
        for i in 0..15_000 {
            optimizer
                .tracker_mut()
                .observe("entity_id", &format!("sensor.device_{}", i));
        }

        let (output, stats) =
            optimizer.optimize_tags(&tags(&[("entity_id", "light.living_room_main")]));

        assert_eq!(stats.grouped, 1);
        assert!(!output.contains_key("entity_id"));
        assert_eq!(output.get("entity_id_grouped").map(String::as_str), Some("medium"));
    }

    #[test]
    fn test_long_value_compressed() {
        let mut optimizer = TagOptimizer::new(10_000, 1000, 100);
        let long = format!("{{\"kind\":\"scene\",\"payload\":\"{}\"}}", "x".repeat(1200));
        let (output, stats) = optimizer.optimize_tags(&tags(&[("context", &long)]));

        assert_eq!(stats.compressed, 1);
        assert!(output["context"].starts_with("kind:scene|payload:"));
        assert_eq!(optimizer.history().len(), 1);
        assert_eq!(optimizer.totals().tags_compressed, 1);
    }
}
