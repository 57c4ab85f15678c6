use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};

/// 标签基数跟踪器
///
/// 按标签键记录不同取值的个数。只保存取值的 64 位指纹，生命周期与所属优化器一致。
#[derive(Debug, Default)]
pub struct CardinalityTracker {
    seen: HashMap<String, HashSet<u64>>,
}

fn fingerprint(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

impl CardinalityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次观测，返回该键当前的基数
    pub fn observe(&mut self, key: &str, value: &str) -> usize {
        let values = self.seen.entry(key.to_string()).or_default();
        values.insert(fingerprint(value));
        values.len()
    }

    pub fn cardinality(&self, key: &str) -> usize {
        self.seen.get(key).map_or(0, HashSet::len)
    }

    /// 所有键的基数快照
    pub fn snapshot(&self) -> BTreeMap<String, usize> {
        self.seen
            .iter()
            .map(|(key, values)| (key.clone(), values.len()))
            .collect()
    }

    /// 超过阈值的键
    pub fn high_cardinality_keys(&self, threshold: usize) -> Vec<CardinalityEntry> {
        let mut entries: Vec<CardinalityEntry> = self
            .seen
            .iter()
            .filter(|(_, values)| values.len() > threshold)
            .map(|(key, values)| CardinalityEntry {
                key: key.clone(),
                cardinality: values.len(),
            })
            .collect();
        entries.sort_by(|a, b| b.cardinality.cmp(&a.cardinality));
        entries
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardinalityEntry {
    pub key: String,
    pub cardinality: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_distinct_values() {
        let mut tracker = CardinalityTracker::new();
        assert_eq!(tracker.observe("domain", "light"), 1);
        assert_eq!(tracker.observe("domain", "light"), 1);
        assert_eq!(tracker.observe("domain", "sensor"), 2);
        assert_eq!(tracker.cardinality("entity_id"), 0);
    }

    #[test]
    fn test_high_cardinality_and_reset() {
        let mut tracker = CardinalityTracker::new();
        for i in 0..20 {
            tracker.observe("entity_id", &format!("sensor.s{}", i));
        }
        tracker.observe("domain", "sensor");

        let high = tracker.high_cardinality_keys(10);
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].key, "entity_id");
        assert_eq!(high[0].cardinality, 20);

        tracker.reset();
        assert!(tracker.snapshot().is_empty());
    }
}
