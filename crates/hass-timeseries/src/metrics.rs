use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::retention::RetentionTier;

/// 实时写入链路指标收集器
#[derive(Clone)]
pub struct IngestMetrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // 事件指标
    events_received: AtomicU64,
    events_lagged: AtomicU64,
    bytes_received: AtomicU64,

    // 转换与写入
    transform_errors: AtomicU64,
    points_written: AtomicU64,
    write_errors: AtomicU64,

    // 保留层级分布，顺序同 RetentionTier::ALL
    tier_points: [AtomicU64; 5],
    compress_candidates: AtomicU64,
    aggregate_candidates: AtomicU64,

    start_time: Instant,
}

fn tier_index(tier: RetentionTier) -> usize {
    match tier {
        RetentionTier::RealTime => 0,
        RetentionTier::Recent => 1,
        RetentionTier::Historical => 2,
        RetentionTier::LongTerm => 3,
        RetentionTier::Archive => 4,
    }
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                events_received: AtomicU64::new(0),
                events_lagged: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
                transform_errors: AtomicU64::new(0),
                points_written: AtomicU64::new(0),
                write_errors: AtomicU64::new(0),
                tier_points: Default::default(),
                compress_candidates: AtomicU64::new(0),
                aggregate_candidates: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_event(&self, bytes: usize) {
        self.inner.events_received.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// 订阅端落后时丢失的事件数
    pub fn record_lagged(&self, skipped: u64) {
        self.inner.events_lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn record_transform_error(&self) {
        self.inner.transform_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_point_written(&self, tier: RetentionTier) {
        self.inner.points_written.fetch_add(1, Ordering::Relaxed);
        self.inner.tier_points[tier_index(tier)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_error(&self) {
        self.inner.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compress_candidate(&self) {
        self.inner.compress_candidates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aggregate_candidate(&self) {
        self.inner.aggregate_candidates.fetch_add(1, Ordering::Relaxed);
    }

    // 获取指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        let tier_points = RetentionTier::ALL
            .iter()
            .map(|tier| {
                (
                    *tier,
                    self.inner.tier_points[tier_index(*tier)].load(Ordering::Relaxed),
                )
            })
            .collect();

        MetricsSnapshot {
            events_received: self.inner.events_received.load(Ordering::Relaxed),
            events_lagged: self.inner.events_lagged.load(Ordering::Relaxed),
            bytes_received: self.inner.bytes_received.load(Ordering::Relaxed),
            transform_errors: self.inner.transform_errors.load(Ordering::Relaxed),
            points_written: self.inner.points_written.load(Ordering::Relaxed),
            write_errors: self.inner.write_errors.load(Ordering::Relaxed),
            tier_points,
            compress_candidates: self.inner.compress_candidates.load(Ordering::Relaxed),
            aggregate_candidates: self.inner.aggregate_candidates.load(Ordering::Relaxed),
            uptime: self.inner.start_time.elapsed(),
        }
    }

    /// 导出 Prometheus 格式的指标
    pub fn export_prometheus(&self) -> String {
        let snapshot = self.snapshot();

        let mut out = format!(
            r#"# HELP hass_events_received_total Total number of raw events received
# TYPE hass_events_received_total counter
hass_events_received_total {}

# HELP hass_events_lagged_total Events skipped because the subscriber fell behind
# TYPE hass_events_lagged_total counter
hass_events_lagged_total {}

# HELP hass_bytes_received_total Total raw event bytes received
# TYPE hass_bytes_received_total counter
hass_bytes_received_total {}

# HELP hass_transform_errors_total Events that could not be transformed
# TYPE hass_transform_errors_total counter
hass_transform_errors_total {}

# HELP hass_points_written_total Points written to the store
# TYPE hass_points_written_total counter
hass_points_written_total {}

# HELP hass_write_errors_total Failed point writes
# TYPE hass_write_errors_total counter
hass_write_errors_total {}

# HELP hass_compress_candidates_total Points above their policy compression threshold
# TYPE hass_compress_candidates_total counter
hass_compress_candidates_total {}

# HELP hass_aggregate_candidates_total Points old enough for aggregation
# TYPE hass_aggregate_candidates_total counter
hass_aggregate_candidates_total {}

# HELP hass_uptime_seconds Pipeline uptime in seconds
# TYPE hass_uptime_seconds gauge
hass_uptime_seconds {}

# HELP hass_points_by_tier_total Points written per retention tier
# TYPE hass_points_by_tier_total counter
"#,
            snapshot.events_received,
            snapshot.events_lagged,
            snapshot.bytes_received,
            snapshot.transform_errors,
            snapshot.points_written,
            snapshot.write_errors,
            snapshot.compress_candidates,
            snapshot.aggregate_candidates,
            snapshot.uptime.as_secs(),
        );

        for (tier, count) in &snapshot.tier_points {
            out.push_str(&format!(
                "hass_points_by_tier_total{{tier=\"{}\"}} {}\n",
                tier, count
            ));
        }

        out
    }
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 指标快照
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub events_lagged: u64,
    pub bytes_received: u64,
    pub transform_errors: u64,
    pub points_written: u64,
    pub write_errors: u64,
    pub tier_points: Vec<(RetentionTier, u64)>,
    pub compress_candidates: u64,
    pub aggregate_candidates: u64,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    pub fn points_for(&self, tier: RetentionTier) -> u64 {
        self.tier_points
            .iter()
            .find(|(t, _)| *t == tier)
            .map_or(0, |(_, count)| *count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_events() {
        let metrics = IngestMetrics::new();

        metrics.record_event(120);
        metrics.record_event(80);
        metrics.record_transform_error();
        metrics.record_lagged(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_received, 2);
        assert_eq!(snapshot.bytes_received, 200);
        assert_eq!(snapshot.transform_errors, 1);
        assert_eq!(snapshot.events_lagged, 3);
    }

    #[test]
    fn test_metrics_tiers() {
        let metrics = IngestMetrics::new();

        metrics.record_point_written(RetentionTier::Recent);
        metrics.record_point_written(RetentionTier::Recent);
        metrics.record_point_written(RetentionTier::Archive);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.points_written, 3);
        assert_eq!(snapshot.points_for(RetentionTier::Recent), 2);
        assert_eq!(snapshot.points_for(RetentionTier::Archive), 1);
        assert_eq!(snapshot.points_for(RetentionTier::LongTerm), 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = IngestMetrics::new();
        metrics.record_point_written(RetentionTier::Historical);

        let prometheus = metrics.export_prometheus();
        assert!(prometheus.contains("hass_points_written_total 1"));
        assert!(prometheus.contains("hass_points_by_tier_total{tier=\"historical\"} 1"));
    }
}
