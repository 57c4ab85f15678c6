use chrono::Utc;
use hass_timeseries::EventToPointTransformer;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

use super::legacy::legacy_point_to_event;
use super::MigrationBatch;

/// 转换统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchTransformStats {
    pub batches_processed: u64,
    pub records_processed: u64,
    pub records_transformed: u64,
    pub transform_errors: u64,
    /// 优化评分分布：excellent / good / fair / poor
    pub score_distribution: BTreeMap<String, u64>,
}

impl BatchTransformStats {
    pub fn error_rate(&self) -> f64 {
        if self.records_processed == 0 {
            return 0.0;
        }
        self.transform_errors as f64 / self.records_processed as f64
    }
}

fn score_bucket(score: f64) -> &'static str {
    if score >= 0.9 {
        "excellent"
    } else if score >= 0.7 {
        "good"
    } else if score >= 0.5 {
        "fair"
    } else {
        "poor"
    }
}

struct Inner {
    transformer: EventToPointTransformer,
    stats: BatchTransformStats,
}

/// 批量转换：旧模式记录逐条转为新模式数据点
///
/// 单条失败只计入批次错误，不中断批次。
pub struct BatchTransformer {
    inner: Mutex<Inner>,
}

impl BatchTransformer {
    pub fn new(transformer: EventToPointTransformer) -> Self {
        Self {
            inner: Mutex::new(Inner {
                transformer,
                stats: BatchTransformStats::default(),
            }),
        }
    }

    pub async fn transform_batch(&self, batch: MigrationBatch) -> MigrationBatch {
        let mut inner = self.inner.lock().await;
        let Inner { transformer, stats } = &mut *inner;

        let MigrationBatch { records, .. } = &batch;
        let mut migrated = Vec::with_capacity(records.len());
        let mut errors = Vec::new();

        for (index, record) in records.iter().enumerate() {
            let event = legacy_point_to_event(record);
            match transformer.transform(&event) {
                Ok(point) => {
                    let score = point
                        .metadata()
                        .get("optimization_score")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(0.0);
                    *stats
                        .score_distribution
                        .entry(score_bucket(score).to_string())
                        .or_insert(0) += 1;
                    migrated.push(point);
                }
                Err(e) => {
                    debug!(
                        batch_id = %batch.batch_id,
                        index = index,
                        error = %e,
                        "Record transformation failed"
                    );
                    errors.push(format!("record {}: {}", index, e));
                }
            }
        }

        stats.batches_processed += 1;
        stats.records_processed += records.len() as u64;
        stats.records_transformed += migrated.len() as u64;
        stats.transform_errors += errors.len() as u64;

        let mut out = MigrationBatch {
            target_measurement: migrated.first().map(|p| p.measurement().to_string()),
            success_count: migrated.len(),
            records: migrated,
            processed_at: Some(Utc::now()),
            ..batch
        };
        for error in errors {
            out.record_error(error);
        }
        out
    }

    pub async fn stats(&self) -> BatchTransformStats {
        self.inner.lock().await.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hass_timeseries::TelemetryPoint;

    fn legacy(entity: &str, state: &str) -> TelemetryPoint {
        TelemetryPoint::builder("sensor")
            .tag("domain", "sensor")
            .tag("entity_id", entity)
            .field("state", state)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_transform_batch() {
        let transformer = BatchTransformer::new(EventToPointTransformer::default());
        let batch = MigrationBatch::new(
            "sensor",
            0,
            10,
            vec![legacy("sensor.a_1", "1"), legacy("sensor.b_2", "on")],
        );

        let migrated = transformer.transform_batch(batch).await;
        assert_eq!(migrated.len(), 2);
        assert_eq!(migrated.success_count, 2);
        assert_eq!(migrated.error_count, 0);
        assert_eq!(migrated.target_measurement.as_deref(), Some("ha_entities"));
        assert!(migrated.processed_at.is_some());

        let stats = transformer.stats().await;
        assert_eq!(stats.records_transformed, 2);
        assert_eq!(stats.score_distribution.values().sum::<u64>(), 2);
    }
}
