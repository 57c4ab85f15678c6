use hass_timeseries::SharedStore;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::MigrationBatch;

/// 加载统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadStats {
    pub batches_loaded: u64,
    pub records_loaded: u64,
    pub load_errors: u64,
    pub avg_batch_size: f64,
}

/// 批量写入新模式存储
///
/// 逐条写入，单条失败不影响其余记录。
pub struct BatchLoader {
    store: SharedStore,
    batches: AtomicU64,
    loaded: AtomicU64,
    errors: AtomicU64,
}

impl BatchLoader {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            batches: AtomicU64::new(0),
            loaded: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// 写入批次，批内没有任何写入错误时返回 true
    pub async fn load_batch(&self, batch: &mut MigrationBatch) -> bool {
        let mut loaded = 0usize;
        let mut failures = Vec::new();

        for (index, point) in batch.records.iter().enumerate() {
            match self.store.write_point(point).await {
                Ok(()) => loaded += 1,
                Err(e) => {
                    warn!(
                        batch_id = %batch.batch_id,
                        measurement = %point.measurement(),
                        error = %e,
                        "Record load failed"
                    );
                    failures.push(format!("load record {}: {}", index, e));
                }
            }
        }

        batch.success_count = loaded;
        let failed = failures.len();
        for failure in failures {
            batch.record_error(failure);
        }

        self.batches.fetch_add(1, Ordering::Relaxed);
        self.loaded.fetch_add(loaded as u64, Ordering::Relaxed);
        self.errors.fetch_add(failed as u64, Ordering::Relaxed);

        debug!(
            batch_id = %batch.batch_id,
            loaded = loaded,
            errors = failed,
            "Batch loaded"
        );
        failed == 0
    }

    pub fn stats(&self) -> LoadStats {
        let batches = self.batches.load(Ordering::Relaxed);
        let loaded = self.loaded.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let avg_batch_size = if batches == 0 {
            0.0
        } else {
            (loaded + errors) as f64 / batches as f64
        };

        LoadStats {
            batches_loaded: batches,
            records_loaded: loaded,
            load_errors: errors,
            avg_batch_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use hass_core::{HassError, Result};
    use hass_timeseries::{
        MemoryStore, TelemetryPoint, TimeRange, TimeSeriesQuery, TimeSeriesStore,
    };
    use std::sync::Arc;

    /// 拒绝写入 `entity_id` 为 `light.broken` 的存储
    struct RejectingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl TimeSeriesStore for RejectingStore {
        async fn health_check(&self) -> Result<()> {
            Ok(())
        }

        async fn initialize_schema(&self, measurements: &[String]) -> Result<()> {
            self.inner.initialize_schema(measurements).await
        }

        async fn write_point(&self, point: &TelemetryPoint) -> Result<()> {
            if point.tag("entity_id") == Some("light.broken") {
                return Err(HassError::Storage("write rejected".to_string()));
            }
            self.inner.write_point(point).await
        }

        async fn query(&self, query: &TimeSeriesQuery) -> Result<Vec<TelemetryPoint>> {
            self.inner.query(query).await
        }

        async fn count(&self, query: &TimeSeriesQuery) -> Result<usize> {
            self.inner.count(query).await
        }

        async fn list_measurements(&self, range: Option<TimeRange>) -> Result<Vec<String>> {
            self.inner.list_measurements(range).await
        }

        async fn delete_before(&self, measurement: &str, cutoff: DateTime<Utc>) -> Result<u64> {
            self.inner.delete_before(measurement, cutoff).await
        }

        async fn drop_measurement(&self, measurement: &str) -> Result<u64> {
            self.inner.drop_measurement(measurement).await
        }
    }

    fn point(entity: &str) -> TelemetryPoint {
        TelemetryPoint::builder("ha_entities")
            .tag("entity_id", entity)
            .field("state", "on")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_partial_load_failure() {
        let store = Arc::new(RejectingStore {
            inner: MemoryStore::new(),
        });
        let loader = BatchLoader::new(store.clone());

        let mut batch = MigrationBatch::new(
            "light",
            0,
            3,
            vec![point("light.a"), point("light.broken"), point("light.c")],
        );
        assert!(!loader.load_batch(&mut batch).await);
        assert_eq!(batch.success_count, 2);
        assert_eq!(batch.error_count, 1);
        assert_eq!(store.inner.len().await, 2);

        let mut clean = MigrationBatch::new("light", 3, 3, vec![point("light.d")]);
        assert!(loader.load_batch(&mut clean).await);

        let stats = loader.stats();
        assert_eq!(stats.records_loaded, 3);
        assert_eq!(stats.load_errors, 1);
        assert_eq!(stats.avg_batch_size, 2.0);
    }
}
