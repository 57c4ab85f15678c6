use crate::model::TelemetryPoint;
use crate::query::{TimeRange, TimeSeriesQuery};
use crate::store::TimeSeriesStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hass_core::Result;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::debug;

/// 内存存储
///
/// 每个 measurement 内按时间排序；`(tags, timestamp)` 相同的写入覆盖旧点。
#[derive(Default)]
pub struct MemoryStore {
    series: RwLock<BTreeMap<String, Vec<TelemetryPoint>>>,
    schema: RwLock<BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 总点数
    pub async fn len(&self) -> usize {
        self.series.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 已初始化的 measurement
    pub async fn initialized_measurements(&self) -> Vec<String> {
        self.schema.read().await.iter().cloned().collect()
    }

    fn upsert(points: &mut Vec<TelemetryPoint>, point: &TelemetryPoint) {
        let ts = point.timestamp();
        let start = points.partition_point(|p| p.timestamp() < ts);
        let end = start + points[start..].partition_point(|p| p.timestamp() <= ts);

        if let Some(existing) = points[start..end]
            .iter_mut()
            .find(|p| p.tags() == point.tags())
        {
            *existing = point.clone();
        } else {
            points.insert(end, point.clone());
        }
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryStore {
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn initialize_schema(&self, measurements: &[String]) -> Result<()> {
        let mut schema = self.schema.write().await;
        schema.extend(measurements.iter().cloned());
        Ok(())
    }

    async fn write_point(&self, point: &TelemetryPoint) -> Result<()> {
        let mut series = self.series.write().await;
        let points = series.entry(point.measurement().to_string()).or_default();
        Self::upsert(points, point);
        Ok(())
    }

    async fn write_points(&self, points: &[TelemetryPoint]) -> Result<usize> {
        let mut series = self.series.write().await;
        for point in points {
            let bucket = series.entry(point.measurement().to_string()).or_default();
            Self::upsert(bucket, point);
        }
        debug!(count = points.len(), "Points written to memory store");
        Ok(points.len())
    }

    async fn query(&self, query: &TimeSeriesQuery) -> Result<Vec<TelemetryPoint>> {
        let series = self.series.read().await;

        let mut matched: Vec<TelemetryPoint> = series
            .iter()
            .filter(|(name, _)| query.measurement.as_ref().map_or(true, |m| m == *name))
            .flat_map(|(_, points)| points.iter())
            .filter(|p| query.matches(p))
            .cloned()
            .collect();

        // 多个 measurement 时需要整体按时间排序
        if query.measurement.is_none() {
            matched.sort_by_key(|p| p.timestamp());
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matched.into_iter().skip(query.offset).take(limit).collect())
    }

    async fn count(&self, query: &TimeSeriesQuery) -> Result<usize> {
        let series = self.series.read().await;
        Ok(series
            .values()
            .flat_map(|points| points.iter())
            .filter(|p| query.matches(p))
            .count())
    }

    async fn list_measurements(&self, range: Option<TimeRange>) -> Result<Vec<String>> {
        let series = self.series.read().await;
        Ok(series
            .iter()
            .filter(|(_, points)| match range {
                Some(range) => points.iter().any(|p| range.contains(p.timestamp())),
                None => !points.is_empty(),
            })
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn delete_before(&self, measurement: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut series = self.series.write().await;
        let Some(points) = series.get_mut(measurement) else {
            return Ok(0);
        };

        let split = points.partition_point(|p| p.timestamp() < cutoff);
        points.drain(..split);
        Ok(split as u64)
    }

    async fn drop_measurement(&self, measurement: &str) -> Result<u64> {
        let mut series = self.series.write().await;
        let removed = series.remove(measurement).map_or(0, |points| points.len());
        self.schema.write().await.remove(measurement);
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn point(measurement: &str, entity: &str, ts: DateTime<Utc>, state: &str) -> TelemetryPoint {
        TelemetryPoint::builder(measurement)
            .timestamp(ts)
            .tag("entity_id", entity)
            .field("state", state)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_and_query_sorted() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store
            .write_points(&[
                point("ha_entities", "light.a", now, "on"),
                point("ha_entities", "light.b", now - Duration::minutes(10), "off"),
                point("ha_events", "light.c", now - Duration::minutes(5), "x"),
            ])
            .await
            .unwrap();

        let all = store.query(&TimeSeriesQuery::new()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));

        let entities = store
            .query(&TimeSeriesQuery::measurement("ha_entities").with_limit(1))
            .await
            .unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].tag("entity_id"), Some("light.b"));
    }

    #[tokio::test]
    async fn test_same_series_key_overwrites() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store
            .write_point(&point("ha_entities", "light.a", now, "on"))
            .await
            .unwrap();
        store
            .write_point(&point("ha_entities", "light.a", now, "off"))
            .await
            .unwrap();

        assert_eq!(store.len().await, 1);
        let points = store.query(&TimeSeriesQuery::new()).await.unwrap();
        assert_eq!(points[0].field("state").unwrap().as_str(), Some("off"));
    }

    #[tokio::test]
    async fn test_delete_before_and_drop() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for i in 0..5 {
            store
                .write_point(&point("ha_entities", "light.a", now - Duration::days(i), "on"))
                .await
                .unwrap();
        }

        let deleted = store
            .delete_before("ha_entities", now - Duration::hours(36))
            .await
            .unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(
            store
                .count(&TimeSeriesQuery::measurement("ha_entities"))
                .await
                .unwrap(),
            2
        );

        assert_eq!(store.drop_measurement("ha_entities").await.unwrap(), 2);
        assert!(store.is_empty().await);
        assert!(store.list_measurements(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_measurements_in_range() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .write_point(&point("ha_old", "a.b", now - Duration::days(30), "1"))
            .await
            .unwrap();
        store
            .write_point(&point("ha_new", "a.b", now, "1"))
            .await
            .unwrap();

        let recent = store
            .list_measurements(Some(TimeRange::new(
                now - Duration::days(1),
                now + Duration::seconds(1),
            )))
            .await
            .unwrap();
        assert_eq!(recent, vec!["ha_new".to_string()]);
    }
}
