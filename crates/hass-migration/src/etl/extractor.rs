use chrono::{DateTime, Utc};
use hass_timeseries::{SharedStore, TimeRange, TimeSeriesQuery};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

use super::MigrationBatch;
use crate::error::{MigrationError, Result};

/// 统计扫描的分页大小
const STATS_PAGE_SIZE: usize = 1000;

/// measurement 数据概况
#[derive(Debug, Clone, Default, Serialize)]
pub struct DataStatistics {
    pub measurement: String,
    pub total_records: usize,
    /// 最早与最晚时间戳
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub tag_cardinality: BTreeMap<String, usize>,
    pub field_count: usize,
    /// 估算的原始数据字节数
    pub size_estimate: usize,
}

/// 从旧模式存储分页抽取数据
pub struct DataExtractor {
    store: SharedStore,
}

impl DataExtractor {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub async fn extract_measurements(&self, range: Option<TimeRange>) -> Result<Vec<String>> {
        Ok(self.store.list_measurements(range).await?)
    }

    pub async fn count_records(&self, measurement: &str, range: Option<TimeRange>) -> Result<usize> {
        let query = TimeSeriesQuery::measurement(measurement).with_optional_range(range);
        Ok(self.store.count(&query).await?)
    }

    /// 抽取一批数据，按时间升序分页
    pub async fn extract_data_batch(
        &self,
        measurement: &str,
        batch_size: usize,
        offset: usize,
        range: Option<TimeRange>,
    ) -> Result<MigrationBatch> {
        let query = TimeSeriesQuery::measurement(measurement)
            .with_optional_range(range)
            .with_offset(offset)
            .with_limit(batch_size);

        let records = self
            .store
            .query(&query)
            .await
            .map_err(|e| MigrationError::Extraction {
                measurement: measurement.to_string(),
                reason: e.to_string(),
            })?;

        debug!(
            measurement = %measurement,
            offset = offset,
            records = records.len(),
            "Batch extracted"
        );
        Ok(MigrationBatch::new(measurement, offset, batch_size, records))
    }

    /// 全量扫描一个 measurement 的概况
    pub async fn get_data_statistics(&self, measurement: &str) -> Result<DataStatistics> {
        let mut stats = DataStatistics {
            measurement: measurement.to_string(),
            ..DataStatistics::default()
        };
        let mut tag_values: BTreeMap<String, HashSet<String>> = BTreeMap::new();
        let mut field_keys = BTreeSet::new();
        let mut first = None;
        let mut last = None;

        loop {
            let batch = self
                .extract_data_batch(measurement, STATS_PAGE_SIZE, stats.total_records, None)
                .await?;
            let page_len = batch.len();

            for point in &batch.records {
                first.get_or_insert(point.timestamp());
                last = Some(point.timestamp());
                stats.size_estimate += point.size_estimate();
                for (key, value) in point.tags() {
                    tag_values.entry(key.clone()).or_default().insert(value.clone());
                }
                field_keys.extend(point.fields().keys().cloned());
            }

            stats.total_records += page_len;
            if page_len < STATS_PAGE_SIZE {
                break;
            }
        }

        stats.date_range = first.zip(last);
        stats.tag_cardinality = tag_values
            .into_iter()
            .map(|(key, values)| (key, values.len()))
            .collect();
        stats.field_count = field_keys.len();
        Ok(stats)
    }
}
