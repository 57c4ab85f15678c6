//! 历史数据批量迁移：抽取 -> 转换 -> 加载 -> 抽样校验

pub mod extractor;
pub mod legacy;
pub mod loader;
pub mod runner;
pub mod transformer;
pub mod validator;

use chrono::{DateTime, Utc};
use hass_timeseries::TelemetryPoint;
use serde::{Deserialize, Serialize};

pub use extractor::{DataExtractor, DataStatistics};
pub use legacy::{canonical_to_legacy_point, is_new_schema, legacy_point_to_event};
pub use loader::{BatchLoader, LoadStats};
pub use runner::{MeasurementSummary, MigrationRunner, RunSummary};
pub use transformer::{BatchTransformer, BatchTransformStats};
pub use validator::{BatchValidation, MigrationValidator};

/// 单批错误信息的最大保留条数
pub const MAX_BATCH_ERRORS: usize = 100;

/// 迁移批次
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationBatch {
    pub batch_id: String,
    pub records: Vec<TelemetryPoint>,
    pub source_measurement: String,
    /// 转换后的目标 measurement（取本批第一条成功记录）
    pub target_measurement: Option<String>,
    pub batch_size: usize,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<String>,
}

impl MigrationBatch {
    pub fn new(
        source_measurement: impl Into<String>,
        offset: usize,
        batch_size: usize,
        records: Vec<TelemetryPoint>,
    ) -> Self {
        let source_measurement = source_measurement.into();
        Self {
            batch_id: format!("{}_{:08}", source_measurement, offset),
            records,
            source_measurement,
            target_measurement: None,
            batch_size,
            created_at: Utc::now(),
            processed_at: None,
            success_count: 0,
            error_count: 0,
            errors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 记录一条失败；错误信息超过上限后只计数
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        if self.errors.len() < MAX_BATCH_ERRORS {
            self.errors.push(message.into());
        }
    }
}
