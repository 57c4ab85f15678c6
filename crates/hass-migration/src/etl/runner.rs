use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use futures::FutureExt;
use hass_timeseries::{EventToPointTransformer, SharedStore, TimeRange};
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::extractor::DataExtractor;
use super::loader::{BatchLoader, LoadStats};
use super::transformer::{BatchTransformStats, BatchTransformer};
use super::validator::{BatchValidation, MigrationValidator};
use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result};
use crate::report::write_json_atomic;

/// 单个 measurement 的迁移结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct MeasurementSummary {
    pub total_records: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub records_extracted: usize,
    pub records_loaded: usize,
    pub transform_errors: usize,
    pub load_errors: usize,
    pub validations: Vec<BatchValidation>,
}

/// 一次 ETL 运行的汇总
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub success: bool,
    pub error: Option<String>,
    pub measurements: BTreeMap<String, MeasurementSummary>,
    pub records_extracted: usize,
    pub records_migrated: usize,
    pub transform_errors: usize,
    pub load_errors: usize,
    pub error_rate: f64,
    pub batches_processed: usize,
    pub failed_batches: usize,
    pub validations_run: usize,
    pub validations_passed: usize,
    pub avg_consistency_score: f64,
    pub transform_stats: BatchTransformStats,
    pub load_stats: LoadStats,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub records_per_second: f64,
}

impl RunSummary {
    fn failed(message: String) -> Self {
        Self {
            success: false,
            error: Some(message),
            completed_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    fn validation_scores(&self) -> impl Iterator<Item = &BatchValidation> {
        self.measurements.values().flat_map(|m| m.validations.iter())
    }
}

struct BatchOutcome {
    extracted: usize,
    loaded: usize,
    transform_errors: usize,
    load_errors: usize,
    clean: bool,
    validation: Option<BatchValidation>,
}

/// ETL 运行器
///
/// 按 measurement 分页抽取，批次在 `concurrent_batches` 个并发槽内执行，
/// 每隔 `1 / validate_percentage` 批抽样校验一次。
pub struct MigrationRunner {
    config: MigrationConfig,
    extractor: DataExtractor,
    transformer: BatchTransformer,
    loader: BatchLoader,
    validator: MigrationValidator,
    cancel: CancellationToken,
    time_range: Option<TimeRange>,
    report_path: Option<PathBuf>,
}

impl MigrationRunner {
    pub fn new(
        config: MigrationConfig,
        source: SharedStore,
        target: SharedStore,
        transformer: EventToPointTransformer,
    ) -> Self {
        Self {
            config: config.effective(),
            extractor: DataExtractor::new(source),
            transformer: BatchTransformer::new(transformer),
            loader: BatchLoader::new(target),
            validator: MigrationValidator::new(),
            cancel: CancellationToken::new(),
            time_range: None,
            report_path: None,
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// 运行迁移；任何错误或 panic 都转为 `success = false` 的汇总
    pub async fn run(&self, measurements: Option<Vec<String>>) -> RunSummary {
        let outcome = AssertUnwindSafe(self.try_run(measurements))
            .catch_unwind()
            .await;

        let summary = match outcome {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                error!(error = %e, "ETL run failed");
                RunSummary::failed(e.to_string())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(error = %message, "ETL run panicked");
                RunSummary::failed(MigrationError::Panic(message).to_string())
            }
        };

        if let Some(path) = &self.report_path {
            if let Err(e) = write_json_atomic(path, &summary).await {
                warn!(path = %path.display(), error = %e, "Failed to persist ETL report");
            }
        }

        summary
    }

    async fn try_run(&self, measurements: Option<Vec<String>>) -> Result<RunSummary> {
        self.config.validate()?;

        let started_at = Utc::now();
        let started = Instant::now();
        let measurements = match measurements {
            Some(list) => list,
            None => self.extractor.extract_measurements(self.time_range).await?,
        };

        info!(
            measurements = measurements.len(),
            batch_size = self.config.batch_size,
            concurrent_batches = self.config.concurrent_batches,
            "ETL run started"
        );

        let mut summary = RunSummary {
            started_at: Some(started_at),
            ..RunSummary::default()
        };

        for measurement in measurements {
            let result = self.migrate_measurement(&measurement).await?;
            summary.records_extracted += result.records_extracted;
            summary.records_migrated += result.records_loaded;
            summary.transform_errors += result.transform_errors;
            summary.load_errors += result.load_errors;
            summary.batches_processed += result.batches;
            summary.failed_batches += result.failed_batches;
            summary.measurements.insert(measurement, result);
        }

        let errors = summary.transform_errors + summary.load_errors;
        summary.error_rate = if summary.records_extracted == 0 {
            0.0
        } else {
            errors as f64 / summary.records_extracted as f64
        };

        let (runs, passed, total_score) = summary.validation_scores().fold(
            (0usize, 0usize, 0.0f64),
            |(runs, passed, score), v| {
                (runs + 1, passed + usize::from(v.data_consistency), score + v.consistency_score)
            },
        );
        summary.validations_run = runs;
        summary.validations_passed = passed;
        summary.avg_consistency_score = if runs == 0 { 1.0 } else { total_score / runs as f64 };

        summary.transform_stats = self.transformer.stats().await;
        summary.load_stats = self.loader.stats();
        summary.completed_at = Some(Utc::now());
        summary.duration_ms = started.elapsed().as_millis() as u64;
        let secs = started.elapsed().as_secs_f64();
        summary.records_per_second = if secs > 0.0 {
            summary.records_migrated as f64 / secs
        } else {
            0.0
        };

        summary.success = summary.error_rate <= self.config.max_error_rate;
        if !summary.success {
            summary.error = Some(format!(
                "error rate {:.4} exceeds max_error_rate {:.4}",
                summary.error_rate, self.config.max_error_rate
            ));
        }

        info!(
            records = summary.records_migrated,
            errors = errors,
            error_rate = summary.error_rate,
            validations = summary.validations_run,
            duration_ms = summary.duration_ms,
            "ETL run completed"
        );
        Ok(summary)
    }

    async fn migrate_measurement(&self, measurement: &str) -> Result<MeasurementSummary> {
        let total = self
            .extractor
            .count_records(measurement, self.time_range)
            .await?;
        let offsets: Vec<usize> = (0..total).step_by(self.config.batch_size).collect();

        info!(
            measurement = %measurement,
            records = total,
            batches = offsets.len(),
            "Migrating measurement"
        );

        let outcomes: Vec<BatchOutcome> = stream::iter(offsets.into_iter().enumerate())
            .map(|(index, offset)| self.process_batch(measurement, offset, index))
            .buffer_unordered(self.config.concurrent_batches)
            .try_collect()
            .await?;

        let mut result = MeasurementSummary {
            total_records: total,
            batches: outcomes.len(),
            ..MeasurementSummary::default()
        };
        for outcome in outcomes {
            result.records_extracted += outcome.extracted;
            result.records_loaded += outcome.loaded;
            result.transform_errors += outcome.transform_errors;
            result.load_errors += outcome.load_errors;
            if !outcome.clean {
                result.failed_batches += 1;
            }
            if let Some(validation) = outcome.validation {
                result.validations.push(validation);
            }
        }
        Ok(result)
    }

    async fn process_batch(
        &self,
        measurement: &str,
        offset: usize,
        index: usize,
    ) -> Result<BatchOutcome> {
        if self.cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }

        let original = self
            .extractor
            .extract_data_batch(measurement, self.config.batch_size, offset, self.time_range)
            .await?;
        let extracted = original.len();
        let snapshot = (index % self.config.validation_interval() == 0).then(|| original.clone());

        let mut migrated = self.transformer.transform_batch(original).await;
        let transform_errors = migrated.error_count;
        let loaded_ok = self.loader.load_batch(&mut migrated).await;
        let load_errors = migrated.error_count - transform_errors;

        let validation =
            snapshot.map(|original| self.validator.validate_batch_migration(&original, &migrated));

        let throttle = self.config.throttle_delay();
        if !throttle.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(MigrationError::Cancelled),
                _ = tokio::time::sleep(throttle) => {}
            }
        }

        Ok(BatchOutcome {
            extracted,
            loaded: migrated.success_count,
            transform_errors,
            load_errors,
            clean: loaded_ok && transform_errors == 0,
            validation,
        })
    }
}
