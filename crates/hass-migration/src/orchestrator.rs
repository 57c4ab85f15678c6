//! 分阶段双写迁移
//!
//! PREPARATION -> DUAL_WRITE -> VALIDATION -> SWITCH_OVER -> CLEANUP -> COMPLETE，
//! 只能顺序前进；任一阶段失败即终止本次迁移并发出回滚信号。

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hass_timeseries::{
    EventToPointTransformer, SharedRetentionManager, SharedStore, TimeRange, TimeSeriesQuery,
    TimeSeriesStore, TransformerConfig, CANONICAL_MEASUREMENTS,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backup::export_store;
use crate::config::{MigrationConfig, MigrationStrategy};
use crate::error::{MigrationError, Result};
use crate::etl::validator::compare_records;
use crate::etl::{MigrationRunner, RunSummary};
use crate::phase::MigrationPhase;
use crate::report::{remove_if_exists, write_json_atomic};
use crate::router::{SchemaTarget, TrafficRouter};

/// 性能提升下限（新旧 measurement 数量之比）
pub const MIN_PERFORMANCE_IMPROVEMENT: f64 = 0.5;

/// 迁移指标
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationMetrics {
    pub total_records: usize,
    pub records_migrated: usize,
    pub transform_errors: usize,
    pub load_errors: usize,
    pub error_rate: f64,
    pub batches_processed: usize,
    pub validation_batches: usize,
    pub batch_consistency_score: f64,
    pub backup_records: Option<usize>,
    pub old_measurement_count: usize,
    pub new_measurement_count: usize,
    pub sample_consistency_rate: Option<f64>,
    pub performance_improvement: Option<f64>,
    pub compatibility_score: Option<f64>,
    pub throughput_records_per_sec: f64,
    pub old_records_purged: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

/// VALIDATION 阶段各项检查结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResults {
    pub sample_size: usize,
    pub samples_consistent: usize,
    pub consistency_passed: bool,
    pub performance_passed: bool,
    pub stored_records: usize,
    pub integrity_passed: bool,
    pub compatibility_score: Option<f64>,
    pub issues: Vec<String>,
}

/// 阶段失败记录
#[derive(Debug, Clone, Serialize)]
pub struct PhaseError {
    pub phase: MigrationPhase,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// 迁移报告
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub migration_id: String,
    pub strategy: MigrationStrategy,
    pub generated_at: DateTime<Utc>,
    pub metrics: MigrationMetrics,
    pub phases_completed: Vec<MigrationPhase>,
    pub validation_results: ValidationResults,
    pub error_summary: Vec<PhaseError>,
    pub rollback_requested: bool,
    pub retention_plan: BTreeMap<String, String>,
    pub recommendations: Vec<String>,
}

/// 迁移状态快照
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub migration_id: String,
    pub active: bool,
    pub current_phase: Option<MigrationPhase>,
    pub phase_history: Vec<MigrationPhase>,
    pub rollback_requested: bool,
    pub error_count: usize,
    pub metrics: MigrationMetrics,
}

/// 迁移结果
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationOutcome {
    Success {
        migration_id: String,
        report_path: PathBuf,
        metrics: MigrationMetrics,
    },
    Error {
        message: String,
        migration_id: String,
        metrics: MigrationMetrics,
    },
}

impl MigrationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MigrationOutcome::Success { .. })
    }

    pub fn metrics(&self) -> &MigrationMetrics {
        match self {
            MigrationOutcome::Success { metrics, .. } | MigrationOutcome::Error { metrics, .. } => {
                metrics
            }
        }
    }
}

#[derive(Default)]
struct RunState {
    current_phase: Option<MigrationPhase>,
    phase_history: Vec<MigrationPhase>,
    phases_completed: Vec<MigrationPhase>,
    metrics: MigrationMetrics,
    validation: ValidationResults,
    errors: Vec<PhaseError>,
    rollback_requested: bool,
    retention_plan: BTreeMap<String, String>,
    old_measurements: Vec<String>,
}

/// 离开作用域时清除运行标记，panic 展开时同样生效
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 迁移编排器
pub struct MigrationOrchestrator {
    migration_id: String,
    config: MigrationConfig,
    transformer_config: TransformerConfig,
    router: Arc<TrafficRouter>,
    retention: Option<SharedRetentionManager>,
    cancel: CancellationToken,
    active: AtomicBool,
    state: Mutex<RunState>,
}

impl MigrationOrchestrator {
    pub fn new(config: MigrationConfig, old_store: SharedStore, new_store: SharedStore) -> Self {
        Self {
            migration_id: format!("migration_{}", Uuid::new_v4().simple()),
            config: config.effective(),
            transformer_config: TransformerConfig::default(),
            router: Arc::new(TrafficRouter::new(old_store, new_store)),
            retention: None,
            cancel: CancellationToken::new(),
            active: AtomicBool::new(false),
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn with_migration_id(mut self, migration_id: impl Into<String>) -> Self {
        self.migration_id = migration_id.into();
        self
    }

    pub fn with_transformer_config(mut self, config: TransformerConfig) -> Self {
        let router = TrafficRouter::new(
            self.router.old_store().clone(),
            self.router.new_store().clone(),
        )
        .with_transformer_config(config.clone());
        self.router = Arc::new(router);
        self.transformer_config = config;
        self
    }

    pub fn with_retention(mut self, retention: SharedRetentionManager) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn migration_id(&self) -> &str {
        &self.migration_id
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// 写入方应使用的存储句柄，随阶段切换流量
    pub fn router(&self) -> Arc<TrafficRouter> {
        self.router.clone()
    }

    /// 取消后正在进行的等待与批处理会尽快退出，本次迁移以失败结束
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn old_store(&self) -> &SharedStore {
        self.router.old_store()
    }

    fn new_store(&self) -> &SharedStore {
        self.router.new_store()
    }

    fn report_path(&self) -> PathBuf {
        self.config
            .report_dir
            .join(format!("migration_report_{}.json", self.migration_id))
    }

    fn etl_report_path(&self) -> PathBuf {
        self.config
            .report_dir
            .join(format!("etl_{}.json", self.migration_id))
    }

    fn backup_path(&self) -> PathBuf {
        self.config
            .report_dir
            .join(format!("backup_{}.json", self.migration_id))
    }

    /// 只读状态快照
    pub async fn get_migration_status(&self) -> MigrationStatus {
        let state = self.state.lock().await;
        MigrationStatus {
            migration_id: self.migration_id.clone(),
            active: self.is_active(),
            current_phase: state.current_phase,
            phase_history: state.phase_history.clone(),
            rollback_requested: state.rollback_requested,
            error_count: state.errors.len(),
            metrics: state.metrics.clone(),
        }
    }

    pub async fn rollback_requested(&self) -> bool {
        self.state.lock().await.rollback_requested
    }

    /// 启动迁移
    ///
    /// 已有迁移在进行时直接返回错误结果，不修改进行中的状态。
    pub async fn start_migration(&self) -> MigrationOutcome {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(migration_id = %self.migration_id, "Migration already in progress");
            let metrics = self.state.lock().await.metrics.clone();
            return MigrationOutcome::Error {
                message: MigrationError::AlreadyRunning.to_string(),
                migration_id: self.migration_id.clone(),
                metrics,
            };
        }
        let _active = ActiveGuard(&self.active);

        {
            let mut state = self.state.lock().await;
            *state = RunState::default();
            state.metrics.started_at = Some(Utc::now());
        }

        info!(
            migration_id = %self.migration_id,
            strategy = %self.config.strategy.as_str(),
            "Migration started"
        );

        let result = self.run_phases().await;
        let outcome = match result {
            Ok(report_path) => {
                let metrics = self.state.lock().await.metrics.clone();
                info!(
                    migration_id = %self.migration_id,
                    records = metrics.records_migrated,
                    duration_secs = metrics.duration_secs,
                    "Migration completed"
                );
                MigrationOutcome::Success {
                    migration_id: self.migration_id.clone(),
                    report_path,
                    metrics,
                }
            }
            Err((phase, e)) => self.handle_failure(phase, e).await,
        };

        outcome
    }

    async fn run_phases(&self) -> std::result::Result<PathBuf, (MigrationPhase, MigrationError)> {
        let mut report_path = None;

        for phase in MigrationPhase::SEQUENCE {
            self.enter_phase(phase).await;
            if phase == MigrationPhase::Complete {
                break;
            }

            let result = if self.cancel.is_cancelled() {
                Err(MigrationError::Cancelled)
            } else {
                match phase {
                    MigrationPhase::Preparation => self.prepare().await,
                    MigrationPhase::DualWrite => self.dual_write().await,
                    MigrationPhase::Validation => self.validate_within_window().await,
                    MigrationPhase::SwitchOver => self.switch_over().await,
                    MigrationPhase::Cleanup => self.cleanup().await.map(|path| {
                        report_path = Some(path);
                    }),
                    MigrationPhase::Complete => Ok(()),
                }
            };

            if let Err(e) = result {
                return Err((phase, e));
            }
            self.state.lock().await.phases_completed.push(phase);
            info!(migration_id = %self.migration_id, phase = %phase, "Phase completed");
        }

        let mut state = self.state.lock().await;
        let now = Utc::now();
        state.metrics.completed_at = Some(now);
        if let Some(started) = state.metrics.started_at {
            state.metrics.duration_secs = (now - started).num_milliseconds() as f64 / 1000.0;
        }
        drop(state);

        report_path.ok_or((
            MigrationPhase::Complete,
            MigrationError::phase(MigrationPhase::Complete, "final report missing"),
        ))
    }

    async fn enter_phase(&self, phase: MigrationPhase) {
        let mut state = self.state.lock().await;
        state.current_phase = Some(phase);
        state.phase_history.push(phase);
        info!(migration_id = %self.migration_id, phase = %phase, "Entering phase");
    }

    async fn handle_failure(&self, phase: MigrationPhase, e: MigrationError) -> MigrationOutcome {
        error!(
            migration_id = %self.migration_id,
            phase = %phase,
            error = %e,
            "Migration phase failed"
        );

        let metrics = {
            let mut state = self.state.lock().await;
            state.errors.push(PhaseError {
                phase,
                timestamp: Utc::now(),
                message: e.to_string(),
            });
            if !state.rollback_requested {
                state.rollback_requested = true;
                error!(
                    migration_id = %self.migration_id,
                    phase = %phase,
                    "Rollback requested"
                );
            }
            state.metrics.completed_at = Some(Utc::now());
            state.metrics.clone()
        };

        // 失败时也留下报告，便于排查
        let report = self.build_report(false).await;
        if let Err(report_err) = write_json_atomic(&self.report_path(), &report).await {
            warn!(error = %report_err, "Failed to write failure report");
        }

        MigrationOutcome::Error {
            message: e.to_string(),
            migration_id: self.migration_id.clone(),
            metrics,
        }
    }

    /// 可取消的等待；immediate 策略跳过
    async fn hold(&self, phase: MigrationPhase, duration: Duration) -> Result<()> {
        if self.config.strategy.skips_holds() || duration.is_zero() {
            info!(phase = %phase, "Hold skipped");
            return Ok(());
        }

        info!(phase = %phase, hold_secs = duration.as_secs_f64(), "Holding");
        tokio::select! {
            _ = self.cancel.cancelled() => {
                warn!(phase = %phase, "Hold cancelled");
                Err(MigrationError::Cancelled)
            }
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn prepare(&self) -> Result<()> {
        let phase = MigrationPhase::Preparation;
        self.config.validate()?;

        self.old_store()
            .health_check()
            .await
            .map_err(|e| MigrationError::phase(phase, format!("old schema unreachable: {}", e)))?;
        self.new_store()
            .health_check()
            .await
            .map_err(|e| MigrationError::phase(phase, format!("new schema unreachable: {}", e)))?;

        let old_measurements = self.old_store().list_measurements(None).await?;
        if old_measurements.is_empty() {
            return Err(MigrationError::phase(phase, "no source data to migrate"));
        }
        let total_records = self.old_store().count(&TimeSeriesQuery::new()).await?;

        let backup_records = if self.config.backup_old_schema {
            let summary = export_store(self.old_store(), &self.backup_path()).await?;
            Some(summary.records)
        } else {
            None
        };

        let canonical: Vec<String> = CANONICAL_MEASUREMENTS.iter().map(|m| m.to_string()).collect();
        self.new_store().initialize_schema(&canonical).await?;

        let retention_plan = match &self.retention {
            Some(retention) => {
                let retention = retention.lock().await;
                canonical
                    .iter()
                    .map(|m| (m.clone(), retention.policy_name_for(m).to_string()))
                    .collect()
            }
            None => BTreeMap::new(),
        };

        info!(
            measurements = old_measurements.len(),
            records = total_records,
            backup = backup_records.is_some(),
            "Preparation finished"
        );

        let mut state = self.state.lock().await;
        state.metrics.total_records = total_records;
        state.metrics.old_measurement_count = old_measurements.len();
        state.metrics.backup_records = backup_records;
        state.old_measurements = old_measurements;
        state.retention_plan = retention_plan;
        Ok(())
    }

    async fn dual_write(&self) -> Result<()> {
        let phase = MigrationPhase::DualWrite;
        self.router.enable_dual_write();

        let runner = MigrationRunner::new(
            self.config.clone(),
            self.old_store().clone(),
            self.new_store().clone(),
            EventToPointTransformer::new(self.transformer_config.clone()),
        )
        .with_cancel_token(self.cancel.child_token())
        .with_report_path(self.etl_report_path());

        let summary = runner.run(None).await;
        self.record_etl(&summary).await;

        if self.cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        if !summary.success {
            let reason = summary.error.unwrap_or_else(|| "ETL run failed".to_string());
            return Err(MigrationError::phase(phase, reason));
        }

        self.new_store()
            .health_check()
            .await
            .map_err(|e| MigrationError::phase(phase, format!("new schema unhealthy: {}", e)))?;

        self.hold(phase, self.config.migration_window()?).await
    }

    async fn record_etl(&self, summary: &RunSummary) {
        let mut state = self.state.lock().await;
        let metrics = &mut state.metrics;
        metrics.records_migrated = summary.records_migrated;
        metrics.transform_errors = summary.transform_errors;
        metrics.load_errors = summary.load_errors;
        metrics.error_rate = summary.error_rate;
        metrics.batches_processed = summary.batches_processed;
        metrics.validation_batches = summary.validations_run;
        metrics.batch_consistency_score = summary.avg_consistency_score;
        metrics.throughput_records_per_sec = summary.records_per_second;
    }

    async fn validate_within_window(&self) -> Result<()> {
        let window = self.config.validation_window()?;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(MigrationError::Cancelled),
            result = tokio::time::timeout(window, self.validate_migration()) => match result {
                Ok(result) => result,
                Err(_) => Err(MigrationError::Timeout(format!(
                    "validation exceeded {:.2}h window",
                    self.config.validation_window_hours
                ))),
            },
        }
    }

    async fn validate_migration(&self) -> Result<()> {
        let phase = MigrationPhase::Validation;
        let (total_records, old_measurements, records_migrated) = {
            let state = self.state.lock().await;
            (
                state.metrics.total_records,
                state.old_measurements.clone(),
                state.metrics.records_migrated,
            )
        };

        // 1. 抽样一致性
        let (sampled, consistent, issues) = self.sample_consistency(total_records, &old_measurements).await?;
        let rate = if sampled == 0 { 1.0 } else { consistent as f64 / sampled as f64 };
        let required = self.config.min_consistency_rate();
        {
            let mut state = self.state.lock().await;
            state.validation.sample_size = sampled;
            state.validation.samples_consistent = consistent;
            state.validation.consistency_passed = rate >= required;
            state.validation.issues = issues;
            state.metrics.sample_consistency_rate = Some(rate);
        }
        info!(sampled = sampled, consistent = consistent, rate = rate, "Sample validation finished");
        if rate < required {
            return Err(MigrationError::ConsistencyViolation { rate, required });
        }

        // 2. 性能提升：measurement 合并比例
        let new_measurements = self.new_store().list_measurements(None).await?;
        let improvement = if old_measurements.is_empty() {
            0.0
        } else {
            (1.0 - new_measurements.len() as f64 / old_measurements.len() as f64).max(0.0)
        };
        {
            let mut state = self.state.lock().await;
            state.metrics.new_measurement_count = new_measurements.len();
            state.metrics.performance_improvement = Some(improvement);
            state.validation.performance_passed = improvement >= MIN_PERFORMANCE_IMPROVEMENT;
        }
        if improvement < MIN_PERFORMANCE_IMPROVEMENT {
            return Err(MigrationError::phase(
                phase,
                format!(
                    "performance improvement {:.2} below {:.2}",
                    improvement, MIN_PERFORMANCE_IMPROVEMENT
                ),
            ));
        }

        // 3. 数据完整性
        let stored = self.new_store().count(&TimeSeriesQuery::new()).await?;
        let integrity = stored >= records_migrated;
        {
            let mut state = self.state.lock().await;
            state.validation.stored_records = stored;
            state.validation.integrity_passed = integrity;
        }
        if !integrity {
            return Err(MigrationError::phase(
                phase,
                format!("{} records stored, {} migrated", stored, records_migrated),
            ));
        }

        // 4. 查询兼容性
        let mut compatible = 0usize;
        for measurement in &new_measurements {
            let probe = self
                .new_store()
                .query(&TimeSeriesQuery::measurement(measurement.as_str()).with_limit(1))
                .await;
            if probe.is_ok() && CANONICAL_MEASUREMENTS.contains(&measurement.as_str()) {
                compatible += 1;
            }
        }
        let compatibility = if new_measurements.is_empty() {
            0.0
        } else {
            compatible as f64 / new_measurements.len() as f64
        };
        let mut state = self.state.lock().await;
        state.validation.compatibility_score = Some(compatibility);
        state.metrics.compatibility_score = Some(compatibility);
        info!(
            improvement = improvement,
            stored = stored,
            compatibility = compatibility,
            "Validation finished"
        );
        Ok(())
    }

    /// 按全局位置均匀抽样，在新模式中按时间戳查找对应记录
    async fn sample_consistency(
        &self,
        total_records: usize,
        measurements: &[String],
    ) -> Result<(usize, usize, Vec<String>)> {
        if total_records == 0 {
            return Ok((0, 0, Vec::new()));
        }
        let sample_size = ((total_records as f64 * self.config.validate_percentage).ceil() as usize)
            .clamp(1, total_records);
        let step = (total_records / sample_size).max(1);

        let mut counts = Vec::with_capacity(measurements.len());
        for measurement in measurements {
            let count = self
                .old_store()
                .count(&TimeSeriesQuery::measurement(measurement.as_str()))
                .await?;
            counts.push((measurement.as_str(), count));
        }

        let mut sampled = 0usize;
        let mut consistent = 0usize;
        let mut issues = Vec::new();

        for position in (0..sample_size).map(|i| i * step) {
            let Some((measurement, offset)) = locate(&counts, position) else {
                continue;
            };
            let Some(original) = self
                .old_store()
                .query(
                    &TimeSeriesQuery::measurement(measurement)
                        .with_offset(offset)
                        .with_limit(1),
                )
                .await?
                .into_iter()
                .next()
            else {
                continue;
            };

            let ts = original.timestamp();
            let window = TimeRange::new(ts, ts + ChronoDuration::nanoseconds(1));
            let candidates = self
                .new_store()
                .query(&TimeSeriesQuery::new().with_time_range(window))
                .await?;

            sampled += 1;
            if candidates
                .iter()
                .any(|candidate| compare_records(&original, candidate).is_empty())
            {
                consistent += 1;
            } else if issues.len() < 20 {
                issues.push(format!(
                    "{}@{}: no consistent migrated record",
                    measurement, ts
                ));
            }
        }

        Ok((sampled, consistent, issues))
    }

    async fn switch_over(&self) -> Result<()> {
        let phase = MigrationPhase::SwitchOver;
        match self.config.strategy {
            MigrationStrategy::BlueGreen => self.router.switch_all(SchemaTarget::New),
            _ => {
                self.router.switch_reads(SchemaTarget::New);
                self.router.switch_writes(SchemaTarget::New);
            }
        }

        self.new_store()
            .health_check()
            .await
            .map_err(|e| MigrationError::phase(phase, format!("new schema unhealthy after switch: {}", e)))?;

        self.router.disable_dual_write();
        Ok(())
    }

    async fn cleanup(&self) -> Result<PathBuf> {
        let phase = MigrationPhase::Cleanup;
        self.hold(phase, self.config.cleanup_delay()?).await?;

        if !self.config.keep_old_data {
            let measurements = self.state.lock().await.old_measurements.clone();
            let mut purged = 0u64;
            for measurement in &measurements {
                purged += self.old_store().drop_measurement(measurement).await?;
            }
            info!(measurements = measurements.len(), records = purged, "Old schema purged");
            self.state.lock().await.metrics.old_records_purged = purged;
        }

        remove_if_exists(&self.etl_report_path()).await?;

        let report = self.build_report(true).await;
        let path = self.report_path();
        write_json_atomic(&path, &report).await?;
        Ok(path)
    }

    /// `finishing` 为 true 时当前阶段计入已完成阶段
    async fn build_report(&self, finishing: bool) -> MigrationReport {
        let state = self.state.lock().await;
        let mut phases_completed = state.phases_completed.clone();
        if finishing {
            if let Some(phase) = state.current_phase {
                phases_completed.push(phase);
            }
        }

        MigrationReport {
            migration_id: self.migration_id.clone(),
            strategy: self.config.strategy,
            generated_at: Utc::now(),
            metrics: state.metrics.clone(),
            phases_completed,
            validation_results: state.validation.clone(),
            error_summary: state.errors.clone(),
            rollback_requested: state.rollback_requested,
            retention_plan: state.retention_plan.clone(),
            recommendations: recommendations(&self.config, &state.metrics),
        }
    }
}

/// 全局位置映射到 (measurement, offset)
fn locate<'a>(counts: &[(&'a str, usize)], mut position: usize) -> Option<(&'a str, usize)> {
    for (measurement, count) in counts {
        if position < *count {
            return Some((*measurement, position));
        }
        position -= count;
    }
    None
}

/// 根据指标阈值生成建议
fn recommendations(config: &MigrationConfig, metrics: &MigrationMetrics) -> Vec<String> {
    let mut out = Vec::new();

    if metrics.error_rate > 0.0 {
        out.push(format!(
            "{} records failed to migrate ({:.2}% error rate); review the transformation errors",
            metrics.transform_errors + metrics.load_errors,
            metrics.error_rate * 100.0
        ));
    }
    if let Some(rate) = metrics.sample_consistency_rate {
        if rate < 1.0 {
            out.push(format!(
                "Sample consistency {:.1}%; re-run validation on the affected measurements",
                rate * 100.0
            ));
        }
    }
    if let Some(improvement) = metrics.performance_improvement {
        if improvement >= 0.8 {
            out.push(format!(
                "Measurement count reduced by {:.0}%; update dashboards to the consolidated measurements",
                improvement * 100.0
            ));
        }
    }
    if metrics.records_migrated > 0 && metrics.throughput_records_per_sec < 100.0 {
        out.push("Low migration throughput; consider a larger batch_size or more concurrent_batches".to_string());
    }
    if config.keep_old_data {
        out.push("Old schema data retained; purge it once the new schema has been verified".to_string());
    }
    if out.is_empty() {
        out.push("Migration completed without issues".to_string());
    }
    out
}
