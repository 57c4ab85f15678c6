use anyhow::Result;
use hass_config::GlobalConfig;
use hass_core::{EventBus, SharedEventBus};
use hass_migration::{
    MigrationOrchestrator, MigrationOutcome, MigrationRunner, RouterState, RunSummary,
    TrafficRouter,
};
use hass_timeseries::{
    encode_points, AnalysisOutcome, CleanupReport, EventToPointTransformer, IngestPipeline,
    IngestSummary, OptimizationReport, RetentionPolicyManager, RetentionScheduler, ScheduledTask,
    SchemaOptimizer, SharedRetentionManager, SharedStore, TaskType, TimeSeriesQuery,
    TimeSeriesStore,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::stores::{build_store, read_events, read_points, seed_store};

/// 模式分析结果
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeReport {
    pub points_read: usize,
    pub measurements: BTreeMap<String, usize>,
    pub original_bytes: usize,
    pub optimized_bytes: usize,
    pub analysis: AnalysisOutcome,
    pub optimization: OptimizationReport,
    pub cardinality: BTreeMap<String, usize>,
}

/// 实时摄取结果
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub summary: IngestSummary,
    pub routing: RouterState,
    /// 新模式存储中的数据点数
    pub stored_points: usize,
    /// 旧模式存储中的数据点数
    pub legacy_points: usize,
    pub prometheus: String,
}

async fn source_store(config: &GlobalConfig, input: Option<&Path>) -> Result<SharedStore> {
    let store = build_store(&config.storage.source).await?;
    if let Some(path) = input {
        seed_store(&store, path).await?;
    }
    Ok(store)
}

fn retention_manager(config: &GlobalConfig, store: SharedStore) -> Result<SharedRetentionManager> {
    let manager = RetentionPolicyManager::new(config.retention.clone())?.with_store(store);
    Ok(Arc::new(Mutex::new(manager)))
}

/// 完整分阶段迁移
pub async fn run_migrate(
    config: &GlobalConfig,
    input: Option<&Path>,
    cancel: CancellationToken,
) -> Result<MigrationOutcome> {
    let old = source_store(config, input).await?;
    let new = build_store(&config.storage.target).await?;
    let retention = retention_manager(config, new.clone())?;

    let orchestrator = MigrationOrchestrator::new(config.migration.clone(), old, new)
        .with_transformer_config(config.transformer.clone())
        .with_retention(retention)
        .with_cancel_token(cancel);

    info!(
        migration_id = %orchestrator.migration_id(),
        strategy = %orchestrator.config().strategy.as_str(),
        "Starting migration"
    );
    Ok(orchestrator.start_migration().await)
}

/// 仅运行批量 ETL，不切换流量
pub async fn run_etl(
    config: &GlobalConfig,
    input: Option<&Path>,
    measurements: Vec<String>,
    report: Option<PathBuf>,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let source = source_store(config, input).await?;
    let target = build_store(&config.storage.target).await?;

    let mut runner = MigrationRunner::new(
        config.migration.clone(),
        source,
        target,
        EventToPointTransformer::new(config.transformer.clone()),
    )
    .with_cancel_token(cancel);
    if let Some(path) = report {
        runner = runner.with_report_path(path);
    }

    let filter = (!measurements.is_empty()).then_some(measurements);
    Ok(runner.run(filter).await)
}

/// 对 line protocol 数据做模式分析与优化统计
pub async fn run_analyze(config: &GlobalConfig, input: &Path) -> Result<AnalyzeReport> {
    let points = read_points(input).await?;
    let mut optimizer = SchemaOptimizer::new(config.transformer.optimizer.clone());

    let mut measurements = BTreeMap::new();
    let mut optimized = Vec::with_capacity(points.len());
    for point in &points {
        *measurements
            .entry(point.measurement().to_string())
            .or_insert(0usize) += 1;
        match optimizer.optimize_point(point) {
            Ok(p) => optimized.push(p),
            Err(e) => warn!(measurement = %point.measurement(), error = %e, "Point not optimizable"),
        }
    }

    let analysis = optimizer.analyze_schema_patterns(&points);

    Ok(AnalyzeReport {
        points_read: points.len(),
        measurements,
        original_bytes: encode_points(&points)?.len(),
        optimized_bytes: encode_points(&optimized)?.len(),
        analysis,
        optimization: optimizer.get_optimization_report(),
        cardinality: optimizer.cardinality_snapshot(),
    })
}

/// 将 JSON 事件文件经事件总线和流量路由写入存储
///
/// `ingest.write_target` 决定主写入模式，
/// `ingest.dual_write` 打开时另一模式同步接收镜像写入。
pub async fn run_ingest(
    config: &GlobalConfig,
    events: &Path,
    cancel: CancellationToken,
) -> Result<IngestReport> {
    let events = read_events(events).await?;
    let old = build_store(&config.storage.source).await?;
    let new = build_store(&config.storage.target).await?;
    let retention = retention_manager(config, new.clone())?;

    let router = Arc::new(
        TrafficRouter::new(old.clone(), new.clone())
            .with_transformer_config(config.transformer.clone()),
    );
    router.switch_all(config.ingest.write_target);
    if config.ingest.dual_write {
        router.enable_dual_write();
    }

    let bus: SharedEventBus = Arc::new(EventBus::new(config.ingest.bus_capacity));
    let pipeline = IngestPipeline::new(
        &bus,
        EventToPointTransformer::new(config.transformer.clone()),
        retention,
        router.clone(),
    )
    .with_cancel_token(cancel.child_token());
    let metrics = pipeline.metrics();
    let handle = tokio::spawn(pipeline.run());

    for event in events {
        if cancel.is_cancelled() {
            warn!("Ingest interrupted");
            break;
        }
        bus.publish(event)?;
        tokio::task::yield_now().await;
    }
    // 发送端全部释放后管道读完缓冲区即退出
    drop(bus);

    let summary = handle.await?;
    let stored_points = new.count(&TimeSeriesQuery::new()).await?;
    let legacy_points = old.count(&TimeSeriesQuery::new()).await?;

    Ok(IngestReport {
        summary,
        routing: router.state(),
        stored_points,
        legacy_points,
        prometheus: metrics.export_prometheus(),
    })
}

/// 立即执行一次保留清理
pub async fn run_retention_cleanup(
    config: &GlobalConfig,
    input: Option<&Path>,
    force: bool,
) -> Result<CleanupReport> {
    let store = build_store(&config.storage.target).await?;
    if let Some(path) = input {
        seed_store(&store, path).await?;
    }
    let retention = retention_manager(config, store)?;
    let report = retention.lock().await.cleanup_expired_data(force).await;
    Ok(report)
}

/// 按 `cleanup_cron` 周期清理，直到取消
pub async fn run_retention_schedule(config: &GlobalConfig, cancel: CancellationToken) -> Result<()> {
    let store = build_store(&config.storage.target).await?;
    let retention = retention_manager(config, store)?;

    let mut scheduler = RetentionScheduler::new(retention).await?;
    scheduler
        .add_task(ScheduledTask::new(
            "Configured Retention Cleanup".to_string(),
            config.retention.cleanup_cron.clone(),
            TaskType::RetentionCleanup { force: false },
        ))
        .await?;
    scheduler.start().await?;

    cancel.cancelled().await;
    scheduler.shutdown().await?;
    Ok(())
}
