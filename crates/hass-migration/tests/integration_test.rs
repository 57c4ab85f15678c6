use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hass_core::Result as CoreResult;
use hass_migration::{
    MigrationConfig, MigrationOrchestrator, MigrationOutcome, MigrationPhase, MigrationStrategy,
    SchemaTarget,
};
use hass_timeseries::{
    MemoryStore, RetentionPolicyManager, RetentionSettings, TelemetryPoint, TimeRange,
    TimeSeriesQuery, TimeSeriesStore,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::Mutex;
use tokio::time::sleep;

const DOMAINS: [&str; 4] = ["sensor", "light", "switch", "climate"];

async fn legacy_store(count: i64) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let base = Utc::now() - Duration::hours(3);
    for i in 0..count {
        let domain = DOMAINS[(i % 4) as usize];
        let state = match domain {
            "light" | "switch" => "on".to_string(),
            _ => format!("{}.25", 20 + i % 5),
        };
        let point = TelemetryPoint::builder(domain)
            .timestamp(base + Duration::seconds(i))
            .tag("domain", domain)
            .tag("entity_id", format!("{}.unit_{}", domain, i % 5))
            .field("state", state)
            .field("value", i as f64)
            .build()
            .unwrap();
        store.write_point(&point).await.unwrap();
    }
    store
}

fn config(dir: &Path, strategy: MigrationStrategy) -> MigrationConfig {
    MigrationConfig {
        strategy,
        batch_size: 8,
        concurrent_batches: 2,
        throttle_delay_ms: 0,
        validate_percentage: 0.25,
        report_dir: dir.to_path_buf(),
        ..MigrationConfig::default()
    }
}

/// 写入时把时间戳推后一小时，新旧记录无法对齐
struct ShiftingStore {
    inner: MemoryStore,
}

#[async_trait]
impl TimeSeriesStore for ShiftingStore {
    async fn health_check(&self) -> CoreResult<()> {
        self.inner.health_check().await
    }

    async fn initialize_schema(&self, measurements: &[String]) -> CoreResult<()> {
        self.inner.initialize_schema(measurements).await
    }

    async fn write_point(&self, point: &TelemetryPoint) -> CoreResult<()> {
        let shifted = TelemetryPoint::new(
            point.measurement(),
            point.timestamp() + Duration::hours(1),
            point.tags().clone(),
            point.fields().clone(),
        )
        .map_err(|e| hass_core::HassError::InvalidInput(e.to_string()))?;
        self.inner.write_point(&shifted).await
    }

    async fn query(&self, query: &TimeSeriesQuery) -> CoreResult<Vec<TelemetryPoint>> {
        self.inner.query(query).await
    }

    async fn count(&self, query: &TimeSeriesQuery) -> CoreResult<usize> {
        self.inner.count(query).await
    }

    async fn list_measurements(&self, range: Option<TimeRange>) -> CoreResult<Vec<String>> {
        self.inner.list_measurements(range).await
    }

    async fn delete_before(&self, measurement: &str, cutoff: DateTime<Utc>) -> CoreResult<u64> {
        self.inner.delete_before(measurement, cutoff).await
    }

    async fn drop_measurement(&self, measurement: &str) -> CoreResult<u64> {
        self.inner.drop_measurement(measurement).await
    }
}

#[tokio::test]
async fn test_immediate_migration_end_to_end() {
    let dir = tempdir().unwrap();
    let old = legacy_store(40).await;
    let new = Arc::new(MemoryStore::new());
    let retention = RetentionPolicyManager::new(RetentionSettings::default()).unwrap();

    let orchestrator = MigrationOrchestrator::new(
        MigrationConfig {
            keep_old_data: false,
            ..config(dir.path(), MigrationStrategy::Immediate)
        },
        old.clone(),
        new.clone(),
    )
    .with_retention(Arc::new(Mutex::new(retention)))
    .with_migration_id("migration_e2e");

    let outcome = orchestrator.start_migration().await;
    let report_path = match &outcome {
        MigrationOutcome::Success { report_path, .. } => report_path.clone(),
        MigrationOutcome::Error { message, .. } => panic!("migration failed: {}", message),
    };

    let metrics = outcome.metrics();
    assert_eq!(metrics.total_records, 40);
    assert_eq!(metrics.records_migrated, 40);
    assert_eq!(metrics.backup_records, Some(40));
    assert_eq!(metrics.old_measurement_count, 4);
    assert_eq!(metrics.new_measurement_count, 1);
    assert_eq!(metrics.performance_improvement, Some(0.75));
    assert_eq!(metrics.sample_consistency_rate, Some(1.0));
    assert_eq!(metrics.old_records_purged, 40);

    assert!(old.is_empty().await);
    assert_eq!(
        new.count(&TimeSeriesQuery::measurement("ha_entities"))
            .await
            .unwrap(),
        40
    );

    let status = orchestrator.get_migration_status().await;
    assert!(!status.active);
    assert_eq!(status.current_phase, Some(MigrationPhase::Complete));
    assert_eq!(status.phase_history, MigrationPhase::SEQUENCE.to_vec());
    assert!(!status.rollback_requested);

    let router = orchestrator.router().state();
    assert!(!router.dual_write);
    assert_eq!(router.read_target, SchemaTarget::New);
    assert_eq!(router.write_target, SchemaTarget::New);

    // 最终报告与备份保留，中间 ETL 报告被清理
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["migration_id"], "migration_e2e");
    assert_eq!(report["phases_completed"].as_array().unwrap().len(), 5);
    assert_eq!(report["retention_plan"]["ha_entities"], "recent");
    assert!(dir.path().join("backup_migration_e2e.json").exists());
    assert!(!dir.path().join("etl_migration_e2e.json").exists());
}

#[tokio::test]
async fn test_blue_green_switches_all_traffic() {
    let dir = tempdir().unwrap();
    let orchestrator = MigrationOrchestrator::new(
        MigrationConfig {
            migration_window_hours: 0.0,
            cleanup_delay_hours: 0.0,
            backup_old_schema: false,
            ..config(dir.path(), MigrationStrategy::BlueGreen)
        },
        legacy_store(16).await,
        Arc::new(MemoryStore::new()),
    );

    let outcome = orchestrator.start_migration().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.metrics().backup_records, None);
    assert_eq!(orchestrator.router().read_target(), SchemaTarget::New);
}

#[tokio::test]
async fn test_empty_source_fails_preparation() {
    let dir = tempdir().unwrap();
    let orchestrator = MigrationOrchestrator::new(
        config(dir.path(), MigrationStrategy::Immediate),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryStore::new()),
    )
    .with_migration_id("migration_empty");

    let outcome = orchestrator.start_migration().await;
    match outcome {
        MigrationOutcome::Error { message, .. } => {
            assert!(message.contains("no source data"), "{}", message)
        }
        MigrationOutcome::Success { .. } => panic!("empty source must fail"),
    }

    let status = orchestrator.get_migration_status().await;
    assert_eq!(status.current_phase, Some(MigrationPhase::Preparation));
    assert_eq!(status.error_count, 1);
    assert!(status.rollback_requested);
    assert!(dir.path().join("migration_report_migration_empty.json").exists());
}

#[tokio::test]
async fn test_inconsistent_target_fails_validation() {
    let dir = tempdir().unwrap();
    let new = Arc::new(ShiftingStore {
        inner: MemoryStore::new(),
    });
    let orchestrator = MigrationOrchestrator::new(
        config(dir.path(), MigrationStrategy::Immediate),
        legacy_store(20).await,
        new,
    );

    let outcome = orchestrator.start_migration().await;
    match &outcome {
        MigrationOutcome::Error { message, metrics, .. } => {
            assert!(message.starts_with("Consistency violation"), "{}", message);
            assert_eq!(metrics.sample_consistency_rate, Some(0.0));
        }
        MigrationOutcome::Success { .. } => panic!("shifted records must not validate"),
    }

    let status = orchestrator.get_migration_status().await;
    assert_eq!(status.current_phase, Some(MigrationPhase::Validation));
    assert!(MigrationPhase::is_valid_prefix(&status.phase_history));
    assert!(status.rollback_requested);
    // 切换前失败，流量仍在旧模式
    assert_eq!(orchestrator.router().read_target(), SchemaTarget::Old);
}

#[tokio::test]
async fn test_second_start_rejected_while_running() {
    let dir = tempdir().unwrap();
    let orchestrator = Arc::new(MigrationOrchestrator::new(
        MigrationConfig {
            migration_window_hours: 1.0,
            ..config(dir.path(), MigrationStrategy::DualWrite)
        },
        legacy_store(12).await,
        Arc::new(MemoryStore::new()),
    ));

    let running = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.start_migration().await }
    });

    // 等待进入双写等待窗口
    for _ in 0..200 {
        let status = orchestrator.get_migration_status().await;
        if status.current_phase == Some(MigrationPhase::DualWrite)
            && status.metrics.records_migrated == 12
        {
            break;
        }
        sleep(std::time::Duration::from_millis(10)).await;
    }
    let before = orchestrator.get_migration_status().await;
    assert!(before.active);
    assert!(orchestrator.router().state().dual_write);

    let second = orchestrator.start_migration().await;
    match second {
        MigrationOutcome::Error { message, .. } => {
            assert_eq!(message, "Migration already in progress")
        }
        MigrationOutcome::Success { .. } => panic!("second start must be rejected"),
    }

    let after = orchestrator.get_migration_status().await;
    assert_eq!(after.phase_history, before.phase_history);
    assert_eq!(after.metrics.records_migrated, before.metrics.records_migrated);
    assert_eq!(after.error_count, 0);

    orchestrator.cancel_token().cancel();
    let outcome = running.await.unwrap();
    match outcome {
        MigrationOutcome::Error { message, .. } => assert_eq!(message, "Migration cancelled"),
        MigrationOutcome::Success { .. } => panic!("cancelled migration must fail"),
    }

    let status = orchestrator.get_migration_status().await;
    assert!(!status.active);
    assert_eq!(status.current_phase, Some(MigrationPhase::DualWrite));
    assert!(status.rollback_requested);
}

#[tokio::test]
async fn test_oversized_window_fails_preparation() {
    let dir = tempdir().unwrap();
    let orchestrator = MigrationOrchestrator::new(
        MigrationConfig {
            migration_window_hours: 1e16,
            ..config(dir.path(), MigrationStrategy::DualWrite)
        },
        legacy_store(8).await,
        Arc::new(MemoryStore::new()),
    );

    let outcome = orchestrator.start_migration().await;
    match outcome {
        MigrationOutcome::Error { message, .. } => {
            assert!(message.contains("migration_window_hours"), "{}", message)
        }
        MigrationOutcome::Success { .. } => panic!("oversized window must be rejected"),
    }

    let status = orchestrator.get_migration_status().await;
    assert!(!status.active);
    assert_eq!(status.current_phase, Some(MigrationPhase::Preparation));
}

/// 健康检查直接 panic 的存储
struct PanickingStore {
    inner: MemoryStore,
}

#[async_trait]
impl TimeSeriesStore for PanickingStore {
    async fn health_check(&self) -> CoreResult<()> {
        panic!("storage driver crashed");
    }

    async fn initialize_schema(&self, measurements: &[String]) -> CoreResult<()> {
        self.inner.initialize_schema(measurements).await
    }

    async fn write_point(&self, point: &TelemetryPoint) -> CoreResult<()> {
        self.inner.write_point(point).await
    }

    async fn query(&self, query: &TimeSeriesQuery) -> CoreResult<Vec<TelemetryPoint>> {
        self.inner.query(query).await
    }

    async fn count(&self, query: &TimeSeriesQuery) -> CoreResult<usize> {
        self.inner.count(query).await
    }

    async fn list_measurements(&self, range: Option<TimeRange>) -> CoreResult<Vec<String>> {
        self.inner.list_measurements(range).await
    }

    async fn delete_before(&self, measurement: &str, cutoff: DateTime<Utc>) -> CoreResult<u64> {
        self.inner.delete_before(measurement, cutoff).await
    }

    async fn drop_measurement(&self, measurement: &str) -> CoreResult<u64> {
        self.inner.drop_measurement(measurement).await
    }
}

#[tokio::test]
async fn test_panicking_run_releases_active_flag() {
    let dir = tempdir().unwrap();
    let orchestrator = Arc::new(MigrationOrchestrator::new(
        config(dir.path(), MigrationStrategy::Immediate),
        legacy_store(8).await,
        Arc::new(PanickingStore {
            inner: MemoryStore::new(),
        }),
    ));

    let crashed = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.start_migration().await }
    })
    .await;
    assert!(crashed.unwrap_err().is_panic());
    assert!(!orchestrator.is_active());

    // 标记已释放，再次启动会真正执行而不是被拒绝
    let retried = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.start_migration().await }
    })
    .await;
    assert!(retried.unwrap_err().is_panic());
}
