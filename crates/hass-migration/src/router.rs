use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hass_core::{HassError, Result};
use hass_timeseries::{
    EventToPointTransformer, SharedStore, TelemetryPoint, TimeRange, TimeSeriesQuery,
    TimeSeriesStore, TransformerConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::etl::legacy::{canonical_to_legacy_point, is_new_schema, legacy_point_to_event};

/// 流量目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaTarget {
    Old,
    New,
}

/// 路由状态快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterState {
    pub dual_write: bool,
    pub read_target: SchemaTarget,
    pub write_target: SchemaTarget,
    pub mirrored_writes: u64,
    pub mirror_failures: u64,
}

/// 新旧模式之间的流量路由
///
/// 写入可以是任一模式的数据点，落盘前按目标存储转换形状：
/// 写往新模式的旧数据点经事件转换器整合，写往旧模式的新数据点还原为旧形状。
/// 双写打开时每次写入同时落到两个存储；镜像写失败只计数，不影响主写入结果。
pub struct TrafficRouter {
    old: SharedStore,
    new: SharedStore,
    transformer: Mutex<EventToPointTransformer>,
    dual_write: AtomicBool,
    reads_on_new: AtomicBool,
    writes_on_new: AtomicBool,
    mirrored_writes: AtomicU64,
    mirror_failures: AtomicU64,
}

impl TrafficRouter {
    pub fn new(old: SharedStore, new: SharedStore) -> Self {
        Self {
            old,
            new,
            transformer: Mutex::new(EventToPointTransformer::default()),
            dual_write: AtomicBool::new(false),
            reads_on_new: AtomicBool::new(false),
            writes_on_new: AtomicBool::new(false),
            mirrored_writes: AtomicU64::new(0),
            mirror_failures: AtomicU64::new(0),
        }
    }

    /// 写往新模式时使用的转换配置
    pub fn with_transformer_config(mut self, config: TransformerConfig) -> Self {
        self.transformer = Mutex::new(EventToPointTransformer::new(config));
        self
    }

    pub fn old_store(&self) -> &SharedStore {
        &self.old
    }

    pub fn new_store(&self) -> &SharedStore {
        &self.new
    }

    pub fn enable_dual_write(&self) {
        self.dual_write.store(true, Ordering::SeqCst);
        info!("Dual-write enabled");
    }

    pub fn disable_dual_write(&self) {
        self.dual_write.store(false, Ordering::SeqCst);
        info!("Dual-write disabled");
    }

    pub fn switch_reads(&self, target: SchemaTarget) {
        self.reads_on_new
            .store(target == SchemaTarget::New, Ordering::SeqCst);
        info!(target = ?target, "Read traffic switched");
    }

    pub fn switch_writes(&self, target: SchemaTarget) {
        self.writes_on_new
            .store(target == SchemaTarget::New, Ordering::SeqCst);
        info!(target = ?target, "Write traffic switched");
    }

    /// 读写同时切换
    pub fn switch_all(&self, target: SchemaTarget) {
        let on_new = target == SchemaTarget::New;
        self.writes_on_new.store(on_new, Ordering::SeqCst);
        self.reads_on_new.store(on_new, Ordering::SeqCst);
        info!(target = ?target, "Read and write traffic switched");
    }

    pub fn read_target(&self) -> SchemaTarget {
        if self.reads_on_new.load(Ordering::SeqCst) {
            SchemaTarget::New
        } else {
            SchemaTarget::Old
        }
    }

    pub fn write_target(&self) -> SchemaTarget {
        if self.writes_on_new.load(Ordering::SeqCst) {
            SchemaTarget::New
        } else {
            SchemaTarget::Old
        }
    }

    pub fn state(&self) -> RouterState {
        RouterState {
            dual_write: self.dual_write.load(Ordering::SeqCst),
            read_target: self.read_target(),
            write_target: self.write_target(),
            mirrored_writes: self.mirrored_writes.load(Ordering::Relaxed),
            mirror_failures: self.mirror_failures.load(Ordering::Relaxed),
        }
    }

    fn store_for(&self, target: SchemaTarget) -> &SharedStore {
        match target {
            SchemaTarget::Old => &self.old,
            SchemaTarget::New => &self.new,
        }
    }

    fn mirror_target(&self) -> Option<SchemaTarget> {
        if !self.dual_write.load(Ordering::SeqCst) {
            return None;
        }
        Some(match self.write_target() {
            SchemaTarget::Old => SchemaTarget::New,
            SchemaTarget::New => SchemaTarget::Old,
        })
    }

    fn reader(&self) -> &SharedStore {
        self.store_for(self.read_target())
    }

    /// 按目标模式转换数据点形状
    async fn shape_for(
        &self,
        target: SchemaTarget,
        point: &TelemetryPoint,
    ) -> Result<TelemetryPoint> {
        match (target, is_new_schema(point.measurement())) {
            (SchemaTarget::New, false) => self
                .transformer
                .lock()
                .await
                .transform(&legacy_point_to_event(point))
                .map_err(|e| HassError::InvalidInput(e.to_string())),
            (SchemaTarget::Old, true) => {
                canonical_to_legacy_point(point).map_err(|e| HassError::InvalidInput(e.to_string()))
            }
            _ => Ok(point.clone()),
        }
    }

    async fn mirror(&self, target: SchemaTarget, point: &TelemetryPoint) -> Result<()> {
        let shaped = self.shape_for(target, point).await?;
        self.store_for(target).write_point(&shaped).await
    }
}

#[async_trait]
impl TimeSeriesStore for TrafficRouter {
    async fn health_check(&self) -> Result<()> {
        self.old.health_check().await?;
        self.new.health_check().await
    }

    async fn initialize_schema(&self, measurements: &[String]) -> Result<()> {
        self.new.initialize_schema(measurements).await
    }

    async fn write_point(&self, point: &TelemetryPoint) -> Result<()> {
        let primary = self.write_target();
        let shaped = self.shape_for(primary, point).await?;
        self.store_for(primary).write_point(&shaped).await?;

        if let Some(target) = self.mirror_target() {
            match self.mirror(target, point).await {
                Ok(()) => {
                    self.mirrored_writes.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.mirror_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        measurement = %point.measurement(),
                        target = ?target,
                        error = %e,
                        "Mirror write failed"
                    );
                }
            }
        }
        Ok(())
    }

    async fn query(&self, query: &TimeSeriesQuery) -> Result<Vec<TelemetryPoint>> {
        self.reader().query(query).await
    }

    async fn count(&self, query: &TimeSeriesQuery) -> Result<usize> {
        self.reader().count(query).await
    }

    async fn list_measurements(&self, range: Option<TimeRange>) -> Result<Vec<String>> {
        self.reader().list_measurements(range).await
    }

    async fn delete_before(&self, measurement: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        self.store_for(self.write_target())
            .delete_before(measurement, cutoff)
            .await
    }

    async fn drop_measurement(&self, measurement: &str) -> Result<u64> {
        self.store_for(self.write_target())
            .drop_measurement(measurement)
            .await
    }
}
