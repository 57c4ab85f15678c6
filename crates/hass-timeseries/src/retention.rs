use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{validate_measurement, TelemetryPoint};
use crate::store::SharedStore;

/// 保留层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionTier {
    RealTime,
    Recent,
    Historical,
    LongTerm,
    Archive,
}

impl RetentionTier {
    pub const ALL: [RetentionTier; 5] = [
        RetentionTier::RealTime,
        RetentionTier::Recent,
        RetentionTier::Historical,
        RetentionTier::LongTerm,
        RetentionTier::Archive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionTier::RealTime => "real_time",
            RetentionTier::Recent => "recent",
            RetentionTier::Historical => "historical",
            RetentionTier::LongTerm => "long_term",
            RetentionTier::Archive => "archive",
        }
    }

    /// 最大保留时间；archive 永不过期
    pub fn max_age(&self) -> Option<Duration> {
        match self {
            RetentionTier::RealTime => Some(Duration::days(1)),
            RetentionTier::Recent => Some(Duration::days(7)),
            RetentionTier::Historical => Some(Duration::days(30)),
            RetentionTier::LongTerm => Some(Duration::days(365)),
            RetentionTier::Archive => None,
        }
    }

    /// 超过该年龄的数据点参与聚合
    pub fn aggregate_after(&self) -> Option<Duration> {
        match self {
            RetentionTier::Historical => Some(Duration::days(7)),
            RetentionTier::LongTerm => Some(Duration::days(30)),
            RetentionTier::Archive => Some(Duration::days(365)),
            RetentionTier::RealTime | RetentionTier::Recent => None,
        }
    }

    pub fn default_compression(&self) -> CompressionLevel {
        match self {
            RetentionTier::RealTime => CompressionLevel::None,
            RetentionTier::Recent => CompressionLevel::Light,
            RetentionTier::Historical => CompressionLevel::Balanced,
            RetentionTier::LongTerm | RetentionTier::Archive => CompressionLevel::Maximum,
        }
    }

    pub fn aggregates(&self) -> bool {
        self.aggregate_after().is_some()
    }

    /// (aggregate_interval, shard, hot, warm, cold) 秒数
    fn layout_secs(&self) -> (u64, u64, u64, u64, Option<u64>) {
        const HOUR: u64 = 3600;
        const DAY: u64 = 24 * HOUR;
        match self {
            RetentionTier::RealTime => (0, HOUR, DAY, 0, Some(0)),
            RetentionTier::Recent => (0, DAY, DAY, 7 * DAY, Some(0)),
            RetentionTier::Historical => (HOUR, 7 * DAY, 7 * DAY, 30 * DAY, Some(0)),
            RetentionTier::LongTerm => (DAY, 30 * DAY, 7 * DAY, 30 * DAY, Some(365 * DAY)),
            RetentionTier::Archive => (7 * DAY, 90 * DAY, 7 * DAY, 30 * DAY, None),
        }
    }
}

impl std::fmt::Display for RetentionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 压缩级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    None,
    Light,
    Balanced,
    Maximum,
}

impl CompressionLevel {
    pub fn algorithm(&self) -> &'static str {
        match self {
            CompressionLevel::None => "none",
            CompressionLevel::Light => "lz4",
            CompressionLevel::Balanced => "zstd",
            CompressionLevel::Maximum => "zstd_max",
        }
    }
}

/// 保留策略错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetentionError {
    #[error("unknown retention policy: {0}")]
    UnknownPolicy(String),

    #[error("retention policy '{0}' is a default policy and cannot be removed")]
    DefaultPolicy(String),

    #[error("retention policy '{0}' already exists")]
    DuplicatePolicy(String),

    #[error("invalid retention policy '{name}': {reason}")]
    InvalidPolicy { name: String, reason: String },
}

/// 默认的数据点压缩阈值（字节）
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// 保留策略
///
/// 压缩级别与是否聚合由层级决定；修改层级会生成重新推导默认值的新实例。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionPolicy {
    pub name: String,
    pub duration: RetentionTier,
    pub compression_level: CompressionLevel,
    pub aggregate_data: bool,
    pub aggregate_interval_secs: u64,
    pub shard_duration_secs: u64,
    pub hot_duration_secs: u64,
    pub warm_duration_secs: u64,
    /// None 表示永久保留在冷存储
    pub cold_duration_secs: Option<u64>,
    pub compression_threshold: usize,
    pub compression_algorithm: String,
    pub enable_compression: bool,
    /// 该策略管理的 measurement（仅自定义策略）
    pub measurements: Vec<String>,
    pub is_default: bool,
}

impl RetentionPolicy {
    pub fn new(name: impl Into<String>, duration: RetentionTier) -> Self {
        let (aggregate, shard, hot, warm, cold) = duration.layout_secs();
        let compression_level = duration.default_compression();
        Self {
            name: name.into(),
            duration,
            compression_level,
            aggregate_data: duration.aggregates(),
            aggregate_interval_secs: aggregate,
            shard_duration_secs: shard,
            hot_duration_secs: hot,
            warm_duration_secs: warm,
            cold_duration_secs: cold,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            compression_algorithm: compression_level.algorithm().to_string(),
            enable_compression: compression_level != CompressionLevel::None,
            measurements: Vec::new(),
            is_default: false,
        }
    }

    fn default_for(tier: RetentionTier) -> Self {
        Self {
            is_default: true,
            ..Self::new(tier.as_str(), tier)
        }
    }

    /// 切换层级，重新推导层级相关的默认值
    pub fn with_tier(&self, duration: RetentionTier) -> Self {
        Self {
            name: self.name.clone(),
            compression_threshold: self.compression_threshold,
            measurements: self.measurements.clone(),
            is_default: self.is_default,
            ..Self::new(String::new(), duration)
        }
    }

    pub fn with_compression_threshold(&self, threshold: usize) -> Self {
        Self {
            compression_threshold: threshold,
            ..self.clone()
        }
    }

    pub fn with_aggregate_interval_secs(&self, secs: u64) -> Self {
        Self {
            aggregate_interval_secs: secs,
            ..self.clone()
        }
    }

    pub fn with_measurements<I, S>(&self, measurements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            measurements: measurements.into_iter().map(Into::into).collect(),
            ..self.clone()
        }
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.duration.max_age()
    }

    /// 校验层级推导出的默认值与其余字段
    pub fn validate(&self) -> Result<(), RetentionError> {
        let invalid = |reason: String| RetentionError::InvalidPolicy {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if self.compression_level != self.duration.default_compression() {
            return Err(invalid(format!(
                "tier {} requires compression level {:?}",
                self.duration,
                self.duration.default_compression()
            )));
        }
        if self.aggregate_data != self.duration.aggregates() {
            return Err(invalid(format!(
                "tier {} requires aggregate_data = {}",
                self.duration,
                self.duration.aggregates()
            )));
        }
        if self.enable_compression != (self.compression_level != CompressionLevel::None) {
            return Err(invalid("enable_compression disagrees with compression level".to_string()));
        }
        if self.compression_threshold == 0 {
            return Err(invalid("compression_threshold must be > 0".to_string()));
        }
        for measurement in &self.measurements {
            validate_measurement(measurement).map_err(|e| invalid(e.to_string()))?;
        }
        Ok(())
    }
}

/// 配置文件中的自定义策略定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    pub name: String,
    pub tier: RetentionTier,
    #[serde(default)]
    pub measurements: Vec<String>,
    #[serde(default)]
    pub compression_threshold: Option<usize>,
    #[serde(default)]
    pub aggregate_interval_secs: Option<u64>,
}

impl PolicyDefinition {
    pub fn build(&self) -> Result<RetentionPolicy, RetentionError> {
        let mut policy =
            RetentionPolicy::new(self.name.clone(), self.tier).with_measurements(self.measurements.clone());
        if let Some(threshold) = self.compression_threshold {
            policy = policy.with_compression_threshold(threshold);
        }
        if let Some(secs) = self.aggregate_interval_secs {
            policy = policy.with_aggregate_interval_secs(secs);
        }
        policy.validate()?;
        Ok(policy)
    }
}

/// 保留策略管理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    /// 两次清理的最小间隔（秒）
    pub cleanup_interval_secs: u64,

    /// 清理调度 cron 表达式
    pub cleanup_cron: String,

    pub custom_policies: Vec<PolicyDefinition>,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 24 * 3600,
            cleanup_cron: "0 0 1 * * *".to_string(),
            custom_policies: Vec::new(),
        }
    }
}

/// 保留违规记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionViolation {
    pub measurement: String,
    pub timestamp: DateTime<Utc>,
    pub age_days: f64,
    pub policy: String,
    pub violation_type: String,
}

/// 清理结果
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub cleanup_performed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub policies_processed: usize,
    pub measurements_processed: usize,
    pub points_deleted: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl CleanupReport {
    fn not_due() -> Self {
        Self {
            cleanup_performed: false,
            reason: Some("cleanup_not_due".to_string()),
            policies_processed: 0,
            measurements_processed: 0,
            points_deleted: 0,
            errors: Vec::new(),
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }
}

/// 累计保留统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionStats {
    pub policy_violations: u64,
    pub cleanups_performed: u64,
    pub points_deleted: u64,
    pub cleanup_errors: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// 保留策略管理器
pub struct RetentionPolicyManager {
    policies: BTreeMap<String, RetentionPolicy>,
    fallback: RetentionPolicy,
    settings: RetentionSettings,
    stats: RetentionStats,
    store: Option<SharedStore>,
}

impl RetentionPolicyManager {
    /// 创建管理器并加载默认策略与配置中的自定义策略
    pub fn new(settings: RetentionSettings) -> Result<Self, RetentionError> {
        let mut policies = BTreeMap::new();
        for tier in RetentionTier::ALL {
            let policy = RetentionPolicy::default_for(tier);
            policies.insert(policy.name.clone(), policy);
        }

        let mut manager = Self {
            policies,
            fallback: RetentionPolicy::default_for(RetentionTier::Recent),
            settings: RetentionSettings {
                custom_policies: Vec::new(),
                ..settings.clone()
            },
            stats: RetentionStats::default(),
            store: None,
        };

        for definition in &settings.custom_policies {
            manager.add_custom_policy(definition.build()?)?;
        }
        manager.settings.custom_policies = settings.custom_policies;

        Ok(manager)
    }

    /// 绑定存储后端，清理时删除过期数据
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn settings(&self) -> &RetentionSettings {
        &self.settings
    }

    pub fn stats(&self) -> &RetentionStats {
        &self.stats
    }

    pub fn policies(&self) -> impl Iterator<Item = &RetentionPolicy> {
        self.policies.values()
    }

    pub fn get_policy(&self, name: &str) -> Option<&RetentionPolicy> {
        self.policies.get(name)
    }

    /// measurement 到策略名的映射：先查自定义策略，再查固定表
    pub fn policy_name_for(&self, measurement: &str) -> &str {
        if let Some(policy) = self
            .policies
            .values()
            .find(|p| !p.is_default && p.measurements.iter().any(|m| m == measurement))
        {
            return &policy.name;
        }

        let tier = match measurement {
            "ha_metrics" => RetentionTier::LongTerm,
            "ha_system" => RetentionTier::Archive,
            "ha_automations" | "ha_services" => RetentionTier::Historical,
            _ => RetentionTier::Recent,
        };
        tier.as_str()
    }

    pub fn get_policy_for_point(&self, point: &TelemetryPoint) -> &RetentionPolicy {
        self.get_policy_for_measurement(point.measurement())
    }

    pub fn get_policy_for_measurement(&self, measurement: &str) -> &RetentionPolicy {
        let name = self.policy_name_for(measurement);
        self.policies.get(name).unwrap_or(&self.fallback)
    }

    pub fn should_aggregate_point(&self, point: &TelemetryPoint, policy: &RetentionPolicy) -> bool {
        self.should_aggregate_at(point, policy, Utc::now())
    }

    pub fn should_aggregate_at(
        &self,
        point: &TelemetryPoint,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> bool {
        if !policy.aggregate_data {
            return false;
        }
        match policy.duration.aggregate_after() {
            Some(threshold) => now - point.timestamp() > threshold,
            None => false,
        }
    }

    pub fn should_compress_point(&self, point: &TelemetryPoint, policy: &RetentionPolicy) -> bool {
        policy.enable_compression && point.size_estimate() > policy.compression_threshold
    }

    pub fn check_retention_violations(&mut self, points: &[TelemetryPoint]) -> Vec<RetentionViolation> {
        self.check_violations_at(points, Utc::now())
    }

    /// 以给定时刻检查过期数据点；archive 层级永不违规
    pub fn check_violations_at(
        &mut self,
        points: &[TelemetryPoint],
        now: DateTime<Utc>,
    ) -> Vec<RetentionViolation> {
        let mut violations = Vec::new();

        for point in points {
            let policy = self.get_policy_for_point(point);
            let Some(max_age) = policy.max_age() else {
                continue;
            };

            if now - point.timestamp() > max_age {
                violations.push(RetentionViolation {
                    measurement: point.measurement().to_string(),
                    timestamp: point.timestamp(),
                    age_days: point.age_days(now),
                    policy: policy.name.clone(),
                    violation_type: "exceeds_retention".to_string(),
                });
            }
        }

        if !violations.is_empty() {
            self.stats.policy_violations += violations.len() as u64;
            warn!(
                violations = violations.len(),
                "Retention violations detected"
            );
        }

        violations
    }

    fn cleanup_due(&self, now: DateTime<Utc>) -> bool {
        match self.stats.last_cleanup {
            Some(last) => now - last >= Duration::seconds(self.settings.cleanup_interval_secs as i64),
            None => true,
        }
    }

    /// 清理过期数据
    ///
    /// 未到清理间隔且未强制时直接返回 `cleanup_not_due`。单个 measurement 失败只记录错误。
    pub async fn cleanup_expired_data(&mut self, force: bool) -> CleanupReport {
        let now = Utc::now();
        if !force && !self.cleanup_due(now) {
            debug!("Retention cleanup not due yet");
            return CleanupReport::not_due();
        }

        let started = Instant::now();
        let mut errors = Vec::new();
        let mut points_deleted = 0u64;
        let mut measurements_processed = 0usize;

        let policies_processed = self.policies.len();

        if let Some(store) = self.store.clone() {
            match store.list_measurements(None).await {
                Ok(measurements) => {
                    for measurement in measurements {
                        let policy = self.get_policy_for_measurement(&measurement);
                        let Some(max_age) = policy.max_age() else {
                            continue;
                        };
                        let policy_name = policy.name.clone();

                        measurements_processed += 1;
                        match store.delete_before(&measurement, now - max_age).await {
                            Ok(deleted) => {
                                points_deleted += deleted;
                                debug!(
                                    measurement = %measurement,
                                    policy = %policy_name,
                                    deleted_rows = deleted,
                                    "Expired data removed"
                                );
                            }
                            Err(e) => {
                                warn!(
                                    measurement = %measurement,
                                    policy = %policy_name,
                                    error = %e,
                                    "Retention cleanup failed for measurement"
                                );
                                errors.push(format!("{} ({}): {}", measurement, policy_name, e));
                            }
                        }
                    }
                }
                Err(e) => errors.push(format!("list measurements: {}", e)),
            }
        }

        self.stats.last_cleanup = Some(now);
        self.stats.cleanups_performed += 1;
        self.stats.points_deleted += points_deleted;
        self.stats.cleanup_errors += errors.len() as u64;

        let report = CleanupReport {
            cleanup_performed: true,
            reason: None,
            policies_processed,
            measurements_processed,
            points_deleted,
            errors,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: now,
        };

        info!(
            measurements = report.measurements_processed,
            deleted_rows = report.points_deleted,
            errors = report.errors.len(),
            "Retention cleanup completed"
        );

        report
    }

    /// 替换同名策略，保留其默认标记
    pub fn update_policy(&mut self, policy: RetentionPolicy) -> Result<(), RetentionError> {
        let Some(existing) = self.policies.get(&policy.name) else {
            return Err(RetentionError::UnknownPolicy(policy.name));
        };
        let policy = RetentionPolicy {
            is_default: existing.is_default,
            ..policy
        };
        policy.validate()?;

        info!(policy = %policy.name, tier = %policy.duration, "Retention policy updated");
        self.policies.insert(policy.name.clone(), policy);
        Ok(())
    }

    pub fn add_custom_policy(&mut self, policy: RetentionPolicy) -> Result<(), RetentionError> {
        if self.policies.contains_key(&policy.name) {
            return Err(RetentionError::DuplicatePolicy(policy.name));
        }
        let policy = RetentionPolicy {
            is_default: false,
            ..policy
        };
        policy.validate()?;

        info!(policy = %policy.name, tier = %policy.duration, "Custom retention policy added");
        self.policies.insert(policy.name.clone(), policy);
        Ok(())
    }

    pub fn remove_policy(&mut self, name: &str) -> Result<RetentionPolicy, RetentionError> {
        match self.policies.get(name) {
            None => Err(RetentionError::UnknownPolicy(name.to_string())),
            Some(policy) if policy.is_default => Err(RetentionError::DefaultPolicy(name.to_string())),
            Some(_) => {
                info!(policy = %name, "Retention policy removed");
                self.policies
                    .remove(name)
                    .ok_or_else(|| RetentionError::UnknownPolicy(name.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::TimeSeriesStore;
    use std::sync::Arc;

    fn manager() -> RetentionPolicyManager {
        RetentionPolicyManager::new(RetentionSettings::default()).unwrap()
    }

    fn point(measurement: &str, age: Duration) -> TelemetryPoint {
        TelemetryPoint::builder(measurement)
            .timestamp(Utc::now() - age)
            .tag("entity_id", "sensor.a")
            .field("state", "1")
            .build()
            .unwrap()
    }

    #[test]
    fn test_tier_derived_defaults() {
        let historical = RetentionPolicy::new("h", RetentionTier::Historical);
        assert_eq!(historical.compression_level, CompressionLevel::Balanced);
        assert!(historical.aggregate_data);

        let archive = RetentionPolicy::new("a", RetentionTier::Archive);
        assert_eq!(archive.compression_level, CompressionLevel::Maximum);
        assert!(archive.aggregate_data);
        assert_eq!(archive.cold_duration_secs, None);

        let real_time = RetentionPolicy::new("r", RetentionTier::RealTime);
        assert!(!real_time.enable_compression);
        assert!(!real_time.aggregate_data);
    }

    #[test]
    fn test_with_tier_rederives() {
        let policy = RetentionPolicy::new("custom", RetentionTier::Recent)
            .with_compression_threshold(2048)
            .with_tier(RetentionTier::LongTerm);
        assert_eq!(policy.name, "custom");
        assert_eq!(policy.compression_level, CompressionLevel::Maximum);
        assert_eq!(policy.compression_threshold, 2048);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_dispatch_by_measurement() {
        let manager = manager();
        let cases = [
            ("ha_metrics", "long_term"),
            ("ha_system", "archive"),
            ("ha_automations", "historical"),
            ("ha_services", "historical"),
            ("ha_entities", "recent"),
            ("anything_else", "recent"),
        ];
        for (measurement, expected) in cases {
            let p = point(measurement, Duration::zero());
            assert_eq!(manager.get_policy_for_point(&p).name, expected);
        }
    }

    #[test]
    fn test_custom_policy_routing() {
        let mut manager = manager();
        manager
            .add_custom_policy(
                RetentionPolicy::new("energy", RetentionTier::LongTerm).with_measurements(["ha_energy"]),
            )
            .unwrap();
        let p = point("ha_energy", Duration::zero());
        assert_eq!(manager.get_policy_for_point(&p).name, "energy");
    }

    #[test]
    fn test_aggregation_thresholds() {
        let manager = manager();
        let historical = manager.get_policy("historical").unwrap().clone();
        let recent = manager.get_policy("recent").unwrap().clone();

        assert!(manager.should_aggregate_point(&point("ha_services", Duration::days(8)), &historical));
        assert!(!manager.should_aggregate_point(&point("ha_services", Duration::days(6)), &historical));
        assert!(!manager.should_aggregate_point(&point("ha_entities", Duration::days(100)), &recent));
    }

    #[test]
    fn test_compression_decision() {
        let manager = manager();
        let recent = manager
            .get_policy("recent")
            .unwrap()
            .with_compression_threshold(10);
        let real_time = manager.get_policy("real_time").unwrap().clone();
        let p = point("ha_entities", Duration::zero());

        assert!(manager.should_compress_point(&p, &recent));
        assert!(!manager.should_compress_point(&p, &real_time));
    }

    #[test]
    fn test_violations() {
        let mut manager = manager();
        manager
            .add_custom_policy(RetentionPolicy::new("live", RetentionTier::RealTime).with_measurements(["ha_live"]))
            .unwrap();

        let points = vec![
            point("ha_system", Duration::days(5000)),
            point("ha_live", Duration::hours(25)),
            point("ha_live", Duration::hours(2)),
            point("ha_entities", Duration::days(8)),
        ];
        let violations = manager.check_retention_violations(&points);

        assert_eq!(violations.len(), 2);
        assert!(violations.iter().all(|v| v.measurement != "ha_system"));
        assert_eq!(violations[0].policy, "live");
        assert_eq!(manager.stats().policy_violations, 2);
    }

    #[test]
    fn test_policy_crud() {
        let mut manager = manager();

        assert_eq!(
            manager.remove_policy("recent"),
            Err(RetentionError::DefaultPolicy("recent".to_string()))
        );
        assert!(matches!(
            manager.remove_policy("missing"),
            Err(RetentionError::UnknownPolicy(_))
        ));

        manager
            .add_custom_policy(RetentionPolicy::new("custom", RetentionTier::Recent))
            .unwrap();
        assert!(matches!(
            manager.add_custom_policy(RetentionPolicy::new("custom", RetentionTier::Recent)),
            Err(RetentionError::DuplicatePolicy(_))
        ));

        let updated = manager.get_policy("custom").unwrap().with_tier(RetentionTier::Archive);
        manager.update_policy(updated).unwrap();
        assert_eq!(
            manager.get_policy("custom").unwrap().compression_level,
            CompressionLevel::Maximum
        );

        let mut broken = manager.get_policy("custom").unwrap().clone();
        broken.aggregate_data = false;
        assert!(matches!(
            manager.update_policy(broken),
            Err(RetentionError::InvalidPolicy { .. })
        ));

        assert!(manager.remove_policy("custom").is_ok());
        assert!(manager.get_policy("custom").is_none());
    }

    #[test]
    fn test_settings_load_custom_policies() {
        let settings = RetentionSettings {
            custom_policies: vec![PolicyDefinition {
                name: "climate".to_string(),
                tier: RetentionTier::Historical,
                measurements: vec!["ha_climate".to_string()],
                compression_threshold: Some(512),
                aggregate_interval_secs: None,
            }],
            ..RetentionSettings::default()
        };
        let manager = RetentionPolicyManager::new(settings).unwrap();
        assert_eq!(manager.get_policy_for_measurement("ha_climate").name, "climate");
        assert_eq!(manager.policies().count(), 6);
    }

    #[tokio::test]
    async fn test_cleanup_gating_and_deletion() {
        let store = Arc::new(MemoryStore::new());
        store
            .write_points(&[
                point("ha_entities", Duration::days(10)),
                point("ha_entities", Duration::days(1)),
                point("ha_system", Duration::days(4000)),
            ])
            .await
            .unwrap();

        let mut manager = manager().with_store(store.clone());

        let first = manager.cleanup_expired_data(false).await;
        assert!(first.cleanup_performed);
        assert_eq!(first.points_deleted, 1);
        assert!(first.errors.is_empty());

        let second = manager.cleanup_expired_data(false).await;
        assert!(!second.cleanup_performed);
        assert_eq!(second.reason.as_deref(), Some("cleanup_not_due"));

        let forced = manager.cleanup_expired_data(true).await;
        assert!(forced.cleanup_performed);
        assert_eq!(store.len().await, 2);
        assert_eq!(manager.stats().cleanups_performed, 2);
    }
}
