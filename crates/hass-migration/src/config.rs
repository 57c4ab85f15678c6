use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MigrationError, Result};

/// 迁移策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStrategy {
    /// 跳过所有等待期
    Immediate,
    /// 单并发 + 节流
    Gradual,
    /// 完整双写流程
    #[default]
    DualWrite,
    /// 读写流量一次性切换
    BlueGreen,
}

impl MigrationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStrategy::Immediate => "immediate",
            MigrationStrategy::Gradual => "gradual",
            MigrationStrategy::DualWrite => "dual_write",
            MigrationStrategy::BlueGreen => "blue_green",
        }
    }

    pub fn skips_holds(&self) -> bool {
        matches!(self, MigrationStrategy::Immediate)
    }
}

/// gradual 策略下的最小节流间隔
pub const GRADUAL_MIN_THROTTLE_MS: u64 = 100;

/// 等待窗口上限（一年）
pub const MAX_WINDOW_HOURS: f64 = 24.0 * 365.0;

/// 迁移配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(default)]
    pub strategy: MigrationStrategy,

    /// 每批记录数
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// 并发批次数
    #[serde(default = "default_concurrent_batches")]
    pub concurrent_batches: usize,

    /// 每批之后的节流间隔（毫秒）
    #[serde(default = "default_throttle_delay_ms")]
    pub throttle_delay_ms: u64,

    /// 允许的最大错误率（0.0-1.0）
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,

    /// 抽样一致率低于 `1 - rollback_threshold` 时判定失败
    #[serde(default = "default_rollback_threshold")]
    pub rollback_threshold: f64,

    /// 抽样校验比例，必须在 (0, 1] 内
    #[serde(default = "default_validate_percentage")]
    pub validate_percentage: f64,

    #[serde(default = "default_true")]
    pub keep_old_data: bool,

    #[serde(default = "default_true")]
    pub backup_old_schema: bool,

    /// 双写观察期（小时）
    #[serde(default = "default_migration_window_hours")]
    pub migration_window_hours: f64,

    /// 校验阶段时间预算（小时）
    #[serde(default = "default_validation_window_hours")]
    pub validation_window_hours: f64,

    /// 清理前等待（小时）
    #[serde(default = "default_cleanup_delay_hours")]
    pub cleanup_delay_hours: f64,

    /// 报告与备份输出目录
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

fn default_batch_size() -> usize {
    1000
}

fn default_concurrent_batches() -> usize {
    4
}

fn default_throttle_delay_ms() -> u64 {
    100
}

fn default_max_error_rate() -> f64 {
    0.01
}

fn default_rollback_threshold() -> f64 {
    0.05
}

fn default_validate_percentage() -> f64 {
    0.1
}

fn default_true() -> bool {
    true
}

fn default_migration_window_hours() -> f64 {
    24.0
}

fn default_validation_window_hours() -> f64 {
    2.0
}

fn default_cleanup_delay_hours() -> f64 {
    72.0
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("./migration_reports")
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            strategy: MigrationStrategy::default(),
            batch_size: default_batch_size(),
            concurrent_batches: default_concurrent_batches(),
            throttle_delay_ms: default_throttle_delay_ms(),
            max_error_rate: default_max_error_rate(),
            rollback_threshold: default_rollback_threshold(),
            validate_percentage: default_validate_percentage(),
            keep_old_data: true,
            backup_old_schema: true,
            migration_window_hours: default_migration_window_hours(),
            validation_window_hours: default_validation_window_hours(),
            cleanup_delay_hours: default_cleanup_delay_hours(),
            report_dir: default_report_dir(),
        }
    }
}

fn hours(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value * 3600.0).map_err(|e| {
        MigrationError::Config(format!("{} = {} is not a valid duration: {}", name, value, e))
    })
}

impl MigrationConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(MigrationError::Config("batch_size must be greater than 0".to_string()));
        }
        if self.concurrent_batches == 0 {
            return Err(MigrationError::Config(
                "concurrent_batches must be greater than 0".to_string(),
            ));
        }
        if !(self.validate_percentage > 0.0 && self.validate_percentage <= 1.0) {
            return Err(MigrationError::Config(format!(
                "validate_percentage must be in (0, 1], got {}",
                self.validate_percentage
            )));
        }
        for (name, value) in [
            ("max_error_rate", self.max_error_rate),
            ("rollback_threshold", self.rollback_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MigrationError::Config(format!(
                    "{} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("migration_window_hours", self.migration_window_hours),
            ("validation_window_hours", self.validation_window_hours),
            ("cleanup_delay_hours", self.cleanup_delay_hours),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(MigrationError::Config(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
            if value > MAX_WINDOW_HOURS {
                return Err(MigrationError::Config(format!(
                    "{} must be at most {} hours, got {}",
                    name, MAX_WINDOW_HOURS, value
                )));
            }
        }
        if self.validation_window_hours <= 0.0 {
            return Err(MigrationError::Config(
                "validation_window_hours must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// 按策略调整后的实际配置
    pub fn effective(&self) -> Self {
        let mut config = self.clone();
        if config.strategy == MigrationStrategy::Gradual {
            config.concurrent_batches = 1;
            config.throttle_delay_ms = config.throttle_delay_ms.max(GRADUAL_MIN_THROTTLE_MS);
        }
        config
    }

    /// 每隔多少批做一次校验
    pub fn validation_interval(&self) -> usize {
        (1.0 / self.validate_percentage).round().max(1.0) as usize
    }

    /// 抽样一致率下限
    pub fn min_consistency_rate(&self) -> f64 {
        1.0 - self.rollback_threshold
    }

    pub fn migration_window(&self) -> Result<Duration> {
        hours("migration_window_hours", self.migration_window_hours)
    }

    pub fn validation_window(&self) -> Result<Duration> {
        hours("validation_window_hours", self.validation_window_hours)
    }

    pub fn cleanup_delay(&self) -> Result<Duration> {
        hours("cleanup_delay_hours", self.cleanup_delay_hours)
    }

    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.throttle_delay_ms)
    }
}
