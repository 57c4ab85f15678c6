use hass_migration::{MigrationConfig, SchemaTarget};
use hass_timeseries::{RetentionSettings, TransformerConfig};
use serde::{Deserialize, Serialize};

/// 全局配置
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub system: SystemConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub transformer: TransformerConfig,
    pub retention: RetentionSettings,
    pub migration: MigrationConfig,
}

impl GlobalConfig {
    /// 序列化为 TOML，用于生成示例配置
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// 系统配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    pub name: String,
    pub version: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: "Home Assistant Telemetry".to_string(),
            version: "1.0.0".to_string(),
        }
    }
}

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Timescale,
}

/// 单个存储配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// timescale 后端必填
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_table")]
    pub table: String,
}

/// 新旧模式存储
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 旧模式（迁移来源）
    pub source: StoreConfig,

    /// 新模式（迁移目标、实时写入）
    pub target: StoreConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            source: StoreConfig {
                backend: StorageBackend::Memory,
                database_url: None,
                table: "telemetry_points_legacy".to_string(),
            },
            target: StoreConfig {
                backend: StorageBackend::Memory,
                database_url: None,
                table: default_table(),
            },
        }
    }
}

/// 实时摄取配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IngestConfig {
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// 主写入目标
    #[serde(default = "default_write_target")]
    pub write_target: SchemaTarget,

    /// 同时镜像写入另一模式
    #[serde(default)]
    pub dual_write: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bus_capacity: default_bus_capacity(),
            write_target: default_write_target(),
            dual_write: false,
        }
    }
}

// 默认值函数
fn default_table() -> String {
    "telemetry_points".to_string()
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_write_target() -> SchemaTarget {
    SchemaTarget::New
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_global_config() {
        let config = GlobalConfig::default();
        assert_eq!(config.system.name, "Home Assistant Telemetry");
        assert_eq!(config.storage.target.backend, StorageBackend::Memory);
        assert_eq!(config.storage.source.table, "telemetry_points_legacy");
        assert_eq!(config.ingest.bus_capacity, 1024);
        assert_eq!(config.ingest.write_target, SchemaTarget::New);
        assert!(!config.ingest.dual_write);
        assert_eq!(config.migration.batch_size, 1000);
    }

    #[test]
    fn test_toml_output_parses_back() {
        let config = GlobalConfig::default();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("[migration]"));

        let parsed: GlobalConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
