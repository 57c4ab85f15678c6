use anyhow::{anyhow, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

use crate::global::{StorageBackend, StoreConfig};
use crate::GlobalConfig;

/// 环境变量前缀，例如 `HASS__MIGRATION__BATCH_SIZE=500`
pub const ENV_PREFIX: &str = "HASS";

/// 配置加载器
pub struct ConfigLoader {
    config_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("global.toml")
    }

    /// 加载全局配置：global.toml（可缺省）叠加环境变量
    pub fn load_global(&self) -> Result<GlobalConfig> {
        let config_path = self.config_path();

        let config = Config::builder()
            .add_source(
                File::new(
                    config_path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?,
                    FileFormat::Toml,
                )
                .required(false),
            )
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// 加载并验证
    pub fn load_validated(&self) -> Result<GlobalConfig> {
        let config = self.load_global()?;
        validate(&config)?;
        Ok(config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        validate(&self.load_global()?)
    }
}

/// 拒绝相互矛盾或越界的取值
pub fn validate(config: &GlobalConfig) -> Result<()> {
    config
        .migration
        .validate()
        .map_err(|e| anyhow!("[migration] {}", e))?;

    for policy in &config.retention.custom_policies {
        policy
            .build()
            .map_err(|e| anyhow!("[retention] {}", e))?;
    }

    let optimizer = &config.transformer.optimizer;
    if optimizer.max_cardinality == 0 {
        return Err(anyhow!("[transformer.optimizer] max_cardinality must be greater than 0"));
    }
    if optimizer.tag_compression_threshold == 0 || optimizer.field_compression_threshold == 0 {
        return Err(anyhow!(
            "[transformer.optimizer] compression thresholds must be greater than 0"
        ));
    }
    if let Some((key, _)) = config
        .transformer
        .hash_thresholds
        .iter()
        .find(|(_, threshold)| **threshold == 0)
    {
        return Err(anyhow!(
            "[transformer] hash threshold for {} must be greater than 0",
            key
        ));
    }

    if config.ingest.bus_capacity == 0 {
        return Err(anyhow!("[ingest] bus_capacity must be greater than 0"));
    }

    validate_store("storage.source", &config.storage.source)?;
    validate_store("storage.target", &config.storage.target)?;
    Ok(())
}

fn validate_store(section: &str, store: &StoreConfig) -> Result<()> {
    if store.backend == StorageBackend::Timescale && store.database_url.is_none() {
        return Err(anyhow!(
            "[{}] database_url is required for the timescale backend",
            section
        ));
    }
    if store.table.is_empty() {
        return Err(anyhow!("[{}] table must not be empty", section));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hass_migration::MigrationStrategy;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_default_global_config() {
        let temp_dir = tempdir().unwrap();
        let loader = ConfigLoader::new(temp_dir.path()).with_env_prefix("HASS_TEST_DEFAULTS");

        let config = loader.load_global().unwrap();
        assert_eq!(config, GlobalConfig::default());
        assert!(loader.validate().is_ok());
    }

    #[test]
    fn test_load_global_config_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_content = r#"
[system]
name = "Test Home"

[storage.target]
backend = "timescale"
database_url = "postgres://localhost/hass"

[transformer.hash_thresholds]
entity_id = 200

[migration]
strategy = "blue_green"
batch_size = 250
validate_percentage = 0.2
"#;

        fs::write(temp_dir.path().join("global.toml"), config_content).unwrap();

        let loader = ConfigLoader::new(temp_dir.path()).with_env_prefix("HASS_TEST_FILE");
        let config = loader.load_validated().unwrap();

        assert_eq!(config.system.name, "Test Home");
        assert_eq!(config.storage.target.backend, StorageBackend::Timescale);
        assert_eq!(config.storage.target.table, "telemetry_points");
        assert_eq!(config.transformer.hash_thresholds["entity_id"], 200);
        assert_eq!(config.migration.strategy, MigrationStrategy::BlueGreen);
        assert_eq!(config.migration.batch_size, 250);
        // 未出现的字段取默认值
        assert_eq!(config.migration.concurrent_batches, 4);
        assert!(config.transformer.enable_consolidation);
    }

    #[test]
    fn test_environment_overrides_file() {
        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join("global.toml"),
            "[migration]\nbatch_size = 250\n",
        )
        .unwrap();
        std::env::set_var("HASS_TEST_ENV__MIGRATION__BATCH_SIZE", "64");

        let loader = ConfigLoader::new(temp_dir.path()).with_env_prefix("HASS_TEST_ENV");
        let config = loader.load_global().unwrap();
        std::env::remove_var("HASS_TEST_ENV__MIGRATION__BATCH_SIZE");

        assert_eq!(config.migration.batch_size, 64);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = GlobalConfig::default();
        config.migration.validate_percentage = 0.0;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("validate_percentage"), "{}", err);

        let mut config = GlobalConfig::default();
        config.storage.source.backend = StorageBackend::Timescale;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("storage.source"), "{}", err);

        let mut config = GlobalConfig::default();
        config.ingest.bus_capacity = 0;
        assert!(validate(&config).is_err());
    }
}
