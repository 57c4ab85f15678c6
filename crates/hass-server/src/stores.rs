use anyhow::{anyhow, Context, Result};
use hass_config::{StorageBackend, StoreConfig};
use hass_migration::restore_backup;
use hass_timeseries::{
    parse_lines, MemoryStore, SharedStore, TelemetryPoint, TimeSeriesStore, TimescaleStore,
};
use hass_types::RawEvent;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// 按配置构建存储
pub async fn build_store(config: &StoreConfig) -> Result<SharedStore> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::Timescale => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow!("database_url is required for the timescale backend"))?;
            let store = TimescaleStore::new(url)
                .await?
                .with_table(config.table.clone());
            Ok(Arc::new(store))
        }
    }
}

/// 读取 line protocol 文件
pub async fn read_points(path: &Path) -> Result<Vec<TelemetryPoint>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_lines(&text)?)
}

/// 读取每行一个 JSON 事件的文件，跳过空行
pub async fn read_events(path: &Path) -> Result<Vec<RawEvent>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            RawEvent::from_json(line).with_context(|| format!("line {}", index + 1))
        })
        .collect()
}

/// 向存储导入数据：`.json` 视为备份文件，其余按 line protocol 解析
pub async fn seed_store(store: &SharedStore, path: &Path) -> Result<usize> {
    let is_backup = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));

    let written = if is_backup {
        restore_backup(path, store).await?
    } else {
        let points = read_points(path).await?;
        store.write_points(&points).await?
    };

    info!(path = %path.display(), points = written, "Store seeded");
    Ok(written)
}
