//! 旧模式数据的 JSON 备份与恢复

use chrono::{DateTime, Utc};
use hass_timeseries::{SharedStore, TelemetryPoint, TimeSeriesQuery};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::report::{read_json, write_json_atomic};

/// 导出时的分页大小
const EXPORT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Serialize, Deserialize)]
struct BackupFile {
    created_at: DateTime<Utc>,
    measurements: BTreeMap<String, Vec<TelemetryPoint>>,
}

/// 备份结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSummary {
    pub path: PathBuf,
    pub measurements: usize,
    pub records: usize,
    pub created_at: DateTime<Utc>,
}

/// 分页读取一个 measurement 的全部数据
pub(crate) async fn read_all(store: &SharedStore, measurement: &str) -> Result<Vec<TelemetryPoint>> {
    let mut points = Vec::new();
    loop {
        let page = store
            .query(
                &TimeSeriesQuery::measurement(measurement)
                    .with_offset(points.len())
                    .with_limit(EXPORT_PAGE_SIZE),
            )
            .await?;
        let done = page.len() < EXPORT_PAGE_SIZE;
        points.extend(page);
        if done {
            return Ok(points);
        }
    }
}

/// 导出整个存储到 JSON 文件
pub async fn export_store(store: &SharedStore, path: &Path) -> Result<BackupSummary> {
    let mut measurements = BTreeMap::new();
    for measurement in store.list_measurements(None).await? {
        let points = read_all(store, &measurement).await?;
        measurements.insert(measurement, points);
    }

    let created_at = Utc::now();
    let records = measurements.values().map(Vec::len).sum();
    let summary = BackupSummary {
        path: path.to_path_buf(),
        measurements: measurements.len(),
        records,
        created_at,
    };

    write_json_atomic(
        path,
        &BackupFile {
            created_at,
            measurements,
        },
    )
    .await?;

    info!(
        path = %path.display(),
        measurements = summary.measurements,
        records = summary.records,
        "Schema backup created"
    );
    Ok(summary)
}

/// 读取备份中的数据点
pub async fn load_backup(path: &Path) -> Result<Vec<TelemetryPoint>> {
    let backup: BackupFile = read_json(path).await?;
    Ok(backup.measurements.into_values().flatten().collect())
}

/// 将备份写回存储，返回写入条数
pub async fn restore_backup(path: &Path, store: &SharedStore) -> Result<usize> {
    let points = load_backup(path).await?;
    let written = store.write_points(&points).await?;
    info!(path = %path.display(), records = written, "Backup restored");
    Ok(written)
}
