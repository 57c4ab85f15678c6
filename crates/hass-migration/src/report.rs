use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::error::Result;

/// 以临时文件 + 重命名的方式写入 JSON
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, json).await?;
    fs::rename(&temp_path, path).await?;

    info!(path = %path.display(), "Report written");
    Ok(())
}

pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&json)?)
}

/// 删除文件，不存在时忽略
pub async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_atomic_write_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");

        write_json_atomic(&path, &json!({"migration_id": "m1", "ok": true}))
            .await
            .unwrap();

        let value: Value = read_json(&path).await.unwrap();
        assert_eq!(value["migration_id"], "m1");
        assert!(!path.with_extension("tmp").exists());

        assert!(remove_if_exists(&path).await.unwrap());
        assert!(!remove_if_exists(&path).await.unwrap());
    }
}
