use crate::model::{FieldValue, TelemetryPoint};
use crate::query::{TimeRange, TimeSeriesQuery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hass_core::{HassError, Result};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// 时序数据存储 trait
///
/// 目标模式以 `(measurement, tags, timestamp)` 为键：重复写入同一键会覆盖旧值。
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// 后端可达性检查
    async fn health_check(&self) -> Result<()>;

    /// 初始化表结构；`measurements` 为将要写入的目标 measurement
    async fn initialize_schema(&self, measurements: &[String]) -> Result<()>;

    /// 写入单个数据点
    async fn write_point(&self, point: &TelemetryPoint) -> Result<()>;

    /// 批量写入，返回写入条数
    async fn write_points(&self, points: &[TelemetryPoint]) -> Result<usize> {
        for point in points {
            self.write_point(point).await?;
        }
        Ok(points.len())
    }

    /// 范围查询，按时间升序
    async fn query(&self, query: &TimeSeriesQuery) -> Result<Vec<TelemetryPoint>>;

    /// 满足过滤条件的记录数（忽略分页）
    async fn count(&self, query: &TimeSeriesQuery) -> Result<usize>;

    /// 列出 measurement（可按时间范围过滤）
    async fn list_measurements(&self, range: Option<TimeRange>) -> Result<Vec<String>>;

    /// 删除早于 `cutoff` 的数据，返回删除条数
    async fn delete_before(&self, measurement: &str, cutoff: DateTime<Utc>) -> Result<u64>;

    /// 删除整个 measurement
    async fn drop_measurement(&self, measurement: &str) -> Result<u64>;
}

pub type SharedStore = Arc<dyn TimeSeriesStore>;

/// TimescaleDB 存储实现
///
/// 所有 measurement 共用一张 hypertable，标签/字段以 JSONB 存储。
pub struct TimescaleStore {
    db: Arc<DatabaseConnection>,
    table: String,
}

impl TimescaleStore {
    /// 创建新的 TimescaleDB 存储
    pub async fn new(database_url: &str) -> Result<Self> {
        let db = Database::connect(database_url).await?;

        info!(
            database_url = %database_url,
            "Connected to TimescaleDB"
        );

        Ok(Self {
            db: Arc::new(db),
            table: "telemetry_points".to_string(),
        })
    }

    /// 使用自定义表名（例如旧模式 `telemetry_points_legacy`）
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// 获取数据库连接
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    fn backend(&self) -> sea_orm::DatabaseBackend {
        sea_orm::DatabaseBackend::Postgres
    }

    /// 拼接 WHERE 子句，返回 (sql 片段, 参数)
    fn where_clause(&self, query: &TimeSeriesQuery) -> Result<(String, Vec<sea_orm::Value>)> {
        let mut clauses = Vec::new();
        let mut params: Vec<sea_orm::Value> = Vec::new();

        if let Some(measurement) = &query.measurement {
            params.push(measurement.clone().into());
            clauses.push(format!("measurement = ${}", params.len()));
        }
        if let Some(range) = &query.time_range {
            params.push(range.start.into());
            clauses.push(format!("time >= ${}", params.len()));
            params.push(range.end.into());
            clauses.push(format!("time < ${}", params.len()));
        }
        if !query.tags.is_empty() {
            params.push(serde_json::to_value(&query.tags)?.into());
            clauses.push(format!("tags @> ${}", params.len()));
        }

        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        Ok((sql, params))
    }

    fn row_to_point(&self, row: &sea_orm::QueryResult) -> Result<TelemetryPoint> {
        let measurement: String = row.try_get("", "measurement")?;
        let timestamp: DateTime<Utc> = row.try_get("", "time")?;
        let tags: serde_json::Value = row.try_get("", "tags")?;
        let fields: serde_json::Value = row.try_get("", "fields")?;
        let metadata: Option<serde_json::Value> = row.try_get("", "metadata").ok();

        let tags: BTreeMap<String, String> = serde_json::from_value(tags)?;
        let fields: BTreeMap<String, FieldValue> = serde_json::from_value(fields)?;
        let metadata: BTreeMap<String, serde_json::Value> = match metadata {
            Some(value) => serde_json::from_value(value)?,
            None => BTreeMap::new(),
        };

        let point = TelemetryPoint::new(measurement, timestamp, tags, fields)
            .map_err(|e| HassError::Storage(e.to_string()))?;
        Ok(point.with_metadata_map(metadata))
    }
}

#[async_trait]
impl TimeSeriesStore for TimescaleStore {
    async fn health_check(&self) -> Result<()> {
        let stmt = Statement::from_string(self.backend(), "SELECT 1".to_string());
        self.db.execute(stmt).await?;
        Ok(())
    }

    async fn initialize_schema(&self, measurements: &[String]) -> Result<()> {
        let statements = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    time TIMESTAMPTZ NOT NULL,
                    measurement TEXT NOT NULL,
                    tags JSONB NOT NULL DEFAULT '{{}}',
                    fields JSONB NOT NULL,
                    metadata JSONB
                )
                "#,
                self.table
            ),
            format!(
                "SELECT create_hypertable('{}', 'time', if_not_exists => TRUE)",
                self.table
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {0}_series_idx ON {0} (measurement, time, tags)",
                self.table
            ),
        ];

        for sql in statements {
            self.db
                .execute(Statement::from_string(self.backend(), sql))
                .await?;
        }

        info!(
            table = %self.table,
            measurements = measurements.len(),
            "Telemetry schema initialized"
        );
        Ok(())
    }

    async fn write_point(&self, point: &TelemetryPoint) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (time, measurement, tags, fields, metadata)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (measurement, time, tags)
            DO UPDATE SET fields = EXCLUDED.fields, metadata = EXCLUDED.metadata
            "#,
            self.table
        );

        let stmt = Statement::from_sql_and_values(
            self.backend(),
            sql,
            vec![
                point.timestamp().into(),
                point.measurement().to_string().into(),
                serde_json::to_value(point.tags())?.into(),
                serde_json::to_value(point.fields())?.into(),
                serde_json::to_value(point.metadata())?.into(),
            ],
        );

        self.db.execute(stmt).await?;

        debug!(
            measurement = %point.measurement(),
            "Point written to TimescaleDB"
        );

        Ok(())
    }

    async fn query(&self, query: &TimeSeriesQuery) -> Result<Vec<TelemetryPoint>> {
        let (where_sql, mut params) = self.where_clause(query)?;
        let mut sql = format!(
            "SELECT time, measurement, tags, fields, metadata FROM {}{} ORDER BY time ASC",
            self.table, where_sql
        );

        if let Some(limit) = query.limit {
            params.push((limit as i64).into());
            sql.push_str(&format!(" LIMIT ${}", params.len()));
        }
        if query.offset > 0 {
            params.push((query.offset as i64).into());
            sql.push_str(&format!(" OFFSET ${}", params.len()));
        }

        let stmt = Statement::from_sql_and_values(self.backend(), sql, params);
        let rows = self.db.query_all(stmt).await?;

        let points = rows
            .iter()
            .map(|row| self.row_to_point(row))
            .collect::<Result<Vec<_>>>()?;

        debug!(count = points.len(), "Queried points from TimescaleDB");
        Ok(points)
    }

    async fn count(&self, query: &TimeSeriesQuery) -> Result<usize> {
        let (where_sql, params) = self.where_clause(query)?;
        let sql = format!("SELECT COUNT(*) AS count FROM {}{}", self.table, where_sql);

        let stmt = Statement::from_sql_and_values(self.backend(), sql, params);
        let count = match self.db.query_one(stmt).await? {
            Some(row) => row.try_get::<i64>("", "count")?,
            None => 0,
        };
        Ok(count.max(0) as usize)
    }

    async fn list_measurements(&self, range: Option<TimeRange>) -> Result<Vec<String>> {
        let query = TimeSeriesQuery::new().with_optional_range(range);
        let (where_sql, params) = self.where_clause(&query)?;
        let sql = format!(
            "SELECT DISTINCT measurement FROM {}{} ORDER BY measurement",
            self.table, where_sql
        );

        let stmt = Statement::from_sql_and_values(self.backend(), sql, params);
        let rows = self.db.query_all(stmt).await?;

        let mut measurements = Vec::with_capacity(rows.len());
        for row in rows {
            measurements.push(row.try_get::<String>("", "measurement")?);
        }
        Ok(measurements)
    }

    async fn delete_before(&self, measurement: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE measurement = $1 AND time < $2",
            self.table
        );
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            sql,
            vec![measurement.to_string().into(), cutoff.into()],
        );

        let result = self.db.execute(stmt).await?;
        debug!(
            measurement = %measurement,
            deleted_rows = %result.rows_affected(),
            "Expired points deleted"
        );
        Ok(result.rows_affected())
    }

    async fn drop_measurement(&self, measurement: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE measurement = $1", self.table);
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            sql,
            vec![measurement.to_string().into()],
        );

        let result = self.db.execute(stmt).await?;
        info!(
            measurement = %measurement,
            deleted_rows = %result.rows_affected(),
            "Measurement dropped"
        );
        Ok(result.rows_affected())
    }
}
