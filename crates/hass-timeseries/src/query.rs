use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::TelemetryPoint;

/// 时间范围（左闭右开）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// 时序数据查询：按 measurement、标签、时间范围过滤，按时间升序返回
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeSeriesQuery {
    /// measurement 名称
    pub measurement: Option<String>,

    /// 标签等值过滤
    pub tags: BTreeMap<String, String>,

    /// 时间范围
    pub time_range: Option<TimeRange>,

    /// 限制返回数量
    pub limit: Option<usize>,

    /// 跳过的记录数
    pub offset: usize,
}

impl TimeSeriesQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measurement(measurement: impl Into<String>) -> Self {
        Self {
            measurement: Some(measurement.into()),
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn with_optional_range(mut self, range: Option<TimeRange>) -> Self {
        self.time_range = range;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// 判断数据点是否满足过滤条件（不考虑分页）
    pub fn matches(&self, point: &TelemetryPoint) -> bool {
        if let Some(measurement) = &self.measurement {
            if point.measurement() != measurement {
                return false;
            }
        }
        if let Some(range) = &self.time_range {
            if !range.contains(point.timestamp()) {
                return false;
            }
        }
        self.tags
            .iter()
            .all(|(k, v)| point.tag(k) == Some(v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_query_builder() {
        let now = Utc::now();
        let query = TimeSeriesQuery::measurement("ha_entities")
            .with_tag("domain", "sensor")
            .with_time_range(TimeRange::new(now - Duration::hours(1), now))
            .with_limit(100)
            .with_offset(200);

        assert_eq!(query.measurement.as_deref(), Some("ha_entities"));
        assert_eq!(query.limit, Some(100));
        assert_eq!(query.offset, 200);
    }

    #[test]
    fn test_query_matches() {
        let now = Utc::now();
        let point = TelemetryPoint::builder("ha_entities")
            .timestamp(now - Duration::minutes(5))
            .tag("domain", "sensor")
            .field("state", "1")
            .build()
            .unwrap();

        let range = TimeRange::new(now - Duration::hours(1), now);
        assert!(TimeSeriesQuery::measurement("ha_entities")
            .with_time_range(range)
            .matches(&point));
        assert!(!TimeSeriesQuery::measurement("ha_entities")
            .with_tag("domain", "light")
            .matches(&point));
        assert!(!TimeSeriesQuery::measurement("ha_events").matches(&point));
        assert!(!TimeSeriesQuery::new()
            .with_time_range(TimeRange::new(now - Duration::minutes(1), now))
            .matches(&point));
    }
}
