use hass_core::{HassError, SharedEventBus};
use hass_types::{RawEvent, TelemetryEvent};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::IngestMetrics;
use crate::model::TelemetryPoint;
use crate::scheduler::SharedRetentionManager;
use crate::store::SharedStore;
use crate::transformer::EventToPointTransformer;

/// 摄取结束时的汇总
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub events_received: u64,
    pub points_written: u64,
    pub transform_errors: u64,
    pub write_errors: u64,
    pub events_lagged: u64,
}

/// 实时摄取管道：事件总线 -> 转换 -> 保留层级 -> 存储
pub struct IngestPipeline {
    receiver: broadcast::Receiver<RawEvent>,
    transformer: EventToPointTransformer,
    retention: SharedRetentionManager,
    store: SharedStore,
    metrics: IngestMetrics,
    cancel: CancellationToken,
}

impl IngestPipeline {
    /// 创建管道并立即订阅总线，之后发布的事件都不会丢失
    pub fn new(
        bus: &SharedEventBus,
        transformer: EventToPointTransformer,
        retention: SharedRetentionManager,
        store: SharedStore,
    ) -> Self {
        Self {
            receiver: bus.subscribe(),
            transformer,
            retention,
            store,
            metrics: IngestMetrics::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_metrics(mut self, metrics: IngestMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> IngestMetrics {
        self.metrics.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 处理单个事件，返回写入的数据点
    pub async fn ingest(&mut self, event: &RawEvent) -> hass_core::Result<TelemetryPoint> {
        self.metrics.record_event(event.encoded_len());

        let point = match self.transformer.transform(event) {
            Ok(point) => point,
            Err(e) => {
                self.metrics.record_transform_error();
                return Err(HassError::InvalidInput(e.to_string()));
            }
        };

        let (point, tier) = {
            let retention = self.retention.lock().await;
            let policy = retention.get_policy_for_point(&point);

            if retention.should_compress_point(&point, policy) {
                self.metrics.record_compress_candidate();
            }
            if retention.should_aggregate_point(&point, policy) {
                self.metrics.record_aggregate_candidate();
            }

            let tier = policy.duration;
            let point = point
                .with_metadata("retention_policy", json!(policy.name))
                .with_metadata("retention_tier", json!(tier.as_str()));
            (point, tier)
        };

        if let Err(e) = self.store.write_point(&point).await {
            self.metrics.record_write_error();
            warn!(
                measurement = %point.measurement(),
                error = %e,
                "Failed to write point"
            );
            return Err(e);
        }

        self.metrics.record_point_written(tier);
        debug!(
            measurement = %point.measurement(),
            tier = %tier,
            "Event ingested"
        );
        Ok(point)
    }

    /// 持续消费总线直到取消或总线关闭
    pub async fn run(mut self) -> IngestSummary {
        info!("Ingest pipeline started");

        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Ingest pipeline cancelled");
                    break;
                }
                received = self.receiver.recv() => received,
            };

            match received {
                Ok(event) => {
                    if let Err(e) = self.ingest(&event).await {
                        debug!(
                            event_type = %event.event_type(),
                            error = %e,
                            "Event dropped"
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Ingest pipeline lagging behind event bus");
                    self.metrics.record_lagged(skipped);
                }
                Err(RecvError::Closed) => {
                    info!("Event bus closed");
                    break;
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        IngestSummary {
            events_received: snapshot.events_received,
            points_written: snapshot.points_written,
            transform_errors: snapshot.transform_errors,
            write_errors: snapshot.write_errors,
            events_lagged: snapshot.events_lagged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::query::TimeSeriesQuery;
    use crate::retention::{RetentionPolicyManager, RetentionSettings};
    use crate::store::TimeSeriesStore;
    use hass_core::EventBus;
    use hass_types::{MqttEvent, WebSocketEvent};
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tokio::time::{sleep, Duration};

    fn pipeline(bus: &SharedEventBus, store: Arc<MemoryStore>) -> IngestPipeline {
        let retention = RetentionPolicyManager::new(RetentionSettings::default()).unwrap();
        IngestPipeline::new(
            bus,
            EventToPointTransformer::default(),
            Arc::new(Mutex::new(retention)),
            store,
        )
    }

    #[tokio::test]
    async fn test_ingest_records_retention_policy() {
        let bus = Arc::new(EventBus::new(16));
        let store = Arc::new(MemoryStore::new());
        let mut pipeline = pipeline(&bus, store.clone());

        let event: RawEvent = MqttEvent::from_publish("homeassistant/sensor/outdoor_temp/state", b"4.5")
            .unwrap()
            .into();
        let point = pipeline.ingest(&event).await.unwrap();

        assert_eq!(point.measurement(), "ha_metrics");
        assert_eq!(point.metadata()["retention_policy"], "long_term");
        assert_eq!(store.len().await, 1);
        assert_eq!(
            pipeline
                .metrics()
                .snapshot()
                .points_for(crate::retention::RetentionTier::LongTerm),
            1
        );
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let bus = Arc::new(EventBus::new(16));
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(&bus, store.clone());
        let cancel = pipeline.cancel_token();
        let metrics = pipeline.metrics();

        let handle = tokio::spawn(pipeline.run());

        for i in 0..3 {
            let event = WebSocketEvent::new("state_changed")
                .with_data("entity_id", json!(format!("light.room_{}", i)))
                .with_data("new_state", json!({"state": "on"}));
            bus.publish(event.into()).unwrap();
        }

        for _ in 0..50 {
            if metrics.snapshot().points_written == 3 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        cancel.cancel();
        let summary = handle.await.unwrap();

        assert_eq!(summary.events_received, 3);
        assert_eq!(summary.points_written, 3);
        let stored = store
            .count(&TimeSeriesQuery::measurement("ha_entities"))
            .await
            .unwrap();
        assert_eq!(stored, 3);
    }
}
