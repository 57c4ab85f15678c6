use hass_types::RawEvent;
use std::sync::Arc;
use tokio::sync::broadcast;

/// 原始事件总线，MQTT/WebSocket 接入端发布，摄取管道订阅
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RawEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: RawEvent) -> crate::Result<usize> {
        Ok(self.sender.send(event)?)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use hass_types::{MqttEvent, TelemetryEvent, WebSocketEvent};
    use tokio::time::{timeout, Duration};

    fn state_event(entity: &str, state: &str) -> RawEvent {
        let topic = format!("homeassistant/sensor/{}/state", entity);
        MqttEvent::from_publish(&topic, state.as_bytes())
            .unwrap()
            .into()
    }

    #[tokio::test]
    async fn test_eventbus_publish_subscribe() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        let result = bus.publish(state_event("outdoor", "12.5"));
        assert_eq!(result.unwrap(), 1);

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("Timeout waiting for event")
            .expect("Failed to receive event");

        assert_eq!(received.entity_id().as_deref(), Some("sensor.outdoor"));
    }

    #[tokio::test]
    async fn test_eventbus_multiple_subscribers() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let event: RawEvent = WebSocketEvent::new("homeassistant_start").into();
        assert_eq!(bus.publish(event).unwrap(), 2);

        assert_eq!(rx1.recv().await.unwrap().event_type(), "homeassistant_start");
        assert_eq!(rx2.recv().await.unwrap().event_type(), "homeassistant_start");
    }

    #[tokio::test]
    async fn test_eventbus_no_subscribers() {
        let bus = EventBus::new(10);
        let rx = bus.subscribe();
        drop(rx);

        // 没有活跃订阅者时 broadcast 返回错误
        let result = bus.publish(state_event("x", "1"));
        assert!(matches!(result, Err(crate::HassError::ChannelSend(_))));
    }

    #[tokio::test]
    async fn test_eventbus_capacity_overflow() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        bus.publish(state_event("a", "1")).unwrap();
        bus.publish(state_event("b", "2")).unwrap();
        bus.publish(state_event("c", "3")).unwrap();

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert_eq!(n, 1),
            _ => panic!("Expected Lagged error"),
        }

        let next = rx.recv().await.expect("Failed to receive");
        assert_eq!(next.entity_id().as_deref(), Some("sensor.b"));
    }

    #[tokio::test]
    async fn test_eventbus_concurrent_publish() {
        let bus = Arc::new(EventBus::new(100));
        let mut rx = bus.subscribe();

        let mut handles = vec![];
        for i in 0..10 {
            let bus_clone = bus.clone();
            handles.push(tokio::spawn(async move {
                bus_clone
                    .publish(state_event(&format!("s{}", i), "1"))
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut count = 0;
        while let Ok(result) = timeout(Duration::from_millis(100), rx.recv()).await {
            if result.is_ok() {
                count += 1;
            }
        }
        assert_eq!(count, 10);
    }
}
