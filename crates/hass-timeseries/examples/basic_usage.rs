use hass_timeseries::{
    encode_points, EventToPointTransformer, MemoryStore, RetentionPolicyManager,
    RetentionSettings, TimeSeriesQuery, TimeSeriesStore,
};
use hass_types::{MqttEvent, RawEvent, WebSocketEvent};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    println!("🚀 HASS TimeSeries Example\n");

    let store = MemoryStore::new();
    let mut transformer = EventToPointTransformer::default();
    let retention = RetentionPolicyManager::new(RetentionSettings::default())?;

    // 1. MQTT 状态消息
    println!("📡 Transforming MQTT events...");
    let mqtt: Vec<RawEvent> = vec![
        MqttEvent::from_publish("homeassistant/sensor/outdoor_temp/state", b"12.5")?.into(),
        MqttEvent::from_publish(
            "homeassistant/light/living_room_main/state",
            br#"{"state": "on", "attributes": {"brightness": 200, "friendly_name": "Main"}}"#,
        )?
        .into(),
    ];

    // 2. WebSocket 事件
    println!("🔌 Transforming WebSocket events...");
    let websocket: Vec<RawEvent> = vec![
        WebSocketEvent::new("call_service")
            .with_data("domain", json!("light"))
            .with_data("service", json!("turn_on"))
            .into(),
        WebSocketEvent::new("automation_triggered")
            .with_data("entity_id", json!("automation.night_mode"))
            .with_data("name", json!("Night mode"))
            .into(),
    ];

    for event in mqtt.iter().chain(websocket.iter()) {
        let point = transformer.transform(event)?;
        let policy = retention.get_policy_for_point(&point);
        println!(
            "  ✓ {} -> policy {} ({} tags, {} fields)",
            point.measurement(),
            policy.name,
            point.tags().len(),
            point.fields().len()
        );
        store.write_point(&point).await?;
    }
    println!();

    // 3. 查询
    println!("🔍 Querying ha_entities...");
    let points = store
        .query(&TimeSeriesQuery::measurement("ha_entities").with_limit(10))
        .await?;
    println!("  Found {} points\n", points.len());

    // 4. 行协议输出
    println!("📝 Line protocol:");
    let all = store.query(&TimeSeriesQuery::new()).await?;
    println!("{}\n", encode_points(&all)?);

    // 5. 优化统计
    let report = transformer.optimizer().get_optimization_report();
    println!("📊 Optimization report:");
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
