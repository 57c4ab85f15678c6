use chrono::{Duration, Utc};
use hass_timeseries::{
    MemoryStore, RetentionPolicy, RetentionPolicyManager, RetentionScheduler, RetentionSettings,
    RetentionTier, ScheduledTask, TaskType, TelemetryPoint, TimeSeriesStore,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    println!("⏰ HASS Retention Scheduler Example\n");

    // 准备一些跨越多个保留层级的数据
    let store = Arc::new(MemoryStore::new());
    for (measurement, age_days) in [("ha_entities", 10), ("ha_entities", 1), ("ha_services", 45)] {
        let point = TelemetryPoint::builder(measurement)
            .timestamp(Utc::now() - Duration::days(age_days))
            .tag("entity_id", "sensor.demo_value")
            .field("state", "1")
            .build()?;
        store.write_point(&point).await?;
    }
    println!("✅ Seeded {} points\n", store.len().await);

    // 保留策略管理器，附带一个自定义策略
    let mut manager = RetentionPolicyManager::new(RetentionSettings::default())?
        .with_store(store.clone());
    manager.add_custom_policy(
        RetentionPolicy::new("energy", RetentionTier::LongTerm).with_measurements(["ha_energy"]),
    )?;
    let manager = Arc::new(Mutex::new(manager));

    let mut scheduler = RetentionScheduler::new(manager.clone()).await?;
    println!("📅 Retention scheduler created\n");

    // 1. 每日清理任务
    let daily = ScheduledTask::daily_cleanup();
    println!("🧹 {} ({})", daily.name, daily.cron_expression);
    let job_id = scheduler.add_task(daily).await?;
    println!("  ✓ Job ID: {}\n", job_id);

    // 2. 每 10 秒强制清理一次（演示用）
    let demo = ScheduledTask::new(
        "Demo Forced Cleanup".to_string(),
        "*/10 * * * * *".to_string(),
        TaskType::RetentionCleanup { force: true },
    );
    println!("🎨 {} ({})", demo.name, demo.cron_expression);
    let job_id = scheduler.add_task(demo).await?;
    println!("  ✓ Job ID: {}\n", job_id);

    println!("🚀 Starting scheduler...");
    scheduler.start().await?;

    println!("⏳ Scheduler will run for 30 seconds...\n");
    sleep(std::time::Duration::from_secs(30)).await;

    scheduler.shutdown().await?;
    println!("\n🛑 Scheduler stopped");

    let stats = manager.lock().await.stats().clone();
    println!("  Cleanups performed: {}", stats.cleanups_performed);
    println!("  Points deleted: {}", stats.points_deleted);
    println!("  Points remaining: {}", store.len().await);

    Ok(())
}
