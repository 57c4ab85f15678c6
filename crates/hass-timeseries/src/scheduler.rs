use crate::retention::RetentionPolicyManager;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

pub type SharedRetentionManager = Arc<Mutex<RetentionPolicyManager>>;

/// 任务类型
#[derive(Debug, Clone, PartialEq)]
pub enum TaskType {
    /// 按保留策略清理过期数据；`force` 为 false 时受清理间隔约束
    RetentionCleanup { force: bool },
}

/// 调度任务
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    /// 任务名称
    pub name: String,

    /// Cron 表达式（含秒）
    pub cron_expression: String,

    /// 任务类型
    pub task_type: TaskType,

    /// 是否启用
    pub enabled: bool,
}

impl ScheduledTask {
    pub fn new(name: String, cron_expression: String, task_type: TaskType) -> Self {
        Self {
            name,
            cron_expression,
            task_type,
            enabled: true,
        }
    }

    /// 每日清理（凌晨 1 点）
    pub fn daily_cleanup() -> Self {
        Self::new(
            "Daily Retention Cleanup".to_string(),
            "0 0 1 * * *".to_string(),
            TaskType::RetentionCleanup { force: false },
        )
    }

    /// 每小时检查一次，是否真正清理由清理间隔决定
    pub fn hourly_cleanup_check() -> Self {
        Self::new(
            "Hourly Retention Check".to_string(),
            "0 0 * * * *".to_string(),
            TaskType::RetentionCleanup { force: false },
        )
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// 保留策略调度器
pub struct RetentionScheduler {
    scheduler: JobScheduler,
    manager: SharedRetentionManager,
}

impl RetentionScheduler {
    /// 创建新的调度器
    pub async fn new(manager: SharedRetentionManager) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self { scheduler, manager })
    }

    /// 添加任务
    pub async fn add_task(&self, task: ScheduledTask) -> anyhow::Result<uuid::Uuid> {
        if !task.enabled {
            info!(task_name = %task.name, "Task is disabled, skipping");
            return Ok(uuid::Uuid::nil());
        }

        let manager = self.manager.clone();
        let task_name = task.name.clone();
        let task_type = task.task_type.clone();

        let job = Job::new_async(task.cron_expression.as_str(), move |_uuid, _l| {
            let manager = manager.clone();
            let task_name = task_name.clone();
            let task_type = task_type.clone();

            Box::pin(async move {
                info!(task = %task_name, "Executing scheduled task");

                match task_type {
                    TaskType::RetentionCleanup { force } => {
                        let report = manager.lock().await.cleanup_expired_data(force).await;
                        if report.errors.is_empty() {
                            info!(
                                task = %task_name,
                                performed = report.cleanup_performed,
                                deleted_rows = report.points_deleted,
                                "Cleanup task completed"
                            );
                        } else {
                            error!(
                                task = %task_name,
                                errors = ?report.errors,
                                "Cleanup task finished with errors"
                            );
                        }
                    }
                }
            })
        })?;

        let job_id = self.scheduler.add(job).await?;

        info!(
            task_name = %task.name,
            cron = %task.cron_expression,
            job_id = %job_id,
            "Task scheduled"
        );

        Ok(job_id)
    }

    /// 启动调度器
    pub async fn start(&mut self) -> anyhow::Result<()> {
        self.scheduler.start().await?;
        info!("Retention scheduler started");
        Ok(())
    }

    /// 停止调度器
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.scheduler.shutdown().await?;
        info!("Retention scheduler stopped");
        Ok(())
    }

    /// 删除任务
    pub async fn remove_task(&mut self, job_id: uuid::Uuid) -> anyhow::Result<()> {
        self.scheduler.remove(&job_id).await?;
        info!(job_id = %job_id, "Task removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::RetentionSettings;

    #[test]
    fn test_scheduled_task_creation() {
        let task = ScheduledTask::daily_cleanup();
        assert_eq!(task.cron_expression, "0 0 1 * * *");
        assert_eq!(task.task_type, TaskType::RetentionCleanup { force: false });
        assert!(task.enabled);
        assert!(!ScheduledTask::hourly_cleanup_check().disabled().enabled);
    }

    #[tokio::test]
    async fn test_disabled_task_not_scheduled() {
        let manager = RetentionPolicyManager::new(RetentionSettings::default()).unwrap();
        let scheduler = RetentionScheduler::new(Arc::new(Mutex::new(manager)))
            .await
            .unwrap();

        let id = scheduler
            .add_task(ScheduledTask::daily_cleanup().disabled())
            .await
            .unwrap();
        assert!(id.is_nil());

        let id = scheduler.add_task(ScheduledTask::daily_cleanup()).await.unwrap();
        assert!(!id.is_nil());
    }
}
