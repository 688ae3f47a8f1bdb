//! 领域仓储抽象
//!
//! 事务内的仓储方法都接收`&mut self`，由[`TransactionManager::begin`]返回的事务对象实现。
//! 事务需要显式提交，未提交即被丢弃的事务会回滚。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::RelayResult;

use crate::entities::{
    EventLog, Integration, Issue, NewEventLog, PipelineRun, RunStatus, WorkspaceEventLog,
};

/// 议题仓储
///
/// 所有状态流转都是带前置条件的更新，返回值表示流转是否实际发生。
#[async_trait]
pub trait IssueStore: Send {
    async fn get_by_id(&mut self, id: i64) -> RelayResult<Option<Issue>>;

    async fn get_by_integration_and_external_id(
        &mut self,
        integration_id: i64,
        external_issue_id: &str,
    ) -> RelayResult<Option<Issue>>;

    /// 插入或更新描述性字段，不修改`processing_status`
    async fn upsert(&mut self, issue: &Issue) -> RelayResult<Issue>;

    /// idle → queued
    async fn queue_if_idle(&mut self, id: i64) -> RelayResult<bool>;

    /// queued → processing，成功时返回认领后的议题
    async fn claim_queued(&mut self, id: i64) -> RelayResult<Option<Issue>>;

    /// processing → idle
    async fn release(&mut self, id: i64) -> RelayResult<bool>;

    /// processing → queued
    async fn requeue_processing(&mut self, id: i64) -> RelayResult<bool>;

    /// 无条件回到idle
    async fn reset_idle(&mut self, id: i64) -> RelayResult<()>;
}

/// 事件日志仓储
#[async_trait]
pub trait EventLogStore: Send {
    /// 按`dedupe_key`幂等写入
    ///
    /// 返回的布尔值为true当且仅当返回行的ID等于`new.id`。
    async fn create_or_get(&mut self, new: &NewEventLog) -> RelayResult<(EventLog, bool)>;

    /// 按`created_at`、`id`升序返回议题下所有未处理的事件
    async fn list_unprocessed_by_issue(&mut self, issue_id: i64) -> RelayResult<Vec<EventLog>>;

    async fn mark_batch_processed(&mut self, ids: &[i64], error: Option<&str>) -> RelayResult<()>;
}

/// 流水线运行记录仓储
#[async_trait]
pub trait PipelineRunStore: Send {
    async fn create(&mut self, run: &PipelineRun) -> RelayResult<PipelineRun>;

    async fn finish(&mut self, id: i64, status: RunStatus, error: Option<&str>) -> RelayResult<()>;
}

/// 工作区任务状态仓储
#[async_trait]
pub trait WorkspaceEventLogStore: Send {
    async fn get_by_id(&mut self, id: i64) -> RelayResult<Option<WorkspaceEventLog>>;

    /// `started_at`为`None`时保留原值，`finished_at`与`error`按给定值覆盖
    async fn update_status(
        &mut self,
        id: i64,
        status: RunStatus,
        error: Option<&str>,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> RelayResult<()>;
}

/// 一个数据库事务
#[async_trait]
pub trait StoreTransaction: Send {
    fn issues(&mut self) -> &mut dyn IssueStore;
    fn event_logs(&mut self) -> &mut dyn EventLogStore;
    fn pipeline_runs(&mut self) -> &mut dyn PipelineRunStore;
    fn workspace_event_logs(&mut self) -> &mut dyn WorkspaceEventLogStore;

    async fn commit(self: Box<Self>) -> RelayResult<()>;
    async fn rollback(self: Box<Self>) -> RelayResult<()>;
}

/// 事务工厂
#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self) -> RelayResult<Box<dyn StoreTransaction>>;
}

/// 集成仓储，只读且不参与事务
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    async fn get_by_id(&self, id: i64) -> RelayResult<Option<Integration>>;
}
