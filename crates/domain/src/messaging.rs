//! 消息队列抽象
//!
//! 生产者、消费者与待处理条目认领三个角色分开定义，
//! Worker主循环与回收器只通过这些trait与流交互。

use async_trait::async_trait;
use relay_core::RelayResult;
use std::collections::HashMap;
use std::time::Duration;

use crate::task_message::TaskMessage;

/// 流中的原始条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// 消费者组待确认列表中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub idle: Duration,
    pub times_delivered: u64,
}

/// 任务生产者
#[async_trait]
pub trait Producer: Send + Sync {
    /// 追加消息到流，`attempt`为0时按1写入，返回流分配的条目ID
    async fn enqueue(&self, message: &TaskMessage) -> RelayResult<String>;
}

/// 消费者组成员
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// 阻塞读取新条目，格式错误的条目被确认并丢弃
    async fn read(&self) -> RelayResult<Vec<TaskMessage>>;

    /// 按条目ID确认
    async fn ack_entry(&self, entry_id: &str) -> RelayResult<()>;

    async fn ack(&self, message: &TaskMessage) -> RelayResult<()> {
        self.ack_entry(&message.id).await
    }

    /// 确认原条目，延迟后以`attempt + 1`重新追加
    async fn requeue(&self, message: &TaskMessage, reason: &str) -> RelayResult<()> {
        self.requeue_with_attempt(message, message.attempt.saturating_add(1), reason)
            .await
    }

    /// 确认原条目，延迟后以指定的`attempt`重新追加
    ///
    /// `attempt`为0时沿用消息自身的值。
    async fn requeue_with_attempt(
        &self,
        message: &TaskMessage,
        attempt: u32,
        reason: &str,
    ) -> RelayResult<()>;

    /// 确认原条目并写入死信流，死信不会被自动重放
    async fn send_dlq(&self, message: &TaskMessage, reason: &str) -> RelayResult<()>;
}

/// 待处理条目的扫描与认领
#[async_trait]
pub trait PendingClaimer: Send + Sync {
    /// 列出空闲时间超过`min_idle`的待处理条目
    async fn list_stale(&self, min_idle: Duration, count: usize) -> RelayResult<Vec<PendingEntry>>;

    /// 把条目的所有权转给当前消费者
    ///
    /// 已被其他回收者抢先认领时返回`None`。
    async fn claim(&self, entry: &PendingEntry, min_idle: Duration)
        -> RelayResult<Option<StreamEntry>>;

    /// 确认无法解析的已认领条目
    async fn ack_claimed(&self, entry_id: &str) -> RelayResult<()>;
}

/// 主循环与回收器共用的消息处理函数
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, message: TaskMessage) -> RelayResult<()>;
}
