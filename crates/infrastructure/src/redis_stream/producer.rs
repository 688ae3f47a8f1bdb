use async_trait::async_trait;
use relay_core::RelayResult;
use relay_domain::{Producer, TaskMessage};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::stream_operations::RedisStreamOperations;

/// 任务生产者，XADD成功返回即视为持久化
pub struct RedisProducer {
    operations: Arc<RedisStreamOperations>,
    stream: String,
}

impl RedisProducer {
    pub fn new(operations: Arc<RedisStreamOperations>, stream: impl Into<String>) -> Self {
        Self {
            operations,
            stream: stream.into(),
        }
    }
}

#[async_trait]
impl Producer for RedisProducer {
    #[instrument(skip(self, message), fields(stream = %self.stream, task_type = %message.task_type(), issue_id = ?message.issue_id()))]
    async fn enqueue(&self, message: &TaskMessage) -> RelayResult<String> {
        let fields = message.to_fields(message.attempt);
        let id = self.operations.append(&self.stream, &fields).await?;
        self.operations.metrics().record_message_published();
        debug!(message_id = %id, attempt = message.attempt.max(1), "task enqueued");
        Ok(id)
    }
}
