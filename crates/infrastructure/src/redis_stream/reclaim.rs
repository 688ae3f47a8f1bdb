use async_trait::async_trait;
use relay_core::RelayResult;
use relay_domain::{PendingClaimer, PendingEntry, StreamEntry};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::stream_operations::RedisStreamOperations;

/// 以回收器身份扫描并认领待处理条目
pub struct RedisPendingClaimer {
    operations: Arc<RedisStreamOperations>,
    stream: String,
    group: String,
    consumer: String,
}

impl RedisPendingClaimer {
    pub fn new(
        operations: Arc<RedisStreamOperations>,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            operations,
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
        }
    }
}

#[async_trait]
impl PendingClaimer for RedisPendingClaimer {
    async fn list_stale(&self, min_idle: Duration, count: usize) -> RelayResult<Vec<PendingEntry>> {
        self.operations
            .pending_idle(&self.stream, &self.group, min_idle, count)
            .await
    }

    async fn claim(
        &self,
        entry: &PendingEntry,
        min_idle: Duration,
    ) -> RelayResult<Option<StreamEntry>> {
        let claimed = self
            .operations
            .claim(&self.stream, &self.group, &self.consumer, min_idle, &entry.id)
            .await?;
        match &claimed {
            Some(_) => self.operations.metrics().record_message_reclaimed(),
            None => debug!(message_id = %entry.id, "message already reclaimed by another consumer"),
        }
        Ok(claimed)
    }

    async fn ack_claimed(&self, entry_id: &str) -> RelayResult<()> {
        self.operations.ack(&self.stream, &self.group, entry_id).await?;
        self.operations.metrics().record_message_malformed();
        Ok(())
    }
}
