use async_trait::async_trait;
use relay_core::{RelayResult, StreamConfig};
use relay_domain::{MessageConsumer, TaskMessage, FIELD_ERROR, FIELD_LAST_ERROR};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::stream_operations::RedisStreamOperations;

/// 消费者组成员
///
/// `reader`只用于阻塞的XREADGROUP，确认与追加走`writer`。
pub struct RedisConsumer {
    reader: Arc<RedisStreamOperations>,
    writer: Arc<RedisStreamOperations>,
    config: StreamConfig,
}

impl RedisConsumer {
    /// 创建消费者并确保消费者组存在
    pub async fn new(
        reader: Arc<RedisStreamOperations>,
        writer: Arc<RedisStreamOperations>,
        config: StreamConfig,
    ) -> RelayResult<Self> {
        writer
            .ensure_consumer_group(&config.stream, &config.group)
            .await?;
        Ok(Self {
            reader,
            writer,
            config,
        })
    }
}

#[async_trait]
impl MessageConsumer for RedisConsumer {
    async fn read(&self) -> RelayResult<Vec<TaskMessage>> {
        let entries = self
            .reader
            .read_group(
                &self.config.stream,
                &self.config.group,
                &self.config.consumer,
                self.config.batch_size,
                self.config.block(),
            )
            .await?;

        let metrics = self.writer.metrics();
        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            match TaskMessage::from_fields(&entry.id, &entry.fields) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    error!(
                        raw_message_id = %entry.id,
                        stream = %self.config.stream,
                        error = %e,
                        "failed to parse message, acknowledging"
                    );
                    metrics.record_message_malformed();
                    if let Err(ack_err) = self.ack_entry(&entry.id).await {
                        warn!(raw_message_id = %entry.id, error = %ack_err, "failed to ack malformed message");
                    }
                }
            }
        }

        if !messages.is_empty() {
            metrics.record_messages_consumed(messages.len() as u64);
            debug!(
                count = messages.len(),
                stream = %self.config.stream,
                consumer = %self.config.consumer,
                "read messages from stream"
            );
        }
        Ok(messages)
    }

    async fn ack_entry(&self, entry_id: &str) -> RelayResult<()> {
        self.writer
            .ack(&self.config.stream, &self.config.group, entry_id)
            .await?;
        debug!(message_id = %entry_id, stream = %self.config.stream, "message acknowledged");
        Ok(())
    }

    async fn requeue_with_attempt(
        &self,
        message: &TaskMessage,
        attempt: u32,
        reason: &str,
    ) -> RelayResult<()> {
        let attempt = if attempt == 0 {
            message.attempt.max(1)
        } else {
            attempt
        };

        let mut fields = message.to_fields(attempt);
        if !reason.is_empty() {
            fields.push((FIELD_LAST_ERROR.to_string(), reason.to_string()));
        }

        let delay = self.config.requeue_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        // 先追加再确认：追加失败时原条目仍在待处理列表中，由回收器重新投递
        let new_id = self.writer.append(&self.config.stream, &fields).await?;
        self.ack(message).await?;
        self.writer.metrics().record_message_requeued();
        info!(
            message_id = %message.id,
            new_message_id = %new_id,
            next_attempt = attempt,
            reason = %reason,
            "message requeued for retry"
        );
        Ok(())
    }

    async fn send_dlq(&self, message: &TaskMessage, reason: &str) -> RelayResult<()> {
        let mut fields = message.to_fields(message.attempt);
        fields.push((FIELD_ERROR.to_string(), reason.to_string()));

        self.writer.append(&self.config.dlq_stream, &fields).await?;
        self.ack(message).await?;
        self.writer.metrics().record_message_dead_lettered();
        error!(
            message_id = %message.id,
            attempt = message.attempt,
            final_error = %reason,
            dlq_stream = %self.config.dlq_stream,
            "message sent to DLQ"
        );
        Ok(())
    }
}
