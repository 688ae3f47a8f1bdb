use redis::streams::{StreamClaimReply, StreamId, StreamReadReply};
use relay_core::{RelayError, RelayResult};
use relay_domain::{PendingEntry, StreamEntry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::connection_manager::RedisConnectionManager;
use super::metrics_collector::RedisStreamMetrics;

/// 流与消费者组的底层命令
pub struct RedisStreamOperations {
    connection_manager: Arc<RedisConnectionManager>,
    metrics: Arc<RedisStreamMetrics>,
}

impl RedisStreamOperations {
    pub fn new(connection_manager: Arc<RedisConnectionManager>) -> Self {
        let metrics = connection_manager.metrics();
        Self {
            connection_manager,
            metrics,
        }
    }

    pub fn metrics(&self) -> Arc<RedisStreamMetrics> {
        self.metrics.clone()
    }

    /// 创建消费者组，已存在时不报错
    ///
    /// 游标从流的起点开始，重建的组不会跳过建组之前写入的条目。
    pub async fn ensure_consumer_group(&self, stream: &str, group: &str) -> RelayResult<()> {
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE").arg(stream).arg(group).arg("0").arg("MKSTREAM");

        match self.connection_manager.execute_command::<String>(&cmd).await {
            Ok(_) => {
                debug!("Successfully created consumer group {} on {}", group, stream);
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group {} already exists", group);
                Ok(())
            }
            Err(e) => Err(RelayError::message_queue(format!(
                "Failed to create consumer group {group}: {e}"
            ))),
        }
    }

    /// XADD，返回流分配的条目ID
    pub async fn append(&self, stream: &str, fields: &[(String, String)]) -> RelayResult<String> {
        let start = Instant::now();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (key, value) in fields {
            cmd.arg(key).arg(value);
        }
        let id: String = self.connection_manager.execute_command(&cmd).await?;
        self.metrics
            .record_operation_duration("append", start.elapsed().as_millis() as f64);
        Ok(id)
    }

    pub async fn ack(&self, stream: &str, group: &str, id: &str) -> RelayResult<()> {
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group).arg(id);
        let _: i64 = self.connection_manager.execute_command(&cmd).await?;
        self.metrics.record_message_acked();
        Ok(())
    }

    /// XREADGROUP读取从未投递过的新条目，超时返回空批次
    pub async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> RelayResult<Vec<StreamEntry>> {
        let start = Instant::now();
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(stream)
            .arg(">");

        let reply: Option<StreamReadReply> =
            self.connection_manager.execute_blocking(&cmd, block).await?;
        self.metrics
            .record_operation_duration("read", start.elapsed().as_millis() as f64);

        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .into_iter()
                    .flat_map(|key| key.ids)
                    .map(to_stream_entry)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// XPENDING的扩展形式，只返回空闲时间不小于`min_idle`的条目
    pub async fn pending_idle(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> RelayResult<Vec<PendingEntry>> {
        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(stream)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle.as_millis() as u64)
            .arg("-")
            .arg("+")
            .arg(count);

        let rows: Vec<(String, String, u64, u64)> =
            self.connection_manager.execute_command(&cmd).await?;
        Ok(rows
            .into_iter()
            .map(|(id, consumer, idle_ms, times_delivered)| PendingEntry {
                id,
                consumer,
                idle: Duration::from_millis(idle_ms),
                times_delivered,
            })
            .collect())
    }

    /// XCLAIM单个条目，竞争失败或条目已被删除时返回`None`
    pub async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        id: &str,
    ) -> RelayResult<Option<StreamEntry>> {
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg(id);

        let reply: StreamClaimReply = self.connection_manager.execute_command(&cmd).await?;
        Ok(reply.ids.into_iter().next().map(to_stream_entry))
    }

    pub async fn stream_len(&self, stream: &str) -> RelayResult<u64> {
        let mut cmd = redis::cmd("XLEN");
        cmd.arg(stream);
        self.connection_manager.execute_command(&cmd).await
    }
}

/// 非字符串字段被丢弃，缺失的必需字段随后在解析时按格式错误处理
fn to_stream_entry(id: StreamId) -> StreamEntry {
    let fields = id
        .map
        .iter()
        .filter_map(|(key, value)| {
            redis::from_redis_value::<String>(value)
                .ok()
                .map(|v| (key.clone(), v))
        })
        .collect::<HashMap<String, String>>();
    StreamEntry { id: id.id, fields }
}
