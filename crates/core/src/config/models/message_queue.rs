use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub database: i64,
    pub password: Option<String>,
    pub connection_timeout_seconds: u64,
    pub max_retry_attempts: u32,
    pub retry_delay_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            password: None,
            connection_timeout_seconds: 5,
            max_retry_attempts: 3,
            retry_delay_seconds: 1,
        }
    }
}

impl RedisConfig {
    /// Validate Redis configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("Redis主机地址不能为空"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("Redis端口必须大于0"));
        }

        if self.database < 0 {
            return Err(anyhow::anyhow!("Redis数据库索引不能为负数"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Redis连接超时时间必须大于0"));
        }

        if self.max_retry_attempts == 0 {
            return Err(anyhow::anyhow!("Redis最大重试次数必须大于0"));
        }

        Ok(())
    }

    /// Build Redis connection URL
    pub fn build_url(&self) -> String {
        let auth = if let Some(password) = &self.password {
            format!(":{password}@")
        } else {
            String::new()
        };
        format!(
            "redis://{}{}:{}/{}",
            auth, self.host, self.port, self.database
        )
    }
}

/// 任务流与消费者组配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// 任务流名称
    pub stream: String,
    /// 消费者组名称
    pub group: String,
    /// 当前消费者标识
    pub consumer: String,
    /// 死信流名称
    pub dlq_stream: String,
    /// 每次读取的最大消息数
    pub batch_size: usize,
    /// 读取阻塞时长（毫秒）
    pub block_ms: u64,
    /// 进入死信流之前的最大尝试次数
    pub max_attempts: u32,
    /// 重新入队前的固定延迟（毫秒）
    pub requeue_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream: "relay_events".to_string(),
            group: "relay_group".to_string(),
            consumer: "relay_worker".to_string(),
            dlq_stream: "relay_events_dlq".to_string(),
            batch_size: 1,
            block_ms: 5000,
            max_attempts: 3,
            requeue_delay_ms: 1000,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.stream.is_empty() {
            return Err(anyhow::anyhow!("任务流名称不能为空"));
        }
        if self.group.is_empty() {
            return Err(anyhow::anyhow!("消费者组名称不能为空"));
        }
        if self.consumer.is_empty() {
            return Err(anyhow::anyhow!("消费者标识不能为空"));
        }
        if self.dlq_stream.is_empty() {
            return Err(anyhow::anyhow!("死信流名称不能为空"));
        }
        if self.dlq_stream == self.stream {
            return Err(anyhow::anyhow!(
                "死信流不能与任务流同名: {}",
                self.stream
            ));
        }
        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("批量大小必须大于0"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }
        Ok(())
    }

    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }
}

/// 待处理消息回收配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclaimerConfig {
    /// 消息空闲超过该时长才会被回收（秒）
    pub min_idle_seconds: u64,
    /// 扫描间隔（秒）
    pub interval_seconds: u64,
    /// 每轮最多回收的消息数
    pub batch_size: usize,
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            min_idle_seconds: 300,
            interval_seconds: 60,
            batch_size: 10,
        }
    }
}

impl ReclaimerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds == 0 {
            return Err(anyhow::anyhow!("回收扫描间隔必须大于0"));
        }
        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("回收批量大小必须大于0"));
        }
        Ok(())
    }

    pub fn min_idle(&self) -> Duration {
        Duration::from_secs(self.min_idle_seconds)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// 回收器使用的消费者标识
    pub fn consumer_name(stream: &StreamConfig) -> String {
        format!("{}-reclaimer", stream.consumer)
    }
}
