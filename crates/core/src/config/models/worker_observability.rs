use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 与ID布局中的10位节点号一致
const MAX_NODE_ID: u16 = 1023;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 优雅关闭的最长等待时间（秒）
    pub shutdown_timeout_seconds: u64,
    /// 单条消息内处理新到事件的最大轮数
    pub max_processing_iterations: u32,
    /// 读取失败后的退避时间（毫秒）
    pub read_error_backoff_ms: u64,
    /// ID生成器节点号（0-1023），共享同一数据库的进程必须互不相同
    pub node_id: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_seconds: 30,
            max_processing_iterations: 5,
            read_error_backoff_ms: 1000,
            node_id: 0,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.shutdown_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("关闭超时时间必须大于0"));
        }
        if self.max_processing_iterations == 0 {
            return Err(anyhow::anyhow!("最大处理轮数必须大于0"));
        }
        if self.node_id > MAX_NODE_ID {
            return Err(anyhow::anyhow!(
                "节点号必须在0到{}之间: {}",
                MAX_NODE_ID,
                self.node_id
            ));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn read_error_backoff(&self) -> Duration {
        Duration::from_millis(self.read_error_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// "json" 或 "pretty"
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志格式: {}，支持的格式: {:?}",
                self.log_format,
                valid_formats
            ));
        }
        if self.log_level.is_empty() {
            return Err(anyhow::anyhow!("日志级别不能为空"));
        }
        Ok(())
    }
}
