use serde::{Deserialize, Serialize};
use std::time::Duration;

/// PostgreSQL连接池配置
///
/// 认领事务会持有议题行锁直到处理器返回，`max_connections`至少要覆盖
/// 同一进程内的Worker主循环、回收器以及嵌入方的事件接入调用。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// 获取连接的超时时间
    pub connection_timeout_seconds: u64,
    /// 空闲连接保留时间，0表示不回收
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/relay".to_string(),
            max_connections: 10,
            min_connections: 1,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 600,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.url.starts_with("postgresql://") && !self.url.starts_with("postgres://") {
            return Err(anyhow::anyhow!(
                "数据库URL必须以postgresql://或postgres://开头: {:?}",
                self.url
            ));
        }

        if self.max_connections < 2 {
            return Err(anyhow::anyhow!(
                "最大连接数至少为2（Worker主循环与回收器各占一条）"
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(anyhow::anyhow!("最小连接数不能大于最大连接数"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_seconds > 0).then(|| Duration::from_secs(self.idle_timeout_seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_needs_room_for_worker_and_reclaimer() {
        let config = DatabaseConfig {
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(DatabaseConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_idle_timeout_disables_reaping() {
        let config = DatabaseConfig {
            idle_timeout_seconds: 0,
            ..Default::default()
        };
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(
            DatabaseConfig::default().idle_timeout(),
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn test_mysql_url_is_rejected() {
        let config = DatabaseConfig {
            url: "mysql://localhost/relay".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
