use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, FromRedisValue};
use relay_core::{RedisConfig, RelayError, RelayResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use super::metrics_collector::RedisStreamMetrics;

/// 自动重连的Redis连接
///
/// 内部的[`ConnectionManager`]是多路复用连接，阻塞读取会占住整条连接，
/// 因此阻塞读与其他命令应使用不同的实例。
pub struct RedisConnectionManager {
    connection: ConnectionManager,
    config: RedisConfig,
    metrics: Arc<RedisStreamMetrics>,
}

impl RedisConnectionManager {
    /// 普通命令使用的连接，响应超时等于连接超时
    pub async fn connect(
        config: RedisConfig,
        metrics: Arc<RedisStreamMetrics>,
    ) -> RelayResult<Self> {
        let response_timeout = Duration::from_secs(config.connection_timeout_seconds);
        Self::connect_with_response_timeout(config, metrics, response_timeout).await
    }

    /// 阻塞读取使用的连接，响应超时需覆盖`block`时长
    pub async fn connect_for_blocking(
        config: RedisConfig,
        metrics: Arc<RedisStreamMetrics>,
        block: Duration,
    ) -> RelayResult<Self> {
        let response_timeout = block + Duration::from_secs(config.connection_timeout_seconds);
        Self::connect_with_response_timeout(config, metrics, response_timeout).await
    }

    async fn connect_with_response_timeout(
        config: RedisConfig,
        metrics: Arc<RedisStreamMetrics>,
        response_timeout: Duration,
    ) -> RelayResult<Self> {
        let client = Client::open(config.build_url()).map_err(|e| {
            RelayError::message_queue(format!("Failed to create Redis client: {e}"))
        })?;

        let connection =
            Self::connect_with_retry(&client, &config, &metrics, response_timeout).await?;
        let manager = Self {
            connection,
            config,
            metrics,
        };
        manager.ping().await?;
        debug!(
            "Successfully connected to Redis at {}:{}",
            manager.config.host, manager.config.port
        );

        Ok(manager)
    }

    async fn connect_with_retry(
        client: &Client,
        config: &RedisConfig,
        metrics: &RedisStreamMetrics,
        response_timeout: Duration,
    ) -> RelayResult<ConnectionManager> {
        let connect_timeout = Duration::from_secs(config.connection_timeout_seconds);
        let mut last_error = String::from("Unknown");

        for attempt in 0..config.max_retry_attempts {
            let manager_config = ConnectionManagerConfig::new()
                .set_connection_timeout(connect_timeout)
                .set_response_timeout(response_timeout);
            let connecting = ConnectionManager::new_with_config(client.clone(), manager_config);
            match timeout(connect_timeout, connecting).await {
                Ok(Ok(connection)) => {
                    if attempt > 0 {
                        debug!(
                            "Successfully reconnected to Redis after {} attempts",
                            attempt + 1
                        );
                    }
                    metrics.set_active_connections(1);
                    return Ok(connection);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("timed out after {connect_timeout:?}"),
            }

            metrics.record_connection_error();
            if attempt + 1 < config.max_retry_attempts {
                warn!(
                    "Failed to connect to Redis (attempt {}/{}): {}. Retrying in {}s...",
                    attempt + 1,
                    config.max_retry_attempts,
                    last_error,
                    config.retry_delay_seconds
                );
                sleep(Duration::from_secs(config.retry_delay_seconds)).await;
            }
        }

        let error_msg = format!(
            "Failed to connect to Redis after {} attempts. Last error: {}",
            config.max_retry_attempts, last_error
        );
        error!("{}", error_msg);
        Err(RelayError::message_queue(error_msg))
    }

    pub fn metrics(&self) -> Arc<RedisStreamMetrics> {
        self.metrics.clone()
    }

    /// 执行一条命令
    pub async fn execute_command<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> RelayResult<T> {
        let mut connection = self.connection.clone();
        cmd.query_async(&mut connection).await.map_err(|e| {
            self.metrics.record_connection_error();
            RelayError::message_queue(format!("Redis command failed: {e}"))
        })
    }

    /// 执行一条可能阻塞的命令，超过`limit`视为失败
    pub async fn execute_blocking<T: FromRedisValue>(
        &self,
        cmd: &redis::Cmd,
        limit: Duration,
    ) -> RelayResult<T> {
        let grace = Duration::from_secs(self.config.connection_timeout_seconds);
        match timeout(limit + grace, self.execute_command(cmd)).await {
            Ok(result) => result,
            Err(_) => {
                self.metrics.record_connection_error();
                Err(RelayError::message_queue(format!(
                    "Redis command timed out after {:?}",
                    limit + grace
                )))
            }
        }
    }

    pub async fn ping(&self) -> RelayResult<()> {
        let response: String = self.execute_command(&redis::cmd("PING")).await?;
        if response == "PONG" {
            debug!("Redis connection test successful");
            Ok(())
        } else {
            let error_msg = format!("Unexpected PING response: {response}");
            error!("{}", error_msg);
            Err(RelayError::message_queue(error_msg))
        }
    }
}
