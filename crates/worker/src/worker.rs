use std::sync::Arc;
use std::time::Duration;

use relay_core::RelayResult;
use relay_domain::{MessageConsumer, MessageProcessor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 主读取循环
pub struct Worker {
    consumer: Arc<dyn MessageConsumer>,
    processor: Arc<dyn MessageProcessor>,
    read_error_backoff: Duration,
}

impl Worker {
    pub fn new(
        consumer: Arc<dyn MessageConsumer>,
        processor: Arc<dyn MessageProcessor>,
        read_error_backoff: Duration,
    ) -> Self {
        Self {
            consumer,
            processor,
            read_error_backoff,
        }
    }

    /// 持续读取并处理消息，直到`shutdown`被取消
    ///
    /// 取消时尚未处理的消息保持未确认，由回收器接手。
    pub async fn run(&self, shutdown: CancellationToken) -> RelayResult<()> {
        info!("Worker loop started");

        loop {
            let batch = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping worker loop");
                    break;
                }
                batch = self.consumer.read() => batch,
            };

            let messages = match batch {
                Ok(messages) => messages,
                Err(e) => {
                    error!(error = %e, "failed to read from stream");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.read_error_backoff) => continue,
                    }
                }
            };

            for message in messages {
                if shutdown.is_cancelled() {
                    debug!(message_id = %message.id, "Shutdown requested, leaving message pending");
                    break;
                }
                let message_id = message.id.clone();
                if let Err(e) = self.processor.process(message).await {
                    warn!(message_id = %message_id, error = %e, "message left unresolved");
                }
            }
        }

        info!("Worker loop stopped");
        Ok(())
    }
}
