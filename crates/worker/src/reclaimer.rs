use std::sync::Arc;

use relay_core::{ReclaimerConfig, RelayResult};
use relay_domain::{MessageProcessor, PendingClaimer, TaskMessage};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 回收超时未确认的条目
///
/// 按固定间隔扫描待处理列表，认领空闲超过阈值的条目，交给与主循环相同的
/// [`MessageProcessor`]。是否重试或进入死信由处理函数决定。
pub struct Reclaimer {
    claimer: Arc<dyn PendingClaimer>,
    processor: Arc<dyn MessageProcessor>,
    config: ReclaimerConfig,
}

impl Reclaimer {
    pub fn new(
        claimer: Arc<dyn PendingClaimer>,
        processor: Arc<dyn MessageProcessor>,
        config: ReclaimerConfig,
    ) -> Self {
        Self {
            claimer,
            processor,
            config,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> RelayResult<()> {
        info!(
            min_idle_seconds = self.config.min_idle_seconds,
            interval_seconds = self.config.interval_seconds,
            "Reclaimer started"
        );
        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reclaim_once(&shutdown).await {
                        error!(error = %e, "reclaim cycle failed");
                    }
                }
            }
        }

        info!("Reclaimer stopped");
        Ok(())
    }

    /// 执行一轮回收，返回交给处理函数的消息数
    pub async fn reclaim_once(&self, shutdown: &CancellationToken) -> RelayResult<usize> {
        let min_idle = self.config.min_idle();
        let stale = self
            .claimer
            .list_stale(min_idle, self.config.batch_size)
            .await?;
        if stale.is_empty() {
            return Ok(0);
        }
        debug!(count = stale.len(), "found stale pending entries");

        let mut reclaimed = 0;
        for entry in stale {
            if shutdown.is_cancelled() {
                break;
            }

            let raw = match self.claimer.claim(&entry, min_idle).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(message_id = %entry.id, error = %e, "failed to claim pending entry");
                    continue;
                }
            };

            let mut message = match TaskMessage::from_fields(&raw.id, &raw.fields) {
                Ok(message) => message,
                Err(e) => {
                    warn!(message_id = %raw.id, error = %e, "reclaimed entry is malformed, acknowledging");
                    if let Err(ack_err) = self.claimer.ack_claimed(&raw.id).await {
                        warn!(message_id = %raw.id, error = %ack_err, "failed to ack malformed entry");
                    }
                    continue;
                }
            };
            message.deliveries = entry.times_delivered + 1;

            info!(
                message_id = %message.id,
                previous_consumer = %entry.consumer,
                idle_ms = entry.idle.as_millis() as u64,
                deliveries = message.deliveries,
                "reclaimed pending message"
            );
            reclaimed += 1;
            if let Err(e) = self.processor.process(message).await {
                warn!(message_id = %raw.id, error = %e, "reclaimed message left unresolved");
            }
        }

        Ok(reclaimed)
    }
}
