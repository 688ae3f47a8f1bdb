use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Redis Stream性能监控指标
///
/// 每个计数器同时写入`metrics`门面与本地原子变量，
/// 没有安装recorder时仍可通过[`RedisStreamMetrics::snapshot`]读取。
#[derive(Debug, Clone, Default)]
pub struct RedisStreamMetrics {
    pub messages_published: Arc<AtomicU64>,
    pub messages_consumed: Arc<AtomicU64>,
    pub messages_acked: Arc<AtomicU64>,
    pub messages_requeued: Arc<AtomicU64>,
    pub messages_dead_lettered: Arc<AtomicU64>,
    pub messages_reclaimed: Arc<AtomicU64>,
    pub messages_malformed: Arc<AtomicU64>,
    pub connection_errors: Arc<AtomicU64>,
    pub active_connections: Arc<AtomicU32>,
}

impl RedisStreamMetrics {
    /// 记录消息发布
    pub fn record_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        counter!("relay_stream_messages_published_total").increment(1);
    }

    /// 记录消息消费
    pub fn record_messages_consumed(&self, count: u64) {
        self.messages_consumed.fetch_add(count, Ordering::Relaxed);
        counter!("relay_stream_messages_consumed_total").increment(count);
    }

    /// 记录消息确认
    pub fn record_message_acked(&self) {
        self.messages_acked.fetch_add(1, Ordering::Relaxed);
        counter!("relay_stream_messages_acked_total").increment(1);
    }

    pub fn record_message_requeued(&self) {
        self.messages_requeued.fetch_add(1, Ordering::Relaxed);
        counter!("relay_stream_messages_requeued_total").increment(1);
    }

    pub fn record_message_dead_lettered(&self) {
        self.messages_dead_lettered.fetch_add(1, Ordering::Relaxed);
        counter!("relay_stream_messages_dead_lettered_total").increment(1);
    }

    pub fn record_message_reclaimed(&self) {
        self.messages_reclaimed.fetch_add(1, Ordering::Relaxed);
        counter!("relay_stream_messages_reclaimed_total").increment(1);
    }

    /// 记录被丢弃的格式错误消息
    pub fn record_message_malformed(&self) {
        self.messages_malformed.fetch_add(1, Ordering::Relaxed);
        counter!("relay_stream_messages_malformed_total").increment(1);
    }

    /// 记录连接错误
    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
        counter!("relay_stream_connection_errors_total").increment(1);
    }

    /// 更新活跃连接数
    pub fn set_active_connections(&self, count: u32) {
        self.active_connections.store(count, Ordering::Relaxed);
        gauge!("relay_stream_active_connections").set(count as f64);
    }

    /// 记录操作耗时
    pub fn record_operation_duration(&self, operation: &str, duration_ms: f64) {
        histogram!(format!("relay_stream_{operation}_duration_ms")).record(duration_ms);
    }

    /// 获取当前统计信息
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_published: self.messages_published.load(Ordering::Relaxed),
            messages_consumed: self.messages_consumed.load(Ordering::Relaxed),
            messages_acked: self.messages_acked.load(Ordering::Relaxed),
            messages_requeued: self.messages_requeued.load(Ordering::Relaxed),
            messages_dead_lettered: self.messages_dead_lettered.load(Ordering::Relaxed),
            messages_reclaimed: self.messages_reclaimed.load(Ordering::Relaxed),
            messages_malformed: self.messages_malformed.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_published: u64,
    pub messages_consumed: u64,
    pub messages_acked: u64,
    pub messages_requeued: u64,
    pub messages_dead_lettered: u64,
    pub messages_reclaimed: u64,
    pub messages_malformed: u64,
    pub connection_errors: u64,
    pub active_connections: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = RedisStreamMetrics::default();
        metrics.record_message_published();
        metrics.record_messages_consumed(3);
        metrics.record_message_acked();
        metrics.record_message_malformed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_published, 1);
        assert_eq!(snapshot.messages_consumed, 3);
        assert_eq!(snapshot.messages_acked, 1);
        assert_eq!(snapshot.messages_malformed, 1);
        assert_eq!(snapshot.messages_dead_lettered, 0);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = RedisStreamMetrics::default();
        let clone = metrics.clone();
        clone.record_message_requeued();
        assert_eq!(metrics.snapshot().messages_requeued, 1);
    }
}
