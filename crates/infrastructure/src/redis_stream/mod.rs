//! Redis Stream消息队列模块
//!
//! 按职责拆分：连接管理、底层流命令、生产者、消费者、待处理条目认领与指标。

pub mod connection_manager;
pub mod consumer;
pub mod metrics_collector;
pub mod producer;
pub mod reclaim;
pub mod stream_operations;

pub use connection_manager::RedisConnectionManager;
pub use consumer::RedisConsumer;
pub use metrics_collector::{MetricsSnapshot, RedisStreamMetrics};
pub use producer::RedisProducer;
pub use reclaim::RedisPendingClaimer;
pub use stream_operations::RedisStreamOperations;
