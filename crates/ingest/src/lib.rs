//! # 事件接入
//!
//! 外部事件进入队列的唯一入口：去重写入事件日志，只在议题`idle → queued`
//! 的流转真正发生时才投递任务消息。议题忙碌期间到达的事件被合并，
//! 由正在处理的Worker在同一轮事务中一并消费。

pub mod dedupe;
pub mod service;

pub use dedupe::compute_dedupe_key;
pub use service::{EventIngest, EventIngestParams, EventIngestService, IngestResult};
