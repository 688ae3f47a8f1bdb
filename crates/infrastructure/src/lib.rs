//! Relay基础设施层
//!
//! PostgreSQL事务性仓储与Redis Stream消息队列的实现。

pub mod database;
pub mod redis_stream;

pub use database::*;
pub use redis_stream::*;
