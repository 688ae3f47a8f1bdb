pub mod app_config;
pub mod database;
pub mod message_queue;
pub mod worker_observability;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use message_queue::{ReclaimerConfig, RedisConfig, StreamConfig};
pub use worker_observability::{ObservabilityConfig, WorkerConfig};
