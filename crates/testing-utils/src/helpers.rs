//! Test helper utilities and common testing patterns

use relay_core::{ReclaimerConfig, StreamConfig, WorkerConfig};
use std::time::Duration;
use tokio::time::sleep;

/// Wait for a condition to be true with timeout
///
/// Polls every 10ms. Returns whether the condition became true in time.
pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }

    condition().await
}

/// Stream settings that keep tests fast: short blocking reads and no requeue delay
pub fn test_stream_config() -> StreamConfig {
    StreamConfig {
        stream: "test_events".to_string(),
        group: "test_group".to_string(),
        consumer: "test_worker".to_string(),
        dlq_stream: "test_events_dlq".to_string(),
        batch_size: 10,
        block_ms: 10,
        max_attempts: 3,
        requeue_delay_ms: 0,
    }
}

pub fn test_reclaimer_config() -> ReclaimerConfig {
    ReclaimerConfig {
        min_idle_seconds: 300,
        interval_seconds: 1,
        batch_size: 10,
    }
}

pub fn test_worker_config() -> WorkerConfig {
    WorkerConfig {
        shutdown_timeout_seconds: 5,
        max_processing_iterations: 5,
        read_error_backoff_ms: 10,
        node_id: 0,
    }
}

/// Install a test-writer subscriber; repeated calls are ignored
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
