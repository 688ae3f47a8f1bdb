use anyhow::{Context, Result};
use relay_core::AppConfig;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 命令行传入的启动参数，未指定的项沿用配置
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub consumer: Option<String>,
    pub node_id: Option<u16>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

/// 初始化日志系统
///
/// `RUST_LOG`存在时覆盖`log_level`。
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 加载配置并应用命令行覆盖
pub fn load_config(startup: &StartupConfig) -> Result<AppConfig> {
    let mut config = AppConfig::load(startup.config_path.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            startup.config_path.as_deref().unwrap_or("<默认路径>")
        )
    })?;

    if let Some(consumer) = &startup.consumer {
        config.stream.consumer = consumer.clone();
    }
    if let Some(node_id) = startup.node_id {
        config.worker.node_id = node_id;
    }
    if let Some(level) = &startup.log_level {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = &startup.log_format {
        config.observability.log_format = format.clone();
    }

    config.validate().context("命令行参数覆盖后的配置无效")?;
    Ok(config)
}

/// 等待关闭信号
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.unwrap_or_else(|e| {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::process::exit(1);
        })
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::process::exit(1);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_overrides_apply_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [stream]
            consumer = "from-file"

            [observability]
            log_level = "debug"
            "#
        )
        .unwrap();

        let config = load_config(&StartupConfig {
            config_path: Some(file.path().to_str().unwrap().to_string()),
            consumer: Some("worker-7".to_string()),
            node_id: Some(7),
            log_level: None,
            log_format: Some("json".to_string()),
        })
        .unwrap();

        assert_eq!(config.stream.consumer, "worker-7");
        assert_eq!(config.worker.node_id, 7);
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_empty_consumer_override_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = load_config(&StartupConfig {
            config_path: Some(file.path().to_str().unwrap().to_string()),
            consumer: Some(String::new()),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_out_of_range_node_override_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = load_config(&StartupConfig {
            config_path: Some(file.path().to_str().unwrap().to_string()),
            node_id: Some(1024),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        assert!(init_logging("info", "xml").is_err());
    }
}
