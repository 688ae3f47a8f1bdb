use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use relay::app::{Application, Collaborators};
use relay::common::{init_logging, load_config, wait_for_shutdown_signal, StartupConfig};
use relay::shutdown::ShutdownManager;

/// 议题事件队列Worker
#[derive(Debug, Parser)]
#[command(name = "relay-worker", version, about = "可靠的议题事件队列Worker")]
struct Cli {
    /// 配置文件路径，未指定时依次查找默认路径
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 消费者组内的消费者标识，覆盖配置中的stream.consumer
    #[arg(long, value_name = "NAME")]
    consumer: Option<String>,

    /// ID生成器节点号，覆盖配置中的worker.node_id
    #[arg(long, value_name = "ID")]
    node_id: Option<u16>,

    /// 日志级别
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", value_parser = ["json", "pretty"])]
    log_format: Option<String>,
}

impl From<Cli> for StartupConfig {
    fn from(cli: Cli) -> Self {
        Self {
            config_path: cli.config,
            consumer: cli.consumer,
            node_id: cli.node_id,
            log_level: cli.log_level,
            log_format: cli.log_format,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let startup = StartupConfig::from(Cli::parse());
    let config = load_config(&startup)?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;
    info!(
        config = startup.config_path.as_deref().unwrap_or("<默认路径>"),
        consumer = %config.stream.consumer,
        node_id = config.worker.node_id,
        "启动Relay Worker"
    );

    let app = Application::new(config, Collaborators::default()).await?;
    let mut shutdown = ShutdownManager::new(app.config().worker.shutdown_timeout());
    app.start(&mut shutdown);

    let token = shutdown.token();
    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
        _ = token.cancelled() => {
            error!("后台组件异常退出，开始关闭");
        }
    }

    if shutdown.shutdown().await {
        info!("Relay Worker已优雅关闭");
    } else {
        warn!("Relay Worker关闭超时，部分组件被强制中止");
    }

    let snapshot = app.metrics().snapshot();
    info!(
        published = snapshot.messages_published,
        consumed = snapshot.messages_consumed,
        acked = snapshot.messages_acked,
        dead_lettered = snapshot.messages_dead_lettered,
        "Relay Worker已退出"
    );
    Ok(())
}
