use std::future::Future;
use std::time::Duration;

use relay_core::RelayResult;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 优雅关闭管理器
///
/// 所有后台组件共享同一个取消令牌。任一组件异常退出时令牌被取消，
/// 其余组件随之停止，进程交由外部的进程管理器重启。
pub struct ShutdownManager {
    token: CancellationToken,
    tasks: JoinSet<()>,
    timeout: Duration,
}

impl ShutdownManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: JoinSet::new(),
            timeout,
        }
    }

    /// 共享的取消令牌
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// 启动一个后台组件，`start`接收取消令牌
    pub fn spawn<F, Fut>(&mut self, name: &'static str, start: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = RelayResult<()>> + Send + 'static,
    {
        let token = self.token.clone();
        let future = start(token.clone());
        self.tasks.spawn(async move {
            match future.await {
                Ok(()) => debug!(component = name, "component stopped"),
                Err(e) => {
                    error!(component = name, error = %e, "component failed, shutting down");
                    token.cancel();
                }
            }
        });
        debug!(component = name, "component started");
    }

    /// 触发关闭并在超时时间内等待所有组件退出
    ///
    /// 超时后剩余组件被强制中止，返回值表示是否在超时前全部退出。
    pub async fn shutdown(mut self) -> bool {
        info!(components = self.tasks.len(), "触发系统关闭");
        self.token.cancel();

        let tasks = &mut self.tasks;
        let drained = timeout(self.timeout, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        error!(error = %e, "component panicked");
                    }
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                info!("所有组件已停止");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.tasks.len(),
                    timeout_seconds = self.timeout.as_secs(),
                    "关闭超时，强制中止剩余组件"
                );
                self.tasks.abort_all();
                while self.tasks.join_next().await.is_some() {}
                false
            }
        }
    }
}
