use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use relay_core::{RelayError, RelayResult};
use relay_domain::{MessageConsumer, MessageProcessor, TaskKind, TaskMessage, TransactionManager};
use tracing::{error, info_span, warn, Instrument};

use crate::handler::IssueMessageHandler;
use crate::workspace_tasks::WorkspaceTaskRunner;

/// 按任务类型路由消息，并对失败执行重试/死信策略
///
/// Worker主循环与回收器共用同一个实例，回收的消息与新消息走完全相同的路径。
pub struct TaskDispatcher {
    issues: IssueMessageHandler,
    workspace: Option<WorkspaceTaskRunner>,
    consumer: Arc<dyn MessageConsumer>,
    transactions: Arc<dyn TransactionManager>,
    max_attempts: u32,
}

impl TaskDispatcher {
    pub fn new(
        issues: IssueMessageHandler,
        consumer: Arc<dyn MessageConsumer>,
        transactions: Arc<dyn TransactionManager>,
        max_attempts: u32,
    ) -> Self {
        Self {
            issues,
            workspace: None,
            consumer,
            transactions,
            max_attempts,
        }
    }

    pub fn with_workspace_tasks(mut self, runner: WorkspaceTaskRunner) -> Self {
        self.workspace = Some(runner);
        self
    }

    async fn route(&self, message: &TaskMessage) -> RelayResult<()> {
        match &message.kind {
            TaskKind::IssueEvent { .. } => self.issues.handle(message).await.map(|_| ()),
            TaskKind::WorkspaceSetup { .. } | TaskKind::RepoSync { .. } => match &self.workspace {
                Some(runner) => runner.handle(message).await,
                None => Err(RelayError::Configuration(format!(
                    "no executor registered for task type {}",
                    message.task_type()
                ))),
            },
        }
    }

    /// panic被转换为普通错误，单条消息不会让进程崩溃
    async fn route_guarded(&self, message: &TaskMessage) -> RelayResult<()> {
        match AssertUnwindSafe(self.route(message)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                counter!("relay_worker_panics_total").increment(1);
                error!(
                    panic = %reason,
                    backtrace = %Backtrace::force_capture(),
                    "recovered panic while processing message"
                );
                Err(RelayError::Panic(reason))
            }
        }
    }

    async fn handle_failure(&self, message: &TaskMessage, error: RelayError) -> RelayResult<()> {
        if error.is_infrastructure() {
            if message.deliveries > u64::from(self.max_attempts) {
                error!(
                    deliveries = message.deliveries,
                    error = %error,
                    "infrastructure failure persisted across deliveries, dead-lettering"
                );
                return self.dead_letter(message, &error).await;
            }
            warn!(
                deliveries = message.deliveries,
                error = %error,
                "infrastructure failure, leaving message pending for redelivery"
            );
            return Err(error);
        }

        if error.is_retryable() && message.attempt < self.max_attempts {
            // 处理器失败时这批事件已随事务标记为已处理，议题也已释放，
            // 重投通常认领落空后直接确认，不会重新处理失败的批次
            let batch_consumed = matches!(error, RelayError::Processor { .. });
            warn!(
                attempt = message.attempt,
                max_attempts = self.max_attempts,
                batch_consumed,
                error = %error,
                "processing failed, requeueing"
            );
            self.consumer.requeue(message, &error.to_string()).await
        } else {
            self.dead_letter(message, &error).await
        }
    }

    async fn dead_letter(&self, message: &TaskMessage, error: &RelayError) -> RelayResult<()> {
        // 处理器失败时议题已在提交的事务中释放
        if let Some(issue_id) = message.issue_id() {
            if !matches!(error, RelayError::Processor { .. }) {
                if let Err(e) = self.reset_issue(issue_id).await {
                    warn!(issue_id, error = %e, "failed to reset issue before dead-lettering");
                }
            }
        }
        self.consumer.send_dlq(message, &error.to_string()).await
    }

    async fn reset_issue(&self, issue_id: i64) -> RelayResult<()> {
        let mut tx = self.transactions.begin().await?;
        tx.issues().reset_idle(issue_id).await?;
        tx.commit().await
    }
}

#[async_trait]
impl MessageProcessor for TaskDispatcher {
    async fn process(&self, message: TaskMessage) -> RelayResult<()> {
        let span = info_span!(
            "process_message",
            message_id = %message.id,
            task_type = %message.task_type(),
            issue_id = ?message.issue_id(),
            event_log_id = ?message.event_log_id(),
            attempt = message.attempt,
            deliveries = message.deliveries,
            trace_id = message.trace_id.as_deref().unwrap_or_default(),
        );

        async move {
            match self.route_guarded(&message).await {
                Ok(()) => {
                    counter!("relay_worker_messages_processed_total").increment(1);
                    Ok(())
                }
                Err(e) => {
                    counter!("relay_worker_messages_failed_total").increment(1);
                    self.handle_failure(&message, e).await
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
