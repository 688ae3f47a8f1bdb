use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay_core::{RelayError, RelayResult};
use relay_domain::{
    MessageConsumer, RunStatus, TaskKind, TaskMessage, TransactionManager, WorkspaceTaskExecutor,
};
use tracing::{info, warn};

/// 工作区任务执行器的状态跟踪层
///
/// `WorkspaceEventLog`的状态只在这里写入：执行前`running`，结束后为
/// `succeeded`、`succeeded_with_errors`或`failed`。每次状态写入是独立的短事务。
pub struct WorkspaceTaskRunner {
    transactions: Arc<dyn TransactionManager>,
    executor: Arc<dyn WorkspaceTaskExecutor>,
    consumer: Arc<dyn MessageConsumer>,
}

impl WorkspaceTaskRunner {
    pub fn new(
        transactions: Arc<dyn TransactionManager>,
        executor: Arc<dyn WorkspaceTaskExecutor>,
        consumer: Arc<dyn MessageConsumer>,
    ) -> Self {
        Self {
            transactions,
            executor,
            consumer,
        }
    }

    pub async fn handle(&self, message: &TaskMessage) -> RelayResult<()> {
        let run_id = match &message.kind {
            TaskKind::WorkspaceSetup { run_id } | TaskKind::RepoSync { run_id, .. } => *run_id,
            TaskKind::IssueEvent { .. } => {
                return Err(RelayError::Internal(format!(
                    "message {} is not a workspace task",
                    message.id
                )))
            }
        };

        self.mark_running(run_id).await?;

        match self.executor.execute(message).await {
            Ok(outcome) => {
                let (status, error) = if outcome.has_failures() {
                    (
                        RunStatus::SucceededWithErrors,
                        Some(outcome.failures.join("; ")),
                    )
                } else {
                    (RunStatus::Succeeded, None)
                };
                self.update_status(run_id, status, error.as_deref(), None, Some(Utc::now()))
                    .await?;
                if let Err(e) = self.consumer.ack(message).await {
                    warn!(message_id = %message.id, error = %e, "failed to acknowledge message");
                }
                info!(run_id, task_type = %message.task_type(), status = %status, "workspace task finished");
                Ok(())
            }
            Err(RelayError::TaskNotReady(reason)) => {
                info!(run_id, reason = %reason, "workspace task not ready, requeueing");
                self.update_status(run_id, RunStatus::Queued, None, None, None)
                    .await?;
                self.consumer
                    .requeue_with_attempt(message, message.attempt, &reason)
                    .await
            }
            Err(e) => {
                let reason = e.to_string();
                self.update_status(
                    run_id,
                    RunStatus::Failed,
                    Some(&reason),
                    None,
                    Some(Utc::now()),
                )
                .await?;
                Err(e)
            }
        }
    }

    async fn mark_running(&self, run_id: i64) -> RelayResult<()> {
        let mut tx = self.transactions.begin().await?;
        if tx.workspace_event_logs().get_by_id(run_id).await?.is_none() {
            return Err(RelayError::validation(format!(
                "workspace run {run_id} does not exist"
            )));
        }
        tx.workspace_event_logs()
            .update_status(run_id, RunStatus::Running, None, Some(Utc::now()), None)
            .await?;
        tx.commit().await
    }

    async fn update_status(
        &self,
        run_id: i64,
        status: RunStatus,
        error: Option<&str>,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> RelayResult<()> {
        let mut tx = self.transactions.begin().await?;
        tx.workspace_event_logs()
            .update_status(run_id, status, error, started_at, finished_at)
            .await?;
        tx.commit().await
    }
}
