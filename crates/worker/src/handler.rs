use std::sync::Arc;

use chrono::Utc;
use relay_core::{RelayError, RelayResult};
use relay_domain::{
    EventLog, IdGenerator, Issue, IssueProcessor, IssueReadiness, MessageConsumer, PipelineRun,
    Producer, Readiness, RunStatus, StoreTransaction, TaskKind, TaskMessage, TransactionManager,
};
use tracing::{debug, error, info, warn};

/// 一条议题消息的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// 议题被认领并处理，`follow_up`为事件未处理完时补发的消息ID
    Completed {
        passes: u32,
        follow_up: Option<String>,
    },
    /// 议题不处于queued，消息被确认丢弃
    ClaimMiss,
    /// 议题尚未就绪，消息以相同的尝试次数重新入队
    NotReady,
}

/// 事务内一轮处理之后的状态
struct PassResult {
    issue: Issue,
    failure: Option<RelayError>,
}

/// 议题消息的认领-处理-完成处理器
///
/// 每条消息对应一个数据库事务：
/// 1. `queued → processing`条件更新，失败即视为重复投递
/// 2. 加载议题下所有未处理事件并交给[`IssueProcessor`]
/// 3. 写回议题快照、标记事件已处理，处理期间新到的事件在同一事务内继续处理
/// 4. 没有剩余事件时`processing → idle`，否则`processing → queued`并在提交后补发消息
///
/// 事务提交之后才确认原消息。事务失败时消息保持未确认，等待重新投递。
pub struct IssueMessageHandler {
    transactions: Arc<dyn TransactionManager>,
    processor: Arc<dyn IssueProcessor>,
    consumer: Arc<dyn MessageConsumer>,
    producer: Arc<dyn Producer>,
    readiness: Option<Arc<dyn IssueReadiness>>,
    ids: Arc<IdGenerator>,
    max_iterations: u32,
}

impl IssueMessageHandler {
    pub fn new(
        transactions: Arc<dyn TransactionManager>,
        processor: Arc<dyn IssueProcessor>,
        consumer: Arc<dyn MessageConsumer>,
        producer: Arc<dyn Producer>,
        ids: Arc<IdGenerator>,
        max_iterations: u32,
    ) -> Self {
        Self {
            transactions,
            processor,
            consumer,
            producer,
            readiness: None,
            ids,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn with_readiness(mut self, readiness: Arc<dyn IssueReadiness>) -> Self {
        self.readiness = Some(readiness);
        self
    }

    pub async fn handle(&self, message: &TaskMessage) -> RelayResult<HandleOutcome> {
        let TaskKind::IssueEvent { issue_id, .. } = &message.kind else {
            return Err(RelayError::Internal(format!(
                "message {} is not an issue event",
                message.id
            )));
        };
        let issue_id = *issue_id;

        if let Some(readiness) = &self.readiness {
            if let Readiness::NotReady(reason) = readiness.ensure_issue_ready(issue_id).await? {
                info!(issue_id, reason = %reason, "issue not ready, requeueing without consuming an attempt");
                self.consumer
                    .requeue_with_attempt(message, message.attempt, &reason)
                    .await?;
                return Ok(HandleOutcome::NotReady);
            }
        }

        let mut tx = self.transactions.begin().await?;

        let Some(issue) = tx.issues().claim_queued(issue_id).await? else {
            tx.commit().await?;
            info!(issue_id, "issue not claimable, discarding duplicate delivery");
            self.ack(message).await;
            return Ok(HandleOutcome::ClaimMiss);
        };
        debug!(issue_id, "issue claimed");

        let mut issue = issue;
        let mut passes = 0;
        let mut failure = None;
        let mut events = tx.event_logs().list_unprocessed_by_issue(issue_id).await?;

        while !events.is_empty() && passes < self.max_iterations {
            passes += 1;
            let result = self
                .run_pass(tx.as_mut(), issue, &events, message.attempt)
                .await?;
            issue = result.issue;
            events = tx.event_logs().list_unprocessed_by_issue(issue_id).await?;

            if let Some(e) = result.failure {
                failure = Some(e);
                break;
            }
            if !events.is_empty() {
                debug!(issue_id, pass = passes, remaining = events.len(), "new events arrived during processing");
            }
        }

        let follow_up = match events.first() {
            None => {
                tx.issues().release(issue_id).await?;
                None
            }
            Some(next) => {
                tx.issues().requeue_processing(issue_id).await?;
                Some(next.clone())
            }
        };

        tx.commit().await?;

        let follow_up_id = match follow_up {
            Some(next) => Some(self.enqueue_follow_up(message, &next).await?),
            None => None,
        };

        if let Some(e) = failure {
            // 事件已标记为已处理，失败交由消息级别的重试/死信策略
            return Err(e);
        }

        self.ack(message).await;
        info!(issue_id, passes, requeued = follow_up_id.is_some(), "issue processed");
        Ok(HandleOutcome::Completed {
            passes,
            follow_up: follow_up_id,
        })
    }

    async fn run_pass(
        &self,
        tx: &mut dyn StoreTransaction,
        issue: Issue,
        events: &[EventLog],
        attempt: u32,
    ) -> RelayResult<PassResult> {
        let event_ids: Vec<i64> = events.iter().map(|e| e.id).collect();
        let run = tx
            .pipeline_runs()
            .create(&PipelineRun {
                id: self.ids.next_id(),
                event_log_id: event_ids[0],
                attempt: attempt as i32,
                status: RunStatus::Running,
                error: None,
                started_at: Utc::now(),
                finished_at: None,
            })
            .await?;

        match self.processor.process(&issue, events).await {
            Ok(updated) => {
                let issue = match updated {
                    Some(updated) => tx.issues().upsert(&updated).await?,
                    None => issue,
                };
                tx.event_logs().mark_batch_processed(&event_ids, None).await?;
                tx.pipeline_runs()
                    .finish(run.id, RunStatus::Succeeded, None)
                    .await?;
                Ok(PassResult {
                    issue,
                    failure: None,
                })
            }
            Err(e) => {
                let failure = into_processor_error(e);
                let reason = failure.to_string();
                error!(issue_id = issue.id, events = event_ids.len(), error = %reason, "issue processor failed");
                tx.event_logs()
                    .mark_batch_processed(&event_ids, Some(&reason))
                    .await?;
                tx.pipeline_runs()
                    .finish(run.id, RunStatus::Failed, Some(&reason))
                    .await?;
                Ok(PassResult {
                    issue,
                    failure: Some(failure),
                })
            }
        }
    }

    async fn enqueue_follow_up(&self, origin: &TaskMessage, next: &EventLog) -> RelayResult<String> {
        let mut follow_up = TaskMessage::issue_event(next.id, next.issue_id, next.event_type.clone())
            .with_trace_id(origin.trace_id.clone())
            .with_trigger_thread_id(origin.trigger_thread_id.clone());
        if let (Some(org), Some(ws)) = (origin.organization_id, origin.workspace_id) {
            follow_up = follow_up.with_workspace(org, ws);
        }
        let id = self.producer.enqueue(&follow_up).await?;
        info!(issue_id = next.issue_id, event_log_id = next.id, follow_up_id = %id, "enqueued follow-up message for remaining events");
        Ok(id)
    }

    async fn ack(&self, message: &TaskMessage) {
        if let Err(e) = self.consumer.ack(message).await {
            warn!(message_id = %message.id, error = %e, "failed to acknowledge message");
        }
    }
}

/// 处理器返回的任何错误都按处理器失败对待，保留其可重试标记
fn into_processor_error(error: RelayError) -> RelayError {
    match error {
        RelayError::Processor { .. } => error,
        other => RelayError::Processor {
            retryable: other.is_retryable(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processor_errors_keep_their_classification() {
        let wrapped = into_processor_error(RelayError::validation("bad body"));
        assert!(matches!(wrapped, RelayError::Processor { retryable: false, .. }));

        let wrapped = into_processor_error(RelayError::Internal("llm 503".into()));
        assert!(matches!(wrapped, RelayError::Processor { retryable: true, .. }));
        assert!(!wrapped.is_infrastructure());

        let original = RelayError::terminal_processor("rejected");
        assert!(matches!(
            into_processor_error(original),
            RelayError::Processor { retryable: false, .. }
        ));
    }
}
