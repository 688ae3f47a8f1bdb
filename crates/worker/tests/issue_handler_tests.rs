mod support;

use std::sync::Arc;

use mockall::mock;
use relay_core::{RelayError, RelayResult};
use relay_domain::{MessageConsumer, 
    IssueReadiness, ProcessingStatus, Readiness, RunStatus, TaskMessage, TransactionManager,
};
use relay_testing_utils::{
    EventLogBuilder, FailurePoint, IssueBuilder, MockIssueProcessor, ProcessorBehavior,
    ProcessorCall,
};
use relay_worker::HandleOutcome;
use support::{Harness, InjectingTransactionManager, ISSUE_ID};

mock! {
    IssueGate {}

    #[async_trait::async_trait]
    impl IssueReadiness for IssueGate {
        async fn ensure_issue_ready(&self, issue_id: i64) -> RelayResult<Readiness>;
    }
}

#[tokio::test]
async fn test_claim_batches_all_unprocessed_events() {
    let h = Harness::new(MockIssueProcessor::new());
    h.seed_queued_issue().await;
    let message = h
        .deliver(TaskMessage::issue_event(1, ISSUE_ID, "note_created"))
        .await;

    let outcome = h.handler(5).handle(&message).await.unwrap();

    assert_eq!(
        outcome,
        HandleOutcome::Completed {
            passes: 1,
            follow_up: None
        }
    );
    assert_eq!(
        h.processor.calls(),
        vec![ProcessorCall {
            issue_id: ISSUE_ID,
            event_ids: vec![1, 2]
        }]
    );
    let issue = h.store.issue(ISSUE_ID).await.unwrap();
    assert_eq!(issue.processing_status, ProcessingStatus::Idle);
    assert!(issue.last_processed_at.is_some());
    assert_eq!(issue.metadata["processed_events"], 2);
    assert!(h.unprocessed().await.is_empty());
    assert!(!h.stream.is_pending(&message.id));

    let runs = h.store.pipeline_runs().await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Succeeded);
    assert_eq!(runs[0].event_log_id, 1);
}

#[tokio::test]
async fn test_claim_miss_is_acknowledged_without_processing() {
    let h = Harness::new(MockIssueProcessor::new());
    h.store
        .insert_issue(IssueBuilder::new().with_id(ISSUE_ID).build())
        .await;
    let message = h
        .deliver(TaskMessage::issue_event(1, ISSUE_ID, "note_created"))
        .await;

    let outcome = h.handler(5).handle(&message).await.unwrap();

    assert_eq!(outcome, HandleOutcome::ClaimMiss);
    assert_eq!(h.processor.call_count(), 0);
    assert!(!h.stream.is_pending(&message.id));
    assert_eq!(
        h.store.issue(ISSUE_ID).await.unwrap().processing_status,
        ProcessingStatus::Idle
    );
}

#[tokio::test]
async fn test_processor_failure_still_releases_issue() {
    let h = Harness::new(MockIssueProcessor::with_script(vec![
        ProcessorBehavior::Fail {
            message: "llm timeout".to_string(),
            retryable: true,
        },
    ]));
    h.seed_queued_issue().await;
    let message = h
        .deliver(TaskMessage::issue_event(1, ISSUE_ID, "note_created"))
        .await;

    let err = h.handler(5).handle(&message).await.unwrap_err();

    assert!(matches!(err, RelayError::Processor { retryable: true, .. }));
    assert_eq!(
        h.store.issue(ISSUE_ID).await.unwrap().processing_status,
        ProcessingStatus::Idle
    );
    let events = h.store.event_logs_for(ISSUE_ID).await;
    assert!(events.iter().all(|e| e.is_processed()));
    assert!(events
        .iter()
        .all(|e| e.processing_error.as_deref() == Some("议题处理失败: llm timeout")));
    // 失败留给消息级别的策略处理
    assert!(h.stream.is_pending(&message.id));
    assert_eq!(h.store.pipeline_runs().await[0].status, RunStatus::Failed);
}

#[tokio::test]
async fn test_events_arriving_mid_transaction_are_processed_in_another_pass() {
    let h = Harness::new(MockIssueProcessor::new());
    h.seed_queued_issue().await;
    let late = EventLogBuilder::new(3, ISSUE_ID).build_new();
    let transactions = Arc::new(InjectingTransactionManager::new(h.store.clone(), late, 2));
    let message = h
        .deliver(TaskMessage::issue_event(1, ISSUE_ID, "note_created"))
        .await;

    let outcome = h
        .handler_with(transactions, 5)
        .handle(&message)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        HandleOutcome::Completed {
            passes: 2,
            follow_up: None
        }
    );
    let calls = h.processor.calls();
    assert_eq!(calls[0].event_ids, vec![1, 2]);
    assert_eq!(calls[1].event_ids, vec![3]);
    assert!(h.unprocessed().await.is_empty());
    assert_eq!(
        h.store.issue(ISSUE_ID).await.unwrap().processing_status,
        ProcessingStatus::Idle
    );
    assert_eq!(h.store.pipeline_runs().await.len(), 2);
}

#[tokio::test]
async fn test_remaining_events_after_last_pass_requeue_the_issue() {
    let h = Harness::new(MockIssueProcessor::new());
    h.seed_queued_issue().await;
    let late = EventLogBuilder::new(3, ISSUE_ID)
        .with_event_type("issue_updated")
        .build_new();
    let transactions = Arc::new(InjectingTransactionManager::new(h.store.clone(), late, 2));
    let message = h
        .deliver(
            TaskMessage::issue_event(1, ISSUE_ID, "note_created")
                .with_trace_id(Some("trace-7".to_string()))
                .with_workspace(100, 10),
        )
        .await;

    let outcome = h
        .handler_with(transactions, 1)
        .handle(&message)
        .await
        .unwrap();

    let HandleOutcome::Completed { passes, follow_up } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(passes, 1);
    let follow_up_id = follow_up.expect("follow-up message enqueued");

    assert_eq!(
        h.store.issue(ISSUE_ID).await.unwrap().processing_status,
        ProcessingStatus::Queued
    );
    assert!(!h.stream.is_pending(&message.id));

    let published = h.stream.published();
    let next = published
        .iter()
        .find(|m| m.id == follow_up_id)
        .expect("follow-up in stream");
    assert_eq!(next.event_log_id(), Some(3));
    assert_eq!(next.issue_id(), Some(ISSUE_ID));
    assert_eq!(next.trace_id.as_deref(), Some("trace-7"));
    assert_eq!(next.workspace_id, Some(10));
    assert_eq!(next.attempt, 1);

    // 补发的消息能把剩余事件处理完
    let redelivered = h.consumer.read().await.unwrap().remove(0);
    h.handler(1).handle(&redelivered).await.unwrap();
    assert!(h.unprocessed().await.is_empty());
    assert_eq!(
        h.store.issue(ISSUE_ID).await.unwrap().processing_status,
        ProcessingStatus::Idle
    );
}

#[tokio::test]
async fn test_not_ready_issue_is_requeued_with_same_attempt() {
    let h = Harness::new(MockIssueProcessor::new());
    h.seed_queued_issue().await;
    let mut readiness = MockIssueGate::new();
    readiness
        .expect_ensure_issue_ready()
        .withf(|id| *id == ISSUE_ID)
        .times(1)
        .returning(|_| Ok(Readiness::NotReady("repository still cloning".to_string())));

    let message = h
        .deliver(TaskMessage::issue_event(1, ISSUE_ID, "note_created").with_attempt(2))
        .await;
    let outcome = h
        .handler(5)
        .with_readiness(Arc::new(readiness))
        .handle(&message)
        .await
        .unwrap();

    assert_eq!(outcome, HandleOutcome::NotReady);
    assert_eq!(h.processor.call_count(), 0);
    assert!(!h.stream.is_pending(&message.id));

    let requeued = h.consumer.read().await.unwrap().remove(0);
    assert_eq!(requeued.attempt, 2);
    assert_eq!(
        requeued.last_error.as_deref(),
        Some("repository still cloning")
    );
    assert_eq!(
        h.store.issue(ISSUE_ID).await.unwrap().processing_status,
        ProcessingStatus::Queued
    );
}

#[tokio::test]
async fn test_store_failure_rolls_back_and_leaves_message_pending() {
    let h = Harness::new(MockIssueProcessor::new());
    h.seed_queued_issue().await;
    h.store.fail_next(FailurePoint::MarkBatchProcessed, 1);
    let message = h
        .deliver(TaskMessage::issue_event(1, ISSUE_ID, "note_created"))
        .await;

    let err = h.handler(5).handle(&message).await.unwrap_err();

    assert!(err.is_infrastructure());
    assert!(h.stream.is_pending(&message.id));
    assert_eq!(
        h.store.issue(ISSUE_ID).await.unwrap().processing_status,
        ProcessingStatus::Queued
    );
    assert_eq!(h.unprocessed().await.len(), 2);
    assert!(h.store.pipeline_runs().await.is_empty());
}

#[tokio::test]
async fn test_failed_not_ready_requeue_keeps_message_pending() {
    let h = Harness::new(MockIssueProcessor::new());
    h.seed_queued_issue().await;
    let mut readiness = MockIssueGate::new();
    readiness
        .expect_ensure_issue_ready()
        .returning(|_| Ok(Readiness::NotReady("repository still cloning".to_string())));

    let message = h
        .deliver(TaskMessage::issue_event(1, ISSUE_ID, "note_created"))
        .await;
    h.stream.fail_next_appends(1);
    let result = h
        .handler(5)
        .with_readiness(Arc::new(readiness))
        .handle(&message)
        .await;

    assert!(matches!(result, Err(RelayError::MessageQueue(_))));
    // 原条目仍待处理，回收器会重新投递，议题保持queued
    assert!(h.stream.is_pending(&message.id));
    assert_eq!(h.stream.entries().len(), 1);
    assert_eq!(
        h.store.issue(ISSUE_ID).await.unwrap().processing_status,
        ProcessingStatus::Queued
    );
}

#[tokio::test]
async fn test_only_one_concurrent_claim_succeeds() {
    let h = Harness::new(MockIssueProcessor::new());
    h.store
        .insert_issue(IssueBuilder::new().with_id(ISSUE_ID).queued().build())
        .await;

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let store = h.store.clone();
        tasks.push(tokio::spawn(async move {
            let mut tx = store.begin().await.unwrap();
            let claimed = tx.issues().claim_queued(ISSUE_ID).await.unwrap();
            tx.commit().await.unwrap();
            claimed.is_some()
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(
        h.store.issue(ISSUE_ID).await.unwrap().processing_status,
        ProcessingStatus::Processing
    );
}
