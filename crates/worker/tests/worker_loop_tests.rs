mod support;

use std::sync::Arc;
use std::time::Duration;

use relay_domain::{MessageProcessor, ProcessingStatus, TaskMessage, Producer};
use relay_testing_utils::{
    test_reclaimer_config, wait_for, FailurePoint, MockIssueProcessor, ProcessorBehavior,
};
use relay_worker::{Reclaimer, Worker};
use support::{Harness, ISSUE_ID};
use tokio_util::sync::CancellationToken;

fn spawn_worker(h: &Harness, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    let processor: Arc<dyn MessageProcessor> = Arc::new(h.dispatcher());
    let worker = Worker::new(h.consumer.clone(), processor, Duration::from_millis(10));
    tokio::spawn(async move {
        worker.run(shutdown).await.unwrap();
    })
}

#[tokio::test]
async fn test_worker_drains_stream_until_cancelled() {
    let h = Harness::new(MockIssueProcessor::new());
    h.seed_queued_issue().await;
    h.stream
        .enqueue(&TaskMessage::issue_event(1, ISSUE_ID, "note_created"))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let handle = spawn_worker(&h, shutdown.clone());

    let store = h.store.clone();
    assert!(
        wait_for(
            || {
                let store = store.clone();
                async move {
                    store.issue(ISSUE_ID).await.map(|i| i.processing_status)
                        == Some(ProcessingStatus::Idle)
                }
            },
            Duration::from_secs(2),
        )
        .await
    );

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker stops promptly")
        .unwrap();
    assert!(h.stream.pending_ids().is_empty());
    assert_eq!(h.processor.call_count(), 1);
}

#[tokio::test]
async fn test_worker_survives_read_errors() {
    let h = Harness::new(MockIssueProcessor::new());
    h.seed_queued_issue().await;
    h.stream.fail_next_reads(3);
    h.stream
        .enqueue(&TaskMessage::issue_event(1, ISSUE_ID, "note_created"))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let handle = spawn_worker(&h, shutdown.clone());

    let processor = h.processor.clone();
    assert!(
        wait_for(
            || {
                let processor = processor.clone();
                async move { processor.call_count() == 1 }
            },
            Duration::from_secs(2),
        )
        .await
    );
    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_malformed_entry_is_dropped_and_loop_continues() {
    let h = Harness::new(MockIssueProcessor::new());
    h.seed_queued_issue().await;
    let malformed = h
        .stream
        .append_raw(&[("task_type", "issue_event"), ("event_log_id", "1")]);
    h.stream
        .enqueue(&TaskMessage::issue_event(1, ISSUE_ID, "note_created"))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let handle = spawn_worker(&h, shutdown.clone());

    let processor = h.processor.clone();
    assert!(
        wait_for(
            || {
                let processor = processor.clone();
                async move { processor.call_count() == 1 }
            },
            Duration::from_secs(2),
        )
        .await
    );
    shutdown.cancel();
    handle.await.unwrap();

    assert!(!h.stream.is_pending(&malformed));
    assert!(h.stream.acked_ids().contains(&malformed));
    assert!(h.stream.dlq_entries().is_empty());
}

#[tokio::test]
async fn test_failed_transaction_is_redelivered_by_reclaimer() {
    let h = Harness::new(MockIssueProcessor::new());
    h.seed_queued_issue().await;
    h.store.fail_next(FailurePoint::Commit, 1);
    let message = h
        .deliver(TaskMessage::issue_event(1, ISSUE_ID, "note_created"))
        .await;

    let processor: Arc<dyn MessageProcessor> = Arc::new(h.dispatcher());
    assert!(processor.process(message.clone()).await.is_err());
    assert!(h.stream.is_pending(&message.id));

    h.stream.age_pending(Duration::from_secs(600));
    let reclaimer = Reclaimer::new(
        Arc::new(h.stream.consumer("test_worker-reclaimer")),
        processor,
        test_reclaimer_config(),
    );
    let reclaimed = reclaimer
        .reclaim_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(reclaimed, 1);
    assert!(h.stream.pending_ids().is_empty());
    assert!(h.unprocessed().await.is_empty());
    assert_eq!(
        h.store.issue(ISSUE_ID).await.unwrap().processing_status,
        ProcessingStatus::Idle
    );
}

#[tokio::test]
async fn test_reclaimer_ignores_fresh_pending_entries() {
    let h = Harness::new(MockIssueProcessor::new());
    h.seed_queued_issue().await;
    let message = h
        .deliver(TaskMessage::issue_event(1, ISSUE_ID, "note_created"))
        .await;

    let reclaimer = Reclaimer::new(
        Arc::new(h.stream.consumer("test_worker-reclaimer")),
        Arc::new(h.dispatcher()),
        test_reclaimer_config(),
    );
    let reclaimed = reclaimer
        .reclaim_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(reclaimed, 0);
    assert!(h.stream.is_pending(&message.id));
    assert_eq!(h.processor.call_count(), 0);
}

#[tokio::test]
async fn test_reclaimed_and_live_delivery_race_processes_once() {
    let h = Harness::new(MockIssueProcessor::with_script(vec![
        ProcessorBehavior::Slow(Duration::from_millis(50)),
    ]));
    h.seed_queued_issue().await;
    let message = h
        .deliver(TaskMessage::issue_event(1, ISSUE_ID, "note_created"))
        .await;
    h.stream.age_pending(Duration::from_secs(600));

    let processor: Arc<dyn MessageProcessor> = Arc::new(h.dispatcher());
    let reclaimer = Reclaimer::new(
        Arc::new(h.stream.consumer("test_worker-reclaimer")),
        processor.clone(),
        test_reclaimer_config(),
    );

    let live = {
        let processor = processor.clone();
        let message = message.clone();
        tokio::spawn(async move { processor.process(message).await })
    };
    let reclaimed = reclaimer
        .reclaim_once(&CancellationToken::new())
        .await
        .unwrap();
    live.await.unwrap().unwrap();

    assert_eq!(reclaimed, 1);
    assert_eq!(h.processor.call_count(), 1);
    assert!(h.unprocessed().await.is_empty());
    assert!(h.stream.dlq_entries().is_empty());
}
