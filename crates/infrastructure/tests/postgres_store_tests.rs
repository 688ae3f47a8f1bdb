use anyhow::Result;
use relay_core::RelayError;
use relay_domain::{IntegrationStore, ProcessingStatus, RunStatus, TransactionManager};
use relay_infrastructure::{PgIntegrationStore, PgTransactionManager};
use relay_testing_utils::{
    DatabaseTestContainer, EventLogBuilder, IntegrationBuilder, IssueBuilder,
};
use std::time::Duration;

#[tokio::test]
#[ignore] // 需要Docker
async fn test_issue_status_transitions_are_conditional() -> Result<()> {
    let db = DatabaseTestContainer::new().await?;
    db.insert_integration(&IntegrationBuilder::new().build())
        .await?;
    let manager = PgTransactionManager::new(db.pool.clone());

    let mut tx = manager.begin().await?;
    let stored = tx.issues().upsert(&IssueBuilder::new().build()).await?;
    assert_eq!(stored.processing_status, ProcessingStatus::Idle);

    assert!(tx.issues().queue_if_idle(42).await?);
    assert!(!tx.issues().queue_if_idle(42).await?);

    let claimed = tx.issues().claim_queued(42).await?;
    assert_eq!(
        claimed.map(|i| i.processing_status),
        Some(ProcessingStatus::Processing)
    );
    assert!(tx.issues().claim_queued(42).await?.is_none());

    assert!(tx.issues().requeue_processing(42).await?);
    assert!(!tx.issues().release(42).await?);
    tx.issues().claim_queued(42).await?;
    assert!(tx.issues().release(42).await?);
    tx.commit().await?;

    let mut tx = manager.begin().await?;
    let issue = tx.issues().get_by_id(42).await?.expect("issue exists");
    assert_eq!(issue.processing_status, ProcessingStatus::Idle);
    assert!(issue.last_processed_at.is_some());
    tx.rollback().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_concurrent_claims_on_queued_issue_have_one_winner() -> Result<()> {
    let db = DatabaseTestContainer::new().await?;
    db.insert_integration(&IntegrationBuilder::new().build())
        .await?;
    let manager = PgTransactionManager::new(db.pool.clone());

    let mut tx = manager.begin().await?;
    tx.issues().upsert(&IssueBuilder::new().build()).await?;
    assert!(tx.issues().queue_if_idle(42).await?);
    tx.commit().await?;

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move {
                let mut tx = manager.begin().await?;
                let claimed = tx.issues().claim_queued(42).await?;
                // 持有行锁片刻，其余认领者在锁上排队后重新判断条件
                tokio::time::sleep(Duration::from_millis(50)).await;
                tx.commit().await?;
                Ok::<_, RelayError>(claimed.is_some())
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await?? {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let mut tx = manager.begin().await?;
    let issue = tx.issues().get_by_id(42).await?.expect("issue exists");
    assert_eq!(issue.processing_status, ProcessingStatus::Processing);
    tx.rollback().await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_upsert_keeps_processing_status() -> Result<()> {
    let db = DatabaseTestContainer::new().await?;
    db.insert_integration(&IntegrationBuilder::new().build())
        .await?;
    let manager = PgTransactionManager::new(db.pool.clone());

    let mut tx = manager.begin().await?;
    tx.issues().upsert(&IssueBuilder::new().build()).await?;
    tx.issues().queue_if_idle(42).await?;
    // 同一外部议题以不同ID再次写入，命中唯一约束走更新
    let refreshed = tx
        .issues()
        .upsert(&IssueBuilder::new().with_id(99).with_title("Renamed").build())
        .await?;
    tx.commit().await?;

    assert_eq!(refreshed.id, 42);
    assert_eq!(refreshed.title.as_deref(), Some("Renamed"));
    assert_eq!(refreshed.processing_status, ProcessingStatus::Queued);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_create_or_get_deduplicates_by_key() -> Result<()> {
    let db = DatabaseTestContainer::new().await?;
    db.insert_integration(&IntegrationBuilder::new().build())
        .await?;
    let manager = PgTransactionManager::new(db.pool.clone());

    let mut tx = manager.begin().await?;
    tx.issues().upsert(&IssueBuilder::new().build()).await?;

    let first = EventLogBuilder::new(1, 42).build_new();
    let (created, was_created) = tx.event_logs().create_or_get(&first).await?;
    assert!(was_created);
    assert_eq!(created.id, 1);

    let mut duplicate = EventLogBuilder::new(2, 42).build_new();
    duplicate.dedupe_key = first.dedupe_key.clone();
    let (existing, was_created) = tx.event_logs().create_or_get(&duplicate).await?;
    assert!(!was_created);
    assert_eq!(existing.id, 1);
    tx.commit().await?;

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_logs")
        .fetch_one(&db.pool)
        .await?;
    assert_eq!(count, 1);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_unprocessed_events_are_ordered_and_marked() -> Result<()> {
    let db = DatabaseTestContainer::new().await?;
    db.insert_integration(&IntegrationBuilder::new().build())
        .await?;
    let manager = PgTransactionManager::new(db.pool.clone());

    let mut tx = manager.begin().await?;
    tx.issues().upsert(&IssueBuilder::new().build()).await?;
    for id in [3, 1, 2] {
        tx.event_logs()
            .create_or_get(&EventLogBuilder::new(id, 42).build_new())
            .await?;
    }
    tx.commit().await?;

    let mut tx = manager.begin().await?;
    let pending = tx.event_logs().list_unprocessed_by_issue(42).await?;
    // 同一事务写入的created_at相同，按ID排序
    assert_eq!(pending.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2, 3]);

    tx.event_logs()
        .mark_batch_processed(&[1, 2], Some("partial"))
        .await?;
    let remaining = tx.event_logs().list_unprocessed_by_issue(42).await?;
    assert_eq!(remaining.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3]);
    tx.commit().await?;

    let error: Option<String> =
        sqlx::query_scalar("SELECT processing_error FROM event_logs WHERE id = 1")
            .fetch_one(&db.pool)
            .await?;
    assert_eq!(error.as_deref(), Some("partial"));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_rollback_discards_writes() -> Result<()> {
    let db = DatabaseTestContainer::new().await?;
    db.insert_integration(&IntegrationBuilder::new().build())
        .await?;
    let manager = PgTransactionManager::new(db.pool.clone());

    let mut tx = manager.begin().await?;
    tx.issues().upsert(&IssueBuilder::new().build()).await?;
    tx.rollback().await?;

    {
        let mut dropped = manager.begin().await?;
        dropped.issues().upsert(&IssueBuilder::new().build()).await?;
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM issues")
        .fetch_one(&db.pool)
        .await?;
    assert_eq!(count, 0);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_workspace_status_update_keeps_started_at() -> Result<()> {
    let db = DatabaseTestContainer::new().await?;
    sqlx::query(
        "INSERT INTO workspace_event_logs (id, workspace_id, organization_id, event_type) VALUES (7, 10, 100, 'workspace_setup')",
    )
    .execute(&db.pool)
    .await?;
    let manager = PgTransactionManager::new(db.pool.clone());

    let started = chrono::Utc::now();
    let mut tx = manager.begin().await?;
    tx.workspace_event_logs()
        .update_status(7, RunStatus::Running, None, Some(started), None)
        .await?;
    tx.workspace_event_logs()
        .update_status(7, RunStatus::Failed, Some("clone failed"), None, Some(chrono::Utc::now()))
        .await?;
    let log = tx
        .workspace_event_logs()
        .get_by_id(7)
        .await?
        .expect("run exists");
    tx.commit().await?;

    assert_eq!(log.status, RunStatus::Failed);
    assert_eq!(log.error.as_deref(), Some("clone failed"));
    assert!(log.started_at.is_some());
    assert!(log.finished_at.is_some());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_integration_lookup() -> Result<()> {
    let db = DatabaseTestContainer::new().await?;
    db.insert_integration(&IntegrationBuilder::new().with_id(5).build())
        .await?;
    let store = PgIntegrationStore::new(db.pool.clone());

    let integration = store.get_by_id(5).await?.expect("integration exists");
    assert!(integration.is_enabled);
    assert_eq!(integration.bot_username.as_deref(), Some("relay-bot"));
    assert!(store.get_by_id(6).await?.is_none());
    Ok(())
}
