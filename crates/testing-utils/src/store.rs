//! In-memory transactional store
//!
//! Transactions are serialized: `begin` takes an owned lock on the whole
//! state and works on a snapshot that is written back on commit. Dropping a
//! transaction without committing discards the snapshot, which mirrors a
//! PostgreSQL rollback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::{RelayError, RelayResult};
use relay_domain::{
    EventLog, EventLogStore, Integration, IntegrationStore, Issue, IssueStore, NewEventLog,
    PipelineRun, PipelineRunStore, ProcessingStatus, RunStatus, StoreTransaction,
    TransactionManager, WorkspaceEventLog, WorkspaceEventLogStore,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Snapshot of every table the engine touches
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub issues: BTreeMap<i64, Issue>,
    pub event_logs: BTreeMap<i64, EventLog>,
    pub pipeline_runs: BTreeMap<i64, PipelineRun>,
    pub workspace_event_logs: BTreeMap<i64, WorkspaceEventLog>,
}

/// Operations that can be made to fail on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    Begin,
    Commit,
    Upsert,
    QueueIfIdle,
    ClaimQueued,
    ListUnprocessed,
    MarkBatchProcessed,
    UpdateWorkspaceStatus,
}

type FailureTable = Arc<StdMutex<HashMap<FailurePoint, usize>>>;

fn take_failure(failures: &FailureTable, point: FailurePoint) -> RelayResult<()> {
    let mut table = failures.lock().unwrap();
    match table.get_mut(&point) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            Err(RelayError::DatabaseOperation(format!(
                "injected failure at {point:?}"
            )))
        }
        _ => Ok(()),
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    integrations: Arc<StdMutex<HashMap<i64, Integration>>>,
    failures: FailureTable,
    commits: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls at `point` fail with a database error
    pub fn fail_next(&self, point: FailurePoint, times: usize) {
        self.failures.lock().unwrap().insert(point, times);
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn insert_integration(&self, integration: Integration) {
        self.integrations
            .lock()
            .unwrap()
            .insert(integration.id, integration);
    }

    pub async fn insert_issue(&self, issue: Issue) {
        self.state.lock().await.issues.insert(issue.id, issue);
    }

    pub async fn insert_event_log(&self, event: EventLog) {
        self.state.lock().await.event_logs.insert(event.id, event);
    }

    pub async fn insert_workspace_event_log(&self, log: WorkspaceEventLog) {
        self.state
            .lock()
            .await
            .workspace_event_logs
            .insert(log.id, log);
    }

    pub async fn issue(&self, id: i64) -> Option<Issue> {
        self.state.lock().await.issues.get(&id).cloned()
    }

    pub async fn issue_count(&self) -> usize {
        self.state.lock().await.issues.len()
    }

    pub async fn event_logs_for(&self, issue_id: i64) -> Vec<EventLog> {
        let state = self.state.lock().await;
        let mut events: Vec<EventLog> = state
            .event_logs
            .values()
            .filter(|e| e.issue_id == issue_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.created_at, e.id));
        events
    }

    pub async fn pipeline_runs(&self) -> Vec<PipelineRun> {
        self.state
            .lock()
            .await
            .pipeline_runs
            .values()
            .cloned()
            .collect()
    }

    pub async fn workspace_event_log(&self, id: i64) -> Option<WorkspaceEventLog> {
        self.state
            .lock()
            .await
            .workspace_event_logs
            .get(&id)
            .cloned()
    }
}

#[async_trait]
impl TransactionManager for MemoryStore {
    async fn begin(&self) -> RelayResult<Box<dyn StoreTransaction>> {
        take_failure(&self.failures, FailurePoint::Begin)?;
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            failures: self.failures.clone(),
            commits: self.commits.clone(),
        }))
    }
}

#[async_trait]
impl IntegrationStore for MemoryStore {
    async fn get_by_id(&self, id: i64) -> RelayResult<Option<Integration>> {
        Ok(self.integrations.lock().unwrap().get(&id).cloned())
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<StoreState>,
    working: StoreState,
    failures: FailureTable,
    commits: Arc<AtomicUsize>,
}

impl MemoryTransaction {
    fn transition(
        &mut self,
        id: i64,
        from: ProcessingStatus,
        to: ProcessingStatus,
    ) -> Option<&mut Issue> {
        let issue = self.working.issues.get_mut(&id)?;
        if issue.processing_status != from {
            return None;
        }
        issue.processing_status = to;
        issue.updated_at = Utc::now();
        Some(issue)
    }
}

#[async_trait]
impl IssueStore for MemoryTransaction {
    async fn get_by_id(&mut self, id: i64) -> RelayResult<Option<Issue>> {
        Ok(self.working.issues.get(&id).cloned())
    }

    async fn get_by_integration_and_external_id(
        &mut self,
        integration_id: i64,
        external_issue_id: &str,
    ) -> RelayResult<Option<Issue>> {
        Ok(self
            .working
            .issues
            .values()
            .find(|i| {
                i.integration_id == integration_id && i.external_issue_id == external_issue_id
            })
            .cloned())
    }

    async fn upsert(&mut self, issue: &Issue) -> RelayResult<Issue> {
        take_failure(&self.failures, FailurePoint::Upsert)?;
        let now = Utc::now();
        let existing_id = self
            .working
            .issues
            .values()
            .find(|i| {
                i.integration_id == issue.integration_id
                    && i.external_issue_id == issue.external_issue_id
            })
            .map(|i| i.id);

        let stored = match existing_id.and_then(|id| self.working.issues.get_mut(&id)) {
            Some(existing) => {
                existing.external_project_id = issue.external_project_id.clone();
                existing.provider = issue.provider.clone();
                existing.title = issue.title.clone();
                existing.description = issue.description.clone();
                existing.labels = issue.labels.clone();
                existing.discussions = issue.discussions.clone();
                existing.metadata = issue.metadata.clone();
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let mut inserted = issue.clone();
                inserted.processing_status = ProcessingStatus::Idle;
                inserted.processing_started_at = None;
                inserted.created_at = now;
                inserted.updated_at = now;
                self.working.issues.insert(inserted.id, inserted.clone());
                inserted
            }
        };
        Ok(stored)
    }

    async fn queue_if_idle(&mut self, id: i64) -> RelayResult<bool> {
        take_failure(&self.failures, FailurePoint::QueueIfIdle)?;
        Ok(self
            .transition(id, ProcessingStatus::Idle, ProcessingStatus::Queued)
            .is_some())
    }

    async fn claim_queued(&mut self, id: i64) -> RelayResult<Option<Issue>> {
        take_failure(&self.failures, FailurePoint::ClaimQueued)?;
        Ok(self
            .transition(id, ProcessingStatus::Queued, ProcessingStatus::Processing)
            .map(|issue| {
                issue.processing_started_at = Some(Utc::now());
                issue.clone()
            }))
    }

    async fn release(&mut self, id: i64) -> RelayResult<bool> {
        Ok(self
            .transition(id, ProcessingStatus::Processing, ProcessingStatus::Idle)
            .map(|issue| {
                issue.processing_started_at = None;
                issue.last_processed_at = Some(Utc::now());
            })
            .is_some())
    }

    async fn requeue_processing(&mut self, id: i64) -> RelayResult<bool> {
        Ok(self
            .transition(id, ProcessingStatus::Processing, ProcessingStatus::Queued)
            .map(|issue| issue.processing_started_at = None)
            .is_some())
    }

    async fn reset_idle(&mut self, id: i64) -> RelayResult<()> {
        if let Some(issue) = self.working.issues.get_mut(&id) {
            issue.processing_status = ProcessingStatus::Idle;
            issue.processing_started_at = None;
            issue.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl EventLogStore for MemoryTransaction {
    async fn create_or_get(&mut self, new: &NewEventLog) -> RelayResult<(EventLog, bool)> {
        if let Some(existing) = self
            .working
            .event_logs
            .values()
            .find(|e| e.dedupe_key == new.dedupe_key)
        {
            return Ok((existing.clone(), false));
        }

        let event = EventLog {
            id: new.id,
            workspace_id: new.workspace_id,
            issue_id: new.issue_id,
            triggered_by_username: new.triggered_by_username.clone(),
            source: new.source.clone(),
            event_type: new.event_type.clone(),
            payload: new.payload.clone(),
            external_id: new.external_id.clone(),
            dedupe_key: new.dedupe_key.clone(),
            processed_at: None,
            processing_error: None,
            created_at: Utc::now(),
        };
        self.working.event_logs.insert(event.id, event.clone());
        Ok((event, true))
    }

    async fn list_unprocessed_by_issue(&mut self, issue_id: i64) -> RelayResult<Vec<EventLog>> {
        take_failure(&self.failures, FailurePoint::ListUnprocessed)?;
        let mut events: Vec<EventLog> = self
            .working
            .event_logs
            .values()
            .filter(|e| e.issue_id == issue_id && e.processed_at.is_none())
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.created_at, e.id));
        Ok(events)
    }

    async fn mark_batch_processed(&mut self, ids: &[i64], error: Option<&str>) -> RelayResult<()> {
        take_failure(&self.failures, FailurePoint::MarkBatchProcessed)?;
        let now = Utc::now();
        for id in ids {
            if let Some(event) = self.working.event_logs.get_mut(id) {
                event.processed_at = Some(now);
                event.processing_error = error.map(str::to_string);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineRunStore for MemoryTransaction {
    async fn create(&mut self, run: &PipelineRun) -> RelayResult<PipelineRun> {
        self.working.pipeline_runs.insert(run.id, run.clone());
        Ok(run.clone())
    }

    async fn finish(&mut self, id: i64, status: RunStatus, error: Option<&str>) -> RelayResult<()> {
        if let Some(run) = self.working.pipeline_runs.get_mut(&id) {
            run.status = status;
            run.error = error.map(str::to_string);
            run.finished_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl WorkspaceEventLogStore for MemoryTransaction {
    async fn get_by_id(&mut self, id: i64) -> RelayResult<Option<WorkspaceEventLog>> {
        Ok(self.working.workspace_event_logs.get(&id).cloned())
    }

    async fn update_status(
        &mut self,
        id: i64,
        status: RunStatus,
        error: Option<&str>,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> RelayResult<()> {
        take_failure(&self.failures, FailurePoint::UpdateWorkspaceStatus)?;
        if let Some(log) = self.working.workspace_event_logs.get_mut(&id) {
            log.status = status;
            log.error = error.map(str::to_string);
            if started_at.is_some() {
                log.started_at = started_at;
            }
            log.finished_at = finished_at;
            log.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    fn issues(&mut self) -> &mut dyn IssueStore {
        self
    }

    fn event_logs(&mut self) -> &mut dyn EventLogStore {
        self
    }

    fn pipeline_runs(&mut self) -> &mut dyn PipelineRunStore {
        self
    }

    fn workspace_event_logs(&mut self) -> &mut dyn WorkspaceEventLogStore {
        self
    }

    async fn commit(self: Box<Self>) -> RelayResult<()> {
        take_failure(&self.failures, FailurePoint::Commit)?;
        let MemoryTransaction {
            mut guard,
            working,
            commits,
            ..
        } = *self;
        *guard = working;
        commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RelayResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::IssueBuilder;

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let store = MemoryStore::new();
        store.insert_issue(IssueBuilder::new().with_id(1).build()).await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx.issues().queue_if_idle(1).await.unwrap());
        tx.rollback().await.unwrap();

        assert_eq!(
            store.issue(1).await.unwrap().processing_status,
            ProcessingStatus::Idle
        );
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        store.insert_issue(IssueBuilder::new().with_id(1).build()).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.issues().queue_if_idle(1).await.unwrap();
        }

        assert_eq!(
            store.issue(1).await.unwrap().processing_status,
            ProcessingStatus::Idle
        );
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_commit_failure() {
        let store = MemoryStore::new();
        store.insert_issue(IssueBuilder::new().with_id(1).build()).await;
        store.fail_next(FailurePoint::Commit, 1);

        let mut tx = store.begin().await.unwrap();
        tx.issues().queue_if_idle(1).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(
            store.issue(1).await.unwrap().processing_status,
            ProcessingStatus::Idle
        );
    }
}
