#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::RelayResult;
use relay_domain::{
    EventLog, EventLogStore, IdGenerator, IssueStore, MessageConsumer, NewEventLog,
    PipelineRunStore, StoreTransaction, TaskMessage, TransactionManager, WorkspaceEventLogStore,
};
use relay_testing_utils::{
    test_stream_config, EventLogBuilder, IssueBuilder, MemoryConsumer, MemoryStore, MemoryStream,
    MockIssueProcessor, MockWorkspaceTaskExecutor,
};
use relay_worker::{IssueMessageHandler, TaskDispatcher, WorkspaceTaskRunner};

pub const ISSUE_ID: i64 = 42;

/// Everything a worker test needs, wired against the in-memory doubles
pub struct Harness {
    pub store: MemoryStore,
    pub stream: MemoryStream,
    pub consumer: Arc<MemoryConsumer>,
    pub processor: MockIssueProcessor,
    pub executor: MockWorkspaceTaskExecutor,
}

impl Harness {
    pub fn new(processor: MockIssueProcessor) -> Self {
        let stream = MemoryStream::new(test_stream_config());
        let consumer = Arc::new(stream.consumer("test_worker"));
        Self {
            store: MemoryStore::new(),
            stream,
            consumer,
            processor,
            executor: MockWorkspaceTaskExecutor::new(),
        }
    }

    pub fn with_executor(mut self, executor: MockWorkspaceTaskExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn handler(&self, max_iterations: u32) -> IssueMessageHandler {
        self.handler_with(Arc::new(self.store.clone()), max_iterations)
    }

    pub fn handler_with(
        &self,
        transactions: Arc<dyn TransactionManager>,
        max_iterations: u32,
    ) -> IssueMessageHandler {
        IssueMessageHandler::new(
            transactions,
            Arc::new(self.processor.clone()),
            self.consumer.clone(),
            Arc::new(self.stream.clone()),
            Arc::new(IdGenerator::new()),
            max_iterations,
        )
    }

    pub fn dispatcher(&self) -> TaskDispatcher {
        let transactions: Arc<dyn TransactionManager> = Arc::new(self.store.clone());
        TaskDispatcher::new(
            self.handler(5),
            self.consumer.clone(),
            transactions.clone(),
            test_stream_config().max_attempts,
        )
        .with_workspace_tasks(WorkspaceTaskRunner::new(
            transactions,
            Arc::new(self.executor.clone()),
            self.consumer.clone(),
        ))
    }

    /// Issue 42 in `queued` with two unprocessed events, A before B
    pub async fn seed_queued_issue(&self) {
        self.store
            .insert_issue(IssueBuilder::new().with_id(ISSUE_ID).queued().build())
            .await;
        self.store
            .insert_event_log(
                EventLogBuilder::new(1, ISSUE_ID)
                    .with_created_at_offset(-10)
                    .build(),
            )
            .await;
        self.store
            .insert_event_log(
                EventLogBuilder::new(2, ISSUE_ID)
                    .with_created_at_offset(-5)
                    .build(),
            )
            .await;
    }

    /// Append `message` and read it back as a delivered, pending message
    pub async fn deliver(&self, message: TaskMessage) -> TaskMessage {
        use relay_domain::Producer;
        self.stream.enqueue(&message).await.unwrap();
        let mut batch = self.consumer.read().await.unwrap();
        assert_eq!(batch.len(), 1, "expected exactly one delivered message");
        batch.remove(0)
    }

    pub async fn unprocessed(&self) -> Vec<EventLog> {
        self.store
            .event_logs_for(ISSUE_ID)
            .await
            .into_iter()
            .filter(|e| !e.is_processed())
            .collect()
    }
}

/// Transaction manager that inserts `event` the `inject_on`-th time a
/// transaction lists unprocessed events, simulating an ingest that commits
/// while the worker is mid-transaction
pub struct InjectingTransactionManager {
    store: MemoryStore,
    event: NewEventLog,
    inject_on: usize,
    list_calls: Arc<AtomicUsize>,
}

impl InjectingTransactionManager {
    pub fn new(store: MemoryStore, event: NewEventLog, inject_on: usize) -> Self {
        Self {
            store,
            event,
            inject_on,
            list_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl TransactionManager for InjectingTransactionManager {
    async fn begin(&self) -> RelayResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(InjectingTransaction {
            inner: self.store.begin().await?,
            event: self.event.clone(),
            inject_on: self.inject_on,
            list_calls: self.list_calls.clone(),
        }))
    }
}

struct InjectingTransaction {
    inner: Box<dyn StoreTransaction>,
    event: NewEventLog,
    inject_on: usize,
    list_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl EventLogStore for InjectingTransaction {
    async fn create_or_get(&mut self, new: &NewEventLog) -> RelayResult<(EventLog, bool)> {
        self.inner.event_logs().create_or_get(new).await
    }

    async fn list_unprocessed_by_issue(&mut self, issue_id: i64) -> RelayResult<Vec<EventLog>> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.inject_on {
            let event = self.event.clone();
            self.inner.event_logs().create_or_get(&event).await?;
        }
        self.inner
            .event_logs()
            .list_unprocessed_by_issue(issue_id)
            .await
    }

    async fn mark_batch_processed(&mut self, ids: &[i64], error: Option<&str>) -> RelayResult<()> {
        self.inner.event_logs().mark_batch_processed(ids, error).await
    }
}

#[async_trait]
impl StoreTransaction for InjectingTransaction {
    fn issues(&mut self) -> &mut dyn IssueStore {
        self.inner.issues()
    }

    fn event_logs(&mut self) -> &mut dyn EventLogStore {
        self
    }

    fn pipeline_runs(&mut self) -> &mut dyn PipelineRunStore {
        self.inner.pipeline_runs()
    }

    fn workspace_event_logs(&mut self) -> &mut dyn WorkspaceEventLogStore {
        self.inner.workspace_event_logs()
    }

    async fn commit(self: Box<Self>) -> RelayResult<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> RelayResult<()> {
        self.inner.rollback().await
    }
}

/// Read whatever the stream currently holds for this consumer
pub async fn read_all(consumer: &MemoryConsumer) -> Vec<TaskMessage> {
    consumer.read().await.unwrap()
}
