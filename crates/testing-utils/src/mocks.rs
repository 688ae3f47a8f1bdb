//! Mock implementations of the external collaborator traits
//!
//! Each mock records the calls it receives and replays a scripted sequence
//! of behaviors, falling back to a default once the script runs out.

use async_trait::async_trait;
use relay_core::{RelayError, RelayResult};
use relay_domain::{
    AddReactionParams, EngagementDetector, EngagementRequest, EngagementResult, EventLog,
    FetchIssueParams, Issue, IssueProcessor, IssueTracker, TaskMessage, TaskOutcome,
    WorkspaceTaskExecutor,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the mock processor does on one call
#[derive(Debug, Clone)]
pub enum ProcessorBehavior {
    /// Return the issue with `metadata.processed_events` set
    Succeed,
    /// Return `None`, leaving the issue untouched
    SucceedUnchanged,
    Fail { message: String, retryable: bool },
    Panic(String),
    /// Sleep before succeeding
    Slow(Duration),
}

/// One recorded processor invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorCall {
    pub issue_id: i64,
    pub event_ids: Vec<i64>,
}

#[derive(Clone, Default)]
pub struct MockIssueProcessor {
    script: Arc<Mutex<VecDeque<ProcessorBehavior>>>,
    calls: Arc<Mutex<Vec<ProcessorCall>>>,
}

impl MockIssueProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(behaviors: Vec<ProcessorBehavior>) -> Self {
        let mock = Self::new();
        mock.script.lock().unwrap().extend(behaviors);
        mock
    }

    pub fn push(&self, behavior: ProcessorBehavior) {
        self.script.lock().unwrap().push_back(behavior);
    }

    pub fn calls(&self) -> Vec<ProcessorCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl IssueProcessor for MockIssueProcessor {
    async fn process(&self, issue: &Issue, events: &[EventLog]) -> RelayResult<Option<Issue>> {
        self.calls.lock().unwrap().push(ProcessorCall {
            issue_id: issue.id,
            event_ids: events.iter().map(|e| e.id).collect(),
        });

        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ProcessorBehavior::Succeed);

        match behavior {
            ProcessorBehavior::Succeed => {
                let mut updated = issue.clone();
                updated.metadata = serde_json::json!({ "processed_events": events.len() });
                Ok(Some(updated))
            }
            ProcessorBehavior::SucceedUnchanged => Ok(None),
            ProcessorBehavior::Fail { message, retryable } => Err(RelayError::Processor {
                message,
                retryable,
            }),
            ProcessorBehavior::Panic(message) => panic!("{message}"),
            ProcessorBehavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(None)
            }
        }
    }
}

/// Engagement detector with fixed answers
#[derive(Clone)]
pub struct MockEngagementDetector {
    engage: Arc<Mutex<bool>>,
    self_triggered: Arc<Mutex<Result<bool, String>>>,
    discussions: serde_json::Value,
    requests: Arc<Mutex<Vec<EngagementRequest>>>,
}

impl MockEngagementDetector {
    pub fn engaging() -> Self {
        Self {
            engage: Arc::new(Mutex::new(true)),
            self_triggered: Arc::new(Mutex::new(Ok(false))),
            discussions: serde_json::json!([{ "id": "d1", "notes": [] }]),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn ignoring() -> Self {
        let mock = Self::engaging();
        *mock.engage.lock().unwrap() = false;
        mock
    }

    pub fn set_self_triggered(&self, result: Result<bool, String>) {
        *self.self_triggered.lock().unwrap() = result;
    }

    pub fn requests(&self) -> Vec<EngagementRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngagementDetector for MockEngagementDetector {
    async fn should_engage(
        &self,
        _integration_id: i64,
        request: &EngagementRequest,
    ) -> RelayResult<EngagementResult> {
        self.requests.lock().unwrap().push(request.clone());
        let should_engage = *self.engage.lock().unwrap();
        Ok(EngagementResult {
            should_engage,
            discussions: if should_engage {
                self.discussions.clone()
            } else {
                serde_json::Value::Null
            },
        })
    }

    async fn is_self_triggered(&self, _integration_id: i64, _username: &str) -> RelayResult<bool> {
        self.self_triggered
            .lock()
            .unwrap()
            .clone()
            .map_err(RelayError::Internal)
    }
}

/// Issue tracker returning synthetic issues
#[derive(Clone, Default)]
pub struct MockIssueTracker {
    fetches: Arc<Mutex<Vec<FetchIssueParams>>>,
    reactions: Arc<Mutex<Vec<AddReactionParams>>>,
    fail_fetch: Arc<Mutex<bool>>,
    fail_reactions: Arc<Mutex<bool>>,
}

impl MockIssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_fetch(&self) {
        *self.fail_fetch.lock().unwrap() = true;
    }

    pub fn fail_reactions(&self) {
        *self.fail_reactions.lock().unwrap() = true;
    }

    pub fn fetches(&self) -> Vec<FetchIssueParams> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn reactions(&self) -> Vec<AddReactionParams> {
        self.reactions.lock().unwrap().clone()
    }
}

#[async_trait]
impl IssueTracker for MockIssueTracker {
    async fn fetch_issue(&self, params: &FetchIssueParams) -> RelayResult<Issue> {
        self.fetches.lock().unwrap().push(params.clone());
        if *self.fail_fetch.lock().unwrap() {
            return Err(RelayError::Internal("provider unavailable".to_string()));
        }
        // identity fields are stamped by the caller
        let mut issue = Issue::new(0, 0, "");
        issue.title = Some(format!("Issue #{}", params.issue_iid));
        issue.description = Some("fetched from provider".to_string());
        issue.labels = vec!["bug".to_string()];
        Ok(issue)
    }

    async fn add_reaction(&self, params: &AddReactionParams) -> RelayResult<()> {
        self.reactions.lock().unwrap().push(params.clone());
        if *self.fail_reactions.lock().unwrap() {
            return Err(RelayError::Internal("reaction rejected".to_string()));
        }
        Ok(())
    }
}

/// What the mock workspace executor does on one call
#[derive(Debug, Clone)]
pub enum TaskBehavior {
    Succeed,
    PartialFailure(Vec<String>),
    Fail { message: String, retryable: bool },
    NotReady(String),
}

#[derive(Clone, Default)]
pub struct MockWorkspaceTaskExecutor {
    script: Arc<Mutex<VecDeque<TaskBehavior>>>,
    executed: Arc<Mutex<Vec<TaskMessage>>>,
}

impl MockWorkspaceTaskExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(behaviors: Vec<TaskBehavior>) -> Self {
        let mock = Self::new();
        mock.script.lock().unwrap().extend(behaviors);
        mock
    }

    pub fn executed(&self) -> Vec<TaskMessage> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkspaceTaskExecutor for MockWorkspaceTaskExecutor {
    async fn execute(&self, message: &TaskMessage) -> RelayResult<TaskOutcome> {
        self.executed.lock().unwrap().push(message.clone());
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TaskBehavior::Succeed);

        match behavior {
            TaskBehavior::Succeed => Ok(TaskOutcome::success()),
            TaskBehavior::PartialFailure(failures) => Ok(TaskOutcome::with_failures(failures)),
            TaskBehavior::Fail { message, retryable } => {
                Err(RelayError::Processor { message, retryable })
            }
            TaskBehavior::NotReady(reason) => Err(RelayError::TaskNotReady(reason)),
        }
    }
}
