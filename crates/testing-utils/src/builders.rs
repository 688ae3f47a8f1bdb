//! Test data builders for creating test entities
//!
//! Every builder starts from sensible defaults so tests only spell out the
//! fields they care about.

use chrono::Utc;
use relay_domain::{
    EventLog, Integration, Issue, NewEventLog, ProcessingStatus, RunStatus, TaskMessage,
    WorkspaceEventLog,
};

/// Builder for creating test Issue entities
pub struct IssueBuilder {
    issue: Issue,
}

impl IssueBuilder {
    pub fn new() -> Self {
        let mut issue = Issue::new(42, 1, "42");
        issue.provider = "gitlab".to_string();
        issue.title = Some("Test issue".to_string());
        Self { issue }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.issue.id = id;
        self
    }

    pub fn with_integration_id(mut self, integration_id: i64) -> Self {
        self.issue.integration_id = integration_id;
        self
    }

    pub fn with_external_issue_id(mut self, external_issue_id: &str) -> Self {
        self.issue.external_issue_id = external_issue_id.to_string();
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.issue.title = Some(title.to_string());
        self
    }

    pub fn with_status(mut self, status: ProcessingStatus) -> Self {
        self.issue.processing_status = status;
        self
    }

    pub fn queued(self) -> Self {
        self.with_status(ProcessingStatus::Queued)
    }

    pub fn processing(self) -> Self {
        self.with_status(ProcessingStatus::Processing)
    }

    pub fn build(self) -> Issue {
        self.issue
    }
}

impl Default for IssueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test EventLog entities
pub struct EventLogBuilder {
    event: EventLog,
}

impl EventLogBuilder {
    pub fn new(id: i64, issue_id: i64) -> Self {
        Self {
            event: EventLog {
                id,
                workspace_id: 1,
                issue_id,
                triggered_by_username: Some("alice".to_string()),
                source: "gitlab".to_string(),
                event_type: "note_created".to_string(),
                payload: serde_json::json!({ "id": id }),
                external_id: None,
                dedupe_key: format!("gitlab:test-{id}"),
                processed_at: None,
                processing_error: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn with_event_type(mut self, event_type: &str) -> Self {
        self.event.event_type = event_type.to_string();
        self
    }

    pub fn with_created_at_offset(mut self, offset_seconds: i64) -> Self {
        self.event.created_at = Utc::now() + chrono::Duration::seconds(offset_seconds);
        self
    }

    pub fn processed(mut self) -> Self {
        self.event.processed_at = Some(Utc::now());
        self
    }

    pub fn build(self) -> EventLog {
        self.event
    }

    /// The insert form of this event, for `create_or_get`
    pub fn build_new(self) -> NewEventLog {
        let e = self.event;
        NewEventLog {
            id: e.id,
            workspace_id: e.workspace_id,
            issue_id: e.issue_id,
            triggered_by_username: e.triggered_by_username,
            source: e.source,
            event_type: e.event_type,
            payload: e.payload,
            external_id: e.external_id,
            dedupe_key: e.dedupe_key,
        }
    }
}

/// Builder for creating test Integration entities
pub struct IntegrationBuilder {
    integration: Integration,
}

impl IntegrationBuilder {
    pub fn new() -> Self {
        Self {
            integration: Integration {
                id: 1,
                workspace_id: 10,
                organization_id: 100,
                provider: "gitlab".to_string(),
                is_enabled: true,
                bot_username: Some("relay-bot".to_string()),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.integration.id = id;
        self
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.integration.provider = provider.to_string();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.integration.is_enabled = false;
        self
    }

    pub fn build(self) -> Integration {
        self.integration
    }
}

impl Default for IntegrationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test WorkspaceEventLog entities
pub struct WorkspaceEventLogBuilder {
    log: WorkspaceEventLog,
}

impl WorkspaceEventLogBuilder {
    pub fn new(id: i64) -> Self {
        let now = Utc::now();
        Self {
            log: WorkspaceEventLog {
                id,
                workspace_id: 10,
                organization_id: 100,
                repo_id: None,
                event_type: "workspace_setup".to_string(),
                status: RunStatus::Queued,
                error: None,
                metadata: serde_json::json!({}),
                started_at: None,
                finished_at: None,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn with_repo(mut self, repo_id: i64) -> Self {
        self.log.repo_id = Some(repo_id);
        self.log.event_type = "repo_sync".to_string();
        self
    }

    pub fn build(self) -> WorkspaceEventLog {
        self.log
    }
}

/// Builder for delivered task messages, as a consumer would hand them out
pub struct TaskMessageBuilder {
    message: TaskMessage,
}

impl TaskMessageBuilder {
    pub fn issue_event(event_log_id: i64, issue_id: i64) -> Self {
        Self {
            message: TaskMessage::issue_event(event_log_id, issue_id, "note"),
        }
    }

    pub fn workspace_setup(run_id: i64) -> Self {
        Self {
            message: TaskMessage::workspace_setup(run_id).with_workspace(100, 10),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.message.id = id.to_string();
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.message.attempt = attempt;
        self
    }

    pub fn with_deliveries(mut self, deliveries: u64) -> Self {
        self.message.deliveries = deliveries;
        self
    }

    pub fn with_trace_id(mut self, trace_id: &str) -> Self {
        self.message.trace_id = Some(trace_id.to_string());
        self
    }

    pub fn build(self) -> TaskMessage {
        self.message
    }
}
