//! 任务消息模型
//!
//! 流中的条目在传输边界上是扁平的字符串字段表，读取时立即解析为
//! 带标签的 [`TaskMessage`]，松散的字段表不会越过 [`TaskMessage::from_fields`]。

use relay_core::{RelayError, RelayResult};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const FIELD_TASK_TYPE: &str = "task_type";
pub const FIELD_EVENT_LOG_ID: &str = "event_log_id";
pub const FIELD_ISSUE_ID: &str = "issue_id";
pub const FIELD_EVENT_TYPE: &str = "event_type";
pub const FIELD_ATTEMPT: &str = "attempt";
pub const FIELD_TRACE_ID: &str = "trace_id";
pub const FIELD_TRIGGER_THREAD_ID: &str = "trigger_thread_id";
pub const FIELD_WORKSPACE_ID: &str = "workspace_id";
pub const FIELD_ORGANIZATION_ID: &str = "organization_id";
pub const FIELD_RUN_ID: &str = "run_id";
pub const FIELD_REPO_ID: &str = "repo_id";
pub const FIELD_BRANCH: &str = "branch";
pub const FIELD_LAST_ERROR: &str = "last_error";
/// 仅出现在死信流中
pub const FIELD_ERROR: &str = "error";

/// 任务类型判别字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    IssueEvent,
    WorkspaceSetup,
    RepoSync,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::IssueEvent => "issue_event",
            TaskType::WorkspaceSetup => "workspace_setup",
            TaskType::RepoSync => "repo_sync",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issue_event" => Ok(TaskType::IssueEvent),
            "workspace_setup" => Ok(TaskType::WorkspaceSetup),
            "repo_sync" => Ok(TaskType::RepoSync),
            other => Err(RelayError::malformed(format!("unknown task_type {other:?}"))),
        }
    }
}

/// 各任务类型必需的字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    IssueEvent {
        event_log_id: i64,
        issue_id: i64,
        event_type: String,
    },
    WorkspaceSetup {
        run_id: i64,
    },
    RepoSync {
        run_id: i64,
        repo_id: i64,
        branch: Option<String>,
    },
}

impl TaskKind {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskKind::IssueEvent { .. } => TaskType::IssueEvent,
            TaskKind::WorkspaceSetup { .. } => TaskType::WorkspaceSetup,
            TaskKind::RepoSync { .. } => TaskType::RepoSync,
        }
    }
}

/// 队列传输的基本单位
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMessage {
    /// 流分配的条目ID，追加之前为空
    pub id: String,
    pub kind: TaskKind,
    /// 从1开始，每次重新入队加1
    pub attempt: u32,
    pub trace_id: Option<String>,
    pub trigger_thread_id: Option<String>,
    pub workspace_id: Option<i64>,
    pub organization_id: Option<i64>,
    /// 上一次失败的原因
    pub last_error: Option<String>,
    /// 该条目在消费者组内被投递的次数
    pub deliveries: u64,
}

impl TaskMessage {
    fn with_kind(kind: TaskKind) -> Self {
        Self {
            id: String::new(),
            kind,
            attempt: 1,
            trace_id: None,
            trigger_thread_id: None,
            workspace_id: None,
            organization_id: None,
            last_error: None,
            deliveries: 1,
        }
    }

    pub fn issue_event(event_log_id: i64, issue_id: i64, event_type: impl Into<String>) -> Self {
        Self::with_kind(TaskKind::IssueEvent {
            event_log_id,
            issue_id,
            event_type: event_type.into(),
        })
    }

    pub fn workspace_setup(run_id: i64) -> Self {
        Self::with_kind(TaskKind::WorkspaceSetup { run_id })
    }

    pub fn repo_sync(run_id: i64, repo_id: i64, branch: Option<String>) -> Self {
        Self::with_kind(TaskKind::RepoSync {
            run_id,
            repo_id,
            branch,
        })
    }

    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id.filter(|t| !t.is_empty());
        self
    }

    pub fn with_trigger_thread_id(mut self, thread_id: Option<String>) -> Self {
        self.trigger_thread_id = thread_id.filter(|t| !t.is_empty());
        self
    }

    pub fn with_workspace(mut self, organization_id: i64, workspace_id: i64) -> Self {
        self.organization_id = Some(organization_id);
        self.workspace_id = Some(workspace_id);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt.max(1);
        self
    }

    pub fn task_type(&self) -> TaskType {
        self.kind.task_type()
    }

    pub fn issue_id(&self) -> Option<i64> {
        match self.kind {
            TaskKind::IssueEvent { issue_id, .. } => Some(issue_id),
            _ => None,
        }
    }

    pub fn event_log_id(&self) -> Option<i64> {
        match self.kind {
            TaskKind::IssueEvent { event_log_id, .. } => Some(event_log_id),
            _ => None,
        }
    }

    /// 从流条目的字段表解析消息
    ///
    /// 缺少当前任务类型必需字段、整数字段无法解析或任务类型未知时返回
    /// [`RelayError::MalformedMessage`]，这类消息无法通过重新投递修复。
    pub fn from_fields(id: &str, fields: &HashMap<String, String>) -> RelayResult<Self> {
        let event_log_id = optional_i64(fields, FIELD_EVENT_LOG_ID)?;
        let issue_id = optional_i64(fields, FIELD_ISSUE_ID)?;
        let run_id = optional_i64(fields, FIELD_RUN_ID)?;
        let repo_id = optional_i64(fields, FIELD_REPO_ID)?;
        let workspace_id = optional_i64(fields, FIELD_WORKSPACE_ID)?;
        let organization_id = optional_i64(fields, FIELD_ORGANIZATION_ID)?;

        let attempt = match fields.get(FIELD_ATTEMPT) {
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| {
                RelayError::malformed(format!("parsing {FIELD_ATTEMPT}: {e}"))
            })?,
            None => 0,
        };

        let task_type = match optional_string(fields, FIELD_TASK_TYPE) {
            Some(raw) => raw.parse::<TaskType>()?,
            None if event_log_id.is_some() && issue_id.is_some() => TaskType::IssueEvent,
            None => return Err(RelayError::malformed("missing task_type")),
        };

        let kind = match task_type {
            TaskType::IssueEvent => {
                let (Some(event_log_id), Some(issue_id)) = (event_log_id, issue_id) else {
                    return Err(RelayError::malformed("missing event_log_id or issue_id"));
                };
                let Some(event_type) = optional_string(fields, FIELD_EVENT_TYPE) else {
                    return Err(RelayError::malformed("missing event_type"));
                };
                TaskKind::IssueEvent {
                    event_log_id,
                    issue_id,
                    event_type,
                }
            }
            TaskType::WorkspaceSetup => {
                let Some(run_id) = run_id else {
                    return Err(RelayError::malformed("missing run_id"));
                };
                TaskKind::WorkspaceSetup { run_id }
            }
            TaskType::RepoSync => {
                let (Some(run_id), Some(repo_id)) = (run_id, repo_id) else {
                    return Err(RelayError::malformed("missing run_id or repo_id"));
                };
                TaskKind::RepoSync {
                    run_id,
                    repo_id,
                    branch: optional_string(fields, FIELD_BRANCH),
                }
            }
        };

        Ok(Self {
            id: id.to_string(),
            kind,
            attempt: attempt.max(1),
            trace_id: optional_string(fields, FIELD_TRACE_ID),
            trigger_thread_id: optional_string(fields, FIELD_TRIGGER_THREAD_ID),
            workspace_id,
            organization_id,
            last_error: optional_string(fields, FIELD_LAST_ERROR),
            deliveries: 1,
        })
    }

    /// 生成写入流的字段，`last_error`与`error`由调用方按需追加
    pub fn to_fields(&self, attempt: u32) -> Vec<(String, String)> {
        let mut fields = vec![
            (FIELD_TASK_TYPE.to_string(), self.task_type().as_str().to_string()),
            (FIELD_ATTEMPT.to_string(), attempt.max(1).to_string()),
        ];
        let mut push = |key: &str, value: String| fields.push((key.to_string(), value));

        match &self.kind {
            TaskKind::IssueEvent {
                event_log_id,
                issue_id,
                event_type,
            } => {
                push(FIELD_EVENT_LOG_ID, event_log_id.to_string());
                push(FIELD_ISSUE_ID, issue_id.to_string());
                push(FIELD_EVENT_TYPE, event_type.clone());
            }
            TaskKind::WorkspaceSetup { run_id } => {
                push(FIELD_RUN_ID, run_id.to_string());
            }
            TaskKind::RepoSync {
                run_id,
                repo_id,
                branch,
            } => {
                push(FIELD_RUN_ID, run_id.to_string());
                push(FIELD_REPO_ID, repo_id.to_string());
                if let Some(branch) = branch {
                    push(FIELD_BRANCH, branch.clone());
                }
            }
        }

        if let Some(workspace_id) = self.workspace_id {
            push(FIELD_WORKSPACE_ID, workspace_id.to_string());
        }
        if let Some(organization_id) = self.organization_id {
            push(FIELD_ORGANIZATION_ID, organization_id.to_string());
        }
        if let Some(trace_id) = &self.trace_id {
            push(FIELD_TRACE_ID, trace_id.clone());
        }
        if let Some(thread_id) = &self.trigger_thread_id {
            push(FIELD_TRIGGER_THREAD_ID, thread_id.clone());
        }

        fields
    }
}

/// 工作区专属的任务流名称
pub fn workspace_stream_name(organization_id: i64, workspace_id: i64) -> String {
    format!("agent-stream:org-{organization_id}:workspace-{workspace_id}")
}

fn optional_string(fields: &HashMap<String, String>, key: &str) -> Option<String> {
    fields.get(key).filter(|v| !v.is_empty()).cloned()
}

fn optional_i64(fields: &HashMap<String, String>, key: &str) -> RelayResult<Option<i64>> {
    match fields.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|e| RelayError::malformed(format!("parsing {key}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_issue_event() {
        let msg = TaskMessage::from_fields(
            "1-0",
            &fields(&[
                ("task_type", "issue_event"),
                ("event_log_id", "10"),
                ("issue_id", "42"),
                ("event_type", "note_created"),
                ("attempt", "2"),
                ("trace_id", "abc"),
                ("last_error", "timeout"),
            ]),
        )
        .unwrap();

        assert_eq!(msg.id, "1-0");
        assert_eq!(msg.issue_id(), Some(42));
        assert_eq!(msg.event_log_id(), Some(10));
        assert_eq!(msg.attempt, 2);
        assert_eq!(msg.trace_id.as_deref(), Some("abc"));
        assert_eq!(msg.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_missing_task_type_inferred_from_issue_fields() {
        let msg = TaskMessage::from_fields(
            "1-0",
            &fields(&[
                ("event_log_id", "10"),
                ("issue_id", "42"),
                ("event_type", "issue_opened"),
            ]),
        )
        .unwrap();
        assert_eq!(msg.task_type(), TaskType::IssueEvent);
        // attempt缺省为1
        assert_eq!(msg.attempt, 1);
    }

    #[test]
    fn test_missing_task_type_without_issue_fields_is_malformed() {
        let err = TaskMessage::from_fields("1-0", &fields(&[("run_id", "3")])).unwrap_err();
        assert!(matches!(err, RelayError::MalformedMessage(_)));
    }

    #[test]
    fn test_issue_event_missing_issue_id_is_malformed() {
        let err = TaskMessage::from_fields(
            "1-0",
            &fields(&[
                ("task_type", "issue_event"),
                ("event_log_id", "10"),
                ("event_type", "note_created"),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::MalformedMessage(_)));
    }

    #[test]
    fn test_issue_event_requires_event_type() {
        let result = TaskMessage::from_fields(
            "1-0",
            &fields(&[
                ("task_type", "issue_event"),
                ("event_log_id", "10"),
                ("issue_id", "42"),
                ("event_type", ""),
            ]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_repo_sync_requires_repo_id() {
        let result = TaskMessage::from_fields(
            "1-0",
            &fields(&[("task_type", "repo_sync"), ("run_id", "5")]),
        );
        assert!(result.is_err());

        let msg = TaskMessage::from_fields(
            "1-0",
            &fields(&[
                ("task_type", "repo_sync"),
                ("run_id", "5"),
                ("repo_id", "9"),
                ("branch", "main"),
            ]),
        )
        .unwrap();
        assert_eq!(
            msg.kind,
            TaskKind::RepoSync {
                run_id: 5,
                repo_id: 9,
                branch: Some("main".to_string())
            }
        );
    }

    #[test]
    fn test_unknown_task_type_and_bad_integers() {
        assert!(TaskMessage::from_fields("1-0", &fields(&[("task_type", "deploy")])).is_err());
        assert!(TaskMessage::from_fields(
            "1-0",
            &fields(&[
                ("task_type", "workspace_setup"),
                ("run_id", "not-a-number")
            ])
        )
        .is_err());
        assert!(TaskMessage::from_fields(
            "1-0",
            &fields(&[
                ("task_type", "workspace_setup"),
                ("run_id", "1"),
                ("attempt", "-1")
            ])
        )
        .is_err());
    }

    #[test]
    fn test_to_fields_carries_context_and_attempt() {
        let msg = TaskMessage::issue_event(10, 42, "note_created")
            .with_trace_id(Some("trace-1".to_string()))
            .with_trigger_thread_id(Some(String::new()))
            .with_workspace(3, 4);

        let encoded: HashMap<String, String> = msg.to_fields(3).into_iter().collect();
        assert_eq!(encoded["task_type"], "issue_event");
        assert_eq!(encoded["attempt"], "3");
        assert_eq!(encoded["issue_id"], "42");
        assert_eq!(encoded["workspace_id"], "4");
        assert_eq!(encoded["trace_id"], "trace-1");
        assert!(!encoded.contains_key("trigger_thread_id"));
        assert!(!encoded.contains_key("last_error"));

        let decoded = TaskMessage::from_fields("9-0", &encoded).unwrap();
        assert_eq!(decoded.kind, msg.kind);
        assert_eq!(decoded.attempt, 3);
    }

    #[test]
    fn test_workspace_stream_name() {
        assert_eq!(workspace_stream_name(7, 11), "agent-stream:org-7:workspace-11");
    }
}
