use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 议题处理状态
///
/// 状态流转: idle → queued → processing → idle。
/// 每次流转都是带前置条件的更新，这一列是跨进程唯一的互斥原语。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Idle,
    Queued,
    Processing,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Idle => "idle",
            ProcessingStatus::Queued => "queued",
            ProcessingStatus::Processing => "processing",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(ProcessingStatus::Idle),
            "queued" => Ok(ProcessingStatus::Queued),
            "processing" => Ok(ProcessingStatus::Processing),
            _ => Err(format!("Invalid processing status: {s}")),
        }
    }
}

/// 工作区任务与流水线运行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    SucceededWithErrors,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::SucceededWithErrors => "succeeded_with_errors",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::SucceededWithErrors
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            "succeeded_with_errors" => Ok(RunStatus::SucceededWithErrors),
            _ => Err(format!("Invalid run status: {s}")),
        }
    }
}

/// 议题: 互斥处理的基本单位
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub id: i64,
    pub integration_id: i64,
    pub external_issue_id: String,
    pub external_project_id: Option<String>,
    pub provider: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub labels: Vec<String>,
    /// 来自议题跟踪系统的讨论串
    pub discussions: serde_json::Value,
    /// 处理器写回的结构化结果
    pub metadata: serde_json::Value,
    pub processing_status: ProcessingStatus,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    pub fn new(id: i64, integration_id: i64, external_issue_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            integration_id,
            external_issue_id: external_issue_id.into(),
            external_project_id: None,
            provider: String::new(),
            title: None,
            description: None,
            labels: Vec::new(),
            discussions: serde_json::Value::Null,
            metadata: serde_json::Value::Null,
            processing_status: ProcessingStatus::Idle,
            processing_started_at: None,
            last_processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn entity_description(&self) -> String {
        format!("议题 {} (外部ID: {})", self.id, self.external_issue_id)
    }
}

/// 一条已接收的外部事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventLog {
    pub id: i64,
    pub workspace_id: i64,
    pub issue_id: i64,
    pub triggered_by_username: Option<String>,
    pub source: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub external_id: Option<String>,
    pub dedupe_key: String,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EventLog {
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// 待写入的事件日志，ID由调用方预先生成
#[derive(Debug, Clone, PartialEq)]
pub struct NewEventLog {
    pub id: i64,
    pub workspace_id: i64,
    pub issue_id: i64,
    pub triggered_by_username: Option<String>,
    pub source: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub external_id: Option<String>,
    pub dedupe_key: String,
}

/// 议题跟踪系统集成
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Integration {
    pub id: i64,
    pub workspace_id: i64,
    pub organization_id: i64,
    pub provider: String,
    pub is_enabled: bool,
    /// Relay在该集成中使用的机器人账号
    pub bot_username: Option<String>,
}

/// 工作区级任务（workspace_setup / repo_sync）的状态记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceEventLog {
    pub id: i64,
    pub workspace_id: i64,
    pub organization_id: i64,
    pub repo_id: Option<i64>,
    pub event_type: String,
    pub status: RunStatus,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 一次议题处理轮次的运行记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRun {
    pub id: i64,
    pub event_log_id: i64,
    pub attempt: i32,
    pub status: RunStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
