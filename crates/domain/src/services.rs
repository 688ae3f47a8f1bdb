//! # 外部协作者接口
//!
//! 队列与Worker引擎依赖但不实现的服务：议题处理器（LLM流水线）、参与判定、
//! 议题跟踪系统客户端、议题就绪检查以及工作区任务执行器。
//! 生产实现位于引擎之外，测试中由`relay-testing-utils`提供替身。

use async_trait::async_trait;
use relay_core::RelayResult;
use serde::{Deserialize, Serialize};

use crate::entities::{EventLog, Issue};
use crate::task_message::TaskMessage;

/// 议题处理器
///
/// 每个被认领的批次调用一次。返回`Some`时写回更新后的议题快照。
#[async_trait]
pub trait IssueProcessor: Send + Sync {
    async fn process(&self, issue: &Issue, events: &[EventLog]) -> RelayResult<Option<Issue>>;
}

/// 参与判定的输入
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementRequest {
    pub provider: String,
    pub issue_body: String,
    pub comment_body: String,
    pub discussion_id: Option<String>,
    pub comment_id: Option<String>,
    pub external_project_id: i64,
    pub external_issue_iid: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementResult {
    pub should_engage: bool,
    /// 判定参与时附带的讨论串快照
    pub discussions: serde_json::Value,
}

/// 判定一条事件是否需要Relay参与（@提及或在已参与的讨论串中回复）
#[async_trait]
pub trait EngagementDetector: Send + Sync {
    async fn should_engage(
        &self,
        integration_id: i64,
        request: &EngagementRequest,
    ) -> RelayResult<EngagementResult>;

    /// 事件是否由Relay自己的账号触发
    async fn is_self_triggered(&self, integration_id: i64, username: &str) -> RelayResult<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchIssueParams {
    pub integration_id: i64,
    pub project_id: i64,
    pub issue_iid: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddReactionParams {
    pub integration_id: i64,
    pub project_id: i64,
    pub issue_iid: i64,
    /// 为`None`时反应加在议题本身上
    pub note_id: Option<i64>,
    pub emoji: String,
}

/// 议题跟踪系统客户端，按provider注册
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn fetch_issue(&self, params: &FetchIssueParams) -> RelayResult<Issue>;

    async fn add_reaction(&self, params: &AddReactionParams) -> RelayResult<()>;
}

/// 就绪检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// 认领议题前的就绪检查，例如工作区仓库尚未同步完成
#[async_trait]
pub trait IssueReadiness: Send + Sync {
    async fn ensure_issue_ready(&self, issue_id: i64) -> RelayResult<Readiness>;
}

/// 工作区任务的执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutcome {
    /// 部分失败的描述，非空时状态记为`succeeded_with_errors`
    pub failures: Vec<String>,
}

impl TaskOutcome {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn with_failures(failures: Vec<String>) -> Self {
        Self { failures }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// workspace_setup / repo_sync 任务执行器
///
/// 前置条件未满足时返回[`relay_core::RelayError::TaskNotReady`]，任务将以相同的attempt重新入队。
#[async_trait]
pub trait WorkspaceTaskExecutor: Send + Sync {
    async fn execute(&self, message: &TaskMessage) -> RelayResult<TaskOutcome>;
}
