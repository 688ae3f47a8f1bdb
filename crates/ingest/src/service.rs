use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{RelayError, RelayResult};
use relay_domain::{
    AddReactionParams, EngagementDetector, EngagementRequest, EventLog, FetchIssueParams,
    IdGenerator, Integration, IntegrationStore, Issue, IssueTracker, NewEventLog, Producer,
    TaskMessage, TransactionManager,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::dedupe::compute_dedupe_key;

const ACK_REACTION: &str = "eyes";

/// 一条经过归一化的外部事件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventIngestParams {
    pub integration_id: i64,
    pub external_issue_id: String,
    pub external_project_id: i64,
    /// 选择议题跟踪系统客户端的键
    pub provider: String,
    pub issue_body: String,
    pub comment_body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discussion_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<String>,
    pub triggered_by_username: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// 接入结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestResult {
    /// 事件是否需要Relay参与，为false时其余字段均为空
    pub engaged: bool,
    pub event_log: Option<EventLog>,
    pub issue: Option<Issue>,
    pub dedupe_key: Option<String>,
    /// 是否向流投递了任务消息
    pub event_published: bool,
    /// 是否为重复投递的webhook
    pub event_duplicate: bool,
    /// 议题是否由本次调用从idle转为queued
    pub issue_picked_up: bool,
}

impl IngestResult {
    fn not_engaged() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait EventIngest: Send + Sync {
    async fn ingest(&self, params: EventIngestParams) -> RelayResult<IngestResult>;
}

/// 事件接入服务
///
/// 写入顺序保证任何投递出去的消息所指向的数据库状态都已提交：
/// 议题upsert、事件日志幂等写入与`idle → queued`在同一事务内完成，
/// 生产者只在提交之后、且状态确实发生流转时才被调用。
pub struct EventIngestService {
    transactions: Arc<dyn TransactionManager>,
    integrations: Arc<dyn IntegrationStore>,
    engagement: Arc<dyn EngagementDetector>,
    trackers: HashMap<String, Arc<dyn IssueTracker>>,
    producer: Arc<dyn Producer>,
    ids: Arc<IdGenerator>,
}

impl EventIngestService {
    pub fn new(
        transactions: Arc<dyn TransactionManager>,
        integrations: Arc<dyn IntegrationStore>,
        engagement: Arc<dyn EngagementDetector>,
        producer: Arc<dyn Producer>,
        ids: Arc<IdGenerator>,
    ) -> Self {
        Self {
            transactions,
            integrations,
            engagement,
            trackers: HashMap::new(),
            producer,
            ids,
        }
    }

    /// 为provider注册议题跟踪系统客户端
    pub fn with_tracker(mut self, provider: impl Into<String>, tracker: Arc<dyn IssueTracker>) -> Self {
        self.trackers.insert(provider.into(), tracker);
        self
    }

    fn validate(params: &EventIngestParams) -> RelayResult<()> {
        if params.integration_id == 0
            || params.external_issue_id.is_empty()
            || params.event_type.is_empty()
        {
            return Err(RelayError::validation(
                "integration_id, external_issue_id and event_type are required",
            ));
        }
        if params.payload.is_null() {
            return Err(RelayError::validation("payload is required"));
        }
        Ok(())
    }

    async fn load_integration(&self, id: i64) -> RelayResult<Integration> {
        let integration = self
            .integrations
            .get_by_id(id)
            .await?
            .ok_or(RelayError::IntegrationNotFound { id })?;
        if !integration.is_enabled {
            return Err(RelayError::IntegrationDisabled { id });
        }
        Ok(integration)
    }

    /// 检查失败时按非自身触发处理
    async fn is_self_triggered(&self, params: &EventIngestParams) -> bool {
        match self
            .engagement
            .is_self_triggered(params.integration_id, &params.triggered_by_username)
            .await
        {
            Ok(is_self) => is_self,
            Err(e) => {
                warn!(
                    triggered_by = %params.triggered_by_username,
                    error = %e,
                    "failed to check self-trigger, proceeding"
                );
                false
            }
        }
    }

    async fn find_existing_issue(&self, params: &EventIngestParams) -> RelayResult<Option<Issue>> {
        let mut tx = self.transactions.begin().await?;
        let issue = tx
            .issues()
            .get_by_integration_and_external_id(params.integration_id, &params.external_issue_id)
            .await?;
        tx.rollback().await?;
        Ok(issue)
    }

    async fn add_ack_reaction(
        &self,
        tracker: &dyn IssueTracker,
        params: &EventIngestParams,
        issue_iid: i64,
    ) {
        // 评论事件的反应加在评论上，议题事件加在议题本身
        let note_id = if params.comment_body.is_empty() {
            None
        } else {
            match params
                .comment_id
                .as_deref()
                .map(str::parse::<i64>)
                .transpose()
            {
                Ok(Some(id)) => Some(id),
                Ok(None) | Err(_) => {
                    warn!(comment_id = ?params.comment_id, "failed to parse comment id for reaction");
                    return;
                }
            }
        };

        let reaction = AddReactionParams {
            integration_id: params.integration_id,
            project_id: params.external_project_id,
            issue_iid,
            note_id,
            emoji: ACK_REACTION.to_string(),
        };
        if let Err(e) = tracker.add_reaction(&reaction).await {
            warn!(error = %e, "failed to add acknowledgement reaction");
        }
    }
}

#[async_trait]
impl EventIngest for EventIngestService {
    #[instrument(
        skip_all,
        fields(
            integration_id = params.integration_id,
            external_issue_id = %params.external_issue_id,
            event_type = %params.event_type,
            trace_id = params.trace_id.as_deref().unwrap_or_default(),
        )
    )]
    async fn ingest(&self, params: EventIngestParams) -> RelayResult<IngestResult> {
        Self::validate(&params)?;
        let integration = self.load_integration(params.integration_id).await?;

        if self.is_self_triggered(&params).await {
            info!(triggered_by = %params.triggered_by_username, "ignoring self-triggered event");
            return Ok(IngestResult::not_engaged());
        }

        let existing = self.find_existing_issue(&params).await?;

        let issue_iid: i64 = params.external_issue_id.parse().map_err(|_| {
            RelayError::validation(format!(
                "external_issue_id {:?} is not numeric",
                params.external_issue_id
            ))
        })?;
        let tracker = self
            .trackers
            .get(&params.provider)
            .cloned()
            .ok_or_else(|| RelayError::validation(format!("unsupported provider: {}", params.provider)))?;

        let engagement = self
            .engagement
            .should_engage(
                integration.id,
                &EngagementRequest {
                    provider: params.provider.clone(),
                    issue_body: params.issue_body.clone(),
                    comment_body: params.comment_body.clone(),
                    discussion_id: params.discussion_id.clone(),
                    comment_id: params.comment_id.clone(),
                    external_project_id: params.external_project_id,
                    external_issue_iid: issue_iid,
                },
            )
            .await?;

        if !engagement.should_engage {
            info!(subscribed = existing.is_some(), "event not engaged");
            return Ok(IngestResult::not_engaged());
        }

        let issue = match existing {
            Some(mut issue) => {
                info!(issue_id = issue.id, "engagement on tracked issue");
                issue.discussions = engagement.discussions;
                issue
            }
            None => {
                let mut issue = tracker
                    .fetch_issue(&FetchIssueParams {
                        integration_id: params.integration_id,
                        project_id: params.external_project_id,
                        issue_iid,
                    })
                    .await?;
                issue.id = self.ids.next_id();
                issue.integration_id = params.integration_id;
                issue.external_issue_id = params.external_issue_id.clone();
                issue.external_project_id = Some(params.external_project_id.to_string());
                issue.provider = integration.provider.clone();
                issue.discussions = engagement.discussions;
                info!(title = ?issue.title, "engagement detected, fetched issue from provider");
                issue
            }
        };
        self.add_ack_reaction(tracker.as_ref(), &params, issue_iid).await;

        let source = integration.provider.as_str();
        let dedupe_key = compute_dedupe_key(
            source,
            &params.event_type,
            &params.external_issue_id,
            &params.payload,
        );

        let mut tx = self.transactions.begin().await?;
        let issue = tx.issues().upsert(&issue).await?;
        let (event_log, created) = tx
            .event_logs()
            .create_or_get(&NewEventLog {
                id: self.ids.next_id(),
                workspace_id: integration.workspace_id,
                issue_id: issue.id,
                triggered_by_username: Some(params.triggered_by_username.clone())
                    .filter(|name| !name.is_empty()),
                source: source.to_string(),
                event_type: params.event_type.clone(),
                payload: params.payload.clone(),
                external_id: params.comment_id.clone(),
                dedupe_key: dedupe_key.clone(),
            })
            .await?;
        let picked_up = if created {
            tx.issues().queue_if_idle(issue.id).await?
        } else {
            false
        };
        tx.commit().await?;

        if picked_up {
            let message = TaskMessage::issue_event(event_log.id, issue.id, params.event_type.clone())
                .with_trace_id(params.trace_id.clone())
                .with_trigger_thread_id(params.discussion_id.clone())
                .with_workspace(integration.organization_id, integration.workspace_id);
            let message_id = self.producer.enqueue(&message).await?;
            info!(issue_id = issue.id, event_log_id = event_log.id, message_id = %message_id, "issue picked up, message enqueued");
        } else if !created {
            info!(issue_id = issue.id, event_log_id = event_log.id, dedupe_key = %dedupe_key, "duplicate event deduped");
        } else {
            info!(issue_id = issue.id, event_log_id = event_log.id, "event logged, issue already being processed");
        }

        Ok(IngestResult {
            engaged: true,
            event_log: Some(event_log),
            issue: Some(issue),
            dedupe_key: Some(dedupe_key),
            event_published: picked_up,
            event_duplicate: !created,
            issue_picked_up: picked_up,
        })
    }
}
