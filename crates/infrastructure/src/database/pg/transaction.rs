use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::RelayResult;
use relay_domain::{
    EventLog, EventLogStore, Issue, IssueStore, NewEventLog, PipelineRun, PipelineRunStore,
    RunStatus, StoreTransaction, TransactionManager, WorkspaceEventLog, WorkspaceEventLogStore,
};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};

use super::mapping::{
    row_to_event_log, row_to_issue, row_to_pipeline_run, row_to_workspace_event_log,
    EVENT_LOG_COLUMNS, ISSUE_COLUMNS, PIPELINE_RUN_COLUMNS, WORKSPACE_EVENT_LOG_COLUMNS,
};

/// 基于连接池的事务工厂
#[derive(Clone)]
pub struct PgTransactionManager {
    pool: PgPool,
}

impl PgTransactionManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionManager for PgTransactionManager {
    async fn begin(&self) -> RelayResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }
}

/// 一个打开的PostgreSQL事务，同时充当各仓储
///
/// 被丢弃而未提交时由sqlx回滚。
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
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
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RelayResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl IssueStore for PgStoreTransaction {
    #[instrument(skip(self), fields(issue_id = %id))]
    async fn get_by_id(&mut self, id: i64) -> RelayResult<Option<Issue>> {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_issue).transpose()
    }

    #[instrument(skip(self))]
    async fn get_by_integration_and_external_id(
        &mut self,
        integration_id: i64,
        external_issue_id: &str,
    ) -> RelayResult<Option<Issue>> {
        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE integration_id = $1 AND external_issue_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(integration_id)
            .bind(external_issue_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_issue).transpose()
    }

    #[instrument(skip(self, issue), fields(
        issue_id = %issue.id,
        integration_id = %issue.integration_id,
        external_issue_id = %issue.external_issue_id,
    ))]
    async fn upsert(&mut self, issue: &Issue) -> RelayResult<Issue> {
        let sql = format!(
            r#"
            INSERT INTO issues (id, integration_id, external_issue_id, external_project_id, provider, title, description, labels, discussions, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (integration_id, external_issue_id) DO UPDATE SET
                external_project_id = EXCLUDED.external_project_id,
                provider = EXCLUDED.provider,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                labels = EXCLUDED.labels,
                discussions = EXCLUDED.discussions,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            RETURNING {ISSUE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(issue.id)
            .bind(issue.integration_id)
            .bind(&issue.external_issue_id)
            .bind(&issue.external_project_id)
            .bind(&issue.provider)
            .bind(&issue.title)
            .bind(&issue.description)
            .bind(&issue.labels)
            .bind(&issue.discussions)
            .bind(&issue.metadata)
            .fetch_one(&mut *self.tx)
            .await?;
        let stored = row_to_issue(&row)?;
        debug!("议题已写入: {}", stored.entity_description());
        Ok(stored)
    }

    #[instrument(skip(self), fields(issue_id = %id))]
    async fn queue_if_idle(&mut self, id: i64) -> RelayResult<bool> {
        let result = sqlx::query(
            "UPDATE issues SET processing_status = 'queued', updated_at = NOW() WHERE id = $1 AND processing_status = 'idle'",
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(issue_id = %id))]
    async fn claim_queued(&mut self, id: i64) -> RelayResult<Option<Issue>> {
        let sql = format!(
            r#"
            UPDATE issues
            SET processing_status = 'processing', processing_started_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND processing_status = 'queued'
            RETURNING {ISSUE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_issue).transpose()
    }

    #[instrument(skip(self), fields(issue_id = %id))]
    async fn release(&mut self, id: i64) -> RelayResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE issues
            SET processing_status = 'idle', processing_started_at = NULL, last_processed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND processing_status = 'processing'
            "#,
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(issue_id = %id))]
    async fn requeue_processing(&mut self, id: i64) -> RelayResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE issues
            SET processing_status = 'queued', processing_started_at = NULL, last_processed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND processing_status = 'processing'
            "#,
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(issue_id = %id))]
    async fn reset_idle(&mut self, id: i64) -> RelayResult<()> {
        sqlx::query(
            "UPDATE issues SET processing_status = 'idle', processing_started_at = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EventLogStore for PgStoreTransaction {
    #[instrument(skip(self, new), fields(
        event_log_id = %new.id,
        issue_id = %new.issue_id,
        event_type = %new.event_type,
    ))]
    async fn create_or_get(&mut self, new: &NewEventLog) -> RelayResult<(EventLog, bool)> {
        let insert = format!(
            r#"
            INSERT INTO event_logs (id, workspace_id, issue_id, triggered_by_username, source, event_type, payload, external_id, dedupe_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (dedupe_key) DO NOTHING
            RETURNING {EVENT_LOG_COLUMNS}
            "#
        );
        let inserted = sqlx::query(&insert)
            .bind(new.id)
            .bind(new.workspace_id)
            .bind(new.issue_id)
            .bind(&new.triggered_by_username)
            .bind(&new.source)
            .bind(&new.event_type)
            .bind(&new.payload)
            .bind(&new.external_id)
            .bind(&new.dedupe_key)
            .fetch_optional(&mut *self.tx)
            .await?;

        if let Some(row) = inserted {
            return Ok((row_to_event_log(&row)?, true));
        }

        let select = format!("SELECT {EVENT_LOG_COLUMNS} FROM event_logs WHERE dedupe_key = $1");
        let row = sqlx::query(&select)
            .bind(&new.dedupe_key)
            .fetch_one(&mut *self.tx)
            .await?;
        let existing = row_to_event_log(&row)?;
        debug!(
            "事件已存在，按去重键返回: {} (existing_id={})",
            new.dedupe_key, existing.id
        );
        let created = existing.id == new.id;
        Ok((existing, created))
    }

    #[instrument(skip(self), fields(issue_id = %issue_id))]
    async fn list_unprocessed_by_issue(&mut self, issue_id: i64) -> RelayResult<Vec<EventLog>> {
        let sql = format!(
            "SELECT {EVENT_LOG_COLUMNS} FROM event_logs WHERE issue_id = $1 AND processed_at IS NULL ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(issue_id)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(row_to_event_log).collect()
    }

    #[instrument(skip(self, ids), fields(count = ids.len(), failed = error.is_some()))]
    async fn mark_batch_processed(&mut self, ids: &[i64], error: Option<&str>) -> RelayResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE event_logs SET processed_at = NOW(), processing_error = $2 WHERE id = ANY($1)",
        )
        .bind(ids)
        .bind(error)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PipelineRunStore for PgStoreTransaction {
    #[instrument(skip(self, run), fields(run_id = %run.id, event_log_id = %run.event_log_id, attempt = %run.attempt))]
    async fn create(&mut self, run: &PipelineRun) -> RelayResult<PipelineRun> {
        let sql = format!(
            r#"
            INSERT INTO pipeline_runs (id, event_log_id, attempt, status, error, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {PIPELINE_RUN_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(run.id)
            .bind(run.event_log_id)
            .bind(run.attempt)
            .bind(run.status)
            .bind(&run.error)
            .bind(run.started_at)
            .bind(run.finished_at)
            .fetch_one(&mut *self.tx)
            .await?;
        row_to_pipeline_run(&row)
    }

    #[instrument(skip(self, error), fields(run_id = %id, status = %status))]
    async fn finish(&mut self, id: i64, status: RunStatus, error: Option<&str>) -> RelayResult<()> {
        sqlx::query(
            "UPDATE pipeline_runs SET status = $2, error = $3, finished_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WorkspaceEventLogStore for PgStoreTransaction {
    #[instrument(skip(self), fields(run_id = %id))]
    async fn get_by_id(&mut self, id: i64) -> RelayResult<Option<WorkspaceEventLog>> {
        let sql = format!("SELECT {WORKSPACE_EVENT_LOG_COLUMNS} FROM workspace_event_logs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_workspace_event_log).transpose()
    }

    #[instrument(skip(self, error), fields(run_id = %id, status = %status))]
    async fn update_status(
        &mut self,
        id: i64,
        status: RunStatus,
        error: Option<&str>,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> RelayResult<()> {
        sqlx::query(
            r#"
            UPDATE workspace_event_logs
            SET status = $2, error = $3, started_at = COALESCE($4, started_at), finished_at = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .bind(started_at)
        .bind(finished_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}
