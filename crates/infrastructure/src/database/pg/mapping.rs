use relay_core::RelayResult;
use relay_domain::{EventLog, Integration, Issue, PipelineRun, WorkspaceEventLog};
use sqlx::postgres::PgRow;
use sqlx::Row;

pub(super) const ISSUE_COLUMNS: &str = "id, integration_id, external_issue_id, external_project_id, provider, title, description, labels, discussions, metadata, processing_status, processing_started_at, last_processed_at, created_at, updated_at";

pub(super) const EVENT_LOG_COLUMNS: &str = "id, workspace_id, issue_id, triggered_by_username, source, event_type, payload, external_id, dedupe_key, processed_at, processing_error, created_at";

pub(super) const PIPELINE_RUN_COLUMNS: &str =
    "id, event_log_id, attempt, status, error, started_at, finished_at";

pub(super) const WORKSPACE_EVENT_LOG_COLUMNS: &str = "id, workspace_id, organization_id, repo_id, event_type, status, error, metadata, started_at, finished_at, created_at, updated_at";

pub(super) fn row_to_issue(row: &PgRow) -> RelayResult<Issue> {
    Ok(Issue {
        id: row.try_get("id")?,
        integration_id: row.try_get("integration_id")?,
        external_issue_id: row.try_get("external_issue_id")?,
        external_project_id: row.try_get("external_project_id")?,
        provider: row.try_get("provider")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        labels: row.try_get("labels")?,
        discussions: row.try_get("discussions")?,
        metadata: row.try_get("metadata")?,
        processing_status: row.try_get("processing_status")?,
        processing_started_at: row.try_get("processing_started_at")?,
        last_processed_at: row.try_get("last_processed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(super) fn row_to_event_log(row: &PgRow) -> RelayResult<EventLog> {
    Ok(EventLog {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        issue_id: row.try_get("issue_id")?,
        triggered_by_username: row.try_get("triggered_by_username")?,
        source: row.try_get("source")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        external_id: row.try_get("external_id")?,
        dedupe_key: row.try_get("dedupe_key")?,
        processed_at: row.try_get("processed_at")?,
        processing_error: row.try_get("processing_error")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(super) fn row_to_pipeline_run(row: &PgRow) -> RelayResult<PipelineRun> {
    Ok(PipelineRun {
        id: row.try_get("id")?,
        event_log_id: row.try_get("event_log_id")?,
        attempt: row.try_get("attempt")?,
        status: row.try_get("status")?,
        error: row.try_get("error")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

pub(super) fn row_to_workspace_event_log(row: &PgRow) -> RelayResult<WorkspaceEventLog> {
    Ok(WorkspaceEventLog {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        organization_id: row.try_get("organization_id")?,
        repo_id: row.try_get("repo_id")?,
        event_type: row.try_get("event_type")?,
        status: row.try_get("status")?,
        error: row.try_get("error")?,
        metadata: row.try_get("metadata")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(super) fn row_to_integration(row: &PgRow) -> RelayResult<Integration> {
    Ok(Integration {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        organization_id: row.try_get("organization_id")?,
        provider: row.try_get("provider")?,
        is_enabled: row.try_get("is_enabled")?,
        bot_username: row.try_get("bot_username")?,
    })
}
