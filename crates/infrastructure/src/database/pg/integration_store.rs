use async_trait::async_trait;
use relay_core::RelayResult;
use relay_domain::{Integration, IntegrationStore};
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::mapping::row_to_integration;

pub struct PgIntegrationStore {
    pool: PgPool,
}

impl PgIntegrationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IntegrationStore for PgIntegrationStore {
    #[instrument(skip(self), fields(integration_id = %id))]
    async fn get_by_id(&self, id: i64) -> RelayResult<Option<Integration>> {
        let row = sqlx::query(
            "SELECT id, workspace_id, organization_id, provider, is_enabled, bot_username FROM integrations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row_to_integration(&row)?)),
            None => {
                debug!("集成不存在: ID {}", id);
                Ok(None)
            }
        }
    }
}
