use relay_core::{DatabaseConfig, RelayError, RelayResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// 按配置创建PostgreSQL连接池
pub async fn create_pool(config: &DatabaseConfig) -> RelayResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(config.idle_timeout())
        .connect(&config.url)
        .await?;

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database pool created"
    );
    Ok(pool)
}

/// 执行内置的数据库迁移
pub async fn run_migrations(pool: &PgPool) -> RelayResult<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| RelayError::DatabaseOperation(format!("数据库迁移失败: {e}")))?;
    info!("Database migrations applied");
    Ok(())
}
