use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use relay_core::{AppConfig, ReclaimerConfig, RelayResult};
use relay_domain::{
    EngagementDetector, EventLog, IdGenerator, Issue, IssueProcessor, IssueReadiness,
    MessageConsumer, MessageProcessor, PendingClaimer, Producer, TransactionManager,
    WorkspaceTaskExecutor,
};
use relay_infrastructure::{
    create_pool, run_migrations, PgIntegrationStore, PgTransactionManager, RedisConnectionManager,
    RedisConsumer, RedisPendingClaimer, RedisProducer, RedisStreamMetrics, RedisStreamOperations,
};
use relay_ingest::EventIngestService;
use relay_worker::{IssueMessageHandler, Reclaimer, TaskDispatcher, Worker, WorkspaceTaskRunner};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::shutdown::ShutdownManager;

/// 引擎之外的协作者
///
/// 议题处理器（LLM流水线）、就绪检查与工作区任务执行器由嵌入方提供。
pub struct Collaborators {
    pub processor: Arc<dyn IssueProcessor>,
    pub readiness: Option<Arc<dyn IssueReadiness>>,
    pub workspace_executor: Option<Arc<dyn WorkspaceTaskExecutor>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            processor: Arc::new(LoggingIssueProcessor),
            readiness: None,
            workspace_executor: None,
        }
    }
}

/// 未接入处理流水线时的处理器，只记录收到的批次
pub struct LoggingIssueProcessor;

#[async_trait]
impl IssueProcessor for LoggingIssueProcessor {
    async fn process(&self, issue: &Issue, events: &[EventLog]) -> RelayResult<Option<Issue>> {
        warn!(
            issue_id = issue.id,
            events = events.len(),
            "no issue processor configured, marking batch processed without changes"
        );
        Ok(None)
    }
}

/// 组装任务分发器
pub fn build_dispatcher(
    config: &AppConfig,
    transactions: Arc<dyn TransactionManager>,
    consumer: Arc<dyn MessageConsumer>,
    producer: Arc<dyn Producer>,
    ids: Arc<IdGenerator>,
    collaborators: Collaborators,
) -> TaskDispatcher {
    let mut handler = IssueMessageHandler::new(
        transactions.clone(),
        collaborators.processor,
        consumer.clone(),
        producer,
        ids,
        config.worker.max_processing_iterations,
    );
    if let Some(readiness) = collaborators.readiness {
        handler = handler.with_readiness(readiness);
    }

    let mut dispatcher = TaskDispatcher::new(
        handler,
        consumer.clone(),
        transactions.clone(),
        config.stream.max_attempts,
    );
    if let Some(executor) = collaborators.workspace_executor {
        dispatcher =
            dispatcher.with_workspace_tasks(WorkspaceTaskRunner::new(transactions, executor, consumer));
    }
    dispatcher
}

/// 启动Worker主循环与回收器
pub fn spawn_components(
    shutdown: &mut ShutdownManager,
    config: &AppConfig,
    consumer: Arc<dyn MessageConsumer>,
    claimer: Arc<dyn PendingClaimer>,
    processor: Arc<dyn MessageProcessor>,
) {
    let worker = Worker::new(
        consumer,
        processor.clone(),
        config.worker.read_error_backoff(),
    );
    shutdown.spawn("worker", move |token| async move { worker.run(token).await });

    let reclaimer = Reclaimer::new(claimer, processor, config.reclaimer.clone());
    shutdown.spawn("reclaimer", move |token| async move {
        reclaimer.run(token).await
    });
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    pool: PgPool,
    consumer: Arc<RedisConsumer>,
    producer: Arc<RedisProducer>,
    claimer: Arc<RedisPendingClaimer>,
    dispatcher: Arc<TaskDispatcher>,
    metrics: Arc<RedisStreamMetrics>,
    ids: Arc<IdGenerator>,
}

impl Application {
    /// 连接数据库与Redis、执行迁移并组装各组件
    pub async fn new(config: AppConfig, collaborators: Collaborators) -> Result<Self> {
        info!(
            stream = %config.stream.stream,
            group = %config.stream.group,
            consumer = %config.stream.consumer,
            node_id = config.worker.node_id,
            "初始化应用程序"
        );

        let pool = create_pool(&config.database)
            .await
            .context("创建数据库连接池失败")?;
        run_migrations(&pool).await.context("执行数据库迁移失败")?;

        // 阻塞读取独占一条连接，其余命令共用另一条
        let metrics = Arc::new(RedisStreamMetrics::default());
        let reader = RedisConnectionManager::connect_for_blocking(
            config.redis.clone(),
            metrics.clone(),
            config.stream.block(),
        )
        .await
        .context("连接Redis失败（读取连接）")?;
        let writer = RedisConnectionManager::connect(config.redis.clone(), metrics.clone())
            .await
            .context("连接Redis失败（写入连接）")?;
        let reader = Arc::new(RedisStreamOperations::new(Arc::new(reader)));
        let writer = Arc::new(RedisStreamOperations::new(Arc::new(writer)));

        let consumer = Arc::new(
            RedisConsumer::new(reader, writer.clone(), config.stream.clone())
                .await
                .context("创建消费者组失败")?,
        );
        let producer = Arc::new(RedisProducer::new(writer.clone(), config.stream.stream.clone()));
        let claimer = Arc::new(RedisPendingClaimer::new(
            writer,
            config.stream.stream.clone(),
            config.stream.group.clone(),
            ReclaimerConfig::consumer_name(&config.stream),
        ));

        // 接入服务与Worker共用同一生成器，节点号区分共享数据库的进程
        let ids = Arc::new(
            IdGenerator::with_node(config.worker.node_id).context("创建ID生成器失败")?,
        );
        let dispatcher = Arc::new(build_dispatcher(
            &config,
            Arc::new(PgTransactionManager::new(pool.clone())),
            consumer.clone(),
            producer.clone(),
            ids.clone(),
            collaborators,
        ));

        Ok(Self {
            config,
            pool,
            consumer,
            producer,
            claimer,
            dispatcher,
            metrics,
            ids,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn producer(&self) -> Arc<dyn Producer> {
        self.producer.clone()
    }

    pub fn metrics(&self) -> Arc<RedisStreamMetrics> {
        self.metrics.clone()
    }

    /// 与Worker共享数据库与生产者的事件接入服务，供嵌入方的webhook层调用
    ///
    /// 议题跟踪系统客户端通过[`EventIngestService::with_tracker`]注册。
    pub fn event_ingest(&self, engagement: Arc<dyn EngagementDetector>) -> EventIngestService {
        EventIngestService::new(
            Arc::new(PgTransactionManager::new(self.pool.clone())),
            Arc::new(PgIntegrationStore::new(self.pool.clone())),
            engagement,
            self.producer.clone(),
            self.ids.clone(),
        )
    }

    /// 在`shutdown`下启动所有后台组件
    pub fn start(&self, shutdown: &mut ShutdownManager) {
        spawn_components(
            shutdown,
            &self.config,
            self.consumer.clone(),
            self.claimer.clone(),
            self.dispatcher.clone(),
        );
        info!(
            reclaimer = %ReclaimerConfig::consumer_name(&self.config.stream),
            "Worker与回收器已启动"
        );
    }
}
