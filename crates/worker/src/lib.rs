//! Relay Worker
//!
//! 消费任务流：议题消息走认领-处理-完成事务，工作区任务走状态跟踪执行器，
//! 失败按重试/死信策略处理，回收器负责超时未确认的条目。

pub mod dispatcher;
pub mod handler;
pub mod reclaimer;
pub mod worker;
pub mod workspace_tasks;

pub use dispatcher::TaskDispatcher;
pub use handler::{HandleOutcome, IssueMessageHandler};
pub use reclaimer::Reclaimer;
pub use worker::Worker;
pub use workspace_tasks::WorkspaceTaskRunner;
