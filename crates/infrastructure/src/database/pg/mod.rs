//! PostgreSQL实现
//!
//! 所有议题状态流转都是带前置条件的单条UPDATE，行锁保证同一议题上的并发写入串行化。

mod integration_store;
mod mapping;
mod transaction;

pub use integration_store::PgIntegrationStore;
pub use transaction::{PgStoreTransaction, PgTransactionManager};
