pub mod pg;
pub mod pool;

pub use pg::{PgIntegrationStore, PgStoreTransaction, PgTransactionManager};
pub use pool::{create_pool, run_migrations};
