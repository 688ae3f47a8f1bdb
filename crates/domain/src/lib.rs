pub mod entities;
pub mod id;
pub mod messaging;
pub mod repositories;
pub mod services;
pub mod sqlx_impls;
pub mod task_message;

pub use entities::*;
pub use id::{IdGenerator, MAX_NODE_ID};
pub use messaging::*;
pub use relay_core::{RelayError, RelayResult};
pub use repositories::*;
pub use services::*;
pub use task_message::*;
