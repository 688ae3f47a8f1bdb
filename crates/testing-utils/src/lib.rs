//! # Relay Testing Utils
//!
//! Shared testing utilities for the relay workspace: an in-memory
//! transactional store, an in-memory consumer-group stream, mocks for the
//! external collaborators, entity builders and container helpers.
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! relay-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod containers;
pub mod helpers;
pub mod mocks;
pub mod store;
pub mod stream;

pub use builders::*;
pub use containers::*;
pub use helpers::*;
pub use mocks::*;
pub use store::*;
pub use stream::*;
