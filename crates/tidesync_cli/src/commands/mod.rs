//! CLI command implementations.

pub mod cursors;
pub mod order;
pub mod plan;
pub mod schema;
