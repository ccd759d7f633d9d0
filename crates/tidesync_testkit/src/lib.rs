//! # TideSync Testkit
//!
//! Test utilities for TideSync.
//!
//! This crate provides:
//! - The clinic fixture schema and record builders
//! - Test nodes wiring a store, its hooks and a sync manager together
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use tidesync_engine::MemoryRemote;
//! use tidesync_testkit::prelude::*;
//!
//! let remote = Arc::new(MemoryRemote::new());
//! let node = TestNode::memory("facility-a", clinic_registry(), remote);
//! let report = node.sync();
//! assert!(report.is_clean());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod node;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::node::*;
}

pub use fixtures::*;
pub use generators::*;
pub use node::*;
