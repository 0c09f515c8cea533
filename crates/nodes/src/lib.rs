//! `nodes` crate — the `NodeExecutor` trait and built-in node executors.
//!
//! Every node kind — built-in and external alike — is dispatched through
//! [`NodeExecutor`]. The engine crate drives execution through this trait
//! object and never looks inside an executor.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;

pub use error::NodeError;
pub use registry::NodeRegistry;
pub use traits::{ExecutionContext, NodeExecutor, SELECTED_BRANCH_KEY};
