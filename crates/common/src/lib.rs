//! Common types shared across Scriptorium crates.
//!
//! This crate holds the identifiers, enums and error taxonomy that the
//! completion layer, the pipeline builder and the HTTP surface all speak.

pub mod error;
pub mod task;
pub mod types;

pub use error::{ConfigError, Result, ScriptoriumError};
pub use task::{TaskStatus, WorkflowMode, now_millis};
pub use types::{AgentId, Provider, Role};
