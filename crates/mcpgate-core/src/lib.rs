//! Core types shared by every mcpgate crate.
//!
//! This crate provides the fundamental building blocks:
//! - [`RequestCx`] carrying request identity, cancellation, and progress
//! - Error types for gateway operations
//! - The `log`-backed logging facade with hierarchical targets
//!
//! # Design Principles
//!
//! - Explicit `Result` propagation, no panics on peer input
//! - All types support `Send + Sync`
//! - Cancel-correct handlers via cooperative checkpoints

#![forbid(unsafe_code)]

mod context;
mod error;
pub mod logging;

pub use context::{CancelToken, NoOpProgressSink, ProgressSink, RequestCx};
pub use error::{McpError, McpErrorCode, McpResult};
