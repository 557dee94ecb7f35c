//! Core types and error definitions for the Toolgate crates.
//!
//! This crate provides the foundational types shared across the workspace:
//! the unified error taxonomy for MCP connections and the tool call
//! abstractions the host agent invokes.
//!
//! # Main types
//!
//! - [`ToolgateError`]: Unified error enum (config, SSRF, connection, tool).
//! - [`ToolgateResult`]: Convenience alias for `Result<T, ToolgateError>`.
//! - [`ToolCall`]: A tool invocation request from the host agent.
//! - [`ToolResult`]: The result returned after executing a tool call.
//! - [`ToolErrorKind`]: Classification of a failed tool result.

pub mod error;
pub mod tool;

pub use error::{ToolgateError, ToolgateResult};
pub use tool::{ToolCall, ToolErrorKind, ToolResult};
