//! MCP gateway for Rust.
//!
//! This is the front door of the gateway workspace. It re-exports the
//! pieces an application touches:
//! - [`Server`] and [`ServerBuilder`] for registering tools, resources,
//!   and prompts, then serving them over stdio, WebSocket, or HTTP
//! - [`Client`] for calling a gateway from Rust, including streamed
//!   tool output
//! - The [`protocol`] types (JSON-RPC envelopes, MCP method payloads,
//!   the streaming sub-protocol)
//! - The [`transport`] implementations and the capability bits that
//!   gate what each one can carry
//!
//! # Quick start
//!
//! ```no_run
//! use mcpgate::prelude::*;
//!
//! struct AddTool;
//!
//! #[async_trait]
//! impl ToolHandler for AddTool {
//!     fn definition(&self) -> Tool {
//!         Tool {
//!             name: "add_numbers".to_owned(),
//!             description: Some("Adds two numbers".to_owned()),
//!             input_schema: json!({
//!                 "type": "object",
//!                 "properties": {
//!                     "number1": {"type": "number"},
//!                     "number2": {"type": "number"}
//!                 },
//!                 "required": ["number1", "number2"]
//!             }),
//!         }
//!     }
//!
//!     async fn call(&self, _cx: &RequestCx, arguments: Value) -> McpResult<Vec<Content>> {
//!         let a = arguments["number1"].as_f64().unwrap_or(0.0);
//!         let b = arguments["number2"].as_f64().unwrap_or(0.0);
//!         Ok(vec![Content::json(&json!({ "result": a + b }))])
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     Server::new("adder", "1.0.0")
//!         .tool(AddTool)
//!         .instructions("Call add_numbers with two numbers.")
//!         .build()
//!         .run_stdio()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! The same built server can be served over every transport at once:
//! wrap it in an [`std::sync::Arc`] and hand clones to
//! [`Server::serve_ws`] and [`serve_http`].

#![forbid(unsafe_code)]

pub mod testing;

/// MCP protocol types: JSON-RPC envelopes, method payloads, the
/// streaming sub-protocol, and schema validation.
pub use mcpgate_protocol as protocol;

/// Transport implementations (stdio, HTTP, WebSocket, SSE) and the
/// capability bits that describe them.
pub use mcpgate_transport as transport;

pub use mcpgate_client::{Client, ClientSession, StreamHandle, StreamPayload};
pub use mcpgate_core::logging;
pub use mcpgate_core::{
    CancelToken, McpError, McpErrorCode, McpResult, NoOpProgressSink, ProgressSink, RequestCx,
};
pub use mcpgate_server::{
    LoggingConfig, PromptHandler, ResourceHandler, Server, ServerBuilder, ServerNotifier,
    StreamProducer, ToolHandler, UriParams, serve_http,
};

/// Everything a server or client author usually needs, in one import.
///
/// ```
/// use mcpgate::prelude::*;
/// ```
pub mod prelude {
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};

    pub use mcpgate_client::{Client, StreamHandle, StreamPayload};
    pub use mcpgate_core::{CancelToken, McpError, McpErrorCode, McpResult, RequestCx};
    pub use mcpgate_protocol::{
        CallToolResult, ClientInfo, Content, Prompt, PromptArgument, PromptMessage, Resource,
        ResourceContent, ResourceTemplate, Role, Tool,
    };
    pub use mcpgate_server::{
        LoggingConfig, PromptHandler, ResourceHandler, Server, ServerBuilder, StreamProducer,
        ToolHandler, UriParams, serve_http,
    };
    pub use mcpgate_transport::TransportCapabilities;
}
