//! MCP protocol types and JSON-RPC implementation.
//!
//! This crate provides:
//! - JSON-RPC 2.0 message types with strict envelope validation
//! - MCP-specific method types (tools, resources, prompts)
//! - Protocol version negotiation constants
//! - The streaming sub-protocol (Start/Chunk/Done/Error plus binary
//!   frame headers)
//! - JSON Schema validation for tool arguments
//!
//! # Wire Format
//!
//! Messages are JSON objects; transports decide the outer framing
//! (newline-delimited on stdio, one body per HTTP exchange, one frame
//! per WebSocket message). Binary stream chunks bypass JSON entirely
//! and travel as raw frames with a fixed 24-byte header.

#![forbid(unsafe_code)]

mod jsonrpc;
mod messages;
pub mod schema;
mod stream;
mod types;

pub use jsonrpc::{
    DecodeError, JSONRPC_VERSION, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
    RequestId,
};
pub use messages::*;
pub use schema::{ValidationError, ValidationResult, validate};
pub use stream::{
    BinaryChunkHeader, STREAM_MESSAGE_METHOD, StreamChunk, StreamDone, StreamError, StreamId,
    StreamMessage, StreamProtocolError, StreamStart, StreamStateMachine,
};
pub use types::*;
