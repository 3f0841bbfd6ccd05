//! Error types shared across the gateway.
//!
//! Every failure that can cross the wire is an [`McpError`]: a stable
//! numeric code, a short message, and optional free-form detail. Handler
//! code returns `Result<_, McpError>`; the router converts the `Err` arm
//! into a JSON-RPC error object and the process never unwinds across the
//! transport boundary.

use std::fmt;

use serde_json::Value;

/// Stable numeric error codes.
///
/// The first five are the standard JSON-RPC 2.0 codes. The remaining codes
/// live in the server-defined range: `-32001` for session-scoped failures
/// (uninitialized or unknown session), `-32002` for missing resources, and
/// `-32800` for cancelled requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum McpErrorCode {
    /// Malformed wire payload; could not be decoded at all.
    ParseError,
    /// Decoded, but violates the message shape invariants.
    InvalidRequest,
    /// No handler registered, or the handler is filtered out for the
    /// active transport's capabilities.
    MethodNotFound,
    /// Handler-level argument validation failure.
    InvalidParams,
    /// Unexpected failure inside a handler.
    InternalError,
    /// A session-scoped operation referenced an uninitialized, expired,
    /// or unknown session.
    SessionError,
    /// A resource URI did not match any registered resource or template.
    ResourceNotFound,
    /// The request was cancelled before completion.
    RequestCancelled,
}

impl McpErrorCode {
    /// Returns the wire code for this error kind.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::SessionError => -32001,
            Self::ResourceNotFound => -32002,
            Self::RequestCancelled => -32800,
        }
    }

    /// Maps a wire code back to a known error kind, if any.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -32700 => Some(Self::ParseError),
            -32600 => Some(Self::InvalidRequest),
            -32601 => Some(Self::MethodNotFound),
            -32602 => Some(Self::InvalidParams),
            -32603 => Some(Self::InternalError),
            -32001 => Some(Self::SessionError),
            -32002 => Some(Self::ResourceNotFound),
            -32800 => Some(Self::RequestCancelled),
            _ => None,
        }
    }
}

impl From<McpErrorCode> for i32 {
    fn from(code: McpErrorCode) -> Self {
        code.code()
    }
}

impl fmt::Display for McpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::SessionError => "Session error",
            Self::ResourceNotFound => "Resource not found",
            Self::RequestCancelled => "Request cancelled",
        };
        write!(f, "{name}")
    }
}

/// A protocol-level error with a stable code, message, and optional detail.
#[derive(Debug, Clone, PartialEq)]
pub struct McpError {
    /// Error kind (determines the wire code).
    pub code: McpErrorCode,
    /// Short human-readable message.
    pub message: String,
    /// Optional structured detail, passed through to the wire.
    pub data: Option<Value>,
}

impl McpError {
    /// Creates a new error with the given code and message.
    #[must_use]
    pub fn new(code: McpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured detail to the error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Malformed payload that could not be decoded.
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::ParseError, message)
    }

    /// Decoded payload that violates the message shape invariants.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::InvalidRequest, message)
    }

    /// No handler for the method (or it is unavailable on this transport).
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            McpErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    /// Argument validation failure with handler-supplied detail.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::InvalidParams, message)
    }

    /// Unexpected failure inside a handler.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::InternalError, message)
    }

    /// Session-scoped failure (uninitialized or unknown session).
    #[must_use]
    pub fn session_error(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::SessionError, message)
    }

    /// Unknown resource URI.
    #[must_use]
    pub fn resource_not_found(uri: &str) -> Self {
        Self::new(
            McpErrorCode::ResourceNotFound,
            format!("Resource not found: {uri}"),
        )
    }

    /// The request was cancelled.
    #[must_use]
    pub fn request_cancelled() -> Self {
        Self::new(McpErrorCode::RequestCancelled, "Request cancelled")
    }
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl std::error::Error for McpError {}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal_error(format!("JSON serialization failed: {err}"))
    }
}

/// Result alias used throughout the gateway.
pub type McpResult<T> = Result<T, McpError>;
