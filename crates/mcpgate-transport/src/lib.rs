//! Transport layer for the MCP gateway.
//!
//! A [`Transport`] moves complete JSON-RPC messages (and, where the
//! underlying protocol allows it, raw binary stream frames) between two
//! endpoints. The correlation engine and the server dispatch loop are
//! written against the trait alone; the four implementations differ only
//! in framing and directionality:
//!
//! - [`StdioTransport`]: newline-delimited JSON over a pair of byte
//!   streams. Full duplex, text only.
//! - [`HttpTransport`]: one HTTP POST per outgoing message; the response
//!   body (if any) is queued for [`Transport::recv`]. Request/response
//!   only, the server can never push.
//! - [`WsTransport`]: one WebSocket frame per message; binary frames
//!   carry the 24-byte chunk header. Full duplex, text and binary.
//! - [`SseTransport`]: POST for outgoing messages plus a long-lived
//!   `text/event-stream` GET for server-initiated ones. Full duplex for
//!   notifications, text only.
//!
//! Every inbound payload, on every transport, is decoded through the
//! strict wire validator in `mcpgate-protocol`, so identifiers are
//! normalized and malformed messages are rejected at the boundary.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use mcpgate_core::McpError;
use mcpgate_protocol::{BinaryChunkHeader, JsonRpcMessage};

mod caps;
mod codec;
mod http;
mod sse;
mod stdio;
mod websocket;

pub use caps::TransportCapabilities;
pub use codec::{Codec, CodecError};
pub use http::{HttpTransport, HttpTransportConfig};
pub use sse::{SseDecoder, SseTransport};
pub use stdio::StdioTransport;
pub use websocket::WsTransport;

// ============================================================================
// Events
// ============================================================================

/// One inbound unit delivered by [`Transport::recv`].
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete JSON-RPC message.
    Message(JsonRpcMessage),
    /// A raw binary stream frame: parsed 24-byte header plus payload.
    Binary(BinaryChunkHeader, Vec<u8>),
}

// ============================================================================
// Transport trait
// ============================================================================

/// A bidirectional (or request/response) message channel.
///
/// Implementations are driven by a single owner task: `send` and `recv`
/// both take `&mut self`, and [`Transport::recv`] is cancel safe so the
/// owner can race it against an outbound queue.
#[async_trait]
pub trait Transport: Send {
    /// Establishes the channel. Idempotent; safe to call before the
    /// first send. Transports that are ready at construction time treat
    /// this as a no-op.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Sends one complete message.
    ///
    /// On request/response transports this also performs the receive
    /// half of the exchange: a non-empty response body is decoded and
    /// queued for the next [`Transport::recv`].
    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError>;

    /// Sends one raw binary stream frame (24-byte header + payload).
    ///
    /// Only transports with
    /// [`TransportCapabilities::BINARY_STREAMING`] support this; the
    /// default refuses.
    async fn send_binary(
        &mut self,
        header: &BinaryChunkHeader,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let _ = (header, payload);
        Err(TransportError::Unsupported("binary frames"))
    }

    /// Receives the next inbound event.
    ///
    /// Returns `Ok(None)` when the transport has closed cleanly;
    /// repeated calls form the receive loop. Cancel safe: dropping the
    /// returned future loses no inbound data.
    async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError>;

    /// Closes the transport. Further sends fail; `recv` drains anything
    /// already queued and then reports closure.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// The capability flags this transport provides.
    fn capabilities(&self) -> TransportCapabilities;

    /// Whether the remote side can originate messages at any time.
    fn is_bidirectional(&self) -> bool {
        self.capabilities()
            .contains(TransportCapabilities::FULL_DUPLEX)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Transport-level failures.
#[derive(Debug)]
pub enum TransportError {
    /// Underlying I/O failure.
    Io(std::io::Error),
    /// Framing or wire-validation failure.
    Codec(CodecError),
    /// HTTP request failure.
    Http(reqwest::Error),
    /// WebSocket protocol failure.
    WebSocket(tokio_tungstenite::tungstenite::Error),
    /// The transport has closed; no further traffic is possible.
    Closed,
    /// The operation is not supported by this transport.
    Unsupported(&'static str),
    /// The peer violated the transport protocol.
    Protocol(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "I/O error: {e}"),
            TransportError::Codec(e) => write!(f, "codec error: {e}"),
            TransportError::Http(e) => write!(f, "HTTP error: {e}"),
            TransportError::WebSocket(e) => write!(f, "WebSocket error: {e}"),
            TransportError::Closed => write!(f, "transport closed"),
            TransportError::Unsupported(what) => {
                write!(f, "transport does not support {what}")
            }
            TransportError::Protocol(msg) => write!(f, "transport protocol error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            TransportError::Codec(e) => Some(e),
            TransportError::Http(e) => Some(e),
            TransportError::WebSocket(e) => Some(e),
            TransportError::Closed
            | TransportError::Unsupported(_)
            | TransportError::Protocol(_) => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err)
    }
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        TransportError::Codec(err)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Http(err)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(err)
    }
}

/// Transport failures surface to callers as internal protocol errors.
impl From<TransportError> for McpError {
    fn from(err: TransportError) -> Self {
        McpError::internal_error(format!("transport failure: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpgate_core::McpErrorCode;

    /// Transport that accepts everything and never produces input.
    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn connect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send(&mut self, _message: &JsonRpcMessage) -> Result<(), TransportError> {
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError> {
            Ok(None)
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn capabilities(&self) -> TransportCapabilities {
            TransportCapabilities::STANDARD
        }
    }

    #[tokio::test]
    async fn test_default_send_binary_refuses() {
        let mut transport = NullTransport;
        let header = BinaryChunkHeader::new(mcpgate_protocol::StreamId::from_bytes([7; 16]), 0);
        let result = transport.send_binary(&header, b"payload").await;
        assert!(matches!(result, Err(TransportError::Unsupported(_))));
    }

    #[test]
    fn test_default_bidirectional_follows_duplex_bit() {
        let transport = NullTransport;
        assert!(!transport.is_bidirectional());
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Closed.to_string(), "transport closed");
        let err = TransportError::Unsupported("binary frames");
        assert!(err.to_string().contains("binary frames"));
        let err = TransportError::Protocol("bad frame".to_string());
        assert!(err.to_string().contains("bad frame"));
    }

    #[test]
    fn test_transport_error_maps_to_internal() {
        let err = McpError::from(TransportError::Closed);
        assert_eq!(err.code, McpErrorCode::InternalError);
        assert!(err.message.contains("transport closed"));
    }
}
