//! HTTP request/response transport.
//!
//! Each outgoing message is one `POST` to the gateway endpoint. The
//! response body, when the server sends one, is decoded immediately and
//! queued for [`Transport::recv`], so the correlation engine sees the
//! same send/receive split as on a duplex transport. `202 Accepted`,
//! `204 No Content`, and empty bodies mean "no response" and are valid
//! for notifications.
//!
//! The server may assign a session during `initialize` via the
//! `mcp-session-id` response header; the transport captures it and
//! replays it on every later request. The server can never push
//! unsolicited messages here, so `is_bidirectional` is false.

use std::time::Duration;

use async_trait::async_trait;
use mcpgate_core::logging::targets;
use mcpgate_protocol::{JsonRpcMessage, PROTOCOL_VERSION};
use reqwest::StatusCode;
use tokio::sync::mpsc;

use crate::{CodecError, Transport, TransportCapabilities, TransportError, TransportEvent};

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Endpoint URL that receives every POST.
    pub endpoint: String,
    /// Value for the `mcp-protocol-version` request header.
    pub protocol_version: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Session to resume, if any. Normally assigned by the server.
    pub session_id: Option<String>,
}

impl HttpTransportConfig {
    /// Creates a config with default version and a 30 second timeout.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            timeout: Duration::from_secs(30),
            session_id: None,
        }
    }
}

/// Client-side transport over plain HTTP POST exchanges.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    protocol_version: String,
    session_id: Option<String>,
    /// Queue feeding `recv`; `None` once closed.
    incoming_tx: Option<mpsc::UnboundedSender<JsonRpcMessage>>,
    incoming_rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
}

impl HttpTransport {
    /// Creates a transport for the given endpoint with default settings.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_config(HttpTransportConfig::new(endpoint))
    }

    /// Creates a transport from an explicit configuration.
    pub fn with_config(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Ok(Self {
            client,
            endpoint: config.endpoint,
            protocol_version: config.protocol_version,
            session_id: config.session_id,
            incoming_tx: Some(incoming_tx),
            incoming_rx,
        })
    }

    /// The session assigned by the server, once one exists.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Sender feeding the incoming queue, used by the SSE listener to
    /// merge server-pushed messages into the same `recv` sequence.
    pub(crate) fn incoming_sender(&self) -> Option<mpsc::UnboundedSender<JsonRpcMessage>> {
        self.incoming_tx.clone()
    }

    pub(crate) fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POSTs one message and queues the decoded response body, if any.
    async fn exchange(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let Some(incoming_tx) = self.incoming_tx.clone() else {
            return Err(TransportError::Closed);
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("accept", "application/json")
            .header("mcp-protocol-version", &self.protocol_version)
            .json(message);
        if let Some(sid) = &self.session_id {
            request = request.header("mcp-session-id", sid);
        }

        let response = request.send().await?;
        let status = response.status();
        if let Some(sid) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|h| h.to_str().ok())
        {
            self.session_id = Some(sid.to_string());
        }

        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(());
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            if status.is_success() {
                return Ok(());
            }
            return Err(TransportError::Protocol(format!("HTTP status {status}")));
        }

        // Error statuses still carry JSON-RPC error bodies; a body that
        // fails wire validation on a failed exchange is reported as the
        // HTTP failure, not as a decode failure.
        match JsonRpcMessage::decode(&body) {
            Ok(msg) => {
                log::trace!(
                    target: targets::TRANSPORT,
                    "http exchange queued response ({} bytes)",
                    body.len()
                );
                let _ = incoming_tx.send(msg);
                Ok(())
            }
            Err(e) if status.is_success() => Err(TransportError::Codec(CodecError::Decode(e))),
            Err(_) => Err(TransportError::Protocol(format!("HTTP status {status}"))),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        // Stateless: every exchange opens its own connection.
        log::debug!(target: targets::TRANSPORT, "http transport ready: {}", self.endpoint);
        Ok(())
    }

    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        self.exchange(message).await
    }

    async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError> {
        // Pends until a send queues a response or the transport closes.
        match self.incoming_rx.recv().await {
            Some(msg) => Ok(Some(TransportEvent::Message(msg))),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.incoming_tx = None;
        Ok(())
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::STANDARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpgate_protocol::{JsonRpcRequest, RequestId};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn canned_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut out = format!(
            "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n",
            body.len()
        );
        for (name, value) in headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.push_str(body);
        out
    }

    /// Serves exactly one connection with a fixed response.
    async fn spawn_responder(response: String) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut total = 0;
            loop {
                let n = socket.read(&mut buf[total..]).await.unwrap();
                total += n;
                if n == 0 || buf[..total].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        addr
    }

    fn request_message() -> JsonRpcMessage {
        JsonRpcMessage::from(JsonRpcRequest::new("ping", None, 1i64))
    }

    #[test]
    fn test_config_defaults() {
        let config = HttpTransportConfig::new("http://localhost/mcp");
        assert_eq!(config.endpoint, "http://localhost/mcp");
        assert_eq!(config.protocol_version, PROTOCOL_VERSION);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.session_id.is_none());
    }

    #[tokio::test]
    async fn test_response_body_queued_and_session_captured() {
        let body = "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}";
        let addr = spawn_responder(canned_response(
            "200 OK",
            &[
                ("content-type", "application/json"),
                ("mcp-session-id", "sess-42"),
            ],
            body,
        ))
        .await;

        let mut transport = HttpTransport::new(format!("http://{addr}/mcp")).unwrap();
        transport.send(&request_message()).await.unwrap();

        assert_eq!(transport.session_id(), Some("sess-42"));

        let event = transport.recv().await.unwrap().unwrap();
        let TransportEvent::Message(JsonRpcMessage::Response(resp)) = event else {
            panic!("expected queued response");
        };
        assert_eq!(resp.id, Some(RequestId::Number(1)));
    }

    #[tokio::test]
    async fn test_no_content_queues_nothing() {
        let addr = spawn_responder(canned_response("204 No Content", &[], "")).await;

        let mut transport = HttpTransport::new(format!("http://{addr}/mcp")).unwrap();
        transport.send(&request_message()).await.unwrap();
        transport.close().await.unwrap();

        // Nothing was queued, so the closed channel reports end of input.
        assert!(transport.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_error_status_with_json_rpc_body_is_queued() {
        let body =
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"error\":{\"code\":-32001,\"message\":\"Session error\"}}";
        let addr = spawn_responder(canned_response(
            "400 Bad Request",
            &[("content-type", "application/json")],
            body,
        ))
        .await;

        let mut transport = HttpTransport::new(format!("http://{addr}/mcp")).unwrap();
        transport.send(&request_message()).await.unwrap();

        let event = transport.recv().await.unwrap().unwrap();
        let TransportEvent::Message(JsonRpcMessage::Response(resp)) = event else {
            panic!("expected queued error response");
        };
        assert!(resp.is_error());
    }

    #[tokio::test]
    async fn test_error_status_without_body_is_protocol_error() {
        let addr = spawn_responder(canned_response("502 Bad Gateway", &[], "")).await;

        let mut transport = HttpTransport::new(format!("http://{addr}/mcp")).unwrap();
        let result = transport.send(&request_message()).await;
        assert!(matches!(result, Err(TransportError::Protocol(msg)) if msg.contains("502")));
    }

    #[tokio::test]
    async fn test_garbage_success_body_is_decode_error() {
        let addr = spawn_responder(canned_response("200 OK", &[], "not json")).await;

        let mut transport = HttpTransport::new(format!("http://{addr}/mcp")).unwrap();
        let result = transport.send(&request_message()).await;
        assert!(matches!(
            result,
            Err(TransportError::Codec(CodecError::Decode(_)))
        ));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let mut transport = HttpTransport::new("http://127.0.0.1:9/mcp").unwrap();
        transport.close().await.unwrap();
        let result = transport.send(&request_message()).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_capabilities_request_response_only() {
        let transport = HttpTransport::new("http://localhost/mcp").unwrap();
        assert_eq!(transport.capabilities(), TransportCapabilities::STANDARD);
        assert!(!transport.is_bidirectional());
    }
}
