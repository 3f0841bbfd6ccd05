//! HTTP + Server-Sent Events transport.
//!
//! Outgoing messages travel as HTTP POSTs exactly like
//! [`HttpTransport`]; an auxiliary long-lived GET with
//! `accept: text/event-stream` delivers server-initiated messages out of
//! band. Both sources merge into one incoming queue, so
//! [`Transport::recv`] sees a single ordered sequence.
//!
//! The event stream is keyed by session, so it opens lazily: once the
//! server has assigned an `mcp-session-id` (normally in its `initialize`
//! response), the next send or connect starts the listener. The server
//! can push notifications and stream fragments over it but still cannot
//! round-trip requests of its own, so the transport is full duplex for
//! delivery while remaining text only.

use async_trait::async_trait;
use futures_util::StreamExt;
use mcpgate_core::logging::targets;
use mcpgate_protocol::JsonRpcMessage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::http::{HttpTransport, HttpTransportConfig};
use crate::{Transport, TransportCapabilities, TransportError, TransportEvent};

// ============================================================================
// SSE decoding
// ============================================================================

/// Incremental decoder for `text/event-stream` bodies.
///
/// Only `data:` fields matter to the gateway; each blank-line-delimited
/// event becomes one payload string (multi-line data joined with `\n`).
/// Comments and other fields are ignored. Input is buffered bytewise so
/// chunk boundaries may fall anywhere, including inside a UTF-8
/// sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Partial line carried across feeds.
    partial: Vec<u8>,
    /// `data:` lines of the event being assembled.
    data_lines: Vec<String>,
}

impl SseDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of the stream, returning completed event payloads.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let line = std::mem::take(&mut self.partial);
                let line = String::from_utf8_lossy(&line).into_owned();
                if let Some(event) = self.absorb_line(&line) {
                    out.push(event);
                }
            } else {
                self.partial.push(byte);
            }
        }
        out
    }

    /// Flushes a trailing event that was not blank-line terminated.
    pub fn finish(&mut self) -> Option<String> {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            let line = String::from_utf8_lossy(&line).into_owned();
            // A dangling data line still belongs to the final event.
            let _ = self.absorb_line(&line);
        }
        if self.data_lines.is_empty() {
            None
        } else {
            let event = self.data_lines.join("\n");
            self.data_lines.clear();
            Some(event)
        }
    }

    fn absorb_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end_matches('\r');

        if line.is_empty() {
            if self.data_lines.is_empty() {
                return None;
            }
            let event = self.data_lines.join("\n");
            self.data_lines.clear();
            return Some(event);
        }

        // Comments and unknown fields are ignored.
        if line.starts_with(':') {
            return None;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data_lines.push(rest.trim_start().to_string());
        }
        None
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Client-side transport pairing HTTP POSTs with an SSE event stream.
pub struct SseTransport {
    http: HttpTransport,
    listener: Option<JoinHandle<()>>,
}

impl SseTransport {
    /// Creates a transport for the given endpoint with default settings.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_config(HttpTransportConfig::new(endpoint))
    }

    /// Creates a transport from an explicit configuration.
    pub fn with_config(config: HttpTransportConfig) -> Result<Self, TransportError> {
        Ok(Self {
            http: HttpTransport::with_config(config)?,
            listener: None,
        })
    }

    /// The session assigned by the server, once one exists.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.http.session_id()
    }

    /// Starts the event-stream listener if a session exists and it is
    /// not already running.
    fn spawn_listener_if_ready(&mut self) {
        if self.listener.is_some() {
            return;
        }
        let Some(session_id) = self.http.session_id().map(str::to_string) else {
            return;
        };
        let Some(incoming_tx) = self.http.incoming_sender() else {
            return;
        };
        let endpoint = self.http.endpoint().to_string();
        let protocol_version = self.http.protocol_version().to_string();
        self.listener = Some(tokio::spawn(run_listener(
            endpoint,
            protocol_version,
            session_id,
            incoming_tx,
        )));
    }
}

/// Consumes one `text/event-stream` GET, pushing every decoded message
/// into the incoming queue. Ends when the stream or the queue closes.
async fn run_listener(
    endpoint: String,
    protocol_version: String,
    session_id: String,
    incoming_tx: mpsc::UnboundedSender<JsonRpcMessage>,
) {
    // The POST client carries a per-request timeout that would cut a
    // long-lived stream short, so the listener gets its own client.
    let client = match reqwest::Client::builder().build() {
        Ok(client) => client,
        Err(e) => {
            log::warn!(target: targets::TRANSPORT, "sse client build failed: {e}");
            return;
        }
    };
    let request = client
        .get(&endpoint)
        .header("accept", "text/event-stream")
        .header("mcp-protocol-version", &protocol_version)
        .header("mcp-session-id", &session_id);
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            log::warn!(target: targets::TRANSPORT, "sse stream failed to open: {e}");
            return;
        }
    };
    if !response.status().is_success() {
        log::warn!(
            target: targets::TRANSPORT,
            "sse stream refused: HTTP {}",
            response.status()
        );
        return;
    }

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                log::warn!(target: targets::TRANSPORT, "sse stream read failed: {e}");
                break;
            }
        };
        for event in decoder.feed(&chunk) {
            match JsonRpcMessage::decode(event.as_bytes()) {
                Ok(msg) => {
                    if incoming_tx.send(msg).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    log::warn!(target: targets::TRANSPORT, "sse event failed validation: {e}");
                }
            }
        }
    }
    if let Some(event) = decoder.finish() {
        if let Ok(msg) = JsonRpcMessage::decode(event.as_bytes()) {
            let _ = incoming_tx.send(msg);
        }
    }
    log::debug!(target: targets::TRANSPORT, "sse stream ended");
}

#[async_trait]
impl Transport for SseTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.spawn_listener_if_ready();
        Ok(())
    }

    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        self.http.send(message).await?;
        // The initialize exchange may just have assigned the session.
        self.spawn_listener_if_ready();
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError> {
        self.http.recv().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.http.close().await
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::STANDARD
            | TransportCapabilities::TEXT_STREAMING
            | TransportCapabilities::FULL_DUPLEX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpgate_protocol::{JsonRpcRequest, RequestId};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // ------------------------------------------------------------------
    // Decoder
    // ------------------------------------------------------------------

    #[test]
    fn test_decodes_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"event: message\ndata: {\"jsonrpc\":\"2.0\"}\n\n");
        assert_eq!(events, vec!["{\"jsonrpc\":\"2.0\"}"]);
    }

    #[test]
    fn test_joins_multiline_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: a\ndata: b\n\n");
        assert_eq!(events, vec!["a\nb"]);
    }

    #[test]
    fn test_ignores_comments_and_crlf() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keepalive\r\ndata: x\r\n\r\n");
        assert_eq!(events, vec!["x"]);
    }

    #[test]
    fn test_event_split_across_feeds() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"da").is_empty());
        assert!(decoder.feed(b"ta: par").is_empty());
        let events = decoder.feed(b"tial\n\n");
        assert_eq!(events, vec!["partial"]);
    }

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: one\n\ndata: two\n\n");
        assert_eq!(events, vec!["one", "two"]);
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), Some("tail".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

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

    async fn read_head(socket: &mut tokio::net::TcpStream) -> Vec<u8> {
        let mut buf = vec![0u8; 8192];
        let mut total = 0;
        loop {
            let n = socket.read(&mut buf[total..]).await.unwrap();
            total += n;
            if n == 0 || buf[..total].windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        buf.truncate(total);
        buf
    }

    #[tokio::test]
    async fn test_listener_merges_server_events_into_recv() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            // First connection: the POST exchange assigns a session.
            let (mut socket, _) = listener.accept().await.unwrap();
            let head = read_head(&mut socket).await;
            assert!(head.starts_with(b"POST"));
            let body = "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}";
            socket
                .write_all(
                    canned_response(
                        "200 OK",
                        &[
                            ("content-type", "application/json"),
                            ("mcp-session-id", "sess-7"),
                        ],
                        body,
                    )
                    .as_bytes(),
                )
                .await
                .unwrap();
            socket.shutdown().await.unwrap();

            // Second connection: the event-stream GET for that session.
            let (mut socket, _) = listener.accept().await.unwrap();
            let head = read_head(&mut socket).await;
            assert!(head.starts_with(b"GET"));
            assert!(
                String::from_utf8_lossy(&head)
                    .to_ascii_lowercase()
                    .contains("mcp-session-id: sess-7")
            );
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
                )
                .await
                .unwrap();
            socket
                .write_all(
                    b"data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/resources/updated\",\"params\":{\"uri\":\"memo://x\"}}\n\n",
                )
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let mut transport = SseTransport::new(format!("http://{addr}/mcp")).unwrap();
        transport.connect().await.unwrap();

        let init = JsonRpcMessage::from(JsonRpcRequest::new("initialize", None, 1i64));
        transport.send(&init).await.unwrap();
        assert_eq!(transport.session_id(), Some("sess-7"));

        // POST response first, then the pushed notification.
        let event = transport.recv().await.unwrap().unwrap();
        let TransportEvent::Message(JsonRpcMessage::Response(resp)) = event else {
            panic!("expected the POST response first");
        };
        assert_eq!(resp.id, Some(RequestId::Number(1)));

        let event = transport.recv().await.unwrap().unwrap();
        let TransportEvent::Message(JsonRpcMessage::Request(notif)) = event else {
            panic!("expected the pushed notification");
        };
        assert_eq!(notif.method, "notifications/resources/updated");
        assert!(notif.is_notification());

        server.await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_listener_without_session() {
        let mut transport = SseTransport::new("http://127.0.0.1:9/mcp").unwrap();
        transport.connect().await.unwrap();
        assert!(transport.listener.is_none());
    }

    #[tokio::test]
    async fn test_capabilities_text_duplex() {
        let transport = SseTransport::new("http://localhost/mcp").unwrap();
        let caps = transport.capabilities();
        assert!(caps.contains(TransportCapabilities::TEXT_STREAMING));
        assert!(caps.contains(TransportCapabilities::FULL_DUPLEX));
        assert!(!caps.contains(TransportCapabilities::BINARY_STREAMING));
        assert!(transport.is_bidirectional());
    }
}
