//! Outbound queue items and the producer handed to streaming tools.

use mcpgate_core::{McpError, McpResult};
use mcpgate_protocol::{
    BinaryChunkHeader, JsonRpcMessage, JsonRpcRequest, RequestId, STREAM_MESSAGE_METHOD, StreamId,
    StreamMessage, StreamStart,
};
use mcpgate_transport::TransportCapabilities;
use serde_json::Value;
use tokio::sync::mpsc;

// ============================================================================
// Outbound Queue
// ============================================================================

/// One unit queued for delivery to the connected client.
///
/// Responses, server-originated requests, and notifications all travel
/// as [`Outbound::Message`]; raw binary stream frames bypass JSON
/// entirely; resource updates are fanned out by URI so each connection
/// applies its own subscription filter.
#[derive(Debug, Clone)]
pub(crate) enum Outbound {
    /// A complete JSON-RPC message.
    Message(JsonRpcMessage),
    /// A raw binary stream frame.
    Binary(BinaryChunkHeader, Vec<u8>),
    /// A resource change, delivered only to subscribed connections.
    ResourceUpdated(String),
}

/// Builds the `notifications/resources/updated` message for `uri`.
pub(crate) fn resource_updated_notification(uri: &str) -> JsonRpcMessage {
    JsonRpcMessage::Request(JsonRpcRequest::notification(
        "notifications/resources/updated",
        Some(serde_json::json!({ "uri": uri })),
    ))
}

// ============================================================================
// Stream Producer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Text,
    Binary,
    Closed,
}

/// Producer handed to a streaming tool handler.
///
/// Every JSON stream event is wrapped as a server-originated
/// `stream/message` request reusing the invoking call's id, so the
/// client's ordinary correlation routes it. Binary chunks go to the
/// transport as raw 24-byte-header frames. Chunk indices are assigned
/// here, so a handler cannot produce an index gap; lifecycle misuse
/// (chunk before start, anything after a terminal event) is refused
/// before it reaches the wire.
pub struct StreamProducer {
    request_id: RequestId,
    method: String,
    caps: TransportCapabilities,
    out: mpsc::UnboundedSender<Outbound>,
    stream_id: StreamId,
    next_index: i64,
    phase: Phase,
}

impl StreamProducer {
    pub(crate) fn new(
        request_id: RequestId,
        method: impl Into<String>,
        caps: TransportCapabilities,
        out: mpsc::UnboundedSender<Outbound>,
    ) -> McpResult<Self> {
        Ok(Self {
            request_id,
            method: method.into(),
            caps,
            out,
            stream_id: StreamId::generate()?,
            next_index: 0,
            phase: Phase::Idle,
        })
    }

    /// The identifier every event of this stream carries.
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Number of chunks emitted so far.
    #[must_use]
    pub fn chunks_sent(&self) -> i64 {
        self.next_index
    }

    /// Returns true once Done or Error has been emitted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub(crate) fn has_started(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Opens a text stream. Must be called exactly once, before any chunk.
    pub fn start(&mut self) -> McpResult<()> {
        self.open(false, |start| start)
    }

    /// Opens a binary stream whose chunks travel as raw frames.
    ///
    /// Fails when the connection's transport cannot carry binary frames.
    /// Tools that stream binary data declare
    /// [`TransportCapabilities::BINARY_STREAMING`], which keeps them off
    /// such connections entirely, so hitting this error means the tool's
    /// declaration is wrong.
    pub fn start_binary(&mut self) -> McpResult<()> {
        self.open(true, |start| start)
    }

    /// Opens the stream with metadata attached to the Start event.
    ///
    /// `decorate` receives a Start event already bound to this
    /// producer's stream id and method and may add name, MIME type,
    /// encoding, total size, or compression.
    pub fn start_with<F>(&mut self, binary: bool, decorate: F) -> McpResult<()>
    where
        F: FnOnce(StreamStart) -> StreamStart,
    {
        self.open(binary, decorate)
    }

    /// Emits the next JSON chunk. Indices are assigned automatically.
    pub fn send(&mut self, data: Value) -> McpResult<()> {
        match self.phase {
            Phase::Text => {}
            Phase::Binary => {
                return Err(McpError::internal_error(
                    "binary stream cannot carry JSON chunks",
                ));
            }
            Phase::Idle => {
                return Err(McpError::internal_error("chunk sent before stream start"));
            }
            Phase::Closed => {
                return Err(McpError::internal_error(
                    "chunk sent after stream terminated",
                ));
            }
        }
        self.send_event(StreamMessage::chunk(self.stream_id, self.next_index, data))?;
        self.next_index += 1;
        Ok(())
    }

    /// Emits the next binary chunk as a raw frame.
    pub fn send_binary(&mut self, payload: Vec<u8>) -> McpResult<()> {
        match self.phase {
            Phase::Binary => {}
            Phase::Text => {
                return Err(McpError::internal_error(
                    "text stream cannot carry binary frames",
                ));
            }
            Phase::Idle => {
                return Err(McpError::internal_error("chunk sent before stream start"));
            }
            Phase::Closed => {
                return Err(McpError::internal_error(
                    "chunk sent after stream terminated",
                ));
            }
        }
        let header = BinaryChunkHeader::new(self.stream_id, self.next_index);
        self.out
            .send(Outbound::Binary(header, payload))
            .map_err(|_| McpError::internal_error("connection closed while streaming"))?;
        self.next_index += 1;
        Ok(())
    }

    /// Terminates the stream successfully.
    ///
    /// No separate JSON-RPC response follows; this event settles the
    /// invoking call.
    pub fn done(&mut self, summary: Option<Value>) -> McpResult<()> {
        self.require_open()?;
        self.send_event(StreamMessage::done(self.stream_id, summary))?;
        self.phase = Phase::Closed;
        Ok(())
    }

    /// Terminates the stream with a failure.
    pub fn fail(&mut self, error: McpError) -> McpResult<()> {
        self.require_open()?;
        self.send_event(StreamMessage::error(self.stream_id, error.into()))?;
        self.phase = Phase::Closed;
        Ok(())
    }

    fn require_open(&self) -> McpResult<()> {
        match self.phase {
            Phase::Text | Phase::Binary => Ok(()),
            Phase::Idle => Err(McpError::internal_error(
                "terminal event sent before stream start",
            )),
            Phase::Closed => Err(McpError::internal_error(
                "terminal event sent after stream terminated",
            )),
        }
    }

    fn open<F>(&mut self, binary: bool, decorate: F) -> McpResult<()>
    where
        F: FnOnce(StreamStart) -> StreamStart,
    {
        match self.phase {
            Phase::Idle => {}
            Phase::Text | Phase::Binary => {
                return Err(McpError::internal_error("stream already started"));
            }
            Phase::Closed => {
                return Err(McpError::internal_error("stream already terminated"));
            }
        }
        if binary && !self.caps.contains(TransportCapabilities::BINARY_STREAMING) {
            return Err(McpError::internal_error(
                "transport cannot carry binary stream frames",
            ));
        }

        let mut start = decorate(StreamStart::new(self.stream_id, self.method.clone(), binary));
        // The id and binary flag are producer-owned; decorate adds metadata only.
        start.stream_id = self.stream_id;
        start.binary = binary;

        self.send_event(StreamMessage::Start(start))?;
        self.phase = if binary { Phase::Binary } else { Phase::Text };
        Ok(())
    }

    fn send_event(&mut self, event: StreamMessage) -> McpResult<()> {
        let params = serde_json::to_value(&event)?;
        let request =
            JsonRpcRequest::new(STREAM_MESSAGE_METHOD, Some(params), self.request_id.clone());
        self.out
            .send(Outbound::Message(JsonRpcMessage::Request(request)))
            .map_err(|_| McpError::internal_error("connection closed while streaming"))
    }
}

impl std::fmt::Debug for StreamProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProducer")
            .field("request_id", &self.request_id)
            .field("stream_id", &self.stream_id)
            .field("next_index", &self.next_index)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use mcpgate_core::McpErrorCode;
    use serde_json::json;

    use super::*;

    fn make_producer(caps: TransportCapabilities) -> (StreamProducer, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let producer = StreamProducer::new(RequestId::Number(9), "tools/call", caps, tx)
            .expect("producer");
        (producer, rx)
    }

    fn next_event(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> StreamMessage {
        match rx.try_recv().expect("queued event") {
            Outbound::Message(JsonRpcMessage::Request(request)) => {
                assert_eq!(request.method, STREAM_MESSAGE_METHOD);
                assert_eq!(request.id, Some(RequestId::Number(9)));
                serde_json::from_value(request.params.expect("event params")).expect("stream event")
            }
            other => panic!("expected stream event, got {other:?}"),
        }
    }

    #[test]
    fn test_text_stream_lifecycle() {
        let (mut producer, mut rx) = make_producer(TransportCapabilities::all());
        producer.start().expect("start");
        producer.send(json!("a")).expect("chunk a");
        producer.send(json!("b")).expect("chunk b");
        producer.done(Some(json!({"count": 2}))).expect("done");
        assert!(producer.is_closed());
        assert_eq!(producer.chunks_sent(), 2);

        let id = *producer.stream_id();
        match next_event(&mut rx) {
            StreamMessage::Start(start) => {
                assert_eq!(start.stream_id, id);
                assert_eq!(start.method, "tools/call");
                assert!(!start.binary);
            }
            other => panic!("expected start, got {other:?}"),
        }
        for (expected_index, expected_data) in [(0, json!("a")), (1, json!("b"))] {
            match next_event(&mut rx) {
                StreamMessage::Chunk(chunk) => {
                    assert_eq!(chunk.stream_id, id);
                    assert_eq!(chunk.index, expected_index);
                    assert_eq!(chunk.data, expected_data);
                }
                other => panic!("expected chunk, got {other:?}"),
            }
        }
        match next_event(&mut rx) {
            StreamMessage::Done(done) => {
                assert_eq!(done.summary, Some(json!({"count": 2})));
            }
            other => panic!("expected done, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_chunk_before_start_refused() {
        let (mut producer, mut rx) = make_producer(TransportCapabilities::all());
        let err = producer.send(json!("early")).expect_err("no start yet");
        assert_eq!(err.code, McpErrorCode::InternalError);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_double_start_refused() {
        let (mut producer, _rx) = make_producer(TransportCapabilities::all());
        producer.start().expect("start");
        assert!(producer.start().is_err());
    }

    #[test]
    fn test_events_after_terminal_refused() {
        let (mut producer, _rx) = make_producer(TransportCapabilities::all());
        producer.start().expect("start");
        producer.done(None).expect("done");
        assert!(producer.send(json!("late")).is_err());
        assert!(producer.done(None).is_err());
        assert!(producer.fail(McpError::internal_error("late")).is_err());
    }

    #[test]
    fn test_fail_emits_error_event() {
        let (mut producer, mut rx) = make_producer(TransportCapabilities::all());
        producer.start().expect("start");
        producer
            .fail(McpError::internal_error("generator failed"))
            .expect("fail");
        assert!(producer.is_closed());

        next_event(&mut rx); // start
        match next_event(&mut rx) {
            StreamMessage::Error(failed) => {
                assert_eq!(failed.error.code, McpErrorCode::InternalError.code());
                assert_eq!(failed.error.message, "generator failed");
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[test]
    fn test_binary_stream_needs_capability() {
        let caps = TransportCapabilities::STANDARD | TransportCapabilities::TEXT_STREAMING;
        let (mut producer, _rx) = make_producer(caps);
        let err = producer.start_binary().expect_err("no binary bit");
        assert_eq!(err.code, McpErrorCode::InternalError);
        // The refusal leaves the producer usable as a text stream.
        producer.start().expect("text start");
    }

    #[test]
    fn test_binary_frames_carry_header() {
        let (mut producer, mut rx) = make_producer(TransportCapabilities::all());
        producer.start_binary().expect("start");
        producer.send_binary(vec![1, 2, 3]).expect("frame 0");
        producer.send_binary(vec![4]).expect("frame 1");
        producer.done(None).expect("done");

        let id = *producer.stream_id();
        match next_event(&mut rx) {
            StreamMessage::Start(start) => assert!(start.binary),
            other => panic!("expected start, got {other:?}"),
        }
        for (expected_index, expected_payload) in [(0, vec![1u8, 2, 3]), (1, vec![4u8])] {
            match rx.try_recv().expect("queued frame") {
                Outbound::Binary(header, payload) => {
                    assert_eq!(header.stream_id, id);
                    assert_eq!(header.index, expected_index);
                    assert_eq!(payload, expected_payload);
                }
                other => panic!("expected binary frame, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_chunk_kind_must_match_stream_kind() {
        let (mut producer, _rx) = make_producer(TransportCapabilities::all());
        producer.start().expect("text start");
        assert!(producer.send_binary(vec![0]).is_err());

        let (mut producer, _rx) = make_producer(TransportCapabilities::all());
        producer.start_binary().expect("binary start");
        assert!(producer.send(json!("text")).is_err());
    }

    #[test]
    fn test_start_metadata_cannot_rebind_the_stream() {
        let (mut producer, mut rx) = make_producer(TransportCapabilities::all());
        let own_id = *producer.stream_id();
        producer
            .start_with(false, |start| {
                let mut start = start.with_mime_type("text/plain");
                start.stream_id = StreamId::from_bytes([0xff; 16]);
                start.binary = true;
                start
            })
            .expect("start");

        match next_event(&mut rx) {
            StreamMessage::Start(start) => {
                assert_eq!(start.stream_id, own_id);
                assert!(!start.binary);
                assert_eq!(start.mime_type.as_deref(), Some("text/plain"));
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn test_closed_queue_surfaces_as_internal_error() {
        let (mut producer, rx) = make_producer(TransportCapabilities::all());
        drop(rx);
        let err = producer.start().expect_err("receiver gone");
        assert_eq!(err.code, McpErrorCode::InternalError);
    }
}
