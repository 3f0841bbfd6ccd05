//! Streaming sub-protocol framing.
//!
//! Large or incremental payloads travel as a Start/Chunk/Done/Error
//! sequence multiplexed over the regular message flow. Text chunks are
//! JSON-encoded [`StreamMessage`]s; binary chunks travel as raw frames
//! prefixed with a fixed 24-byte [`BinaryChunkHeader`]. Every stream is
//! identified by a random 128-bit [`StreamId`] bound at Start time.
//!
//! [`StreamStateMachine`] is the consumer-side guard: exactly one Start,
//! contiguous chunk indices from zero, exactly one terminal event. Any
//! deviation is a protocol violation surfaced as an error, never patched
//! over.

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use mcpgate_core::McpError;
use serde::de;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::jsonrpc::JsonRpcError;

/// Method name carried by server-to-client requests that wrap a JSON
/// stream event. Such requests reuse the id of the call that opened the
/// stream, so ordinary response correlation routes them.
pub const STREAM_MESSAGE_METHOD: &str = "stream/message";

// ============================================================================
// Stream Identifier
// ============================================================================

/// Opaque 128-bit stream identifier.
///
/// Rendered as 32 lowercase hex characters in JSON, carried as its raw
/// 16 bytes in binary frame headers.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId([u8; 16]);

impl StreamId {
    /// Creates a fresh random identifier.
    ///
    /// # Errors
    ///
    /// Fails only if the operating system's entropy source is unavailable.
    pub fn generate() -> Result<Self, McpError> {
        let mut bytes = [0u8; 16];
        getrandom::fill(&mut bytes)
            .map_err(|e| McpError::internal_error(format!("failed to generate stream id: {e}")))?;
        Ok(StreamId(bytes))
    }

    /// Wraps raw bytes as an identifier.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        StreamId(bytes)
    }

    /// Returns the raw byte layout used in binary frame headers.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({self})")
    }
}

impl FromStr for StreamId {
    type Err = StreamProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(StreamProtocolError::BadStreamId(s.to_owned()));
        }
        let mut bytes = [0u8; 16];
        for (i, pair) in s.as_bytes().chunks_exact(2).enumerate() {
            let digits = std::str::from_utf8(pair)
                .map_err(|_| StreamProtocolError::BadStreamId(s.to_owned()))?;
            bytes[i] = u8::from_str_radix(digits, 16)
                .map_err(|_| StreamProtocolError::BadStreamId(s.to_owned()))?;
        }
        Ok(StreamId(bytes))
    }
}

impl Serialize for StreamId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ============================================================================
// Binary Chunk Header
// ============================================================================

/// Fixed-size prefix on every raw binary frame.
///
/// Layout: 16 bytes of stream identifier followed by the chunk index as
/// a signed 64-bit little-endian integer. Always exactly 24 bytes; a
/// frame shorter than that is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryChunkHeader {
    /// Stream the frame belongs to.
    pub stream_id: StreamId,
    /// Zero-based chunk index.
    pub index: i64,
}

impl BinaryChunkHeader {
    /// Exact header length in bytes.
    pub const LEN: usize = 24;

    /// Creates a header for the given stream and chunk index.
    #[must_use]
    pub fn new(stream_id: StreamId, index: i64) -> Self {
        Self { stream_id, index }
    }

    /// Builds the 24-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[..16].copy_from_slice(self.stream_id.as_bytes());
        buf[16..].copy_from_slice(&self.index.to_le_bytes());
        buf
    }

    /// Splits a raw frame into its header and payload.
    ///
    /// # Errors
    ///
    /// [`StreamProtocolError::ShortFrame`] if the frame is shorter than
    /// 24 bytes. Short frames are rejected outright, never parsed as a
    /// truncated header.
    pub fn parse(frame: &[u8]) -> Result<(Self, &[u8]), StreamProtocolError> {
        if frame.len() < Self::LEN {
            return Err(StreamProtocolError::ShortFrame { len: frame.len() });
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&frame[..16]);
        let mut index = [0u8; 8];
        index.copy_from_slice(&frame[16..Self::LEN]);
        let header = Self {
            stream_id: StreamId::from_bytes(id),
            index: i64::from_le_bytes(index),
        };
        Ok((header, &frame[Self::LEN..]))
    }
}

// ============================================================================
// Stream Messages
// ============================================================================

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Opens a stream and declares its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStart {
    /// Stream identifier, stable for the stream's lifetime.
    #[serde(rename = "streamId")]
    pub stream_id: StreamId,
    /// RFC 3339 creation time.
    pub timestamp: String,
    /// Method the stream answers.
    pub method: String,
    /// Whether chunks travel as raw binary frames.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub binary: bool,
    /// Optional payload name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional MIME type.
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Optional payload encoding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Optional total payload size in bytes.
    #[serde(rename = "totalSize", skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    /// Optional compression algorithm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

impl StreamStart {
    /// Creates a Start event with empty metadata.
    #[must_use]
    pub fn new(stream_id: StreamId, method: impl Into<String>, binary: bool) -> Self {
        Self {
            stream_id,
            timestamp: now_timestamp(),
            method: method.into(),
            binary,
            name: None,
            mime_type: None,
            encoding: None,
            total_size: None,
            compression: None,
        }
    }

    /// Sets the payload name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Sets the payload encoding.
    #[must_use]
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Sets the total payload size.
    #[must_use]
    pub fn with_total_size(mut self, total_size: u64) -> Self {
        self.total_size = Some(total_size);
        self
    }

    /// Sets the compression algorithm.
    #[must_use]
    pub fn with_compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }
}

/// One incremental payload fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Stream identifier.
    #[serde(rename = "streamId")]
    pub stream_id: StreamId,
    /// RFC 3339 creation time.
    pub timestamp: String,
    /// Zero-based chunk index, contiguous within the stream.
    pub index: i64,
    /// Fragment payload.
    pub data: Value,
}

/// Successful stream termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDone {
    /// Stream identifier.
    #[serde(rename = "streamId")]
    pub stream_id: StreamId,
    /// RFC 3339 creation time.
    pub timestamp: String,
    /// Optional summary of the completed stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}

/// Failed stream termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamError {
    /// Stream identifier.
    #[serde(rename = "streamId")]
    pub stream_id: StreamId,
    /// RFC 3339 creation time.
    pub timestamp: String,
    /// Structured failure description.
    pub error: JsonRpcError,
}

/// A stream event.
///
/// Per stream: exactly one Start, zero or more Chunks with contiguous
/// indices from zero, then exactly one terminal Done or Error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    /// Stream opened.
    Start(StreamStart),
    /// Incremental fragment.
    Chunk(StreamChunk),
    /// Stream finished successfully.
    Done(StreamDone),
    /// Stream failed.
    Error(StreamError),
}

impl StreamMessage {
    /// Creates a Start event with empty metadata.
    #[must_use]
    pub fn start(stream_id: StreamId, method: impl Into<String>, binary: bool) -> Self {
        StreamMessage::Start(StreamStart::new(stream_id, method, binary))
    }

    /// Creates a Chunk event.
    #[must_use]
    pub fn chunk(stream_id: StreamId, index: i64, data: Value) -> Self {
        StreamMessage::Chunk(StreamChunk {
            stream_id,
            timestamp: now_timestamp(),
            index,
            data,
        })
    }

    /// Creates a Done event.
    #[must_use]
    pub fn done(stream_id: StreamId, summary: Option<Value>) -> Self {
        StreamMessage::Done(StreamDone {
            stream_id,
            timestamp: now_timestamp(),
            summary,
        })
    }

    /// Creates an Error event.
    #[must_use]
    pub fn error(stream_id: StreamId, error: JsonRpcError) -> Self {
        StreamMessage::Error(StreamError {
            stream_id,
            timestamp: now_timestamp(),
            error,
        })
    }

    /// Returns the stream this event belongs to.
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        match self {
            StreamMessage::Start(m) => &m.stream_id,
            StreamMessage::Chunk(m) => &m.stream_id,
            StreamMessage::Done(m) => &m.stream_id,
            StreamMessage::Error(m) => &m.stream_id,
        }
    }

    /// Returns true for Done and Error events.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamMessage::Done(_) | StreamMessage::Error(_))
    }
}

// ============================================================================
// Protocol Violations
// ============================================================================

/// A violation of the stream framing rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamProtocolError {
    /// A binary frame shorter than the 24-byte header.
    ShortFrame {
        /// Observed frame length.
        len: usize,
    },
    /// A stream identifier that is not 32 hex characters.
    BadStreamId(String),
    /// A chunk arrived before Start.
    ChunkBeforeStart,
    /// Done or Error arrived before Start.
    TerminalBeforeStart,
    /// A second Start on an open stream.
    DuplicateStart,
    /// Any event after the terminal Done or Error.
    AfterTerminal,
    /// A chunk index that is not the next expected value.
    IndexGap {
        /// Index the consumer expected.
        expected: i64,
        /// Index that actually arrived.
        actual: i64,
    },
    /// An event carrying a different stream id than the Start that opened
    /// the stream.
    StreamIdMismatch,
}

impl fmt::Display for StreamProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamProtocolError::ShortFrame { len } => {
                write!(f, "binary frame too short for header: {len} bytes")
            }
            StreamProtocolError::BadStreamId(s) => write!(f, "malformed stream id: {s:?}"),
            StreamProtocolError::ChunkBeforeStart => write!(f, "chunk received before start"),
            StreamProtocolError::TerminalBeforeStart => {
                write!(f, "terminal event received before start")
            }
            StreamProtocolError::DuplicateStart => write!(f, "duplicate start on open stream"),
            StreamProtocolError::AfterTerminal => {
                write!(f, "event received after stream terminated")
            }
            StreamProtocolError::IndexGap { expected, actual } => {
                write!(f, "chunk index gap: expected {expected}, got {actual}")
            }
            StreamProtocolError::StreamIdMismatch => {
                write!(f, "event carries a different stream id")
            }
        }
    }
}

impl std::error::Error for StreamProtocolError {}

impl From<StreamProtocolError> for McpError {
    fn from(err: StreamProtocolError) -> Self {
        McpError::invalid_request(format!("stream protocol violation: {err}"))
    }
}

// ============================================================================
// Consumer State Machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Started,
    Closed,
}

/// Consumer-side stream validator.
///
/// Feed every inbound event through [`StreamStateMachine::apply`] (or
/// [`StreamStateMachine::apply_binary`] for raw frames) before acting on
/// it. The machine enforces the Idle -> Started -> Chunk* -> Terminal
/// lifecycle and contiguous chunk indices; once a violation is reported
/// the stream must be abandoned.
#[derive(Debug)]
pub struct StreamStateMachine {
    phase: Phase,
    stream_id: Option<StreamId>,
    next_index: i64,
}

impl StreamStateMachine {
    /// Creates a machine awaiting Start.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            stream_id: None,
            next_index: 0,
        }
    }

    /// Validates one JSON stream event.
    ///
    /// # Errors
    ///
    /// Any [`StreamProtocolError`] leaves the machine unchanged; the
    /// caller decides whether to abandon the stream.
    pub fn apply(&mut self, message: &StreamMessage) -> Result<(), StreamProtocolError> {
        match message {
            StreamMessage::Start(start) => self.on_start(start.stream_id),
            StreamMessage::Chunk(chunk) => self.on_chunk(chunk.stream_id, chunk.index),
            StreamMessage::Done(done) => self.on_terminal(done.stream_id),
            StreamMessage::Error(err) => self.on_terminal(err.stream_id),
        }
    }

    /// Validates one raw binary frame header.
    ///
    /// # Errors
    ///
    /// Same contract as [`StreamStateMachine::apply`].
    pub fn apply_binary(&mut self, header: &BinaryChunkHeader) -> Result<(), StreamProtocolError> {
        self.on_chunk(header.stream_id, header.index)
    }

    fn on_start(&mut self, id: StreamId) -> Result<(), StreamProtocolError> {
        match self.phase {
            Phase::Idle => {
                self.phase = Phase::Started;
                self.stream_id = Some(id);
                Ok(())
            }
            Phase::Started => Err(StreamProtocolError::DuplicateStart),
            Phase::Closed => Err(StreamProtocolError::AfterTerminal),
        }
    }

    fn on_chunk(&mut self, id: StreamId, index: i64) -> Result<(), StreamProtocolError> {
        match self.phase {
            Phase::Idle => Err(StreamProtocolError::ChunkBeforeStart),
            Phase::Closed => Err(StreamProtocolError::AfterTerminal),
            Phase::Started => {
                self.check_id(id)?;
                if index != self.next_index {
                    return Err(StreamProtocolError::IndexGap {
                        expected: self.next_index,
                        actual: index,
                    });
                }
                self.next_index += 1;
                Ok(())
            }
        }
    }

    fn on_terminal(&mut self, id: StreamId) -> Result<(), StreamProtocolError> {
        match self.phase {
            Phase::Idle => Err(StreamProtocolError::TerminalBeforeStart),
            Phase::Closed => Err(StreamProtocolError::AfterTerminal),
            Phase::Started => {
                self.check_id(id)?;
                self.phase = Phase::Closed;
                Ok(())
            }
        }
    }

    fn check_id(&self, id: StreamId) -> Result<(), StreamProtocolError> {
        match self.stream_id {
            Some(bound) if bound == id => Ok(()),
            _ => Err(StreamProtocolError::StreamIdMismatch),
        }
    }

    /// Returns the id bound by Start, if the stream is open.
    #[must_use]
    pub fn stream_id(&self) -> Option<&StreamId> {
        self.stream_id.as_ref()
    }

    /// Returns true once Done or Error has been accepted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Returns the number of chunks accepted so far.
    #[must_use]
    pub fn chunks_seen(&self) -> i64 {
        self.next_index
    }
}

impl Default for StreamStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
