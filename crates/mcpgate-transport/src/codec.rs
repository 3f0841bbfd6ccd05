//! Message codec for framing JSON-RPC messages.
//!
//! Gateway transports that carry a byte stream (stdio) frame messages as
//! newline-delimited JSON (NDJSON). The codec buffers partial input across
//! reads, enforces a message size cap, and decodes each complete line
//! through the strict wire validator.

use mcpgate_protocol::{DecodeError, JsonRpcMessage};

/// Codec for encoding/decoding newline-delimited JSON-RPC messages.
#[derive(Debug)]
pub struct Codec {
    /// Buffer for incomplete messages.
    buffer: Vec<u8>,
    /// Read position in buffer (data before this has been consumed).
    read_pos: usize,
    /// Maximum allowed message size in bytes.
    max_message_size: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

/// Threshold for compacting the buffer (when `read_pos` grows past this).
const COMPACT_THRESHOLD: usize = 4096;

impl Codec {
    /// Creates a new codec with default settings (10MB limit).
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            read_pos: 0,
            max_message_size: 10 * 1024 * 1024, // 10MB
        }
    }

    /// Returns the maximum allowed message size in bytes.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Sets the maximum allowed message size in bytes.
    pub fn set_max_message_size(&mut self, size: usize) {
        self.max_message_size = size;
        let unread = self.buffer.len() - self.read_pos;
        if unread > size {
            self.buffer.clear();
            self.read_pos = 0;
        }
    }

    /// Encodes a message as one NDJSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, message: &JsonRpcMessage) -> Result<Vec<u8>, CodecError> {
        let mut bytes = message.encode()?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Feeds bytes into the codec, returning any complete messages.
    ///
    /// Incomplete data is buffered for the next call. Each complete line
    /// goes through strict wire validation; a line that parses as JSON but
    /// violates the message invariants is an error, not a skipped line.
    ///
    /// # Errors
    ///
    /// Returns an error if a complete line fails to decode or if the
    /// buffered data exceeds the size limit.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<JsonRpcMessage>, CodecError> {
        // Check projected size BEFORE extending to prevent temporary
        // memory exhaustion from a single oversized chunk.
        let unread_len = self.buffer.len() - self.read_pos;
        let projected_size = unread_len.saturating_add(data.len());
        if projected_size > self.max_message_size {
            self.buffer.clear();
            self.read_pos = 0;
            return Err(CodecError::MessageTooLarge(projected_size));
        }

        // Compact the buffer once the consumed prefix gets large.
        if self.read_pos >= COMPACT_THRESHOLD {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }

        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();
        let mut start = self.read_pos;

        #[allow(clippy::mut_range_bound)]
        for i in start..self.buffer.len() {
            if self.buffer[i] == b'\n' {
                let line_len = i - start;
                if line_len > self.max_message_size {
                    self.buffer.clear();
                    self.read_pos = 0;
                    return Err(CodecError::MessageTooLarge(line_len));
                }
                let line = &self.buffer[start..i];
                if !line.is_empty() {
                    messages.push(JsonRpcMessage::decode(line)?);
                }
                start = i + 1;
            }
        }

        // Update read position instead of draining on every call.
        self.read_pos = start;

        let remaining = self.buffer.len() - self.read_pos;
        if remaining > self.max_message_size {
            self.buffer.clear();
            self.read_pos = 0;
            return Err(CodecError::MessageTooLarge(remaining));
        }

        Ok(messages)
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}

/// Codec error types.
#[derive(Debug)]
pub enum CodecError {
    /// Serialization failure while encoding an outgoing message.
    Json(serde_json::Error),
    /// An inbound line failed wire validation.
    Decode(DecodeError),
    /// Message too large.
    MessageTooLarge(usize),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Json(e) => write!(f, "JSON error: {e}"),
            CodecError::Decode(e) => write!(f, "decode error: {e}"),
            CodecError::MessageTooLarge(size) => write!(f, "Message too large: {size} bytes"),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Json(e) => Some(e),
            CodecError::Decode(e) => Some(e),
            CodecError::MessageTooLarge(_) => None,
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Json(err)
    }
}

impl From<DecodeError> for CodecError {
    fn from(err: DecodeError) -> Self {
        CodecError::Decode(err)
    }
}
