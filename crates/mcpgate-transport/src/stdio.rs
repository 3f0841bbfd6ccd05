//! Stdio transport.
//!
//! Newline-delimited JSON over a pair of independent byte streams. This
//! is the transport a gateway process uses when spawned as a subprocess:
//! requests arrive on stdin, responses leave on stdout, and logs belong
//! on stderr.
//!
//! # Wire Format
//!
//! One complete JSON-RPC message per line:
//!
//! ```text
//! {"jsonrpc":"2.0","method":"initialize","id":1,"params":{...}}\n
//! {"jsonrpc":"2.0","id":1,"result":{...}}\n
//! ```
//!
//! Messages never contain embedded newlines (the serializer emits none).
//! Blank lines between messages are skipped. Either side may write at any
//! time, so the transport is full duplex; raw binary frames are not
//! representable on a text stream.

use std::collections::VecDeque;

use async_trait::async_trait;
use mcpgate_core::logging::targets;
use mcpgate_protocol::JsonRpcMessage;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Stdin, Stdout};

use crate::{Codec, Transport, TransportCapabilities, TransportError, TransportEvent};

/// Read chunk size for the receive loop.
const READ_CHUNK: usize = 8 * 1024;

/// Transport over any `AsyncRead`/`AsyncWrite` pair.
///
/// Generic so tests (and embedders) can run it over in-memory buffers or
/// a [`tokio::io::duplex`] pipe; [`StdioTransport::stdio`] wires it to
/// the process's standard streams.
#[derive(Debug)]
pub struct StdioTransport<R, W> {
    reader: R,
    writer: W,
    codec: Codec,
    /// Decoded messages not yet handed to `recv`.
    pending: VecDeque<JsonRpcMessage>,
    /// Scratch buffer for reads.
    chunk: Vec<u8>,
    eof: bool,
}

impl StdioTransport<Stdin, Stdout> {
    /// Creates a transport over the process's stdin/stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a transport over the given byte streams.
    #[must_use]
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            codec: Codec::new(),
            pending: VecDeque::new(),
            chunk: vec![0; READ_CHUNK],
            eof: false,
        }
    }

    /// Access to the framing codec, e.g. to adjust the message size cap.
    pub fn codec_mut(&mut self) -> &mut Codec {
        &mut self.codec
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn connect(&mut self) -> Result<(), TransportError> {
        // Byte streams are ready from construction.
        Ok(())
    }

    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let bytes = self.codec.encode(message)?;
        log::trace!(target: targets::TRANSPORT, "stdio send: {} bytes", bytes.len());
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError> {
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return Ok(Some(TransportEvent::Message(msg)));
            }
            if self.eof {
                return Ok(None);
            }
            // Cancel safe: `read` either consumes bytes or it does not,
            // and everything after it runs without yielding.
            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                log::debug!(target: targets::TRANSPORT, "stdio input reached EOF");
                self.eof = true;
                continue;
            }
            match self.codec.decode(&self.chunk[..n]) {
                Ok(decoded) => self.pending.extend(decoded),
                Err(e) => {
                    // A poisoned line cannot be resynchronized; drop the
                    // buffer so the next recv starts clean.
                    self.codec.clear();
                    return Err(e.into());
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::STANDARD
            | TransportCapabilities::TEXT_STREAMING
            | TransportCapabilities::FULL_DUPLEX
    }
}
