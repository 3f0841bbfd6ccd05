//! WebSocket transport.
//!
//! One WebSocket frame per logical message: text frames carry plain
//! JSON, binary frames carry the 24-byte chunk header followed by raw
//! payload bytes. The socket is the only transport that provides every
//! capability, including binary streaming.
//!
//! Control frames are handled inside the receive loop: Ping is answered
//! with Pong, Close (or the peer vanishing) ends the loop with a clean
//! `None`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use mcpgate_core::logging::targets;
use mcpgate_protocol::{BinaryChunkHeader, JsonRpcMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};

use crate::{CodecError, Transport, TransportCapabilities, TransportError, TransportEvent};

/// Transport over an established WebSocket.
///
/// Generic over the underlying stream so servers can accept plain TCP
/// while clients connect through TLS.
#[derive(Debug)]
pub struct WsTransport<S> {
    stream: WebSocketStream<S>,
}

impl WsTransport<MaybeTlsStream<TcpStream>> {
    /// Connects to a `ws://` or `wss://` URL and performs the handshake.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (stream, _response) = connect_async(url).await?;
        log::debug!(target: targets::TRANSPORT, "websocket connected: {url}");
        Ok(Self { stream })
    }
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Accepts an incoming connection (server side of the handshake).
    pub async fn accept(stream: S) -> Result<Self, TransportError> {
        let stream = accept_async(stream).await?;
        Ok(Self { stream })
    }

    /// Wraps an already-handshaken WebSocket.
    #[must_use]
    pub fn from_stream(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn connect(&mut self) -> Result<(), TransportError> {
        // The handshake already ran in the constructor.
        Ok(())
    }

    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let text = serde_json::to_string(message).map_err(CodecError::Json)?;
        self.stream.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    async fn send_binary(
        &mut self,
        header: &BinaryChunkHeader,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut frame = Vec::with_capacity(BinaryChunkHeader::LEN + payload.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(payload);
        self.stream.send(WsMessage::Binary(frame)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let msg = JsonRpcMessage::decode(text.as_bytes())
                        .map_err(|e| TransportError::Codec(CodecError::Decode(e)))?;
                    return Ok(Some(TransportEvent::Message(msg)));
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    let (header, payload) = BinaryChunkHeader::parse(&data)
                        .map_err(|e| TransportError::Protocol(e.to_string()))?;
                    return Ok(Some(TransportEvent::Binary(header, payload.to_vec())));
                }
                Some(Ok(WsMessage::Ping(payload))) => {
                    self.stream.send(WsMessage::Pong(payload)).await?;
                }
                Some(Ok(WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                Some(Ok(WsMessage::Close(_))) => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::all()
    }
}
