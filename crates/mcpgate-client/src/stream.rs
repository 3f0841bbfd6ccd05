//! Consumer side of a streaming invocation.

use mcpgate_core::{McpError, McpResult};
use mcpgate_protocol::{BinaryChunkHeader, StreamMessage, StreamStateMachine};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::Command;

/// One item routed to a stream handle by the dispatch task.
#[derive(Debug)]
pub(crate) enum StreamInbound {
    /// A JSON stream event.
    Fragment(StreamMessage),
    /// A raw binary chunk.
    Binary(BinaryChunkHeader, Vec<u8>),
    /// A plain response, sent by servers that answered without streaming.
    Response(McpResult<Value>),
}

/// One payload yielded by [`StreamHandle::next`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPayload {
    /// A JSON chunk.
    Json(Value),
    /// A raw binary chunk.
    Binary(Vec<u8>),
}

/// Pull side of one streaming call.
///
/// [`StreamHandle::next`] yields validated chunks in arrival order and
/// returns `None` once the stream terminates cleanly, after which
/// [`StreamHandle::summary`] holds the Done summary if the server sent
/// one. Framing violations and stream errors surface as `Some(Err(_))`
/// and end the stream. Dropping the handle before the terminal event
/// cancels the request on the server.
#[derive(Debug)]
pub struct StreamHandle {
    id: i64,
    rx: mpsc::UnboundedReceiver<StreamInbound>,
    machine: StreamStateMachine,
    summary: Option<Value>,
    done: bool,
    dispatch: mpsc::UnboundedSender<Command>,
}

impl StreamHandle {
    pub(crate) fn new(
        id: i64,
        rx: mpsc::UnboundedReceiver<StreamInbound>,
        dispatch: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            id,
            rx,
            machine: StreamStateMachine::new(),
            summary: None,
            done: false,
            dispatch,
        }
    }

    /// Returns the id of the request that opened the stream.
    #[must_use]
    pub fn request_id(&self) -> i64 {
        self.id
    }

    /// Returns the Done summary once the stream finished cleanly.
    #[must_use]
    pub fn summary(&self) -> Option<&Value> {
        self.summary.as_ref()
    }

    /// Waits for the next chunk.
    ///
    /// `None` means the stream is over. An `Err` item also ends the
    /// stream; further calls keep returning `None`.
    pub async fn next(&mut self) -> Option<McpResult<StreamPayload>> {
        if self.done {
            return None;
        }
        loop {
            let Some(item) = self.rx.recv().await else {
                self.done = true;
                return Some(Err(McpError::internal_error(
                    "connection closed before the stream terminated",
                )));
            };
            match item {
                StreamInbound::Fragment(fragment) => {
                    if let Err(violation) = self.machine.apply(&fragment) {
                        self.done = true;
                        return Some(Err(violation.into()));
                    }
                    match fragment {
                        StreamMessage::Start(_) => {}
                        StreamMessage::Chunk(chunk) => {
                            return Some(Ok(StreamPayload::Json(chunk.data)));
                        }
                        StreamMessage::Done(done) => {
                            self.summary = done.summary;
                            self.done = true;
                            return None;
                        }
                        StreamMessage::Error(failed) => {
                            self.done = true;
                            return Some(Err(failed.error.into()));
                        }
                    }
                }
                StreamInbound::Binary(header, payload) => {
                    if let Err(violation) = self.machine.apply_binary(&header) {
                        self.done = true;
                        return Some(Err(violation.into()));
                    }
                    return Some(Ok(StreamPayload::Binary(payload)));
                }
                StreamInbound::Response(result) => {
                    // The server answered without streaming: the response
                    // is the one and only item.
                    self.done = true;
                    return Some(result.map(StreamPayload::Json));
                }
            }
        }
    }

    /// Abandons the stream and tells the server to stop producing.
    pub fn cancel(&mut self, reason: Option<String>) {
        if self.done {
            return;
        }
        self.done = true;
        let _ = self.dispatch.send(Command::CancelLocal {
            id: self.id,
            reason,
            notify_server: true,
        });
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.dispatch.send(Command::CancelLocal {
                id: self.id,
                reason: None,
                notify_server: true,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpgate_core::McpErrorCode;
    use mcpgate_protocol::{JsonRpcError, StreamId};
    use serde_json::json;

    fn handle() -> (
        StreamHandle,
        mpsc::UnboundedSender<StreamInbound>,
        mpsc::UnboundedReceiver<Command>,
    ) {
        let (item_tx, item_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        (StreamHandle::new(42, item_rx, cmd_tx), item_tx, cmd_rx)
    }

    fn sid() -> StreamId {
        StreamId::from_bytes([7u8; 16])
    }

    #[tokio::test]
    async fn test_chunks_in_order_then_done() {
        let (mut handle, tx, _cmds) = handle();
        tx.send(StreamInbound::Fragment(StreamMessage::start(sid(), "tools/call", false)))
            .unwrap();
        tx.send(StreamInbound::Fragment(StreamMessage::chunk(sid(), 0, json!("a"))))
            .unwrap();
        tx.send(StreamInbound::Fragment(StreamMessage::chunk(sid(), 1, json!("b"))))
            .unwrap();
        tx.send(StreamInbound::Fragment(StreamMessage::done(
            sid(),
            Some(json!({"count": 2})),
        )))
        .unwrap();

        assert_eq!(handle.next().await.unwrap().unwrap(), StreamPayload::Json(json!("a")));
        assert_eq!(handle.next().await.unwrap().unwrap(), StreamPayload::Json(json!("b")));
        assert!(handle.next().await.is_none());
        assert_eq!(handle.summary(), Some(&json!({"count": 2})));
        // The stream stays finished.
        assert!(handle.next().await.is_none());
    }

    #[tokio::test]
    async fn test_index_gap_ends_stream() {
        let (mut handle, tx, _cmds) = handle();
        tx.send(StreamInbound::Fragment(StreamMessage::start(sid(), "tools/call", false)))
            .unwrap();
        tx.send(StreamInbound::Fragment(StreamMessage::chunk(sid(), 0, json!("a"))))
            .unwrap();
        tx.send(StreamInbound::Fragment(StreamMessage::chunk(sid(), 2, json!("c"))))
            .unwrap();

        assert!(handle.next().await.unwrap().is_ok());
        let err = handle.next().await.unwrap().unwrap_err();
        assert_eq!(err.code, McpErrorCode::InvalidRequest);
        assert!(handle.next().await.is_none());
    }

    #[tokio::test]
    async fn test_single_response_is_final_item() {
        let (mut handle, tx, _cmds) = handle();
        tx.send(StreamInbound::Response(Ok(json!({"value": 1})))).unwrap();

        assert_eq!(
            handle.next().await.unwrap().unwrap(),
            StreamPayload::Json(json!({"value": 1}))
        );
        assert!(handle.next().await.is_none());
        assert!(handle.summary().is_none());
    }

    #[tokio::test]
    async fn test_error_event_surfaces_code() {
        let (mut handle, tx, _cmds) = handle();
        tx.send(StreamInbound::Fragment(StreamMessage::start(sid(), "tools/call", false)))
            .unwrap();
        tx.send(StreamInbound::Fragment(StreamMessage::error(
            sid(),
            JsonRpcError {
                code: McpErrorCode::InternalError.code(),
                message: "generator failed".to_owned(),
                data: None,
            },
        )))
        .unwrap();

        let err = handle.next().await.unwrap().unwrap_err();
        assert_eq!(err.code, McpErrorCode::InternalError);
        assert_eq!(err.message, "generator failed");
        assert!(handle.next().await.is_none());
    }

    #[tokio::test]
    async fn test_binary_chunks_follow_binary_start() {
        let (mut handle, tx, _cmds) = handle();
        tx.send(StreamInbound::Fragment(StreamMessage::start(sid(), "tools/call", true)))
            .unwrap();
        tx.send(StreamInbound::Binary(
            BinaryChunkHeader::new(sid(), 0),
            b"abc".to_vec(),
        ))
        .unwrap();
        tx.send(StreamInbound::Fragment(StreamMessage::done(sid(), None))).unwrap();

        assert_eq!(
            handle.next().await.unwrap().unwrap(),
            StreamPayload::Binary(b"abc".to_vec())
        );
        assert!(handle.next().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_loss_before_terminal_is_error() {
        let (mut handle, tx, _cmds) = handle();
        tx.send(StreamInbound::Fragment(StreamMessage::start(sid(), "tools/call", false)))
            .unwrap();
        drop(tx);

        let err = handle.next().await.unwrap().unwrap_err();
        assert_eq!(err.code, McpErrorCode::InternalError);
        assert!(handle.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_notifies_dispatch() {
        let (mut handle, _tx, mut cmds) = handle();
        handle.cancel(Some("no longer needed".to_owned()));

        match cmds.recv().await.unwrap() {
            Command::CancelLocal { id, reason, notify_server } => {
                assert_eq!(id, 42);
                assert_eq!(reason.as_deref(), Some("no longer needed"));
                assert!(notify_server);
            }
            _ => panic!("expected a cancel command"),
        }
        // Cancelling twice sends nothing further.
        handle.cancel(None);
        assert!(cmds.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drop_before_terminal_cancels() {
        let (handle, _tx, mut cmds) = handle();
        drop(handle);

        assert!(matches!(
            cmds.recv().await.unwrap(),
            Command::CancelLocal { id: 42, reason: None, notify_server: true }
        ));
    }

    #[tokio::test]
    async fn test_drop_after_done_stays_quiet() {
        let (mut handle, tx, mut cmds) = handle();
        tx.send(StreamInbound::Fragment(StreamMessage::start(sid(), "tools/call", false)))
            .unwrap();
        tx.send(StreamInbound::Fragment(StreamMessage::done(sid(), None))).unwrap();
        assert!(handle.next().await.is_none());

        drop(handle);
        assert!(cmds.try_recv().is_err());
    }
}
