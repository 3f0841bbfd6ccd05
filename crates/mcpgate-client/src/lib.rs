//! MCP client: request correlation, stream consumption, notification
//! routing.
//!
//! [`Client`] is a cheap handle around a channel to its dispatch task.
//! The task owns the transport and the pending-request map: it assigns
//! reply slots when requests go out, matches responses back to them by
//! id, routes `stream/message` fragments and raw binary frames to the
//! originating call's [`StreamHandle`], answers server pings, and fans
//! server notifications out to whoever took the notification receiver.
//!
//! Responses that match nothing are logged and dropped; they never
//! tear the connection down.

#![forbid(unsafe_code)]

mod session;
mod stream;

pub use session::ClientSession;
pub use stream::{StreamHandle, StreamPayload};

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use mcpgate_core::logging::targets;
use mcpgate_core::{McpError, McpResult};
use mcpgate_protocol::{
    CallToolParams, CallToolResult, CancelledParams, ClientCapabilities, ClientInfo,
    GetPromptParams, GetPromptResult, InitializeParams, InitializeResult, JsonRpcMessage,
    JsonRpcRequest, JsonRpcResponse, ListPromptsParams, ListPromptsResult,
    ListResourceTemplatesParams, ListResourceTemplatesResult, ListResourcesParams,
    ListResourcesResult, ListToolsParams, ListToolsResult, LogLevel, PROTOCOL_VERSION,
    ReadResourceParams, ReadResourceResult, RequestId, STREAM_MESSAGE_METHOD, SetLogLevelParams,
    StreamId, StreamMessage, SubscribeResourceParams, UnsubscribeResourceParams,
    is_supported_version,
};
use mcpgate_transport::{Transport, TransportError, TransportEvent};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::stream::StreamInbound;

// ============================================================================
// Dispatch Commands
// ============================================================================

/// Where the response for a pending request id should land.
pub(crate) enum Slot {
    /// An ordinary call awaiting one response.
    Single(oneshot::Sender<McpResult<Value>>),
    /// A streaming call consuming fragments until a terminal event.
    Stream(mpsc::UnboundedSender<StreamInbound>),
}

/// Instructions sent from [`Client`] handles to the dispatch task.
pub(crate) enum Command {
    Request {
        id: i64,
        method: String,
        params: Option<Value>,
        slot: Slot,
    },
    Notify {
        method: String,
        params: Option<Value>,
    },
    CancelLocal {
        id: i64,
        reason: Option<String>,
        notify_server: bool,
    },
    Close,
}

// ============================================================================
// Client
// ============================================================================

/// An MCP client bound to one connection.
///
/// All methods take `&self`; the client can be shared across tasks.
/// Request ids are allocated from a connection-wide counter, so every
/// in-flight call owns a distinct id.
pub struct Client {
    tx: mpsc::UnboundedSender<Command>,
    next_id: AtomicI64,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<JsonRpcRequest>>>,
    session: Mutex<Option<ClientSession>>,
}

impl Client {
    /// Connects the transport and spawns the dispatch task that owns it.
    ///
    /// # Errors
    ///
    /// Returns any [`TransportError`] raised while connecting.
    pub async fn connect<T>(mut transport: T) -> Result<Self, TransportError>
    where
        T: Transport + 'static,
    {
        transport.connect().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let dispatch = Dispatch {
            transport,
            rx,
            pending: HashMap::new(),
            streams: HashMap::new(),
            notifications: notify_tx,
        };
        Ok(Self {
            tx,
            next_id: AtomicI64::new(1),
            dispatch: Mutex::new(Some(tokio::spawn(dispatch.run()))),
            notifications: Mutex::new(Some(notify_rx)),
            session: Mutex::new(None),
        })
    }

    /// Sends a request and waits for its response.
    ///
    /// # Errors
    ///
    /// The server's error response, or an internal error if the
    /// connection went away before the response arrived.
    pub async fn call(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::Request {
            id,
            method: method.to_owned(),
            params,
            slot: Slot::Single(reply_tx),
        })?;
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(McpError::internal_error("connection closed before response")),
        }
    }

    /// Sends a request whose answer arrives as a stream.
    ///
    /// The returned handle yields chunks as they arrive. A server that
    /// answers with a plain response instead still works: the response
    /// becomes the stream's only item.
    ///
    /// # Errors
    ///
    /// Fails if the connection is already gone.
    pub fn call_stream(&self, method: &str, params: Option<Value>) -> McpResult<StreamHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (item_tx, item_rx) = mpsc::unbounded_channel();
        self.send_command(Command::Request {
            id,
            method: method.to_owned(),
            params,
            slot: Slot::Stream(item_tx),
        })?;
        Ok(StreamHandle::new(id, item_rx, self.tx.clone()))
    }

    /// Sends a notification. No response will arrive.
    ///
    /// # Errors
    ///
    /// Fails if the connection is already gone.
    pub fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.send_command(Command::Notify {
            method: method.to_owned(),
            params,
        })
    }

    /// Cancels an in-flight request.
    ///
    /// The pending call resolves with an error locally; the server is
    /// told via `notifications/cancelled`, best-effort.
    ///
    /// # Errors
    ///
    /// Fails if the connection is already gone.
    pub fn cancel(&self, request_id: i64, reason: Option<String>) -> McpResult<()> {
        self.send_command(Command::CancelLocal {
            id: request_id,
            reason,
            notify_server: true,
        })
    }

    /// Runs the `initialize` handshake and announces readiness.
    ///
    /// On success the negotiated session is retained and available via
    /// [`Client::session`].
    ///
    /// # Errors
    ///
    /// The server's error response, or an invalid-request error if the
    /// server negotiated a protocol version this client does not speak.
    pub async fn initialize(&self, client_info: ClientInfo) -> McpResult<InitializeResult> {
        let capabilities = ClientCapabilities::default();
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_owned(),
            capabilities: capabilities.clone(),
            client_info: client_info.clone(),
        };
        let value = self
            .call("initialize", Some(serde_json::to_value(&params)?))
            .await?;
        let result: InitializeResult = serde_json::from_value(value)?;
        if !is_supported_version(&result.protocol_version) {
            return Err(McpError::invalid_request(format!(
                "server negotiated unsupported protocol version {:?}",
                result.protocol_version
            )));
        }
        if let Ok(mut guard) = self.session.lock() {
            *guard = Some(ClientSession::new(
                client_info,
                capabilities,
                result.server_info.clone(),
                result.capabilities.clone(),
                result.protocol_version.clone(),
            ));
        }
        self.notify("notifications/initialized", None)?;
        Ok(result)
    }

    /// Lists one page of tools.
    ///
    /// # Errors
    ///
    /// The server's error response.
    pub async fn list_tools(&self, cursor: Option<String>) -> McpResult<ListToolsResult> {
        let params = ListToolsParams { cursor };
        let value = self
            .call("tools/list", Some(serde_json::to_value(&params)?))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Calls a tool by name.
    ///
    /// # Errors
    ///
    /// The server's error response. Tool-level failures arrive as an
    /// `Ok` result with `is_error` set, not as an `Err`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> McpResult<CallToolResult> {
        let params = CallToolParams {
            name: name.to_owned(),
            arguments,
            meta: None,
        };
        let value = self
            .call("tools/call", Some(serde_json::to_value(&params)?))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Lists one page of prompts.
    ///
    /// # Errors
    ///
    /// The server's error response.
    pub async fn list_prompts(&self, cursor: Option<String>) -> McpResult<ListPromptsResult> {
        let params = ListPromptsParams { cursor };
        let value = self
            .call("prompts/list", Some(serde_json::to_value(&params)?))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fetches a prompt by name.
    ///
    /// # Errors
    ///
    /// The server's error response.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<std::collections::HashMap<String, String>>,
    ) -> McpResult<GetPromptResult> {
        let params = GetPromptParams {
            name: name.to_owned(),
            arguments,
            meta: None,
        };
        let value = self
            .call("prompts/get", Some(serde_json::to_value(&params)?))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Lists one page of resources.
    ///
    /// # Errors
    ///
    /// The server's error response.
    pub async fn list_resources(&self, cursor: Option<String>) -> McpResult<ListResourcesResult> {
        let params = ListResourcesParams { cursor };
        let value = self
            .call("resources/list", Some(serde_json::to_value(&params)?))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Lists one page of resource templates.
    ///
    /// # Errors
    ///
    /// The server's error response.
    pub async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> McpResult<ListResourceTemplatesResult> {
        let params = ListResourceTemplatesParams { cursor };
        let value = self
            .call("resources/templates/list", Some(serde_json::to_value(&params)?))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Reads a resource by URI.
    ///
    /// # Errors
    ///
    /// The server's error response.
    pub async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        let params = ReadResourceParams {
            uri: uri.to_owned(),
            meta: None,
        };
        let value = self
            .call("resources/read", Some(serde_json::to_value(&params)?))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Subscribes to update notifications for a resource.
    ///
    /// # Errors
    ///
    /// The server's error response.
    pub async fn subscribe_resource(&self, uri: &str) -> McpResult<()> {
        let params = SubscribeResourceParams { uri: uri.to_owned() };
        self.call("resources/subscribe", Some(serde_json::to_value(&params)?))
            .await?;
        Ok(())
    }

    /// Drops a resource subscription.
    ///
    /// # Errors
    ///
    /// The server's error response.
    pub async fn unsubscribe_resource(&self, uri: &str) -> McpResult<()> {
        let params = UnsubscribeResourceParams { uri: uri.to_owned() };
        self.call("resources/unsubscribe", Some(serde_json::to_value(&params)?))
            .await?;
        Ok(())
    }

    /// Checks that the server is alive.
    ///
    /// # Errors
    ///
    /// The server's error response.
    pub async fn ping(&self) -> McpResult<()> {
        self.call("ping", None).await?;
        Ok(())
    }

    /// Sets the server-side log level for this session.
    ///
    /// # Errors
    ///
    /// The server's error response.
    pub async fn set_log_level(&self, level: LogLevel) -> McpResult<()> {
        let params = SetLogLevelParams { level };
        self.call("logging/setLevel", Some(serde_json::to_value(&params)?))
            .await?;
        Ok(())
    }

    /// Takes the receiver for server notifications.
    ///
    /// Notifications buffer until taken; the second call returns `None`.
    #[must_use]
    pub fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcRequest>> {
        let mut guard = self.notifications.lock().ok()?;
        guard.take()
    }

    /// Returns the session negotiated by [`Client::initialize`], if any.
    #[must_use]
    pub fn session(&self) -> Option<ClientSession> {
        let guard = self.session.lock().ok()?;
        guard.clone()
    }

    /// Closes the connection and waits for the dispatch task to finish.
    pub async fn shutdown(self) {
        let _ = self.tx.send(Command::Close);
        let handle = match self.dispatch.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn send_command(&self, command: Command) -> McpResult<()> {
        self.tx
            .send(command)
            .map_err(|_| McpError::internal_error("client dispatch task is gone"))
    }
}

// ============================================================================
// Dispatch Task
// ============================================================================

/// What one turn of the dispatch loop produced.
enum Step {
    Cmd(Option<Command>),
    Inbound(Result<Option<TransportEvent>, TransportError>),
}

/// The task that owns the transport and the pending map.
struct Dispatch<T> {
    transport: T,
    rx: mpsc::UnboundedReceiver<Command>,
    /// Reply slots keyed by request id.
    pending: HashMap<i64, Slot>,
    /// Binary stream ids mapped back to the request that opened them.
    streams: HashMap<StreamId, i64>,
    notifications: mpsc::UnboundedSender<JsonRpcRequest>,
}

impl<T: Transport> Dispatch<T> {
    async fn run(mut self) {
        loop {
            // Both recv calls are cancel safe, so the losing branch
            // drops nothing.
            let step = tokio::select! {
                command = self.rx.recv() => Step::Cmd(command),
                event = self.transport.recv() => Step::Inbound(event),
            };
            match step {
                Step::Cmd(None) => break,
                Step::Cmd(Some(command)) => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Step::Inbound(Ok(Some(event))) => self.handle_event(event).await,
                Step::Inbound(Ok(None)) => {
                    log::debug!(target: targets::CLIENT, "transport closed by peer");
                    break;
                }
                Step::Inbound(Err(TransportError::Codec(e))) => {
                    // One bad message does not poison the connection.
                    log::warn!(target: targets::CLIENT, "dropping undecodable message: {e}");
                }
                Step::Inbound(Err(e)) => {
                    log::error!(target: targets::CLIENT, "transport failed: {e}");
                    break;
                }
            }
        }
        let _ = self.transport.close().await;
        self.fail_pending();
    }

    /// Returns false when the loop should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Request {
                id,
                method,
                params,
                slot,
            } => {
                let request = JsonRpcRequest::new(method, params, id);
                self.pending.insert(id, slot);
                if let Err(e) = self.transport.send(&request.into()).await {
                    log::warn!(target: targets::CLIENT, "send failed for request {id}: {e}");
                    if let Some(slot) = self.pending.remove(&id) {
                        deliver_failure(slot, e.into());
                    }
                }
            }
            Command::Notify { method, params } => {
                let note = JsonRpcRequest::notification(method, params);
                if let Err(e) = self.transport.send(&note.into()).await {
                    log::warn!(target: targets::CLIENT, "notification send failed: {e}");
                }
            }
            Command::CancelLocal {
                id,
                reason,
                notify_server,
            } => {
                self.pending.remove(&id);
                self.streams.retain(|_, rid| *rid != id);
                if notify_server {
                    self.send_cancelled(id, reason).await;
                }
            }
            Command::Close => return false,
        }
        true
    }

    async fn send_cancelled(&mut self, id: i64, reason: Option<String>) {
        let params = CancelledParams {
            request_id: RequestId::Number(id),
            reason,
        };
        match serde_json::to_value(&params) {
            Ok(value) => {
                let note = JsonRpcRequest::notification("notifications/cancelled", Some(value));
                if let Err(e) = self.transport.send(&note.into()).await {
                    log::warn!(target: targets::CLIENT, "cancel notification failed: {e}");
                }
            }
            Err(e) => {
                log::warn!(target: targets::CLIENT, "cancel params failed to serialize: {e}");
            }
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(JsonRpcMessage::Request(request)) => {
                if request.is_notification() {
                    if self.notifications.send(request).is_err() {
                        log::trace!(target: targets::CLIENT, "notification receiver dropped");
                    }
                } else {
                    self.handle_server_request(request).await;
                }
            }
            TransportEvent::Message(JsonRpcMessage::Response(response)) => {
                self.handle_response(response);
            }
            TransportEvent::Binary(header, payload) => {
                let Some(id) = self.streams.get(&header.stream_id).copied() else {
                    log::trace!(
                        target: targets::CLIENT,
                        "binary frame for unknown stream {} dropped",
                        header.stream_id
                    );
                    return;
                };
                if let Some(Slot::Stream(tx)) = self.pending.get(&id) {
                    let _ = tx.send(StreamInbound::Binary(header, payload));
                }
            }
        }
    }

    async fn handle_server_request(&mut self, request: JsonRpcRequest) {
        let Some(id) = request.id.clone() else {
            return;
        };
        if request.method == STREAM_MESSAGE_METHOD {
            self.route_stream_fragment(id, request.params);
            return;
        }
        if request.method == "ping" {
            let pong = JsonRpcResponse::success(id, Value::Object(serde_json::Map::new()));
            if let Err(e) = self.transport.send(&pong.into()).await {
                log::warn!(target: targets::CLIENT, "pong send failed: {e}");
            }
            return;
        }
        // The client serves nothing else.
        let error = McpError::method_not_found(&request.method);
        let refusal = JsonRpcResponse::error(Some(id), error.into());
        if let Err(e) = self.transport.send(&refusal.into()).await {
            log::warn!(target: targets::CLIENT, "refusal send failed: {e}");
        }
    }

    fn route_stream_fragment(&mut self, id: RequestId, params: Option<Value>) {
        let RequestId::Number(id) = id else {
            log::trace!(target: targets::CLIENT, "stream fragment with non-numeric id dropped");
            return;
        };
        let Some(params) = params else {
            log::warn!(target: targets::CLIENT, "stream fragment without params for request {id}");
            return;
        };
        let fragment: StreamMessage = match serde_json::from_value(params) {
            Ok(fragment) => fragment,
            Err(e) => {
                log::warn!(
                    target: targets::CLIENT,
                    "malformed stream fragment for request {id}: {e}"
                );
                return;
            }
        };
        let Some(Slot::Stream(tx)) = self.pending.get(&id) else {
            log::trace!(target: targets::CLIENT, "stream fragment for unknown request {id} dropped");
            return;
        };
        if let StreamMessage::Start(start) = &fragment {
            if start.binary {
                self.streams.insert(start.stream_id, id);
            }
        }
        let stream_id = *fragment.stream_id();
        let terminal = fragment.is_terminal();
        let _ = tx.send(StreamInbound::Fragment(fragment));
        if terminal {
            self.pending.remove(&id);
            self.streams.remove(&stream_id);
        }
    }

    fn handle_response(&mut self, response: JsonRpcResponse) {
        let Some(RequestId::Number(id)) = response.id else {
            log::trace!(target: targets::CLIENT, "response without a numeric id dropped");
            return;
        };
        let Some(slot) = self.pending.remove(&id) else {
            log::trace!(target: targets::CLIENT, "unmatched response for id {id} dropped");
            return;
        };
        let result = match response.error {
            Some(error) => Err(McpError::from(error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        match slot {
            Slot::Single(tx) => {
                let _ = tx.send(result);
            }
            Slot::Stream(tx) => {
                let _ = tx.send(StreamInbound::Response(result));
            }
        }
        self.streams.retain(|_, rid| *rid != id);
    }

    fn fail_pending(&mut self) {
        for (_, slot) in self.pending.drain() {
            deliver_failure(
                slot,
                McpError::internal_error("connection closed before response"),
            );
        }
        self.streams.clear();
    }
}

fn deliver_failure(slot: Slot, error: McpError) {
    match slot {
        Slot::Single(tx) => {
            let _ = tx.send(Err(error));
        }
        Slot::Stream(tx) => {
            let _ = tx.send(StreamInbound::Response(Err(error)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcpgate_core::McpErrorCode;
    use mcpgate_protocol::{
        BinaryChunkHeader, JsonRpcError, ServerCapabilities, ServerInfo,
    };
    use mcpgate_transport::TransportCapabilities;
    use serde_json::json;

    struct TestTransport {
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
        outbound: mpsc::UnboundedSender<JsonRpcMessage>,
    }

    #[async_trait]
    impl Transport for TestTransport {
        async fn connect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError> {
            self.outbound
                .send(message.clone())
                .map_err(|_| TransportError::Closed)
        }

        async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError> {
            Ok(self.inbound.recv().await)
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn capabilities(&self) -> TransportCapabilities {
            TransportCapabilities::all()
        }
    }

    async fn connected() -> (
        Client,
        mpsc::UnboundedSender<TransportEvent>,
        mpsc::UnboundedReceiver<JsonRpcMessage>,
    ) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let client = Client::connect(TestTransport {
            inbound: in_rx,
            outbound: out_tx,
        })
        .await
        .unwrap();
        (client, in_tx, out_rx)
    }

    async fn next_request(wire: &mut mpsc::UnboundedReceiver<JsonRpcMessage>) -> JsonRpcRequest {
        match wire.recv().await.unwrap() {
            JsonRpcMessage::Request(request) => request,
            JsonRpcMessage::Response(response) => panic!("expected request, got {response:?}"),
        }
    }

    fn fragment_request(id: &RequestId, fragment: &StreamMessage) -> TransportEvent {
        TransportEvent::Message(JsonRpcMessage::Request(JsonRpcRequest::new(
            STREAM_MESSAGE_METHOD,
            Some(serde_json::to_value(fragment).unwrap()),
            id.clone(),
        )))
    }

    fn sid() -> StreamId {
        StreamId::from_bytes([3u8; 16])
    }

    #[tokio::test]
    async fn test_call_resolves_matching_response() {
        let (client, in_tx, mut out_rx) = connected().await;
        let server = tokio::spawn(async move {
            let request = next_request(&mut out_rx).await;
            assert_eq!(request.method, "ping");
            assert_eq!(request.id, Some(RequestId::Number(1)));
            let response = JsonRpcResponse::success(request.id.unwrap(), json!({"ok": true}));
            in_tx.send(TransportEvent::Message(response.into())).unwrap();
        });

        let value = client.call("ping", None).await.unwrap();
        assert_eq!(value, json!({"ok": true}));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_responses_resolve_out_of_order() {
        let (client, in_tx, mut out_rx) = connected().await;
        let server = tokio::spawn(async move {
            let first = next_request(&mut out_rx).await;
            let second = next_request(&mut out_rx).await;
            // Answer in reverse arrival order.
            for request in [second, first] {
                let body = json!({"method": request.method});
                let response = JsonRpcResponse::success(request.id.unwrap(), body);
                in_tx.send(TransportEvent::Message(response.into())).unwrap();
            }
        });

        let (a, b) = tokio::join!(client.call("first", None), client.call("second", None));
        assert_eq!(a.unwrap(), json!({"method": "first"}));
        assert_eq!(b.unwrap(), json!({"method": "second"}));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_call_surfaces_typed_error() {
        let (client, in_tx, mut out_rx) = connected().await;
        let server = tokio::spawn(async move {
            let request = next_request(&mut out_rx).await;
            let response = JsonRpcResponse::error(
                request.id,
                JsonRpcError {
                    code: McpErrorCode::MethodNotFound.code(),
                    message: "method not found: nope".to_owned(),
                    data: None,
                },
            );
            in_tx.send(TransportEvent::Message(response.into())).unwrap();
        });

        let err = client.call("nope", None).await.unwrap_err();
        assert_eq!(err.code, McpErrorCode::MethodNotFound);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unmatched_response_is_dropped() {
        let (client, in_tx, mut out_rx) = connected().await;
        // Nothing pending has id 999; this must be ignored.
        let stray = JsonRpcResponse::success(RequestId::Number(999), json!("stray"));
        in_tx.send(TransportEvent::Message(stray.into())).unwrap();

        let server = tokio::spawn(async move {
            let request = next_request(&mut out_rx).await;
            let response = JsonRpcResponse::success(request.id.unwrap(), json!("real"));
            in_tx.send(TransportEvent::Message(response.into())).unwrap();
        });

        let value = client.call("ping", None).await.unwrap();
        assert_eq!(value, json!("real"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_notifications_reach_taken_receiver() {
        let (client, in_tx, _out_rx) = connected().await;
        let mut notifications = client.take_notifications().unwrap();
        assert!(client.take_notifications().is_none());

        let note = JsonRpcRequest::notification(
            "notifications/resources/updated",
            Some(json!({"uri": "file:///tmp/a"})),
        );
        in_tx.send(TransportEvent::Message(note.into())).unwrap();

        let received = notifications.recv().await.unwrap();
        assert_eq!(received.method, "notifications/resources/updated");
        assert!(received.is_notification());
    }

    #[tokio::test]
    async fn test_server_ping_answered() {
        let (_client, in_tx, mut out_rx) = connected().await;
        let ping = JsonRpcRequest::new("ping", None, RequestId::Number(7));
        in_tx.send(TransportEvent::Message(ping.into())).unwrap();

        match out_rx.recv().await.unwrap() {
            JsonRpcMessage::Response(response) => {
                assert_eq!(response.id, Some(RequestId::Number(7)));
                assert_eq!(response.result, Some(json!({})));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_server_request_refused() {
        let (_client, in_tx, mut out_rx) = connected().await;
        let request = JsonRpcRequest::new("sampling/createMessage", None, RequestId::Number(9));
        in_tx.send(TransportEvent::Message(request.into())).unwrap();

        match out_rx.recv().await.unwrap() {
            JsonRpcMessage::Response(response) => {
                assert_eq!(response.id, Some(RequestId::Number(9)));
                let error = response.error.unwrap();
                assert_eq!(error.code, McpErrorCode::MethodNotFound.code());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_call_stream_routes_fragments() {
        let (client, in_tx, mut out_rx) = connected().await;
        let mut handle = client.call_stream("tools/call", Some(json!({"name": "gen"}))).unwrap();

        let request = next_request(&mut out_rx).await;
        let id = request.id.unwrap();
        for fragment in [
            StreamMessage::start(sid(), "tools/call", false),
            StreamMessage::chunk(sid(), 0, json!("a")),
            StreamMessage::chunk(sid(), 1, json!("b")),
            StreamMessage::done(sid(), Some(json!({"count": 2}))),
        ] {
            in_tx.send(fragment_request(&id, &fragment)).unwrap();
        }

        assert_eq!(handle.next().await.unwrap().unwrap(), StreamPayload::Json(json!("a")));
        assert_eq!(handle.next().await.unwrap().unwrap(), StreamPayload::Json(json!("b")));
        assert!(handle.next().await.is_none());
        assert_eq!(handle.summary(), Some(&json!({"count": 2})));
    }

    #[tokio::test]
    async fn test_call_stream_binary_frames_routed() {
        let (client, in_tx, mut out_rx) = connected().await;
        let mut handle = client.call_stream("tools/call", None).unwrap();

        let request = next_request(&mut out_rx).await;
        let id = request.id.unwrap();
        in_tx
            .send(fragment_request(&id, &StreamMessage::start(sid(), "tools/call", true)))
            .unwrap();
        in_tx
            .send(TransportEvent::Binary(
                BinaryChunkHeader::new(sid(), 0),
                b"chunk".to_vec(),
            ))
            .unwrap();
        in_tx
            .send(fragment_request(&id, &StreamMessage::done(sid(), None)))
            .unwrap();

        assert_eq!(
            handle.next().await.unwrap().unwrap(),
            StreamPayload::Binary(b"chunk".to_vec())
        );
        assert!(handle.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_call_answered_with_plain_response() {
        let (client, in_tx, mut out_rx) = connected().await;
        let mut handle = client.call_stream("tools/call", None).unwrap();

        let request = next_request(&mut out_rx).await;
        let response = JsonRpcResponse::success(request.id.unwrap(), json!({"value": 1}));
        in_tx.send(TransportEvent::Message(response.into())).unwrap();

        assert_eq!(
            handle.next().await.unwrap().unwrap(),
            StreamPayload::Json(json!({"value": 1}))
        );
        assert!(handle.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_stream_notifies_server_and_drops_late_fragments() {
        let (client, in_tx, mut out_rx) = connected().await;
        let mut handle = client.call_stream("tools/call", None).unwrap();
        let request = next_request(&mut out_rx).await;
        let id = request.id.unwrap();

        handle.cancel(Some("lost interest".to_owned()));

        let note = next_request(&mut out_rx).await;
        assert!(note.is_notification());
        assert_eq!(note.method, "notifications/cancelled");
        let params: CancelledParams = serde_json::from_value(note.params.unwrap()).unwrap();
        assert_eq!(params.request_id, id);
        assert_eq!(params.reason.as_deref(), Some("lost interest"));

        // A fragment arriving after cancellation falls on the floor.
        in_tx
            .send(fragment_request(&id, &StreamMessage::start(sid(), "tools/call", false)))
            .unwrap();
        assert!(handle.next().await.is_none());

        // The connection still serves ordinary calls.
        let server = tokio::spawn(async move {
            let request = next_request(&mut out_rx).await;
            let response = JsonRpcResponse::success(request.id.unwrap(), json!({}));
            in_tx.send(TransportEvent::Message(response.into())).unwrap();
        });
        client.ping().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_close_fails_pending_call() {
        let (client, in_tx, mut out_rx) = connected().await;
        let server = tokio::spawn(async move {
            let _request = next_request(&mut out_rx).await;
            // Close the inbound side instead of answering.
            drop(in_tx);
        });

        let err = client.call("ping", None).await.unwrap_err();
        assert_eq!(err.code, McpErrorCode::InternalError);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_negotiates_and_announces() {
        let (client, in_tx, mut out_rx) = connected().await;
        let server = tokio::spawn(async move {
            let request = next_request(&mut out_rx).await;
            assert_eq!(request.method, "initialize");
            let params: InitializeParams =
                serde_json::from_value(request.params.unwrap()).unwrap();
            assert_eq!(params.protocol_version, PROTOCOL_VERSION);
            assert_eq!(params.client_info.name, "probe");

            let result = InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_owned(),
                capabilities: ServerCapabilities::default(),
                server_info: ServerInfo {
                    name: "gateway".to_owned(),
                    version: "0.1.0".to_owned(),
                },
                instructions: None,
            };
            let response = JsonRpcResponse::success(
                request.id.unwrap(),
                serde_json::to_value(&result).unwrap(),
            );
            in_tx.send(TransportEvent::Message(response.into())).unwrap();

            let note = next_request(&mut out_rx).await;
            assert!(note.is_notification());
            assert_eq!(note.method, "notifications/initialized");
        });

        let result = client
            .initialize(ClientInfo {
                name: "probe".to_owned(),
                version: "1.0".to_owned(),
            })
            .await
            .unwrap();
        assert_eq!(result.server_info.name, "gateway");

        let session = client.session().unwrap();
        assert_eq!(session.protocol_version(), PROTOCOL_VERSION);
        assert_eq!(session.server_info().name, "gateway");
        assert_eq!(session.client_info().name, "probe");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_rejects_unsupported_version() {
        let (client, in_tx, mut out_rx) = connected().await;
        let server = tokio::spawn(async move {
            let request = next_request(&mut out_rx).await;
            let result = InitializeResult {
                protocol_version: "1900-01-01".to_owned(),
                capabilities: ServerCapabilities::default(),
                server_info: ServerInfo {
                    name: "relic".to_owned(),
                    version: "0.0.1".to_owned(),
                },
                instructions: None,
            };
            let response = JsonRpcResponse::success(
                request.id.unwrap(),
                serde_json::to_value(&result).unwrap(),
            );
            in_tx.send(TransportEvent::Message(response.into())).unwrap();
        });

        let err = client
            .initialize(ClientInfo {
                name: "probe".to_owned(),
                version: "1.0".to_owned(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, McpErrorCode::InvalidRequest);
        assert!(client.session().is_none());
        server.await.unwrap();
    }
}
