//! MCP gateway server.
//!
//! This crate provides the server side of the gateway:
//! - Builder-based server configuration
//! - Tool, resource, and prompt registration with capability-aware
//!   visibility
//! - Request routing, pagination, and schema validation
//! - Streamed tool output over capable transports
//! - Session state, subscriptions, and cancellation
//!
//! A server is built once and then served over one or more transports.
//! [`Server::serve`] drives a single connection; [`Server::run_stdio`],
//! [`Server::serve_ws`], and [`serve_http`] wrap it for the common
//! deployments.

#![forbid(unsafe_code)]

mod builder;
mod handler;
mod http;
mod router;
mod session;
mod stream;


pub use builder::{DEFAULT_REQUEST_TIMEOUT_SECS, ServerBuilder};
pub use handler::{
    BoxedPromptHandler, BoxedResourceHandler, BoxedToolHandler, ProgressNotificationSender,
    PromptHandler, ResourceHandler, ToolHandler, UriParams, create_context_with_progress,
};
pub use http::serve_http;
pub use router::{PAGE_SIZE, Router};
pub use session::Session;
pub use stream::StreamProducer;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{Level, LevelFilter, debug, error, info, trace, warn};
use mcpgate_core::logging::{StderrLogger, targets};
use mcpgate_core::{CancelToken, McpError, McpErrorCode};
use mcpgate_protocol::{
    CallToolParams, CancelledParams, GetPromptParams, InitializeParams, JsonRpcError,
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, ListPromptsParams,
    ListResourceTemplatesParams, ListResourcesParams, ListToolsParams, LogLevel, Prompt,
    ReadResourceParams, RequestId, Resource, ResourceTemplate, ServerCapabilities, ServerInfo,
    SetLogLevelParams, SubscribeResourceParams, Tool, UnsubscribeResourceParams,
};
use mcpgate_transport::{
    StdioTransport, Transport, TransportCapabilities, TransportError, TransportEvent, WsTransport,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::stream::Outbound;

// ============================================================================
// Lifecycle hooks
// ============================================================================

/// Type alias for startup hook function.
pub type StartupHook =
    Box<dyn FnOnce() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send>;

/// Type alias for shutdown hook function.
pub type ShutdownHook = Box<dyn FnOnce() + Send>;

/// Lifecycle hooks for server startup and shutdown.
///
/// - `on_startup` runs before the server starts accepting traffic
///   (failure aborts startup)
/// - `on_shutdown` runs when the serving entry point winds down
///
/// Hooks fire once, from the serving entry points ([`Server::run_stdio`],
/// [`Server::serve_ws`], [`serve_http`]); a bare [`Server::serve`] call
/// does not consume them.
#[derive(Default)]
pub struct LifespanHooks {
    /// Hook called before the server starts accepting traffic.
    pub on_startup: Option<StartupHook>,
    /// Hook called when the server is shutting down.
    pub on_shutdown: Option<ShutdownHook>,
}

impl LifespanHooks {
    /// Creates empty lifecycle hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// Logging configuration
// ============================================================================

/// Logging configuration for the server.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum log level (default: INFO).
    pub level: Level,
    /// Show timestamps in logs (default: true).
    pub timestamps: bool,
    /// Show module targets in logs (default: true).
    pub targets: bool,
    /// Show file:line in logs (default: false).
    pub file_line: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            timestamps: true,
            targets: true,
            file_line: false,
        }
    }
}

impl LoggingConfig {
    /// Create logging config from environment variables.
    ///
    /// Respects:
    /// - `MCPGATE_LOG`: Log level (error, warn, info, debug, trace)
    /// - `MCPGATE_LOG_TIMESTAMPS`: Show timestamps (0/false to disable)
    /// - `MCPGATE_LOG_TARGETS`: Show targets (0/false to disable)
    /// - `MCPGATE_LOG_FILE_LINE`: Show file:line (1/true to enable)
    #[must_use]
    pub fn from_env() -> Self {
        let level = std::env::var("MCPGATE_LOG")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "error" => Some(Level::Error),
                "warn" | "warning" => Some(Level::Warn),
                "info" => Some(Level::Info),
                "debug" => Some(Level::Debug),
                "trace" => Some(Level::Trace),
                _ => None,
            })
            .unwrap_or(Level::Info);

        let timestamps = std::env::var("MCPGATE_LOG_TIMESTAMPS")
            .map(|s| !matches!(s.to_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        let targets = std::env::var("MCPGATE_LOG_TARGETS")
            .map(|s| !matches!(s.to_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        let file_line = std::env::var("MCPGATE_LOG_FILE_LINE")
            .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            level,
            timestamps,
            targets,
            file_line,
        }
    }
}

// ============================================================================
// Notifier
// ============================================================================

/// Handle for pushing server-initiated notifications to every live
/// connection.
///
/// Cloneable and detached from any single connection: hosts keep one
/// around and call it when registered tools, resources, or prompts
/// change behind the server's back. Resource updates fan out by URI and
/// each connection applies its own subscription filter, so only
/// subscribed clients see `notifications/resources/updated`.
#[derive(Clone)]
pub struct ServerNotifier {
    connections: Arc<Mutex<Vec<UnboundedSender<Outbound>>>>,
}

impl ServerNotifier {
    /// Announces that the tool list changed.
    pub fn tools_list_changed(&self) {
        self.broadcast_notification("notifications/tools/list_changed");
    }

    /// Announces that the resource list changed.
    pub fn resources_list_changed(&self) {
        self.broadcast_notification("notifications/resources/list_changed");
    }

    /// Announces that the prompt list changed.
    pub fn prompts_list_changed(&self) {
        self.broadcast_notification("notifications/prompts/list_changed");
    }

    /// Announces that the resource at `uri` changed.
    ///
    /// Delivered only to connections subscribed to that URI.
    pub fn resource_updated(&self, uri: impl Into<String>) {
        self.broadcast(Outbound::ResourceUpdated(uri.into()));
    }

    fn broadcast_notification(&self, method: &str) {
        self.broadcast(Outbound::Message(JsonRpcMessage::Request(
            JsonRpcRequest::notification(method, None),
        )));
    }

    fn broadcast(&self, outbound: Outbound) {
        if let Ok(mut connections) = self.connections.lock() {
            // Dropping dead connections here keeps the list bounded by
            // the number of live ones.
            connections.retain(|tx| tx.send(outbound.clone()).is_ok());
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// An MCP server instance.
///
/// Built with [`ServerBuilder`]; serves any number of connections over
/// any [`Transport`]. What a connection can see and do is decided per
/// connection from the transport's capability flags.
pub struct Server {
    pub(crate) info: ServerInfo,
    pub(crate) capabilities: ServerCapabilities,
    pub(crate) router: Router,
    pub(crate) instructions: Option<String>,
    /// Request timeout in seconds (0 = no timeout).
    pub(crate) request_timeout_secs: u64,
    /// Logging configuration.
    pub(crate) logging: LoggingConfig,
    /// Lifecycle hooks (wrapped in Option so they can be taken once).
    pub(crate) lifespan: Mutex<Option<LifespanHooks>>,
    /// Outbound queues of every live connection, for notification fan-out.
    pub(crate) connections: Arc<Mutex<Vec<UnboundedSender<Outbound>>>>,
}

impl Server {
    /// Creates a new server builder.
    #[must_use]
    #[allow(clippy::new_ret_no_self)]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> ServerBuilder {
        ServerBuilder::new(name, version)
    }

    /// Returns the server info.
    #[must_use]
    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Returns the server capabilities.
    #[must_use]
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// Lists all registered tools, ignoring transport visibility.
    #[must_use]
    pub fn tools(&self) -> Vec<Tool> {
        self.router.tools(TransportCapabilities::all())
    }

    /// Lists all registered resources, ignoring transport visibility.
    #[must_use]
    pub fn resources(&self) -> Vec<Resource> {
        self.router.resources(TransportCapabilities::all())
    }

    /// Lists all registered resource templates, ignoring transport
    /// visibility.
    #[must_use]
    pub fn resource_templates(&self) -> Vec<ResourceTemplate> {
        self.router.resource_templates(TransportCapabilities::all())
    }

    /// Lists all registered prompts, ignoring transport visibility.
    #[must_use]
    pub fn prompts(&self) -> Vec<Prompt> {
        self.router.prompts(TransportCapabilities::all())
    }

    /// Returns a handle for pushing notifications to live connections.
    #[must_use]
    pub fn notifier(&self) -> ServerNotifier {
        ServerNotifier {
            connections: Arc::clone(&self.connections),
        }
    }

    /// Installs the stderr logger described by the logging config.
    pub(crate) fn init_logging(&self) {
        let result = StderrLogger::new()
            .level(self.logging.level)
            .with_timestamps(self.logging.timestamps)
            .with_targets(self.logging.targets)
            .with_file_line(self.logging.file_line)
            .init();

        if let Err(e) = result {
            // Logger already installed (likely by the host), not an error.
            eprintln!("note: logging not initialized (logger already set): {e}");
        }
    }

    pub(crate) fn log_startup(&self, transport_label: &str) {
        info!(
            target: targets::SERVER,
            "{} v{} on {}: {} tools, {} resources, {} prompts",
            self.info.name,
            self.info.version,
            transport_label,
            self.router.tools_count(),
            self.router.resources_count(),
            self.router.prompts_count(),
        );
    }

    /// Runs the startup lifecycle hook, if configured.
    ///
    /// Returns `true` if startup succeeded (or no hook was configured).
    pub(crate) fn run_startup_hook(&self) -> bool {
        let hook = match self.lifespan.lock() {
            Ok(mut guard) => guard.as_mut().and_then(|hooks| hooks.on_startup.take()),
            Err(_) => None,
        };

        if let Some(hook) = hook {
            debug!(target: targets::SERVER, "running startup hook");
            match hook() {
                Ok(()) => true,
                Err(e) => {
                    error!(target: targets::SERVER, "startup hook failed: {e}");
                    false
                }
            }
        } else {
            true
        }
    }

    /// Runs the shutdown lifecycle hook, if configured.
    pub(crate) fn run_shutdown_hook(&self) {
        let hook = match self.lifespan.lock() {
            Ok(mut guard) => guard.as_mut().and_then(|hooks| hooks.on_shutdown.take()),
            Err(_) => None,
        };

        if let Some(hook) = hook {
            debug!(target: targets::SERVER, "running shutdown hook");
            hook();
        }
    }

    /// Runs the server on the process's stdin/stdout.
    ///
    /// This is the primary way to run MCP servers as subprocesses.
    /// Returns when stdin reaches end of file.
    pub async fn run_stdio(self) -> Result<(), TransportError> {
        self.init_logging();
        self.log_startup("stdio");
        if !self.run_startup_hook() {
            return Err(TransportError::Io(std::io::Error::other(
                "startup hook failed",
            )));
        }
        let result = self.serve(StdioTransport::stdio()).await;
        self.run_shutdown_hook();
        result
    }

    /// Accepts WebSocket connections on `listener` and serves each one.
    ///
    /// Every accepted connection gets its own session; the loop only
    /// returns when the listener itself fails.
    pub async fn serve_ws(self: Arc<Self>, listener: TcpListener) -> Result<(), TransportError> {
        self.init_logging();
        self.log_startup("websocket");
        if !self.run_startup_hook() {
            return Err(TransportError::Io(std::io::Error::other(
                "startup hook failed",
            )));
        }

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    self.run_shutdown_hook();
                    return Err(TransportError::Io(e));
                }
            };
            debug!(target: targets::SERVER, "websocket connection from {peer}");
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                match WsTransport::accept(stream).await {
                    Ok(transport) => {
                        if let Err(e) = server.serve(transport).await {
                            error!(target: targets::SERVER, "connection from {peer} failed: {e}");
                        }
                    }
                    Err(e) => {
                        warn!(target: targets::TRANSPORT, "websocket handshake with {peer} failed: {e}");
                    }
                }
            });
        }
    }

    /// Serves a single connection until the transport closes.
    ///
    /// Requests are dispatched one at a time in arrival order, but the
    /// outbound queue (progress, stream fragments, notifications) keeps
    /// draining while a handler runs, so streamed output reaches the
    /// client before the call settles.
    pub async fn serve<T: Transport>(&self, mut transport: T) -> Result<(), TransportError> {
        transport.connect().await?;
        let caps = transport.capabilities();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        self.register_connection(out_tx.clone());

        let mut session = Session::new(self.info.clone(), self.capabilities.clone());
        let subscriptions = session.subscriptions();

        debug!(target: targets::SERVER, "connection open (caps: {caps})");

        loop {
            let event = tokio::select! {
                Some(outbound) = out_rx.recv() => {
                    self.send_outbound(&mut transport, &subscriptions, outbound).await;
                    continue;
                }
                event = transport.recv() => event,
            };

            let message = match event {
                Ok(Some(TransportEvent::Message(message))) => message,
                Ok(Some(TransportEvent::Binary(header, _))) => {
                    trace!(
                        target: targets::TRANSPORT,
                        "dropping inbound binary frame for stream {}",
                        header.stream_id
                    );
                    continue;
                }
                Ok(None) | Err(TransportError::Closed) => break,
                Err(e) => {
                    error!(target: targets::TRANSPORT, "transport error: {e}");
                    continue;
                }
            };

            let request = match message {
                JsonRpcMessage::Request(request) => request,
                JsonRpcMessage::Response(response) => {
                    trace!(
                        target: targets::SERVER,
                        "dropping unexpected response (id: {:?})",
                        response.id
                    );
                    continue;
                }
            };

            // Dispatch runs to completion before the next request is
            // read, but the outbound queue must keep flowing or a
            // streaming handler would deadlock against a full wire.
            let response = {
                let dispatch = self.handle_request(caps, &mut session, &out_tx, request);
                tokio::pin!(dispatch);
                loop {
                    tokio::select! {
                        response = &mut dispatch => break response,
                        Some(outbound) = out_rx.recv() => {
                            self.send_outbound(&mut transport, &subscriptions, outbound).await;
                        }
                    }
                }
            };

            if let Some(response) = response {
                if let Err(e) = transport.send(&JsonRpcMessage::Response(response)).await {
                    error!(target: targets::TRANSPORT, "failed to send response: {e}");
                    if matches!(e, TransportError::Closed) {
                        break;
                    }
                }
            }
        }

        self.unregister_connection(&out_tx);
        let _ = transport.close().await;
        debug!(target: targets::SERVER, "connection closed");
        Ok(())
    }

    /// Delivers one outbound queue item to the transport.
    async fn send_outbound<T: Transport>(
        &self,
        transport: &mut T,
        subscriptions: &Arc<Mutex<HashSet<String>>>,
        outbound: Outbound,
    ) {
        let message = match outbound {
            Outbound::Message(message) => message,
            Outbound::Binary(header, payload) => {
                if let Err(e) = transport.send_binary(&header, &payload).await {
                    error!(target: targets::TRANSPORT, "failed to send binary frame: {e}");
                }
                return;
            }
            Outbound::ResourceUpdated(uri) => {
                let subscribed = subscriptions
                    .lock()
                    .map(|subs| subs.contains(&uri))
                    .unwrap_or(false);
                if !subscribed {
                    return;
                }
                stream::resource_updated_notification(&uri)
            }
        };

        if let Err(e) = transport.send(&message).await {
            error!(target: targets::TRANSPORT, "failed to send notification: {e}");
        }
    }

    /// Handles a single JSON-RPC request or notification.
    ///
    /// Returns `None` when nothing should be written back: for
    /// notifications, and for calls a stream terminal already settled.
    pub(crate) async fn handle_request(
        &self,
        caps: TransportCapabilities,
        session: &mut Session,
        out: &UnboundedSender<Outbound>,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        let id = request.id.clone();
        let method = request.method.clone();
        let is_notification = id.is_none();

        debug!(target: targets::SERVER, "dispatching {method} (id: {id:?})");

        let cancel = CancelToken::new();
        let _active_guard = id
            .clone()
            .map(|id| ActiveRequestGuard::new(session.active_requests(), id, cancel.clone()));

        let result = match self.request_timeout_secs {
            0 => {
                self.dispatch_method(caps, session, out, &method, request.params, id.as_ref(), cancel)
                    .await
            }
            secs => {
                let dispatch = self.dispatch_method(
                    caps,
                    session,
                    out,
                    &method,
                    request.params,
                    id.as_ref(),
                    cancel,
                );
                match tokio::time::timeout(Duration::from_secs(secs), dispatch).await {
                    Ok(result) => result,
                    Err(_) => Err(McpError::new(
                        McpErrorCode::RequestCancelled,
                        format!("request timed out after {secs}s"),
                    )),
                }
            }
        };

        if is_notification {
            if let Err(e) = result {
                error!(target: targets::HANDLER, "notification '{method}' failed: {e}");
            }
            return None;
        }

        let response_id = id?;
        match result {
            Ok(Some(value)) => Some(JsonRpcResponse::success(response_id, value)),
            // The call was settled by a stream terminal event.
            Ok(None) => None,
            Err(e) => Some(JsonRpcResponse::error(
                Some(response_id),
                JsonRpcError::from(e),
            )),
        }
    }

    /// Dispatches a request to the appropriate handler.
    ///
    /// `Ok(None)` means the method produced no response body of its own.
    #[allow(clippy::too_many_arguments, clippy::too_many_lines)]
    async fn dispatch_method(
        &self,
        caps: TransportCapabilities,
        session: &mut Session,
        out: &UnboundedSender<Outbound>,
        method: &str,
        params: Option<serde_json::Value>,
        id: Option<&RequestId>,
        cancel: CancelToken,
    ) -> Result<Option<serde_json::Value>, McpError> {
        if cancel.is_cancelled() {
            return Err(McpError::request_cancelled());
        }

        // The client must complete the initialize handshake first; only
        // ping is allowed through for health checks.
        if !session.is_initialized() && method != "initialize" && method != "ping" {
            return Err(McpError::session_error(
                "Session not initialized. Client must send 'initialize' first.",
            ));
        }

        // Streamed events reuse the invoking call's id; a notification
        // has none, so streaming degrades to the buffered path.
        let request_id = id.cloned().unwrap_or(RequestId::Number(0));

        match method {
            "initialize" => {
                let params: InitializeParams = parse_params(params)?;
                let result =
                    self.router
                        .handle_initialize(session, params, self.instructions.as_deref())?;
                Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
            }
            "notifications/initialized" => {
                debug!(target: targets::SESSION, "client reports initialized");
                Ok(Some(serde_json::Value::Null))
            }
            "notifications/cancelled" => {
                let params: CancelledParams = parse_params(params)?;
                self.handle_cancelled_notification(session, &params);
                Ok(Some(serde_json::Value::Null))
            }
            "logging/setLevel" => {
                let params: SetLogLevelParams = parse_params(params)?;
                self.handle_set_log_level(&params);
                Ok(Some(json!({})))
            }
            "tools/list" => {
                let params: ListToolsParams = parse_params_or_default(params)?;
                let result = self.router.handle_tools_list(caps, params)?;
                Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
            }
            "tools/call" => {
                let params: CallToolParams = parse_params(params)?;
                let result = self
                    .router
                    .handle_tools_call(caps, &request_id, cancel, params, out)
                    .await?;
                match result {
                    Some(result) => {
                        Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
                    }
                    None => Ok(None),
                }
            }
            "resources/list" => {
                let params: ListResourcesParams = parse_params_or_default(params)?;
                let result = self.router.handle_resources_list(caps, params)?;
                Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
            }
            "resources/templates/list" => {
                let params: ListResourceTemplatesParams = parse_params_or_default(params)?;
                let result = self.router.handle_resource_templates_list(caps, params)?;
                Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
            }
            "resources/read" => {
                let params: ReadResourceParams = parse_params(params)?;
                let result = self
                    .router
                    .handle_resources_read(caps, &request_id, cancel, params, out)
                    .await?;
                Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
            }
            "resources/subscribe" => {
                let params: SubscribeResourceParams = parse_params(params)?;
                if !self.router.resource_exists(caps, &params.uri) {
                    return Err(McpError::resource_not_found(&params.uri));
                }
                session.subscribe_resource(params.uri);
                Ok(Some(json!({})))
            }
            "resources/unsubscribe" => {
                let params: UnsubscribeResourceParams = parse_params(params)?;
                session.unsubscribe_resource(&params.uri);
                Ok(Some(json!({})))
            }
            "prompts/list" => {
                let params: ListPromptsParams = parse_params_or_default(params)?;
                let result = self.router.handle_prompts_list(caps, params)?;
                Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
            }
            "prompts/get" => {
                let params: GetPromptParams = parse_params(params)?;
                let result = self
                    .router
                    .handle_prompts_get(caps, &request_id, cancel, params, out)
                    .await?;
                Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
            }
            "ping" => Ok(Some(json!({}))),
            _ => Err(McpError::method_not_found(method)),
        }
    }

    fn handle_cancelled_notification(&self, session: &Session, params: &CancelledParams) {
        let reason = params.reason.as_deref().unwrap_or("unspecified");
        info!(
            target: targets::SESSION,
            "cancellation requested for request {} (reason: {reason})",
            params.request_id
        );
        if !session.cancel_request(&params.request_id) {
            debug!(
                target: targets::SESSION,
                "no active request {} to cancel",
                params.request_id
            );
        }
    }

    fn handle_set_log_level(&self, params: &SetLogLevelParams) {
        let requested = match params.level {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        };

        // The client can quiet the server below its configured level but
        // never make it chattier.
        let configured = self.logging.level.to_level_filter();
        let effective = if requested > configured {
            configured
        } else {
            requested
        };

        log::set_max_level(effective);

        if effective == requested {
            info!(target: targets::SESSION, "log level set to {:?}", params.level);
        } else {
            warn!(
                target: targets::SESSION,
                "client requested log level {:?}; clamped to {effective:?}",
                params.level
            );
        }
    }

    pub(crate) fn register_connection(&self, tx: UnboundedSender<Outbound>) {
        if let Ok(mut connections) = self.connections.lock() {
            connections.push(tx);
        }
    }

    fn unregister_connection(&self, tx: &UnboundedSender<Outbound>) {
        if let Ok(mut connections) = self.connections.lock() {
            connections.retain(|registered| !registered.same_channel(tx));
        }
    }
}

// ============================================================================
// Active request tracking
// ============================================================================

/// Keeps a request's cancel token in the session's active table for the
/// duration of its dispatch.
struct ActiveRequestGuard {
    map: Arc<Mutex<HashMap<RequestId, CancelToken>>>,
    id: RequestId,
}

impl ActiveRequestGuard {
    fn new(map: Arc<Mutex<HashMap<RequestId, CancelToken>>>, id: RequestId, cancel: CancelToken) -> Self {
        if let Ok(mut guard) = map.lock() {
            if guard.insert(id.clone(), cancel).is_some() {
                warn!(target: targets::SESSION, "active request replaced for id {id}");
            }
        }
        Self { map, id }
    }
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.map.lock() {
            guard.remove(&self.id);
        }
    }
}

// ============================================================================
// Parameter parsing
// ============================================================================

/// Parses required parameters from JSON.
fn parse_params<T: serde::de::DeserializeOwned>(
    params: Option<serde_json::Value>,
) -> Result<T, McpError> {
    let value = params.ok_or_else(|| McpError::invalid_params("Missing required parameters"))?;
    serde_json::from_value(value).map_err(|e| McpError::invalid_params(e.to_string()))
}

/// Parses optional parameters from JSON, using the default if absent.
fn parse_params_or_default<T: serde::de::DeserializeOwned + Default>(
    params: Option<serde_json::Value>,
) -> Result<T, McpError> {
    match params {
        Some(value) => {
            serde_json::from_value(value).map_err(|e| McpError::invalid_params(e.to_string()))
        }
        None => Ok(T::default()),
    }
}
