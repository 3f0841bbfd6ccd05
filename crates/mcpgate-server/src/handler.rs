//! Handler traits for tools, resources, and prompts.
//!
//! A handler owns its definition: the router asks for it at registration
//! time and again when listing. Handlers also declare the transport
//! capabilities they need, and the router hides a handler from any
//! connection whose transport cannot carry it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mcpgate_core::{CancelToken, McpError, McpResult, ProgressSink, RequestCx};
use mcpgate_protocol::{
    Content, JsonRpcRequest, ProgressParams, ProgressToken, Prompt, PromptMessage, Resource,
    ResourceContent, ResourceTemplate, Tool,
};
use mcpgate_transport::TransportCapabilities;
use serde_json::Value;

use crate::stream::StreamProducer;

// ============================================================================
// Progress Notification Sender
// ============================================================================

/// Forwards handler progress updates to the peer as
/// `notifications/progress` requests.
///
/// The dispatch layer builds one per request that carried a progress
/// token; the callback pushes each finished notification onto the
/// connection's outbound queue.
pub struct ProgressNotificationSender<F>
where
    F: Fn(JsonRpcRequest) + Send + Sync,
{
    /// The progress token from the original request.
    token: ProgressToken,
    /// Callback to send notifications.
    send_fn: F,
}

impl<F> ProgressNotificationSender<F>
where
    F: Fn(JsonRpcRequest) + Send + Sync,
{
    /// Creates a sender bound to the request's progress token.
    pub fn new(token: ProgressToken, send_fn: F) -> Self {
        Self { token, send_fn }
    }
}

impl<F> ProgressSink for ProgressNotificationSender<F>
where
    F: Fn(JsonRpcRequest) + Send + Sync,
{
    fn send_progress(&self, progress: f64, total: Option<f64>, message: Option<&str>) {
        let params = match total {
            Some(t) => ProgressParams::with_total(self.token.clone(), progress, t),
            None => ProgressParams::new(self.token.clone(), progress),
        };
        let params = if let Some(msg) = message {
            params.with_message(msg)
        } else {
            params
        };

        let notification = JsonRpcRequest::notification(
            "notifications/progress",
            Some(serde_json::to_value(&params).unwrap_or_default()),
        );
        (self.send_fn)(notification);
    }
}

impl<F> std::fmt::Debug for ProgressNotificationSender<F>
where
    F: Fn(JsonRpcRequest) + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressNotificationSender")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// Builds a request context, wiring progress reporting when the request
/// carried a progress token.
pub fn create_context_with_progress<F>(
    request_id: u64,
    cancel: CancelToken,
    progress_token: Option<ProgressToken>,
    send_fn: F,
) -> RequestCx
where
    F: Fn(JsonRpcRequest) + Send + Sync + 'static,
{
    match progress_token {
        Some(token) => RequestCx::with_progress(
            request_id,
            cancel,
            Arc::new(ProgressNotificationSender::new(token, send_fn)),
        ),
        None => RequestCx::new(request_id, cancel),
    }
}

// ============================================================================
// Handler Traits
// ============================================================================

/// Handler for a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Returns the tool definition.
    fn definition(&self) -> Tool;

    /// Transport capabilities the tool needs.
    ///
    /// A tool is listed and callable only on connections whose transport
    /// provides every declared bit. The default asks for plain
    /// request/response messaging, which every transport has.
    fn required_capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::default()
    }

    /// Whether the tool prefers to stream its output.
    ///
    /// When this returns true and the connection's transport supports
    /// text streaming, the router invokes [`ToolHandler::call_stream`]
    /// instead of [`ToolHandler::call`].
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Calls the tool with the given arguments.
    async fn call(&self, cx: &RequestCx, arguments: Value) -> McpResult<Vec<Content>>;

    /// Streams the tool's output through `stream`.
    ///
    /// Only invoked when [`ToolHandler::supports_streaming`] returns
    /// true. A failure before the stream opened is answered as a plain
    /// JSON-RPC error; after it opened, as the stream's terminal Error
    /// event.
    async fn call_stream(
        &self,
        cx: &RequestCx,
        arguments: Value,
        stream: &mut StreamProducer,
    ) -> McpResult<()> {
        let _ = (cx, arguments, stream);
        Err(McpError::internal_error("tool does not stream"))
    }
}

/// Parameters captured from a URI template match, keyed by placeholder name.
pub type UriParams = HashMap<String, String>;

/// Handler for a resource, or a family of resources behind a URI template.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Returns the resource definition.
    fn definition(&self) -> Resource;

    /// Returns the URI template this handler matches, if it serves a
    /// parameterized family instead of a single static URI.
    fn template(&self) -> Option<ResourceTemplate> {
        None
    }

    /// Transport capabilities the resource needs.
    fn required_capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::default()
    }

    /// Reads the resource content.
    ///
    /// `uri` is the exact URI the client asked for; `params` holds the
    /// values captured by the template placeholders, empty for static
    /// resources.
    async fn read(
        &self,
        cx: &RequestCx,
        uri: &str,
        params: &UriParams,
    ) -> McpResult<Vec<ResourceContent>>;
}

/// Handler for a prompt.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    /// Returns the prompt definition.
    fn definition(&self) -> Prompt;

    /// Transport capabilities the prompt needs.
    fn required_capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::default()
    }

    /// Produces the prompt messages for the given arguments.
    async fn get(
        &self,
        cx: &RequestCx,
        arguments: HashMap<String, String>,
    ) -> McpResult<Vec<PromptMessage>>;
}

/// A boxed tool handler.
pub type BoxedToolHandler = Box<dyn ToolHandler>;

/// A boxed resource handler.
pub type BoxedResourceHandler = Box<dyn ResourceHandler>;

/// A boxed prompt handler.
pub type BoxedPromptHandler = Box<dyn PromptHandler>;
