//! Method routing and handler registries.
//!
//! The router owns every registered tool, resource, and prompt handler
//! and executes MCP methods against them. All lookups are filtered by
//! the invoking transport's capabilities: a handler that needs streaming
//! is invisible on a transport that cannot stream, absent from list
//! results and not-found when invoked.

use std::collections::HashMap;

use log::{debug, trace, warn};
use mcpgate_core::logging::targets;
use mcpgate_core::{CancelToken, McpError, McpErrorCode, McpResult, RequestCx};
use mcpgate_protocol::{
    CallToolParams, CallToolResult, Content, GetPromptParams, GetPromptResult, InitializeParams,
    InitializeResult, JsonRpcMessage, ListPromptsParams, ListPromptsResult,
    ListResourceTemplatesParams, ListResourceTemplatesResult, ListResourcesParams,
    ListResourcesResult, ListToolsParams, ListToolsResult, ProgressToken, Prompt,
    ReadResourceParams, ReadResourceResult, RequestId, Resource, ResourceTemplate,
    SUPPORTED_PROTOCOL_VERSIONS, Tool, is_supported_version, validate,
};
use mcpgate_transport::TransportCapabilities;
use serde_json::json;
use tokio::sync::mpsc;

use crate::handler::{
    BoxedPromptHandler, BoxedResourceHandler, BoxedToolHandler, PromptHandler, ResourceHandler,
    ToolHandler, UriParams, create_context_with_progress,
};
use crate::session::Session;
use crate::stream::{Outbound, StreamProducer};

/// Items per page for every list method.
pub const PAGE_SIZE: usize = 50;

// ============================================================================
// Router
// ============================================================================

/// Routes MCP methods to registered handlers.
pub struct Router {
    /// Tool handlers by name.
    tools: HashMap<String, BoxedToolHandler>,
    /// Static resource handlers by URI.
    resources: HashMap<String, BoxedResourceHandler>,
    /// Resource template entries by URI template.
    resource_templates: HashMap<String, ResourceTemplateEntry>,
    /// Prompt handlers by name.
    prompts: HashMap<String, BoxedPromptHandler>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            resources: HashMap::new(),
            resource_templates: HashMap::new(),
            prompts: HashMap::new(),
        }
    }

    /// Adds a tool handler, keyed by its definition's name.
    pub fn add_tool<H: ToolHandler + 'static>(&mut self, handler: H) {
        let def = handler.definition();
        self.tools.insert(def.name, Box::new(handler));
    }

    /// Adds a resource handler.
    ///
    /// Handlers that report a template register as template matchers;
    /// the rest register under their definition's static URI.
    pub fn add_resource<H: ResourceHandler + 'static>(&mut self, handler: H) {
        let template = handler.template();
        let boxed: BoxedResourceHandler = Box::new(handler);

        if let Some(template) = template {
            let entry = ResourceTemplateEntry {
                matcher: UriTemplate::new(&template.uri_template),
                template: template.clone(),
                handler: boxed,
            };
            self.resource_templates
                .insert(template.uri_template, entry);
        } else {
            let def = boxed.definition();
            self.resources.insert(def.uri, boxed);
        }
    }

    /// Adds a prompt handler, keyed by its definition's name.
    pub fn add_prompt<H: PromptHandler + 'static>(&mut self, handler: H) {
        let def = handler.definition();
        self.prompts.insert(def.name, Box::new(handler));
    }

    /// Returns the tool definitions visible with `caps`, sorted by name.
    #[must_use]
    pub fn tools(&self, caps: TransportCapabilities) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .tools
            .values()
            .filter(|handler| caps.contains(handler.required_capabilities()))
            .map(|handler| handler.definition())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Returns the resource definitions visible with `caps`, sorted by URI.
    #[must_use]
    pub fn resources(&self, caps: TransportCapabilities) -> Vec<Resource> {
        let mut resources: Vec<Resource> = self
            .resources
            .values()
            .filter(|handler| caps.contains(handler.required_capabilities()))
            .map(|handler| handler.definition())
            .collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
    }

    /// Returns the templates visible with `caps`, sorted by URI template.
    #[must_use]
    pub fn resource_templates(&self, caps: TransportCapabilities) -> Vec<ResourceTemplate> {
        let mut templates: Vec<ResourceTemplate> = self
            .resource_templates
            .values()
            .filter(|entry| caps.contains(entry.handler.required_capabilities()))
            .map(|entry| entry.template.clone())
            .collect();
        templates.sort_by(|a, b| a.uri_template.cmp(&b.uri_template));
        templates
    }

    /// Returns the prompt definitions visible with `caps`, sorted by name.
    #[must_use]
    pub fn prompts(&self, caps: TransportCapabilities) -> Vec<Prompt> {
        let mut prompts: Vec<Prompt> = self
            .prompts
            .values()
            .filter(|handler| caps.contains(handler.required_capabilities()))
            .map(|handler| handler.definition())
            .collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn tools_count(&self) -> usize {
        self.tools.len()
    }

    /// Returns the number of registered resources (static and template).
    #[must_use]
    pub fn resources_count(&self) -> usize {
        self.resources.len() + self.resource_templates.len()
    }

    /// Returns the number of registered prompts.
    #[must_use]
    pub fn prompts_count(&self) -> usize {
        self.prompts.len()
    }

    /// Returns whether a visible resource matches `uri`.
    #[must_use]
    pub fn resource_exists(&self, caps: TransportCapabilities, uri: &str) -> bool {
        self.resolve_resource(caps, uri).is_some()
    }

    fn resolve_resource(
        &self,
        caps: TransportCapabilities,
        uri: &str,
    ) -> Option<ResolvedResource<'_>> {
        if let Some(handler) = self.resources.get(uri) {
            if caps.contains(handler.required_capabilities()) {
                return Some(ResolvedResource {
                    handler,
                    params: UriParams::new(),
                });
            }
            // A hidden static URI still falls through to the template
            // matchers; hidden means absent, not shadowing.
        }

        for entry in self.resource_templates.values() {
            if !caps.contains(entry.handler.required_capabilities()) {
                continue;
            }
            if let Some(params) = entry.matcher.matches(uri) {
                return Some(ResolvedResource {
                    handler: &entry.handler,
                    params,
                });
            }
        }

        None
    }

    // ========================================================================
    // Request Dispatch Methods
    // ========================================================================

    /// Handles the `initialize` request.
    pub fn handle_initialize(
        &self,
        session: &mut Session,
        params: InitializeParams,
        instructions: Option<&str>,
    ) -> McpResult<InitializeResult> {
        debug!(
            target: targets::SESSION,
            "initializing session with client: {:?}",
            params.client_info.name
        );

        if !is_supported_version(&params.protocol_version) {
            return Err(McpError::invalid_params(format!(
                "unsupported protocol version: {:?}",
                params.protocol_version
            ))
            .with_data(json!({ "supported": SUPPORTED_PROTOCOL_VERSIONS })));
        }

        // Echo the requested version back; it is known to be supported.
        let negotiated = params.protocol_version;
        session.initialize(params.client_info, params.capabilities, negotiated.clone());

        Ok(InitializeResult {
            protocol_version: negotiated,
            capabilities: session.server_capabilities().clone(),
            server_info: session.server_info().clone(),
            instructions: instructions.map(String::from),
        })
    }

    /// Handles the `tools/list` request.
    pub fn handle_tools_list(
        &self,
        caps: TransportCapabilities,
        params: ListToolsParams,
    ) -> McpResult<ListToolsResult> {
        let (tools, next_cursor) = paginate(self.tools(caps), params.cursor.as_deref())?;
        Ok(ListToolsResult { tools, next_cursor })
    }

    /// Handles the `tools/call` request.
    ///
    /// Returns `Ok(None)` when the call was answered through a stream:
    /// the terminal Done or Error event settles it and no JSON-RPC
    /// response follows.
    pub(crate) async fn handle_tools_call(
        &self,
        caps: TransportCapabilities,
        request_id: &RequestId,
        cancel: CancelToken,
        params: CallToolParams,
        out: &mpsc::UnboundedSender<Outbound>,
    ) -> McpResult<Option<CallToolResult>> {
        debug!(target: targets::HANDLER, "calling tool: {}", params.name);
        trace!(target: targets::HANDLER, "tool arguments: {:?}", params.arguments);

        if cancel.is_cancelled() {
            return Err(McpError::request_cancelled());
        }

        let handler = self
            .tools
            .get(&params.name)
            .filter(|handler| caps.contains(handler.required_capabilities()))
            .ok_or_else(|| McpError::method_not_found(&format!("tool: {}", params.name)))?;

        // Tool arguments are always an object; absent means empty.
        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        let definition = handler.definition();
        if let Err(violations) = validate(&definition.input_schema, &arguments) {
            let detail: Vec<String> = violations
                .iter()
                .map(|v| format!("{}: {}", v.path, v.message))
                .collect();
            return Err(McpError::invalid_params(format!(
                "Input validation failed: {}",
                detail.join("; ")
            )));
        }

        let progress_token: Option<ProgressToken> = params
            .meta
            .as_ref()
            .and_then(|meta| meta.progress_token.clone());
        let cx = context_for(request_id, cancel, progress_token, out);

        if handler.supports_streaming() && caps.contains(TransportCapabilities::TEXT_STREAMING) {
            return self
                .call_tool_streaming(handler, &cx, request_id, caps, arguments, out, &params.name)
                .await;
        }

        match handler.call(&cx, arguments).await {
            Ok(content) => Ok(Some(CallToolResult {
                content,
                is_error: false,
            })),
            Err(e) => {
                // Cancellation is a protocol condition, not a tool failure.
                if e.code == McpErrorCode::RequestCancelled {
                    return Err(e);
                }
                // Tool errors are returned in-band with is_error set.
                Ok(Some(CallToolResult {
                    content: vec![Content::Text { text: e.message }],
                    is_error: true,
                }))
            }
        }
    }

    /// Drives a streaming tool invocation to its terminal event.
    ///
    /// The handler owes the wire a complete stream. When it breaks that
    /// contract the router settles the call anyway: a failure before
    /// Start falls back to a plain error response, a failure after
    /// Start becomes the terminal Error event, and a handler that
    /// returns without terminating gets an Error terminal appended.
    async fn call_tool_streaming(
        &self,
        handler: &BoxedToolHandler,
        cx: &RequestCx,
        request_id: &RequestId,
        caps: TransportCapabilities,
        arguments: serde_json::Value,
        out: &mpsc::UnboundedSender<Outbound>,
        tool_name: &str,
    ) -> McpResult<Option<CallToolResult>> {
        let mut stream = StreamProducer::new(request_id.clone(), "tools/call", caps, out.clone())?;

        match handler.call_stream(cx, arguments, &mut stream).await {
            Ok(()) => {
                if !stream.has_started() {
                    return Err(McpError::internal_error(
                        "streaming tool produced no stream",
                    ));
                }
                if !stream.is_closed() {
                    stream.fail(McpError::internal_error(
                        "tool finished without terminating its stream",
                    ))?;
                }
                Ok(None)
            }
            Err(e) => {
                if !stream.has_started() {
                    return Err(e);
                }
                if stream.is_closed() {
                    warn!(
                        target: targets::HANDLER,
                        "tool {tool_name} failed after closing its stream: {e}"
                    );
                } else {
                    stream.fail(e)?;
                }
                Ok(None)
            }
        }
    }

    /// Handles the `resources/list` request.
    pub fn handle_resources_list(
        &self,
        caps: TransportCapabilities,
        params: ListResourcesParams,
    ) -> McpResult<ListResourcesResult> {
        let (resources, next_cursor) = paginate(self.resources(caps), params.cursor.as_deref())?;
        Ok(ListResourcesResult {
            resources,
            next_cursor,
        })
    }

    /// Handles the `resources/templates/list` request.
    pub fn handle_resource_templates_list(
        &self,
        caps: TransportCapabilities,
        params: ListResourceTemplatesParams,
    ) -> McpResult<ListResourceTemplatesResult> {
        let (resource_templates, next_cursor) =
            paginate(self.resource_templates(caps), params.cursor.as_deref())?;
        Ok(ListResourceTemplatesResult {
            resource_templates,
            next_cursor,
        })
    }

    /// Handles the `resources/read` request.
    pub(crate) async fn handle_resources_read(
        &self,
        caps: TransportCapabilities,
        request_id: &RequestId,
        cancel: CancelToken,
        params: ReadResourceParams,
        out: &mpsc::UnboundedSender<Outbound>,
    ) -> McpResult<ReadResourceResult> {
        debug!(target: targets::HANDLER, "reading resource: {}", params.uri);

        if cancel.is_cancelled() {
            return Err(McpError::request_cancelled());
        }

        let resolved = self
            .resolve_resource(caps, &params.uri)
            .ok_or_else(|| McpError::resource_not_found(&params.uri))?;

        let progress_token = params
            .meta
            .as_ref()
            .and_then(|meta| meta.progress_token.clone());
        let cx = context_for(request_id, cancel, progress_token, out);

        let contents = resolved
            .handler
            .read(&cx, &params.uri, &resolved.params)
            .await?;
        Ok(ReadResourceResult { contents })
    }

    /// Handles the `prompts/list` request.
    pub fn handle_prompts_list(
        &self,
        caps: TransportCapabilities,
        params: ListPromptsParams,
    ) -> McpResult<ListPromptsResult> {
        let (prompts, next_cursor) = paginate(self.prompts(caps), params.cursor.as_deref())?;
        Ok(ListPromptsResult {
            prompts,
            next_cursor,
        })
    }

    /// Handles the `prompts/get` request.
    pub(crate) async fn handle_prompts_get(
        &self,
        caps: TransportCapabilities,
        request_id: &RequestId,
        cancel: CancelToken,
        params: GetPromptParams,
        out: &mpsc::UnboundedSender<Outbound>,
    ) -> McpResult<GetPromptResult> {
        debug!(target: targets::HANDLER, "getting prompt: {}", params.name);
        trace!(target: targets::HANDLER, "prompt arguments: {:?}", params.arguments);

        if cancel.is_cancelled() {
            return Err(McpError::request_cancelled());
        }

        let handler = self
            .prompts
            .get(&params.name)
            .filter(|handler| caps.contains(handler.required_capabilities()))
            .ok_or_else(|| McpError::method_not_found(&format!("prompt: {}", params.name)))?;

        let progress_token = params
            .meta
            .as_ref()
            .and_then(|meta| meta.progress_token.clone());
        let cx = context_for(request_id, cancel, progress_token, out);

        let messages = handler.get(&cx, params.arguments.unwrap_or_default()).await?;
        Ok(GetPromptResult {
            description: handler.definition().description,
            messages,
        })
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Flattens a wire id into the numeric form carried by [`RequestCx`].
///
/// String ids have no numeric form and trace as zero.
pub(crate) fn tracing_id(id: &RequestId) -> u64 {
    match id {
        RequestId::Number(n) => u64::try_from(*n).unwrap_or(0),
        RequestId::String(_) => 0,
    }
}

fn context_for(
    request_id: &RequestId,
    cancel: CancelToken,
    progress_token: Option<ProgressToken>,
    out: &mpsc::UnboundedSender<Outbound>,
) -> RequestCx {
    let out = out.clone();
    create_context_with_progress(
        tracing_id(request_id),
        cancel,
        progress_token,
        move |notification| {
            // Dropped silently if the connection is already gone.
            let _ = out.send(Outbound::Message(JsonRpcMessage::Request(notification)));
        },
    )
}

fn paginate<T>(items: Vec<T>, cursor: Option<&str>) -> McpResult<(Vec<T>, Option<String>)> {
    let total = items.len();
    let offset = match cursor {
        None => 0,
        Some(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|parsed| *parsed <= total)
            .ok_or_else(|| McpError::invalid_params(format!("invalid cursor: {raw:?}")))?,
    };
    let end = total.min(offset + PAGE_SIZE);
    // Cursor presence is the only continuation signal.
    let next_cursor = (end < total).then(|| end.to_string());
    let page = items.into_iter().skip(offset).take(end - offset).collect();
    Ok((page, next_cursor))
}

// ============================================================================
// Resource Resolution
// ============================================================================

struct ResolvedResource<'a> {
    handler: &'a BoxedResourceHandler,
    params: UriParams,
}

struct ResourceTemplateEntry {
    matcher: UriTemplate,
    template: ResourceTemplate,
    handler: BoxedResourceHandler,
}

#[derive(Debug, Clone)]
struct UriTemplate {
    segments: Vec<UriSegment>,
}

#[derive(Debug, Clone)]
enum UriSegment {
    Literal(String),
    Param(String),
}

impl UriTemplate {
    fn new(pattern: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch == '{' {
                if !literal.is_empty() {
                    segments.push(UriSegment::Literal(std::mem::take(&mut literal)));
                }

                let mut name = String::new();
                for next in chars.by_ref() {
                    if next == '}' {
                        break;
                    }
                    name.push(next);
                }

                if name.is_empty() {
                    literal.push('{');
                    literal.push('}');
                } else {
                    segments.push(UriSegment::Param(name));
                }
            } else {
                literal.push(ch);
            }
        }

        if !literal.is_empty() {
            segments.push(UriSegment::Literal(literal));
        }

        Self { segments }
    }

    fn matches(&self, uri: &str) -> Option<UriParams> {
        let mut params = UriParams::new();
        let mut remainder = uri;
        let mut iter = self.segments.iter().peekable();

        while let Some(segment) = iter.next() {
            match segment {
                UriSegment::Literal(lit) => {
                    remainder = remainder.strip_prefix(lit.as_str())?;
                }
                UriSegment::Param(name) => {
                    let next_literal = iter.peek().and_then(|next| match next {
                        UriSegment::Literal(lit) => Some(lit.as_str()),
                        UriSegment::Param(_) => None,
                    });

                    // Two adjacent params have no separator to split on.
                    if next_literal.is_none() && iter.peek().is_some() {
                        return None;
                    }

                    if let Some(literal) = next_literal {
                        let idx = remainder.find(literal)?;
                        params.insert(name.clone(), remainder[..idx].to_owned());
                        remainder = &remainder[idx..];
                    } else {
                        params.insert(name.clone(), remainder.to_owned());
                        remainder = "";
                    }
                }
            }
        }

        if remainder.is_empty() { Some(params) } else { None }
    }
}
