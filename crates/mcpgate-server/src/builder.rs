//! Builder for configuring and constructing a [`Server`].

use std::sync::{Arc, Mutex};

use mcpgate_protocol::{
    LoggingCapability, PromptsCapability, ResourcesCapability, ServerCapabilities, ServerInfo,
    ToolsCapability,
};

use crate::handler::{PromptHandler, ResourceHandler, ToolHandler};
use crate::router::Router;
use crate::{LifespanHooks, LoggingConfig, Server};

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Builder for [`Server`] instances.
///
/// Created via [`Server::new`]. Registering at least one handler of a
/// kind turns on the matching capability section in the `initialize`
/// response, so clients only see what the server can actually serve.
pub struct ServerBuilder {
    info: ServerInfo,
    capabilities: ServerCapabilities,
    router: Router,
    instructions: Option<String>,
    request_timeout_secs: u64,
    logging: Option<LoggingConfig>,
    lifespan: LifespanHooks,
}

impl ServerBuilder {
    /// Creates a new builder with the given server name and version.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: ServerInfo {
                name: name.into(),
                version: version.into(),
            },
            capabilities: ServerCapabilities::default(),
            router: Router::new(),
            instructions: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            logging: None,
            lifespan: LifespanHooks::new(),
        }
    }

    /// Sets the per-request timeout in seconds. Zero disables the timeout.
    #[must_use]
    pub fn request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Registers a tool handler.
    #[must_use]
    pub fn tool<H: ToolHandler + 'static>(mut self, handler: H) -> Self {
        self.router.add_tool(handler);
        self.capabilities.tools = Some(ToolsCapability { list_changed: true });
        self
    }

    /// Registers a resource handler (static or templated).
    #[must_use]
    pub fn resource<H: ResourceHandler + 'static>(mut self, handler: H) -> Self {
        self.router.add_resource(handler);
        self.capabilities.resources = Some(ResourcesCapability {
            subscribe: true,
            list_changed: true,
        });
        self
    }

    /// Registers a prompt handler.
    #[must_use]
    pub fn prompt<H: PromptHandler + 'static>(mut self, handler: H) -> Self {
        self.router.add_prompt(handler);
        self.capabilities.prompts = Some(PromptsCapability { list_changed: true });
        self
    }

    /// Sets the instructions string returned from `initialize`.
    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Overrides the logging configuration.
    ///
    /// When not set, the server reads [`LoggingConfig::from_env`] at serve
    /// time.
    #[must_use]
    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Sets a hook that runs before the server starts accepting requests.
    #[must_use]
    pub fn on_startup<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        self.lifespan.on_startup = Some(Box::new(hook));
        self
    }

    /// Sets a hook that runs when a connection shuts down.
    #[must_use]
    pub fn on_shutdown<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.lifespan.on_shutdown = Some(Box::new(hook));
        self
    }

    /// Finalizes the configuration and constructs the server.
    #[must_use]
    pub fn build(mut self) -> Server {
        // logging/setLevel is always dispatchable, so the section is
        // always advertised.
        self.capabilities.logging = Some(LoggingCapability {});
        Server {
            info: self.info,
            capabilities: self.capabilities,
            router: self.router,
            instructions: self.instructions,
            request_timeout_secs: self.request_timeout_secs,
            logging: self.logging.unwrap_or_else(LoggingConfig::from_env),
            lifespan: Mutex::new(Some(self.lifespan)),
            connections: Arc::new(Mutex::new(Vec::new())),
        }
    }
}
