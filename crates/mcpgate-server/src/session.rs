//! Server-side session state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use mcpgate_core::CancelToken;
use mcpgate_protocol::{ClientCapabilities, ClientInfo, RequestId, ServerCapabilities, ServerInfo};

/// An MCP session between client and server.
///
/// Tracks initialization state, the set of resource URIs the client
/// subscribed to, and the in-flight requests that can still be
/// cancelled. The shared sets sit behind mutexes so the connection loop
/// can consult them while dispatch holds the session mutably.
#[derive(Debug)]
pub struct Session {
    /// Whether the session has been initialized.
    initialized: bool,
    /// Client info from initialization.
    client_info: Option<ClientInfo>,
    /// Client capabilities from initialization.
    client_capabilities: Option<ClientCapabilities>,
    /// Server info.
    server_info: ServerInfo,
    /// Server capabilities.
    server_capabilities: ServerCapabilities,
    /// Negotiated protocol version.
    protocol_version: Option<String>,
    /// URIs the client wants update notifications for.
    subscriptions: Arc<Mutex<HashSet<String>>>,
    /// Cancellation tokens for requests still being dispatched.
    active_requests: Arc<Mutex<HashMap<RequestId, CancelToken>>>,
}

impl Session {
    /// Creates a new uninitialized session.
    #[must_use]
    pub fn new(server_info: ServerInfo, server_capabilities: ServerCapabilities) -> Self {
        Self {
            initialized: false,
            client_info: None,
            client_capabilities: None,
            server_info,
            server_capabilities,
            protocol_version: None,
            subscriptions: Arc::new(Mutex::new(HashSet::new())),
            active_requests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns whether the session has been initialized.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Initializes the session with client info.
    pub fn initialize(
        &mut self,
        client_info: ClientInfo,
        client_capabilities: ClientCapabilities,
        protocol_version: String,
    ) {
        self.client_info = Some(client_info);
        self.client_capabilities = Some(client_capabilities);
        self.protocol_version = Some(protocol_version);
        self.initialized = true;
    }

    /// Returns the client info if initialized.
    #[must_use]
    pub fn client_info(&self) -> Option<&ClientInfo> {
        self.client_info.as_ref()
    }

    /// Returns the client capabilities if initialized.
    #[must_use]
    pub fn client_capabilities(&self) -> Option<&ClientCapabilities> {
        self.client_capabilities.as_ref()
    }

    /// Returns the server info.
    #[must_use]
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Returns the server capabilities.
    #[must_use]
    pub fn server_capabilities(&self) -> &ServerCapabilities {
        &self.server_capabilities
    }

    /// Returns the negotiated protocol version.
    #[must_use]
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Records a subscription to `uri`.
    pub fn subscribe_resource(&mut self, uri: String) {
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.insert(uri);
        }
    }

    /// Drops the subscription to `uri`, if present.
    pub fn unsubscribe_resource(&mut self, uri: &str) {
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.remove(uri);
        }
    }

    /// Returns whether the client is subscribed to `uri`.
    #[must_use]
    pub fn is_subscribed(&self, uri: &str) -> bool {
        self.subscriptions
            .lock()
            .map(|subs| subs.contains(uri))
            .unwrap_or(false)
    }

    /// Shared handle to the subscription set for the connection loop's
    /// resource update filter.
    pub(crate) fn subscriptions(&self) -> Arc<Mutex<HashSet<String>>> {
        Arc::clone(&self.subscriptions)
    }

    /// Shared handle to the active-request table.
    pub(crate) fn active_requests(&self) -> Arc<Mutex<HashMap<RequestId, CancelToken>>> {
        Arc::clone(&self.active_requests)
    }

    /// Trips the cancel token for an in-flight request on this session.
    ///
    /// Returns false when no request with that id is active, which is
    /// normal: the request may have finished before the cancellation
    /// arrived.
    pub fn cancel_request(&self, id: &RequestId) -> bool {
        let token = self
            .active_requests
            .lock()
            .ok()
            .and_then(|active| active.get(id).cloned());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            ServerInfo {
                name: "test-server".to_owned(),
                version: "0.1.0".to_owned(),
            },
            ServerCapabilities::default(),
        )
    }

    #[test]
    fn test_initialize_records_client_identity() {
        let mut session = session();
        assert!(!session.is_initialized());
        assert!(session.client_info().is_none());

        session.initialize(
            ClientInfo {
                name: "test-client".to_owned(),
                version: "1.0".to_owned(),
            },
            ClientCapabilities::default(),
            "2025-03-26".to_owned(),
        );
        assert!(session.is_initialized());
        assert_eq!(
            session.client_info().map(|info| info.name.as_str()),
            Some("test-client")
        );
        assert_eq!(session.protocol_version(), Some("2025-03-26"));
    }

    #[test]
    fn test_subscriptions_round_trip() {
        let mut session = session();
        assert!(!session.is_subscribed("file:///a.txt"));

        session.subscribe_resource("file:///a.txt".to_owned());
        assert!(session.is_subscribed("file:///a.txt"));
        assert!(!session.is_subscribed("file:///b.txt"));

        session.unsubscribe_resource("file:///a.txt");
        assert!(!session.is_subscribed("file:///a.txt"));
    }

    #[test]
    fn test_subscription_handle_sees_later_changes() {
        let mut session = session();
        let handle = session.subscriptions();
        session.subscribe_resource("file:///a.txt".to_owned());
        let subs = handle.lock().expect("subscription lock");
        assert!(subs.contains("file:///a.txt"));
    }

    #[test]
    fn test_cancel_request_trips_registered_token() {
        let session = session();
        let token = CancelToken::new();
        let active = session.active_requests();
        active
            .lock()
            .expect("active request lock")
            .insert(RequestId::Number(7), token.clone());

        assert!(!token.is_cancelled());
        assert!(session.cancel_request(&RequestId::Number(7)));
        assert!(token.is_cancelled());

        assert!(!session.cancel_request(&RequestId::Number(8)));
    }
}
