//! HTTP serving: POST endpoint plus an optional SSE event stream.
//!
//! One route, `/mcp`, carries both halves of the protocol. A POST body
//! is a single JSON-RPC message: requests get their response as the
//! response body, notifications get `204 No Content`. Sessions are
//! keyed by the `mcp-session-id` header; the server mints one during
//! `initialize` and returns it as a response header.
//!
//! A GET on the same route with `accept: text/event-stream` attaches
//! the session's event stream. Once attached, the session is treated as
//! text-streaming and full duplex: notifications, progress, and stream
//! fragments flow out of band while POSTs keep carrying the
//! request/response traffic. Without the event stream a session stays
//! plain request/response, so streamed tools degrade to their buffered
//! form.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use log::{debug, error, trace, warn};
use mcpgate_core::logging::targets;
use mcpgate_core::{CancelToken, McpError};
use mcpgate_protocol::{
    CancelledParams, JsonRpcError, JsonRpcMessage, JsonRpcResponse, RequestId,
};
use mcpgate_transport::TransportCapabilities;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::stream::{Outbound, resource_updated_notification};
use crate::{Server, Session};

/// Header carrying the session identifier in both directions.
const SESSION_HEADER: &str = "mcp-session-id";

/// Serves the gateway over HTTP on `listener`.
///
/// Returns when the listener fails; individual connection errors are
/// logged and absorbed by the HTTP stack.
pub async fn serve_http(server: Arc<Server>, listener: TcpListener) -> std::io::Result<()> {
    server.init_logging();
    server.log_startup("http");
    if !server.run_startup_hook() {
        return Err(std::io::Error::other("startup hook failed"));
    }

    let state = Arc::new(HttpState {
        server: Arc::clone(&server),
        sessions: Mutex::new(HashMap::new()),
    });
    let app = Router::new()
        .route("/mcp", post(handle_post).get(handle_events))
        .with_state(state);

    let result = axum::serve(listener, app).await;
    server.run_shutdown_hook();
    result
}

/// Shared state behind the HTTP handlers.
struct HttpState {
    server: Arc<Server>,
    sessions: Mutex<HashMap<String, Arc<HttpSession>>>,
}

impl HttpState {
    fn session(&self, sid: &str) -> Option<Arc<HttpSession>> {
        self.sessions
            .lock()
            .ok()
            .and_then(|sessions| sessions.get(sid).cloned())
    }

    fn create_session(&self) -> Result<(String, Arc<HttpSession>), McpError> {
        let sid = mint_session_id()?;
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.server.register_connection(out_tx.clone());

        let session = Session::new(
            self.server.info().clone(),
            self.server.capabilities().clone(),
        );
        let subscriptions = session.subscriptions();
        let active_requests = session.active_requests();
        let entry = Arc::new(HttpSession {
            session: tokio::sync::Mutex::new(session),
            out_tx,
            out_rx: Mutex::new(Some(out_rx)),
            subscriptions,
            active_requests,
            streaming: AtomicBool::new(false),
        });

        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(sid.clone(), Arc::clone(&entry));
        }
        debug!(target: targets::SESSION, "http session {sid} created");
        Ok((sid, entry))
    }
}

/// One HTTP client's session.
///
/// The inner session sits behind an async mutex so concurrent POSTs on
/// the same session dispatch one at a time. The subscription and
/// active-request handles are cloned out at creation so the event-stream
/// pump and cancellation can work while a dispatch holds the lock.
struct HttpSession {
    session: tokio::sync::Mutex<Session>,
    out_tx: mpsc::UnboundedSender<Outbound>,
    /// Receiver half of the outbound queue, taken by the event stream.
    out_rx: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
    active_requests: Arc<Mutex<HashMap<RequestId, CancelToken>>>,
    /// Set once an event stream attaches.
    streaming: AtomicBool,
}

impl HttpSession {
    fn caps(&self) -> TransportCapabilities {
        if self.streaming.load(Ordering::Relaxed) {
            TransportCapabilities::STANDARD
                | TransportCapabilities::TEXT_STREAMING
                | TransportCapabilities::FULL_DUPLEX
        } else {
            TransportCapabilities::STANDARD
        }
    }
}

/// Handles one posted JSON-RPC message.
async fn handle_post(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message = match JsonRpcMessage::decode(&body) {
        Ok(message) => message,
        Err(e) => {
            let response = JsonRpcResponse::error(None, JsonRpcError::from(McpError::from(e)));
            return json_response(StatusCode::BAD_REQUEST, None, &response);
        }
    };

    let request = match message {
        JsonRpcMessage::Request(request) => request,
        JsonRpcMessage::Response(response) => {
            trace!(
                target: targets::TRANSPORT,
                "dropping posted response (id: {:?})",
                response.id
            );
            return StatusCode::ACCEPTED.into_response();
        }
    };

    let session_header = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let (sid, entry, minted) = match session_header {
        Some(sid) => match state.session(&sid) {
            Some(entry) => (sid, entry, false),
            None => {
                let error = McpError::session_error(format!("Unknown session: {sid}"));
                let response = JsonRpcResponse::error(request.id, JsonRpcError::from(error));
                return json_response(StatusCode::NOT_FOUND, None, &response);
            }
        },
        None if request.method == "initialize" => match state.create_session() {
            Ok((sid, entry)) => (sid, entry, true),
            Err(e) => {
                let response = JsonRpcResponse::error(request.id, JsonRpcError::from(e));
                return json_response(StatusCode::INTERNAL_SERVER_ERROR, None, &response);
            }
        },
        None => {
            let error = McpError::session_error(format!("Missing {SESSION_HEADER} header"));
            let response = JsonRpcResponse::error(request.id, JsonRpcError::from(error));
            return json_response(StatusCode::NOT_FOUND, None, &response);
        }
    };

    // Cancellation must not queue behind the dispatch it is trying to
    // interrupt, so it bypasses the session lock.
    if request.method == "notifications/cancelled" {
        handle_posted_cancellation(&entry, request.params);
        return StatusCode::NO_CONTENT.into_response();
    }

    let is_notification = request.id.is_none();
    let caps = entry.caps();
    let response = {
        let mut session = entry.session.lock().await;
        state
            .server
            .handle_request(caps, &mut session, &entry.out_tx, request)
            .await
    };

    match response {
        Some(response) => {
            json_response(StatusCode::OK, minted.then_some(sid.as_str()), &response)
        }
        None if is_notification => StatusCode::NO_CONTENT.into_response(),
        // Call settled by its stream terminal; the result arrives as an event.
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn handle_posted_cancellation(entry: &HttpSession, params: Option<serde_json::Value>) {
    let params: CancelledParams = match params.map(serde_json::from_value).transpose() {
        Ok(Some(params)) => params,
        Ok(None) | Err(_) => {
            warn!(target: targets::SESSION, "malformed cancellation notification");
            return;
        }
    };
    let token = entry
        .active_requests
        .lock()
        .ok()
        .and_then(|active| active.get(&params.request_id).cloned());
    match token {
        Some(token) => {
            let reason = params.reason.as_deref().unwrap_or("unspecified");
            debug!(
                target: targets::SESSION,
                "cancelling request {} (reason: {reason})",
                params.request_id
            );
            token.cancel();
        }
        None => {
            debug!(
                target: targets::SESSION,
                "no active request {} to cancel",
                params.request_id
            );
        }
    }
}

/// Attaches the session's event stream.
async fn handle_events(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    let Some(sid) = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(entry) = state.session(sid) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(out_rx) = entry.out_rx.lock().ok().and_then(|mut rx| rx.take()) else {
        // One event stream per session.
        return StatusCode::CONFLICT.into_response();
    };
    entry.streaming.store(true, Ordering::Relaxed);
    debug!(target: targets::TRANSPORT, "event stream attached to session {sid}");

    let subscriptions = Arc::clone(&entry.subscriptions);
    let stream = futures_util::stream::unfold(
        (out_rx, subscriptions),
        |(mut out_rx, subscriptions)| async move {
            loop {
                let outbound = out_rx.recv().await?;
                if let Some(event) = sse_event(outbound, &subscriptions) {
                    return Some((Ok::<_, Infallible>(event), (out_rx, subscriptions)));
                }
            }
        },
    );

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Converts one outbound queue item into an SSE event, if it applies.
fn sse_event(outbound: Outbound, subscriptions: &Arc<Mutex<HashSet<String>>>) -> Option<Event> {
    let message = match outbound {
        Outbound::Message(message) => message,
        Outbound::Binary(header, _) => {
            warn!(
                target: targets::TRANSPORT,
                "dropping binary frame for stream {}; event streams are text only",
                header.stream_id
            );
            return None;
        }
        Outbound::ResourceUpdated(uri) => {
            let subscribed = subscriptions
                .lock()
                .map(|subs| subs.contains(&uri))
                .unwrap_or(false);
            if !subscribed {
                return None;
            }
            resource_updated_notification(&uri)
        }
    };

    match serde_json::to_string(&message) {
        Ok(data) => Some(Event::default().data(data)),
        Err(e) => {
            error!(target: targets::TRANSPORT, "failed to encode event: {e}");
            None
        }
    }
}

fn json_response(
    status: StatusCode,
    session_id: Option<&str>,
    response: &JsonRpcResponse,
) -> Response {
    let body = match serde_json::to_vec(response) {
        Ok(body) => body,
        Err(e) => {
            error!(target: targets::TRANSPORT, "failed to encode response: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(sid) = session_id {
        builder = builder.header(SESSION_HEADER, sid);
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn mint_session_id() -> Result<String, McpError> {
    let mut bytes = [0u8; 16];
    getrandom::fill(&mut bytes)
        .map_err(|e| McpError::internal_error(format!("failed to generate session id: {e}")))?;
    Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}
