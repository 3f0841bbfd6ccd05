//! Request-scoped context for handler execution.
//!
//! [`RequestCx`] carries the identity, cancellation token, and progress
//! sink for a single in-flight request. Handlers receive it by reference
//! and use it to observe cancellation and emit progress updates.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::error::{McpError, McpResult};

// ============================================================================
// Cancellation
// ============================================================================

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation token shared between a dispatcher and a handler.
///
/// The dispatcher keeps one clone in its active-request table and trips it
/// when the peer cancels; the handler polls [`CancelToken::is_cancelled`]
/// at natural suspension points or awaits [`CancelToken::cancelled`].
/// Cancellation is sticky: once tripped, the token never resets.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    /// Creates a fresh, untripped token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the token and wakes every task awaiting [`CancelToken::cancelled`].
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    /// Returns whether the token has been tripped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is tripped.
    ///
    /// Resolves immediately if cancellation already happened. Safe to await
    /// from any number of clones concurrently.
    pub async fn cancelled(&self) {
        let notified = self.state.notify.notified();
        tokio::pin!(notified);
        loop {
            // Register for the wakeup before re-checking the flag so a
            // cancel between the check and the await is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.as_mut().await;
            notified.set(self.state.notify.notified());
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ============================================================================
// Progress Sink
// ============================================================================

/// Trait for delivering progress updates back to the requesting peer.
///
/// This is implemented by the server's dispatch layer to forward progress
/// notifications while a handler runs. Implementations must be cheap and
/// non-blocking; updates may be dropped if the peer cannot keep up.
pub trait ProgressSink: Send + Sync {
    /// Delivers a progress update.
    ///
    /// # Arguments
    ///
    /// * `progress` - Current progress value
    /// * `total` - Optional total for determinate progress
    /// * `message` - Optional message describing current status
    fn send_progress(&self, progress: f64, total: Option<f64>, message: Option<&str>);
}

/// A no-op sink used when the requester did not ask for progress updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgressSink;

impl ProgressSink for NoOpProgressSink {
    fn send_progress(&self, _progress: f64, _total: Option<f64>, _message: Option<&str>) {
        // No-op: progress reporting disabled
    }
}

// ============================================================================
// Request Context
// ============================================================================

/// Per-request context handed to handlers.
///
/// `RequestCx` provides access to:
/// - Request-scoped identity (the originating request ID)
/// - Cancellation checkpoints for cancel-safe handlers
/// - Progress reporting for long-running operations
///
/// # Example
///
/// ```ignore
/// async fn my_tool(cx: &RequestCx, args: MyArgs) -> McpResult<Value> {
///     for (i, item) in args.items.iter().enumerate() {
///         cx.checkpoint()?;
///         cx.report_progress(i as f64, Some("processing"));
///         process(item).await?;
///     }
///     Ok(json!({"status": "done"}))
/// }
/// ```
#[derive(Clone)]
pub struct RequestCx {
    /// Unique request identifier for tracing (from the JSON-RPC id).
    request_id: u64,
    /// Cancellation token shared with the dispatcher.
    cancel: CancelToken,
    /// Destination for progress updates.
    progress: Arc<dyn ProgressSink>,
}

impl RequestCx {
    /// Creates a context without progress reporting.
    ///
    /// This is the common case: the requester supplied no progress token,
    /// so updates go to a [`NoOpProgressSink`].
    #[must_use]
    pub fn new(request_id: u64, cancel: CancelToken) -> Self {
        Self {
            request_id,
            cancel,
            progress: Arc::new(NoOpProgressSink),
        }
    }

    /// Creates a context that forwards progress updates to `progress`.
    #[must_use]
    pub fn with_progress(request_id: u64, cancel: CancelToken, progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            request_id,
            cancel,
            progress,
        }
    }

    /// Returns the unique request identifier.
    ///
    /// This corresponds to the JSON-RPC request ID and is useful for
    /// logging and tracing across the request lifecycle.
    #[must_use]
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Returns the cancellation token for this request.
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Checks if cancellation has been requested.
    ///
    /// Handlers should check this periodically and exit early if true.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative cancellation checkpoint.
    ///
    /// Call this at natural suspension points in your handler to allow
    /// graceful cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::request_cancelled`] if the request has been
    /// cancelled.
    pub fn checkpoint(&self) -> McpResult<()> {
        if self.cancel.is_cancelled() {
            return Err(McpError::request_cancelled());
        }
        Ok(())
    }

    /// Resolves once the request is cancelled.
    ///
    /// Useful inside `select!` arms that should abandon work on cancel.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Reports progress on the current operation.
    ///
    /// If the requester did not ask for progress updates, this is a no-op.
    ///
    /// # Arguments
    ///
    /// * `progress` - Current progress value
    /// * `message` - Optional message describing current status
    pub fn report_progress(&self, progress: f64, message: Option<&str>) {
        self.progress.send_progress(progress, None, message);
    }

    /// Reports progress with an explicit total for determinate progress bars.
    pub fn report_progress_with_total(&self, progress: f64, total: f64, message: Option<&str>) {
        self.progress.send_progress(progress, Some(total), message);
    }
}

impl std::fmt::Debug for RequestCx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCx")
            .field("request_id", &self.request_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
