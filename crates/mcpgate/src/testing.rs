//! Helpers for exercising handlers outside a running server.
//!
//! Handler implementations take a [`RequestCx`]; in unit tests there is
//! no dispatch layer to build one. [`TestCx`] fills that gap: it hands
//! out contexts wired to a token the test can cancel and a sink that
//! records progress updates for inspection.
//!
//! # Example
//!
//! ```
//! use mcpgate::testing::TestCx;
//!
//! let harness = TestCx::new();
//! let cx = harness.cx(1);
//!
//! cx.report_progress(0.5, Some("halfway"));
//! assert_eq!(harness.progress_updates().len(), 1);
//!
//! harness.cancel();
//! assert!(cx.is_cancelled());
//! ```

use std::sync::{Arc, Mutex};

use mcpgate_core::{CancelToken, ProgressSink, RequestCx};

/// One progress update captured by a [`TestCx`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Progress value reported by the handler.
    pub progress: f64,
    /// Total, when the handler reported one.
    pub total: Option<f64>,
    /// Human-readable status, when the handler supplied one.
    pub message: Option<String>,
}

#[derive(Debug, Default)]
struct RecordingSink {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl ProgressSink for RecordingSink {
    fn send_progress(&self, progress: f64, total: Option<f64>, message: Option<&str>) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push(ProgressUpdate {
                progress,
                total,
                message: message.map(str::to_owned),
            });
        }
    }
}

/// Test harness that builds [`RequestCx`] values for direct handler
/// calls.
///
/// Every context handed out shares one cancellation token and one
/// progress recorder, so a test can trip cancellation mid-call and
/// assert on the updates the handler reported.
#[derive(Clone)]
pub struct TestCx {
    cancel: CancelToken,
    sink: Arc<RecordingSink>,
}

impl std::fmt::Debug for TestCx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCx")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("updates", &self.progress_updates().len())
            .finish()
    }
}

impl Default for TestCx {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCx {
    /// Creates a fresh harness with an untripped cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancel: CancelToken::new(),
            sink: Arc::new(RecordingSink::default()),
        }
    }

    /// Builds a context carrying `request_id`, wired to this harness.
    #[must_use]
    pub fn cx(&self, request_id: u64) -> RequestCx {
        RequestCx::with_progress(request_id, self.cancel.clone(), self.sink.clone())
    }

    /// The shared cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Trips cancellation for every context this harness produced.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Progress updates recorded so far, oldest first.
    #[must_use]
    pub fn progress_updates(&self) -> Vec<ProgressUpdate> {
        self.sink
            .updates
            .lock()
            .map(|updates| updates.clone())
            .unwrap_or_default()
    }
}
