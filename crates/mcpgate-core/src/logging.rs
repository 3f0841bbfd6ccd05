//! Structured logging for the gateway.
//!
//! Built on the standard [`log`] facade. All mcpgate crates log through
//! these utilities.
//!
//! # Log Levels
//!
//! - **error**: Unrecoverable errors, transport failures
//! - **warn**: Recoverable issues, dropped messages
//! - **info**: Lifecycle events (start, stop, session open/close)
//! - **debug**: Request/response flow, handler invocations
//! - **trace**: Wire-level message details, correlation internals
//!
//! # Log Targets
//!
//! Hierarchical targets allow per-component filtering:
//!
//! - `mcpgate`: Root target
//! - `mcpgate::server`: Server lifecycle and request handling
//! - `mcpgate::transport`: Transport layer messages
//! - `mcpgate::router`: Method routing and dispatch
//! - `mcpgate::handler`: Tool/resource/prompt handler execution
//! - `mcpgate::client`: Correlation engine and client sessions
//!
//! # Backend
//!
//! The facade carries no implementation by itself; [`StderrLogger`]
//! provides a compact line-oriented backend that servers install from
//! their [`LoggingConfig`]-equivalent settings. Applications may install
//! any other `log` backend instead.

use std::io::Write;

// Re-export log macros for ergonomic use
pub use log::{debug, error, info, trace, warn};

// Re-export log level types for programmatic use
pub use log::{Level, LevelFilter};

/// Log targets used by gateway components.
///
/// Use these constants with the `target:` argument to log macros
/// for consistent filtering.
pub mod targets {
    /// Root target for all gateway logs.
    pub const MCPGATE: &str = "mcpgate";

    /// Server lifecycle and request handling.
    pub const SERVER: &str = "mcpgate::server";

    /// Transport layer (stdio, HTTP, WebSocket, SSE).
    pub const TRANSPORT: &str = "mcpgate::transport";

    /// Method routing and dispatch.
    pub const ROUTER: &str = "mcpgate::router";

    /// Tool, resource, and prompt handler execution.
    pub const HANDLER: &str = "mcpgate::handler";

    /// Correlation engine and client sessions.
    pub const CLIENT: &str = "mcpgate::client";

    /// Server-side session state.
    pub const SESSION: &str = "mcpgate::session";

    /// Codec operations (JSON encoding/decoding, binary framing).
    pub const CODEC: &str = "mcpgate::codec";
}

/// Returns whether logging is enabled at the given level for the given target.
///
/// Useful for conditionally computing expensive log message data.
#[inline]
#[must_use]
pub fn is_enabled(level: Level, target: &str) -> bool {
    log::log_enabled!(target: target, level)
}

/// A compact stderr backend for the `log` facade.
///
/// Writes one line per record: optional timestamp, level, optional target,
/// optional file:line, then the message. Configure with the builder-style
/// methods and install with [`StderrLogger::init`].
#[derive(Debug, Clone)]
pub struct StderrLogger {
    level: LevelFilter,
    timestamps: bool,
    targets: bool,
    file_line: bool,
}

impl Default for StderrLogger {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            timestamps: true,
            targets: true,
            file_line: false,
        }
    }
}

impl StderrLogger {
    /// Creates a logger with default settings (info, timestamps, targets).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum level.
    #[must_use]
    pub fn level(mut self, level: Level) -> Self {
        self.level = level.to_level_filter();
        self
    }

    /// Enables or disables timestamps.
    #[must_use]
    pub fn with_timestamps(mut self, on: bool) -> Self {
        self.timestamps = on;
        self
    }

    /// Enables or disables target display.
    #[must_use]
    pub fn with_targets(mut self, on: bool) -> Self {
        self.targets = on;
        self
    }

    /// Enables or disables file:line display.
    #[must_use]
    pub fn with_file_line(mut self, on: bool) -> Self {
        self.file_line = on;
        self
    }

    /// Installs this logger as the global backend.
    ///
    /// Fails if a logger is already installed (not an error for servers:
    /// the host may have set one up first).
    pub fn init(self) -> Result<(), log::SetLoggerError> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(level);
        Ok(())
    }
}

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut line = String::with_capacity(96);
        if self.timestamps {
            let now = chrono::Local::now();
            line.push_str(&now.format("%Y-%m-%d %H:%M:%S%.3f ").to_string());
        }
        line.push_str(&format!("{:5} ", record.level()));
        if self.targets {
            line.push_str(record.target());
            line.push(' ');
        }
        if self.file_line {
            if let (Some(file), Some(lineno)) = (record.file(), record.line()) {
                line.push_str(&format!("{file}:{lineno} "));
            }
        }
        line.push_str(&format!("{}", record.args()));

        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{line}");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Logs a server lifecycle event at INFO level.
#[macro_export]
macro_rules! log_server {
    ($($arg:tt)*) => {
        log::info!(target: "mcpgate::server", $($arg)*)
    };
}

/// Logs a transport event at DEBUG level.
#[macro_export]
macro_rules! log_transport {
    ($($arg:tt)*) => {
        log::debug!(target: "mcpgate::transport", $($arg)*)
    };
}

/// Logs a routing event at DEBUG level.
#[macro_export]
macro_rules! log_router {
    ($($arg:tt)*) => {
        log::debug!(target: "mcpgate::router", $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_targets_are_hierarchical() {
        assert!(targets::SERVER.starts_with(targets::MCPGATE));
        assert!(targets::TRANSPORT.starts_with(targets::MCPGATE));
        assert!(targets::ROUTER.starts_with(targets::MCPGATE));
        assert!(targets::HANDLER.starts_with(targets::MCPGATE));
        assert!(targets::CLIENT.starts_with(targets::MCPGATE));
        assert!(targets::SESSION.starts_with(targets::MCPGATE));
        assert!(targets::CODEC.starts_with(targets::MCPGATE));
    }

    #[test]
    fn level_ordering() {
        // Lower = more severe
        assert!(Level::Error < Level::Warn);
        assert!(Level::Warn < Level::Info);
        assert!(Level::Info < Level::Debug);
        assert!(Level::Debug < Level::Trace);
    }

    #[test]
    fn builder_sets_fields() {
        let logger = StderrLogger::new()
            .level(Level::Debug)
            .with_timestamps(false)
            .with_targets(false)
            .with_file_line(true);
        assert_eq!(logger.level, LevelFilter::Debug);
        assert!(!logger.timestamps);
        assert!(!logger.targets);
        assert!(logger.file_line);
    }
}
