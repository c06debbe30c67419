//! Logging capability handed to the node controller.
//!
//! The controller never reaches for a global logger; it receives a
//! [`NodeLogger`] at construction. [`TracingLogger`] is the default and
//! forwards to `tracing`, so the usual subscriber setup applies.

use std::fmt::Debug;
use std::sync::Arc;

/// Minimal `{debug, info, error}` logging surface.
pub trait NodeLogger: Debug + Send + Sync {
    /// Records verbose diagnostics such as node output lines.
    fn debug(&self, message: &str);
    /// Records lifecycle progress.
    fn info(&self, message: &str);
    /// Records failures that are not surfaced to a caller.
    fn error(&self, message: &str);
}

/// Shared handle to a logger.
pub type SharedLogger = Arc<dyn NodeLogger>;

/// Forwards every record to the `tracing` macros.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl NodeLogger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "geth_private", "{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "geth_private", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "geth_private", "{message}");
    }
}

/// Returns the default logger.
#[must_use]
pub fn default_logger() -> SharedLogger {
    Arc::new(TracingLogger)
}
