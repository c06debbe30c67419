//! Error taxonomy for node supervision.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors surfaced while provisioning, launching, or talking to a node.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GethError {
    /// Raised when neither the explicit path nor `PATH` yields a binary.
    #[error("unable to find \"{name}\" executable: {detail}")]
    ExecutableNotFound {
        /// Binary name or explicit path that was searched for.
        name: String,
        /// Where the lookup was attempted.
        detail: String,
    },
    /// Raised when `start` is called while a node is not stopped.
    #[error("node already running")]
    AlreadyRunning,
    /// Raised when an operation needs a running node.
    #[error("not started")]
    NotStarted,
    /// Raised when `destroy_data` is called while the node is up.
    #[error("cannot destroy while still running")]
    CannotDestroyWhileRunning,
    /// Raised when a provisioning sub-command exits unsuccessfully.
    #[error("provisioning step `{step}` failed with status {status_text}: {stderr}")]
    ProvisioningFailed {
        /// Sub-command that failed (`init`, `setup`, `account list`).
        step: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
    /// Raised when the account listing does not contain a `{hex}` address.
    #[error("unable to fetch account info from: {output}")]
    AccountParseFailed {
        /// Output that was searched for an address.
        output: String,
    },
    /// Raised when the node fails before the readiness marker appears.
    #[error("node failed to start: {reason}")]
    StartupFailed {
        /// Why readiness was not reached.
        reason: String,
        /// Stdout buffered until the failure.
        stdout: String,
        /// Stderr buffered until the failure.
        stderr: String,
    },
    /// Raised when a console command exits unsuccessfully.
    #[error("console command `{command}` failed with status {status_text}: {stderr}")]
    ConsoleExecFailed {
        /// Console expression that was evaluated.
        command: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the attach invocation.
        stderr: String,
    },
    /// Raised when a console reply does not have the expected shape.
    #[error("unexpected output from `{command}`: {output}")]
    UnexpectedConsoleOutput {
        /// Console expression that was evaluated.
        command: String,
        /// Trimmed output that failed to parse.
        output: String,
    },
    /// Raised when a process cannot be spawned or awaited.
    #[error("execution failed for {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when working directory or genesis file access fails.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the genesis document cannot be built.
    #[error("invalid genesis document: {0}")]
    Genesis(String),
}

impl GethError {
    pub(crate) fn io(path: impl Into<Utf8PathBuf>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Renders an optional exit code for error messages.
pub(crate) fn status_text(code: Option<i32>) -> String {
    code.map_or_else(|| String::from("unknown"), |value| value.to_string())
}
