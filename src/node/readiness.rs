//! Output streaming and readiness detection for a launched node.
//!
//! Both output streams of the child are read line by line into one channel.
//! Startup waits on that channel for the readiness marker; afterwards a drain
//! task keeps consuming it so the pipes never fill up.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};

use crate::error::GethError;
use crate::flags::{NodeFlags, RPC_FLAG};
use crate::logger::SharedLogger;

/// Logged by the node once its HTTP RPC server accepts connections.
pub const HTTP_READY_MARKER: &str = "HTTP endpoint opened";

/// Logged by the node once its IPC socket accepts connections.
pub const IPC_READY_MARKER: &str = "IPC endpoint opened";

/// Picks the marker matching the node's RPC mode.
#[must_use]
pub fn default_marker(flags: &NodeFlags) -> &'static str {
    if flags.is_enabled(RPC_FLAG) {
        HTTP_READY_MARKER
    } else {
        IPC_READY_MARKER
    }
}

/// Which pipe a line was read from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// One line of node output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputLine {
    /// Originating pipe.
    pub stream: Stream,
    /// Line content without the trailing newline.
    pub text: String,
}

impl OutputLine {
    /// Whether the line reports a fatal condition, ignoring case.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.text.to_ascii_lowercase().contains("fatal")
    }
}

/// Reads `source` line by line into `lines` until end of file.
///
/// Bytes that are not valid UTF-8 are replaced rather than ending the stream,
/// so the pipe keeps being read for as long as the node writes to it.
pub(crate) fn forward_lines<S>(
    source: S,
    stream: Stream,
    lines: UnboundedSender<OutputLine>,
    sink: OutputSink,
) -> JoinHandle<()>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(source);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = decode_line(&buffer);
                    if lines.send(OutputLine { stream, text }).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    sink.read_failed(stream, &err);
                    break;
                }
            }
        }
    })
}

fn decode_line(raw: &[u8]) -> String {
    let trimmed = raw.strip_suffix(b"\n").unwrap_or(raw);
    let content = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
    String::from_utf8_lossy(content).into_owned()
}

/// Logs node output according to the verbosity setting.
#[derive(Clone, Debug)]
pub struct OutputSink {
    logger: SharedLogger,
    verbose: bool,
}

impl OutputSink {
    /// Creates a sink writing to `logger`.
    #[must_use]
    pub const fn new(logger: SharedLogger, verbose: bool) -> Self {
        Self { logger, verbose }
    }

    /// Logs `line` at debug when verbose, and at error when it is fatal.
    pub fn observe(&self, line: &OutputLine) {
        if self.verbose {
            self.logger.debug(&line.text);
        }
        if line.is_fatal() {
            self.logger.error(&line.text);
        }
    }

    /// Logs a read failure that ended forwarding of `stream`.
    pub fn read_failed(&self, stream: Stream, err: &io::Error) {
        self.logger.error(&format!("reading node {stream:?} failed: {err}"));
    }
}

#[derive(Debug, Default)]
struct Transcript {
    stdout: String,
    stderr: String,
}

impl Transcript {
    fn record(&mut self, line: &OutputLine) {
        let buffer = match line.stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        };
        buffer.push_str(&line.text);
        buffer.push('\n');
    }

    fn failure(self, reason: impl Into<String>) -> GethError {
        GethError::StartupFailed {
            reason: reason.into(),
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}

/// Waits until a line containing `marker` arrives.
///
/// # Errors
///
/// Returns [`GethError::StartupFailed`] with the output seen so far when a
/// fatal line arrives first, when both streams close, or when `grace`
/// elapses.
pub async fn await_ready(
    lines: &mut UnboundedReceiver<OutputLine>,
    marker: &str,
    grace: Duration,
    sink: &OutputSink,
) -> Result<(), GethError> {
    let deadline = Instant::now() + grace;
    let mut transcript = Transcript::default();

    loop {
        let line = match timeout_at(deadline, lines.recv()).await {
            Ok(Some(line)) => line,
            Ok(None) => return Err(transcript.failure("node exited before becoming ready")),
            Err(_) => {
                return Err(transcript.failure(format!(
                    "\"{marker}\" not seen within {}s",
                    grace.as_secs_f64()
                )));
            }
        };

        sink.observe(&line);
        transcript.record(&line);
        if line.is_fatal() {
            return Err(transcript.failure(line.text));
        }
        if line.text.contains(marker) {
            return Ok(());
        }
    }
}

/// Keeps consuming output after readiness until both streams close.
pub(crate) fn drain(mut lines: UnboundedReceiver<OutputLine>, sink: OutputSink) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            sink.observe(&line);
        }
    })
}
