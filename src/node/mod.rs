//! Node controller: provisioning, launch, readiness, console access and stop.
//!
//! [`GethNode`] owns at most one child process. `start` and `stop` take
//! `&mut self`, so the borrow checker serialises lifecycle transitions, while
//! console commands borrow the node shared and may run concurrently.

mod readiness;

use std::ffi::OsString;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::task::JoinHandle;

pub use readiness::{
    HTTP_READY_MARKER, IPC_READY_MARKER, OutputLine, OutputSink, Stream, await_ready,
    default_marker,
};

use crate::account::Account;
use crate::config::{NodeOptions, ResolvedConfig, resolve};
use crate::console::ConsoleBridge;
use crate::error::GethError;
use crate::flags::{NodeFlags, RPC_FLAG};
use crate::logger::{SharedLogger, default_logger};
use crate::mining::{MiningHandle, MiningLoop};
use crate::provision::{Provisioner, genesis_path};
use crate::runner::{CommandRunner, ProcessCommandRunner, render_command_line};

/// Lifecycle state of a [`GethNode`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum NodeState {
    /// No child process exists.
    #[default]
    Stopped,
    /// Provisioning or waiting for readiness.
    Starting,
    /// The node accepted connections and console commands are allowed.
    Running,
    /// The child has been signalled and is being awaited.
    Stopping,
}

/// Options controlling [`GethNode::stop`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StopOptions {
    /// Send `SIGKILL` instead of `SIGTERM`.
    pub kill: bool,
}

/// How the node process ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StopOutcome {
    /// Exit code, when the process exited normally.
    pub code: Option<i32>,
    /// Signal sent to end the process. A node that catches `SIGTERM` and
    /// exits cleanly still reports it here alongside its exit code.
    pub signal: Option<Signal>,
}

impl StopOutcome {
    /// Combines the signal that was sent with the status the child left.
    ///
    /// A different terminating signal than the one sent takes precedence.
    #[must_use]
    pub fn delivered(sent: Signal, status: ExitStatus) -> Self {
        let received = status.signal().and_then(|raw| Signal::try_from(raw).ok());
        Self {
            code: status.code(),
            signal: received.or(Some(sent)),
        }
    }
}

#[derive(Debug)]
enum Workspace {
    Persistent(Utf8PathBuf),
    Temporary { path: Utf8PathBuf, dir: TempDir },
}

impl Workspace {
    fn prepare(requested: Option<&Utf8Path>) -> Result<Self, GethError> {
        if let Some(path) = requested {
            Dir::create_ambient_dir_all(path, ambient_authority())
                .map_err(|err| GethError::io(path, &err))?;
            return Ok(Self::Persistent(path.to_path_buf()));
        }

        let dir = tempfile::Builder::new()
            .prefix("geth-private-")
            .tempdir()
            .map_err(|err| GethError::io(std::env::temp_dir().to_string_lossy().into_owned(), &err))?;
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).map_err(|path| {
            GethError::Io {
                path: Utf8PathBuf::from(path.to_string_lossy().into_owned()),
                message: String::from("temporary directory is not valid UTF-8"),
            }
        })?;
        Ok(Self::Temporary { path, dir })
    }

    fn path(&self) -> &Utf8Path {
        match self {
            Self::Persistent(path) | Self::Temporary { path, .. } => path,
        }
    }

    /// Deletes a temporary directory; persistent ones are left alone.
    fn release(self) -> Result<(), GethError> {
        match self {
            Self::Persistent(_) => Ok(()),
            Self::Temporary { path, dir } => dir.close().map_err(|err| GethError::io(path, &err)),
        }
    }
}

#[derive(Debug)]
struct RunningNode<R: CommandRunner> {
    child: Child,
    pid: Option<u32>,
    console: ConsoleBridge<R>,
    workspace: Workspace,
    drain: JoinHandle<()>,
    mining: Option<MiningHandle>,
}

/// Supervises one private `geth` node.
#[derive(Debug)]
pub struct GethNode<R: CommandRunner = ProcessCommandRunner> {
    options: NodeOptions,
    config: ResolvedConfig,
    runner: R,
    logger: SharedLogger,
    state: NodeState,
    running: Option<RunningNode<R>>,
    data_dir: Option<Utf8PathBuf>,
    account: Option<Account>,
}

impl GethNode {
    /// Resolves `options` into a stopped node backed by real processes.
    ///
    /// # Errors
    ///
    /// Returns [`GethError::ExecutableNotFound`] when no `geth` is available.
    pub fn new(options: NodeOptions) -> Result<Self, GethError> {
        Self::with_runner(options, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> GethNode<R> {
    /// Resolves `options` into a stopped node whose one-shot commands go
    /// through `runner`.
    ///
    /// # Errors
    ///
    /// Returns [`GethError::ExecutableNotFound`] when no `geth` is available.
    pub fn with_runner(options: NodeOptions, runner: R) -> Result<Self, GethError> {
        let config = resolve(&options)?;
        Ok(Self {
            options,
            config,
            runner,
            logger: default_logger(),
            state: NodeState::Stopped,
            running: None,
            data_dir: None,
            account: None,
        })
    }

    /// Replaces the logger.
    #[must_use]
    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Provisions the working directory, launches the node and waits until it
    /// is ready. Starts the mining loop when a target is configured.
    ///
    /// # Errors
    ///
    /// Returns [`GethError::AlreadyRunning`] unless stopped, and otherwise any
    /// provisioning, spawn or readiness failure. A failed start leaves the
    /// node stopped with its child killed and temporary directory removed.
    pub async fn start(&mut self) -> Result<(), GethError> {
        if self.state != NodeState::Stopped {
            return Err(GethError::AlreadyRunning);
        }

        self.state = NodeState::Starting;
        let workspace = match Workspace::prepare(self.options.data_dir.as_deref()) {
            Ok(workspace) => workspace,
            Err(err) => {
                self.state = NodeState::Stopped;
                return Err(err);
            }
        };
        self.data_dir = Some(workspace.path().to_path_buf());

        let booted = self.boot(workspace.path()).await;
        match booted {
            Ok((account, child, lines)) => {
                self.account = Some(account);
                self.running = Some(self.attach(child, lines, workspace));
                self.state = NodeState::Running;
                Ok(())
            }
            Err(err) => {
                if let Err(cleanup) = workspace.release() {
                    self.logger.error(&cleanup.to_string());
                }
                self.state = NodeState::Stopped;
                Err(err)
            }
        }
    }

    async fn boot(
        &self,
        data_dir: &Utf8Path,
    ) -> Result<(Account, Child, UnboundedReceiver<OutputLine>), GethError> {
        let provisioner = Provisioner::new(
            self.config.executable.clone(),
            self.config.flags.clone(),
            self.runner.clone(),
            self.logger.clone(),
        );
        let account = provisioner
            .ensure_genesis(data_dir, &self.options.genesis)
            .await?;

        let (mut child, mut lines) = self.spawn(data_dir)?;
        let marker = self
            .options
            .ready_marker
            .as_deref()
            .unwrap_or_else(|| default_marker(&self.config.flags));
        let ready = await_ready(
            &mut lines,
            marker,
            self.options.startup_timeout,
            &self.output_sink(),
        )
        .await;

        if let Err(err) = ready {
            if let Err(kill) = child.kill().await {
                self.logger.error(&format!("failed to kill node: {kill}"));
            }
            return Err(err);
        }
        Ok((account, child, lines))
    }

    fn spawn(&self, data_dir: &Utf8Path) -> Result<(Child, UnboundedReceiver<OutputLine>), GethError> {
        let mut args = self.config.flags.to_args();
        args.extend([
            OsString::from("--datadir"),
            data_dir.as_os_str().to_owned(),
            OsString::from("--genesis"),
            OsString::from(genesis_path(data_dir)),
        ]);
        self.logger
            .info(&render_command_line(&self.config.executable, &args));

        let mut child = Command::new(&self.config.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| GethError::Spawn {
                program: self.config.executable.to_string(),
                message: err.to_string(),
            })?;

        let (sender, receiver) = unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            readiness::forward_lines(
                stdout,
                Stream::Stdout,
                sender.clone(),
                self.output_sink(),
            );
        }
        if let Some(stderr) = child.stderr.take() {
            readiness::forward_lines(stderr, Stream::Stderr, sender, self.output_sink());
        }
        Ok((child, receiver))
    }

    fn attach(
        &self,
        child: Child,
        lines: UnboundedReceiver<OutputLine>,
        workspace: Workspace,
    ) -> RunningNode<R> {
        let pid = child.id();
        let console = ConsoleBridge::new(
            self.config.executable.clone(),
            workspace.path(),
            self.runner.clone(),
            self.logger.clone(),
        );
        let mining = self.options.mining.map(|target| {
            self.logger.info(&format!("mining towards {target:?}"));
            MiningLoop::new(
                console.clone(),
                target,
                self.options.mining_interval,
                self.logger.clone(),
            )
            .spawn()
        });
        self.logger.info(&format!(
            "node running with pid {} in {}",
            pid.map_or_else(|| String::from("?"), |id| id.to_string()),
            workspace.path()
        ));

        RunningNode {
            child,
            pid,
            console,
            drain: readiness::drain(lines, self.output_sink()),
            workspace,
            mining,
        }
    }

    /// Cancels mining, signals the node and waits for it to exit. A temporary
    /// working directory is deleted afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`GethError::NotStarted`] unless running, [`GethError::Spawn`]
    /// when the process cannot be signalled or awaited, or [`GethError::Io`]
    /// when the temporary directory cannot be removed.
    pub async fn stop(&mut self, options: StopOptions) -> Result<StopOutcome, GethError> {
        if self.state != NodeState::Running {
            return Err(GethError::NotStarted);
        }
        let Some(mut running) = self.running.take() else {
            return Err(GethError::NotStarted);
        };

        self.state = NodeState::Stopping;
        if let Some(mining) = running.mining.take() {
            mining.cancel().await;
        }

        let terminated = self.terminate(&mut running.child, running.pid, options).await;
        running.drain.abort();
        let released = running.workspace.release();
        self.state = NodeState::Stopped;

        let outcome = terminated?;
        released?;
        self.logger.info(&format!("node stopped: {outcome:?}"));
        Ok(outcome)
    }

    async fn terminate(
        &self,
        child: &mut Child,
        target: Option<u32>,
        options: StopOptions,
    ) -> Result<StopOutcome, GethError> {
        let program = self.config.executable.to_string();
        let spawn_error = |message: String| GethError::Spawn {
            program: program.clone(),
            message,
        };

        let sent = if options.kill {
            child.start_kill().map_err(|err| spawn_error(err.to_string()))?;
            Signal::SIGKILL
        } else {
            if let Some(pid) = target {
                let raw = i32::try_from(pid).map_err(|err| spawn_error(err.to_string()))?;
                signal::kill(Pid::from_raw(raw), Signal::SIGTERM)
                    .map_err(|errno| spawn_error(errno.to_string()))?;
            }
            Signal::SIGTERM
        };

        let status = child
            .wait()
            .await
            .map_err(|err: io::Error| spawn_error(err.to_string()))?;
        Ok(StopOutcome::delivered(sent, status))
    }

    /// Evaluates `command` in the node console and returns trimmed stdout.
    ///
    /// # Errors
    ///
    /// Returns [`GethError::NotStarted`] unless running, or
    /// [`GethError::ConsoleExecFailed`] when the command fails.
    pub async fn console_exec(&self, command: &str) -> Result<String, GethError> {
        match &self.running {
            Some(running) if self.state == NodeState::Running => {
                running.console.exec(command).await
            }
            _ => Err(GethError::NotStarted),
        }
    }

    /// Removes the working directory and everything in it.
    ///
    /// # Errors
    ///
    /// Returns [`GethError::CannotDestroyWhileRunning`] unless stopped, or
    /// [`GethError::Io`] when removal fails.
    pub fn destroy_data(&mut self) -> Result<(), GethError> {
        if self.state != NodeState::Stopped {
            return Err(GethError::CannotDestroyWhileRunning);
        }
        let Some(path) = self.data_dir.as_deref() else {
            return Ok(());
        };

        match std::fs::remove_dir_all(path) {
            Ok(()) => {
                self.logger.info(&format!("removed {path}"));
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(GethError::io(path, &err)),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> NodeState {
        self.state
    }

    /// Whether the node is ready for console commands.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == NodeState::Running
    }

    /// Process id of the running node.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.running.as_ref().and_then(|running| running.pid)
    }

    /// Account created for the working directory, once loaded.
    #[must_use]
    pub const fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    /// Last used working directory; still reported after stop.
    #[must_use]
    pub fn data_dir(&self) -> Option<&Utf8Path> {
        self.data_dir.as_deref()
    }

    /// Path of the genesis document in the working directory.
    #[must_use]
    pub fn genesis_path(&self) -> Option<Utf8PathBuf> {
        self.data_dir().map(genesis_path)
    }

    /// Resolved executable.
    #[must_use]
    pub fn executable(&self) -> &Utf8Path {
        &self.config.executable
    }

    /// Final flags passed to the node.
    #[must_use]
    pub const fn flags(&self) -> &NodeFlags {
        &self.config.flags
    }

    /// `http://localhost:<rpcport>` while running with RPC enabled.
    #[must_use]
    pub fn http_rpc_endpoint(&self) -> Option<String> {
        (self.is_running() && self.config.flags.is_enabled(RPC_FLAG))
            .then(|| format!("http://localhost:{}", self.config.flags.rpc_port()))
    }

    fn output_sink(&self) -> OutputSink {
        OutputSink::new(self.logger.clone(), self.options.verbose)
    }
}

#[cfg(test)]
mod tests;
