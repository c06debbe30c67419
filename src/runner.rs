//! One-shot command execution and the runner abstraction used for fakes.
//!
//! Provisioning steps and console invocations are short-lived processes whose
//! output is captured in full. They go through [`CommandRunner`] so tests can
//! script outcomes without a real `geth` binary. The long-running node itself
//! is spawned directly by the controller because its output is streamed.

use std::ffi::OsString;
use std::future::Future;
use std::process::Stdio;

use camino::Utf8Path;
use shell_escape::unix::escape;
use tokio::process::Command;

use crate::error::GethError;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Clone + Send + Sync + 'static {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`GethError::Spawn`] if the command cannot be started.
    fn run(
        &self,
        program: &Utf8Path,
        args: &[OsString],
    ) -> impl Future<Output = Result<CommandOutput, GethError>> + Send;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    async fn run(
        &self,
        program: &Utf8Path,
        args: &[OsString],
    ) -> Result<CommandOutput, GethError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| GethError::Spawn {
                program: program.to_string(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Renders an invocation as a copy-pasteable shell line for logs.
///
/// Arguments are passed to processes as discrete values, so quoting only
/// matters for humans reading the log.
#[must_use]
pub fn render_command_line(program: &Utf8Path, args: &[OsString]) -> String {
    let mut result = String::from(escape(program.as_str().into()));
    for arg in args {
        result.push(' ');
        let lossy = arg.to_string_lossy();
        result.push_str(escape(lossy).as_ref());
    }
    result
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use rstest::rstest;

    #[tokio::test]
    async fn process_runner_captures_output_and_code() {
        let output = ProcessCommandRunner
            .run(
                Utf8Path::new("sh"),
                &[
                    OsString::from("-c"),
                    OsString::from("printf out && printf err 1>&2; exit 3"),
                ],
            )
            .await
            .expect("sh should run");

        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
        assert!(!output.is_success());
    }

    #[tokio::test]
    async fn dropped_run_kills_the_command() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let marker = dir.path().join("finished");
        let script = format!("sleep 1; touch '{}'", marker.display());

        let args = [OsString::from("-c"), OsString::from(script)];
        let runner = ProcessCommandRunner;
        let cancelled = tokio::time::timeout(
            Duration::from_millis(200),
            runner.run(Utf8Path::new("sh"), &args),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(cancelled.is_err(), "command should still be running");
        assert!(!marker.exists(), "command outlived the cancelled run");
    }

    #[tokio::test]
    async fn process_runner_reports_spawn_failure() {
        let result = ProcessCommandRunner
            .run(Utf8Path::new("definitely-not-a-real-binary-xyz"), &[])
            .await;

        match result {
            Err(GethError::Spawn { program, .. }) => {
                assert_eq!(program, "definitely-not-a-real-binary-xyz");
            }
            other => panic!("expected GethError::Spawn, got {other:?}"),
        }
    }

    #[rstest]
    #[case(&["--exec", "eth.mining"], "geth --exec eth.mining")]
    #[case(&["attach", "ipc:/tmp/my dir/geth.ipc"], "geth attach 'ipc:/tmp/my dir/geth.ipc'")]
    #[case(&["--exec", "web3.fromWei(eth.getBalance(eth.coinbase), 'ether')"],
        "geth --exec 'web3.fromWei(eth.getBalance(eth.coinbase), '\\''ether'\\'')'")]
    fn render_command_line_quotes_each_argument(#[case] args: &[&str], #[case] expected: &str) {
        let args: Vec<OsString> = args.iter().map(OsString::from).collect();

        assert_eq!(render_command_line(Utf8Path::new("geth"), &args), expected);
    }
}
