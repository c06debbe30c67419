//! One-shot console commands against a running node.
//!
//! Each call spawns `geth --exec <command> attach ipc:<path>` and captures its
//! output. Calls are independent processes, so any number may be in flight.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{GethError, status_text};
use crate::logger::SharedLogger;
use crate::runner::{CommandRunner, render_command_line};

/// File name of the node's IPC socket inside the working directory.
pub const IPC_FILE_NAME: &str = "geth.ipc";

/// Balance of the coinbase in ether, printed as a decimal string.
pub const BALANCE_QUERY: &str = "web3.fromWei(eth.getBalance(eth.coinbase), 'ether')";

/// Whether the node is mining, printed as `true` or `false`.
pub const MINING_QUERY: &str = "eth.mining";

/// Starts the miner.
pub const START_MINING: &str = "miner.start()";

/// Stops the miner.
pub const STOP_MINING: &str = "miner.stop()";

/// Executes console commands through the node binary's attach sub-command.
#[derive(Clone, Debug)]
pub struct ConsoleBridge<R: CommandRunner> {
    executable: Utf8PathBuf,
    ipc_path: Utf8PathBuf,
    runner: R,
    logger: SharedLogger,
}

impl<R: CommandRunner> ConsoleBridge<R> {
    /// Creates a bridge for the node whose working directory is `data_dir`.
    #[must_use]
    pub fn new(executable: Utf8PathBuf, data_dir: &Utf8Path, runner: R, logger: SharedLogger) -> Self {
        Self {
            executable,
            ipc_path: data_dir.join(IPC_FILE_NAME),
            runner,
            logger,
        }
    }

    /// Path of the IPC endpoint the bridge attaches to.
    #[must_use]
    pub fn ipc_path(&self) -> &Utf8Path {
        &self.ipc_path
    }

    /// Evaluates `command` and returns the trimmed standard output.
    ///
    /// # Errors
    ///
    /// Returns [`GethError::Spawn`] when the attach process cannot start, or
    /// [`GethError::ConsoleExecFailed`] when it exits unsuccessfully.
    pub async fn exec(&self, command: &str) -> Result<String, GethError> {
        let args = self.attach_args(command);
        self.logger
            .debug(&render_command_line(&self.executable, &args));

        let output = self.runner.run(&self.executable, &args).await?;
        if !output.is_success() {
            return Err(GethError::ConsoleExecFailed {
                command: command.to_owned(),
                status_text: status_text(output.code),
                stderr: output.stderr,
            });
        }

        Ok(output.stdout.trim().to_owned())
    }

    /// Coinbase balance in ether.
    ///
    /// # Errors
    ///
    /// Propagates [`ConsoleBridge::exec`] failures and returns
    /// [`GethError::UnexpectedConsoleOutput`] for a non-numeric reply.
    pub async fn balance(&self) -> Result<f64, GethError> {
        let output = self.exec(BALANCE_QUERY).await?;
        output
            .trim_matches('"')
            .parse::<f64>()
            .map_err(|_| GethError::UnexpectedConsoleOutput {
                command: String::from(BALANCE_QUERY),
                output,
            })
    }

    /// Whether the miner is active.
    ///
    /// # Errors
    ///
    /// Propagates [`ConsoleBridge::exec`] failures and returns
    /// [`GethError::UnexpectedConsoleOutput`] for a non-boolean reply.
    pub async fn is_mining(&self) -> Result<bool, GethError> {
        let output = self.exec(MINING_QUERY).await?;
        match output.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(GethError::UnexpectedConsoleOutput {
                command: String::from(MINING_QUERY),
                output,
            }),
        }
    }

    /// Starts the miner.
    ///
    /// # Errors
    ///
    /// Propagates [`ConsoleBridge::exec`] failures.
    pub async fn start_mining(&self) -> Result<(), GethError> {
        self.exec(START_MINING).await.map(|_| ())
    }

    /// Stops the miner.
    ///
    /// # Errors
    ///
    /// Propagates [`ConsoleBridge::exec`] failures.
    pub async fn stop_mining(&self) -> Result<(), GethError> {
        self.exec(STOP_MINING).await.map(|_| ())
    }

    fn attach_args(&self, command: &str) -> Vec<OsString> {
        vec![
            OsString::from("--exec"),
            OsString::from(command),
            OsString::from("attach"),
            OsString::from(format!("ipc:{}", self.ipc_path)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::*;
    use crate::test_support::{RecordingLogger, ScriptedRunner};

    fn bridge(runner: &ScriptedRunner, data_dir: &str) -> ConsoleBridge<ScriptedRunner> {
        ConsoleBridge::new(
            Utf8PathBuf::from("/usr/bin/geth"),
            Utf8Path::new(data_dir),
            runner.clone(),
            Arc::new(RecordingLogger::new()),
        )
    }

    #[rstest]
    #[tokio::test]
    async fn exec_passes_command_and_ipc_path_as_discrete_arguments() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "  \"0xabc\"\n", "");

        let output = bridge(&runner, "/tmp/my chain")
            .exec("eth.coinbase")
            .await
            .expect("exec should succeed");

        assert_eq!(output, "\"0xabc\"");
        let invocations = runner.invocations();
        let args: Vec<String> = invocations[0]
            .args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["--exec", "eth.coinbase", "attach", "ipc:/tmp/my chain/geth.ipc"]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn exec_failure_carries_stderr() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(1), "", "ReferenceError: mining is not defined");

        let err = bridge(&runner, "/tmp/chain")
            .exec("mining.whatever()")
            .await
            .expect_err("bad command should fail");

        assert_eq!(
            err,
            GethError::ConsoleExecFailed {
                command: String::from("mining.whatever()"),
                status_text: String::from("1"),
                stderr: String::from("ReferenceError: mining is not defined"),
            }
        );
    }

    #[rstest]
    #[case("0", 0.0)]
    #[case("5.25", 5.25)]
    #[case("\"12\"", 12.0)]
    #[tokio::test]
    async fn balance_parses_decimal_ether(#[case] reply: &str, #[case] expected: f64) {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), reply, "");

        let balance = bridge(&runner, "/tmp/chain")
            .balance()
            .await
            .expect("balance should parse");

        assert_eq!(balance, expected);
    }

    #[rstest]
    #[tokio::test]
    async fn mining_flag_rejects_unexpected_reply() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "true\n", "");
        runner.push_output(Some(0), "undefined", "");
        let console = bridge(&runner, "/tmp/chain");

        assert!(console.is_mining().await.expect("true should parse"));
        let err = console.is_mining().await.expect_err("undefined should fail");
        assert!(matches!(err, GethError::UnexpectedConsoleOutput { .. }), "got {err}");
    }
}
