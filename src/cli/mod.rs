//! Command-line interface definitions for the `geth-private` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `geth-private` binary.
#[derive(Debug, Parser)]
#[command(
    name = "geth-private",
    about = "Run a disposable private geth node for integration tests",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision and launch a node, holding it until interrupted.
    #[command(name = "start", about = "Launch a private node and keep it running until Ctrl-C")]
    Start(StartCommand),
    /// Evaluate one console command against a running node.
    #[command(name = "exec", about = "Run a console command against a running node")]
    Exec(ExecCommand),
}

impl Cli {
    /// Whether verbose output was requested.
    pub(crate) const fn verbose(&self) -> bool {
        match self {
            Self::Start(command) => command.node.verbose,
            Self::Exec(command) => command.node.verbose,
        }
    }
}

/// Options shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct NodeArgs {
    /// Path to the `geth` executable; `PATH` is searched otherwise.
    #[arg(long, value_name = "PATH")]
    pub(crate) geth_path: Option<String>,
    /// Working directory holding the chain data.
    #[arg(long = "datadir", value_name = "DIR")]
    pub(crate) data_dir: Option<String>,
    /// Log node output and commands.
    #[arg(long, short)]
    pub(crate) verbose: bool,
}

/// Arguments for the `geth-private start` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct StartCommand {
    #[command(flatten)]
    pub(crate) node: NodeArgs,
    /// Mine until the coinbase holds at least this many ether.
    #[arg(long, value_name = "ETHER", conflicts_with = "auto_mine")]
    pub(crate) balance: Option<f64>,
    /// Mine for as long as the node runs.
    #[arg(long)]
    pub(crate) auto_mine: bool,
    /// Seconds to wait for the node to report readiness.
    #[arg(long, value_name = "SECS")]
    pub(crate) startup_timeout: Option<u64>,
    /// Output text that marks the node as ready.
    #[arg(long, value_name = "TEXT")]
    pub(crate) ready_marker: Option<String>,
    /// Extra node flag as `name=value`; `name=true` emits a bare flag and
    /// `name=false` removes a default.
    #[arg(long = "geth-option", value_name = "NAME=VALUE", value_parser = parse_key_value)]
    pub(crate) geth_options: Vec<(String, String)>,
    /// Genesis field override as `name=value`; JSON values are accepted.
    #[arg(long = "genesis", value_name = "NAME=VALUE", value_parser = parse_key_value)]
    pub(crate) genesis: Vec<(String, String)>,
}

/// Arguments for the `geth-private exec` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ExecCommand {
    #[command(flatten)]
    pub(crate) node: NodeArgs,
    /// Console expression to evaluate, e.g. `eth.blockNumber`.
    #[arg(required = true)]
    pub(crate) command: String,
}

/// Splits `name=value` at the first `=`.
pub(crate) fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_owned(), value.to_owned())),
        _ => Err(format!("expected NAME=VALUE, got `{raw}`")),
    }
}
