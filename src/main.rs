//! Binary entry point for the `geth-private` CLI.

use std::env;
use std::io::{self, Write};
use std::process;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use serde_json::Value;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use geth_private::{
    ConsoleBridge, FlagValue, GenesisOverrides, GethConfig, GethError, GethNode, NodeFlags,
    NodeOptions, ProcessCommandRunner, StopOptions, default_logger, resolve_executable,
};

mod cli;

use cli::{Cli, ExecCommand, NodeArgs, StartCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Node(#[from] GethError),
    #[error("failed to wait for interrupt: {0}")]
    Interrupt(String),
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose());
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config =
        GethConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    match cli {
        Cli::Start(command) => start_command(config, command).await,
        Cli::Exec(command) => exec_command(config, command).await,
    }
}

async fn start_command(config: GethConfig, args: StartCommand) -> Result<(), CliError> {
    let options = start_options(config, &args);
    let mut node = GethNode::new(options)?;
    node.start().await?;

    let mut stdout = io::stdout();
    writeln!(
        stdout,
        "geth running with pid {} in {}",
        node.pid().map_or_else(|| String::from("?"), |pid| pid.to_string()),
        node.data_dir().map_or("?", |dir| dir.as_str()),
    )
    .map_err(|err| CliError::Output(err.to_string()))?;
    if let Some(account) = node.account() {
        writeln!(stdout, "account {}", account.to_prefixed())
            .map_err(|err| CliError::Output(err.to_string()))?;
    }
    if let Some(endpoint) = node.http_rpc_endpoint() {
        writeln!(stdout, "rpc {endpoint}").map_err(|err| CliError::Output(err.to_string()))?;
    }

    let interrupted = tokio::signal::ctrl_c()
        .await
        .map_err(|err| CliError::Interrupt(err.to_string()));
    let outcome = node.stop(StopOptions::default()).await?;
    interrupted?;
    tracing::info!(code = ?outcome.code, signal = ?outcome.signal, "geth stopped");
    Ok(())
}

fn start_options(mut config: GethConfig, args: &StartCommand) -> NodeOptions {
    overlay_node_args(&mut config, &args.node);
    if let Some(balance) = args.balance {
        config.mining_balance = Some(balance);
    }
    if args.auto_mine {
        config.auto_mine = true;
    }
    if let Some(secs) = args.startup_timeout {
        config.startup_timeout_secs = secs;
    }
    if let Some(marker) = &args.ready_marker {
        config.ready_marker = Some(marker.clone());
    }

    let flags: NodeFlags = args
        .geth_options
        .iter()
        .map(|(name, value)| (name.clone(), FlagValue::parse(value)))
        .collect();
    let genesis = args
        .genesis
        .iter()
        .fold(GenesisOverrides::new(), |overrides, (name, value)| {
            overrides.with(name.clone(), genesis_value(value))
        });

    config.to_options().with_flags(flags).with_genesis(genesis)
}

fn genesis_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

async fn exec_command(mut config: GethConfig, args: ExecCommand) -> Result<(), CliError> {
    overlay_node_args(&mut config, &args.node);
    let data_dir = config.data_dir.map(Utf8PathBuf::from).ok_or_else(|| {
        CliError::Config(String::from(
            "exec needs --datadir or GETH_PRIVATE_DATA_DIR to locate the node",
        ))
    })?;
    let executable = resolve_executable(
        config.geth_path.as_deref().map(Utf8Path::new),
        env::var_os("PATH"),
    )?;

    let console = ConsoleBridge::new(executable, &data_dir, ProcessCommandRunner, default_logger());
    let output = console.exec(&args.command).await?;
    writeln!(io::stdout(), "{output}").map_err(|err| CliError::Output(err.to_string()))
}

fn overlay_node_args(config: &mut GethConfig, args: &NodeArgs) {
    if let Some(path) = &args.geth_path {
        config.geth_path = Some(path.clone());
    }
    if let Some(dir) = &args.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if args.verbose {
        config.verbose = true;
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
