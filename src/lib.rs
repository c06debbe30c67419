//! Core library for supervising disposable private `geth` nodes.
//!
//! A [`GethNode`] provisions a working directory with a genesis block and a
//! single account, launches `geth` as a child process, waits until it reports
//! readiness, and optionally mines until the account holds a target balance.
//! Console commands are evaluated through the binary's own `attach` client.

pub mod account;
pub mod config;
pub mod console;
pub mod error;
pub mod flags;
pub mod genesis;
pub mod logger;
pub mod mining;
pub mod node;
pub mod provision;
pub mod runner;
pub mod test_support;

pub use account::Account;
pub use config::{
    ConfigError, GethConfig, NodeOptions, ResolvedConfig, resolve, resolve_executable,
};
pub use console::ConsoleBridge;
pub use error::GethError;
pub use flags::{FlagValue, NodeFlags};
pub use genesis::{GenesisOverrides, GenesisSpec};
pub use logger::{NodeLogger, SharedLogger, TracingLogger, default_logger};
pub use mining::{MiningHandle, MiningLoop, MiningTarget};
pub use node::{GethNode, NodeState, StopOptions, StopOutcome};
pub use provision::Provisioner;
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner};
