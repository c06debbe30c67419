//! Configuration loading via `ortho-config` and option resolution.
//!
//! [`GethConfig`] is the layered, user-facing configuration (defaults,
//! configuration files, `GETH_PRIVATE_*` environment variables). It converts
//! into [`NodeOptions`], the library-level description of a node, which
//! [`resolve`] turns into an executable path and a final flag set.

use std::env;
use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::error::GethError;
use crate::flags::NodeFlags;
use crate::genesis::GenesisOverrides;
use crate::mining::{DEFAULT_MINING_INTERVAL, MiningTarget};

/// Binary name searched for on `PATH` when no explicit path is configured.
pub const GETH_BINARY: &str = "geth";

/// Grace window for the readiness marker unless overridden.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Node settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq)]
#[ortho_config(
    prefix = "GETH_PRIVATE",
    discovery(
        app_name = "geth-private",
        env_var = "GETH_PRIVATE_CONFIG_PATH",
        config_file_name = "geth-private.toml",
        dotfile_name = ".geth-private.toml",
        project_file_name = "geth-private.toml"
    )
)]
pub struct GethConfig {
    /// Explicit path to the `geth` executable; `PATH` is searched otherwise.
    pub geth_path: Option<String>,
    /// Persistent working directory; a temporary one is used when unset.
    pub data_dir: Option<String>,
    /// Whether node output is forwarded to the logger.
    #[ortho_config(default = false)]
    pub verbose: bool,
    /// Seconds to wait for the readiness marker.
    #[ortho_config(default = 30)]
    pub startup_timeout_secs: u64,
    /// Output substring that declares the node ready.
    pub ready_marker: Option<String>,
    /// Mine until the coinbase holds at least this many ether.
    pub mining_balance: Option<f64>,
    /// Mine for as long as the node runs.
    #[ortho_config(default = false)]
    pub auto_mine: bool,
}

/// Errors raised when loading the layered configuration.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl GethConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("geth-private")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Builds node options from the configured values.
    #[must_use]
    pub fn to_options(&self) -> NodeOptions {
        let mining = if self.auto_mine {
            Some(MiningTarget::Indefinite)
        } else {
            self.mining_balance.map(MiningTarget::Balance)
        };

        NodeOptions {
            geth_path: self.geth_path.as_deref().map(Utf8PathBuf::from),
            data_dir: self.data_dir.as_deref().map(Utf8PathBuf::from),
            verbose: self.verbose,
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
            ready_marker: self.ready_marker.clone(),
            mining,
            ..NodeOptions::default()
        }
    }
}

/// Everything needed to provision and launch one node.
#[derive(Clone, Debug)]
pub struct NodeOptions {
    /// Explicit `geth` path.
    pub geth_path: Option<Utf8PathBuf>,
    /// Caller-owned working directory. `None` selects a temporary directory
    /// that is deleted on stop.
    pub data_dir: Option<Utf8PathBuf>,
    /// Flag overrides merged over [`NodeFlags::defaults`].
    pub flags: NodeFlags,
    /// Genesis overrides merged over the default document.
    pub genesis: GenesisOverrides,
    /// Optional mining target driven after start.
    pub mining: Option<MiningTarget>,
    /// Forward node output lines to the logger.
    pub verbose: bool,
    /// Grace window for the readiness marker.
    pub startup_timeout: Duration,
    /// Replaces the default readiness marker.
    pub ready_marker: Option<String>,
    /// Delay between mining loop cycles.
    pub mining_interval: Duration,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            geth_path: None,
            data_dir: None,
            flags: NodeFlags::new(),
            genesis: GenesisOverrides::new(),
            mining: None,
            verbose: false,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            ready_marker: None,
            mining_interval: DEFAULT_MINING_INTERVAL,
        }
    }
}

impl NodeOptions {
    /// Uses an explicit `geth` binary.
    #[must_use]
    pub fn with_geth_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.geth_path = Some(path.into());
        self
    }

    /// Uses a caller-owned working directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Replaces the flag overrides.
    #[must_use]
    pub fn with_flags(mut self, flags: NodeFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Replaces the genesis overrides.
    #[must_use]
    pub fn with_genesis(mut self, genesis: GenesisOverrides) -> Self {
        self.genesis = genesis;
        self
    }

    /// Drives the mining loop towards `target` once running.
    #[must_use]
    pub const fn with_mining(mut self, target: MiningTarget) -> Self {
        self.mining = Some(target);
        self
    }

    /// Toggles forwarding of node output.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Overrides the readiness grace window.
    #[must_use]
    pub const fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Overrides the readiness marker.
    #[must_use]
    pub fn with_ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.ready_marker = Some(marker.into());
        self
    }

    /// Overrides the mining loop interval.
    ///
    /// This is primarily used by tests to keep mining scenarios fast.
    #[must_use]
    pub const fn with_mining_interval(mut self, interval: Duration) -> Self {
        self.mining_interval = interval;
        self
    }
}

/// Executable and final flags derived from [`NodeOptions`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedConfig {
    /// Absolute or caller-given path to `geth`.
    pub executable: Utf8PathBuf,
    /// Defaults with caller overrides applied.
    pub flags: NodeFlags,
}

/// Resolves the executable and merges flag overrides over the defaults.
///
/// # Errors
///
/// Returns [`GethError::ExecutableNotFound`] when no usable binary exists.
pub fn resolve(options: &NodeOptions) -> Result<ResolvedConfig, GethError> {
    let executable = resolve_executable(options.geth_path.as_deref(), env::var_os("PATH"))?;
    Ok(ResolvedConfig {
        executable,
        flags: NodeFlags::defaults().merged(&options.flags),
    })
}

/// Uses `explicit` when given, otherwise searches `search_path` for `geth`.
///
/// # Errors
///
/// Returns [`GethError::ExecutableNotFound`] when the explicit path is not a
/// file or no `PATH` entry holds an executable `geth`.
pub fn resolve_executable(
    explicit: Option<&Utf8Path>,
    search_path: Option<OsString>,
) -> Result<Utf8PathBuf, GethError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(GethError::ExecutableNotFound {
            name: path.to_string(),
            detail: String::from("no such file"),
        });
    }

    let search_path = search_path.unwrap_or_default();
    env::split_paths(&search_path)
        .filter_map(|dir| Utf8PathBuf::from_path_buf(dir).ok())
        .map(|dir| dir.join(GETH_BINARY))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| GethError::ExecutableNotFound {
            name: String::from(GETH_BINARY),
            detail: String::from("not found in PATH"),
        })
}

fn is_executable(path: &Utf8Path) -> bool {
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}
