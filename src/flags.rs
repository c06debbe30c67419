//! Node command-line flags and their rendering.
//!
//! Flags are kept as an ordered map so the generated argument list is stable.
//! `false` and absent values are dropped, `true` renders as a bare switch,
//! and everything else renders as `--key value`.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;

use serde::Deserialize;

/// Flag enabling the HTTP JSON-RPC listener.
pub const RPC_FLAG: &str = "rpc";

/// Flag selecting the HTTP JSON-RPC port.
pub const RPC_PORT_FLAG: &str = "rpcport";

/// Port geth listens on for HTTP JSON-RPC unless overridden.
pub const DEFAULT_RPC_PORT: u16 = 8545;

/// Value attached to a node flag.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum FlagValue {
    /// Switch emitted bare when `true`, omitted when `false`.
    Bool(bool),
    /// Integer argument.
    Int(i64),
    /// String argument.
    Text(String),
    /// Explicitly unset; never emitted.
    Absent,
}

impl FlagValue {
    /// Parses a value given on the command line (`true`, `false`, `null`,
    /// integers, anything else as text).
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            "null" | "" => Self::Absent,
            other => other
                .parse::<i64>()
                .map_or_else(|_| Self::Text(other.to_owned()), Self::Int),
        }
    }

    const fn is_enabled(&self) -> bool {
        !matches!(self, Self::Bool(false) | Self::Absent)
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Absent => Ok(()),
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Ordered mapping of flag name to value.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct NodeFlags(BTreeMap<String, FlagValue>);

impl NodeFlags {
    /// Creates an empty flag set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The flags every node starts from before caller overrides.
    #[must_use]
    pub fn defaults() -> Self {
        let mut flags = Self::new();
        flags.set("networkid", 33333_i64);
        flags.set(RPC_FLAG, true);
        flags.set(
            "rpcapi",
            "admin,db,eth,debug,miner,net,shh,txpool,personal,web3",
        );
        flags.set("rpccorsdomain", "*");
        flags.set("maxpeers", 0_i64);
        flags.set("nodiscover", true);
        flags.set("lightkdf", true);
        flags.set("cache", 64_i64);
        flags
    }

    /// Sets or replaces a flag.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<FlagValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style variant of [`NodeFlags::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Returns the value stored for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FlagValue> {
        self.0.get(key)
    }

    /// Returns `true` when `key` would be emitted on the command line.
    #[must_use]
    pub fn is_enabled(&self, key: &str) -> bool {
        self.get(key).is_some_and(FlagValue::is_enabled)
    }

    /// Shallow merge: every key in `overrides` replaces the one in `self`.
    #[must_use]
    pub fn merged(mut self, overrides: &Self) -> Self {
        for (key, value) in &overrides.0 {
            self.0.insert(key.clone(), value.clone());
        }
        self
    }

    /// Port the HTTP JSON-RPC listener binds, falling back to geth's default.
    #[must_use]
    pub fn rpc_port(&self) -> u16 {
        match self.get(RPC_PORT_FLAG) {
            Some(FlagValue::Int(port)) => u16::try_from(*port).unwrap_or(DEFAULT_RPC_PORT),
            Some(FlagValue::Text(port)) => port.parse().unwrap_or(DEFAULT_RPC_PORT),
            _ => DEFAULT_RPC_PORT,
        }
    }

    /// Renders the flags as discrete process arguments.
    #[must_use]
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.0.len() * 2);
        for (key, value) in &self.0 {
            match value {
                FlagValue::Bool(false) | FlagValue::Absent => {}
                FlagValue::Bool(true) => args.push(OsString::from(format!("--{key}"))),
                FlagValue::Int(_) | FlagValue::Text(_) => {
                    args.push(OsString::from(format!("--{key}")));
                    args.push(OsString::from(value.to_string()));
                }
            }
        }
        args
    }
}

impl<K: Into<String>, V: Into<FlagValue>> FromIterator<(K, V)> for NodeFlags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut flags = Self::new();
        for (key, value) in iter {
            flags.set(key, value);
        }
        flags
    }
}
