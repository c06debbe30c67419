//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::error::GethError;
use crate::logger::NodeLogger;
use crate::runner::{CommandOutput, CommandRunner};

/// Address the fake `geth` script creates for its single account.
pub const FAKE_ACCOUNT: &str = "0123456789abcdef0123456789abcdef01234567";

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program path as passed to the runner.
    pub program: Utf8PathBuf,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.to_string());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            });
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &Utf8Path,
        args: &[OsString],
    ) -> Result<CommandOutput, GethError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommandInvocation {
                program: program.to_path_buf(),
                args: args.to_vec(),
            });
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| GethError::Spawn {
                program: program.to_string(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Severity recorded by [`RecordingLogger`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    /// Debug record.
    Debug,
    /// Info record.
    Info,
    /// Error record.
    Error,
}

/// Logger that keeps every record for later assertions.
#[derive(Clone, Debug, Default)]
pub struct RecordingLogger {
    records: Arc<Mutex<Vec<(LogLevel, String)>>>,
}

impl RecordingLogger {
    /// Creates an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all records.
    #[must_use]
    pub fn records(&self) -> Vec<(LogLevel, String)> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns `true` when any record at `level` contains `needle`.
    #[must_use]
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|(recorded, message)| *recorded == level && message.contains(needle))
    }

    /// Returns `true` when at least one record was made at `level`.
    #[must_use]
    pub fn has_level(&self, level: LogLevel) -> bool {
        self.records().iter().any(|(recorded, _)| *recorded == level)
    }

    fn push(&self, level: LogLevel, message: &str) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, message.to_owned()));
    }
}

impl NodeLogger for RecordingLogger {
    fn debug(&self, message: &str) {
        self.push(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.push(LogLevel::Info, message);
    }

    fn error(&self, message: &str) {
        self.push(LogLevel::Error, message);
    }
}

/// Writes `contents` to `path` and marks it executable.
///
/// # Panics
///
/// Panics when the file cannot be written; intended for test fixtures.
pub fn write_executable(path: &Utf8Path, contents: &str) {
    fs::write(path, contents).unwrap_or_else(|err| panic!("write {path}: {err}"));
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .unwrap_or_else(|err| panic!("chmod {path}: {err}"));
}

/// Shell script standing in for `geth`.
///
/// It understands `init`, `account list`, `js`, `attach --exec`, and plain
/// launches. Launch behaviour is selected with `--identity`: `fatal` prints a
/// fatal line and exits, `silent` never prints a marker, `exit` quits before
/// the marker. Chain state (balance, mining) lives in files next to the IPC
/// path, and every provisioning call is appended to `fake-geth.log`.
pub const FAKE_GETH_SCRIPT: &str = r#"#!/bin/sh
datadir=""
exec_cmd=""
mode="run"
ipc=""
identity=""
rpc=""
script=""
genesis=""
while [ $# -gt 0 ]; do
  case "$1" in
    --datadir) datadir="$2"; shift 2; continue ;;
    --exec) exec_cmd="$2"; shift 2; continue ;;
    --identity) identity="$2"; shift 2; continue ;;
    --genesis) genesis="$2"; shift 2; continue ;;
    --rpc) rpc="1" ;;
    init) mode="init"; genesis="$2"; shift 2; continue ;;
    account) mode="account" ;;
    js) mode="js"; script="$2"; shift 2; continue ;;
    attach) mode="attach"; ipc="$2"; shift 2; continue ;;
  esac
  shift
done

ADDRESS="0123456789abcdef0123456789abcdef01234567"

case "$mode" in
  init)
    [ -f "$genesis" ] || { echo "Fatal: missing genesis $genesis" >&2; exit 1; }
    echo "init" >> "$datadir/fake-geth.log"
    echo "Successfully wrote genesis state" >&2
    ;;
  js)
    [ -f "$script" ] || { echo "Fatal: missing script $script" >&2; exit 1; }
    echo "js" >> "$datadir/fake-geth.log"
    mkdir -p "$datadir/keystore"
    echo "$ADDRESS" >> "$datadir/keystore/accounts"
    ;;
  account)
    echo "account" >> "$datadir/fake-geth.log"
    n=0
    if [ -f "$datadir/keystore/accounts" ]; then
      while read -r addr; do
        echo "Account #$n: {$addr} keystore://$datadir/keystore/UTC--$addr"
        n=$((n + 1))
      done < "$datadir/keystore/accounts"
    fi
    ;;
  attach)
    path="${ipc#ipc:}"
    dir=$(dirname "$path")
    [ -e "$path" ] || { echo "Fatal: Unable to attach to remote geth: no such file" >&2; exit 1; }
    case "$exec_cmd" in
      *getBalance*)
        bal=$(cat "$dir/balance" 2>/dev/null || echo 0)
        if [ -f "$dir/mining" ]; then
          bal=$((bal + 1))
          echo "$bal" > "$dir/balance"
        fi
        echo "$bal"
        ;;
      eth.mining)
        if [ -f "$dir/mining" ]; then echo true; else echo false; fi
        ;;
      eth.coinbase)
        echo "\"0x$(head -n 1 "$dir/keystore/accounts")\""
        ;;
      'miner.start()')
        touch "$dir/mining"
        echo null
        ;;
      'miner.stop()')
        rm -f "$dir/mining"
        echo true
        ;;
      *)
        echo "ReferenceError: '$exec_cmd' is not defined" >&2
        exit 1
        ;;
    esac
    ;;
  run)
    echo "run" >> "$datadir/fake-geth.log"
    case "$identity" in
      fatal)
        echo "Fatal: Error starting protocol stack: address already in use" >&2
        exit 1
        ;;
      exit)
        echo "INFO Starting peer-to-peer node" >&2
        exit 0
        ;;
      garbled)
        printf 'INFO peer \377\376 name\n' >&2
        ;;
      silent)
        exec sleep 600
        ;;
    esac
    echo "fake geth running with genesis $genesis"
    echo "INFO Starting peer-to-peer node instance=Geth/$identity" >&2
    touch "$datadir/geth.ipc"
    echo "INFO IPC endpoint opened: $datadir/geth.ipc" >&2
    if [ -n "$rpc" ]; then
      echo "INFO HTTP endpoint opened: http://localhost:8545" >&2
    fi
    if [ "$identity" = "graceful" ]; then
      sleep 600 &
      sleeper=$!
      trap 'kill $sleeper; echo "INFO Got interrupt, shutting down..." >&2; exit 0' TERM
      wait $sleeper
      exit 0
    fi
    exec sleep 600
    ;;
esac
"#;

/// Temporary directory holding an executable copy of [`FAKE_GETH_SCRIPT`].
#[derive(Debug)]
pub struct FakeGeth {
    path: Utf8PathBuf,
    _dir: TempDir,
}

impl FakeGeth {
    /// Installs the script as `geth` inside a fresh temporary directory.
    ///
    /// # Panics
    ///
    /// Panics when the temporary directory or script cannot be created.
    #[must_use]
    pub fn install() -> Self {
        let dir = TempDir::new().unwrap_or_else(|err| panic!("create fake geth dir: {err}"));
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .unwrap_or_else(|path| panic!("fake geth dir is not UTF-8: {}", path.display()));
        let path = root.join("geth");
        write_executable(&path, FAKE_GETH_SCRIPT);
        Self { path, _dir: dir }
    }

    /// Path to the executable script.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// Counts lines equal to `mode` in the fake script's invocation log.
#[must_use]
pub fn fake_invocations(data_dir: &Utf8Path, mode: &str) -> usize {
    fs::read_to_string(data_dir.join("fake-geth.log"))
        .map(|log| log.lines().filter(|line| *line == mode).count())
        .unwrap_or(0)
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
