//! One-time chain provisioning for a working directory.
//!
//! The first start against a directory writes `genesis.json`, initialises the
//! chain from it, and creates exactly one account through a setup script.
//! Later starts find the genesis file and only read the account back, so the
//! same directory always yields the same account and an untouched genesis.

use std::ffi::OsString;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

use crate::account::Account;
use crate::error::{GethError, status_text};
use crate::flags::NodeFlags;
use crate::genesis::{GENESIS_FILE_NAME, GenesisOverrides, GenesisSpec};
use crate::logger::SharedLogger;
use crate::runner::{CommandOutput, CommandRunner, render_command_line};

/// File name of the account setup script inside the working directory.
pub const SETUP_SCRIPT_NAME: &str = "setup.js";

/// Console script that creates the single test account.
pub const SETUP_SCRIPT: &str = "personal.newAccount(\"\");\n";

/// Runs the provisioning sub-commands of the node binary.
#[derive(Clone, Debug)]
pub struct Provisioner<R: CommandRunner> {
    executable: Utf8PathBuf,
    flags: NodeFlags,
    runner: R,
    logger: SharedLogger,
}

impl<R: CommandRunner> Provisioner<R> {
    /// Creates a provisioner for `executable` launched with `flags`.
    #[must_use]
    pub const fn new(
        executable: Utf8PathBuf,
        flags: NodeFlags,
        runner: R,
        logger: SharedLogger,
    ) -> Self {
        Self {
            executable,
            flags,
            runner,
            logger,
        }
    }

    /// Ensures `data_dir` holds a genesis file and returns its account.
    ///
    /// # Errors
    ///
    /// Returns [`GethError::Io`] when the directory cannot be accessed,
    /// [`GethError::ProvisioningFailed`] when a sub-command exits
    /// unsuccessfully, or [`GethError::AccountParseFailed`] when the account
    /// listing holds no address.
    pub async fn ensure_genesis(
        &self,
        data_dir: &Utf8Path,
        overrides: &GenesisOverrides,
    ) -> Result<Account, GethError> {
        if genesis_exists(data_dir)? {
            self.logger.info(&format!("reusing genesis in {data_dir}"));
            return self.load_account(data_dir).await;
        }

        let document = GenesisSpec::default().render(overrides)?;
        write_provisioning_files(data_dir, &document)?;
        self.logger.info(&format!("wrote {}", genesis_path(data_dir)));

        self.init_chain(data_dir).await?;
        self.create_account(data_dir).await?;
        self.load_account(data_dir).await
    }

    /// Reads the account address back from the keystore.
    ///
    /// # Errors
    ///
    /// Returns [`GethError::ProvisioningFailed`] when the listing fails, or
    /// [`GethError::AccountParseFailed`] when it holds no address.
    pub async fn load_account(&self, data_dir: &Utf8Path) -> Result<Account, GethError> {
        let args = vec![
            OsString::from("--datadir"),
            data_dir.as_os_str().to_owned(),
            OsString::from("account"),
            OsString::from("list"),
        ];
        let output = self.run_step("account list", &args).await?;
        let account = Account::parse_listing(&output.stdout)?;
        self.logger.info(&format!("using account {account}"));
        Ok(account)
    }

    async fn init_chain(&self, data_dir: &Utf8Path) -> Result<(), GethError> {
        let args = vec![
            OsString::from("--datadir"),
            data_dir.as_os_str().to_owned(),
            OsString::from("init"),
            OsString::from(genesis_path(data_dir)),
        ];
        self.run_step("init", &args).await.map(|_| ())
    }

    async fn create_account(&self, data_dir: &Utf8Path) -> Result<(), GethError> {
        let mut args = self.flags.to_args();
        args.extend([
            OsString::from("--datadir"),
            data_dir.as_os_str().to_owned(),
            OsString::from("js"),
            OsString::from(data_dir.join(SETUP_SCRIPT_NAME)),
        ]);
        self.run_step("setup", &args).await.map(|_| ())
    }

    async fn run_step(&self, step: &str, args: &[OsString]) -> Result<CommandOutput, GethError> {
        self.logger.debug(&render_command_line(&self.executable, args));
        let output = self.runner.run(&self.executable, args).await?;
        if output.is_success() {
            return Ok(output);
        }

        Err(GethError::ProvisioningFailed {
            step: step.to_owned(),
            status_text: status_text(output.code),
            stderr: output.stderr,
        })
    }
}

/// Path of the genesis document inside `data_dir`.
#[must_use]
pub fn genesis_path(data_dir: &Utf8Path) -> Utf8PathBuf {
    data_dir.join(GENESIS_FILE_NAME)
}

fn open_dir(data_dir: &Utf8Path) -> Result<Dir, GethError> {
    Dir::open_ambient_dir(data_dir, ambient_authority()).map_err(|err| GethError::io(data_dir, &err))
}

fn genesis_exists(data_dir: &Utf8Path) -> Result<bool, GethError> {
    open_dir(data_dir)?
        .try_exists(GENESIS_FILE_NAME)
        .map_err(|err| GethError::io(genesis_path(data_dir), &err))
}

fn write_provisioning_files(data_dir: &Utf8Path, document: &str) -> Result<(), GethError> {
    let dir = open_dir(data_dir)?;
    write_file(&dir, data_dir, GENESIS_FILE_NAME, document)?;
    write_file(&dir, data_dir, SETUP_SCRIPT_NAME, SETUP_SCRIPT)
}

fn write_file(dir: &Dir, data_dir: &Utf8Path, name: &str, contents: &str) -> Result<(), GethError> {
    dir.write(name, contents)
        .map_err(|err: io::Error| GethError::io(data_dir.join(name), &err))
}
