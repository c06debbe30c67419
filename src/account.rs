//! The single funded test account.

use std::fmt;

use regex::Regex;

use crate::error::GethError;

const ACCOUNT_PATTERN: &str = r"\{([0-9a-fA-F]+)\}";

/// Externally-owned address, stored as bare hex without the `0x` prefix.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Account(String);

impl Account {
    /// Extracts the first `{hex}` address printed by `geth account list`.
    ///
    /// # Errors
    ///
    /// Returns [`GethError::AccountParseFailed`] when no address is present.
    pub fn parse_listing(output: &str) -> Result<Self, GethError> {
        let pattern = Regex::new(ACCOUNT_PATTERN).map_err(|err| GethError::AccountParseFailed {
            output: err.to_string(),
        })?;

        pattern
            .captures(output)
            .and_then(|captures| captures.get(1))
            .map(|address| Self(address.as_str().to_ascii_lowercase()))
            .ok_or_else(|| GethError::AccountParseFailed {
                output: output.trim().to_owned(),
            })
    }

    /// Bare hex address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address with the `0x` prefix, as the console prints it.
    #[must_use]
    pub fn to_prefixed(&self) -> String {
        format!("0x{}", self.0)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
