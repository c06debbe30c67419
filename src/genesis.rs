//! Genesis document construction.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::GethError;

/// File name of the genesis document inside the working directory.
pub const GENESIS_FILE_NAME: &str = "genesis.json";

const ZERO_HASH: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

/// Default genesis block parameters for a private development chain.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisSpec {
    /// Block nonce.
    pub nonce: String,
    /// Block timestamp.
    pub timestamp: String,
    /// Parent block hash.
    pub parent_hash: String,
    /// Arbitrary extra data.
    pub extra_data: String,
    /// Block gas limit.
    pub gas_limit: String,
    /// Mining difficulty; kept low so a laptop mines quickly.
    pub difficulty: String,
    /// Mix hash.
    #[serde(rename = "mixhash")]
    pub mix_hash: String,
    /// Coinbase address.
    pub coinbase: String,
    /// Pre-funded balances keyed by address.
    pub alloc: Map<String, Value>,
}

impl Default for GenesisSpec {
    fn default() -> Self {
        Self {
            nonce: String::from("0xdeadbeefdeadbeef"),
            timestamp: String::from("0x0"),
            parent_hash: String::from(ZERO_HASH),
            extra_data: String::from("0x0"),
            gas_limit: String::from("0x8000000"),
            difficulty: String::from("0xf0000"),
            mix_hash: String::from(ZERO_HASH),
            coinbase: String::from("0x3333333333333333333333333333333333333333"),
            alloc: Map::new(),
        }
    }
}

/// Caller supplied genesis fields merged shallowly over [`GenesisSpec`].
///
/// Keys use the on-disk names (`difficulty`, `extraData`, `mixhash`, ...).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GenesisOverrides(Map<String, Value>);

impl GenesisOverrides {
    /// Creates an empty override set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a top-level genesis field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns `true` when no field is overridden.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for GenesisOverrides {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

impl GenesisSpec {
    /// Builds the pretty-printed document with `overrides` applied on top.
    ///
    /// # Errors
    ///
    /// Returns [`GethError::Genesis`] when serialisation fails.
    pub fn render(&self, overrides: &GenesisOverrides) -> Result<String, GethError> {
        let mut document = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(GethError::Genesis(format!(
                    "expected an object, got {other}"
                )));
            }
            Err(err) => return Err(GethError::Genesis(err.to_string())),
        };

        for (key, value) in &overrides.0 {
            document.insert(key.clone(), value.clone());
        }

        serde_json::to_string_pretty(&Value::Object(document))
            .map_err(|err| GethError::Genesis(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parsed(rendered: &str) -> Map<String, Value> {
        match serde_json::from_str(rendered).expect("genesis should be valid json") {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[rstest]
    fn default_document_uses_on_disk_field_names() {
        let rendered = GenesisSpec::default()
            .render(&GenesisOverrides::new())
            .expect("render");
        let doc = parsed(&rendered);

        assert_eq!(doc.get("nonce"), Some(&Value::from("0xdeadbeefdeadbeef")));
        assert_eq!(doc.get("parentHash"), Some(&Value::from(ZERO_HASH)));
        assert_eq!(doc.get("mixhash"), Some(&Value::from(ZERO_HASH)));
        assert_eq!(doc.get("gasLimit"), Some(&Value::from("0x8000000")));
        assert_eq!(doc.get("difficulty"), Some(&Value::from("0xf0000")));
        assert_eq!(doc.get("extraData"), Some(&Value::from("0x0")));
        assert_eq!(doc.get("alloc"), Some(&Value::Object(Map::new())));
    }

    #[rstest]
    fn overrides_replace_only_named_fields() {
        let overrides = GenesisOverrides::new()
            .with("difficulty", "0x400")
            .with("extraData", "0x1");
        let doc = parsed(
            &GenesisSpec::default()
                .render(&overrides)
                .expect("render"),
        );

        assert_eq!(doc.get("difficulty"), Some(&Value::from("0x400")));
        assert_eq!(doc.get("extraData"), Some(&Value::from("0x1")));
        assert_eq!(
            doc.get("coinbase"),
            Some(&Value::from("0x3333333333333333333333333333333333333333"))
        );
    }
}
