//! TOML configuration loading.
//!
//! Settings structs elsewhere in the workspace derive `Deserialize` with
//! `#[serde(default)]`, so a file only needs the keys it overrides.

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::Error;
use crate::result::Result;

/// Parse a settings struct from TOML text.
///
/// # Errors
///
/// Returns [`Error::TomlParseFailed`] if the text is not valid TOML or does not
/// match the shape of `T`.
pub fn parse_toml<T: DeserializeOwned>(text: &str) -> Result<T> {
    toml::from_str(text).map_err(|e| Error::toml_parse_failed(e.to_string()))
}

/// Read and parse a settings struct from a TOML file.
///
/// # Errors
///
/// Returns [`Error::FileReadFailed`] if the file cannot be read, or
/// [`Error::TomlParseFailed`] if its contents do not parse.
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    debug!(path = %path.display(), "Loading configuration");

    let text =
        std::fs::read_to_string(path).map_err(|e| Error::file_read_failed(path, e.to_string()))?;

    parse_toml(&text)
}
