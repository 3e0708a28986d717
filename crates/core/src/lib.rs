//! Shared building blocks for the converge crates.
//!
//! - [`Error`] / [`Result`]: errors for configuration and file handling
//! - [`config`]: TOML loading for serde-backed settings structs

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod config;
pub mod error;
pub mod result;

pub use config::{load_toml, parse_toml};
pub use error::Error;
pub use result::Result;
