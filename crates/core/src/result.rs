//! Result type definition for converge operations.

use crate::error::Error;

/// The standard Result type for converge-core operations.
///
/// Use the `?` operator, `match`, or combinator methods to handle results.
///
/// # Examples
///
/// ```ignore
/// fn interval() -> Result<u64> {
///     let settings: Settings = converge_core::load_toml("converge.toml")?;
///     Ok(settings.interval_ms)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;
