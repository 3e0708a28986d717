//! Binary encoding of map keys and values.
//!
//! Integers are fixed-width big-endian, so a struct of `u32` fields encodes to
//! the same bytes a C struct of `__be32` fields would.

use bincode::config::{BigEndian, Configuration, Fixint};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{MapError, Result};

const CONFIG: Configuration<BigEndian, Fixint> = bincode::config::standard()
    .with_big_endian()
    .with_fixed_int_encoding();

/// Objects stored in a map as one key/value pair.
pub trait BinaryKeyValue {
    type Key: Serialize;
    type Value: Serialize;

    fn binary_key(&self) -> &Self::Key;
    fn binary_value(&self) -> &Self::Value;
}

/// Encode `value` to map bytes.
///
/// # Errors
///
/// Returns [`MapError::Encode`] if serde rejects the value.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, CONFIG).map_err(|e| MapError::Encode {
        reason: e.to_string(),
    })
}

/// Decode map bytes. Trailing bytes are an error.
///
/// # Errors
///
/// Returns [`MapError::Decode`] if the bytes do not hold exactly one `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, read) = bincode::serde::decode_from_slice(bytes, CONFIG).map_err(|e| {
        MapError::Decode {
            reason: e.to_string(),
        }
    })?;
    if read != bytes.len() {
        return Err(MapError::Decode {
            reason: format!("{} trailing bytes", bytes.len().saturating_sub(read)),
        });
    }
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct Pair {
        a: u32,
        b: u16,
    }

    #[test]
    fn test_fixed_width_big_endian() {
        let bytes = encode(&Pair { a: 1, b: 2 }).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 1, 0, 2]);
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let result = decode::<u16>(&[0, 1, 2]);
        assert!(matches!(result, Err(MapError::Decode { .. })));
    }

    #[test]
    fn test_decode_short_input() {
        assert!(decode::<u32>(&[0, 1]).is_err());
    }
}
