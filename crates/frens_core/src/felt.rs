//! Fixed-width field element encoding.
//!
//! Every value crossing the decoding boundary is an unsigned integer of at
//! most 256 bits. It is stored as 32 big-endian bytes so that byte order and
//! numeric order agree, which keeps store keys and range comparisons simple.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Width in bytes of an encoded field element.
pub const FELT_BYTES: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Felt([u8; FELT_BYTES]);

#[derive(Debug, Error, PartialEq)]
pub enum FeltParseError {
    #[error("field element {0:?} is missing the 0x prefix")]
    MissingPrefix(String),
    #[error("field element has {0} hex digits, at most 64 are allowed")]
    TooWide(usize),
    #[error("invalid hex in field element: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

impl Felt {
    pub const ZERO: Felt = Felt([0; FELT_BYTES]);

    pub const fn from_be_bytes(bytes: [u8; FELT_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_be_bytes(&self) -> &[u8; FELT_BYTES] {
        &self.0
    }

    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; FELT_BYTES];
        bytes[FELT_BYTES - 8..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    pub fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; FELT_BYTES];
        bytes[FELT_BYTES - 16..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    /// Recombine the `low`/`high` halves of a `Uint256` struct.
    ///
    /// Returns `None` when either half does not fit in 128 bits.
    pub fn from_uint256(low: Felt, high: Felt) -> Option<Self> {
        let low = low.to_u128()?;
        let high = high.to_u128()?;
        let mut bytes = [0u8; FELT_BYTES];
        bytes[..16].copy_from_slice(&high.to_be_bytes());
        bytes[16..].copy_from_slice(&low.to_be_bytes());
        Some(Self(bytes))
    }

    /// Narrow to `u64`, or `None` if any of the upper 24 bytes is set.
    pub fn to_u64(&self) -> Option<u64> {
        if self.0[..FELT_BYTES - 8].iter().any(|b| *b != 0) {
            return None;
        }
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&self.0[FELT_BYTES - 8..]);
        Some(u64::from_be_bytes(tail))
    }

    pub fn to_u128(&self) -> Option<u128> {
        if self.0[..FELT_BYTES - 16].iter().any(|b| *b != 0) {
            return None;
        }
        let mut tail = [0u8; 16];
        tail.copy_from_slice(&self.0[FELT_BYTES - 16..]);
        Some(u128::from_be_bytes(tail))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl From<u64> for Felt {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl FromStr for Felt {
    type Err = FeltParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| FeltParseError::MissingPrefix(s.to_string()))?;
        if digits.len() > FELT_BYTES * 2 {
            return Err(FeltParseError::TooWide(digits.len()));
        }
        let padded = format!("{:0>width$}", digits, width = FELT_BYTES * 2);
        let mut bytes = [0u8; FELT_BYTES];
        hex::decode_to_slice(padded, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = hex::encode(self.0);
        let trimmed = encoded.trim_start_matches('0');
        if trimmed.is_empty() {
            write!(f, "Felt(0x0)")
        } else {
            write!(f, "Felt(0x{})", trimmed)
        }
    }
}

impl Serialize for Felt {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Felt {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FeltVisitor;

        impl<'de> Visitor<'de> for FeltVisitor {
            type Value = Felt;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 0x-prefixed hex string of at most 64 digits")
            }

            fn visit_str<E>(self, value: &str) -> Result<Felt, E>
            where
                E: de::Error,
            {
                value.parse().map_err(E::custom)
            }

            fn visit_u64<E>(self, value: u64) -> Result<Felt, E>
            where
                E: de::Error,
            {
                Ok(Felt::from_u64(value))
            }
        }

        deserializer.deserialize_any(FeltVisitor)
    }
}
