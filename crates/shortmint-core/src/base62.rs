use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt::Display;

/// Digits, then lowercase, then uppercase.
pub const ALPHABET: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

const BASE: u64 = ALPHABET.len() as u64;

/// Encodes `n` with the base-62 [`ALPHABET`].
///
/// Digits are emitted least-significant first and the output is **not**
/// reversed: `encode(62)` is `"01"`. Codes already handed out depend on this
/// exact order, so it must never change.
///
/// # Examples
///
/// ```
/// use shortmint_core::base62::encode;
///
/// assert_eq!(encode(0), "0");
/// assert_eq!(encode(61), "Z");
/// assert_eq!(encode(62), "01");
/// ```
pub fn encode(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }

    // u64::MAX needs 11 base-62 digits
    let mut out = String::with_capacity(11);
    while n > 0 {
        out.push(ALPHABET[(n % BASE) as usize] as char);
        n /= BASE;
    }
    out
}

fn is_base62(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// A short code encoded as a base-62 string.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ShortCodeBase62(SmolStr);

impl ShortCodeBase62 {
    /// Encodes an allocated token as a short code.
    pub fn encode(n: u64) -> Self {
        Self(SmolStr::new(encode(n)))
    }

    /// Wraps an already encoded string, rejecting characters outside the alphabet.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if !is_base62(s) {
            return Err(CoreError::InvalidShortCode(format!(
                "not a base62 string: '{s}'"
            )));
        }
        Ok(Self(SmolStr::new(s)))
    }

    /// Returns the short code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ShortCodeBase62 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ShortCodeBase62").field(&self.0).finish()
    }
}

impl Display for ShortCodeBase62 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ShortCodeBase62 {
    fn from(n: u64) -> Self {
        Self::encode(n)
    }
}

impl Serialize for ShortCodeBase62 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ShortCodeBase62 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = SmolStr::deserialize(deserializer)?;
        if !is_base62(&s) {
            return Err(serde::de::Error::custom(format!(
                "invalid base62 short code: '{s}'"
            )));
        }
        Ok(Self(s))
    }
}
