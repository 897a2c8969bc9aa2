//! Lenient deserialization for numeric settings.
//!
//! Values may be written as integers or as strings, either decimal or
//! `0x`-prefixed hex (handy for network magics).

use serde::de::Error;
use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum IntOrString {
    Int(i64),
    Str(String),
}

/// Parse a decimal or `0x` hex string
pub fn parse_u64(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    let value = match IntOrString::deserialize(deserializer)? {
        IntOrString::Int(n) => {
            u64::try_from(n).map_err(|_| D::Error::custom(format!("expected a non-negative number, got {}", n)))?
        }
        IntOrString::Str(s) => {
            parse_u64(&s).ok_or_else(|| D::Error::custom(format!("expected a number, got {:?}", s)))?
        }
    };

    T::try_from(value).map_err(|_| D::Error::custom(format!("{} is out of range", value)))
}
