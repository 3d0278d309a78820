//! Decoded field values.
//!
//! ABI values are normalized into one small enum so business handlers never
//! depend on the decoder's own value types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A decoded, normalized event field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum NormalizedValue {
    Uint(u128),
    /// Unsigned values wider than u128, as a decimal string.
    BigUint(String),
    Int(i128),
    /// Signed values wider than i128, as a decimal string.
    BigInt(String),
    Bool(bool),
    Bytes(Vec<u8>),
    Str(String),
    /// 0x-prefixed EIP-55 address.
    Address(String),
    Array(Vec<NormalizedValue>),
    Tuple(Vec<(String, NormalizedValue)>),
    Null,
}

impl NormalizedValue {
    pub fn as_u128(&self) -> Option<u128> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&str> {
        match self {
            Self::Address(s) => Some(s),
            _ => None,
        }
    }

    /// Decimal string form for any integer variant.
    pub fn as_decimal(&self) -> Option<String> {
        match self {
            Self::Uint(v) => Some(v.to_string()),
            Self::Int(v) => Some(v.to_string()),
            Self::BigUint(s) | Self::BigInt(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for NormalizedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uint(v) => write!(f, "{v}"),
            Self::BigUint(s) | Self::BigInt(s) => write!(f, "{s}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            Self::Str(s) => write!(f, "{s}"),
            Self::Address(a) => write!(f, "{a}"),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Tuple(fields) => {
                write!(f, "(")?;
                for (i, (name, val)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {val}")?;
                }
                write!(f, ")")
            }
            Self::Null => write!(f, "null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        assert_eq!(NormalizedValue::Uint(42).to_string(), "42");
        assert_eq!(NormalizedValue::Bytes(vec![0xde, 0xad]).to_string(), "0xdead");
        let arr = NormalizedValue::Array(vec![NormalizedValue::Bool(true), NormalizedValue::Null]);
        assert_eq!(arr.to_string(), "[true, null]");
    }

    #[test]
    fn decimal_accessor() {
        assert_eq!(NormalizedValue::Int(-7).as_decimal().as_deref(), Some("-7"));
        assert_eq!(
            NormalizedValue::BigUint("340282366920938463463374607431768211456".into())
                .as_decimal()
                .as_deref(),
            Some("340282366920938463463374607431768211456")
        );
        assert!(NormalizedValue::Bool(false).as_decimal().is_none());
    }
}
