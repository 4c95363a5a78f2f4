pub mod params;
pub mod valuer;

use alloy::primitives::{hex, Address, I256, U256};
use error_stack::Report;
use num::{BigInt, Signed};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

use crate::errors::{PlaybookError, PlaybookResult};

/// Integer parameter type. `bits: None` is the untyped `int`/`uint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntType {
    pub signed: bool,
    pub bits: Option<u16>,
}

impl IntType {
    pub fn accepts(&self, value: &BigInt) -> bool {
        if !self.signed && value.is_negative() {
            return false;
        }
        let Some(bits) = self.bits else {
            return true;
        };
        let bits = bits as u64;
        if !self.signed {
            return value.bits() <= bits;
        }
        if value.is_negative() {
            let magnitude: BigInt = -value - 1;
            magnitude.bits() < bits
        } else {
            value.bits() < bits
        }
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.signed { "int" } else { "uint" };
        match self.bits {
            Some(bits) => write!(f, "{}{}", prefix, bits),
            None => write!(f, "{}", prefix),
        }
    }
}

/// Declared type of a command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Address,
    Byte,
    Bytes,
    Bool,
    Int(IntType),
}

impl Default for ParamType {
    fn default() -> Self {
        ParamType::String
    }
}

impl FromStr for ParamType {
    type Err = Report<PlaybookError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s {
            "" | "string" => ParamType::String,
            "address" => ParamType::Address,
            "byte" => ParamType::Byte,
            "bytes" => ParamType::Bytes,
            "bool" => ParamType::Bool,
            "int" => ParamType::Int(IntType { signed: true, bits: None }),
            "uint" => ParamType::Int(IntType { signed: false, bits: None }),
            other => {
                let (signed, width) = if let Some(width) = other.strip_prefix("uint") {
                    (false, width)
                } else if let Some(width) = other.strip_prefix("int") {
                    (true, width)
                } else {
                    return Err(crate::playbook_error!(
                        PlaybookError::Validation,
                        "unsupported param type '{}'",
                        other
                    ));
                };
                match width {
                    "8" | "16" | "32" | "64" | "128" | "256" => ParamType::Int(IntType {
                        signed,
                        bits: width.parse().ok(),
                    }),
                    _ => {
                        return Err(crate::playbook_error!(
                            PlaybookError::Validation,
                            "unsupported integer width in type '{}'",
                            other
                        ))
                    }
                }
            }
        };
        Ok(ty)
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::String => write!(f, "string"),
            ParamType::Address => write!(f, "address"),
            ParamType::Byte => write!(f, "byte"),
            ParamType::Bytes => write!(f, "bytes"),
            ParamType::Bool => write!(f, "bool"),
            ParamType::Int(int) => write!(f, "{}", int),
        }
    }
}

/// A concrete parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Address(Address),
    Byte(u8),
    Bytes(Vec<u8>),
    Bool(bool),
    Int { value: BigInt, ty: IntType },
}

impl Value {
    pub fn uint(value: impl Into<BigInt>) -> Value {
        Value::Int { value: value.into(), ty: IntType { signed: false, bits: Some(256) } }
    }

    /// Shape used for raw JSON-RPC parameters: integers are hex quantities,
    /// addresses lowercase hex and bytes 0x-prefixed hex.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Address(a) => JsonValue::String(format!("{:#x}", a)),
            Value::Byte(b) => JsonValue::String(format!("{:#x}", b)),
            Value::Bytes(bytes) => JsonValue::String(hex::encode_prefixed(bytes)),
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int { value, .. } => {
                if value.is_negative() {
                    JsonValue::String(format!("-{:#x}", -value))
                } else {
                    JsonValue::String(format!("{:#x}", value))
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Address(a) => write!(f, "{:#x}", a),
            Value::Byte(b) => write!(f, "{}", b),
            Value::Bytes(bytes) => write!(f, "{}", hex::encode_prefixed(bytes)),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int { value, .. } => write!(f, "{}", value),
        }
    }
}

pub fn bigint_to_u256(value: &BigInt) -> PlaybookResult<U256> {
    if value.is_negative() {
        return Err(crate::playbook_error!(
            PlaybookError::Resolution,
            "negative value {} cannot be used as an unsigned amount",
            value
        ));
    }
    let (_, bytes) = value.to_bytes_be();
    U256::try_from_be_slice(&bytes).ok_or_else(|| {
        crate::playbook_error!(PlaybookError::Resolution, "value {} exceeds 256 bits", value)
    })
}

pub fn bigint_to_i256(value: &BigInt) -> PlaybookResult<I256> {
    I256::from_dec_str(&value.to_string()).map_err(|e| {
        crate::playbook_error!(
            PlaybookError::Resolution,
            "value {} does not fit a signed 256-bit integer: {}",
            value,
            e
        )
    })
}

pub fn u256_to_bigint(value: &U256) -> BigInt {
    BigInt::from_bytes_be(num::bigint::Sign::Plus, &value.to_be_bytes::<32>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("uint8", 255, true)]
    #[test_case("uint8", 256, false)]
    #[test_case("uint8", -1, false)]
    #[test_case("int8", 127, true)]
    #[test_case("int8", 128, false)]
    #[test_case("int8", -128, true)]
    #[test_case("int8", -129, false)]
    #[test_case("uint16", 65535, true)]
    #[test_case("int32", -2147483648, true)]
    #[test_case("uint64", 18446744073709551615, true)]
    #[test_case("uint", -5, false)]
    #[test_case("int", -5, true)]
    fn test_int_width(ty: &str, value: i128, accepted: bool) {
        let ParamType::Int(int) = ty.parse::<ParamType>().unwrap() else {
            panic!("expected an integer type");
        };
        assert_eq!(int.accepts(&BigInt::from(value)), accepted);
    }

    #[test]
    fn test_unknown_types_rejected() {
        assert!("uint7".parse::<ParamType>().is_err());
        assert!("float".parse::<ParamType>().is_err());
        assert_eq!("".parse::<ParamType>().unwrap(), ParamType::String);
    }

    #[test]
    fn test_json_shapes() {
        assert_eq!(Value::uint(255).to_json(), serde_json::json!("0xff"));
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_json(), serde_json::json!("0xdead"));
        assert_eq!(Value::Bool(true).to_json(), serde_json::json!(true));
    }

    #[test]
    fn test_u256_conversion_bounds() {
        let max = (BigInt::from(1) << 256) - 1;
        assert_eq!(bigint_to_u256(&max).unwrap(), U256::MAX);
        assert!(bigint_to_u256(&(max + 1)).is_err());
        assert!(bigint_to_u256(&BigInt::from(-1)).is_err());
        assert_eq!(u256_to_bigint(&U256::from(42u8)), BigInt::from(42));
    }
}
