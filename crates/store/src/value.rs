//! Typed arithmetic over raw store values.
//!
//! Numeric store values are kept as UTF-8 decimal strings so that snapshots
//! stay encoding-agnostic; the helpers here parse, combine and re-render them
//! according to the store's declared value type.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use sluice_primitives::ValueType;

use crate::errors::{StoreError, StoreResult};

fn invalid(value_type: ValueType, raw: &[u8]) -> StoreError {
    StoreError::InvalidValue {
        value_type,
        value: String::from_utf8_lossy(raw).into_owned(),
    }
}

fn parse_i64(raw: &[u8]) -> StoreResult<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| invalid(ValueType::Int64, raw))
}

fn parse_f64(raw: &[u8]) -> StoreResult<f64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .ok_or_else(|| invalid(ValueType::Float64, raw))
}

fn parse_bigint(raw: &[u8]) -> StoreResult<BigInt> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| BigInt::from_str(s.trim()).ok())
        .ok_or_else(|| invalid(ValueType::BigInt, raw))
}

fn parse_bigdecimal(raw: &[u8]) -> StoreResult<BigDecimal> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| BigDecimal::from_str(s.trim()).ok())
        .ok_or_else(|| invalid(ValueType::BigDecimal, raw))
}

/// Checks that `raw` is a well-formed value of the given type.
pub(crate) fn validate(value_type: ValueType, raw: &[u8]) -> StoreResult<()> {
    match value_type {
        ValueType::Bytes | ValueType::String => Ok(()),
        ValueType::Int64 => parse_i64(raw).map(|_| ()),
        ValueType::Float64 => parse_f64(raw).map(|_| ()),
        ValueType::BigInt => parse_bigint(raw).map(|_| ()),
        ValueType::BigDecimal => parse_bigdecimal(raw).map(|_| ()),
    }
}

/// `old + new` under the value type.  Wraps on int64 overflow.
pub(crate) fn add(value_type: ValueType, old: &[u8], new: &[u8]) -> StoreResult<Vec<u8>> {
    match value_type {
        ValueType::Int64 => {
            let sum = parse_i64(old)?.wrapping_add(parse_i64(new)?);
            Ok(sum.to_string().into_bytes())
        }
        ValueType::Float64 => {
            let sum = parse_f64(old)? + parse_f64(new)?;
            Ok(sum.to_string().into_bytes())
        }
        ValueType::BigInt => {
            let sum = parse_bigint(old)? + parse_bigint(new)?;
            Ok(sum.to_string().into_bytes())
        }
        ValueType::BigDecimal => {
            let sum = parse_bigdecimal(old)? + parse_bigdecimal(new)?;
            Ok(sum.to_string().into_bytes())
        }
        other => Err(StoreError::UnsupportedValueType {
            op: "add",
            value_type: other,
        }),
    }
}

/// The smaller of the two values under the value type, keeping the winner's
/// original encoding.
pub(crate) fn min_of(value_type: ValueType, old: &[u8], new: &[u8]) -> StoreResult<Vec<u8>> {
    pick(value_type, "min", old, new, true)
}

/// The larger of the two values under the value type.
pub(crate) fn max_of(value_type: ValueType, old: &[u8], new: &[u8]) -> StoreResult<Vec<u8>> {
    pick(value_type, "max", old, new, false)
}

fn pick(
    value_type: ValueType,
    op: &'static str,
    old: &[u8],
    new: &[u8],
    smaller: bool,
) -> StoreResult<Vec<u8>> {
    let new_wins = match value_type {
        ValueType::Int64 => (parse_i64(new)? < parse_i64(old)?) == smaller,
        ValueType::Float64 => (parse_f64(new)? < parse_f64(old)?) == smaller,
        ValueType::BigInt => (parse_bigint(new)? < parse_bigint(old)?) == smaller,
        ValueType::BigDecimal => (parse_bigdecimal(new)? < parse_bigdecimal(old)?) == smaller,
        other => {
            return Err(StoreError::UnsupportedValueType {
                op,
                value_type: other,
            })
        }
    };
    Ok(if new_wins { new.to_vec() } else { old.to_vec() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_int64() {
        assert_eq!(add(ValueType::Int64, b"40", b"2").unwrap(), b"42".to_vec());
        assert_eq!(add(ValueType::Int64, b"-5", b"3").unwrap(), b"-2".to_vec());
    }

    #[test]
    fn test_add_bigint_exceeds_i64() {
        let big = i64::MAX.to_string();
        let sum = add(ValueType::BigInt, big.as_bytes(), b"1").unwrap();
        assert_eq!(sum, b"9223372036854775808".to_vec());
    }

    #[test]
    fn test_add_bigdecimal() {
        let sum = add(ValueType::BigDecimal, b"1.5", b"2.25").unwrap();
        assert_eq!(sum, b"3.75".to_vec());
    }

    #[test]
    fn test_min_max() {
        assert_eq!(
            min_of(ValueType::Int64, b"10", b"3").unwrap(),
            b"3".to_vec()
        );
        assert_eq!(
            max_of(ValueType::Float64, b"1.5", b"-2").unwrap(),
            b"1.5".to_vec()
        );
        assert_eq!(
            min_of(ValueType::BigDecimal, b"2.50", b"2.5").unwrap(),
            // Equal values keep the existing encoding.
            b"2.50".to_vec()
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            add(ValueType::Int64, b"40", b"nope"),
            Err(StoreError::InvalidValue { .. })
        ));
        assert!(matches!(
            add(ValueType::Bytes, b"a", b"b"),
            Err(StoreError::UnsupportedValueType { .. })
        ));
        assert!(validate(ValueType::BigInt, b"123456789012345678901234567890").is_ok());
        assert!(validate(ValueType::Float64, b"1e309").is_ok());
    }
}
