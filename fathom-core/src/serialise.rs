//! Canonical byte serialisation per field type.
//!
//! Every ordered type serialises to a byte string whose lexicographic
//! order matches the value order, so value slots can answer range
//! queries with plain byte comparisons. `unserialise` is the exact
//! inverse; `guess_serialise` classifies untyped string values.

use crate::datetime::{self, Tm};
use crate::error::{Error, Result};
use crate::htm;
use crate::types::FieldType;
use crate::value::Value;
use uuid::Uuid;

const SIGN_BIT: u64 = 1 << 63;

/// Serialise an i64 preserving order: flip the sign bit, big-endian.
pub fn integer(value: i64) -> Vec<u8> {
    ((value as u64) ^ SIGN_BIT).to_be_bytes().to_vec()
}

/// Inverse of [`integer`]
pub fn unserialise_integer(bytes: &[u8]) -> Result<i64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::corruption("integer slot is not 8 bytes"))?;
    Ok((u64::from_be_bytes(raw) ^ SIGN_BIT) as i64)
}

/// Serialise a u64 big-endian.
pub fn positive(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Inverse of [`positive`]
pub fn unserialise_positive(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::corruption("positive slot is not 8 bytes"))?;
    Ok(u64::from_be_bytes(raw))
}

/// Serialise an f64 with the IEEE-754 total-order transform.
pub fn floating(value: f64) -> Vec<u8> {
    let bits = value.to_bits();
    let ordered = if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits ^ SIGN_BIT
    };
    ordered.to_be_bytes().to_vec()
}

/// Inverse of [`floating`]
pub fn unserialise_floating(bytes: &[u8]) -> Result<f64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::corruption("floating slot is not 8 bytes"))?;
    let ordered = u64::from_be_bytes(raw);
    let bits = if ordered & SIGN_BIT != 0 {
        ordered ^ SIGN_BIT
    } else {
        !ordered
    };
    Ok(f64::from_bits(bits))
}

/// Serialise an epoch timestamp (same transform as [`floating`]).
pub fn timestamp(ts: f64) -> Vec<u8> {
    floating(ts)
}

/// Serialise a boolean as a single byte.
pub fn boolean(value: bool) -> Vec<u8> {
    vec![if value { b't' } else { b'f' }]
}

/// Inverse of [`boolean`]
pub fn unserialise_boolean(bytes: &[u8]) -> Result<bool> {
    match bytes {
        [b't'] => Ok(true),
        [b'f'] => Ok(false),
        _ => Err(Error::corruption("boolean slot is not t/f")),
    }
}

/// Serialise a UUID as its 16 raw bytes.
pub fn uuid(value: &Uuid) -> Vec<u8> {
    value.as_bytes().to_vec()
}

/// Inverse of [`uuid`]
pub fn unserialise_uuid(bytes: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(bytes).map_err(|_| Error::corruption("uuid slot is not 16 bytes"))
}

/// Serialise a set of HTM ranges: sorted `(start, end)` u64 pairs.
pub fn ranges(ranges: &[htm::HtmRange]) -> Vec<u8> {
    let mut sorted: Vec<_> = ranges.to_vec();
    sorted.sort();
    let mut out = Vec::with_capacity(sorted.len() * 16);
    for r in &sorted {
        out.extend_from_slice(&r.start.to_be_bytes());
        out.extend_from_slice(&r.end.to_be_bytes());
    }
    out
}

/// Inverse of [`ranges`]
pub fn unserialise_ranges(bytes: &[u8]) -> Result<Vec<htm::HtmRange>> {
    if bytes.len() % 16 != 0 {
        return Err(Error::corruption("geo slot is not a range list"));
    }
    Ok(bytes
        .chunks_exact(16)
        .map(|c| htm::HtmRange {
            start: u64::from_be_bytes(c[..8].try_into().unwrap()),
            end: u64::from_be_bytes(c[8..].try_into().unwrap()),
        })
        .collect())
}

fn ser_err(reason: impl Into<String>) -> Error {
    Error::Serialisation {
        field: String::new(),
        reason: reason.into(),
    }
}

fn coerce_bool(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Str(s) => match s.as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(ser_err(format!("{:?} is not a boolean", s))),
        },
        other => Err(ser_err(format!("{} is not a boolean", other))),
    }
}

fn coerce_i64(value: &Value) -> Result<i64> {
    match value {
        Value::Int(v) => Ok(*v),
        Value::UInt(v) => i64::try_from(*v).map_err(|_| ser_err(format!("{} overflows i64", v))),
        Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
        Value::Str(s) => s
            .parse()
            .map_err(|_| ser_err(format!("{:?} is not an integer", s))),
        other => Err(ser_err(format!("{} is not an integer", other))),
    }
}

fn coerce_u64(value: &Value) -> Result<u64> {
    match value {
        Value::UInt(v) => Ok(*v),
        Value::Int(v) => {
            u64::try_from(*v).map_err(|_| ser_err(format!("{} is not a positive integer", v)))
        }
        Value::Float(f) if f.fract() == 0.0 && *f >= 0.0 => Ok(*f as u64),
        Value::Str(s) => s
            .parse()
            .map_err(|_| ser_err(format!("{:?} is not a positive integer", s))),
        other => Err(ser_err(format!("{} is not a positive integer", other))),
    }
}

fn coerce_f64(value: &Value) -> Result<f64> {
    match value {
        Value::Int(v) => Ok(*v as f64),
        Value::UInt(v) => Ok(*v as f64),
        Value::Float(f) => Ok(*f),
        Value::Str(s) => s
            .parse()
            .map_err(|_| ser_err(format!("{:?} is not a number", s))),
        other => Err(ser_err(format!("{} is not a number", other))),
    }
}

/// Coerce a value into an epoch timestamp per date/datetime semantics.
pub fn coerce_timestamp(value: &Value) -> Result<f64> {
    match value {
        Value::Str(s) => Ok(datetime::parse_datetime(s)
            .map_err(|e| ser_err(e.to_string()))?
            .timestamp()),
        Value::Int(v) => Ok(*v as f64),
        Value::UInt(v) => Ok(*v as f64),
        Value::Float(f) => Ok(*f),
        other => Err(ser_err(format!("{} is not a datetime", other))),
    }
}

fn coerce_time(value: &Value) -> Result<f64> {
    match value {
        Value::Str(s) => datetime::parse_time(s).map_err(|e| ser_err(e.to_string())),
        other => coerce_f64(other),
    }
}

fn coerce_timedelta(value: &Value) -> Result<f64> {
    match value {
        Value::Str(s) => datetime::parse_timedelta(s).map_err(|e| ser_err(e.to_string())),
        other => coerce_f64(other),
    }
}

fn coerce_string(value: &Value) -> Result<String> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(v) => Ok(v.to_string()),
        Value::UInt(v) => Ok(v.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(ser_err(format!("{} is not a string", other))),
    }
}

/// Coerce a geo value into its HTM range cover.
///
/// Accepts EWKT strings; the full geometry library is an external
/// collaborator, so only `POINT(lng lat)` covers are computed here.
pub fn coerce_ranges(value: &Value) -> Result<Vec<htm::HtmRange>> {
    match value {
        Value::Str(s) => htm::ewkt_ranges(s).map_err(|e| ser_err(e.to_string())),
        other => Err(ser_err(format!("{} is not a geometry", other))),
    }
}

/// Serialise a value under a declared concrete type.
pub fn serialise(field_type: FieldType, value: &Value) -> Result<Vec<u8>> {
    match field_type {
        FieldType::Boolean => Ok(boolean(coerce_bool(value)?)),
        FieldType::Integer => Ok(integer(coerce_i64(value)?)),
        FieldType::Positive => Ok(positive(coerce_u64(value)?)),
        FieldType::Floating => Ok(floating(coerce_f64(value)?)),
        FieldType::Date | FieldType::Datetime => Ok(timestamp(coerce_timestamp(value)?)),
        FieldType::Time => Ok(floating(coerce_time(value)?)),
        FieldType::Timedelta => Ok(floating(coerce_timedelta(value)?)),
        FieldType::Keyword | FieldType::Text | FieldType::String => {
            Ok(coerce_string(value)?.into_bytes())
        }
        FieldType::Uuid => {
            let s = value
                .as_str()
                .ok_or_else(|| ser_err(format!("{} is not a uuid", value)))?;
            let parsed =
                Uuid::parse_str(s).map_err(|_| ser_err(format!("{:?} is not a uuid", s)))?;
            Ok(uuid(&parsed))
        }
        FieldType::Geo => Ok(ranges(&coerce_ranges(value)?)),
        other => Err(ser_err(format!(
            "type {} has no serialised form",
            other.as_str()
        ))),
    }
}

/// Inverse of [`serialise`]: recover a canonical value from slot bytes.
pub fn unserialise(field_type: FieldType, bytes: &[u8]) -> Result<Value> {
    Ok(match field_type {
        FieldType::Boolean => Value::Bool(unserialise_boolean(bytes)?),
        FieldType::Integer => Value::Int(unserialise_integer(bytes)?),
        FieldType::Positive => Value::UInt(unserialise_positive(bytes)?),
        FieldType::Floating | FieldType::Time | FieldType::Timedelta => {
            Value::Float(unserialise_floating(bytes)?)
        }
        FieldType::Date | FieldType::Datetime => {
            let ts = unserialise_floating(bytes)?;
            Value::Str(Tm::from_timestamp(ts).to_iso())
        }
        FieldType::Keyword | FieldType::Text | FieldType::String => Value::Str(
            String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::corruption("string slot is not UTF-8"))?,
        ),
        FieldType::Uuid => Value::Str(unserialise_uuid(bytes)?.to_string()),
        FieldType::Geo => Value::Array(
            unserialise_ranges(bytes)?
                .into_iter()
                .map(|r| Value::Array(vec![Value::UInt(r.start), Value::UInt(r.end)]))
                .collect(),
        ),
        other => {
            return Err(Error::corruption(format!(
                "type {} has no serialised form",
                other.as_str()
            )))
        }
    })
}

/// Cheap syntactic check steering the dynamic-field resolver before a
/// full UUID parse: canonical 8-4-4-4-12 dashed form.
pub fn possibly_uuid(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() != 36 {
        return false;
    }
    for (i, &c) in b.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if c != b'-' {
                    return false;
                }
            }
            _ => {
                if !c.is_ascii_hexdigit() {
                    return false;
                }
            }
        }
    }
    true
}

const EWKT_PREFIXES: [&str; 8] = [
    "POINT", "CIRCLE", "POLYGON", "CHULL", "MULTIPOINT", "MULTICIRCLE", "MULTIPOLYGON", "SRID=",
];

/// Whether the string looks like an EWKT geometry literal
pub fn possibly_ewkt(s: &str) -> bool {
    EWKT_PREFIXES.iter().any(|p| s.starts_with(p))
}

/// Classify an untyped string value and serialise it.
///
/// Tried in order: UUID, datetime/date, time, timedelta, EWKT, boolean
/// spellings; everything else is text.
pub fn guess_serialise(s: &str) -> (FieldType, Vec<u8>) {
    if possibly_uuid(s) {
        if let Ok(parsed) = Uuid::parse_str(s) {
            return (FieldType::Uuid, uuid(&parsed));
        }
    }
    if s.len() >= 10 && s.as_bytes()[4] == b'-' {
        if let Ok(tm) = datetime::parse_datetime(s) {
            let has_time = s.len() > 10;
            let t = if has_time {
                FieldType::Datetime
            } else {
                FieldType::Date
            };
            return (t, timestamp(tm.timestamp()));
        }
    }
    if s.contains(':') {
        if let Ok(secs) = datetime::parse_time(s) {
            return (FieldType::Time, floating(secs));
        }
        if let Ok(secs) = datetime::parse_timedelta(s) {
            return (FieldType::Timedelta, floating(secs));
        }
    }
    if possibly_ewkt(s) {
        if let Ok(rs) = htm::ewkt_ranges(s) {
            return (FieldType::Geo, ranges(&rs));
        }
    }
    match s {
        "true" | "false" | "t" | "f" => {
            return (FieldType::Boolean, boolean(s == "true" || s == "t"));
        }
        _ => {}
    }
    (FieldType::Text, s.as_bytes().to_vec())
}

/// Guess the concrete type of an arbitrary value (used by dynamic
/// schema creation when no `_type` is declared).
pub fn guess_type(value: &Value) -> FieldType {
    match value {
        Value::Nil => FieldType::Empty,
        Value::Bool(_) => FieldType::Boolean,
        Value::Int(v) => {
            if *v < 0 {
                FieldType::Integer
            } else {
                FieldType::Positive
            }
        }
        Value::UInt(_) => FieldType::Positive,
        Value::Float(_) => FieldType::Floating,
        Value::Str(s) => guess_serialise(s).0,
        Value::Bytes(_) => FieldType::String,
        Value::Array(_) => FieldType::Array,
        Value::Map(_) => FieldType::Object,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_order_and_round_trip() {
        let cases = [i64::MIN, -1000, -1, 0, 1, 37, i64::MAX];
        let mut prev: Option<Vec<u8>> = None;
        for v in cases {
            let ser = integer(v);
            assert_eq!(unserialise_integer(&ser).unwrap(), v);
            if let Some(p) = &prev {
                assert!(*p < ser, "ordering broken at {}", v);
            }
            prev = Some(ser);
        }
    }

    #[test]
    fn test_floating_order_and_round_trip() {
        let cases = [f64::NEG_INFINITY, -1.5, -0.0, 0.0, 0.25, 3.13, 1e300];
        let mut prev: Option<(f64, Vec<u8>)> = None;
        for v in cases {
            let ser = floating(v);
            assert_eq!(unserialise_floating(&ser).unwrap(), v);
            if let Some((pv, p)) = &prev {
                if pv < &v {
                    assert!(*p < ser, "ordering broken at {}", v);
                }
            }
            prev = Some((v, ser));
        }
    }

    #[test]
    fn test_serialise_round_trip_per_type() {
        let cases: Vec<(FieldType, Value)> = vec![
            (FieldType::Boolean, Value::Bool(true)),
            (FieldType::Integer, Value::Int(-42)),
            (FieldType::Positive, Value::UInt(37)),
            (FieldType::Floating, Value::Float(2.5)),
            (FieldType::Keyword, Value::Str("rust".into())),
            (
                FieldType::Uuid,
                Value::Str("550e8400-e29b-41d4-a716-446655440000".into()),
            ),
        ];
        for (t, v) in cases {
            let ser = serialise(t, &v).unwrap();
            assert_eq!(unserialise(t, &ser).unwrap(), v, "round trip for {}", t);
        }
    }

    #[test]
    fn test_datetime_canonicalises() {
        let ser = serialise(FieldType::Datetime, &Value::Str("2015-06-07T08:09:10Z".into()))
            .unwrap();
        let back = unserialise(FieldType::Datetime, &ser).unwrap();
        assert_eq!(back, Value::Str("2015-06-07T08:09:10".into()));
    }

    #[test]
    fn test_possibly_uuid() {
        assert!(possibly_uuid("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!possibly_uuid("550e8400-e29b-41d4-a716-44665544000"));
        assert!(!possibly_uuid("not-a-uuid-at-all-not-a-uuid-at-all!"));
    }

    #[test]
    fn test_guess_serialise() {
        assert_eq!(
            guess_serialise("550e8400-e29b-41d4-a716-446655440000").0,
            FieldType::Uuid
        );
        assert_eq!(guess_serialise("2015-06-07T08:09:10Z").0, FieldType::Datetime);
        assert_eq!(guess_serialise("2015-06-07").0, FieldType::Date);
        assert_eq!(guess_serialise("12:30:00").0, FieldType::Time);
        assert_eq!(guess_serialise("+01:30:00").0, FieldType::Timedelta);
        assert_eq!(guess_serialise("POINT(2.35 48.85)").0, FieldType::Geo);
        assert_eq!(guess_serialise("true").0, FieldType::Boolean);
        assert_eq!(guess_serialise("ana").0, FieldType::Text);
        assert_eq!(guess_serialise("ana maria").0, FieldType::Text);
    }

    #[test]
    fn test_guess_type_numbers() {
        assert_eq!(guess_type(&Value::UInt(37)), FieldType::Positive);
        assert_eq!(guess_type(&Value::Int(-2)), FieldType::Integer);
        assert_eq!(guess_type(&Value::Float(3.13)), FieldType::Floating);
    }
}
