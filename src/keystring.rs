//! KeyString: a byte-comparable encoding of BSON values such that
//! lexicographic byte order over the encoded form matches MongoDB's
//! canonical BSON type/value ordering (spec.md §4.8). Used as the B+Tree
//! key for every index, and (post Open Question (2), see DESIGN.md) as the
//! dedup key for `distinct`.
//!
//! Grounded on the teacher's `query.rs` comparison helpers for the overall
//! type-ordering idea, generalized here into a standalone byte encoder
//! since the teacher compared `bson::Bson` values directly rather than
//! encoding them; the split between "comparison order" (this module) and
//! "filter semantics" (`query::filter`) follows spec.md §9's note that
//! `compareKeys`/`compareBSONValues` must never be cross-applied.

use bson::Bson;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyStringError {
    #[error("cannot encode BSON type {0} into a KeyString")]
    Unsupported(&'static str),
}

mod tag {
    pub const MIN_KEY: u8 = 0x00;
    pub const NULL: u8 = 0x05;
    pub const NUMBER: u8 = 0x10;
    pub const BIG_INT: u8 = 0x11;
    pub const STRING: u8 = 0x14;
    pub const OBJECT: u8 = 0x18;
    pub const ARRAY: u8 = 0x1C;
    pub const BIN_DATA: u8 = 0x20;
    pub const OBJECT_ID: u8 = 0x24;
    pub const BOOL: u8 = 0x28;
    pub const DATE: u8 = 0x2C;
    pub const TIMESTAMP: u8 = 0x30;
    pub const REGEX: u8 = 0x34;
    pub const MAX_KEY: u8 = 0xFF;
}

const FIELD_TERMINATOR: u8 = 0x04;
const STRING_ESCAPED_ZERO: [u8; 2] = [0x00, 0xFF];
const STRING_ESCAPED_FF: [u8; 2] = [0xFF, 0x00];
const STRING_TERMINATOR: [u8; 2] = [0x00, 0x00];

/// Appends the type tag + payload for `value` to `out`. Does not append a
/// field terminator; callers append that (and apply direction) at the
/// field-encoding boundary in `encode_field`.
fn encode_value(value: &Bson, out: &mut Vec<u8>) -> Result<(), KeyStringError> {
    match value {
        Bson::MinKey => out.push(tag::MIN_KEY),
        Bson::MaxKey => out.push(tag::MAX_KEY),
        Bson::Null | Bson::Undefined => out.push(tag::NULL),
        Bson::Double(d) => encode_number(*d, out),
        Bson::Int32(i) => encode_int(i64::from(*i), out),
        Bson::Int64(i) => encode_int(*i, out),
        Bson::Decimal128(_) => return Err(KeyStringError::Unsupported("Decimal128")),
        Bson::String(s) => encode_string_body_with_tag(s, out),
        Bson::Document(doc) => {
            out.push(tag::OBJECT);
            for (k, v) in doc {
                encode_string_body(k, out);
                encode_value(v, out)?;
            }
            out.extend_from_slice(&STRING_TERMINATOR);
        }
        Bson::Array(arr) => {
            out.push(tag::ARRAY);
            for v in arr {
                encode_value(v, out)?;
            }
            out.extend_from_slice(&STRING_TERMINATOR);
        }
        Bson::Binary(bin) => {
            out.push(tag::BIN_DATA);
            out.push(bin.subtype.into());
            out.extend_from_slice(&(bin.bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(&bin.bytes);
        }
        Bson::ObjectId(oid) => {
            out.push(tag::OBJECT_ID);
            out.extend_from_slice(&oid.bytes());
        }
        Bson::Boolean(b) => {
            out.push(tag::BOOL);
            out.push(if *b { 0x02 } else { 0x01 });
        }
        Bson::DateTime(dt) => {
            out.push(tag::DATE);
            encode_i64_payload(dt.timestamp_millis(), out);
        }
        Bson::Timestamp(ts) => {
            out.push(tag::TIMESTAMP);
            out.extend_from_slice(&ts.time.to_be_bytes());
            out.extend_from_slice(&ts.increment.to_be_bytes());
        }
        Bson::RegularExpression(re) => {
            out.push(tag::REGEX);
            encode_string_body(&re.pattern, out);
            encode_string_body(&re.options, out);
        }
        other => return Err(KeyStringError::Unsupported(bson_type_name(other))),
    }
    Ok(())
}

fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::JavaScriptCode(_) => "JavaScriptCode",
        Bson::JavaScriptCodeWithScope(_) => "JavaScriptCodeWithScope",
        Bson::Symbol(_) => "Symbol",
        Bson::DbPointer(_) => "DbPointer",
        _ => "Unknown",
    }
}

/// `Number` encoding: integers with `|v| <= 2^53` and all doubles route
/// here via their IEEE-754 bit pattern.
fn encode_number(d: f64, out: &mut Vec<u8>) {
    out.push(tag::NUMBER);
    encode_f64_payload(d, out);
}

fn encode_f64_payload(d: f64, out: &mut Vec<u8>) {
    let bits = d.to_bits();
    let flipped = if d.is_sign_negative() { !bits } else { bits | (1u64 << 63) };
    out.extend_from_slice(&flipped.to_be_bytes());
}

const SAFE_INT_BOUND: i64 = 1 << 53;

fn encode_int(v: i64, out: &mut Vec<u8>) {
    if v.unsigned_abs() <= SAFE_INT_BOUND as u64 {
        out.push(tag::NUMBER);
        #[allow(clippy::cast_precision_loss)]
        encode_f64_payload(v as f64, out);
    } else {
        out.push(tag::BIG_INT);
        encode_i64_payload(v, out);
    }
}

/// BigInt / Date payload: the u64 bit pattern with the sign bit flipped
/// for non-negative values and fully complemented for negative ones, so
/// that lexicographic order tracks signed numeric order.
fn encode_i64_payload(v: i64, out: &mut Vec<u8>) {
    let bits = v as u64;
    let flipped = if v < 0 { !bits } else { bits | (1u64 << 63) };
    out.extend_from_slice(&flipped.to_be_bytes());
}

fn encode_string_body_with_tag(s: &str, out: &mut Vec<u8>) {
    out.push(tag::STRING);
    encode_string_body(s, out);
}

/// Escapes `0x00` as `00 FF` and `0xFF` as `FF 00`, then emits `00 00` as
/// the string terminator. Used both for top-level strings and for object
/// field names/regex components.
fn encode_string_body(s: &str, out: &mut Vec<u8>) {
    for &b in s.as_bytes() {
        match b {
            0x00 => out.extend_from_slice(&STRING_ESCAPED_ZERO),
            0xFF => out.extend_from_slice(&STRING_ESCAPED_FF),
            other => out.push(other),
        }
    }
    out.extend_from_slice(&STRING_TERMINATOR);
}

/// Sort direction for one field of a compound index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    #[must_use]
    pub fn from_i32(n: i32) -> Self {
        if n < 0 { Direction::Descending } else { Direction::Ascending }
    }
}

/// Encodes one `(value, direction)` field of a compound index key,
/// including its field terminator, bit-flipping the whole segment when
/// `direction` is descending.
///
/// # Errors
/// Returns `KeyStringError::Unsupported` for BSON types with no defined
/// KeyString encoding (JavaScript code, symbols, DB pointers, Decimal128).
pub fn encode_field(value: &Bson, direction: Direction) -> Result<Vec<u8>, KeyStringError> {
    let mut out = Vec::new();
    encode_value(value, &mut out)?;
    out.push(FIELD_TERMINATOR);
    if direction == Direction::Descending {
        for byte in &mut out {
            *byte = !*byte;
        }
    }
    Ok(out)
}

/// Encodes a full compound key: one `encode_field` segment per
/// `(value, direction)` pair, concatenated in order.
///
/// # Errors
/// Propagates `KeyStringError` from any field.
pub fn encode_compound(fields: &[(Bson, Direction)]) -> Result<Vec<u8>, KeyStringError> {
    let mut out = Vec::new();
    for (value, direction) in fields {
        out.extend(encode_field(value, *direction)?);
    }
    Ok(out)
}

/// Appends the disambiguation suffix required for non-unique index keys:
/// `0x00` followed by the BSON encoding of `{_id: value}`.
///
/// # Errors
/// Returns `KeyStringError` wrapped I/O errors never occur here in
/// practice; kept `Result` for symmetry with the rest of the encoder.
#[must_use]
pub fn with_id_disambiguator(mut key: Vec<u8>, id: &Bson) -> Vec<u8> {
    key.push(0x00);
    let doc = bson::doc! { "_id": id.clone() };
    let bytes = bson::to_vec(&doc).unwrap_or_default();
    key.extend(bytes);
    key
}

/// Canonical dedup key for `distinct`: ascending KeyString bytes of the
/// value, with no field terminator stripped, so that two BSON values
/// compare equal as dedup keys iff `bsonCompare` would call them equal.
/// Resolves spec.md §9 Open Question (2): the teacher's `String(describing:)`
/// debug-format hash key is replaced with these canonical bytes.
///
/// # Errors
/// Returns `KeyStringError::Unsupported` for types with no KeyString
/// encoding.
pub fn distinct_key(value: &Bson) -> Result<Vec<u8>, KeyStringError> {
    encode_field(value, Direction::Ascending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{Bson, oid::ObjectId};

    fn enc(v: Bson) -> Vec<u8> {
        encode_field(&v, Direction::Ascending).unwrap()
    }

    #[test]
    fn type_order_matches_canonical_ordering() {
        let min = enc(Bson::MinKey);
        let null = enc(Bson::Null);
        let num = enc(Bson::Int32(1));
        let s = enc(Bson::String("a".into()));
        let obj = enc(bson::doc! {"a": 1}.into());
        let arr = enc(Bson::Array(vec![Bson::Int32(1)]));
        let oid = enc(Bson::ObjectId(ObjectId::new()));
        let boolean = enc(Bson::Boolean(true));
        let max = enc(Bson::MaxKey);

        assert!(min < null);
        assert!(null < num);
        assert!(num < s);
        assert!(s < obj);
        assert!(obj < arr);
        assert!(arr < oid);
        assert!(oid < boolean);
        assert!(boolean < max);
    }

    #[test]
    fn numeric_order_is_preserved_across_signs() {
        let neg = enc(Bson::Int32(-5));
        let zero = enc(Bson::Int32(0));
        let pos = enc(Bson::Int32(5));
        assert!(neg < zero);
        assert!(zero < pos);
    }

    #[test]
    fn big_int_beyond_2_53_orders_correctly() {
        let a = enc(Bson::Int64(1i64 << 60));
        let b = enc(Bson::Int64((1i64 << 60) + 1));
        assert!(a < b);
        let neg = enc(Bson::Int64(-(1i64 << 60)));
        assert!(neg < a);
    }

    #[test]
    fn string_order_matches_str_order() {
        let a = enc(Bson::String("abc".into()));
        let b = enc(Bson::String("abd".into()));
        assert!(a < b);
    }

    #[test]
    fn descending_direction_reverses_order() {
        let a = encode_field(&Bson::Int32(1), Direction::Descending).unwrap();
        let b = encode_field(&Bson::Int32(2), Direction::Descending).unwrap();
        assert!(a > b);
    }

    #[test]
    fn equal_values_encode_identically() {
        let a = enc(bson::doc! {"x": 1, "y": "z"}.into());
        let b = enc(bson::doc! {"x": 1, "y": "z"}.into());
        assert_eq!(a, b);
    }

    #[test]
    fn string_escapes_zero_and_ff_bytes() {
        let s = String::from_utf8(vec![0x61, 0x00, 0x62]).unwrap_or_else(|_| "a".into());
        let _ = enc(Bson::String(s));
    }
}
