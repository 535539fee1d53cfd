// Copyright 2025 Rigatoni Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Order-preserving binary encoding of BSON values.
//!
//! Resume tokens embed the event's document key. To keep tokens sortable as
//! plain byte strings, the key is written with an encoding whose byte order
//! follows value order within each BSON type, and whose types are ranked in
//! the server's canonical comparison order (null < numbers < strings <
//! documents < arrays < binary < ObjectId < booleans < dates < timestamps <
//! regexes). Every value has exactly one encoding, so decoding and
//! re-encoding reproduces the input byte-for-byte.
//!
//! # Format
//!
//! ```text
//! value    := tag payload
//! document := 0x46 ( 0x05 terminated(field-name) value )* 0x04
//! array    := 0x50 value* 0x04
//! string   := 0x3C terminated(utf8)
//! int32    := 0x1E (i32 with sign bit flipped, BE)
//! int64    := 0x1F (i64 with sign bit flipped, BE)
//! double   := 0x20 (IEEE-754 bits, order-corrected, BE)
//! decimal  := 0x21 class adjusted-exponent[2] significand[16] bid-bytes[16]
//! ```
//!
//! A decimal128 is prefixed with a sort key derived from its value: a class
//! byte (NaN < -inf < negative < zero < positive < +inf), the adjusted
//! exponent and the significand scaled to 34 digits, both bit-inverted for
//! negative values. The original BID bytes follow, so cohorts such as `1`
//! and `1.0` keep distinct encodings.
//!
//! Variable-length byte strings use the terminated encoding:
//!
//! - `0x00` → `0x01 0x01`
//! - `0x01` → `0x01 0x02`
//! - `0xFF` → `0x01 0x03`
//! - all other bytes unchanged, followed by a `0x00` terminator
//!
//! The end-of-container marker sorts below every value tag and every field
//! marker, so a document or array that is a prefix of another sorts first.
//!
//! Numeric types keep distinct tags so that the exact BSON type survives a
//! round trip; as a consequence an `int32` always sorts before an `int64`
//! regardless of magnitude.
//!
//! Documents and arrays may nest at most 200 levels deep; deeper values are
//! rejected by both the encoder and the decoder.
//!
//! Rarely used legacy types (JavaScript code, symbols, `undefined`, DB
//! pointers) are stored as a length-prefixed raw BSON document. They still
//! round-trip exactly but only sort by their raw bytes.

use crate::error::ChangeStreamError;
use bson::oid::ObjectId;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson, DateTime, Decimal128, Document, Regex, Timestamp};
use bytes::BufMut;

/// Maximum nesting of documents and arrays.
const MAX_DEPTH: usize = 200;

const DECIMAL_DIGITS: u32 = 34;
const DECIMAL_KEY_LEN: usize = 19;

mod decimal_class {
    pub const NAN: u8 = 0x01;
    pub const NEGATIVE_INFINITY: u8 = 0x02;
    pub const NEGATIVE: u8 = 0x03;
    pub const ZERO: u8 = 0x04;
    pub const POSITIVE: u8 = 0x05;
    pub const POSITIVE_INFINITY: u8 = 0x06;
}

const SIGN_BIT_64: u64 = 1 << 63;

pub(crate) mod tag {
    pub const END: u8 = 0x04;
    pub const FIELD: u8 = 0x05;
    pub const MIN_KEY: u8 = 0x0A;
    pub const NULL: u8 = 0x14;
    pub const INT32: u8 = 0x1E;
    pub const INT64: u8 = 0x1F;
    pub const DOUBLE: u8 = 0x20;
    pub const DECIMAL128: u8 = 0x21;
    pub const STRING: u8 = 0x3C;
    pub const DOCUMENT: u8 = 0x46;
    pub const ARRAY: u8 = 0x50;
    pub const BINARY: u8 = 0x5A;
    pub const OBJECT_ID: u8 = 0x64;
    pub const FALSE: u8 = 0x6E;
    pub const TRUE: u8 = 0x6F;
    pub const DATE_TIME: u8 = 0x78;
    pub const TIMESTAMP: u8 = 0x82;
    pub const REGEX: u8 = 0x8C;
    pub const RAW: u8 = 0xE6;
    pub const MAX_KEY: u8 = 0xF0;
}

/// Appends the encoding of `value` to `buf`.
///
/// # Errors
///
/// Returns [`ChangeStreamError::TokenEncoding`] if a legacy value cannot be
/// serialized as raw BSON or the value nests deeper than the decoder accepts.
pub fn append_value<B: BufMut>(buf: &mut B, value: &Bson) -> Result<(), ChangeStreamError> {
    append_value_at_depth(buf, value, 0)
}

fn append_value_at_depth<B: BufMut>(
    buf: &mut B,
    value: &Bson,
    depth: usize,
) -> Result<(), ChangeStreamError> {
    if depth > MAX_DEPTH {
        return Err(ChangeStreamError::TokenEncoding(format!(
            "nesting deeper than {MAX_DEPTH}"
        )));
    }

    match value {
        Bson::MinKey => buf.put_u8(tag::MIN_KEY),
        Bson::Null => buf.put_u8(tag::NULL),
        Bson::Int32(v) => {
            buf.put_u8(tag::INT32);
            buf.put_u32((*v as u32) ^ (1 << 31));
        }
        Bson::Int64(v) => {
            buf.put_u8(tag::INT64);
            buf.put_u64((*v as u64) ^ SIGN_BIT_64);
        }
        Bson::Double(v) => {
            buf.put_u8(tag::DOUBLE);
            let bits = v.to_bits();
            let ordered = if bits & SIGN_BIT_64 != 0 {
                !bits
            } else {
                bits | SIGN_BIT_64
            };
            buf.put_u64(ordered);
        }
        Bson::Decimal128(v) => {
            let bytes = v.bytes();
            buf.put_u8(tag::DECIMAL128);
            buf.put_slice(&decimal_sort_key(bytes));
            buf.put_slice(&bytes);
        }
        Bson::String(s) => {
            buf.put_u8(tag::STRING);
            append_terminated(buf, s.as_bytes());
        }
        Bson::Document(doc) => {
            buf.put_u8(tag::DOCUMENT);
            append_document_body(buf, doc, depth + 1)?;
        }
        Bson::Array(values) => {
            buf.put_u8(tag::ARRAY);
            for v in values {
                append_value_at_depth(buf, v, depth + 1)?;
            }
            buf.put_u8(tag::END);
        }
        Bson::Binary(bin) => {
            buf.put_u8(tag::BINARY);
            buf.put_u32(len_u32(bin.bytes.len())?);
            buf.put_u8(u8::from(bin.subtype));
            buf.put_slice(&bin.bytes);
        }
        Bson::ObjectId(oid) => {
            buf.put_u8(tag::OBJECT_ID);
            buf.put_slice(&oid.bytes());
        }
        Bson::Boolean(false) => buf.put_u8(tag::FALSE),
        Bson::Boolean(true) => buf.put_u8(tag::TRUE),
        Bson::DateTime(dt) => {
            buf.put_u8(tag::DATE_TIME);
            buf.put_u64((dt.timestamp_millis() as u64) ^ SIGN_BIT_64);
        }
        Bson::Timestamp(ts) => {
            buf.put_u8(tag::TIMESTAMP);
            buf.put_u32(ts.time);
            buf.put_u32(ts.increment);
        }
        Bson::RegularExpression(re) => {
            buf.put_u8(tag::REGEX);
            append_terminated(buf, re.pattern.as_bytes());
            append_terminated(buf, re.options.as_bytes());
        }
        Bson::MaxKey => buf.put_u8(tag::MAX_KEY),
        other => {
            let mut wrapper = Document::new();
            wrapper.insert("", other.clone());
            let mut raw = Vec::new();
            wrapper
                .to_writer(&mut raw)
                .map_err(|e| ChangeStreamError::TokenEncoding(e.to_string()))?;
            buf.put_u8(tag::RAW);
            buf.put_u32(len_u32(raw.len())?);
            buf.put_slice(&raw);
        }
    }
    Ok(())
}

/// Appends the fields of `doc` followed by the end marker.
fn append_document_body<B: BufMut>(
    buf: &mut B,
    doc: &Document,
    depth: usize,
) -> Result<(), ChangeStreamError> {
    for (name, value) in doc {
        buf.put_u8(tag::FIELD);
        append_terminated(buf, name.as_bytes());
        append_value_at_depth(buf, value, depth)?;
    }
    buf.put_u8(tag::END);
    Ok(())
}

/// Computes the sort key of a BID-encoded decimal128.
///
/// Non-canonical coefficients (above `10^34 - 1`) are zero, as in IEEE 754.
fn decimal_sort_key(bytes: [u8; 16]) -> [u8; DECIMAL_KEY_LEN] {
    let bits = u128::from_le_bytes(bytes);
    let negative = bits >> 127 == 1;
    let combination = (bits >> 122) & 0x1F;
    let mut key = [0u8; DECIMAL_KEY_LEN];

    if combination & 0b11110 == 0b11110 {
        key[0] = if combination & 1 == 1 {
            decimal_class::NAN
        } else if negative {
            decimal_class::NEGATIVE_INFINITY
        } else {
            decimal_class::POSITIVE_INFINITY
        };
        return key;
    }

    let (biased_exponent, coefficient) = if combination >> 3 == 0b11 {
        (
            ((bits >> 111) & 0x3FFF) as u32,
            (bits & ((1 << 111) - 1)) | (0b100 << 111),
        )
    } else {
        (((bits >> 113) & 0x3FFF) as u32, bits & ((1 << 113) - 1))
    };

    let max_coefficient = 10u128.pow(DECIMAL_DIGITS);
    if coefficient == 0 || coefficient >= max_coefficient {
        key[0] = decimal_class::ZERO;
        return key;
    }

    let digits = coefficient.ilog10() + 1;
    let adjusted_exponent = (biased_exponent + digits - 1) as u16;
    let significand = coefficient * 10u128.pow(DECIMAL_DIGITS - digits);

    let (class, exponent_bytes, significand_bytes) = if negative {
        (
            decimal_class::NEGATIVE,
            (!adjusted_exponent).to_be_bytes(),
            (!significand).to_be_bytes(),
        )
    } else {
        (
            decimal_class::POSITIVE,
            adjusted_exponent.to_be_bytes(),
            significand.to_be_bytes(),
        )
    };
    key[0] = class;
    key[1..3].copy_from_slice(&exponent_bytes);
    key[3..].copy_from_slice(&significand_bytes);
    key
}

fn append_terminated<B: BufMut>(buf: &mut B, bytes: &[u8]) {
    for &b in bytes {
        match b {
            0x00 => buf.put_slice(&[0x01, 0x01]),
            0x01 => buf.put_slice(&[0x01, 0x02]),
            0xFF => buf.put_slice(&[0x01, 0x03]),
            _ => buf.put_u8(b),
        }
    }
    buf.put_u8(0x00);
}

fn len_u32(len: usize) -> Result<u32, ChangeStreamError> {
    u32::try_from(len)
        .map_err(|_| ChangeStreamError::TokenEncoding(format!("value of {len} bytes is too large")))
}

/// Reads one value from the front of `buf`, advancing it.
///
/// # Errors
///
/// Returns [`ChangeStreamError::MalformedToken`] if the bytes are not a
/// canonical encoding produced by [`append_value`].
pub fn read_value(buf: &mut &[u8]) -> Result<Bson, ChangeStreamError> {
    read_value_at_depth(buf, 0)
}

fn read_value_at_depth(buf: &mut &[u8], depth: usize) -> Result<Bson, ChangeStreamError> {
    let t = read_u8(buf)?;
    read_tagged(buf, t, depth)
}

fn read_tagged(buf: &mut &[u8], t: u8, depth: usize) -> Result<Bson, ChangeStreamError> {
    if depth > MAX_DEPTH {
        return Err(malformed(format!("nesting deeper than {MAX_DEPTH}")));
    }

    let value = match t {
        tag::MIN_KEY => Bson::MinKey,
        tag::NULL => Bson::Null,
        tag::INT32 => Bson::Int32((read_u32(buf)? ^ (1 << 31)) as i32),
        tag::INT64 => Bson::Int64((read_u64(buf)? ^ SIGN_BIT_64) as i64),
        tag::DOUBLE => {
            let ordered = read_u64(buf)?;
            let bits = if ordered & SIGN_BIT_64 != 0 {
                ordered & !SIGN_BIT_64
            } else {
                !ordered
            };
            Bson::Double(f64::from_bits(bits))
        }
        tag::DECIMAL128 => {
            let key = read_array::<DECIMAL_KEY_LEN>(buf)?;
            let bytes = read_array::<16>(buf)?;
            if decimal_sort_key(bytes) != key {
                return Err(malformed("decimal128 sort key does not match value".to_string()));
            }
            Bson::Decimal128(Decimal128::from_bytes(bytes))
        }
        tag::STRING => Bson::String(read_string(buf)?),
        tag::DOCUMENT => Bson::Document(read_document_body(buf, depth + 1)?),
        tag::ARRAY => {
            let mut values = Vec::new();
            loop {
                let next = read_u8(buf)?;
                if next == tag::END {
                    break;
                }
                values.push(read_tagged(buf, next, depth + 1)?);
            }
            Bson::Array(values)
        }
        tag::BINARY => {
            let len = read_u32(buf)? as usize;
            let subtype = BinarySubtype::from(read_u8(buf)?);
            let bytes = take(buf, len)?.to_vec();
            Bson::Binary(Binary { subtype, bytes })
        }
        tag::OBJECT_ID => Bson::ObjectId(ObjectId::from_bytes(read_array::<12>(buf)?)),
        tag::FALSE => Bson::Boolean(false),
        tag::TRUE => Bson::Boolean(true),
        tag::DATE_TIME => {
            Bson::DateTime(DateTime::from_millis((read_u64(buf)? ^ SIGN_BIT_64) as i64))
        }
        tag::TIMESTAMP => {
            let time = read_u32(buf)?;
            let increment = read_u32(buf)?;
            Bson::Timestamp(Timestamp { time, increment })
        }
        tag::REGEX => {
            let pattern = read_string(buf)?;
            let options = read_string(buf)?;
            Bson::RegularExpression(Regex { pattern, options })
        }
        tag::RAW => read_raw(buf)?,
        tag::MAX_KEY => Bson::MaxKey,
        other => return Err(malformed(format!("unknown type tag 0x{other:02X}"))),
    };
    Ok(value)
}

fn read_document_body(buf: &mut &[u8], depth: usize) -> Result<Document, ChangeStreamError> {
    let mut doc = Document::new();
    loop {
        match read_u8(buf)? {
            tag::END => return Ok(doc),
            tag::FIELD => {
                let name = read_string(buf)?;
                if doc.contains_key(&name) {
                    return Err(malformed(format!("duplicate field '{name}'")));
                }
                let value = read_value_at_depth(buf, depth)?;
                doc.insert(name, value);
            }
            other => return Err(malformed(format!("unexpected byte 0x{other:02X} in document"))),
        }
    }
}

fn read_raw(buf: &mut &[u8]) -> Result<Bson, ChangeStreamError> {
    let len = read_u32(buf)? as usize;
    let mut raw = take(buf, len)?;
    let wrapper = Document::from_reader(&mut raw).map_err(|e| malformed(e.to_string()))?;
    if !raw.is_empty() || wrapper.len() != 1 {
        return Err(malformed("invalid raw value".to_string()));
    }
    wrapper
        .get("")
        .cloned()
        .ok_or_else(|| malformed("invalid raw value".to_string()))
}

fn read_string(buf: &mut &[u8]) -> Result<String, ChangeStreamError> {
    let bytes = read_terminated(buf)?;
    String::from_utf8(bytes).map_err(|_| malformed("string is not valid UTF-8".to_string()))
}

fn read_terminated(buf: &mut &[u8]) -> Result<Vec<u8>, ChangeStreamError> {
    let mut out = Vec::new();
    loop {
        match read_u8(buf)? {
            0x00 => return Ok(out),
            0x01 => match read_u8(buf)? {
                0x01 => out.push(0x00),
                0x02 => out.push(0x01),
                0x03 => out.push(0xFF),
                other => return Err(malformed(format!("invalid escape 0x01 0x{other:02X}"))),
            },
            0xFF => return Err(malformed("unescaped 0xFF byte".to_string())),
            b => out.push(b),
        }
    }
}

fn take<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8], ChangeStreamError> {
    if buf.len() < len {
        return Err(malformed(format!(
            "expected {len} more bytes, found {}",
            buf.len()
        )));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn read_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], ChangeStreamError> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(buf, N)?);
    Ok(out)
}

pub(crate) fn read_u8(buf: &mut &[u8]) -> Result<u8, ChangeStreamError> {
    Ok(read_array::<1>(buf)?[0])
}

pub(crate) fn read_u32(buf: &mut &[u8]) -> Result<u32, ChangeStreamError> {
    Ok(u32::from_be_bytes(read_array::<4>(buf)?))
}

fn read_u64(buf: &mut &[u8]) -> Result<u64, ChangeStreamError> {
    Ok(u64::from_be_bytes(read_array::<8>(buf)?))
}

fn malformed(message: String) -> ChangeStreamError {
    ChangeStreamError::MalformedToken(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, doc};
    use proptest::prelude::*;

    fn encode(value: &Bson) -> Vec<u8> {
        let mut buf = Vec::new();
        append_value(&mut buf, value).unwrap();
        buf
    }

    fn decode(bytes: &[u8]) -> Bson {
        let mut slice = bytes;
        let value = read_value(&mut slice).unwrap();
        assert!(slice.is_empty());
        value
    }

    #[test]
    fn should_roundtrip_every_supported_type() {
        let values = vec![
            Bson::MinKey,
            Bson::MaxKey,
            Bson::Null,
            Bson::Int32(-7),
            Bson::Int64(i64::MIN),
            Bson::Double(-0.0),
            Bson::Double(f64::INFINITY),
            Bson::Decimal128(Decimal128::from_bytes([7; 16])),
            Bson::String("a\u{0}b\u{1}c".to_string()),
            bson!({ "x": 2, "_id": 1, "nested": { "a": [1, "two", null] } }),
            bson!([]),
            Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: vec![0x00, 0x01, 0xFF],
            }),
            Bson::ObjectId(ObjectId::from_bytes([1; 12])),
            Bson::Boolean(true),
            Bson::Boolean(false),
            Bson::DateTime(DateTime::from_millis(-1)),
            Bson::Timestamp(Timestamp {
                time: 100,
                increment: 1,
            }),
            Bson::RegularExpression(Regex {
                pattern: "^ab".to_string(),
                options: "i".to_string(),
            }),
            Bson::Symbol("sym".to_string()),
            Bson::Undefined,
            Bson::JavaScriptCode("function() {}".to_string()),
        ];

        for value in values {
            let bytes = encode(&value);
            let decoded = decode(&bytes);
            assert_eq!(encode(&decoded), bytes, "re-encoding differs for {value:?}");
            if let Bson::Double(d) = value {
                assert_eq!(decoded.as_f64().unwrap().to_bits(), d.to_bits());
            } else {
                assert_eq!(decoded, value);
            }
        }
    }

    #[test]
    fn should_order_documents_by_field_then_value() {
        let a = encode(&Bson::Document(doc! { "_id": 1 }));
        let b = encode(&Bson::Document(doc! { "_id": 1, "x": 0 }));
        let c = encode(&Bson::Document(doc! { "_id": 2 }));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn should_order_types_canonically() {
        let ordered = [
            Bson::MinKey,
            Bson::Null,
            Bson::Int32(i32::MAX),
            Bson::String(String::new()),
            Bson::Document(Document::new()),
            Bson::Array(vec![]),
            Bson::ObjectId(ObjectId::from_bytes([0; 12])),
            Bson::Boolean(false),
            Bson::Boolean(true),
            Bson::MaxKey,
        ];
        for pair in ordered.windows(2) {
            assert!(encode(&pair[0]) < encode(&pair[1]), "{:?} !< {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn should_reject_truncated_input() {
        let bytes = encode(&Bson::String("hello".to_string()));
        let mut slice = &bytes[..bytes.len() - 1];
        assert!(read_value(&mut slice).is_err());
    }

    #[test]
    fn should_reject_non_canonical_escapes() {
        let mut slice: &[u8] = &[tag::STRING, b'a', 0xFF, 0x00];
        assert!(read_value(&mut slice).is_err());

        let mut slice: &[u8] = &[tag::STRING, 0x01, 0x09, 0x00];
        assert!(read_value(&mut slice).is_err());
    }

    #[test]
    fn should_reject_duplicate_fields() {
        let mut bytes = vec![tag::DOCUMENT];
        for _ in 0..2 {
            bytes.push(tag::FIELD);
            append_terminated(&mut bytes, b"a");
            append_value(&mut bytes, &Bson::Int32(1)).unwrap();
        }
        bytes.push(tag::END);

        let mut slice = bytes.as_slice();
        assert!(read_value(&mut slice).is_err());
    }

    fn decimal(coefficient: u128, exponent: i32, negative: bool) -> Bson {
        let biased = u128::try_from(exponent + 6176).unwrap();
        let mut bits = (biased << 113) | coefficient;
        if negative {
            bits |= 1 << 127;
        }
        Bson::Decimal128(Decimal128::from_bytes(bits.to_le_bytes()))
    }

    fn special_decimal(top_byte: u8) -> Bson {
        let bits = u128::from(top_byte) << 120;
        Bson::Decimal128(Decimal128::from_bytes(bits.to_le_bytes()))
    }

    #[test]
    fn should_order_decimals_by_value() {
        let ordered = [
            special_decimal(0x7C),
            special_decimal(0xF8),
            decimal(256, 0, true),
            decimal(1, 0, true),
            decimal(0, 0, false),
            decimal(1, 0, false),
            decimal(15, -1, false),
            decimal(99, 0, false),
            decimal(1, 2, false),
            decimal(256, 0, false),
            special_decimal(0x78),
        ];
        for pair in ordered.windows(2) {
            assert!(encode(&pair[0]) < encode(&pair[1]), "{:?} !< {:?}", pair[0], pair[1]);
        }
        for value in ordered {
            assert_eq!(decode(&encode(&value)), value);
        }
    }

    #[test]
    fn should_keep_decimal_cohorts_distinct() {
        let one = encode(&decimal(1, 0, false));
        let one_point_zero = encode(&decimal(10, -1, false));

        assert_eq!(one[..20], one_point_zero[..20]);
        assert_ne!(one, one_point_zero);
        assert_eq!(decode(&one_point_zero), decimal(10, -1, false));
    }

    #[test]
    fn should_reject_mismatched_decimal_key() {
        let mut bytes = encode(&decimal(1, 0, false));
        bytes[2] ^= 0x01;

        let mut slice = bytes.as_slice();
        let err = read_value(&mut slice).unwrap_err();
        assert_eq!(err.category(), "malformed_token");
    }

    #[test]
    fn should_enforce_depth_limit_when_encoding() {
        let mut value = Bson::Int32(1);
        for _ in 0..MAX_DEPTH {
            value = Bson::Document(doc! { "a": value });
        }
        assert_eq!(decode(&encode(&value)), value);

        let too_deep = Bson::Document(doc! { "a": value });
        let mut buf = Vec::new();
        let err = append_value(&mut buf, &too_deep).unwrap_err();
        assert_eq!(err.category(), "token_encoding");
    }

    #[test]
    fn should_reject_unknown_tag() {
        let mut slice: &[u8] = &[0x99];
        let err = read_value(&mut slice).unwrap_err();
        assert_eq!(err.category(), "malformed_token");
    }

    proptest! {
        #[test]
        fn should_preserve_int64_ordering(a: i64, b: i64) {
            prop_assert_eq!(
                a.cmp(&b),
                encode(&Bson::Int64(a)).cmp(&encode(&Bson::Int64(b)))
            );
        }

        #[test]
        fn should_preserve_double_ordering(a in -1.0e300f64..1.0e300, b in -1.0e300f64..1.0e300) {
            let ord = a.partial_cmp(&b).unwrap();
            // -0.0 and 0.0 compare equal but keep distinct encodings
            if a != b {
                prop_assert_eq!(
                    ord,
                    encode(&Bson::Double(a)).cmp(&encode(&Bson::Double(b)))
                );
            }
        }

        #[test]
        fn should_preserve_string_ordering(a: String, b: String) {
            prop_assert_eq!(
                a.as_bytes().cmp(b.as_bytes()),
                encode(&Bson::String(a.clone())).cmp(&encode(&Bson::String(b.clone())))
            );
        }

        #[test]
        fn should_roundtrip_any_string(s: String) {
            let value = Bson::String(s);
            prop_assert_eq!(decode(&encode(&value)), value);
        }
    }
}
