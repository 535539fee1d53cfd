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

//! Resume token encoding and decoding.
//!
//! Every change event carries a resume token in its `_id` field. The token
//! packs the event's cluster time, the collection UUID and the document key
//! into a single opaque value that clients hand back to restart a stream.
//!
//! Tokens are documents of the form `{ _data: "<hex>" }`. The hex string is
//! the upper-case encoding of:
//!
//! ```text
//! | version (u8) | time (u32 BE) | increment (u32 BE) | uuid? | documentKey? |
//!
//! uuid?        := 0x00 | 0x01 uuid-bytes[16]
//! documentKey? := 0x00 | 0x01 key_string(value)
//! ```
//!
//! Because every component is order-preserving, comparing two tokens as
//! strings orders them by `(clusterTime, uuid present, uuid, documentKey)`.
//! Cluster time always dominates, so tokens sort in oplog order.
//!
//! # Example
//!
//! ```rust
//! use rigatoni_changestream::resume_token::{ResumeToken, ResumeTokenData};
//! use bson::{doc, Bson, Timestamp};
//!
//! let data = ResumeTokenData::new(Timestamp { time: 100, increment: 1 })
//!     .with_document_key(Bson::Document(doc! { "_id": 1 }));
//!
//! let token = data.encode().unwrap();
//! let restored = ResumeToken::from_document(&token.to_document()).unwrap();
//! assert_eq!(restored.decode().unwrap(), data);
//! ```

use crate::error::ChangeStreamError;
use crate::key_string;
use bson::{doc, Bson, Document, Timestamp, Uuid};
use bytes::BufMut;
use chrono::{DateTime, Utc};
use std::fmt;

/// Field holding the encoded token inside the token document.
pub const DATA_FIELD: &str = "_data";

/// Current token format version.
pub const TOKEN_VERSION: u8 = 0x01;

const ABSENT: u8 = 0x00;
const PRESENT: u8 = 0x01;

/// The decoded contents of a resume token.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeTokenData {
    /// Cluster time of the event; the primary ordering key
    pub cluster_time: Timestamp,

    /// UUID of the collection the event belongs to.
    ///
    /// Absent for invalidations not tied to one collection, such as a
    /// database drop.
    pub uuid: Option<Uuid>,

    /// Document key of the event, if any
    pub document_key: Option<Bson>,
}

impl ResumeTokenData {
    /// Creates token data for the given cluster time.
    #[must_use]
    pub fn new(cluster_time: Timestamp) -> Self {
        Self {
            cluster_time,
            uuid: None,
            document_key: None,
        }
    }

    /// Sets the collection UUID.
    #[must_use]
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Sets the document key.
    #[must_use]
    pub fn with_document_key(mut self, document_key: Bson) -> Self {
        self.document_key = Some(document_key);
        self
    }

    /// Returns the wall-clock second encoded in the cluster time.
    #[must_use]
    pub fn wall_clock_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.cluster_time.time), 0)
    }

    /// Encodes this data into a resume token.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeStreamError::TokenEncoding`] if the document key holds
    /// a legacy value that cannot be serialized.
    pub fn encode(&self) -> Result<ResumeToken, ChangeStreamError> {
        let mut buf: Vec<u8> = Vec::with_capacity(32);
        buf.put_u8(TOKEN_VERSION);
        buf.put_u32(self.cluster_time.time);
        buf.put_u32(self.cluster_time.increment);

        match &self.uuid {
            Some(uuid) => {
                buf.put_u8(PRESENT);
                buf.put_slice(&uuid.bytes());
            }
            None => buf.put_u8(ABSENT),
        }

        match &self.document_key {
            Some(key) => {
                buf.put_u8(PRESENT);
                key_string::append_value(&mut buf, key)?;
            }
            None => buf.put_u8(ABSENT),
        }

        Ok(ResumeToken {
            data: hex::encode_upper(buf),
        })
    }
}

/// An opaque, orderable resume token.
///
/// Tokens order exactly like the events they were produced for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResumeToken {
    data: String,
}

impl ResumeToken {
    /// Parses and validates a token document (`{ _data: "<hex>" }`).
    ///
    /// # Errors
    ///
    /// Returns [`ChangeStreamError::MalformedToken`] if the document has any
    /// other shape or its payload does not decode.
    pub fn from_document(doc: &Document) -> Result<Self, ChangeStreamError> {
        if doc.len() != 1 {
            return Err(ChangeStreamError::MalformedToken(format!(
                "expected a single '{DATA_FIELD}' field, found {} fields",
                doc.len()
            )));
        }

        let data = match doc.get(DATA_FIELD) {
            Some(Bson::String(s)) => s.clone(),
            Some(other) => {
                return Err(ChangeStreamError::MalformedToken(format!(
                    "'{DATA_FIELD}' must be a string, found {:?}",
                    other.element_type()
                )))
            }
            None => {
                return Err(ChangeStreamError::MalformedToken(format!(
                    "missing '{DATA_FIELD}' field"
                )))
            }
        };

        let token = Self { data };
        token.decode()?;
        Ok(token)
    }

    /// Decodes the token back into its components.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeStreamError::MalformedToken`] if the payload was not
    /// produced by [`ResumeTokenData::encode`].
    pub fn decode(&self) -> Result<ResumeTokenData, ChangeStreamError> {
        if !self
            .data
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
        {
            return Err(ChangeStreamError::MalformedToken(
                "payload is not upper-case hex".to_string(),
            ));
        }

        let bytes =
            hex::decode(&self.data).map_err(|e| ChangeStreamError::MalformedToken(e.to_string()))?;
        let mut buf = bytes.as_slice();

        let version = key_string::read_u8(&mut buf)?;
        if version != TOKEN_VERSION {
            return Err(ChangeStreamError::MalformedToken(format!(
                "unsupported token version {version}"
            )));
        }

        let time = key_string::read_u32(&mut buf)?;
        let increment = key_string::read_u32(&mut buf)?;
        let mut data = ResumeTokenData::new(Timestamp { time, increment });

        if read_marker(&mut buf, "uuid")? {
            let mut uuid = [0u8; 16];
            for byte in &mut uuid {
                *byte = key_string::read_u8(&mut buf)?;
            }
            data.uuid = Some(Uuid::from_bytes(uuid));
        }

        if read_marker(&mut buf, "documentKey")? {
            data.document_key = Some(key_string::read_value(&mut buf)?);
        }

        if !buf.is_empty() {
            return Err(ChangeStreamError::MalformedToken(format!(
                "{} trailing bytes",
                buf.len()
            )));
        }

        let canonical = data
            .encode()
            .map_err(|e| ChangeStreamError::MalformedToken(e.to_string()))?;
        if canonical != *self {
            return Err(ChangeStreamError::MalformedToken(
                "payload is not in canonical form".to_string(),
            ));
        }

        Ok(data)
    }

    /// Returns the token as the document embedded in events.
    #[must_use]
    pub fn to_document(&self) -> Document {
        doc! { DATA_FIELD: self.data.clone() }
    }

    /// Returns the encoded payload.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.data
    }
}

fn read_marker(buf: &mut &[u8], what: &str) -> Result<bool, ChangeStreamError> {
    match key_string::read_u8(buf)? {
        ABSENT => Ok(false),
        PRESENT => Ok(true),
        other => Err(ChangeStreamError::MalformedToken(format!(
            "invalid {what} marker 0x{other:02X}"
        ))),
    }
}

impl From<ResumeToken> for Bson {
    fn from(token: ResumeToken) -> Self {
        Bson::Document(token.to_document())
    }
}

impl TryFrom<&Document> for ResumeToken {
    type Error = ChangeStreamError;

    fn try_from(doc: &Document) -> Result<Self, Self::Error> {
        Self::from_document(doc)
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ts(time: u32, increment: u32) -> Timestamp {
        Timestamp { time, increment }
    }

    fn uuid(byte: u8) -> Uuid {
        Uuid::from_bytes([byte; 16])
    }

    #[test]
    fn test_roundtrip_variants() {
        let variants = vec![
            ResumeTokenData::new(ts(100, 1)),
            ResumeTokenData::new(ts(100, 1)).with_uuid(uuid(7)),
            ResumeTokenData::new(ts(100, 1))
                .with_uuid(uuid(7))
                .with_document_key(Bson::Document(doc! { "x": 2, "_id": 1 })),
            ResumeTokenData::new(ts(100, 1)).with_document_key(Bson::Int32(5)),
        ];

        for data in variants {
            let token = data.encode().unwrap();
            assert_eq!(token.decode().unwrap(), data);

            let reparsed = ResumeToken::from_document(&token.to_document()).unwrap();
            assert_eq!(reparsed, token);
            assert_eq!(reparsed.decode().unwrap().encode().unwrap(), token);
        }
    }

    #[test]
    fn test_token_document_shape() {
        let token = ResumeTokenData::new(ts(1, 2)).encode().unwrap();
        let doc = token.to_document();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.get_str(DATA_FIELD).unwrap(), token.as_str());
        assert_eq!(token.as_str(), "0100000001000000020000");
    }

    #[test]
    fn test_uuid_presence_orders_after_absence() {
        let without = ResumeTokenData::new(ts(100, 1)).encode().unwrap();
        let with = ResumeTokenData::new(ts(100, 1))
            .with_uuid(uuid(0))
            .encode()
            .unwrap();
        assert!(without < with);
    }

    #[test]
    fn test_increment_breaks_ties() {
        let a = ResumeTokenData::new(ts(100, 1))
            .with_uuid(uuid(0xFF))
            .encode()
            .unwrap();
        let b = ResumeTokenData::new(ts(100, 2)).encode().unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_wall_clock_time() {
        let data = ResumeTokenData::new(ts(1_700_000_000, 3));
        let wall = data.wall_clock_time().unwrap();
        assert_eq!(wall.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_rejects_malformed_documents() {
        let cases = vec![
            doc! {},
            doc! { "_data": 1 },
            doc! { "data": "01" },
            doc! { "_data": "0100000001000000020000", "extra": true },
            doc! { "_data": "0100000001000000020000ff" },
            doc! { "_data": "010000000100000002000" },
            doc! { "_data": "0100000001000000020000FF" },
            doc! { "_data": "0200000001000000020000" },
            doc! { "_data": "0100000001000000020200" },
            doc! { "_data": "01000000010000" },
            doc! { "_data": "not hex" },
        ];

        for case in cases {
            let err = ResumeToken::from_document(&case).unwrap_err();
            assert_eq!(err.category(), "malformed_token", "accepted {case:?}");
        }
    }

    #[test]
    fn test_rejects_non_canonical_document_key() {
        let mut wrapper = Document::new();
        wrapper.insert("", 1_i32);
        let mut raw = Vec::new();
        wrapper.to_writer(&mut raw).unwrap();

        let mut payload = hex::decode("01000000010000000200").unwrap();
        payload.put_u8(PRESENT);
        payload.put_u8(key_string::tag::RAW);
        payload.put_u32(u32::try_from(raw.len()).unwrap());
        payload.put_slice(&raw);

        let token = doc! { DATA_FIELD: hex::encode_upper(&payload) };
        let err = ResumeToken::from_document(&token).unwrap_err();
        assert_eq!(err.category(), "malformed_token");

        let canonical = ResumeTokenData::new(ts(1, 2))
            .with_document_key(Bson::Int32(1))
            .encode()
            .unwrap();
        assert!(ResumeToken::from_document(&canonical.to_document()).is_ok());
    }

    #[test]
    fn test_encode_rejects_overly_nested_key() {
        let mut key = Bson::Int32(1);
        for _ in 0..=200 {
            key = Bson::Document(doc! { "a": key });
        }
        let err = ResumeTokenData::new(ts(1, 2))
            .with_document_key(key)
            .encode()
            .unwrap_err();
        assert_eq!(err.category(), "token_encoding");
    }

    fn arb_document_key() -> impl Strategy<Value = Option<Bson>> {
        prop_oneof![
            Just(None),
            any::<i64>().prop_map(|v| Some(Bson::Document(doc! { "_id": v }))),
            (any::<String>(), any::<i32>())
                .prop_map(|(s, v)| Some(Bson::Document(doc! { "shard": s, "_id": v }))),
        ]
    }

    fn arb_data() -> impl Strategy<Value = ResumeTokenData> {
        (
            any::<u32>(),
            any::<u32>(),
            proptest::option::of(any::<[u8; 16]>()),
            arb_document_key(),
        )
            .prop_map(|(time, increment, uuid, document_key)| ResumeTokenData {
                cluster_time: Timestamp { time, increment },
                uuid: uuid.map(Uuid::from_bytes),
                document_key,
            })
    }

    proptest! {
        #[test]
        fn should_roundtrip_any_token(data in arb_data()) {
            let token = data.encode().unwrap();
            prop_assert_eq!(token.decode().unwrap(), data);
        }

        #[test]
        fn should_order_by_cluster_time_first(a in arb_data(), b in arb_data()) {
            let key_a = (a.cluster_time.time, a.cluster_time.increment);
            let key_b = (b.cluster_time.time, b.cluster_time.increment);
            if key_a < key_b {
                prop_assert!(a.encode().unwrap() < b.encode().unwrap());
            } else if key_a > key_b {
                prop_assert!(a.encode().unwrap() > b.encode().unwrap());
            }
        }
    }
}
