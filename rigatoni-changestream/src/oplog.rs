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

//! Oplog record representation.
//!
//! A [`LogRecord`] is one entry of the replication log as handed to the
//! change stream by the record source. It mirrors the on-disk oplog shape
//! closely enough that a raw BSON oplog document converts into it directly:
//!
//! | Field | BSON key | Meaning |
//! |-------|----------|---------|
//! | `ts` | `ts` | Cluster time of the write |
//! | `term` | `t` | Replication term |
//! | `op` | `op` | `i`, `u`, `d`, `c` or `n` |
//! | `ns` | `ns` | Target namespace (`db.coll`, or `db.$cmd` for commands) |
//! | `uuid` | `ui` | Collection UUID |
//! | `object` | `o` | Inserted document, update delta, delete predicate or command |
//! | `object2` | `o2` | Update predicate (`_id` + shard key) or noop marker |
//! | `from_migrate` | `fromMigrate` | Written by chunk migration |
//!
//! # Example
//!
//! ```rust
//! use rigatoni_changestream::oplog::{LogRecord, OpType};
//! use bson::{doc, Timestamp};
//!
//! let raw = doc! {
//!     "ts": Timestamp { time: 100, increment: 1 },
//!     "t": 1_i64,
//!     "op": "i",
//!     "ns": "shop.orders",
//!     "o": { "_id": 1, "total": 42 },
//! };
//!
//! let record = LogRecord::try_from(raw).unwrap();
//! assert_eq!(record.op, OpType::Insert);
//! assert_eq!(record.namespace().coll, "orders");
//! ```

use crate::error::ChangeStreamError;
use crate::namespace::Namespace;
use bson::{Document, Timestamp, Uuid};
use serde::{Deserialize, Serialize};

/// Kind of operation recorded in the oplog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    /// Document insert
    #[serde(rename = "i")]
    Insert,

    /// Document update (operator delta or full replacement)
    #[serde(rename = "u")]
    Update,

    /// Document delete
    #[serde(rename = "d")]
    Delete,

    /// Database command (drop, rename, create, ...)
    #[serde(rename = "c")]
    Command,

    /// No-op entry (heartbeats, primary changes, migration markers)
    #[serde(rename = "n")]
    Noop,
}

impl OpType {
    /// Returns the single-letter oplog code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "i",
            Self::Update => "u",
            Self::Delete => "d",
            Self::Command => "c",
            Self::Noop => "n",
        }
    }
}

/// Position of a record in the replication log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpTime {
    /// Logical cluster time
    pub ts: Timestamp,

    /// Replication term (absent on very old entries)
    pub term: Option<i64>,
}

impl OpTime {
    /// Creates an optime.
    #[must_use]
    pub fn new(ts: Timestamp, term: i64) -> Self {
        Self {
            ts,
            term: Some(term),
        }
    }
}

/// A single oplog entry.
///
/// Records are immutable from the change stream's point of view: every
/// stage reads them by reference and none of them rewrites a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Cluster time of the write
    pub ts: Timestamp,

    /// Replication term
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub term: Option<i64>,

    /// Operation kind
    pub op: OpType,

    /// Raw target namespace
    pub ns: String,

    /// Collection UUID
    #[serde(rename = "ui", default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,

    /// Primary payload: the inserted document (after-image), the update
    /// delta or replacement, the delete predicate, or the command object.
    #[serde(rename = "o", default)]
    pub object: Document,

    /// Secondary payload: the update predicate or the noop marker.
    #[serde(rename = "o2", default, skip_serializing_if = "Option::is_none")]
    pub object2: Option<Document>,

    /// Whether the write was produced by chunk migration
    #[serde(
        rename = "fromMigrate",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub from_migrate: bool,
}

impl LogRecord {
    /// Creates a record with the given primary payload.
    #[must_use]
    pub fn new(op_time: OpTime, op: OpType, ns: &Namespace, object: Document) -> Self {
        Self {
            ts: op_time.ts,
            term: op_time.term,
            op,
            ns: ns.full_name(),
            uuid: None,
            object,
            object2: None,
            from_migrate: false,
        }
    }

    /// Creates a command record logged against `db.$cmd`.
    #[must_use]
    pub fn command(op_time: OpTime, db: &str, command: Document) -> Self {
        Self::new(
            op_time,
            OpType::Command,
            &Namespace::new(db, "").command_ns(),
            command,
        )
    }

    /// Sets the secondary payload (`o2`).
    #[must_use]
    pub fn with_object2(mut self, object2: Document) -> Self {
        self.object2 = Some(object2);
        self
    }

    /// Sets the collection UUID (`ui`).
    #[must_use]
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Sets the migration flag.
    #[must_use]
    pub fn with_from_migrate(mut self, from_migrate: bool) -> Self {
        self.from_migrate = from_migrate;
        self
    }

    /// Returns the record's optime.
    #[must_use]
    pub fn op_time(&self) -> OpTime {
        OpTime {
            ts: self.ts,
            term: self.term,
        }
    }

    /// Returns the parsed target namespace.
    #[must_use]
    pub fn namespace(&self) -> Namespace {
        Namespace::parse(&self.ns)
    }

    /// Converts the record back into its raw BSON form.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeStreamError::InvalidLogRecord`] if serialization fails.
    pub fn to_document(&self) -> Result<Document, ChangeStreamError> {
        bson::to_document(self).map_err(|e| ChangeStreamError::InvalidLogRecord(e.to_string()))
    }
}

/// Conversion from a raw oplog document.
impl TryFrom<Document> for LogRecord {
    type Error = ChangeStreamError;

    fn try_from(raw: Document) -> Result<Self, Self::Error> {
        Ok(bson::from_document(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn optime() -> OpTime {
        OpTime::new(Timestamp { time: 100, increment: 1 }, 1)
    }

    #[test]
    fn test_from_raw_document() {
        let uuid = Uuid::new();
        let raw = doc! {
            "ts": Timestamp { time: 100, increment: 1 },
            "t": 1_i64,
            "op": "u",
            "ns": "unittests.change_stream",
            "ui": uuid,
            "o": { "$set": { "y": 1 } },
            "o2": { "_id": 1 },
            "fromMigrate": true,
        };

        let record = LogRecord::try_from(raw).unwrap();
        assert_eq!(record.op, OpType::Update);
        assert_eq!(record.uuid, Some(uuid));
        assert_eq!(record.object2, Some(doc! { "_id": 1 }));
        assert!(record.from_migrate);
        assert_eq!(record.op_time(), optime());
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let raw = doc! {
            "ts": Timestamp { time: 5, increment: 0 },
            "op": "n",
            "ns": "",
            "o": { "msg": "new primary" },
        };

        let record = LogRecord::try_from(raw).unwrap();
        assert_eq!(record.term, None);
        assert_eq!(record.uuid, None);
        assert!(!record.from_migrate);
        assert!(record.namespace().is_empty());
    }

    #[test]
    fn test_unknown_op_rejected() {
        let raw = doc! {
            "ts": Timestamp { time: 5, increment: 0 },
            "op": "x",
            "ns": "a.b",
            "o": {},
        };

        let err = LogRecord::try_from(raw).unwrap_err();
        assert_eq!(err.category(), "invalid_record");
    }

    #[test]
    fn test_command_namespace() {
        let record = LogRecord::command(optime(), "unittests", doc! { "drop": "coll" });
        assert_eq!(record.ns, "unittests.$cmd");
        assert_eq!(record.op, OpType::Command);
    }

    #[test]
    fn test_to_document_omits_defaults() {
        let record = LogRecord::new(
            optime(),
            OpType::Insert,
            &Namespace::new("a", "b"),
            doc! { "_id": 1 },
        );

        let raw = record.to_document().unwrap();
        assert!(!raw.contains_key("fromMigrate"));
        assert!(!raw.contains_key("o2"));
        assert_eq!(raw.get_str("op").unwrap(), "i");
        assert_eq!(LogRecord::try_from(raw).unwrap(), record);
    }
}
