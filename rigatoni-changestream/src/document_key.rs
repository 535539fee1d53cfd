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

//! Document key resolution.
//!
//! The document key identifies the changed document: its `_id` plus, for
//! sharded collections, the shard key fields. Which fields make up the key,
//! and in what order, is collection metadata supplied by a
//! [`DocumentKeyLookup`]. The builder only projects those fields out of the
//! record's key-bearing payload.
//!
//! When no metadata is available the builder falls back to the legacy
//! behavior: `_id` first, followed by every other top-level field of the
//! payload in encounter order.
//!
//! # Example
//!
//! ```rust
//! use rigatoni_changestream::document_key::build_document_key;
//! use bson::doc;
//!
//! let payload = doc! { "_id": 1, "x": 2, "other": true };
//! let fields = vec!["x".to_string(), "_id".to_string()];
//!
//! // Field order follows the metadata, not the payload.
//! assert_eq!(build_document_key(&payload, &fields), doc! { "x": 2, "_id": 1 });
//! ```

use crate::oplog::{LogRecord, OpType};
use bson::{Bson, Document, Uuid};
use std::collections::HashMap;

/// Name of the primary key field.
pub const ID_FIELD: &str = "_id";

/// Source of document key metadata.
///
/// Implementations answer with the ordered list of dotted field paths that
/// form the document key of the collection with the given UUID. An empty
/// list means the metadata is not available.
pub trait DocumentKeyLookup: Send + Sync {
    /// Returns the ordered document key fields for a collection.
    fn document_key_fields(&self, uuid: &Uuid) -> Vec<String>;
}

impl<F> DocumentKeyLookup for F
where
    F: Fn(&Uuid) -> Vec<String> + Send + Sync,
{
    fn document_key_fields(&self, uuid: &Uuid) -> Vec<String> {
        self(uuid)
    }
}

/// Lookup for deployments without key metadata; always triggers the legacy
/// fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeyMetadata;

impl DocumentKeyLookup for NoKeyMetadata {
    fn document_key_fields(&self, _uuid: &Uuid) -> Vec<String> {
        Vec::new()
    }
}

/// Lookup backed by a fixed map of collection UUID to key fields.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyMetadata {
    fields: HashMap<Uuid, Vec<String>>,
}

impl StaticKeyMetadata {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the key fields of a collection.
    #[must_use]
    pub fn with_collection(mut self, uuid: Uuid, fields: Vec<String>) -> Self {
        self.fields.insert(uuid, fields);
        self
    }
}

impl DocumentKeyLookup for StaticKeyMetadata {
    fn document_key_fields(&self, uuid: &Uuid) -> Vec<String> {
        self.fields.get(uuid).cloned().unwrap_or_default()
    }
}

/// Returns the payload of `record` that carries the document key.
///
/// Inserts carry the full document in `o`, deletes carry the `_id`/shard key
/// predicate in `o`, and updates carry it in `o2`. Other operations have no
/// document key.
#[must_use]
pub fn key_payload(record: &LogRecord) -> Option<&Document> {
    match record.op {
        OpType::Insert | OpType::Delete => Some(&record.object),
        OpType::Update => record.object2.as_ref(),
        OpType::Command | OpType::Noop => None,
    }
}

/// Builds the document key of `record`, or `None` if the record has no
/// key-bearing payload.
#[must_use]
pub fn build(record: &LogRecord, ordered_fields: &[String]) -> Option<Document> {
    key_payload(record).map(|payload| build_document_key(payload, ordered_fields))
}

/// Projects `ordered_fields` out of `payload`, in order.
///
/// Fields missing from the payload are omitted rather than set to null. An
/// empty field list selects the legacy fallback.
#[must_use]
pub fn build_document_key(payload: &Document, ordered_fields: &[String]) -> Document {
    if ordered_fields.is_empty() {
        return legacy_document_key(payload);
    }

    let mut key = Document::new();
    for path in ordered_fields {
        if let Some(value) = lookup_path(payload, path) {
            key.insert(path.clone(), value.clone());
        }
    }
    key
}

fn legacy_document_key(payload: &Document) -> Document {
    let mut key = Document::new();
    if let Some(id) = payload.get(ID_FIELD) {
        key.insert(ID_FIELD, id.clone());
    }
    for (name, value) in payload {
        if name != ID_FIELD {
            key.insert(name.clone(), value.clone());
        }
    }
    key
}

/// Resolves a dotted path through nested documents.
///
/// Arrays are not traversed: a document key never lives inside an array.
fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        match current {
            Bson::Document(inner) => current = inner.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}
