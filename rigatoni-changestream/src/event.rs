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

//! Change event types.
//!
//! A [`ChangeEvent`] is the normalized, client-visible form of one oplog
//! record. Each variant carries exactly the fields its operation exposes:
//!
//! | Variant | `fullDocument` | `ns` | `documentKey` | `updateDescription` |
//! |---------|----------------|------|---------------|---------------------|
//! | `Insert` | inserted document | yes | yes | no |
//! | `Update` | post-image, only with `updateLookup` | yes | yes | yes |
//! | `Replace` | replacement document | yes | yes | no |
//! | `Delete` | no | yes | yes | no |
//! | `Invalidate` | no | no | no | no |
//! | `RetryNeeded` | no | no | no | no |
//!
//! Every variant carries its resume token, rendered as the `_id` field.
//!
//! # Example
//!
//! ```rust
//! use rigatoni_changestream::event::{ChangeEvent, OperationType};
//! use rigatoni_changestream::namespace::Namespace;
//! use rigatoni_changestream::resume_token::ResumeTokenData;
//! use bson::{doc, Bson, Timestamp};
//!
//! let id = ResumeTokenData::new(Timestamp { time: 100, increment: 1 })
//!     .with_document_key(Bson::Document(doc! { "_id": 123 }))
//!     .encode()
//!     .unwrap();
//!
//! let event = ChangeEvent::Insert {
//!     id,
//!     ns: Namespace::new("mydb", "users"),
//!     document_key: doc! { "_id": 123 },
//!     full_document: doc! { "_id": 123, "name": "Alice" },
//! };
//!
//! assert_eq!(event.operation_type(), OperationType::Insert);
//! assert_eq!(event.to_document().get_str("operationType").unwrap(), "insert");
//! ```

use crate::namespace::Namespace;
use crate::resume_token::ResumeToken;
use bson::{doc, Bson, Document, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event field holding the resume token.
pub const ID_FIELD: &str = "_id";
/// Event field holding the operation type.
pub const OPERATION_TYPE_FIELD: &str = "operationType";
/// Event field holding the full document.
pub const FULL_DOCUMENT_FIELD: &str = "fullDocument";
/// Event field holding the namespace.
pub const NAMESPACE_FIELD: &str = "ns";
/// Event field holding the document key.
pub const DOCUMENT_KEY_FIELD: &str = "documentKey";
/// Event field holding the update description.
pub const UPDATE_DESCRIPTION_FIELD: &str = "updateDescription";

/// Change stream operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    /// A document was inserted
    Insert,

    /// A document was modified in place
    Update,

    /// A document was replaced entirely
    Replace,

    /// A document was deleted
    Delete,

    /// The stream was invalidated (collection dropped or renamed, database
    /// dropped)
    Invalidate,

    /// The client must restart the stream from a new resume point
    RetryNeeded,
}

impl OperationType {
    /// Returns the wire name of this operation type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Invalidate => "invalidate",
            Self::RetryNeeded => "retryNeeded",
        }
    }

    /// Returns true if this operation modifies data (insert, update, replace).
    #[inline]
    pub fn is_data_modification(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Replace)
    }

    /// Returns true if an event of this type ends the stream.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Invalidate | Self::RetryNeeded)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What changed in an update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateDescription {
    /// Fields that were added or modified
    #[serde(rename = "updatedFields")]
    pub updated_fields: Document,

    /// Fields that were removed, in delta order
    #[serde(rename = "removedFields")]
    pub removed_fields: Vec<String>,
}

impl UpdateDescription {
    /// Derives the description from an operator delta.
    ///
    /// `$set` becomes `updatedFields` and the field names of `$unset` become
    /// `removedFields`. Both are empty when their operator is absent.
    #[must_use]
    pub fn from_delta(delta: &Document) -> Self {
        let updated_fields = delta.get_document("$set").cloned().unwrap_or_default();
        let removed_fields = delta
            .get_document("$unset")
            .map(|unset| unset.keys().cloned().collect())
            .unwrap_or_default();

        Self {
            updated_fields,
            removed_fields,
        }
    }

    /// Renders the description as a document.
    #[must_use]
    pub fn to_document(&self) -> Document {
        doc! {
            "updatedFields": self.updated_fields.clone(),
            "removedFields": self.removed_fields.clone(),
        }
    }
}

/// Post-image attached to an update event.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PostImage {
    /// `fullDocument` was not requested; the field is omitted
    #[default]
    NotRequested,

    /// Requested, but the document no longer exists; the field is null
    Missing,

    /// Requested and found
    Found(Document),
}

impl PostImage {
    fn to_bson(&self) -> Option<Bson> {
        match self {
            Self::NotRequested => None,
            Self::Missing => Some(Bson::Null),
            Self::Found(doc) => Some(Bson::Document(doc.clone())),
        }
    }
}

/// A normalized change event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A document was inserted
    Insert {
        /// Resume token
        id: ResumeToken,
        /// Namespace of the collection
        ns: Namespace,
        /// Key of the inserted document
        document_key: Document,
        /// The inserted document
        full_document: Document,
    },

    /// A document was modified with an operator delta
    Update {
        /// Resume token
        id: ResumeToken,
        /// Namespace of the collection
        ns: Namespace,
        /// Key of the updated document
        document_key: Document,
        /// Fields set and removed by the delta
        update_description: UpdateDescription,
        /// Current document state, when requested
        full_document: PostImage,
    },

    /// A document was replaced
    Replace {
        /// Resume token
        id: ResumeToken,
        /// Namespace of the collection
        ns: Namespace,
        /// Key of the replaced document
        document_key: Document,
        /// The replacement document
        full_document: Document,
    },

    /// A document was deleted
    Delete {
        /// Resume token
        id: ResumeToken,
        /// Namespace of the collection
        ns: Namespace,
        /// Key of the deleted document
        document_key: Document,
    },

    /// The stream was invalidated
    Invalidate {
        /// Resume token
        id: ResumeToken,
    },

    /// The client must restart the stream
    RetryNeeded {
        /// Resume token
        id: ResumeToken,
    },
}

impl ChangeEvent {
    /// Returns the operation type of this event.
    #[must_use]
    pub fn operation_type(&self) -> OperationType {
        match self {
            Self::Insert { .. } => OperationType::Insert,
            Self::Update { .. } => OperationType::Update,
            Self::Replace { .. } => OperationType::Replace,
            Self::Delete { .. } => OperationType::Delete,
            Self::Invalidate { .. } => OperationType::Invalidate,
            Self::RetryNeeded { .. } => OperationType::RetryNeeded,
        }
    }

    /// Returns the resume token of this event.
    #[must_use]
    pub fn resume_token(&self) -> &ResumeToken {
        match self {
            Self::Insert { id, .. }
            | Self::Update { id, .. }
            | Self::Replace { id, .. }
            | Self::Delete { id, .. }
            | Self::Invalidate { id }
            | Self::RetryNeeded { id } => id,
        }
    }

    /// Returns true if this event ends the stream.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.operation_type().is_terminal()
    }

    /// Returns true if this is an insert event.
    #[inline]
    pub fn is_insert(&self) -> bool {
        matches!(self, Self::Insert { .. })
    }

    /// Returns true if this is an invalidate event.
    #[inline]
    pub fn is_invalidate(&self) -> bool {
        matches!(self, Self::Invalidate { .. })
    }

    /// Returns the namespace, if this event carries one.
    #[must_use]
    pub fn namespace(&self) -> Option<&Namespace> {
        match self {
            Self::Insert { ns, .. }
            | Self::Update { ns, .. }
            | Self::Replace { ns, .. }
            | Self::Delete { ns, .. } => Some(ns),
            Self::Invalidate { .. } | Self::RetryNeeded { .. } => None,
        }
    }

    /// Returns the document key, if this event carries one.
    #[must_use]
    pub fn document_key(&self) -> Option<&Document> {
        match self {
            Self::Insert { document_key, .. }
            | Self::Update { document_key, .. }
            | Self::Replace { document_key, .. }
            | Self::Delete { document_key, .. } => Some(document_key),
            Self::Invalidate { .. } | Self::RetryNeeded { .. } => None,
        }
    }

    /// Returns the full document, if this event carries one.
    #[must_use]
    pub fn full_document(&self) -> Option<&Document> {
        match self {
            Self::Insert { full_document, .. } | Self::Replace { full_document, .. } => {
                Some(full_document)
            }
            Self::Update {
                full_document: PostImage::Found(doc),
                ..
            } => Some(doc),
            _ => None,
        }
    }

    /// Returns the primary key of the changed document.
    #[must_use]
    pub fn document_id(&self) -> Option<&Bson> {
        self.document_key().and_then(|key| key.get("_id"))
    }

    /// Returns the cluster time encoded in the resume token.
    #[must_use]
    pub fn cluster_time(&self) -> Option<Timestamp> {
        self.resume_token()
            .decode()
            .ok()
            .map(|data| data.cluster_time)
    }

    /// Renders the event in its wire shape.
    ///
    /// Fields appear in the order `_id`, `operationType`, `fullDocument`,
    /// `ns`, `documentKey`, `updateDescription`, each only when the variant
    /// carries it.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut out = doc! {
            ID_FIELD: self.resume_token().to_document(),
            OPERATION_TYPE_FIELD: self.operation_type().as_str(),
        };

        let full_document = match self {
            Self::Insert { full_document, .. } | Self::Replace { full_document, .. } => {
                Some(Bson::Document(full_document.clone()))
            }
            Self::Update { full_document, .. } => full_document.to_bson(),
            _ => None,
        };
        if let Some(full_document) = full_document {
            out.insert(FULL_DOCUMENT_FIELD, full_document);
        }

        if let Some(ns) = self.namespace() {
            out.insert(
                NAMESPACE_FIELD,
                doc! { "db": ns.db.as_str(), "coll": ns.coll.as_str() },
            );
        }
        if let Some(key) = self.document_key() {
            out.insert(DOCUMENT_KEY_FIELD, key.clone());
        }
        if let Self::Update {
            update_description, ..
        } = self
        {
            out.insert(UPDATE_DESCRIPTION_FIELD, update_description.to_document());
        }

        out
    }
}

impl From<ChangeEvent> for Document {
    fn from(event: ChangeEvent) -> Self {
        event.to_document()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resume_token::ResumeTokenData;

    fn token() -> ResumeToken {
        ResumeTokenData::new(Timestamp {
            time: 7,
            increment: 3,
        })
        .encode()
        .unwrap()
    }

    #[test]
    fn test_update_description_from_delta() {
        let desc = UpdateDescription::from_delta(&doc! {
            "$set": { "a": 1, "b.c": "x" },
            "$unset": { "z": true, "y": 1 },
        });
        assert_eq!(desc.updated_fields, doc! { "a": 1, "b.c": "x" });
        assert_eq!(desc.removed_fields, vec!["z".to_string(), "y".to_string()]);

        let empty = UpdateDescription::from_delta(&doc! { "$v": 1 });
        assert_eq!(empty, UpdateDescription::default());
    }

    #[test]
    fn test_update_post_image_rendering() {
        let event = |full_document| ChangeEvent::Update {
            id: token(),
            ns: Namespace::new("db", "coll"),
            document_key: doc! { "_id": 1 },
            update_description: UpdateDescription::default(),
            full_document,
        };

        let omitted = event(PostImage::NotRequested).to_document();
        assert!(!omitted.contains_key(FULL_DOCUMENT_FIELD));

        let missing = event(PostImage::Missing).to_document();
        assert_eq!(missing.get(FULL_DOCUMENT_FIELD), Some(&Bson::Null));

        let found = event(PostImage::Found(doc! { "_id": 1, "a": 2 }));
        assert_eq!(found.full_document(), Some(&doc! { "_id": 1, "a": 2 }));
        let keys: Vec<_> = found.to_document().keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                "_id",
                "operationType",
                "fullDocument",
                "ns",
                "documentKey",
                "updateDescription"
            ]
        );
    }

    #[test]
    fn test_terminal_events_only_carry_id() {
        let event = ChangeEvent::RetryNeeded { id: token() };
        assert!(event.is_terminal());
        assert_eq!(event.namespace(), None);
        assert_eq!(
            event.to_document(),
            doc! { "_id": token().to_document(), "operationType": "retryNeeded" }
        );
        assert_eq!(
            event.cluster_time(),
            Some(Timestamp {
                time: 7,
                increment: 3
            })
        );
    }
}
