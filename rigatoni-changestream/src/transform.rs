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

//! Oplog record to change event transformation.
//!
//! [`ChangeStreamTransformation`] turns one [`LogRecord`] into zero or one
//! [`ChangeEvent`]. It classifies the record, resolves the document key from
//! collection metadata, encodes the resume token and assembles the variant
//! for the event kind. It is the only change stream stage that serializes
//! back into a `$changeStream` stage document.
//!
//! Collaborators are injected at construction: a [`DocumentKeyLookup`] for
//! key metadata and, for `fullDocument: "updateLookup"`, a
//! [`PostImageLookup`] that fetches the current document state.

use crate::classifier::{self, Classification, EventKind, InvalidateCause, SuppressionReason};
use crate::document_key::{self, DocumentKeyLookup, ID_FIELD};
use crate::event::{ChangeEvent, PostImage, UpdateDescription};
use crate::expander::{stage_document, ChangeStreamSpec, FullDocumentMode, STAGE_NAME};
use crate::metrics::{self, KeyLookupResult};
use crate::namespace::Namespace;
use crate::oplog::LogRecord;
use crate::resume_token::{ResumeToken, ResumeTokenData};
use crate::stage::{GetNext, Stage, StageDescriptor};
use bson::{doc, Bson, Document, Uuid};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Source of the current state of a document, used for
/// `fullDocument: "updateLookup"`.
pub trait PostImageLookup: Send + Sync {
    /// Returns the current version of the document with the given key, or
    /// `None` if it no longer exists.
    fn lookup_post_image(&self, ns: &Namespace, document_key: &Document) -> Option<Document>;
}

impl<F> PostImageLookup for F
where
    F: Fn(&Namespace, &Document) -> Option<Document> + Send + Sync,
{
    fn lookup_post_image(&self, ns: &Namespace, document_key: &Document) -> Option<Document> {
        self(ns, document_key)
    }
}

/// Transforms oplog records for one change stream.
pub struct ChangeStreamTransformation {
    ns: Namespace,
    spec: ChangeStreamSpec,
    key_lookup: Arc<dyn DocumentKeyLookup>,
    post_image_lookup: Option<Arc<dyn PostImageLookup>>,
    key_fields: HashMap<Uuid, Vec<String>>,
}

impl ChangeStreamTransformation {
    /// Creates a transformation for a stream watching `ns`.
    pub fn new(
        ns: Namespace,
        spec: ChangeStreamSpec,
        key_lookup: Arc<dyn DocumentKeyLookup>,
        post_image_lookup: Option<Arc<dyn PostImageLookup>>,
    ) -> Self {
        Self {
            ns,
            spec,
            key_lookup,
            post_image_lookup,
            key_fields: HashMap::new(),
        }
    }

    /// Returns the watched namespace.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Returns the options this stage was built from.
    #[must_use]
    pub fn spec(&self) -> &ChangeStreamSpec {
        &self.spec
    }

    /// Transforms one record, returning `None` if it produces no event.
    pub fn transform(&mut self, record: &LogRecord) -> Option<ChangeEvent> {
        let kind = match classifier::classify(record, &self.ns) {
            Classification::Event(kind) => kind,
            Classification::Suppressed(reason) => {
                suppress(record, reason);
                return None;
            }
        };

        let event = match kind {
            EventKind::Invalidate(cause) => ChangeEvent::Invalidate {
                id: encode_token(record, cause != InvalidateCause::DropDatabase, None)?,
            },
            EventKind::RetryNeeded => {
                let key = record
                    .object2
                    .as_ref()
                    .map(|marker| Bson::Document(doc! { ID_FIELD: marker.clone() }));
                ChangeEvent::RetryNeeded {
                    id: encode_token(record, true, key)?,
                }
            }
            EventKind::Insert | EventKind::Update | EventKind::Replace | EventKind::Delete => {
                self.document_event(kind, record)?
            }
        };

        if let Some(resume_after) = &self.spec.resume_after {
            if event.resume_token() <= resume_after {
                suppress(record, SuppressionReason::BeforeResumePoint);
                return None;
            }
        }

        let operation = event.operation_type().as_str();
        debug!(operation, cluster_time = ?record.ts, ns = %record.ns, "Emitting change event");
        metrics::increment_events_emitted(operation);
        Some(event)
    }

    /// Wraps `upstream` into a pull-based stage running this transformation.
    pub fn attach<S>(self, upstream: S) -> TransformationStage<S>
    where
        S: Stage<Item = LogRecord>,
    {
        TransformationStage {
            upstream,
            transformation: self,
        }
    }

    fn document_event(&mut self, kind: EventKind, record: &LogRecord) -> Option<ChangeEvent> {
        let fields = self.key_fields(record.uuid.as_ref());
        let Some(document_key) = document_key::build(record, fields) else {
            warn!(op = record.op.as_str(), ns = %record.ns, "Record has no document key payload");
            suppress(record, SuppressionReason::MissingPayload);
            return None;
        };

        let id = encode_token(record, true, Some(Bson::Document(document_key.clone())))?;
        let ns = record.namespace();

        let event = match kind {
            EventKind::Insert => ChangeEvent::Insert {
                id,
                ns,
                document_key,
                full_document: record.object.clone(),
            },
            EventKind::Update => {
                let full_document = self.post_image(&ns, &document_key);
                ChangeEvent::Update {
                    id,
                    ns,
                    document_key,
                    update_description: UpdateDescription::from_delta(&record.object),
                    full_document,
                }
            }
            EventKind::Replace => ChangeEvent::Replace {
                id,
                ns,
                document_key,
                full_document: record.object.clone(),
            },
            EventKind::Delete => ChangeEvent::Delete {
                id,
                ns,
                document_key,
            },
            EventKind::Invalidate(_) | EventKind::RetryNeeded => return None,
        };
        Some(event)
    }

    /// Returns the document key fields for a collection.
    ///
    /// Non-empty answers are cached per UUID; empty answers are asked again
    /// next time since metadata may become available later.
    fn key_fields(&mut self, uuid: Option<&Uuid>) -> &[String] {
        let Some(uuid) = uuid else {
            metrics::increment_document_key_lookups(KeyLookupResult::Fallback);
            return &[];
        };

        if self.key_fields.contains_key(uuid) {
            metrics::increment_document_key_lookups(KeyLookupResult::Cached);
        } else {
            let fields = self.key_lookup.document_key_fields(uuid);
            if fields.is_empty() {
                metrics::increment_document_key_lookups(KeyLookupResult::Fallback);
                return &[];
            }
            metrics::increment_document_key_lookups(KeyLookupResult::Fetched);
            self.key_fields.insert(*uuid, fields);
        }

        self.key_fields
            .get(uuid)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn post_image(&self, ns: &Namespace, document_key: &Document) -> PostImage {
        if self.spec.full_document_mode() != FullDocumentMode::UpdateLookup {
            return PostImage::NotRequested;
        }
        match &self.post_image_lookup {
            Some(lookup) => lookup
                .lookup_post_image(ns, document_key)
                .map_or(PostImage::Missing, PostImage::Found),
            None => PostImage::Missing,
        }
    }
}

impl StageDescriptor for ChangeStreamTransformation {
    fn source_name(&self) -> &'static str {
        STAGE_NAME
    }

    fn serialize(&self) -> Option<Document> {
        Some(stage_document(&self.spec))
    }
}

impl fmt::Debug for ChangeStreamTransformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeStreamTransformation")
            .field("ns", &self.ns)
            .field("spec", &self.spec)
            .field("has_post_image_lookup", &self.post_image_lookup.is_some())
            .field("cached_collections", &self.key_fields.len())
            .finish()
    }
}

/// Runtime stage pulling records from upstream and yielding change events.
#[derive(Debug)]
pub struct TransformationStage<S> {
    upstream: S,
    transformation: ChangeStreamTransformation,
}

impl<S> TransformationStage<S> {
    /// Returns the transformation driven by this stage.
    #[must_use]
    pub fn transformation(&self) -> &ChangeStreamTransformation {
        &self.transformation
    }
}

impl<S> Stage for TransformationStage<S>
where
    S: Stage<Item = LogRecord>,
{
    type Item = ChangeEvent;

    fn get_next(&mut self) -> GetNext<ChangeEvent> {
        loop {
            match self.upstream.get_next() {
                GetNext::Advanced(record) => {
                    if let Some(event) = self.transformation.transform(&record) {
                        return GetNext::Advanced(event);
                    }
                }
                GetNext::Eof => return GetNext::Eof,
                GetNext::Closed => return GetNext::Closed,
            }
        }
    }
}

fn suppress(record: &LogRecord, reason: SuppressionReason) {
    trace!(
        reason = reason.as_str(),
        op = record.op.as_str(),
        ns = %record.ns,
        "Suppressing oplog record"
    );
    metrics::increment_records_suppressed(reason);
}

fn encode_token(
    record: &LogRecord,
    include_uuid: bool,
    document_key: Option<Bson>,
) -> Option<ResumeToken> {
    let mut data = ResumeTokenData::new(record.ts);
    data.uuid = record.uuid.filter(|_| include_uuid);
    data.document_key = document_key;

    match data.encode() {
        Ok(token) => Some(token),
        Err(e) => {
            warn!(error = %e, ns = %record.ns, "Cannot encode resume token");
            suppress(record, SuppressionReason::UnencodableKey);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_key::{NoKeyMetadata, StaticKeyMetadata};
    use crate::oplog::{OpTime, OpType};
    use bson::Timestamp;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ns() -> Namespace {
        Namespace::new("unittests", "change_stream")
    }

    fn uuid() -> Uuid {
        Uuid::from_bytes([7; 16])
    }

    fn insert(time: u32) -> LogRecord {
        LogRecord::new(
            OpTime::new(Timestamp { time, increment: 1 }, 1),
            OpType::Insert,
            &ns(),
            doc! { "_id": 1, "x": 2 },
        )
        .with_uuid(uuid())
    }

    fn transformation(spec: ChangeStreamSpec) -> ChangeStreamTransformation {
        ChangeStreamTransformation::new(ns(), spec, Arc::new(NoKeyMetadata), None)
    }

    #[test]
    fn test_key_fields_cached_per_collection() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let lookup = move |_: &Uuid| {
            counter.fetch_add(1, Ordering::SeqCst);
            vec!["x".to_string(), "_id".to_string()]
        };

        let mut t = ChangeStreamTransformation::new(
            ns(),
            ChangeStreamSpec::default(),
            Arc::new(lookup),
            None,
        );
        for time in 1..=3 {
            let event = t.transform(&insert(time)).unwrap();
            assert_eq!(event.document_key(), Some(&doc! { "x": 2, "_id": 1 }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_key_fields_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let lookup = move |_: &Uuid| {
            counter.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        };

        let mut t = ChangeStreamTransformation::new(
            ns(),
            ChangeStreamSpec::default(),
            Arc::new(lookup),
            None,
        );
        t.transform(&insert(1)).unwrap();
        t.transform(&insert(2)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_resume_after_skips_earlier_events() {
        let mut first = transformation(ChangeStreamSpec::default());
        let resume_point = first.transform(&insert(5)).unwrap().resume_token().clone();

        let spec = ChangeStreamSpec::builder()
            .resume_after(resume_point)
            .build();
        let mut resumed = transformation(spec);
        assert!(resumed.transform(&insert(4)).is_none());
        assert!(resumed.transform(&insert(5)).is_none());
        assert!(resumed.transform(&insert(6)).is_some());
    }

    #[test]
    fn test_update_lookup_attaches_post_image() {
        let update = LogRecord::new(
            OpTime::new(Timestamp { time: 1, increment: 1 }, 1),
            OpType::Update,
            &ns(),
            doc! { "$set": { "y": 1 } },
        )
        .with_object2(doc! { "_id": 1 });

        let spec = ChangeStreamSpec::builder()
            .full_document(FullDocumentMode::UpdateLookup)
            .build();

        let lookup = |_: &Namespace, key: &Document| {
            matches!(key.get_i32("_id"), Ok(1)).then(|| doc! { "_id": 1, "y": 1 })
        };
        let mut t = ChangeStreamTransformation::new(
            ns(),
            spec.clone(),
            Arc::new(NoKeyMetadata),
            Some(Arc::new(lookup)),
        );
        let event = t.transform(&update).unwrap();
        assert_eq!(event.full_document(), Some(&doc! { "_id": 1, "y": 1 }));

        let mut without_lookup = transformation(spec);
        let event = without_lookup.transform(&update).unwrap();
        assert_eq!(
            event.to_document().get("fullDocument"),
            Some(&Bson::Null)
        );

        let mut default_mode = transformation(ChangeStreamSpec::default());
        let event = default_mode.transform(&update).unwrap();
        assert!(!event.to_document().contains_key("fullDocument"));
    }

    #[test]
    fn test_static_metadata_applies_to_deletes() {
        let lookup = StaticKeyMetadata::new()
            .with_collection(uuid(), vec!["shard".to_string(), "_id".to_string()]);
        let mut t = ChangeStreamTransformation::new(
            ns(),
            ChangeStreamSpec::default(),
            Arc::new(lookup),
            None,
        );
        let delete = LogRecord::new(
            OpTime::new(Timestamp { time: 1, increment: 1 }, 1),
            OpType::Delete,
            &ns(),
            doc! { "_id": 9, "shard": "a" },
        )
        .with_uuid(uuid());

        let event = t.transform(&delete).unwrap();
        assert_eq!(event.document_key(), Some(&doc! { "shard": "a", "_id": 9 }));
    }

    #[test]
    fn test_serializes_only_explicit_options() {
        let t = transformation(ChangeStreamSpec::default());
        assert_eq!(t.serialize(), Some(doc! { "$changeStream": {} }));
        assert_eq!(t.source_name(), "$changeStream");
    }
}
