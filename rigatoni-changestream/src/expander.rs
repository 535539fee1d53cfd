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

//! `$changeStream` stage expansion.
//!
//! A client asks for a change stream with a single stage document:
//!
//! ```text
//! { $changeStream: { fullDocument?: "default" | "updateLookup", resumeAfter?: <token> } }
//! ```
//!
//! [`create_from_bson`] validates it against the deployment described by an
//! [`ExpressionContext`] and expands it into three stages, all of which
//! report the name `$changeStream`:
//!
//! 1. [`OplogMatch`], the oplog pre-filter
//! 2. [`ChangeStreamTransformation`], record to event
//! 3. [`CloseCursor`], the terminal state machine
//!
//! Only the transformation serializes, so the expanded chain serializes back
//! to the original stage document.
//!
//! # Example
//!
//! ```rust
//! use rigatoni_changestream::expander::{create_from_bson, ExpressionContext, ReplicationCoordinator};
//! use rigatoni_changestream::namespace::Namespace;
//! use rigatoni_changestream::oplog::OpTime;
//! use bson::{doc, Timestamp};
//! use std::sync::Arc;
//!
//! struct Primary;
//!
//! impl ReplicationCoordinator for Primary {
//!     fn last_applied_op_time(&self) -> OpTime {
//!         OpTime::new(Timestamp { time: 100, increment: 0 }, 1)
//!     }
//! }
//!
//! let ctx = ExpressionContext::new(Namespace::new("shop", "orders"))
//!     .with_replication_coordinator(Arc::new(Primary));
//!
//! let spec = doc! { "$changeStream": { "fullDocument": "updateLookup" } };
//! let pipeline = create_from_bson(&spec, &ctx).unwrap();
//!
//! assert_eq!(pipeline.stages().len(), 3);
//! assert_eq!(pipeline.serialize(), vec![spec]);
//! ```

use crate::close_cursor::{CloseCursor, CloseCursorStage};
use crate::document_key::{DocumentKeyLookup, NoKeyMetadata};
use crate::error::ChangeStreamError;
use crate::metrics;
use crate::namespace::Namespace;
use crate::oplog::{LogRecord, OpTime};
use crate::resume_token::ResumeToken;
use crate::stage::{OplogMatch, OplogMatchStage, RecordMatcher, StageDescriptor, StartPoint};
use crate::transform::{ChangeStreamTransformation, PostImageLookup, TransformationStage};
use bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Name of the stage, reported by every stage it expands into.
pub const STAGE_NAME: &str = "$changeStream";

/// Option selecting the `fullDocument` mode.
pub const FULL_DOCUMENT_OPTION: &str = "fullDocument";

/// Option carrying the resume point.
pub const RESUME_AFTER_OPTION: &str = "resumeAfter";

/// What update events carry in `fullDocument`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FullDocumentMode {
    /// Update events carry no `fullDocument`
    #[default]
    Default,
    /// Update events carry the current document state
    UpdateLookup,
}

impl FullDocumentMode {
    /// Returns the option value for this mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::UpdateLookup => "updateLookup",
        }
    }

    /// Parses an option value.
    #[must_use]
    pub fn from_option(value: &str) -> Option<Self> {
        match value {
            "default" => Some(Self::Default),
            "updateLookup" => Some(Self::UpdateLookup),
            _ => None,
        }
    }
}

/// Parsed `$changeStream` options.
///
/// Options the client did not set stay `None`, so [`to_document`] renders
/// exactly what was asked for.
///
/// [`to_document`]: ChangeStreamSpec::to_document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeStreamSpec {
    /// `fullDocument`, if set
    pub full_document: Option<FullDocumentMode>,

    /// `resumeAfter`, if set
    pub resume_after: Option<ResumeToken>,
}

impl ChangeStreamSpec {
    /// Creates a builder.
    ///
    /// # Example
    ///
    /// ```rust
    /// use rigatoni_changestream::expander::{ChangeStreamSpec, FullDocumentMode};
    /// use bson::doc;
    ///
    /// let spec = ChangeStreamSpec::builder()
    ///     .full_document(FullDocumentMode::UpdateLookup)
    ///     .build();
    ///
    /// assert_eq!(spec.to_document(), doc! { "fullDocument": "updateLookup" });
    /// ```
    #[must_use]
    pub fn builder() -> ChangeStreamSpecBuilder {
        ChangeStreamSpecBuilder::default()
    }

    /// Returns the effective `fullDocument` mode.
    #[must_use]
    pub fn full_document_mode(&self) -> FullDocumentMode {
        self.full_document.unwrap_or_default()
    }

    /// Parses the option document (the value of `$changeStream`).
    ///
    /// # Errors
    ///
    /// - [`ChangeStreamError::UnrecognizedOption`] for an unknown key
    /// - [`ChangeStreamError::TypeMismatch`] for an option of the wrong type
    /// - [`ChangeStreamError::UnrecognizedFullDocument`] for an unknown mode
    /// - [`ChangeStreamError::MalformedToken`] for an undecodable `resumeAfter`
    pub fn parse(options: &Document) -> Result<Self, ChangeStreamError> {
        let mut spec = Self::default();

        for (name, value) in options {
            match name.as_str() {
                FULL_DOCUMENT_OPTION => {
                    let Bson::String(mode) = value else {
                        return Err(ChangeStreamError::type_mismatch(name.as_str(), "string", value));
                    };
                    let mode = FullDocumentMode::from_option(mode).ok_or_else(|| {
                        ChangeStreamError::UnrecognizedFullDocument {
                            value: mode.clone(),
                        }
                    })?;
                    spec.full_document = Some(mode);
                }
                RESUME_AFTER_OPTION => {
                    let Bson::Document(token) = value else {
                        return Err(ChangeStreamError::type_mismatch(name.as_str(), "object", value));
                    };
                    let token = ResumeToken::from_document(token).inspect_err(|e| {
                        warn!(error = %e, "Rejecting undecodable resume token");
                    })?;
                    spec.resume_after = Some(token);
                }
                _ => {
                    return Err(ChangeStreamError::UnrecognizedOption {
                        option: name.clone(),
                    })
                }
            }
        }

        Ok(spec)
    }

    /// Renders the explicitly set options.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut options = Document::new();
        if let Some(mode) = self.full_document {
            options.insert(FULL_DOCUMENT_OPTION, mode.as_str());
        }
        if let Some(token) = &self.resume_after {
            options.insert(RESUME_AFTER_OPTION, token.to_document());
        }
        options
    }
}

/// Builder for [`ChangeStreamSpec`].
#[derive(Debug, Default)]
pub struct ChangeStreamSpecBuilder {
    full_document: Option<FullDocumentMode>,
    resume_after: Option<ResumeToken>,
}

impl ChangeStreamSpecBuilder {
    /// Sets the `fullDocument` mode.
    #[must_use]
    pub fn full_document(mut self, mode: FullDocumentMode) -> Self {
        self.full_document = Some(mode);
        self
    }

    /// Sets the resume point.
    ///
    /// Events at or before this token are not returned.
    #[must_use]
    pub fn resume_after(mut self, token: ResumeToken) -> Self {
        self.resume_after = Some(token);
        self
    }

    /// Builds the [`ChangeStreamSpec`].
    #[must_use]
    pub fn build(self) -> ChangeStreamSpec {
        ChangeStreamSpec {
            full_document: self.full_document,
            resume_after: self.resume_after,
        }
    }
}

/// Replication mode of the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationMode {
    /// Standalone node; no oplog to stream from
    None,
    /// Replica set member
    ReplicaSet,
}

/// View of the node's replication state.
pub trait ReplicationCoordinator: Send + Sync {
    /// Returns the node's replication mode.
    fn replication_mode(&self) -> ReplicationMode {
        ReplicationMode::ReplicaSet
    }

    /// Returns the optime of the last applied oplog entry.
    fn last_applied_op_time(&self) -> OpTime;
}

/// Everything stage expansion needs to know about the deployment.
#[derive(Clone)]
pub struct ExpressionContext {
    /// Watched namespace
    pub ns: Namespace,

    /// Collation requested by the client. Change stream stages ignore it.
    pub collation: Option<Document>,

    replication_coordinator: Option<Arc<dyn ReplicationCoordinator>>,
    document_key_lookup: Arc<dyn DocumentKeyLookup>,
    post_image_lookup: Option<Arc<dyn PostImageLookup>>,
}

impl ExpressionContext {
    /// Creates a context for `ns` with no replication coordinator and no
    /// key metadata.
    #[must_use]
    pub fn new(ns: Namespace) -> Self {
        Self {
            ns,
            collation: None,
            replication_coordinator: None,
            document_key_lookup: Arc::new(NoKeyMetadata),
            post_image_lookup: None,
        }
    }

    /// Sets the replication coordinator.
    #[must_use]
    pub fn with_replication_coordinator(mut self, coordinator: Arc<dyn ReplicationCoordinator>) -> Self {
        self.replication_coordinator = Some(coordinator);
        self
    }

    /// Sets the document key metadata source.
    #[must_use]
    pub fn with_document_key_lookup(mut self, lookup: Arc<dyn DocumentKeyLookup>) -> Self {
        self.document_key_lookup = lookup;
        self
    }

    /// Sets the post-image source used by `fullDocument: "updateLookup"`.
    #[must_use]
    pub fn with_post_image_lookup(mut self, lookup: Arc<dyn PostImageLookup>) -> Self {
        self.post_image_lookup = Some(lookup);
        self
    }

    /// Sets the client collation.
    #[must_use]
    pub fn with_collation(mut self, collation: Document) -> Self {
        self.collation = Some(collation);
        self
    }

    fn replica_set_coordinator(&self) -> Option<&Arc<dyn ReplicationCoordinator>> {
        self.replication_coordinator
            .as_ref()
            .filter(|c| c.replication_mode() == ReplicationMode::ReplicaSet)
    }
}

impl fmt::Debug for ExpressionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionContext")
            .field("ns", &self.ns)
            .field("collation", &self.collation)
            .field("has_replication_coordinator", &self.replication_coordinator.is_some())
            .field("has_post_image_lookup", &self.post_image_lookup.is_some())
            .finish()
    }
}

/// Runtime chain of an opened change stream.
pub type ChangeStreamChain<I, M> = CloseCursorStage<TransformationStage<OplogMatchStage<I, M>>>;

/// The three stages a `$changeStream` stage expands into.
#[derive(Debug)]
pub struct ChangeStreamPipeline {
    oplog_match: OplogMatch,
    transformation: ChangeStreamTransformation,
    close_cursor: CloseCursor,
}

impl ChangeStreamPipeline {
    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> [&dyn StageDescriptor; 3] {
        [&self.oplog_match, &self.transformation, &self.close_cursor]
    }

    /// Returns the pre-filter stage.
    #[must_use]
    pub fn oplog_match(&self) -> &OplogMatch {
        &self.oplog_match
    }

    /// Returns the transformation stage.
    #[must_use]
    pub fn transformation(&self) -> &ChangeStreamTransformation {
        &self.transformation
    }

    /// Serializes the chain to stage documents.
    #[must_use]
    pub fn serialize(&self) -> Vec<Document> {
        self.stages()
            .iter()
            .filter_map(|stage| stage.serialize())
            .collect()
    }

    /// Connects the chain to a record source.
    ///
    /// `matcher` evaluates the pre-filter query against each record.
    pub fn open<I, M>(self, source: I, matcher: M) -> ChangeStreamChain<I::IntoIter, M>
    where
        I: IntoIterator<Item = LogRecord>,
        M: RecordMatcher,
    {
        let filtered = self.oplog_match.attach(source, matcher);
        let transformed = self.transformation.attach(filtered);
        self.close_cursor.attach(transformed)
    }
}

/// Expands a `{ $changeStream: { ... } }` stage document.
///
/// # Errors
///
/// - [`ChangeStreamError::InvalidStageSpec`] if `stage` is not a single
///   `$changeStream` field holding a document
/// - [`ChangeStreamError::NoReplicationCoordinator`] outside a replica set
/// - any option error from [`ChangeStreamSpec::parse`]
pub fn create_from_bson(
    stage: &Document,
    ctx: &ExpressionContext,
) -> Result<ChangeStreamPipeline, ChangeStreamError> {
    let options = stage_options(stage)?;

    let coordinator = ctx
        .replica_set_coordinator()
        .ok_or(ChangeStreamError::NoReplicationCoordinator)?;

    let spec = ChangeStreamSpec::parse(options)?;

    let start = match &spec.resume_after {
        Some(token) => StartPoint::AtOrAfter(token.decode()?.cluster_time),
        None => StartPoint::After(coordinator.last_applied_op_time().ts),
    };

    info!(
        ns = %ctx.ns,
        full_document = spec.full_document_mode().as_str(),
        resuming = spec.resume_after.is_some(),
        "Building change stream stages"
    );
    metrics::increment_stages_built();

    Ok(ChangeStreamPipeline {
        oplog_match: OplogMatch::new(&ctx.ns, start),
        transformation: ChangeStreamTransformation::new(
            ctx.ns.clone(),
            spec,
            Arc::clone(&ctx.document_key_lookup),
            ctx.post_image_lookup.clone(),
        ),
        close_cursor: CloseCursor,
    })
}

fn stage_options(stage: &Document) -> Result<&Document, ChangeStreamError> {
    let mut fields = stage.iter();
    let (Some((name, value)), None) = (fields.next(), fields.next()) else {
        return Err(ChangeStreamError::InvalidStageSpec(format!(
            "expected a single '{STAGE_NAME}' field, found {} fields",
            stage.len()
        )));
    };

    if name != STAGE_NAME {
        return Err(ChangeStreamError::InvalidStageSpec(format!(
            "expected '{STAGE_NAME}', found '{name}'"
        )));
    }

    match value {
        Bson::Document(options) => Ok(options),
        other => Err(ChangeStreamError::InvalidStageSpec(format!(
            "'{STAGE_NAME}' must be an object, found {:?}",
            other.element_type()
        ))),
    }
}

/// Builds the stage document for `spec`.
#[must_use]
pub fn stage_document(spec: &ChangeStreamSpec) -> Document {
    doc! { STAGE_NAME: spec.to_document() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CODE_FAILED_TO_PARSE, CODE_TYPE_MISMATCH};

    #[test]
    fn test_parse_empty() {
        let spec = ChangeStreamSpec::parse(&doc! {}).unwrap();
        assert_eq!(spec, ChangeStreamSpec::default());
        assert_eq!(spec.full_document_mode(), FullDocumentMode::Default);
        assert_eq!(spec.to_document(), doc! {});
    }

    #[test]
    fn test_explicit_default_round_trips() {
        let spec = ChangeStreamSpec::parse(&doc! { "fullDocument": "default" }).unwrap();
        assert_eq!(spec.full_document, Some(FullDocumentMode::Default));
        assert_eq!(spec.to_document(), doc! { "fullDocument": "default" });
    }

    #[test]
    fn test_resume_after_type_checked() {
        let err = ChangeStreamSpec::parse(&doc! { "resumeAfter": "abc" }).unwrap_err();
        assert_eq!(err.code(), CODE_TYPE_MISMATCH);
    }

    #[test]
    fn test_stage_shape() {
        for stage in [
            doc! {},
            doc! { "$match": {} },
            doc! { "$changeStream": 1 },
            doc! { "$changeStream": {}, "extra": 1 },
        ] {
            let err = stage_options(&stage).unwrap_err();
            assert_eq!(err.code(), CODE_FAILED_TO_PARSE);
            assert!(err.is_configuration());
        }
    }

    #[test]
    fn test_full_document_mode_names() {
        for mode in [FullDocumentMode::Default, FullDocumentMode::UpdateLookup] {
            assert_eq!(FullDocumentMode::from_option(mode.as_str()), Some(mode));
        }
        assert_eq!(FullDocumentMode::from_option("whenAvailable"), None);
    }
}
