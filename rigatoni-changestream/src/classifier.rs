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

//! Oplog record classification.
//!
//! [`classify`] decides, for one oplog record, which kind of change event it
//! becomes, or why it is dropped. Rules apply in priority order:
//!
//! 1. Records written by chunk migration (`fromMigrate: true`) are dropped.
//! 2. Noops become `retryNeeded` only when they carry the
//!    `migrateChunkToNewShard` marker for the watched namespace.
//! 3. Commands invalidate the stream when they drop the watched collection,
//!    drop its database, or rename a collection from or onto the watched
//!    namespace. Every other command is dropped.
//! 4. Inserts into `system.indexes` (legacy index builds) are dropped.
//! 5. CRUD records for other namespaces are dropped.
//! 6. Updates whose delta is a whole document are replacements; operator
//!    deltas are updates.
//!
//! Classification never fails. A record that matches no rule is suppressed.

use crate::event::OperationType;
use crate::namespace::Namespace;
use crate::oplog::{LogRecord, OpType};
use bson::{Bson, Document};

/// Marker type carried in `o2` of a noop that forces clients to restart.
pub const RETRY_MARKER_TYPE: &str = "migrateChunkToNewShard";

/// Why an invalidate event is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidateCause {
    /// The watched collection was dropped
    Drop,
    /// The watched collection's database was dropped
    DropDatabase,
    /// The watched collection was renamed, or another collection was renamed
    /// onto it
    Rename,
}

/// Kind of change event a record produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Document inserted
    Insert,
    /// Document modified with an operator delta
    Update,
    /// Document replaced wholesale
    Replace,
    /// Document deleted
    Delete,
    /// Stream invalidated; terminal
    Invalidate(InvalidateCause),
    /// Client must restart the stream; terminal
    RetryNeeded,
}

impl EventKind {
    /// Returns the public operation type for this kind.
    #[must_use]
    pub fn operation_type(&self) -> OperationType {
        match self {
            Self::Insert => OperationType::Insert,
            Self::Update => OperationType::Update,
            Self::Replace => OperationType::Replace,
            Self::Delete => OperationType::Delete,
            Self::Invalidate(_) => OperationType::Invalidate,
            Self::RetryNeeded => OperationType::RetryNeeded,
        }
    }

    /// Returns true if an event of this kind ends the stream.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Invalidate(_) | Self::RetryNeeded)
    }
}

/// Why a record produced no event.
///
/// The last two reasons are assigned by the transformer after
/// classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuppressionReason {
    /// Written by chunk migration
    FromMigrate,
    /// Noop without a retry marker for the watched namespace
    Noop,
    /// Command that does not invalidate the watched namespace
    Command,
    /// Legacy index build logged as an insert
    SystemIndexes,
    /// CRUD record for a namespace other than the watched one
    ForeignNamespace,
    /// Record lacks the payload needed to build its event
    MissingPayload,
    /// Document key holds a value that cannot be written into a token
    UnencodableKey,
    /// Event sorts at or before the stream's resume point
    BeforeResumePoint,
}

impl SuppressionReason {
    /// Returns the label value for metrics and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FromMigrate => "from_migrate",
            Self::Noop => "noop",
            Self::Command => "command",
            Self::SystemIndexes => "system_indexes",
            Self::ForeignNamespace => "foreign_namespace",
            Self::MissingPayload => "missing_payload",
            Self::UnencodableKey => "unencodable_key",
            Self::BeforeResumePoint => "before_resume_point",
        }
    }
}

/// Result of classifying one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// The record produces no event
    Suppressed(SuppressionReason),
    /// The record produces an event of the given kind
    Event(EventKind),
}

impl Classification {
    /// Returns the event kind, if any.
    #[must_use]
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::Event(kind) => Some(*kind),
            Self::Suppressed(_) => None,
        }
    }
}

/// Classifies `record` for a stream watching `watched`.
#[must_use]
pub fn classify(record: &LogRecord, watched: &Namespace) -> Classification {
    use Classification::{Event, Suppressed};

    if record.from_migrate {
        return Suppressed(SuppressionReason::FromMigrate);
    }

    let ns = record.namespace();
    match record.op {
        OpType::Noop => {
            if ns == *watched && has_retry_marker(record.object2.as_ref()) {
                Event(EventKind::RetryNeeded)
            } else {
                Suppressed(SuppressionReason::Noop)
            }
        }
        OpType::Command => match invalidate_cause(&ns, &record.object, watched) {
            Some(cause) => Event(EventKind::Invalidate(cause)),
            None => Suppressed(SuppressionReason::Command),
        },
        OpType::Insert if ns.is_system_indexes() => Suppressed(SuppressionReason::SystemIndexes),
        _ if ns != *watched => Suppressed(SuppressionReason::ForeignNamespace),
        OpType::Insert => Event(EventKind::Insert),
        OpType::Update => {
            if record.object2.is_none() {
                Suppressed(SuppressionReason::MissingPayload)
            } else if is_replacement(&record.object) {
                Event(EventKind::Replace)
            } else {
                Event(EventKind::Update)
            }
        }
        OpType::Delete => Event(EventKind::Delete),
    }
}

/// Returns true if an update delta is a full replacement document.
///
/// Operator deltas (`$set`, `$unset`, `$v`, ...) start with a `$` field.
#[must_use]
pub fn is_replacement(delta: &Document) -> bool {
    delta.keys().next().map_or(true, |name| !name.starts_with('$'))
}

fn has_retry_marker(object2: Option<&Document>) -> bool {
    matches!(
        object2.and_then(|o2| o2.get("type")),
        Some(Bson::String(t)) if t == RETRY_MARKER_TYPE
    )
}

fn invalidate_cause(ns: &Namespace, command: &Document, watched: &Namespace) -> Option<InvalidateCause> {
    let (name, value) = command.iter().next()?;
    match name.as_str() {
        "drop" => {
            let same_db = ns.db == watched.db;
            matches!(value, Bson::String(coll) if same_db && *coll == watched.coll)
                .then_some(InvalidateCause::Drop)
        }
        "dropDatabase" => (ns.db == watched.db).then_some(InvalidateCause::DropDatabase),
        "renameCollection" => {
            let watched_name = watched.full_name();
            let is_watched = |v: Option<&Bson>| matches!(v, Some(Bson::String(s)) if *s == watched_name);
            (is_watched(Some(value)) || is_watched(command.get("to")))
                .then_some(InvalidateCause::Rename)
        }
        _ => None,
    }
}
