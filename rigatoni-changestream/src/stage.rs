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

//! Pull-based stage plumbing.
//!
//! Change stream stages are evaluated lazily: each consumer calls
//! [`Stage::get_next`] on its upstream and receives a [`GetNext`]. Besides a
//! value or end-of-input, a stage can report [`GetNext::Closed`], meaning the
//! stream has ended for good. Every stage that pulls from an upstream must
//! forward `Closed` unchanged; the [`ChangeStreamCursor`] at the end of the
//! chain turns it into a killed cursor.
//!
//! This module also holds the first stage of every change stream, the oplog
//! pre-filter ([`OplogMatch`]), and [`EventFilter`], a generic downstream
//! filter standing in for client-supplied `$match` stages.

use crate::classifier::RETRY_MARKER_TYPE;
use crate::event::ChangeEvent;
use crate::expander::STAGE_NAME;
use crate::namespace::Namespace;
use crate::oplog::LogRecord;
use bson::{doc, Document, Timestamp};
use tracing::{debug, info};

/// Result of pulling from a stage.
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum GetNext<T> {
    /// A value was produced
    Advanced(T),
    /// No value is available right now
    Eof,
    /// The stream has been permanently closed
    Closed,
}

impl<T> GetNext<T> {
    /// Maps the produced value, forwarding `Eof` and `Closed`.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> GetNext<U> {
        match self {
            Self::Advanced(value) => GetNext::Advanced(f(value)),
            Self::Eof => GetNext::Eof,
            Self::Closed => GetNext::Closed,
        }
    }

    /// Returns true for the closed signal.
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns the produced value, if any.
    #[must_use]
    pub fn advanced(self) -> Option<T> {
        match self {
            Self::Advanced(value) => Some(value),
            Self::Eof | Self::Closed => None,
        }
    }
}

/// A pull-based pipeline stage.
pub trait Stage {
    /// Type of the values produced
    type Item;

    /// Produces the next value, reports end of input, or reports closure.
    fn get_next(&mut self) -> GetNext<Self::Item>;
}

impl<S: Stage + ?Sized> Stage for &mut S {
    type Item = S::Item;

    fn get_next(&mut self) -> GetNext<Self::Item> {
        (**self).get_next()
    }
}

impl<S: Stage + ?Sized> Stage for Box<S> {
    type Item = S::Item;

    fn get_next(&mut self) -> GetNext<Self::Item> {
        (**self).get_next()
    }
}

/// Static description of a stage produced by stage expansion.
pub trait StageDescriptor {
    /// Name the stage reports in explain output and error messages.
    fn source_name(&self) -> &'static str;

    /// Serialized stage document, or `None` if the stage is implied by
    /// another stage's serialization.
    fn serialize(&self) -> Option<Document>;
}

/// Black-box evaluator of pre-filter queries.
///
/// The query language belongs to the host's matching engine; the change
/// stream only builds the query and asks whether a record satisfies it.
pub trait RecordMatcher {
    /// Returns true if `record` satisfies `query`.
    fn matches(&self, query: &Document, record: &LogRecord) -> bool;
}

impl<F> RecordMatcher for F
where
    F: Fn(&Document, &LogRecord) -> bool,
{
    fn matches(&self, query: &Document, record: &LogRecord) -> bool {
        self(query, record)
    }
}

/// Matcher that accepts every record, leaving all filtering to the
/// transformation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchAll;

impl RecordMatcher for MatchAll {
    fn matches(&self, _query: &Document, _record: &LogRecord) -> bool {
        true
    }
}

/// Where the pre-filter starts reading the oplog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPoint {
    /// Strictly after the given time (the last applied optime)
    After(Timestamp),
    /// At or after the given time (a resume token's cluster time)
    AtOrAfter(Timestamp),
}

/// The oplog pre-filter stage.
///
/// Holds the match expression selecting every record that may produce an
/// event for the watched namespace. The query is built without a collation:
/// namespace and command names compare by the simple binary collation no
/// matter what the client asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct OplogMatch {
    query: Document,
}

impl OplogMatch {
    /// Builds the pre-filter for `ns` starting at `start`.
    #[must_use]
    pub fn new(ns: &Namespace, start: StartPoint) -> Self {
        Self {
            query: build_query(ns, start),
        }
    }

    /// Returns the match expression.
    #[must_use]
    pub fn query(&self) -> &Document {
        &self.query
    }

    /// Wraps a record source into a runtime stage applying this filter.
    pub fn attach<I, M>(self, source: I, matcher: M) -> OplogMatchStage<I::IntoIter, M>
    where
        I: IntoIterator<Item = LogRecord>,
        M: RecordMatcher,
    {
        OplogMatchStage {
            source: source.into_iter(),
            query: self.query,
            matcher,
        }
    }
}

impl StageDescriptor for OplogMatch {
    fn source_name(&self) -> &'static str {
        STAGE_NAME
    }

    fn serialize(&self) -> Option<Document> {
        None
    }
}

fn build_query(ns: &Namespace, start: StartPoint) -> Document {
    let ts = match start {
        StartPoint::After(ts) => doc! { "$gt": ts },
        StartPoint::AtOrAfter(ts) => doc! { "$gte": ts },
    };

    let full_name = ns.full_name();
    let crud = doc! { "ns": full_name.as_str(), "op": { "$in": ["i", "u", "d"] } };
    let invalidating = doc! {
        "op": "c",
        "ns": ns.command_ns().full_name(),
        "$or": [
            { "o.drop": ns.coll.as_str() },
            { "o.dropDatabase": { "$exists": true } },
            { "o.renameCollection": full_name.as_str() },
        ],
    };
    let rename_onto = doc! { "op": "c", "o.to": full_name.as_str() };
    let retry_needed = doc! {
        "op": "n",
        "ns": full_name.as_str(),
        "o2.type": RETRY_MARKER_TYPE,
    };

    doc! {
        "ts": ts,
        "$or": [crud, invalidating, rename_onto, retry_needed],
        "fromMigrate": { "$ne": true },
    }
}

/// Runtime form of [`OplogMatch`]: pulls records from a source and keeps
/// those accepted by the matcher.
#[derive(Debug)]
pub struct OplogMatchStage<I, M> {
    source: I,
    query: Document,
    matcher: M,
}

impl<I, M> Stage for OplogMatchStage<I, M>
where
    I: Iterator<Item = LogRecord>,
    M: RecordMatcher,
{
    type Item = LogRecord;

    fn get_next(&mut self) -> GetNext<LogRecord> {
        for record in self.source.by_ref() {
            if self.matcher.matches(&self.query, &record) {
                return GetNext::Advanced(record);
            }
        }
        GetNext::Eof
    }
}

/// Downstream filter over change events.
///
/// Discards events rejected by the predicate while forwarding `Eof` and
/// `Closed` untouched.
pub struct EventFilter<S, F> {
    upstream: S,
    predicate: F,
}

impl<S, F> EventFilter<S, F>
where
    S: Stage<Item = ChangeEvent>,
    F: FnMut(&ChangeEvent) -> bool,
{
    /// Creates a filter over `upstream`.
    pub fn new(upstream: S, predicate: F) -> Self {
        Self {
            upstream,
            predicate,
        }
    }
}

impl<S, F> Stage for EventFilter<S, F>
where
    S: Stage<Item = ChangeEvent>,
    F: FnMut(&ChangeEvent) -> bool,
{
    type Item = ChangeEvent;

    fn get_next(&mut self) -> GetNext<ChangeEvent> {
        loop {
            match self.upstream.get_next() {
                GetNext::Advanced(event) => {
                    if (self.predicate)(&event) {
                        return GetNext::Advanced(event);
                    }
                }
                other => return other,
            }
        }
    }
}

/// Cursor over a change stream chain.
///
/// Yields events as an [`Iterator`]. `Eof` ends the current batch; the
/// cursor may be iterated again once the source has more records. `Closed`
/// kills the cursor: iteration ends and every later call returns `None`.
#[derive(Debug)]
pub struct ChangeStreamCursor<S> {
    stage: S,
    killed: bool,
    returned: u64,
}

impl<S> ChangeStreamCursor<S>
where
    S: Stage<Item = ChangeEvent>,
{
    /// Creates a cursor over the last stage of a chain.
    pub fn new(stage: S) -> Self {
        Self {
            stage,
            killed: false,
            returned: 0,
        }
    }

    /// Returns true once the stream has been closed.
    #[inline]
    pub fn is_killed(&self) -> bool {
        self.killed
    }

    /// Returns the number of events returned so far.
    #[inline]
    pub fn returned(&self) -> u64 {
        self.returned
    }
}

impl<S> Iterator for ChangeStreamCursor<S>
where
    S: Stage<Item = ChangeEvent>,
{
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<ChangeEvent> {
        if self.killed {
            return None;
        }
        match self.stage.get_next() {
            GetNext::Advanced(event) => {
                self.returned += 1;
                Some(event)
            }
            GetNext::Eof => {
                debug!(returned = self.returned, "Change stream batch exhausted");
                None
            }
            GetNext::Closed => {
                info!(returned = self.returned, "Change stream closed, killing cursor");
                self.killed = true;
                None
            }
        }
    }
}
