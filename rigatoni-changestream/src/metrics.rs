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

//! Metrics instrumentation for change stream transformation.
//!
//! This module records what the transformation core does with each oplog
//! record. It uses the `metrics` crate facade, so any exporter (Prometheus,
//! StatsD, ...) installed by the host application receives the values; with
//! no recorder installed every call is a no-op.
//!
//! # Naming Conventions
//!
//! All metrics follow Prometheus naming conventions:
//! - Use underscores (not hyphens or camelCase)
//! - Prefix with application name (rigatoni\_changestream\_)
//! - Counter metrics end with \_total
//!
//! # Labels
//!
//! Every label has a small, fixed value set:
//! - **operation**: change event type (`insert`, `update`, `invalidate`, ...)
//! - **reason**: why a record was suppressed (see [`SuppressionReason`])
//! - **result**: how a document key field list was obtained
//!
//! # Examples
//!
//! ```rust
//! use rigatoni_changestream::classifier::SuppressionReason;
//! use rigatoni_changestream::metrics;
//!
//! metrics::init_metrics();
//! metrics::increment_events_emitted("insert");
//! metrics::increment_records_suppressed(SuppressionReason::FromMigrate);
//! ```

use crate::classifier::SuppressionReason;
use metrics::{counter, describe_counter};

/// Metric name prefix for all change stream metrics.
#[doc(hidden)]
pub const METRIC_PREFIX: &str = "rigatoni_changestream";

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Total number of change events produced by the transformation.
///
/// Type: Counter
/// Labels: operation
#[doc(hidden)]
pub const EVENTS_EMITTED_TOTAL: &str = "rigatoni_changestream_events_emitted_total";

/// Total number of oplog records that produced no event.
///
/// Type: Counter
/// Labels: reason
#[doc(hidden)]
pub const RECORDS_SUPPRESSED_TOTAL: &str = "rigatoni_changestream_records_suppressed_total";

/// Total number of streams closed by a terminal event.
///
/// Type: Counter
/// Labels: operation
#[doc(hidden)]
pub const STREAMS_CLOSED_TOTAL: &str = "rigatoni_changestream_streams_closed_total";

/// Total number of document key field resolutions.
///
/// Type: Counter
/// Labels: result (cached, fetched, fallback)
#[doc(hidden)]
pub const DOCUMENT_KEY_LOOKUPS_TOTAL: &str = "rigatoni_changestream_document_key_lookups_total";

/// Total number of `$changeStream` stages successfully expanded.
///
/// Type: Counter
#[doc(hidden)]
pub const STAGES_BUILT_TOTAL: &str = "rigatoni_changestream_stages_built_total";

/// Outcome of resolving the document key fields of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLookupResult {
    /// Served from the per-stream cache
    Cached,
    /// Returned by the lookup capability
    Fetched,
    /// No metadata; the legacy fallback was used
    Fallback,
}

impl KeyLookupResult {
    /// Returns the label value for this result.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Fetched => "fetched",
            Self::Fallback => "fallback",
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Registers metric descriptions with the installed recorder.
///
/// Call once at startup, after installing an exporter.
pub fn init_metrics() {
    describe_counter!(
        EVENTS_EMITTED_TOTAL,
        "Total number of change events produced from oplog records"
    );

    describe_counter!(
        RECORDS_SUPPRESSED_TOTAL,
        "Total number of oplog records filtered out by the change stream"
    );

    describe_counter!(
        STREAMS_CLOSED_TOTAL,
        "Total number of change streams closed after an invalidate or retryNeeded event"
    );

    describe_counter!(
        DOCUMENT_KEY_LOOKUPS_TOTAL,
        "Total number of document key field resolutions by outcome"
    );

    describe_counter!(
        STAGES_BUILT_TOTAL,
        "Total number of $changeStream stages expanded into execution stages"
    );
}

// ============================================================================
// Counter Metrics
// ============================================================================

/// Increments the count of emitted events.
///
/// # Arguments
///
/// * `operation` - Operation type of the event: "insert", "update", etc.
pub fn increment_events_emitted(operation: &'static str) {
    counter!(EVENTS_EMITTED_TOTAL, "operation" => operation).increment(1);
}

/// Increments the count of suppressed records.
pub fn increment_records_suppressed(reason: SuppressionReason) {
    counter!(RECORDS_SUPPRESSED_TOTAL, "reason" => reason.as_str()).increment(1);
}

/// Increments the count of closed streams.
///
/// # Arguments
///
/// * `operation` - Operation type of the terminal event
pub fn increment_streams_closed(operation: &'static str) {
    counter!(STREAMS_CLOSED_TOTAL, "operation" => operation).increment(1);
}

/// Increments the count of document key field resolutions.
pub fn increment_document_key_lookups(result: KeyLookupResult) {
    counter!(DOCUMENT_KEY_LOOKUPS_TOTAL, "result" => result.as_str()).increment(1);
}

/// Increments the count of expanded stages.
pub fn increment_stages_built() {
    counter!(STAGES_BUILT_TOTAL).increment(1);
}
