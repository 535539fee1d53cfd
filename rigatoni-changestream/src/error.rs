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

//! Error types for change stream construction and resumption.
//!
//! Errors here are raised synchronously, either while a `$changeStream`
//! stage is being built or while a resume token is decoded. Processing a
//! log record never fails: records that do not fit an expected shape are
//! suppressed instead.
//!
//! A closed stream is not an error. Stages report it as
//! [`GetNext::Closed`](crate::stage::GetNext).

use thiserror::Error;

/// Server error code for an unrecognized `$changeStream` option.
pub const CODE_UNRECOGNIZED_OPTION: i32 = 40415;

/// Server error code for a wrongly typed option value.
pub const CODE_TYPE_MISMATCH: i32 = 14;

/// Server error code for an unsupported `fullDocument` mode.
pub const CODE_UNRECOGNIZED_FULL_DOCUMENT: i32 = 40575;

/// Server error code for a change stream opened outside a replica set.
pub const CODE_NO_REPLICATION: i32 = 40573;

/// Server error code for input that could not be parsed.
pub const CODE_FAILED_TO_PARSE: i32 = 9;

/// Errors that can occur while building or resuming a change stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangeStreamError {
    /// The stage specification contains a key the parser does not know.
    #[error("unrecognized option to $changeStream: {option}")]
    UnrecognizedOption {
        /// The offending option name
        option: String,
    },

    /// An option has the wrong BSON type.
    #[error("$changeStream option '{field}' must be of type {expected}, found {found}")]
    TypeMismatch {
        /// Option name
        field: String,
        /// Expected BSON type name
        expected: &'static str,
        /// Actual BSON type name
        found: String,
    },

    /// `fullDocument` holds a string outside the supported set.
    #[error("unrecognized value for 'fullDocument' option: '{value}'")]
    UnrecognizedFullDocument {
        /// The rejected mode
        value: String,
    },

    /// The stage document is not of the form `{ $changeStream: { ... } }`.
    #[error("invalid $changeStream stage specification: {0}")]
    InvalidStageSpec(String),

    /// The deployment has no replication coordinator.
    #[error("the $changeStream stage is only supported on replica sets")]
    NoReplicationCoordinator,

    /// A resume token could not be decoded.
    #[error("malformed resume token: {0}")]
    MalformedToken(String),

    /// A value could not be written into a resume token.
    #[error("cannot encode resume token: {0}")]
    TokenEncoding(String),

    /// A raw oplog document could not be converted into a log record.
    #[error("invalid oplog record: {0}")]
    InvalidLogRecord(String),
}

impl ChangeStreamError {
    /// Returns the server-compatible numeric error code.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::UnrecognizedOption { .. } => CODE_UNRECOGNIZED_OPTION,
            Self::TypeMismatch { .. } => CODE_TYPE_MISMATCH,
            Self::UnrecognizedFullDocument { .. } => CODE_UNRECOGNIZED_FULL_DOCUMENT,
            Self::NoReplicationCoordinator => CODE_NO_REPLICATION,
            Self::InvalidStageSpec(_)
            | Self::MalformedToken(_)
            | Self::TokenEncoding(_)
            | Self::InvalidLogRecord(_) => CODE_FAILED_TO_PARSE,
        }
    }

    /// Returns the error category for metrics/logging.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnrecognizedOption { .. }
            | Self::TypeMismatch { .. }
            | Self::UnrecognizedFullDocument { .. }
            | Self::InvalidStageSpec(_) => "configuration",
            Self::NoReplicationCoordinator => "precondition",
            Self::MalformedToken(_) => "malformed_token",
            Self::TokenEncoding(_) => "token_encoding",
            Self::InvalidLogRecord(_) => "invalid_record",
        }
    }

    /// Returns true if the error was caused by the user-supplied options.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        self.category() == "configuration"
    }

    pub(crate) fn type_mismatch(
        field: impl Into<String>,
        expected: &'static str,
        found: &bson::Bson,
    ) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected,
            found: format!("{:?}", found.element_type()),
        }
    }
}

impl From<bson::de::Error> for ChangeStreamError {
    fn from(err: bson::de::Error) -> Self {
        Self::InvalidLogRecord(err.to_string())
    }
}
