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

//! Namespaces (`database.collection`) as they appear in oplog records.
//!
//! Oplog records identify their target with a single dotted string. Commands
//! are logged against the database's command namespace (`mydb.$cmd`) and, on
//! older servers, index builds are logged as inserts into
//! `mydb.system.indexes`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Collection name used for command oplog entries.
pub const COMMAND_COLLECTION: &str = "$cmd";

/// Collection that receives index specifications on legacy index builds.
pub const SYSTEM_INDEXES_COLLECTION: &str = "system.indexes";

/// A `MongoDB` namespace (database + collection).
///
/// Serializes as `{ db, coll }`, the shape used in the `ns` field of
/// change events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    /// Database name
    pub db: String,

    /// Collection name (may contain dots, e.g. `system.indexes`)
    pub coll: String,
}

impl Namespace {
    /// Creates a new namespace from database and collection names.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// Parses a dotted namespace string.
    ///
    /// The database name ends at the first dot; everything after it is the
    /// collection name. A string without a dot names a database with an
    /// empty collection.
    ///
    /// ```rust
    /// use rigatoni_changestream::namespace::Namespace;
    ///
    /// let ns = Namespace::parse("shop.system.indexes");
    /// assert_eq!(ns.db, "shop");
    /// assert_eq!(ns.coll, "system.indexes");
    /// ```
    #[must_use]
    pub fn parse(full_name: &str) -> Self {
        match full_name.split_once('.') {
            Some((db, coll)) => Self::new(db, coll),
            None => Self::new(full_name, ""),
        }
    }

    /// Returns the fully qualified namespace as "db.coll", or just "db" when
    /// the collection is empty.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.coll.is_empty() {
            self.db.clone()
        } else {
            format!("{}.{}", self.db, self.coll)
        }
    }

    /// Returns the command namespace (`db.$cmd`) of this namespace's database.
    #[must_use]
    pub fn command_ns(&self) -> Self {
        Self::new(self.db.clone(), COMMAND_COLLECTION)
    }

    /// Returns the legacy index catalog namespace of this namespace's database.
    #[must_use]
    pub fn system_indexes_ns(&self) -> Self {
        Self::new(self.db.clone(), SYSTEM_INDEXES_COLLECTION)
    }

    /// Returns true if this is a command namespace.
    #[inline]
    pub fn is_command(&self) -> bool {
        self.coll == COMMAND_COLLECTION
    }

    /// Returns true if this is the legacy index catalog namespace.
    #[inline]
    pub fn is_system_indexes(&self) -> bool {
        self.coll == SYSTEM_INDEXES_COLLECTION
    }

    /// Returns true if the database part is empty.
    ///
    /// Noop entries such as "new primary" messages carry an empty namespace.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let ns = Namespace::parse("unittests.change_stream");
        assert_eq!(ns, Namespace::new("unittests", "change_stream"));
        assert_eq!(ns.full_name(), "unittests.change_stream");
        assert_eq!(ns.to_string(), "unittests.change_stream");
    }

    #[test]
    fn test_parse_without_collection() {
        let ns = Namespace::parse("admin");
        assert_eq!(ns.db, "admin");
        assert_eq!(ns.coll, "");
        assert_eq!(ns.full_name(), "admin");

        assert!(Namespace::parse("").is_empty());
    }

    #[test]
    fn test_special_namespaces() {
        let ns = Namespace::new("unittests", "change_stream");

        let cmd = ns.command_ns();
        assert_eq!(cmd.full_name(), "unittests.$cmd");
        assert!(cmd.is_command());
        assert!(!ns.is_command());

        let indexes = ns.system_indexes_ns();
        assert_eq!(indexes.full_name(), "unittests.system.indexes");
        assert!(indexes.is_system_indexes());
        assert_eq!(Namespace::parse("unittests.system.indexes"), indexes);
    }

    #[test]
    fn test_serializes_as_db_coll() {
        let doc = bson::to_document(&Namespace::new("a", "b")).unwrap();
        assert_eq!(doc, bson::doc! { "db": "a", "coll": "b" });
    }
}
