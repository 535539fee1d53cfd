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

//! Tests for change event types and their wire shape.

use bson::{doc, Bson, Timestamp};
use rigatoni_changestream::event::{ChangeEvent, OperationType, PostImage, UpdateDescription};
use rigatoni_changestream::namespace::Namespace;
use rigatoni_changestream::resume_token::{ResumeToken, ResumeTokenData};

fn token(key: Option<i32>) -> ResumeToken {
    let data = ResumeTokenData::new(Timestamp {
        time: 1_700_000_000,
        increment: 4,
    });
    let data = match key {
        Some(id) => data.with_document_key(Bson::Document(doc! { "_id": id })),
        None => data,
    };
    data.encode().unwrap()
}

#[test]
fn test_operation_type_serialization() {
    let op = OperationType::Insert;
    let json = serde_json::to_string(&op).unwrap();
    assert_eq!(json, r#""insert""#);

    let deserialized: OperationType = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized, OperationType::Insert);

    let retry = serde_json::to_string(&OperationType::RetryNeeded).unwrap();
    assert_eq!(retry, r#""retryNeeded""#);
}

#[test]
fn test_operation_type_wire_names_match_serde() {
    for op in [
        OperationType::Insert,
        OperationType::Update,
        OperationType::Replace,
        OperationType::Delete,
        OperationType::Invalidate,
        OperationType::RetryNeeded,
    ] {
        let json = serde_json::to_string(&op).unwrap();
        assert_eq!(json, format!("\"{}\"", op.as_str()));
    }
}

#[test]
fn test_operation_type_predicates() {
    assert!(OperationType::Insert.is_data_modification());
    assert!(OperationType::Update.is_data_modification());
    assert!(OperationType::Replace.is_data_modification());
    assert!(!OperationType::Delete.is_data_modification());

    assert!(OperationType::Invalidate.is_terminal());
    assert!(OperationType::RetryNeeded.is_terminal());
    assert!(!OperationType::Delete.is_terminal());
}

#[test]
fn test_change_event_insert() {
    let event = ChangeEvent::Insert {
        id: token(Some(123)),
        ns: Namespace::new("testdb", "users"),
        document_key: doc! { "_id": 123 },
        full_document: doc! {
            "_id": 123,
            "name": "Alice",
            "email": "alice@example.com"
        },
    };

    assert!(event.is_insert());
    assert!(!event.is_terminal());
    assert_eq!(event.namespace().unwrap().full_name(), "testdb.users");
    assert_eq!(event.document_id(), Some(&Bson::Int32(123)));
    assert_eq!(
        event.cluster_time(),
        Some(Timestamp {
            time: 1_700_000_000,
            increment: 4
        })
    );

    let rendered = event.to_document();
    assert_eq!(
        rendered,
        doc! {
            "_id": token(Some(123)).to_document(),
            "operationType": "insert",
            "fullDocument": { "_id": 123, "name": "Alice", "email": "alice@example.com" },
            "ns": { "db": "testdb", "coll": "users" },
            "documentKey": { "_id": 123 },
        }
    );
}

#[test]
fn test_change_event_update() {
    let event = ChangeEvent::Update {
        id: token(Some(456)),
        ns: Namespace::new("testdb", "users"),
        document_key: doc! { "_id": 456 },
        update_description: UpdateDescription::from_delta(&doc! {
            "$set": { "email": "new@example.com" },
            "$unset": { "phone": "" },
        }),
        full_document: PostImage::NotRequested,
    };

    assert_eq!(event.operation_type(), OperationType::Update);
    assert_eq!(event.full_document(), None);

    let rendered: bson::Document = event.into();
    assert_eq!(
        rendered.get_document("updateDescription").unwrap(),
        &doc! {
            "updatedFields": { "email": "new@example.com" },
            "removedFields": ["phone"],
        }
    );
    assert!(!rendered.contains_key("fullDocument"));
}

#[test]
fn test_change_event_delete_has_no_full_document() {
    let event = ChangeEvent::Delete {
        id: token(Some(789)),
        ns: Namespace::new("testdb", "users"),
        document_key: doc! { "_id": 789 },
    };

    let keys: Vec<String> = event.to_document().keys().cloned().collect();
    assert_eq!(keys, ["_id", "operationType", "ns", "documentKey"]);
}

#[test]
fn test_invalidate_event_shape() {
    let event = ChangeEvent::Invalidate { id: token(None) };

    assert!(event.is_invalidate());
    assert!(event.is_terminal());
    assert_eq!(event.document_key(), None);
    assert_eq!(event.document_id(), None);
    assert_eq!(
        event.to_document(),
        doc! { "_id": token(None).to_document(), "operationType": "invalidate" }
    );
}

#[test]
fn test_update_description_serde_names() {
    let desc = UpdateDescription {
        updated_fields: doc! { "a": 1 },
        removed_fields: vec!["b".to_string()],
    };
    let json = serde_json::to_value(&desc).unwrap();
    assert_eq!(json["removedFields"][0], "b");
    assert_eq!(json["updatedFields"]["a"], 1);
}
