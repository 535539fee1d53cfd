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

//! Replay Oplog Example
//!
//! Replays a handful of raw oplog documents through a `$changeStream` chain
//! and prints the resulting change events, including the invalidate event
//! that closes the stream.
//!
//! # Running the Example
//!
//! ```bash
//! RUST_LOG=rigatoni_changestream=debug cargo run --example replay_oplog
//! ```

use bson::{doc, Document, Timestamp, Uuid};
use rigatoni_changestream::document_key::StaticKeyMetadata;
use rigatoni_changestream::expander::{create_from_bson, ExpressionContext, ReplicationCoordinator};
use rigatoni_changestream::namespace::Namespace;
use rigatoni_changestream::oplog::{LogRecord, OpTime};
use rigatoni_changestream::stage::{ChangeStreamCursor, MatchAll};
use std::error::Error;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

struct Primary;

impl ReplicationCoordinator for Primary {
    fn last_applied_op_time(&self) -> OpTime {
        OpTime::new(Timestamp { time: 1, increment: 0 }, 1)
    }
}

fn raw_oplog(uuid: Uuid) -> Vec<Document> {
    let ts = |increment| Timestamp {
        time: 1_700_000_000,
        increment,
    };
    vec![
        doc! { "ts": ts(1), "t": 1_i64, "op": "i", "ns": "shop.orders", "ui": uuid,
               "o": { "_id": 1, "region": "eu", "total": 40 } },
        doc! { "ts": ts(2), "t": 1_i64, "op": "u", "ns": "shop.orders", "ui": uuid,
               "o": { "$set": { "total": 42 } }, "o2": { "_id": 1, "region": "eu" } },
        doc! { "ts": ts(3), "t": 1_i64, "op": "n", "ns": "", "o": { "msg": "new primary" } },
        doc! { "ts": ts(4), "t": 1_i64, "op": "d", "ns": "shop.orders", "ui": uuid,
               "o": { "_id": 1, "region": "eu" } },
        doc! { "ts": ts(5), "t": 1_i64, "op": "c", "ns": "shop.$cmd", "ui": uuid,
               "o": { "drop": "orders" } },
        doc! { "ts": ts(6), "t": 1_i64, "op": "i", "ns": "shop.orders",
               "o": { "_id": 2, "region": "us" } },
    ]
}

fn main() -> Result<(), Box<dyn Error>> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let uuid = Uuid::from_bytes([0x5c; 16]);
    let key_metadata =
        StaticKeyMetadata::new().with_collection(uuid, vec!["region".into(), "_id".into()]);

    let ctx = ExpressionContext::new(Namespace::new("shop", "orders"))
        .with_replication_coordinator(Arc::new(Primary))
        .with_document_key_lookup(Arc::new(key_metadata));

    let pipeline = create_from_bson(&doc! { "$changeStream": {} }, &ctx)?;
    info!(query = %pipeline.oplog_match().query(), "Pre-filter query");

    let records = raw_oplog(uuid)
        .into_iter()
        .map(LogRecord::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let mut cursor = ChangeStreamCursor::new(pipeline.open(records, MatchAll));
    for event in cursor.by_ref() {
        println!("{}", event.to_document());
    }

    info!(
        returned = cursor.returned(),
        killed = cursor.is_killed(),
        "Cursor finished"
    );
    Ok(())
}
