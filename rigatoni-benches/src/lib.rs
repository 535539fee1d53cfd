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

//! Shared fixtures for the change stream benchmarks.

use bson::{doc, Timestamp, Uuid};
use rigatoni_changestream::expander::{ExpressionContext, ReplicationCoordinator};
use rigatoni_changestream::namespace::Namespace;
use rigatoni_changestream::oplog::{LogRecord, OpTime, OpType};
use std::sync::Arc;

/// Collection UUID used by every generated record.
pub const BENCH_UUID: [u8; 16] = [0xAB; 16];

/// Replication coordinator reporting a fixed last applied optime.
pub struct BenchCoordinator;

impl ReplicationCoordinator for BenchCoordinator {
    fn last_applied_op_time(&self) -> OpTime {
        OpTime::new(Timestamp { time: 0, increment: 0 }, 1)
    }
}

/// Namespace watched by the benchmarks.
pub fn watched_ns() -> Namespace {
    Namespace::new("bench_db", "orders")
}

/// Expression context for the watched namespace with `_id` + shard key
/// metadata.
pub fn bench_context() -> ExpressionContext {
    let lookup = |_: &Uuid| vec!["region".to_string(), "_id".to_string()];
    ExpressionContext::new(watched_ns())
        .with_replication_coordinator(Arc::new(BenchCoordinator))
        .with_document_key_lookup(Arc::new(lookup))
}

/// Generates `count` CRUD records for the watched namespace.
///
/// The mix is roughly half inserts, a quarter operator updates and the rest
/// split between replacements and deletes. Every tenth record is a
/// migration write that the stream suppresses.
pub fn crud_records(count: usize) -> Vec<LogRecord> {
    let ns = watched_ns();
    let uuid = Uuid::from_bytes(BENCH_UUID);

    (0..count)
        .map(|i| {
            let id = i as i64;
            let optime = OpTime::new(
                Timestamp {
                    time: 1_000 + (i / 100) as u32,
                    increment: (i % 100) as u32,
                },
                1,
            );
            let region = ["eu", "us", "ap"][i % 3];
            let key = doc! { "_id": id, "region": region };

            let record = match i % 8 {
                0..=3 => LogRecord::new(
                    optime,
                    OpType::Insert,
                    &ns,
                    doc! {
                        "_id": id,
                        "region": region,
                        "customer": format!("customer_{}", i % 1000),
                        "total": (i % 500) as i32,
                        "items": [{ "sku": "A-1", "qty": 2 }, { "sku": "B-7", "qty": 1 }],
                    },
                ),
                4 | 5 => LogRecord::new(
                    optime,
                    OpType::Update,
                    &ns,
                    doc! { "$set": { "status": "shipped" }, "$unset": { "draft": true } },
                )
                .with_object2(key),
                6 => LogRecord::new(
                    optime,
                    OpType::Update,
                    &ns,
                    doc! { "_id": id, "region": region, "total": 0 },
                )
                .with_object2(key),
                _ => LogRecord::new(optime, OpType::Delete, &ns, key),
            };

            record.with_uuid(uuid).with_from_migrate(i % 10 == 9)
        })
        .collect()
}
