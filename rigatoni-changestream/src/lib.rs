//! Rigatoni Change Stream - oplog to change event transformation core
//!
//! This crate turns raw replication log (oplog) records into the normalized,
//! resumable change events a `$changeStream` cursor returns, and enforces the
//! rule that a stream ends for good after an invalidating event.
//!
//! # Key Components
//!
//! - **Stage expansion**: [`expander`] parses `{ $changeStream: {...} }` and
//!   builds the pre-filter, transformation and close-cursor stages
//! - **Classification**: [`classifier`] decides which records become events
//! - **Transformation**: [`transform`] builds [`event::ChangeEvent`]s
//! - **Resume tokens**: [`resume_token`] encodes order-preserving tokens on
//!   top of the [`key_string`] value encoding
//! - **Document keys**: [`document_key`] projects collection key fields
//! - **Closure**: [`close_cursor`] and the [`stage`] plumbing propagate the
//!   closed signal to the cursor
//!
//! # Example
//!
//! ```rust
//! use rigatoni_changestream::expander::{create_from_bson, ExpressionContext, ReplicationCoordinator};
//! use rigatoni_changestream::namespace::Namespace;
//! use rigatoni_changestream::oplog::{LogRecord, OpTime, OpType};
//! use rigatoni_changestream::stage::{ChangeStreamCursor, MatchAll};
//! use bson::{doc, Timestamp};
//! use std::sync::Arc;
//!
//! struct Primary;
//!
//! impl ReplicationCoordinator for Primary {
//!     fn last_applied_op_time(&self) -> OpTime {
//!         OpTime::new(Timestamp { time: 1, increment: 0 }, 1)
//!     }
//! }
//!
//! let ns = Namespace::new("shop", "orders");
//! let ctx = ExpressionContext::new(ns.clone()).with_replication_coordinator(Arc::new(Primary));
//! let pipeline = create_from_bson(&doc! { "$changeStream": {} }, &ctx).unwrap();
//!
//! let optime = OpTime::new(Timestamp { time: 2, increment: 1 }, 1);
//! let records = vec![
//!     LogRecord::new(optime, OpType::Insert, &ns, doc! { "_id": 1, "total": 42 }),
//!     LogRecord::command(optime, "shop", doc! { "drop": "orders" }),
//! ];
//!
//! let mut cursor = ChangeStreamCursor::new(pipeline.open(records, MatchAll));
//! let events: Vec<_> = cursor.by_ref().map(|e| e.operation_type().as_str()).collect();
//!
//! assert_eq!(events, vec!["insert", "invalidate"]);
//! assert!(cursor.is_killed());
//! ```

pub mod classifier;
pub mod close_cursor;
pub mod document_key;
pub mod error;
pub mod event;
pub mod expander;
pub mod key_string;
pub mod metrics;
pub mod namespace;
pub mod oplog;
pub mod resume_token;
pub mod stage;
pub mod transform;

pub use error::ChangeStreamError;
pub use event::{ChangeEvent, OperationType};
pub use expander::{create_from_bson, ChangeStreamPipeline, ChangeStreamSpec};
