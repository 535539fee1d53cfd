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

//! Terminal state machine closing a change stream.
//!
//! The close-cursor stage sits after the transformation. It forwards every
//! event, and after forwarding an `invalidate` or `retryNeeded` event it
//! moves to [`StreamState::Closed`]. From then on every pull returns
//! [`GetNext::Closed`] without touching upstream again:
//!
//! ```text
//!            event (non-terminal)
//!           ┌──────┐
//!           ▼      │
//!        ┌────────┐    invalidate / retryNeeded   ┌────────┐
//!  ────▶ │  Open  │ ────────────────────────────▶ │ Closed │ ──▶ GetNext::Closed
//!        └────────┘      (event forwarded)        └────────┘      on every pull
//! ```

use crate::event::ChangeEvent;
use crate::expander::STAGE_NAME;
use crate::metrics;
use crate::stage::{GetNext, Stage, StageDescriptor};
use bson::Document;
use tracing::info;

/// State of one change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    /// Events flow
    #[default]
    Open,
    /// A terminal event was delivered; no further events will be produced
    Closed,
}

/// The close-cursor stage as produced by stage expansion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseCursor;

impl CloseCursor {
    /// Wraps `upstream` into the runtime state machine.
    pub fn attach<S>(self, upstream: S) -> CloseCursorStage<S>
    where
        S: Stage<Item = ChangeEvent>,
    {
        CloseCursorStage::new(upstream)
    }
}

impl StageDescriptor for CloseCursor {
    fn source_name(&self) -> &'static str {
        STAGE_NAME
    }

    fn serialize(&self) -> Option<Document> {
        None
    }
}

/// Runtime close-cursor stage.
#[derive(Debug)]
pub struct CloseCursorStage<S> {
    upstream: S,
    state: StreamState,
}

impl<S> CloseCursorStage<S>
where
    S: Stage<Item = ChangeEvent>,
{
    /// Creates an open stage over `upstream`.
    pub fn new(upstream: S) -> Self {
        Self {
            upstream,
            state: StreamState::Open,
        }
    }

    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> StreamState {
        self.state
    }
}

impl<S> Stage for CloseCursorStage<S>
where
    S: Stage<Item = ChangeEvent>,
{
    type Item = ChangeEvent;

    fn get_next(&mut self) -> GetNext<ChangeEvent> {
        if self.state == StreamState::Closed {
            return GetNext::Closed;
        }

        match self.upstream.get_next() {
            GetNext::Advanced(event) => {
                if event.is_terminal() {
                    let operation = event.operation_type().as_str();
                    info!(operation, token = %event.resume_token(), "Closing change stream");
                    metrics::increment_streams_closed(operation);
                    self.state = StreamState::Closed;
                }
                GetNext::Advanced(event)
            }
            GetNext::Eof => GetNext::Eof,
            GetNext::Closed => {
                self.state = StreamState::Closed;
                GetNext::Closed
            }
        }
    }
}
