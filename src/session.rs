// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-session state threaded through every intercepted phase.
//!
//! Each client session gets its own [`SessionContext`]: its own nesting depth
//! and its own statement sink (and therefore its own connection cache).
//! Sessions share nothing mutable.

use crate::intercept::NestingDepth;
use crate::replay::StatementSink;

/// State for one client session.
pub struct SessionContext {
    depth: NestingDepth,
    sink: Box<dyn StatementSink>,
}

impl SessionContext {
    pub fn new(sink: Box<dyn StatementSink>) -> Self {
        Self {
            depth: NestingDepth::new(),
            sink,
        }
    }

    /// The session's nesting depth.
    pub fn depth(&self) -> &NestingDepth {
        &self.depth
    }

    /// Hand a top-level statement to the session's sink.
    pub fn broadcast(&mut self, statement: &str) {
        self.sink.broadcast(statement);
    }

    /// Make the next broadcast re-read the target registry.
    pub fn invalidate_targets(&mut self) {
        self.sink.invalidate();
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("depth", &self.depth.get())
            .finish_non_exhaustive()
    }
}
