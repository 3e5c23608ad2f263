// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Statement nesting depth.
//!
//! Depth 0 means no intercepted phase is running in the session. Every phase
//! that can trigger further phases holds a [`DepthGuard`] while it runs, so a
//! statement fired by a trigger or constraint sees depth >= 1 and an outer,
//! client-issued statement sees 0 once it returns.
//!
//! The guard decrements on drop, which covers normal return, early `?` return
//! and unwinding.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A session's nesting depth counter.
///
/// Clones share the same counter. A session owns one; guards hold a clone so
/// the session context stays free to be passed down the chain.
#[derive(Debug, Clone, Default)]
pub struct NestingDepth(Arc<AtomicU32>);

impl NestingDepth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current depth.
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn is_top_level(&self) -> bool {
        self.get() == 0
    }

    /// Increment and return a guard that undoes it.
    #[must_use = "dropping the guard immediately leaves the phase"]
    pub fn enter(&self) -> DepthGuard {
        self.0.fetch_add(1, Ordering::AcqRel);
        DepthGuard {
            depth: self.clone(),
            released: false,
        }
    }

    fn leave(&self) -> u32 {
        self.0.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

/// One level of nesting, held for the duration of a phase.
#[derive(Debug)]
pub struct DepthGuard {
    depth: NestingDepth,
    released: bool,
}

impl DepthGuard {
    /// Leave the phase now and return the depth after leaving.
    pub fn release(mut self) -> u32 {
        self.released = true;
        self.depth.leave()
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        if !self.released {
            self.depth.leave();
        }
    }
}
