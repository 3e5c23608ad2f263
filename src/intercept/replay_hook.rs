// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The replay interceptor.
//!
//! Wraps all five phases to keep the session's nesting depth, and hands
//! top-level statements to the session's sink:
//!
//! | Phase            | Depth bookkeeping | Broadcast at depth 0         |
//! |------------------|-------------------|------------------------------|
//! | planner          | yes               | configured placeholder       |
//! | executor start   | yes               | no                           |
//! | executor run     | yes               | no                           |
//! | executor end     | yes               | no                           |
//! | process utility  | yes               | original query string        |
//!
//! When the switch is off every phase delegates untouched.

use super::{CursorOptions, HostEngine, Interceptor, Next, ScanDirection, UtilityContext};
use crate::metrics;
use crate::session::SessionContext;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Runtime enable/disable switch, shared by the extension and its interceptor.
#[derive(Debug, Clone)]
pub struct ReplaySwitch(Arc<AtomicBool>);

impl ReplaySwitch {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        let was = self.0.swap(enabled, Ordering::AcqRel);
        if was != enabled {
            info!(enabled, "Statement replay switched");
        }
    }
}

impl Default for ReplaySwitch {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Detects top-level statements and broadcasts them.
#[derive(Debug, Clone)]
pub struct ReplayInterceptor {
    switch: ReplaySwitch,
    planner_placeholder: String,
}

impl ReplayInterceptor {
    pub fn new(switch: ReplaySwitch, planner_placeholder: impl Into<String>) -> Self {
        Self {
            switch,
            planner_placeholder: planner_placeholder.into(),
        }
    }

    pub fn switch(&self) -> &ReplaySwitch {
        &self.switch
    }
}

impl<H: HostEngine> Interceptor<H> for ReplayInterceptor {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn planner(
        &self,
        next: Next<'_, H>,
        ctx: &mut SessionContext,
        query: &H::Query,
        cursor_options: CursorOptions,
    ) -> Result<H::Plan, H::Error> {
        if !self.switch.is_enabled() {
            return next.planner(ctx, query, cursor_options);
        }

        let guard = ctx.depth().enter();
        let plan = next.planner(ctx, query, cursor_options)?;
        if guard.release() == 0 {
            // TODO: deparse the query tree and send the real statement once a deparser exists
            info!(statement = %self.planner_placeholder, "Planner called for top-level statement");
            metrics::record_top_level_statement("planner");
            ctx.broadcast(&self.planner_placeholder);
        }
        Ok(plan)
    }

    fn executor_start(
        &self,
        next: Next<'_, H>,
        ctx: &mut SessionContext,
        desc: &mut H::QueryDesc,
        eflags: u32,
    ) -> Result<(), H::Error> {
        if !self.switch.is_enabled() {
            return next.executor_start(ctx, desc, eflags);
        }

        let _guard = ctx.depth().enter();
        next.executor_start(ctx, desc, eflags)
    }

    fn executor_run(
        &self,
        next: Next<'_, H>,
        ctx: &mut SessionContext,
        desc: &mut H::QueryDesc,
        direction: ScanDirection,
        count: u64,
    ) -> Result<(), H::Error> {
        if !self.switch.is_enabled() {
            return next.executor_run(ctx, desc, direction, count);
        }

        let _guard = ctx.depth().enter();
        next.executor_run(ctx, desc, direction, count)
    }

    fn executor_end(&self, next: Next<'_, H>, ctx: &mut SessionContext, desc: &mut H::QueryDesc) -> Result<(), H::Error> {
        if !self.switch.is_enabled() {
            return next.executor_end(ctx, desc);
        }

        let _guard = ctx.depth().enter();
        next.executor_end(ctx, desc)
    }

    fn process_utility(
        &self,
        next: Next<'_, H>,
        ctx: &mut SessionContext,
        stmt: &H::Utility,
        utility: &UtilityContext<'_>,
    ) -> Result<(), H::Error> {
        if !self.switch.is_enabled() {
            return next.process_utility(ctx, stmt, utility);
        }

        let guard = ctx.depth().enter();
        next.process_utility(ctx, stmt, utility)?;
        if guard.release() == 0 {
            info!(statement = %utility.query_string, "Top-level utility statement");
            metrics::record_top_level_statement("utility");
            ctx.broadcast(utility.query_string);
        }
        Ok(())
    }
}
