// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Statement-phase interception.
//!
//! The host engine runs every statement through five phases. A [`Pipeline`]
//! wraps those phases with an ordered list of [`Interceptor`]s:
//!
//! ```text
//! pipeline.process_utility(ctx, ..)
//!   └─ interceptor[n-1]   (installed last, runs first)
//!        └─ ...
//!             └─ interceptor[0]
//!                  └─ host.standard_process_utility(pipeline, ctx, ..)
//!                       └─ pipeline.planner(ctx, ..)   (nested statement re-enters)
//! ```
//!
//! Every interceptor receives a [`Next`] handle and decides when to delegate.
//! An interceptor that doesn't override a phase delegates straight through.
//!
//! The host's standard phases get the pipeline back, so statements triggered
//! from inside a phase (constraints, triggers, procedural calls) travel through
//! the same interceptors at a deeper nesting level.
//!
//! # Example
//!
//! ```rust,ignore
//! let pipeline = Pipeline::builder(host)
//!     .install(AuditInterceptor::default())
//!     .install(extension.interceptor())
//!     .build();
//!
//! let mut session = extension.new_session()?;
//! pipeline.process_utility(&mut session, &stmt, &UtilityContext::top_level("CREATE TABLE t (id int)"))?;
//! ```

mod depth;
mod replay_hook;

pub use depth::{DepthGuard, NestingDepth};
pub use replay_hook::{ReplayInterceptor, ReplaySwitch};

use crate::session::SessionContext;

// ═══════════════════════════════════════════════════════════════════════════════
// Phase arguments
// ═══════════════════════════════════════════════════════════════════════════════

/// Planner flags describing how the resulting plan will be consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorOptions(pub u32);

/// Direction passed to the executor run phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanDirection {
    Backward,
    NoMovement,
    #[default]
    Forward,
}

/// Where a utility statement came from, as classified by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtilityOrigin {
    /// Issued by the client.
    TopLevel,
    /// Part of a larger query (e.g. a function body).
    Query,
    /// Generated internally as a piece of another utility statement.
    Subcommand,
}

/// Arguments to the utility phase besides the statement node itself.
#[derive(Debug, Clone, Copy)]
pub struct UtilityContext<'a> {
    /// Source text of the statement. This is what gets replayed.
    pub query_string: &'a str,
    pub origin: UtilityOrigin,
}

impl<'a> UtilityContext<'a> {
    pub fn top_level(query_string: &'a str) -> Self {
        Self {
            query_string,
            origin: UtilityOrigin::TopLevel,
        }
    }

    pub fn nested(query_string: &'a str) -> Self {
        Self {
            query_string,
            origin: UtilityOrigin::Query,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Host engine
// ═══════════════════════════════════════════════════════════════════════════════

/// The host engine's standard phase implementations.
///
/// Implementations must route any statement they trigger internally back
/// through `pipeline` so interceptors observe it.
pub trait HostEngine: Send + Sync + Sized + 'static {
    /// Parsed query tree handed to the planner.
    type Query;
    /// Planner output.
    type Plan;
    /// Executor state shared by start/run/end.
    type QueryDesc;
    /// Parsed utility statement.
    type Utility;
    /// Failure raised by any phase.
    type Error;

    fn standard_planner(
        &self,
        pipeline: &Pipeline<Self>,
        ctx: &mut SessionContext,
        query: &Self::Query,
        cursor_options: CursorOptions,
    ) -> Result<Self::Plan, Self::Error>;

    fn standard_executor_start(
        &self,
        pipeline: &Pipeline<Self>,
        ctx: &mut SessionContext,
        desc: &mut Self::QueryDesc,
        eflags: u32,
    ) -> Result<(), Self::Error>;

    fn standard_executor_run(
        &self,
        pipeline: &Pipeline<Self>,
        ctx: &mut SessionContext,
        desc: &mut Self::QueryDesc,
        direction: ScanDirection,
        count: u64,
    ) -> Result<(), Self::Error>;

    fn standard_executor_end(
        &self,
        pipeline: &Pipeline<Self>,
        ctx: &mut SessionContext,
        desc: &mut Self::QueryDesc,
    ) -> Result<(), Self::Error>;

    fn standard_process_utility(
        &self,
        pipeline: &Pipeline<Self>,
        ctx: &mut SessionContext,
        stmt: &Self::Utility,
        utility: &UtilityContext<'_>,
    ) -> Result<(), Self::Error>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Interceptors
// ═══════════════════════════════════════════════════════════════════════════════

/// A wrapper around one or more host phases.
///
/// Every method defaults to delegating to `next`, so an interceptor only
/// overrides the phases it cares about. Failures from `next` must be returned
/// unchanged.
pub trait Interceptor<H: HostEngine>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    fn planner(
        &self,
        next: Next<'_, H>,
        ctx: &mut SessionContext,
        query: &H::Query,
        cursor_options: CursorOptions,
    ) -> Result<H::Plan, H::Error> {
        next.planner(ctx, query, cursor_options)
    }

    fn executor_start(
        &self,
        next: Next<'_, H>,
        ctx: &mut SessionContext,
        desc: &mut H::QueryDesc,
        eflags: u32,
    ) -> Result<(), H::Error> {
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
        next.executor_run(ctx, desc, direction, count)
    }

    fn executor_end(&self, next: Next<'_, H>, ctx: &mut SessionContext, desc: &mut H::QueryDesc) -> Result<(), H::Error> {
        next.executor_end(ctx, desc)
    }

    fn process_utility(
        &self,
        next: Next<'_, H>,
        ctx: &mut SessionContext,
        stmt: &H::Utility,
        utility: &UtilityContext<'_>,
    ) -> Result<(), H::Error> {
        next.process_utility(ctx, stmt, utility)
    }
}

/// The rest of the chain below the current interceptor.
pub struct Next<'a, H: HostEngine> {
    pipeline: &'a Pipeline<H>,
    index: usize,
}

impl<H: HostEngine> Clone for Next<'_, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: HostEngine> Copy for Next<'_, H> {}

impl<'a, H: HostEngine> Next<'a, H> {
    fn split(self) -> Option<(&'a dyn Interceptor<H>, Next<'a, H>)> {
        self.pipeline.chain.get(self.index).map(|interceptor| {
            let rest = Next {
                pipeline: self.pipeline,
                index: self.index + 1,
            };
            (interceptor.as_ref(), rest)
        })
    }

    pub fn planner(
        self,
        ctx: &mut SessionContext,
        query: &H::Query,
        cursor_options: CursorOptions,
    ) -> Result<H::Plan, H::Error> {
        match self.split() {
            Some((interceptor, rest)) => interceptor.planner(rest, ctx, query, cursor_options),
            None => self.pipeline.host.standard_planner(self.pipeline, ctx, query, cursor_options),
        }
    }

    pub fn executor_start(self, ctx: &mut SessionContext, desc: &mut H::QueryDesc, eflags: u32) -> Result<(), H::Error> {
        match self.split() {
            Some((interceptor, rest)) => interceptor.executor_start(rest, ctx, desc, eflags),
            None => self.pipeline.host.standard_executor_start(self.pipeline, ctx, desc, eflags),
        }
    }

    pub fn executor_run(
        self,
        ctx: &mut SessionContext,
        desc: &mut H::QueryDesc,
        direction: ScanDirection,
        count: u64,
    ) -> Result<(), H::Error> {
        match self.split() {
            Some((interceptor, rest)) => interceptor.executor_run(rest, ctx, desc, direction, count),
            None => self
                .pipeline
                .host
                .standard_executor_run(self.pipeline, ctx, desc, direction, count),
        }
    }

    pub fn executor_end(self, ctx: &mut SessionContext, desc: &mut H::QueryDesc) -> Result<(), H::Error> {
        match self.split() {
            Some((interceptor, rest)) => interceptor.executor_end(rest, ctx, desc),
            None => self.pipeline.host.standard_executor_end(self.pipeline, ctx, desc),
        }
    }

    pub fn process_utility(
        self,
        ctx: &mut SessionContext,
        stmt: &H::Utility,
        utility: &UtilityContext<'_>,
    ) -> Result<(), H::Error> {
        match self.split() {
            Some((interceptor, rest)) => interceptor.process_utility(rest, ctx, stmt, utility),
            None => self
                .pipeline
                .host
                .standard_process_utility(self.pipeline, ctx, stmt, utility),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════════════════════════

/// A host engine plus its installed interceptors, outermost first.
///
/// Built once at module initialization and shared by every session.
pub struct Pipeline<H: HostEngine> {
    host: H,
    chain: Vec<Box<dyn Interceptor<H>>>,
}

impl<H: HostEngine> Pipeline<H> {
    pub fn builder(host: H) -> PipelineBuilder<H> {
        PipelineBuilder {
            host,
            installed: Vec::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Interceptor names, outermost first.
    pub fn interceptor_names(&self) -> Vec<&'static str> {
        self.chain.iter().map(|i| i.name()).collect()
    }

    fn head(&self) -> Next<'_, H> {
        Next { pipeline: self, index: 0 }
    }

    pub fn planner(
        &self,
        ctx: &mut SessionContext,
        query: &H::Query,
        cursor_options: CursorOptions,
    ) -> Result<H::Plan, H::Error> {
        self.head().planner(ctx, query, cursor_options)
    }

    pub fn executor_start(&self, ctx: &mut SessionContext, desc: &mut H::QueryDesc, eflags: u32) -> Result<(), H::Error> {
        self.head().executor_start(ctx, desc, eflags)
    }

    pub fn executor_run(
        &self,
        ctx: &mut SessionContext,
        desc: &mut H::QueryDesc,
        direction: ScanDirection,
        count: u64,
    ) -> Result<(), H::Error> {
        self.head().executor_run(ctx, desc, direction, count)
    }

    pub fn executor_end(&self, ctx: &mut SessionContext, desc: &mut H::QueryDesc) -> Result<(), H::Error> {
        self.head().executor_end(ctx, desc)
    }

    pub fn process_utility(
        &self,
        ctx: &mut SessionContext,
        stmt: &H::Utility,
        utility: &UtilityContext<'_>,
    ) -> Result<(), H::Error> {
        self.head().process_utility(ctx, stmt, utility)
    }
}

/// Collects interceptors in installation order.
pub struct PipelineBuilder<H: HostEngine> {
    host: H,
    installed: Vec<Box<dyn Interceptor<H>>>,
}

impl<H: HostEngine> PipelineBuilder<H> {
    /// Wrap the current chain. The newest interceptor runs first and
    /// delegates to the one installed before it.
    pub fn install<I: Interceptor<H> + 'static>(mut self, interceptor: I) -> Self {
        tracing::debug!(interceptor = interceptor.name(), "Installing interceptor");
        self.installed.push(Box::new(interceptor));
        self
    }

    pub fn build(self) -> Pipeline<H> {
        let mut chain = self.installed;
        chain.reverse();
        Pipeline { host: self.host, chain }
    }
}
