//! Scripted host engine for interception tests.
//!
//! A [`Statement`] is a tree: a query's children fire during executor run
//! (like triggers), a utility statement's children fire during utility
//! processing (like a procedure body). Every child goes back through the
//! pipeline, so interceptors see the same nesting a real host produces.
//!
//! # Example
//! ```rust,ignore
//! let stmt = Statement::utility("CALL p()")
//!     .with_child(Statement::query("INSERT INTO audit VALUES (1)"));
//!
//! run_top_level(&pipeline, &mut session, &stmt)?;
//! assert_eq!(pipeline.host().phase_calls().len(), 6);
//! ```

use pg_replay::{
    CursorOptions, HostEngine, Pipeline, ScanDirection, SessionContext, StatementSink, UtilityContext, UtilityOrigin,
};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Goes through planner + executor start/run/end.
    Query,
    /// Goes through process utility.
    Utility,
}

/// One statement plus the statements it triggers.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub kind: StatementKind,
    pub children: Vec<Statement>,
    /// Fail in the phase that would run the children, before running them.
    pub fails: bool,
    /// Panic in that phase instead.
    pub panics: bool,
}

impl Statement {
    pub fn query(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            kind: StatementKind::Query,
            children: Vec::new(),
            fails: false,
            panics: false,
        }
    }

    pub fn utility(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            kind: StatementKind::Utility,
            children: Vec::new(),
            fails: false,
            panics: false,
        }
    }

    pub fn with_child(mut self, child: Statement) -> Self {
        self.children.push(child);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fails = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    /// Whether running this statement (children included) fails.
    pub fn will_fail(&self) -> bool {
        self.fails || self.children.iter().any(Statement::will_fail)
    }

    /// Total statements in the tree, including this one.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Statement::count).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError(pub String);

/// Executor state for a planned query.
#[derive(Debug)]
pub struct QueryDesc {
    pub stmt: Statement,
    pub started: bool,
}

/// A standard phase the host ran, and the session depth it saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseCall {
    pub phase: &'static str,
    pub sql: String,
    pub depth: u32,
}

#[derive(Default)]
pub struct MockHost {
    calls: Mutex<Vec<PhaseCall>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase_calls(&self) -> Vec<PhaseCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, phase: &'static str, sql: &str, ctx: &SessionContext) {
        self.calls.lock().unwrap().push(PhaseCall {
            phase,
            sql: sql.to_string(),
            depth: ctx.depth().get(),
        });
    }

    fn run_children(
        pipeline: &Pipeline<Self>,
        ctx: &mut SessionContext,
        stmt: &Statement,
    ) -> Result<(), HostError> {
        if stmt.panics {
            panic!("{} crashed the backend", stmt.sql);
        }
        if stmt.fails {
            return Err(HostError(format!("{} failed", stmt.sql)));
        }
        for child in &stmt.children {
            run_statement(pipeline, ctx, child, UtilityOrigin::Query)?;
        }
        Ok(())
    }
}

impl HostEngine for MockHost {
    type Query = Statement;
    type Plan = Statement;
    type QueryDesc = QueryDesc;
    type Utility = Statement;
    type Error = HostError;

    fn standard_planner(
        &self,
        _pipeline: &Pipeline<Self>,
        ctx: &mut SessionContext,
        query: &Statement,
        _cursor_options: CursorOptions,
    ) -> Result<Statement, HostError> {
        self.record("planner", &query.sql, ctx);
        Ok(query.clone())
    }

    fn standard_executor_start(
        &self,
        _pipeline: &Pipeline<Self>,
        ctx: &mut SessionContext,
        desc: &mut QueryDesc,
        _eflags: u32,
    ) -> Result<(), HostError> {
        self.record("executor_start", &desc.stmt.sql, ctx);
        desc.started = true;
        Ok(())
    }

    fn standard_executor_run(
        &self,
        pipeline: &Pipeline<Self>,
        ctx: &mut SessionContext,
        desc: &mut QueryDesc,
        _direction: ScanDirection,
        _count: u64,
    ) -> Result<(), HostError> {
        self.record("executor_run", &desc.stmt.sql, ctx);
        Self::run_children(pipeline, ctx, &desc.stmt)
    }

    fn standard_executor_end(
        &self,
        _pipeline: &Pipeline<Self>,
        ctx: &mut SessionContext,
        desc: &mut QueryDesc,
    ) -> Result<(), HostError> {
        self.record("executor_end", &desc.stmt.sql, ctx);
        desc.started = false;
        Ok(())
    }

    fn standard_process_utility(
        &self,
        pipeline: &Pipeline<Self>,
        ctx: &mut SessionContext,
        stmt: &Statement,
        _utility: &UtilityContext<'_>,
    ) -> Result<(), HostError> {
        self.record("process_utility", &stmt.sql, ctx);
        Self::run_children(pipeline, ctx, stmt)
    }
}

/// Run a statement the way the host's main loop would.
pub fn run_statement(
    pipeline: &Pipeline<MockHost>,
    ctx: &mut SessionContext,
    stmt: &Statement,
    origin: UtilityOrigin,
) -> Result<(), HostError> {
    match stmt.kind {
        StatementKind::Utility => {
            let utility = UtilityContext {
                query_string: &stmt.sql,
                origin,
            };
            pipeline.process_utility(ctx, stmt, &utility)
        }
        StatementKind::Query => {
            let plan = pipeline.planner(ctx, stmt, CursorOptions::default())?;
            let mut desc = QueryDesc {
                stmt: plan,
                started: false,
            };
            pipeline.executor_start(ctx, &mut desc, 0)?;
            pipeline.executor_run(ctx, &mut desc, ScanDirection::Forward, 0)?;
            pipeline.executor_end(ctx, &mut desc)
        }
    }
}

pub fn run_top_level(
    pipeline: &Pipeline<MockHost>,
    ctx: &mut SessionContext,
    stmt: &Statement,
) -> Result<(), HostError> {
    run_statement(pipeline, ctx, stmt, UtilityOrigin::TopLevel)
}

/// Sink that records every broadcast statement.
#[derive(Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<String>>>,
    invalidations: Arc<Mutex<usize>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn invalidations(&self) -> usize {
        *self.invalidations.lock().unwrap()
    }

    /// A session whose broadcasts land in this sink.
    pub fn session(&self) -> SessionContext {
        SessionContext::new(Box::new(self.clone()))
    }
}

impl StatementSink for RecordingSink {
    fn broadcast(&mut self, statement: &str) {
        self.sent.lock().unwrap().push(statement.to_string());
    }

    fn invalidate(&mut self) {
        *self.invalidations.lock().unwrap() += 1;
    }
}
