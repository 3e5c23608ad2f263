// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Statement Replay
//!
//! Statement-level fan-out for a database host: every top-level statement a
//! client runs is also sent, verbatim, to a set of remote PostgreSQL nodes.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                              host engine                                  │
//! │                                                                           │
//! │  planner / executor start,run,end / process utility                       │
//! │         │                                                                 │
//! │         ▼                                                                 │
//! │  ┌──────────────────┐  depth 0   ┌──────────────┐    ┌─────────────────┐  │
//! │  │ ReplayInterceptor│──────────►│ ReplayEngine │───►│ ConnectionCache │──┼──► nodes
//! │  │ (NestingDepth)   │            │ (per session)│    │ (per session)   │  │
//! │  └──────────────────┘            └──────────────┘    └─────────────────┘  │
//! │                                                               │           │
//! │                                                               ▼           │
//! │  ┌─────────────┐                                   ┌───────────────────┐  │
//! │  │ ReplayAdmin │──────────── insert/delete ───────►│ target registry   │  │
//! │  └─────────────┘                                   │ (SQLite)          │  │
//! │                                                    └───────────────────┘  │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Top-Level Detection
//!
//! Each session keeps a nesting depth. Every intercepted phase increments it
//! on entry and decrements it on every exit path. A statement fired from
//! inside another (trigger, constraint, procedural call) therefore runs at
//! depth >= 1 and is never broadcast; only the outer statement is, once,
//! when its phase returns to depth 0.
//!
//! ## Best Effort
//!
//! Nodes are contacted one at a time. An unreachable node or a failing
//! statement on a node is logged and skipped. The client's own statement
//! never fails because of replication. There is no cross-node atomicity.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pg_replay::{Pipeline, ReplayConfig, ReplayExtension, UtilityContext};
//!
//! let rt = tokio::runtime::Runtime::new()?;
//! let extension = rt.block_on(ReplayExtension::open(ReplayConfig::default()))?;
//! rt.block_on(extension.admin().add_replay_target("host=replica-1 user=postgres"))?;
//!
//! let pipeline = extension.install(Pipeline::builder(host)).build();
//!
//! // per client session, on the session's own thread
//! let mut session = extension.new_session()?;
//! pipeline.process_utility(&mut session, &stmt, &UtilityContext::top_level(sql))?;
//! ```

pub mod admin;
pub mod cache;
pub mod config;
pub mod error;
pub mod extension;
pub mod intercept;
pub mod metrics;
pub mod node;
pub mod registry;
pub mod replay;
pub mod session;

// Re-exports for convenience
pub use admin::ReplayAdmin;
pub use cache::{CachedConnectionEntry, ConnectionCache, NodeState};
pub use config::{NodeConfig, RegistryConfig, ReplayConfig};
pub use error::{ReplayError, Result};
pub use extension::ReplayExtension;
pub use intercept::{
    CursorOptions, DepthGuard, HostEngine, Interceptor, NestingDepth, Next, Pipeline, PipelineBuilder,
    ReplayInterceptor, ReplaySwitch, ScanDirection, UtilityContext, UtilityOrigin,
};
pub use node::{CommandOutcome, NodeConnection, NodeConnector, NodeError, PgConnector};
pub use registry::{NodeRegistryLoader, SqliteTargetStore, TargetDefinition, TargetStore};
pub use replay::{BlockingReplaySink, BroadcastReport, ReplayEngine, StatementSink};
pub use session::SessionContext;
