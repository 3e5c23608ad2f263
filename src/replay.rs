// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replay engine: broadcasts a statement to every cached target.
//!
//! # Broadcast
//!
//! ```text
//! broadcast(stmt)
//!   ├─ ensure cache (registry read on first use / after invalidate)
//!   └─ for each node, in node_id order:
//!        ensure_live ──fail──→ log + skip
//!        execute     ──fail──→ log
//! ```
//!
//! Nodes are contacted one after another. A failure on node k never stops
//! the attempt on node k+1 and never undoes what nodes 1..k already ran.
//! Nothing here is transactional across nodes: this is best-effort
//! statement fan-out, not consistent replication.
//!
//! # Blocking Sink
//!
//! The interceptor runs synchronously inside statement processing.
//! [`BlockingReplaySink`] owns a small runtime and blocks the calling
//! statement until every node has been contacted. The runtime keeps one
//! worker thread so node connection drivers still see remote closes while
//! the session is idle between statements.

use crate::cache::ConnectionCache;
use crate::config::NodeConfig;
use crate::error::{ReplayError, Result};
use crate::metrics;
use crate::node::NodeConnector;
use crate::registry::NodeRegistryLoader;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

/// Where the interceptor hands top-level statements.
pub trait StatementSink: Send {
    /// Propagate `statement`. Never fails from the caller's point of view.
    fn broadcast(&mut self, statement: &str);

    /// Drop any cached view of the target registry.
    fn invalidate(&mut self) {}
}

/// Per-node failures collected during one broadcast.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Nodes that ran the statement.
    pub delivered: Vec<i64>,
    /// Nodes that could not be reached.
    pub unreachable: Vec<(i64, ReplayError)>,
    /// Nodes that were reached but failed the statement.
    pub failed: Vec<(i64, ReplayError)>,
}

impl BroadcastReport {
    /// Number of nodes attempted.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.unreachable.len() + self.failed.len()
    }

    /// Whether every attempted node ran the statement.
    pub fn is_complete(&self) -> bool {
        self.unreachable.is_empty() && self.failed.is_empty()
    }
}

/// Broadcasts statements to the targets in a session's connection cache.
pub struct ReplayEngine {
    loader: NodeRegistryLoader,
    cache: ConnectionCache,
}

impl ReplayEngine {
    pub fn new(loader: NodeRegistryLoader, connector: Arc<dyn NodeConnector>, config: &NodeConfig) -> Self {
        Self {
            loader,
            cache: ConnectionCache::new(connector, config),
        }
    }

    /// The connection cache (read-only view, for diagnostics).
    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    /// Build the connection cache if it isn't built.
    pub async fn ensure_cache(&mut self) {
        self.cache.ensure(&self.loader).await;
    }

    /// Mark the connection cache stale; the next broadcast re-reads the registry.
    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }

    /// Send `statement` to every cached node.
    pub async fn broadcast(&mut self, statement: &str) -> BroadcastReport {
        let start = Instant::now();
        self.ensure_cache().await;

        let mut report = BroadcastReport::default();
        if self.cache.is_empty() {
            debug!("No replay targets, skipping broadcast");
            return report;
        }

        for node_id in self.cache.node_ids() {
            if let Err(e) = self.cache.ensure_live(node_id).await {
                warn!(node_id, error = %e, "Replay target unreachable, skipping");
                metrics::record_error(node_id, e.error_type());
                report.unreachable.push((node_id, e));
                continue;
            }

            match self.cache.execute(node_id, statement).await {
                Ok(outcome) => {
                    debug!(node_id, rows_affected = outcome.rows_affected, "Statement replayed");
                    report.delivered.push(node_id);
                }
                Err(e) => {
                    warn!(node_id, statement = %statement, error = %e, "Statement failed on replay target");
                    metrics::record_error(node_id, e.error_type());
                    report.failed.push((node_id, e));
                }
            }
        }

        metrics::record_broadcast(
            report.attempted(),
            report.delivered.len(),
            report.unreachable.len() + report.failed.len(),
            start.elapsed(),
        );
        report
    }
}

/// Runs a [`ReplayEngine`] to completion on a private runtime.
///
/// Must not be used from inside another tokio runtime.
pub struct BlockingReplaySink {
    runtime: Runtime,
    engine: ReplayEngine,
}

impl BlockingReplaySink {
    pub fn new(engine: ReplayEngine) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("replay-session")
            .enable_all()
            .build()?;
        Ok(Self { runtime, engine })
    }

    pub fn engine(&self) -> &ReplayEngine {
        &self.engine
    }

    /// Broadcast and return the per-node report.
    pub fn broadcast_with_report(&mut self, statement: &str) -> BroadcastReport {
        self.runtime.block_on(self.engine.broadcast(statement))
    }
}

impl StatementSink for BlockingReplaySink {
    fn broadcast(&mut self, statement: &str) {
        let report = self.broadcast_with_report(statement);
        if !report.is_complete() {
            debug!(
                delivered = report.delivered.len(),
                unreachable = report.unreachable.len(),
                failed = report.failed.len(),
                "Broadcast finished with failures"
            );
        }
    }

    fn invalidate(&mut self) {
        self.engine.invalidate();
    }
}

impl From<BlockingReplaySink> for Box<dyn StatementSink> {
    fn from(sink: BlockingReplaySink) -> Self {
        Box::new(sink)
    }
}
