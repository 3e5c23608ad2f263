// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection cache for replay targets.
//!
//! Owns one [`CachedConnectionEntry`] per registered target, keyed by the
//! registry's `node_id`. Nothing else in the crate touches a raw
//! [`NodeConnection`].
//!
//! # Connection Lifecycle
//!
//! ```text
//! Disconnected ──ensure_live()──→ Connected
//!      ↑                              │
//!      │                    (closed / statement failed
//!      │                     on a dead socket / timeout)
//!      └──────── Broken ←─────────────┘
//! ```
//!
//! Connections are **lazy**: [`ConnectionCache::ensure_live()`] opens one the
//! first time a broadcast needs it and reopens it whenever the previous one
//! is gone or reports closed. There is no timer; the check runs inline with
//! every broadcast.
//!
//! # Rebuilds
//!
//! The cache is built from a full registry read and never updated entry by
//! entry. [`invalidate()`](ConnectionCache::invalidate) marks it stale and the
//! next [`ensure()`](ConnectionCache::ensure) rebuilds it. A rebuild keeps the
//! open connection of every target whose `node_id` and connection string are
//! unchanged, adds new targets and drops removed ones.

use crate::config::NodeConfig;
use crate::error::{ReplayError, Result};
use crate::metrics;
use crate::node::{BoxFuture, CommandOutcome, NodeConnection, NodeConnector, NodeResult};
use crate::registry::{NodeRegistryLoader, TargetDefinition};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// State of a cached connection.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No connection opened yet (initial state).
    Disconnected,
    /// Connection open and last used successfully.
    Connected,
    /// Last connect attempt failed or the connection was found dead.
    Broken,
}

/// One replay target and its (possibly absent) live connection.
pub struct CachedConnectionEntry {
    node_id: i64,
    connection_string: String,
    connection: Option<Box<dyn NodeConnection>>,
    state: NodeState,
    failure_count: u64,
    last_success: u64,
}

impl CachedConnectionEntry {
    fn new(target: TargetDefinition) -> Self {
        Self {
            node_id: target.node_id,
            connection_string: target.connection_string,
            connection: None,
            state: NodeState::Disconnected,
            failure_count: 0,
            last_success: 0,
        }
    }

    pub fn node_id(&self) -> i64 {
        self.node_id
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Whether a connection handle is currently held.
    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Consecutive failed connects or statements.
    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    /// Milliseconds since the last successful statement, `u64::MAX` if none.
    pub fn millis_since_success(&self) -> u64 {
        if self.last_success == 0 {
            return u64::MAX;
        }
        epoch_millis().saturating_sub(self.last_success)
    }

    fn record_success(&mut self) {
        self.state = NodeState::Connected;
        self.failure_count = 0;
        self.last_success = epoch_millis();
    }

    fn record_failure(&mut self) {
        self.failure_count += 1;
    }

    fn mark_broken(&mut self) {
        self.connection = None;
        self.state = NodeState::Broken;
    }
}

impl std::fmt::Debug for CachedConnectionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedConnectionEntry")
            .field("node_id", &self.node_id)
            .field("connection_string", &self.connection_string)
            .field("state", &self.state)
            .field("has_connection", &self.connection.is_some())
            .field("failure_count", &self.failure_count)
            .finish()
    }
}

/// Per-session map from `node_id` to cached connection.
pub struct ConnectionCache {
    connector: Arc<dyn NodeConnector>,
    entries: BTreeMap<i64, CachedConnectionEntry>,
    built: bool,
    connect_timeout: Option<Duration>,
    statement_timeout: Option<Duration>,
}

impl ConnectionCache {
    /// Create an empty, unbuilt cache.
    pub fn new(connector: Arc<dyn NodeConnector>, config: &NodeConfig) -> Self {
        Self {
            connector,
            entries: BTreeMap::new(),
            built: false,
            connect_timeout: config.connect_timeout_duration(),
            statement_timeout: config.statement_timeout_duration(),
        }
    }

    /// Whether the cache holds a current build.
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Build the cache from the registry unless a current build exists.
    ///
    /// Returns `true` if a (re)build happened.
    pub async fn ensure(&mut self, loader: &NodeRegistryLoader) -> bool {
        if self.built {
            return false;
        }
        let targets = loader.fetch().await;
        self.rebuild(targets);
        true
    }

    /// Replace the cache contents with `targets`.
    ///
    /// Open connections survive for targets whose id and connection string
    /// are unchanged.
    pub fn rebuild(&mut self, targets: Vec<TargetDefinition>) {
        let mut previous = std::mem::take(&mut self.entries);
        let mut kept = 0;

        for target in targets {
            let entry = match previous.remove(&target.node_id) {
                Some(existing) if existing.connection_string == target.connection_string => {
                    kept += 1;
                    existing
                }
                _ => CachedConnectionEntry::new(target),
            };
            self.entries.insert(entry.node_id, entry);
        }

        let dropped = previous.len();
        self.built = true;
        metrics::set_cached_nodes(self.entries.len());
        debug!(entries = self.entries.len(), kept, dropped, "Connection cache built");
    }

    /// Mark the cache stale; the next [`ensure()`](Self::ensure) rebuilds it.
    pub fn invalidate(&mut self) {
        if self.built {
            info!(entries = self.entries.len(), "Connection cache invalidated");
        }
        self.built = false;
    }

    /// Every cached entry, ordered by `node_id`.
    pub fn get_all(&self) -> impl Iterator<Item = &CachedConnectionEntry> {
        self.entries.values()
    }

    /// The ids of every cached entry, ordered.
    pub fn node_ids(&self) -> Vec<i64> {
        self.entries.keys().copied().collect()
    }

    /// Look up one entry.
    pub fn get(&self, node_id: i64) -> Option<&CachedConnectionEntry> {
        self.entries.get(&node_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Make sure the entry holds a live connection, (re)connecting if needed.
    pub async fn ensure_live(&mut self, node_id: i64) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&node_id)
            .ok_or_else(|| ReplayError::Internal(format!("node {} is not cached", node_id)))?;

        // Fast path: already connected
        if entry.connection.is_some() {
            // Let a pending connection driver observe a remote close first.
            tokio::task::yield_now().await;
        }
        if let Some(conn) = &entry.connection {
            if conn.is_alive() {
                return Ok(());
            }
            warn!(node_id, "Cached connection is closed, reconnecting");
            entry.mark_broken();
        }

        debug!(node_id, connection_string = %entry.connection_string, "Connecting to node");
        let attempt = self.connector.connect(&entry.connection_string);

        match bounded(self.connect_timeout, attempt).await {
            Some(Ok(conn)) => {
                entry.connection = Some(conn);
                entry.state = NodeState::Connected;
                metrics::record_node_connection(node_id, true);
                info!(node_id, "Connected to node");
                Ok(())
            }
            Some(Err(e)) => {
                entry.mark_broken();
                entry.record_failure();
                metrics::record_node_connection(node_id, false);
                Err(ReplayError::NodeConnection {
                    node_id,
                    message: e.to_string(),
                })
            }
            None => {
                entry.mark_broken();
                entry.record_failure();
                metrics::record_node_connection(node_id, false);
                Err(ReplayError::Timeout {
                    node_id,
                    operation: "connect".to_string(),
                })
            }
        }
    }

    /// Send `statement` to one node over its cached connection.
    ///
    /// Call [`ensure_live()`](Self::ensure_live) first. A failure that leaves
    /// the connection closed (or a timeout) drops the handle so the next
    /// broadcast reconnects.
    pub async fn execute(&mut self, node_id: i64, statement: &str) -> Result<CommandOutcome> {
        let entry = self
            .entries
            .get_mut(&node_id)
            .ok_or_else(|| ReplayError::Internal(format!("node {} is not cached", node_id)))?;

        let conn = entry.connection.as_mut().ok_or_else(|| ReplayError::NodeConnection {
            node_id,
            message: "Not connected".to_string(),
        })?;

        let start = Instant::now();
        let result = bounded(self.statement_timeout, conn.execute(statement)).await;
        let elapsed = start.elapsed();

        match result {
            Some(Ok(outcome)) => {
                entry.record_success();
                metrics::record_node_command(node_id, true, elapsed);
                Ok(outcome)
            }
            Some(Err(e)) => {
                entry.record_failure();
                metrics::record_node_command(node_id, false, elapsed);
                let alive = entry.connection.as_ref().is_some_and(|c| c.is_alive());
                if !alive {
                    entry.mark_broken();
                }
                Err(ReplayError::RemoteExecution {
                    node_id,
                    message: e.to_string(),
                })
            }
            None => {
                // The statement may still be running remotely; the socket is unusable.
                entry.record_failure();
                entry.mark_broken();
                metrics::record_node_command(node_id, false, elapsed);
                Err(ReplayError::Timeout {
                    node_id,
                    operation: "statement".to_string(),
                })
            }
        }
    }
}

/// Await `fut`, giving up after `limit`. `None` means the limit elapsed.
async fn bounded<T>(limit: Option<Duration>, fut: BoxFuture<'_, T>) -> Option<NodeResult<T>> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Get current epoch milliseconds.
fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
