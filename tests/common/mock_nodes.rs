//! Recording node connector and in-memory registry for broadcast tests.
//!
//! Connection strings choose the node's behavior:
//! - `invalid*`: connection refused
//! - `hang*`: connect never completes
//! - `reject*`: connects, but every statement fails
//! - anything else: live node that records each statement
//!
//! # Example
//! ```rust,ignore
//! let nodes = MockNodes::new();
//! let mut engine = ReplayEngine::new(loader, nodes.connector(), &NodeConfig::default());
//! engine.broadcast("DELETE FROM t WHERE id=1").await;
//! assert_eq!(nodes.commands_for("valid"), vec!["DELETE FROM t WHERE id=1"]);
//! ```

use pg_replay::node::{BoxFuture, CommandOutcome, NodeConnection, NodeConnector, NodeError};
use pg_replay::registry::{StoreFuture, TargetDefinition, TargetStore};
use pg_replay::ReplayError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Recorded {
    connects: Vec<String>,
    commands: Vec<(String, String)>,
    open: Vec<Arc<AtomicBool>>,
}

/// Shared view of everything the mock nodes saw.
#[derive(Clone, Default)]
pub struct MockNodes {
    recorded: Arc<Mutex<Recorded>>,
}

impl MockNodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<RecordingConnector> {
        Arc::new(RecordingConnector { nodes: self.clone() })
    }

    /// Connection attempts, in order.
    pub fn connects(&self) -> Vec<String> {
        self.recorded.lock().unwrap().connects.clone()
    }

    pub fn connect_count(&self, connection_string: &str) -> usize {
        self.connects().iter().filter(|c| *c == connection_string).count()
    }

    /// Statements delivered, in order, as (connection string, statement).
    pub fn commands(&self) -> Vec<(String, String)> {
        self.recorded.lock().unwrap().commands.clone()
    }

    pub fn commands_for(&self, connection_string: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|(node, _)| node == connection_string)
            .map(|(_, stmt)| stmt)
            .collect()
    }

    /// Simulate every open connection dropping.
    pub fn sever_all(&self) {
        for closed in self.recorded.lock().unwrap().open.drain(..) {
            closed.store(true, Ordering::SeqCst);
        }
    }
}

pub struct RecordingConnector {
    nodes: MockNodes,
}

impl NodeConnector for RecordingConnector {
    fn connect<'a>(&'a self, connection_string: &'a str) -> BoxFuture<'a, Box<dyn NodeConnection>> {
        Box::pin(async move {
            self.nodes
                .recorded
                .lock()
                .unwrap()
                .connects
                .push(connection_string.to_string());

            if connection_string.starts_with("invalid") {
                return Err(NodeError(format!("could not connect to {}", connection_string)));
            }
            if connection_string.starts_with("hang") {
                std::future::pending::<()>().await;
            }

            let closed = Arc::new(AtomicBool::new(false));
            self.nodes.recorded.lock().unwrap().open.push(closed.clone());
            Ok(Box::new(RecordingConnection {
                node: connection_string.to_string(),
                nodes: self.nodes.clone(),
                closed,
            }) as Box<dyn NodeConnection>)
        })
    }
}

struct RecordingConnection {
    node: String,
    nodes: MockNodes,
    closed: Arc<AtomicBool>,
}

impl RecordingConnection {
    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl NodeConnection for RecordingConnection {
    fn is_alive(&self) -> bool {
        !self.closed()
    }

    fn execute<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, CommandOutcome> {
        Box::pin(async move {
            if self.closed() {
                return Err(NodeError("server closed the connection unexpectedly".into()));
            }
            if self.node.starts_with("reject") {
                return Err(NodeError(format!("relation does not exist: {}", statement)));
            }
            self.nodes
                .recorded
                .lock()
                .unwrap()
                .commands
                .push((self.node.clone(), statement.to_string()));
            Ok(CommandOutcome { rows_affected: 1 })
        })
    }
}

/// In-memory registry with the same semantics as the SQLite store.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<(i64, Vec<TargetDefinition>)>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> pg_replay::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ReplayError::RegistryUnavailable("registry offline".into()));
        }
        Ok(())
    }
}

impl TargetStore for MemoryStore {
    fn insert_target(&self, connection_string: &str) -> StoreFuture<'_, ()> {
        let connection_string = connection_string.to_string();
        Box::pin(async move {
            self.check()?;
            let mut rows = self.rows.lock().unwrap();
            if rows.1.iter().all(|t| t.connection_string != connection_string) {
                rows.0 += 1;
                let node_id = rows.0;
                rows.1.push(TargetDefinition::new(node_id, connection_string));
            }
            Ok(())
        })
    }

    fn delete_target(&self, connection_string: &str) -> StoreFuture<'_, u64> {
        let connection_string = connection_string.to_string();
        Box::pin(async move {
            self.check()?;
            let mut rows = self.rows.lock().unwrap();
            let before = rows.1.len();
            rows.1.retain(|t| t.connection_string != connection_string);
            Ok((before - rows.1.len()) as u64)
        })
    }

    fn list_targets(&self) -> StoreFuture<'_, Vec<TargetDefinition>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.rows.lock().unwrap().1.clone())
        })
    }
}
