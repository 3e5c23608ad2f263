// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote node protocol.
//!
//! Defines how the connection cache opens connections and sends statements.
//! The replay engine never holds a handle itself; it goes through
//! [`ConnectionCache`](crate::cache::ConnectionCache), which owns every
//! [`NodeConnection`].
//!
//! The statement text is sent verbatim as a single command. For PostgreSQL
//! nodes that means the simple query protocol, so a string holding several
//! `;`-separated statements runs as one implicit transaction on the node.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), pg_replay::node::NodeError> {
//! use pg_replay::node::{NodeConnector, PgConnector};
//!
//! let mut conn = PgConnector.connect("host=replica-1 user=postgres dbname=app").await?;
//! let outcome = conn.execute("DELETE FROM t WHERE id = 1").await?;
//! println!("rows affected on replica: {}", outcome.rows_affected);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use tokio::task::JoinHandle;
use tokio_postgres::{NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

/// Result type for node operations.
pub type NodeResult<T> = std::result::Result<T, NodeError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = NodeResult<T>> + Send + 'a>>;

/// Simplified error for node operations.
#[derive(Debug, Clone)]
pub struct NodeError(pub String);

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for NodeError {}

/// What a node reported after running a statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Rows affected, summed over every command in the statement text.
    pub rows_affected: u64,
}

/// An open connection to one target node.
pub trait NodeConnection: Send {
    /// Whether the connection can still be used.
    ///
    /// A `false` here makes the cache reconnect before the next statement.
    fn is_alive(&self) -> bool;

    /// Send `statement` as a single command.
    fn execute<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, CommandOutcome>;
}

/// Opens [`NodeConnection`]s from connection strings.
pub trait NodeConnector: Send + Sync + 'static {
    fn connect<'a>(&'a self, connection_string: &'a str) -> BoxFuture<'a, Box<dyn NodeConnection>>;
}

/// Connector for PostgreSQL nodes.
///
/// Accepts both libpq keyword strings (`host=r1 port=5432`) and
/// `postgresql://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

impl NodeConnector for PgConnector {
    fn connect<'a>(&'a self, connection_string: &'a str) -> BoxFuture<'a, Box<dyn NodeConnection>> {
        Box::pin(async move {
            let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
                .await
                .map_err(|e| NodeError(e.to_string()))?;

            // The connection future drives the socket and finishes once the
            // remote closes it.
            let driver = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!(error = %e, "Node connection closed with error");
                }
            });

            debug!("Opened node connection");
            Ok(Box::new(PgNodeConnection { client, driver }) as Box<dyn NodeConnection>)
        })
    }
}

/// A live `tokio-postgres` client plus the task driving its socket.
struct PgNodeConnection {
    client: tokio_postgres::Client,
    driver: JoinHandle<()>,
}

impl NodeConnection for PgNodeConnection {
    fn is_alive(&self) -> bool {
        !self.client.is_closed() && !self.driver.is_finished()
    }

    fn execute<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, CommandOutcome> {
        Box::pin(async move {
            let messages = self
                .client
                .simple_query(statement)
                .await
                .map_err(|e| NodeError(e.to_string()))?;
            Ok(CommandOutcome {
                rows_affected: rows_affected(&messages),
            })
        })
    }
}

impl Drop for PgNodeConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn rows_affected(messages: &[SimpleQueryMessage]) -> u64 {
    messages
        .iter()
        .map(|m| match m {
            SimpleQueryMessage::CommandComplete(n) => *n,
            _ => 0,
        })
        .sum()
}
