// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Target registry: where replay targets are defined.
//!
//! Each target is one row in `replay_targets`, identified by its connection
//! string. The store assigns an integer `node_id` which the connection cache
//! uses as its key.
//!
//! ```text
//! add_replay_target("host=r1")  → INSERT replay_targets(connection_string)
//! remove_replay_target("host=r1") → DELETE ... WHERE connection_string = ?
//! NodeRegistryLoader::fetch()   → SELECT node_id, connection_string
//! ```
//!
//! # Store Seam
//!
//! [`TargetStore`] is the query interface the rest of the crate talks to.
//! [`SqliteTargetStore`] is the shipped implementation; hosts with their own
//! catalog can implement the trait against it instead.
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when several sessions touch
//! the registry at once. Writes and reads are retried with capped exponential
//! backoff before the error is surfaced.
//!
//! # Loader Semantics
//!
//! [`NodeRegistryLoader::fetch()`] never fails. A registry that cannot be
//! read yields an empty target list and a warning, so a broken registry
//! turns replay into a no-op instead of blocking statements.

use crate::config::RegistryConfig;
use crate::error::{ReplayError, Result};
use crate::metrics;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};

/// Configuration for SQLite busy retry behavior
const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// Boxed future returned by [`TargetStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A durable replay target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDefinition {
    /// Store-assigned identifier, stable for the life of the row.
    pub node_id: i64,
    /// Connection string used verbatim to reach the node.
    pub connection_string: String,
}

impl TargetDefinition {
    pub fn new(node_id: i64, connection_string: impl Into<String>) -> Self {
        Self {
            node_id,
            connection_string: connection_string.into(),
        }
    }
}

/// Query interface over the target registry.
pub trait TargetStore: Send + Sync + 'static {
    /// Insert a target. Adding an existing connection string is a no-op.
    fn insert_target(&self, connection_string: &str) -> StoreFuture<'_, ()>;

    /// Delete every target with this connection string.
    ///
    /// Returns the number of rows removed.
    fn delete_target(&self, connection_string: &str) -> StoreFuture<'_, u64>;

    /// Read every target, ordered by `node_id`.
    fn list_targets(&self) -> StoreFuture<'_, Vec<TargetDefinition>>;
}

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(operation_name: &str, mut f: F) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempts, "Registry operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "Registry busy, retrying"
                );
                metrics::registry_retries_total(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => {
                if is_sqlite_busy_error(&e) {
                    warn!(operation = operation_name, attempts, "Registry busy, max retries exceeded");
                }
                return Err(e);
            }
        }
    }
}

/// Owns the registry's private runtime.
///
/// Shut down in the background on drop so the store can be dropped from
/// async code.
struct RegistryRuntime(Option<Runtime>);

impl RegistryRuntime {
    fn start() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("replay-registry")
            .enable_all()
            .build()?;
        Ok(Self(Some(runtime)))
    }

    fn handle(&self) -> Result<Handle> {
        self.0
            .as_ref()
            .map(|rt| rt.handle().clone())
            .ok_or_else(|| ReplayError::Internal("registry runtime is shut down".into()))
    }
}

impl Drop for RegistryRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Run `task` on the registry runtime and wait for it from any runtime.
async fn on_registry<T, F>(handle: Handle, task: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    handle
        .spawn(task)
        .await
        .map_err(|e| ReplayError::Internal(format!("registry task failed: {}", e)))?
}

/// Target registry backed by SQLite.
///
/// The pool lives on a private runtime. Every query is spawned there and
/// awaited through its join handle, so callers on any runtime (including a
/// session runtime that is idle between statements) share one pool.
pub struct SqliteTargetStore {
    pool: SqlitePool,
    path: String,
    handle: Handle,
    // Declared last: dropped after the pool.
    _runtime: RegistryRuntime,
}

impl SqliteTargetStore {
    /// Open (or create) the registry described by `config`.
    ///
    /// Creates the `replay_targets` table if it doesn't exist.
    pub async fn open(config: &RegistryConfig) -> Result<Self> {
        info!(path = %config.sqlite_path, "Opening replay target registry");

        let url = if config.is_in_memory() {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", config.sqlite_path)
        };

        let mut options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| ReplayError::Config(format!("Invalid SQLite path: {}", e)))?
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);
        if config.wal_mode {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // An in-memory database lives and dies with its single connection.
        let pool_options = if config.is_in_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(2)
        };

        let runtime = RegistryRuntime::start()?;
        let handle = runtime.handle()?;

        let pool = on_registry(handle.clone(), async move {
            let pool = pool_options.connect_with(options).await?;
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS replay_targets (
                    node_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    connection_string TEXT NOT NULL UNIQUE,
                    added_at INTEGER NOT NULL
                )
                "#,
            )
            .execute(&pool)
            .await?;
            Ok(pool)
        })
        .await?;

        Ok(Self {
            pool,
            path: config.sqlite_path.clone(),
            handle,
            _runtime: runtime,
        })
    }

    /// Get database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        let pool = self.pool.clone();
        if let Err(e) = on_registry(self.handle.clone(), async move {
            pool.close().await;
            Ok(())
        })
        .await
        {
            warn!(path = %self.path, error = %e, "Replay target registry did not close cleanly");
            return;
        }
        info!(path = %self.path, "Replay target registry closed");
    }
}

impl TargetStore for SqliteTargetStore {
    fn insert_target(&self, connection_string: &str) -> StoreFuture<'_, ()> {
        let connection_string = connection_string.to_string();
        let pool = self.pool.clone();
        Box::pin(on_registry(self.handle.clone(), async move {
            let now = chrono::Utc::now().timestamp_millis();

            let result = execute_with_retry("registry_insert", || async {
                sqlx::query(
                    r#"
                    INSERT INTO replay_targets (connection_string, added_at)
                    VALUES (?, ?)
                    ON CONFLICT(connection_string) DO NOTHING
                    "#,
                )
                .bind(&connection_string)
                .bind(now)
                .execute(&pool)
                .await
            })
            .await?;

            if result.rows_affected() == 0 {
                debug!(connection_string = %connection_string, "Replay target already registered");
            }
            Ok(())
        }))
    }

    fn delete_target(&self, connection_string: &str) -> StoreFuture<'_, u64> {
        let connection_string = connection_string.to_string();
        let pool = self.pool.clone();
        Box::pin(on_registry(self.handle.clone(), async move {
            let result = execute_with_retry("registry_delete", || async {
                sqlx::query("DELETE FROM replay_targets WHERE connection_string = ?")
                    .bind(&connection_string)
                    .execute(&pool)
                    .await
            })
            .await?;

            Ok(result.rows_affected())
        }))
    }

    fn list_targets(&self) -> StoreFuture<'_, Vec<TargetDefinition>> {
        let pool = self.pool.clone();
        Box::pin(on_registry(self.handle.clone(), async move {
            let rows: Vec<(i64, String)> = execute_with_retry("registry_list", || async {
                sqlx::query_as("SELECT node_id, connection_string FROM replay_targets ORDER BY node_id")
                    .fetch_all(&pool)
                    .await
            })
            .await?;

            Ok(rows
                .into_iter()
                .map(|(node_id, connection_string)| TargetDefinition {
                    node_id,
                    connection_string,
                })
                .collect())
        }))
    }
}

/// Reads the full target list for a connection cache (re)build.
#[derive(Clone)]
pub struct NodeRegistryLoader {
    store: Arc<dyn TargetStore>,
}

impl NodeRegistryLoader {
    pub fn new(store: Arc<dyn TargetStore>) -> Self {
        Self { store }
    }

    /// Fetch every registered target.
    ///
    /// Store failures are logged and reported as an empty list.
    pub async fn fetch(&self) -> Vec<TargetDefinition> {
        match self.store.list_targets().await {
            Ok(targets) => {
                debug!(count = targets.len(), "Loaded replay targets");
                metrics::record_registry_fetch(true, targets.len());
                targets
            }
            Err(e) => {
                warn!(error = %e, "Replay target registry unavailable, treating as zero targets");
                metrics::record_registry_fetch(false, 0);
                Vec::new()
            }
        }
    }
}
