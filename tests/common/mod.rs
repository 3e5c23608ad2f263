//! Shared test utilities for interception, broadcast and integration tests.
//!
//! This module provides:
//! - A scripted host engine that runs nested statement trees
//! - A recording node connector with live and unreachable nodes
//! - A PostgreSQL wire stub that drops connections
//! - PostgreSQL testcontainer setup

#![allow(dead_code)]

pub mod containers;
pub mod fake_pg;
pub mod mock_host;
pub mod mock_nodes;

pub use containers::*;
pub use fake_pg::*;
pub use mock_host::*;
pub use mock_nodes::*;

/// Route `tracing` output through the test harness (`RUST_LOG` to filter).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
