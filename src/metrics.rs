// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Replication outcomes never change the result of the triggering statement,
//! so logs and these metrics are the only place failures show up.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replay_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a top-level statement detected by the interceptor.
pub fn record_top_level_statement(phase: &str) {
    counter!("replay_top_level_statements_total", "phase" => phase.to_string()).increment(1);
}

/// Record one completed broadcast.
pub fn record_broadcast(nodes: usize, delivered: usize, failed: usize, duration: Duration) {
    counter!("replay_broadcasts_total").increment(1);
    counter!("replay_broadcast_delivered_total").increment(delivered as u64);
    if failed > 0 {
        counter!("replay_broadcast_failed_total").increment(failed as u64);
    }
    histogram!("replay_broadcast_nodes").record(nodes as f64);
    histogram!("replay_broadcast_duration_seconds").record(duration.as_secs_f64());
}

/// Record a node connection attempt.
pub fn record_node_connection(node_id: i64, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("replay_node_connections_total", "node_id" => node_id.to_string(), "status" => status).increment(1);
}

/// Record a statement sent to a node.
pub fn record_node_command(node_id: i64, success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("replay_node_commands_total", "node_id" => node_id.to_string(), "status" => status).increment(1);
    histogram!("replay_node_command_duration_seconds", "node_id" => node_id.to_string())
        .record(duration.as_secs_f64());
}

/// Record errors by type.
pub fn record_error(node_id: i64, error_type: &str) {
    counter!("replay_errors_total", "node_id" => node_id.to_string(), "error_type" => error_type.to_string()).increment(1);
}

/// Record a registry read.
pub fn record_registry_fetch(success: bool, targets: usize) {
    let status = if success { "success" } else { "failure" };
    counter!("replay_registry_fetches_total", "status" => status).increment(1);
    if success {
        gauge!("replay_registry_targets").set(targets as f64);
    }
}

/// Record registry SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn registry_retries_total(operation: &str) {
    counter!("replay_registry_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Gauge for the number of entries in a session's connection cache.
pub fn set_cached_nodes(count: usize) {
    gauge!("replay_cached_nodes").set(count as f64);
}
