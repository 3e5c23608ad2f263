// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the replay extension.
//!
//! Configuration is passed to [`ReplayExtension::open()`](crate::ReplayExtension::open)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use pg_replay::config::{ReplayConfig, RegistryConfig};
//!
//! let config = ReplayConfig {
//!     registry: RegistryConfig {
//!         sqlite_path: "/var/lib/replay/targets.db".into(),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! assert!(config.enabled);
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplayConfig
//! ├── enabled: bool                  # Runtime switch initial value
//! ├── planner_placeholder: String    # Statement sent for top-level plans
//! ├── registry: RegistryConfig       # SQLite target registry
//! └── nodes: NodeConfig              # Remote node timeouts
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! enabled: true
//! registry:
//!   sqlite_path: "/var/lib/replay/targets.db"
//! nodes:
//!   connect_timeout: "5s"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `ReplayExtension::open()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Initial value of the runtime switch. When false, the interceptor
    /// delegates straight through with no bookkeeping.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Statement broadcast when a top-level statement finishes planning.
    ///
    /// Parsed query trees are not deparsed back to SQL, so a fixed statement
    /// stands in for the real one.
    #[serde(default = "default_planner_placeholder")]
    pub planner_placeholder: String,

    /// Target registry settings.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Remote node settings.
    #[serde(default)]
    pub nodes: NodeConfig,
}

fn default_true() -> bool {
    true
}

fn default_planner_placeholder() -> String {
    "SELECT 1".to_string()
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            planner_placeholder: default_planner_placeholder(),
            registry: RegistryConfig::default(),
            nodes: NodeConfig::default(),
        }
    }
}

impl ReplayConfig {
    /// Create a minimal config for testing (in-memory registry).
    pub fn for_testing() -> Self {
        Self {
            registry: RegistryConfig::in_memory(),
            ..Default::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RegistryConfig: where target definitions live
// ═══════════════════════════════════════════════════════════════════════════════

/// Target registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Path to the SQLite database holding `replay_targets`.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    /// Whether to use WAL mode for SQLite.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

fn default_sqlite_path() -> String {
    "replay_targets.db".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            wal_mode: true,
        }
    }
}

impl RegistryConfig {
    /// Create an in-memory config for testing.
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: ":memory:".to_string(),
            wal_mode: false,
        }
    }

    /// Whether this config points at a private in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.sqlite_path == ":memory:"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NodeConfig: remote node timeouts
// ═══════════════════════════════════════════════════════════════════════════════

/// Remote node configuration.
///
/// Both timeouts are duration strings (e.g. `"5s"`, `"500ms"`). Unset means
/// unbounded: a hung node stalls the triggering statement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Upper bound for establishing a connection to one node.
    #[serde(default)]
    pub connect_timeout: Option<String>,

    /// Upper bound for one statement on one node.
    #[serde(default)]
    pub statement_timeout: Option<String>,
}

impl NodeConfig {
    /// Parsed connect timeout. Unparseable values are treated as unset.
    pub fn connect_timeout_duration(&self) -> Option<Duration> {
        parse_optional_duration(self.connect_timeout.as_deref())
    }

    /// Parsed statement timeout. Unparseable values are treated as unset.
    pub fn statement_timeout_duration(&self) -> Option<Duration> {
        parse_optional_duration(self.statement_timeout.as_deref())
    }
}

fn parse_optional_duration(value: Option<&str>) -> Option<Duration> {
    let raw = value?;
    match humantime::parse_duration(raw) {
        Ok(duration) => Some(duration),
        Err(e) => {
            tracing::warn!(value = %raw, error = %e, "Ignoring invalid duration");
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
