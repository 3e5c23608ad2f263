// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Administrative operations on the target registry.
//!
//! Adding or removing a target only touches the registry. Connection caches
//! that were already built keep their old view until they are invalidated
//! (see [`ReplayEngine::invalidate()`](crate::replay::ReplayEngine::invalidate)).
//! Connection strings are not validated here; a malformed one fails the
//! first time a broadcast tries to reach it.

use crate::error::Result;
use crate::registry::TargetStore;
use std::sync::Arc;
use tracing::info;

/// Add/remove entry points exposed to the host as callable functions.
#[derive(Clone)]
pub struct ReplayAdmin {
    store: Arc<dyn TargetStore>,
}

impl ReplayAdmin {
    pub fn new(store: Arc<dyn TargetStore>) -> Self {
        Self { store }
    }

    /// Register a new replay target.
    pub async fn add_replay_target(&self, connection_string: &str) -> Result<()> {
        self.store.insert_target(connection_string).await?;
        info!(connection_string = %connection_string, "Replay target added");
        Ok(())
    }

    /// Remove every target registered under this connection string.
    pub async fn remove_replay_target(&self, connection_string: &str) -> Result<()> {
        let removed = self.store.delete_target(connection_string).await?;
        info!(connection_string = %connection_string, removed, "Replay target removed");
        Ok(())
    }
}
