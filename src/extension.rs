// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Module registration.
//!
//! [`ReplayExtension`] is what the host loads once at startup. It owns the
//! target registry handle, the node connector and the runtime switch, and
//! hands out the pieces the host needs:
//!
//! - [`install()`](ReplayExtension::install): add the replay interceptor to
//!   the host's pipeline, chained after anything already installed
//! - [`new_session()`](ReplayExtension::new_session): a fresh per-session
//!   context with its own depth counter and connection cache
//! - [`admin()`](ReplayExtension::admin): the add/remove target functions
//! - [`switch()`](ReplayExtension::switch): the runtime enable switch

use crate::admin::ReplayAdmin;
use crate::config::ReplayConfig;
use crate::error::Result;
use crate::intercept::{HostEngine, PipelineBuilder, ReplayInterceptor, ReplaySwitch};
use crate::node::{NodeConnector, PgConnector};
use crate::registry::{NodeRegistryLoader, SqliteTargetStore, TargetStore};
use crate::replay::{BlockingReplaySink, ReplayEngine};
use crate::session::SessionContext;
use std::sync::Arc;
use tracing::info;

/// The loaded replay extension.
#[derive(Clone)]
pub struct ReplayExtension {
    config: ReplayConfig,
    store: Arc<dyn TargetStore>,
    connector: Arc<dyn NodeConnector>,
    switch: ReplaySwitch,
}

impl ReplayExtension {
    /// Open the SQLite registry and use PostgreSQL for remote nodes.
    pub async fn open(config: ReplayConfig) -> Result<Self> {
        Self::open_with_connector(config, Arc::new(PgConnector)).await
    }

    /// Open the SQLite registry and reach nodes through `connector`.
    pub async fn open_with_connector(config: ReplayConfig, connector: Arc<dyn NodeConnector>) -> Result<Self> {
        let store = SqliteTargetStore::open(&config.registry).await?;
        Ok(Self::with_parts(config, Arc::new(store), connector))
    }

    /// Build from an existing registry and connector.
    pub fn with_parts(config: ReplayConfig, store: Arc<dyn TargetStore>, connector: Arc<dyn NodeConnector>) -> Self {
        let switch = ReplaySwitch::new(config.enabled);
        info!(
            enabled = config.enabled,
            planner_placeholder = %config.planner_placeholder,
            "Replay extension loaded"
        );
        Self {
            config,
            store,
            connector,
            switch,
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// A new interceptor bound to this extension's switch.
    pub fn interceptor(&self) -> ReplayInterceptor {
        ReplayInterceptor::new(self.switch.clone(), self.config.planner_placeholder.clone())
    }

    /// Install the replay interceptor on top of whatever `builder` holds.
    pub fn install<H: HostEngine>(&self, builder: PipelineBuilder<H>) -> PipelineBuilder<H> {
        builder.install(self.interceptor())
    }

    /// Context for a new client session.
    ///
    /// The session's connection cache is empty until its first broadcast.
    pub fn new_session(&self) -> Result<SessionContext> {
        let engine = ReplayEngine::new(
            NodeRegistryLoader::new(self.store.clone()),
            self.connector.clone(),
            &self.config.nodes,
        );
        let sink = BlockingReplaySink::new(engine)?;
        Ok(SessionContext::new(Box::new(sink)))
    }

    pub fn admin(&self) -> ReplayAdmin {
        ReplayAdmin::new(self.store.clone())
    }

    pub fn switch(&self) -> &ReplaySwitch {
        &self.switch
    }
}
