// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for PostgreSQL.
//!
//! Provides helpers to spin up PostgreSQL containers acting as replay targets.

use std::time::Duration;
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};
use tokio_postgres::NoTls;

/// Create a PostgreSQL container with user/password `postgres`.
///
/// The server logs "ready to accept connections" once during init and once
/// after restart; callers should use [`connect_with_retry`].
pub fn postgres_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("postgres", "16-alpine")
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_exposed_port(5432)
        .with_wait_for(WaitFor::message_on_stderr("database system is ready to accept connections"));
    docker.run(image)
}

/// libpq-style connection string for a container.
pub fn postgres_conninfo(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(5432);
    format!("host=127.0.0.1 port={} user=postgres password=postgres dbname=postgres", port)
}

/// Connect, retrying while the server finishes starting.
pub async fn connect_with_retry(conninfo: &str) -> tokio_postgres::Client {
    let mut last_error = None;
    for _ in 0..30 {
        match tokio_postgres::connect(conninfo, NoTls).await {
            Ok((client, connection)) => {
                tokio::spawn(async move {
                    let _ = connection.await;
                });
                return client;
            }
            Err(e) => {
                last_error = Some(e);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
    panic!("postgres never became ready: {:?}", last_error);
}

/// A PostgreSQL replay target.
pub struct TestNode<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    container: Container<'a, GenericImage>,
    pub conninfo: String,
}

impl<'a> TestNode<'a> {
    pub fn new(docker: &'a Cli) -> Self {
        let container = postgres_container(docker);
        let conninfo = postgres_conninfo(&container);
        Self { container, conninfo }
    }

    /// A direct client for seeding and checking the node.
    pub async fn client(&self) -> tokio_postgres::Client {
        connect_with_retry(&self.conninfo).await
    }

    /// Row count of `table`.
    pub async fn count(&self, table: &str) -> i64 {
        let client = self.client().await;
        let row = client
            .query_one(&format!("SELECT count(*) FROM {}", table), &[])
            .await
            .unwrap();
        row.get(0)
    }
}
