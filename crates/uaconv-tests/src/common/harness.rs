// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! Connects a real [`Client`] to a [`MockServer`] over an in-memory stream.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uaconv_client::{Client, ClientConfig, NodeMonitor, UaResult};

use super::fixtures::ConfigFixtures;
use super::server::{MockServer, ServerScript};

/// A connected client and the server behind it.
pub struct TestHarness {
    /// The client, shareable with a node monitor.
    pub client: Arc<Client>,
    /// The scripted server.
    pub server: MockServer,
}

impl TestHarness {
    /// Connects with [`ConfigFixtures::local`].
    pub async fn connect(script: ServerScript) -> UaResult<Self> {
        Self::connect_with(script, ConfigFixtures::local()).await
    }

    /// Connects with `config`.
    pub async fn connect_with(script: ServerScript, config: ClientConfig) -> UaResult<Self> {
        let (connection, server) = MockServer::start(script);
        let client = Client::connector(config).connect_stream(connection).await?;
        Ok(Self {
            client: Arc::new(client),
            server,
        })
    }

    /// A node monitor over the client with its configured defaults.
    pub fn monitor(&self) -> NodeMonitor {
        NodeMonitor::new(
            self.client.clone(),
            self.client.config().subscription.clone(),
        )
    }
}

/// Fails the test if `future` takes longer than five seconds.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("test step timed out")
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
