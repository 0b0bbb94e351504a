// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The OPC UA client.
//!
//! [`Client::connect`] dials the endpoint, opens a secure channel,
//! establishes a session and hands the channel to a [`Dispatcher`]. From
//! then on requests may overlap, and a background publish loop serves the
//! subscriptions created through the [`SubscriptionService`] impl.
//!
//! # Example
//!
//! ```rust,ignore
//! use uaconv_client::{Client, ClientConfig};
//!
//! let client = Client::connect(ClientConfig::new("opc.tcp://localhost:4840")).await?;
//! let values = client.read(&["ns=2;s=Tank.Level".parse()?]).await?;
//! client.close().await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uaconv_proto::{
    CreateMonitoredItemsRequest, CreateMonitoredItemsResponse, CreateSubscriptionRequest,
    CreateSubscriptionResponse, DataValue, DeleteMonitoredItemsRequest,
    DeleteMonitoredItemsResponse, DeleteSubscriptionsRequest, DeleteSubscriptionsResponse,
    ModifyMonitoredItemsRequest, ModifyMonitoredItemsResponse, ModifySubscriptionRequest,
    ModifySubscriptionResponse, MonitoredItemCreateRequest, MonitoredItemCreateResult,
    MonitoredItemModifyRequest, MonitoredItemModifyResult, MonitoringMode, NodeId, ReadRequest,
    ReadResponse, ReadValueId, SetMonitoringModeRequest, SetMonitoringModeResponse, StatusCode,
    TimestampsToReturn,
};

use crate::config::{ClientConfig, SubscriptionSettings};
use crate::dispatcher::Dispatcher;
use crate::error::{UaErrorContext, UaResult};
use crate::identity::IdentityEncoder;
use crate::keystore::KeyStore;
use crate::publish::{PublishLoop, PublishNotification, SubscriptionRegistry, SubscriptionService};
use crate::response::{check_results, expect, expect_good};
use crate::secure_channel::SecureChannel;
use crate::security::{check_policy, Signer};
use crate::session::{Session, SessionInfo, SessionState};
use crate::transport::{self, BoxConnection};

// =============================================================================
// ReadResult
// =============================================================================

/// Outcome of a Read: the service result and one value per node.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    /// Service result from the response header.
    pub service_result: StatusCode,
    /// Values in request order; each carries its own status.
    pub values: Vec<DataValue>,
}

// =============================================================================
// Connector
// =============================================================================

/// Connection options beyond the configuration.
pub struct Connector {
    config: ClientConfig,
    keys: Arc<KeyStore>,
    signer: Option<Arc<dyn Signer>>,
    identity_encoder: Option<Arc<dyn IdentityEncoder>>,
}

impl Connector {
    /// Uses `keys` for the client certificate.
    pub fn key_store(mut self, keys: Arc<KeyStore>) -> Self {
        self.keys = keys;
        self
    }

    /// Uses `signer` for session signatures.
    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Uses `encoder` for the user identity token.
    pub fn identity_encoder(mut self, encoder: Arc<dyn IdentityEncoder>) -> Self {
        self.identity_encoder = Some(encoder);
        self
    }

    /// Dials the configured endpoint and establishes the session.
    pub async fn connect(self) -> UaResult<Client> {
        self.validate()?;
        let (connection, _ack) = transport::dial(&self.config).await?;
        self.establish(connection).await
    }

    /// Performs the handshake over an existing stream, then establishes
    /// the session.
    pub async fn connect_stream(self, mut stream: BoxConnection) -> UaResult<Client> {
        self.validate()?;
        transport::handshake(&mut stream, &self.config.hello())
            .await
            .with_endpoint(&self.config.endpoint)?;
        self.establish(stream).await
    }

    fn validate(&self) -> UaResult<()> {
        self.config.validate()?;
        check_policy(self.config.channel.security_policy, self.signer.as_deref())
    }

    async fn establish(self, connection: BoxConnection) -> UaResult<Client> {
        let config = Arc::new(self.config);
        let mut session = Session::new(Arc::clone(&config), Arc::clone(&self.keys))?;
        if let Some(signer) = self.signer {
            session = session.with_signer(signer);
        }
        if let Some(encoder) = self.identity_encoder {
            session = session.with_identity_encoder(encoder);
        }

        let mut channel = SecureChannel::new(connection, &config);
        if let Err(e) = channel.open().await {
            channel.close().await;
            return Err(e);
        }
        if let Err(e) = session.open(&mut channel).await {
            channel.close().await;
            return Err(e);
        }

        let dispatcher = Dispatcher::start(channel, session.authentication_token());
        let registry = Arc::new(SubscriptionRegistry::new());
        let cancel = CancellationToken::new();
        let publish = PublishLoop::new(
            Arc::clone(&dispatcher),
            Arc::clone(&registry),
            config.publish.clone(),
            cancel.clone(),
        );
        let publish_task = tokio::spawn(publish.run());

        info!(endpoint = %config.endpoint, "Client connected");
        Ok(Client {
            config,
            keys: self.keys,
            session: Mutex::new(session),
            dispatcher,
            registry,
            cancel,
            publish_task: Mutex::new(Some(publish_task)),
        })
    }
}

// =============================================================================
// Client
// =============================================================================

/// A connected client with an activated session.
pub struct Client {
    config: Arc<ClientConfig>,
    keys: Arc<KeyStore>,
    session: Mutex<Session>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<SubscriptionRegistry>,
    cancel: CancellationToken,
    publish_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Connection options for `config`.
    pub fn connector(config: ClientConfig) -> Connector {
        Connector {
            config,
            keys: Arc::new(KeyStore::new()),
            signer: None,
            identity_encoder: None,
        }
    }

    /// Dials, opens the channel and establishes the session with defaults.
    pub async fn connect(config: ClientConfig) -> UaResult<Self> {
        Self::connector(config).connect().await
    }

    /// The configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The key store in use.
    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Current session state.
    pub async fn session_state(&self) -> SessionState {
        self.session.lock().await.state()
    }

    /// Session parameters.
    pub async fn session_info(&self) -> Option<SessionInfo> {
        self.session.lock().await.info().cloned()
    }

    /// Number of subscriptions served by the publish loop.
    pub fn subscriptions(&self) -> usize {
        self.registry.len()
    }

    /// Reads the Value attribute of `nodes`.
    pub async fn read(&self, nodes: &[NodeId]) -> UaResult<ReadResult> {
        let request = ReadRequest {
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: nodes.iter().cloned().map(ReadValueId::value_of).collect(),
        };
        let envelope = self.dispatcher.call(request).await?;
        let (header, response) = expect::<ReadResponse>(envelope)?;
        debug!(
            nodes = nodes.len(),
            status = %header.service_result,
            "Read completed"
        );
        Ok(ReadResult {
            service_result: header.service_result,
            values: response.results,
        })
    }

    /// Closes the session, then the channel.
    ///
    /// The channel is closed even if CloseSession fails; that error is
    /// returned afterwards.
    pub async fn close(&self) -> UaResult<()> {
        self.cancel.cancel();
        if let Some(task) = self.publish_task.lock().await.take() {
            let _ = task.await;
        }
        let result = self.session.lock().await.close(&self.dispatcher).await;
        self.dispatcher.close().await;
        info!(endpoint = %self.config.endpoint, "Client closed");
        result
    }
}

#[async_trait]
impl SubscriptionService for Client {
    async fn subscribe(
        &self,
        settings: &SubscriptionSettings,
        notify: mpsc::Sender<PublishNotification>,
    ) -> UaResult<u32> {
        let request = CreateSubscriptionRequest {
            requested_publishing_interval: settings.publishing_interval_millis(),
            requested_lifetime_count: settings.lifetime_count,
            requested_max_keep_alive_count: settings.keepalive_count,
            max_notifications_per_publish: settings.max_notifications_per_publish,
            publishing_enabled: settings.publishing_enabled,
            priority: settings.priority,
        };
        let envelope = self.dispatcher.call(request).await?;
        let (_, response) = expect_good::<CreateSubscriptionResponse>(envelope)?;

        info!(
            subscription_id = response.subscription_id,
            revised_publishing_interval = response.revised_publishing_interval,
            "Subscription created"
        );
        self.registry.register(response.subscription_id, notify);
        Ok(response.subscription_id)
    }

    async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: Vec<MonitoredItemCreateRequest>,
    ) -> UaResult<Vec<MonitoredItemCreateResult>> {
        let request = CreateMonitoredItemsRequest {
            subscription_id,
            timestamps_to_return: TimestampsToReturn::Both,
            items_to_create: items,
        };
        let envelope = self.dispatcher.call(request).await?;
        let (_, response) = expect_good::<CreateMonitoredItemsResponse>(envelope)
            .with_subscription(subscription_id)?;
        Ok(response.results)
    }

    async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        monitored_item_ids: Vec<u32>,
    ) -> UaResult<Vec<StatusCode>> {
        let request = DeleteMonitoredItemsRequest {
            subscription_id,
            monitored_item_ids,
        };
        let envelope = self.dispatcher.call(request).await?;
        let (_, response) = expect_good::<DeleteMonitoredItemsResponse>(envelope)
            .with_subscription(subscription_id)?;
        Ok(response.results)
    }

    async fn modify_monitored_items(
        &self,
        subscription_id: u32,
        items: Vec<MonitoredItemModifyRequest>,
    ) -> UaResult<Vec<MonitoredItemModifyResult>> {
        let request = ModifyMonitoredItemsRequest {
            subscription_id,
            timestamps_to_return: TimestampsToReturn::Both,
            items_to_modify: items,
        };
        let envelope = self.dispatcher.call(request).await?;
        let (_, response) = expect_good::<ModifyMonitoredItemsResponse>(envelope)
            .with_subscription(subscription_id)?;
        Ok(response.results)
    }

    async fn set_monitoring_mode(
        &self,
        subscription_id: u32,
        mode: MonitoringMode,
        monitored_item_ids: Vec<u32>,
    ) -> UaResult<Vec<StatusCode>> {
        let request = SetMonitoringModeRequest {
            subscription_id,
            monitoring_mode: mode,
            monitored_item_ids,
        };
        let envelope = self.dispatcher.call(request).await?;
        let (_, response) = expect_good::<SetMonitoringModeResponse>(envelope)
            .with_subscription(subscription_id)?;
        Ok(response.results)
    }

    async fn modify_subscription(
        &self,
        subscription_id: u32,
        settings: &SubscriptionSettings,
    ) -> UaResult<ModifySubscriptionResponse> {
        let request = ModifySubscriptionRequest {
            subscription_id,
            requested_publishing_interval: settings.publishing_interval_millis(),
            requested_lifetime_count: settings.lifetime_count,
            requested_max_keep_alive_count: settings.keepalive_count,
            max_notifications_per_publish: settings.max_notifications_per_publish,
            priority: settings.priority,
        };
        let envelope = self.dispatcher.call(request).await?;
        let (_, response) = expect_good::<ModifySubscriptionResponse>(envelope)
            .with_subscription(subscription_id)?;
        info!(
            subscription_id,
            revised_publishing_interval = response.revised_publishing_interval,
            "Subscription modified"
        );
        Ok(response)
    }

    async fn cancel(&self, subscription_id: u32) -> UaResult<()> {
        self.registry.unregister(subscription_id);
        let request = DeleteSubscriptionsRequest {
            subscription_ids: vec![subscription_id],
        };
        let envelope = self.dispatcher.call(request).await?;
        let (_, response) = expect_good::<DeleteSubscriptionsResponse>(envelope)?;
        check_results("DeleteSubscriptions", &response.results, 1)?;
        info!(subscription_id, "Subscription deleted");
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
