// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Node monitor and the subscription notification pump.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         NodeMonitor                          │
//! │   next_client_handle (shared)   error handler (optional)     │
//! └──────────────────────────────────────────────────────────────┘
//!          │ subscribe / channel_subscribe
//!          ▼
//! ┌──────────────────┐   publish    ┌──────────────────────────┐
//! │ SubscriptionSvc  │ ───────────▶ │ notify queue (16)        │
//! └──────────────────┘              └──────────────────────────┘
//!                                                │ callbacks only: admit task,
//!                                                │ try_send into 8192 slots,
//!                                                │ drop whole notification if full
//!                                                ▼ pump task
//!                             handles: client handle → NodeId
//!                                                │
//!                         ┌──────────────────────┴──────────────┐
//!                         ▼                                     ▼
//!               mpsc::Sender<Message>                 MessageHandler
//!               (try_send, drop if full)              (called in order)
//! ```
//!
//! Every processed item is either delivered or dropped, so
//! `delivered() + dropped()` equals the number of items seen.
//!
//! # Adding nodes
//!
//! Nodes are added in one CreateMonitoredItems batch, either by node id
//! with the subscription's defaults or as [`MonitorRequest`]s carrying their
//! own monitoring mode and parameters. When the server
//! accepts some items and rejects others, the accepted ones stay
//! registered with their server ids, the rejected ones are unregistered
//! and the first rejection is returned as [`ServiceError::BadItem`]. If the
//! request itself fails, or the result count does not match, the whole
//! batch is unregistered.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock as SyncRwLock;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uaconv_proto::{
    CodecError, DataChangeNotification, DataValue, EventFilter, EventNotificationList,
    ExtensionObject, ModifySubscriptionResponse, MonitoredItemCreateRequest,
    MonitoredItemModifyRequest, MonitoringMode, MonitoringParameters, NodeId, NotificationData,
    ReadValueId, StatusCode,
};

use crate::config::SubscriptionSettings;
use crate::error::{ProtocolError, ServiceError, SubscriptionError, UaError, UaResult};
use crate::publish::{PublishNotification, SubscriptionService};
use crate::response::check_results;

/// Internal queue length for callback delivery.
pub const CALLBACK_QUEUE_LEN: usize = 8192;

/// Internal queue length for channel delivery.
pub const CHANNEL_QUEUE_LEN: usize = 16;

/// The handle counter starts here; the first issued handle is one more.
const INITIAL_CLIENT_HANDLE: u32 = 100;

/// Receives delivery errors: the subscription id and the error.
pub type ErrorHandler = Arc<dyn Fn(u32, UaError) + Send + Sync>;

// =============================================================================
// Messages
// =============================================================================

/// A changed value of one monitored node.
#[derive(Debug, Clone)]
pub struct DataChangeMessage {
    /// The node, if its handle is known.
    pub node_id: Option<NodeId>,
    /// The new value.
    pub value: Option<DataValue>,
    /// Set when the handle could not be resolved.
    pub error: Option<UaError>,
}

/// One event reported by a monitored node.
#[derive(Debug, Clone)]
pub struct EventMessage {
    /// The notifier node, if its handle is known.
    pub node_id: Option<NodeId>,
    /// Selected fields in select-clause order.
    pub fields: Vec<DataValue>,
    /// Publish time of the notification message.
    pub publish_time: DateTime<Utc>,
    /// Set when the handle could not be resolved.
    pub error: Option<UaError>,
}

/// What a subscriber receives.
#[derive(Debug, Clone)]
pub enum Message {
    /// A data change.
    DataChange(DataChangeMessage),
    /// An event.
    Event(EventMessage),
}

impl Message {
    /// The node the message is about.
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            Self::DataChange(m) => m.node_id.as_ref(),
            Self::Event(m) => m.node_id.as_ref(),
        }
    }

    /// The delivery error, if any.
    pub fn error(&self) -> Option<&UaError> {
        match self {
            Self::DataChange(m) => m.error.as_ref(),
            Self::Event(m) => m.error.as_ref(),
        }
    }
}

/// Synchronous consumer of messages.
pub trait MessageHandler: Send + 'static {
    /// Handles one message of `subscription_id`.
    fn handle(&mut self, subscription_id: u32, message: Message);
}

impl<F> MessageHandler for F
where
    F: FnMut(u32, Message) + Send + 'static,
{
    fn handle(&mut self, subscription_id: u32, message: Message) {
        self(subscription_id, message)
    }
}

enum Delivery {
    Channel(mpsc::Sender<Message>),
    Callback(Box<dyn MessageHandler>),
}

// =============================================================================
// SubscribeArgs
// =============================================================================

/// Arguments for creating a subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscribeArgs {
    /// Subscription settings; the monitor's defaults when `None`.
    pub settings: Option<SubscriptionSettings>,
    /// Initial nodes, in `ns=<n>;i=<id>` syntax.
    pub nodes: Vec<String>,
    /// Watch events with this filter instead of values.
    pub events: Option<EventFilter>,
    /// Stops the delivery task when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl SubscribeArgs {
    /// Arguments with initial `nodes`.
    pub fn nodes<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Overrides the subscription settings.
    pub fn with_settings(mut self, settings: SubscriptionSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Monitors events selected by `filter`.
    pub fn with_events(mut self, filter: EventFilter) -> Self {
        self.events = Some(filter);
        self
    }

    /// Stops delivery when `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

// =============================================================================
// MonitorRequest
// =============================================================================

/// A node to monitor with its own mode and parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorRequest {
    /// The node.
    pub node_id: NodeId,
    /// Monitoring mode; Reporting by default.
    pub monitoring_mode: MonitoringMode,
    /// Parameters replacing the subscription's defaults. The client handle
    /// is always assigned by the subscription.
    pub parameters: Option<MonitoringParameters>,
}

impl MonitorRequest {
    /// Reports `node_id` with default parameters.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            monitoring_mode: MonitoringMode::Reporting,
            parameters: None,
        }
    }

    /// Parses `node` first.
    pub fn parse(node: &str) -> UaResult<Self> {
        Ok(Self::new(node.parse()?))
    }

    /// Sets the monitoring mode.
    pub fn with_mode(mut self, mode: MonitoringMode) -> Self {
        self.monitoring_mode = mode;
        self
    }

    /// Sets the monitoring parameters.
    pub fn with_parameters(mut self, parameters: MonitoringParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

// =============================================================================
// NodeMonitor
// =============================================================================

/// Creates subscriptions that share one client handle counter.
pub struct NodeMonitor {
    service: Arc<dyn SubscriptionService>,
    settings: SubscriptionSettings,
    next_client_handle: Arc<AtomicU32>,
    error_handler: Option<ErrorHandler>,
}

impl NodeMonitor {
    /// Creates a monitor over `service` with default subscription settings.
    pub fn new(service: Arc<dyn SubscriptionService>, settings: SubscriptionSettings) -> Self {
        Self {
            service,
            settings,
            next_client_handle: Arc::new(AtomicU32::new(INITIAL_CLIENT_HANDLE)),
            error_handler: None,
        }
    }

    /// Sets the handler for asynchronous delivery errors. It runs on its
    /// own task for each error.
    pub fn set_error_handler<F>(&mut self, handler: F)
    where
        F: Fn(u32, UaError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
    }

    /// Last client handle issued (100 before any).
    pub fn last_client_handle(&self) -> u32 {
        self.next_client_handle.load(Ordering::SeqCst)
    }

    /// Creates a subscription delivering to `handler`.
    ///
    /// The handler runs on the delivery task, so a slow handler backs up
    /// the internal queue; once it is full, notifications are dropped and
    /// reported as slow-consumer errors. Call
    /// [`Subscription::unsubscribe`] to release the subscription.
    pub async fn subscribe(
        &self,
        args: SubscribeArgs,
        handler: impl MessageHandler,
    ) -> UaResult<Subscription> {
        self.start(args, Delivery::Callback(Box::new(handler))).await
    }

    /// Creates a subscription delivering to `channel`.
    ///
    /// Delivery never waits: when the channel is full the message is
    /// dropped and a slow-consumer error reported, so size the channel to
    /// absorb bursts.
    pub async fn channel_subscribe(
        &self,
        args: SubscribeArgs,
        channel: mpsc::Sender<Message>,
    ) -> UaResult<Subscription> {
        self.start(args, Delivery::Channel(channel)).await
    }

    async fn start(&self, args: SubscribeArgs, delivery: Delivery) -> UaResult<Subscription> {
        let nodes = NodeId::parse_all(&args.nodes)?;
        let settings = args.settings.unwrap_or_else(|| self.settings.clone());
        settings.validate()?;

        let (notify_tx, notify_rx) = mpsc::channel(CHANNEL_QUEUE_LEN);
        let subscription_id = self.service.subscribe(&settings, notify_tx).await?;
        let shared = Arc::new(Shared {
            subscription_id,
            service: Arc::clone(&self.service),
            events: args.events.map(|filter| filter.to_extension_object()),
            settings: SyncRwLock::new(settings),
            next_client_handle: Arc::clone(&self.next_client_handle),
            error_handler: self.error_handler.clone(),
            registrations: RwLock::new(Registrations::default()),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            closed_signal: CancellationToken::new(),
        });
        let subscription = Subscription {
            shared: Arc::clone(&shared),
        };

        if let Err(e) = subscription.add_node_ids(&nodes).await {
            if let Err(cancel_error) = subscription.unsubscribe().await {
                debug!(subscription_id, error = %cancel_error, "Cancel after failed add also failed");
            }
            return Err(e);
        }

        let cancel = args.cancel.unwrap_or_default();
        let queue = match delivery {
            Delivery::Callback(_) => {
                let (queue_tx, queue_rx) = mpsc::channel(CALLBACK_QUEUE_LEN);
                tokio::spawn(admit(Arc::clone(&shared), notify_rx, queue_tx, cancel.clone()));
                queue_rx
            }
            Delivery::Channel(_) => notify_rx,
        };
        tokio::spawn(pump(shared, queue, delivery, cancel));
        Ok(subscription)
    }
}

impl fmt::Debug for NodeMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeMonitor")
            .field("next_client_handle", &self.last_client_handle())
            .field("has_error_handler", &self.error_handler.is_some())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Registrations
// =============================================================================

/// A registered monitored item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredItem {
    /// The monitored node.
    pub node_id: NodeId,
    /// Handle chosen by the client.
    pub client_handle: u32,
    /// Id assigned by the server (0 while the create is in flight).
    pub monitored_item_id: u32,
    /// Current monitoring mode.
    pub monitoring_mode: MonitoringMode,
}

/// Both maps, always mutated together.
#[derive(Debug, Default)]
struct Registrations {
    handles: HashMap<u32, NodeId>,
    node_lookup: HashMap<String, MonitoredItem>,
}

impl Registrations {
    fn insert(&mut self, client_handle: u32, node_id: NodeId, monitoring_mode: MonitoringMode) {
        self.node_lookup.insert(
            node_id.to_string(),
            MonitoredItem {
                node_id: node_id.clone(),
                client_handle,
                monitored_item_id: 0,
                monitoring_mode,
            },
        );
        self.handles.insert(client_handle, node_id);
    }

    fn remove_handle(&mut self, client_handle: u32) -> Option<MonitoredItem> {
        let node_id = self.handles.remove(&client_handle)?;
        self.node_lookup.remove(&node_id.to_string())
    }

    fn remove_node(&mut self, key: &str) -> Option<MonitoredItem> {
        let item = self.node_lookup.remove(key)?;
        self.handles.remove(&item.client_handle);
        Some(item)
    }

    fn set_item_id(&mut self, client_handle: u32, monitored_item_id: u32) {
        if let Some(node_id) = self.handles.get(&client_handle) {
            if let Some(item) = self.node_lookup.get_mut(&node_id.to_string()) {
                item.monitored_item_id = monitored_item_id;
            }
        }
    }

    fn item(&self, client_handle: u32) -> Option<&MonitoredItem> {
        let node_id = self.handles.get(&client_handle)?;
        self.node_lookup.get(&node_id.to_string())
    }

    /// Keys of `nodes`, or NotFound for the first one not monitored.
    fn existing_keys(&self, nodes: &[NodeId]) -> UaResult<Vec<String>> {
        let keys: Vec<String> = nodes.iter().map(NodeId::to_string).collect();
        match keys.iter().find(|key| !self.node_lookup.contains_key(*key)) {
            Some(missing) => Err(SubscriptionError::not_found(missing.clone()).into()),
            None => Ok(keys),
        }
    }
}

// =============================================================================
// Subscription
// =============================================================================

struct Shared {
    subscription_id: u32,
    service: Arc<dyn SubscriptionService>,
    settings: SyncRwLock<SubscriptionSettings>,
    events: Option<ExtensionObject>,
    next_client_handle: Arc<AtomicU32>,
    error_handler: Option<ErrorHandler>,
    registrations: RwLock<Registrations>,
    delivered: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
    closed_signal: CancellationToken,
}

/// An active subscription. Nodes may be added and removed concurrently.
///
/// Cancelling the token passed in [`SubscribeArgs`] stops delivery, but
/// [`unsubscribe`](Self::unsubscribe) must still be called to delete the
/// server-side subscription.
#[derive(Clone)]
pub struct Subscription {
    shared: Arc<Shared>,
}

impl Subscription {
    /// Server-assigned subscription id.
    pub fn subscription_id(&self) -> u32 {
        self.shared.subscription_id
    }

    /// Number of monitored nodes.
    pub async fn subscribed(&self) -> usize {
        self.shared.registrations.read().await.handles.len()
    }

    /// Messages handed to the consumer.
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::SeqCst)
    }

    /// Items dropped because the consumer was too slow.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::SeqCst)
    }

    /// Current subscription settings.
    pub fn settings(&self) -> SubscriptionSettings {
        self.shared.settings.read().clone()
    }

    /// Returns `true` once [`unsubscribe`](Self::unsubscribe) was called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Snapshot of the monitored items, ordered by client handle.
    pub async fn monitored_items(&self) -> Vec<MonitoredItem> {
        let registrations = self.shared.registrations.read().await;
        let mut items: Vec<_> = registrations.node_lookup.values().cloned().collect();
        items.sort_by_key(|item| item.client_handle);
        items
    }

    /// Adds nodes given in string form. Nothing changes if any fails to parse.
    pub async fn add_nodes<S: AsRef<str>>(&self, nodes: &[S]) -> UaResult<()> {
        let nodes = NodeId::parse_all(nodes)?;
        self.add_node_ids(&nodes).await
    }

    /// Adds nodes in one CreateMonitoredItems request.
    ///
    /// An empty list is a no-op. A node that is already monitored fails
    /// the call before anything is sent.
    pub async fn add_node_ids(&self, nodes: &[NodeId]) -> UaResult<()> {
        let requests: Vec<_> = nodes.iter().cloned().map(MonitorRequest::new).collect();
        let events = self.shared.events.clone();
        self.add_requests(&requests, events).await.map(|_| ())
    }

    /// Adds value items with their own mode and parameters. Returns the
    /// created items in request order.
    pub async fn add_monitor_items(&self, requests: &[MonitorRequest]) -> UaResult<Vec<MonitoredItem>> {
        self.add_requests(requests, None).await
    }

    /// Adds event items selected by `filter`. A request whose parameters
    /// carry no filter gets `filter`.
    pub async fn add_monitor_events(
        &self,
        filter: &EventFilter,
        requests: &[MonitorRequest],
    ) -> UaResult<Vec<MonitoredItem>> {
        self.add_requests(requests, Some(filter.to_extension_object()))
            .await
    }

    async fn add_requests(
        &self,
        requests: &[MonitorRequest],
        events: Option<ExtensionObject>,
    ) -> UaResult<Vec<MonitoredItem>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let shared = &self.shared;
        let mut registrations = shared.registrations.write().await;

        let mut batch = HashSet::with_capacity(requests.len());
        for request in requests {
            let key = request.node_id.to_string();
            if registrations.node_lookup.contains_key(&key) || !batch.insert(key.clone()) {
                return Err(SubscriptionError::already_monitored(key).into());
            }
        }

        let mut handles = Vec::with_capacity(requests.len());
        let mut items = Vec::with_capacity(requests.len());
        for request in requests {
            let handle = shared.next_client_handle.fetch_add(1, Ordering::SeqCst) + 1;
            registrations.insert(handle, request.node_id.clone(), request.monitoring_mode);
            items.push(shared.create_request(request, handle, events.as_ref()));
            handles.push(handle);
        }

        let results = match shared
            .service
            .create_monitored_items(shared.subscription_id, items)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                for handle in &handles {
                    registrations.remove_handle(*handle);
                }
                return Err(e);
            }
        };
        if results.len() != handles.len() {
            for handle in &handles {
                registrations.remove_handle(*handle);
            }
            return Err(ServiceError::ResultCountMismatch {
                service: "CreateMonitoredItems",
                expected: handles.len(),
                actual: results.len(),
            }
            .into());
        }

        let mut first_rejection = None;
        for (index, (handle, result)) in handles.iter().zip(&results).enumerate() {
            if result.status_code.is_good() {
                registrations.set_item_id(*handle, result.monitored_item_id);
            } else {
                registrations.remove_handle(*handle);
                first_rejection.get_or_insert(ServiceError::BadItem {
                    service: "CreateMonitoredItems",
                    index,
                    status: result.status_code,
                });
            }
        }
        debug!(
            subscription_id = shared.subscription_id,
            requested = handles.len(),
            monitored = registrations.handles.len(),
            "Monitored items created"
        );

        match first_rejection {
            Some(rejection) => Err(rejection.into()),
            None => Ok(handles
                .iter()
                .filter_map(|handle| registrations.item(*handle).cloned())
                .collect()),
        }
    }

    /// Removes nodes given in string form.
    pub async fn remove_nodes<S: AsRef<str>>(&self, nodes: &[S]) -> UaResult<()> {
        let nodes = NodeId::parse_all(nodes)?;
        self.remove_node_ids(&nodes).await
    }

    /// Removes nodes in one DeleteMonitoredItems request.
    ///
    /// Every node must be monitored; otherwise nothing is sent and
    /// [`SubscriptionError::NotFound`] is returned.
    pub async fn remove_node_ids(&self, nodes: &[NodeId]) -> UaResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let shared = &self.shared;
        let mut registrations = shared.registrations.write().await;

        let keys = registrations.existing_keys(nodes)?;
        let ids: Vec<u32> = keys
            .iter()
            .filter_map(|key| registrations.remove_node(key))
            .map(|item| item.monitored_item_id)
            .collect();
        let expected = ids.len();
        let results = shared
            .service
            .delete_monitored_items(shared.subscription_id, ids)
            .await?;
        check_results("DeleteMonitoredItems", &results, expected)?;

        debug!(
            subscription_id = shared.subscription_id,
            removed = expected,
            "Monitored items deleted"
        );
        Ok(())
    }

    /// Changes the parameters of monitored nodes in one
    /// ModifyMonitoredItems request.
    ///
    /// Every node must be monitored, otherwise nothing is sent and
    /// [`SubscriptionError::NotFound`] is returned. Requests without
    /// parameters are skipped; the given parameters replace the current
    /// ones, keeping the client handle.
    pub async fn modify_monitor_items(&self, requests: &[MonitorRequest]) -> UaResult<()> {
        let shared = &self.shared;
        let registrations = shared.registrations.write().await;
        let nodes: Vec<NodeId> = requests.iter().map(|r| r.node_id.clone()).collect();
        let keys = registrations.existing_keys(&nodes)?;

        let items: Vec<MonitoredItemModifyRequest> = requests
            .iter()
            .zip(&keys)
            .filter_map(|(request, key)| {
                let item = registrations.node_lookup.get(key)?;
                let mut parameters = request.parameters.clone()?;
                parameters.client_handle = item.client_handle;
                Some(MonitoredItemModifyRequest {
                    monitored_item_id: item.monitored_item_id,
                    requested_parameters: parameters,
                })
            })
            .collect();
        if items.is_empty() {
            return Ok(());
        }

        let expected = items.len();
        let results = shared
            .service
            .modify_monitored_items(shared.subscription_id, items)
            .await?;
        let statuses: Vec<StatusCode> = results.iter().map(|r| r.status_code).collect();
        check_results("ModifyMonitoredItems", &statuses, expected)?;
        debug!(
            subscription_id = shared.subscription_id,
            modified = expected,
            "Monitored items modified"
        );
        Ok(())
    }

    /// Sets the monitoring mode of nodes given in string form.
    pub async fn set_monitoring_mode<S: AsRef<str>>(
        &self,
        mode: MonitoringMode,
        nodes: &[S],
    ) -> UaResult<()> {
        let nodes = NodeId::parse_all(nodes)?;
        self.set_monitoring_mode_for_node_ids(mode, &nodes).await
    }

    /// Sets the monitoring mode of nodes in one SetMonitoringMode request.
    ///
    /// Every node must be monitored, otherwise nothing is sent. Items the
    /// server accepts take the new mode even when others are rejected.
    pub async fn set_monitoring_mode_for_node_ids(
        &self,
        mode: MonitoringMode,
        nodes: &[NodeId],
    ) -> UaResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let shared = &self.shared;
        let mut registrations = shared.registrations.write().await;
        let keys = registrations.existing_keys(nodes)?;
        let ids: Vec<u32> = keys
            .iter()
            .filter_map(|key| registrations.node_lookup.get(key))
            .map(|item| item.monitored_item_id)
            .collect();

        let expected = ids.len();
        let results = shared
            .service
            .set_monitoring_mode(shared.subscription_id, mode, ids)
            .await?;
        if results.len() == expected {
            for (key, status) in keys.iter().zip(&results) {
                if !status.is_good() {
                    continue;
                }
                if let Some(item) = registrations.node_lookup.get_mut(key) {
                    item.monitoring_mode = mode;
                }
            }
        }
        check_results("SetMonitoringMode", &results, expected)?;
        debug!(
            subscription_id = shared.subscription_id,
            mode = ?mode,
            items = expected,
            "Monitoring mode set"
        );
        Ok(())
    }

    /// Changes the publishing parameters of the subscription.
    ///
    /// The new sampling interval, queue size and discard policy apply to
    /// items added afterwards.
    pub async fn modify(&self, settings: SubscriptionSettings) -> UaResult<ModifySubscriptionResponse> {
        settings.validate()?;
        let response = self
            .shared
            .service
            .modify_subscription(self.shared.subscription_id, &settings)
            .await?;
        *self.shared.settings.write() = settings;
        Ok(response)
    }

    /// Stops delivery and deletes the server-side subscription.
    ///
    /// Only the first call does anything; later calls return `Ok(())`.
    pub async fn unsubscribe(&self) -> UaResult<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.closed_signal.cancel();
        self.shared.service.cancel(self.shared.subscription_id).await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("subscription_id", &self.subscription_id())
            .field("delivered", &self.delivered())
            .field("dropped", &self.dropped())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// Delivery
// =============================================================================

impl Shared {
    fn create_request(
        &self,
        request: &MonitorRequest,
        client_handle: u32,
        events: Option<&ExtensionObject>,
    ) -> MonitoredItemCreateRequest {
        let node_id = request.node_id.clone();
        let (item_to_monitor, sampling_interval, filter) = match events {
            Some(filter) => (ReadValueId::events_of(node_id), 0.0, filter.clone()),
            None => (
                ReadValueId::value_of(node_id),
                self.settings.read().sampling_interval_millis(),
                ExtensionObject::null(),
            ),
        };
        let mut parameters = match &request.parameters {
            Some(parameters) => parameters.clone(),
            None => {
                let settings = self.settings.read();
                MonitoringParameters {
                    client_handle,
                    sampling_interval,
                    filter: ExtensionObject::null(),
                    queue_size: settings.queue_size,
                    discard_oldest: settings.discard_oldest,
                }
            }
        };
        parameters.client_handle = client_handle;
        if parameters.filter.is_null() {
            parameters.filter = filter;
        }
        MonitoredItemCreateRequest {
            item_to_monitor,
            monitoring_mode: request.monitoring_mode,
            requested_parameters: parameters,
        }
    }

    fn report(&self, error: UaError) {
        match &self.error_handler {
            Some(handler) => {
                let handler = Arc::clone(handler);
                let subscription_id = self.subscription_id;
                tokio::spawn(async move { handler(subscription_id, error) });
            }
            None => debug!(
                subscription_id = self.subscription_id,
                error = %error,
                "Delivery error without handler"
            ),
        }
    }

    async fn node_of(&self, client_handle: u32) -> Option<NodeId> {
        self.registrations
            .read()
            .await
            .handles
            .get(&client_handle)
            .cloned()
    }

    /// Counts and reports a notification that found the callback queue full.
    fn reject(&self, notification: &PublishNotification) {
        let items = notification.data.as_ref().map(item_count).unwrap_or(0);
        self.dropped.fetch_add(items as u64, Ordering::SeqCst);
        warn!(
            subscription_id = self.subscription_id,
            dropped = items,
            "Slow consumer, notification dropped"
        );
        self.report(
            SubscriptionError::SlowConsumer {
                subscription_id: self.subscription_id,
                dropped: items,
            }
            .into(),
        );
    }

    async fn process(&self, notification: PublishNotification, delivery: &mut Delivery) {
        let data = match notification.data {
            Ok(data) => data,
            Err(e) => {
                self.report(e);
                return;
            }
        };
        if notification.subscription_id != self.subscription_id {
            self.report(
                ProtocolError::SubscriptionIdMismatch {
                    expected: self.subscription_id,
                    actual: notification.subscription_id,
                }
                .into(),
            );
            return;
        }

        match data {
            NotificationData::DataChange(change) => {
                self.deliver_data_changes(change, delivery).await;
            }
            NotificationData::Events(events) => {
                self.deliver_events(events, notification.publish_time, delivery)
                    .await;
            }
            NotificationData::StatusChange(change) => {
                if !change.status.is_good() {
                    self.report(UaError::bad_result("StatusChangeNotification", change.status));
                }
            }
            NotificationData::Unknown(object) => {
                let id = object.encoding_id().unwrap_or_default();
                self.report(
                    ProtocolError::decode("notification data", CodecError::UnknownService(id))
                        .into(),
                );
            }
        }
    }

    async fn deliver_data_changes(&self, change: DataChangeNotification, delivery: &mut Delivery) {
        for item in change.monitored_items {
            let node_id = self.node_of(item.client_handle).await;
            let message = match node_id {
                Some(node_id) => DataChangeMessage {
                    node_id: Some(node_id),
                    value: Some(item.value),
                    error: None,
                },
                None => DataChangeMessage {
                    node_id: None,
                    value: None,
                    error: Some(unknown_handle(item.client_handle)),
                },
            };
            self.deliver(Message::DataChange(message), delivery);
        }
    }

    async fn deliver_events(
        &self,
        events: EventNotificationList,
        publish_time: DateTime<Utc>,
        delivery: &mut Delivery,
    ) {
        for event in events.events {
            let node_id = self.node_of(event.client_handle).await;
            let message = match node_id {
                Some(node_id) => EventMessage {
                    node_id: Some(node_id),
                    fields: event
                        .event_fields
                        .into_iter()
                        .map(|field| DataValue {
                            value: Some(field),
                            status: Some(StatusCode::GOOD),
                            source_timestamp: Some(publish_time),
                            server_timestamp: Some(publish_time),
                            ..Default::default()
                        })
                        .collect(),
                    publish_time,
                    error: None,
                },
                None => EventMessage {
                    node_id: None,
                    fields: Vec::new(),
                    publish_time,
                    error: Some(unknown_handle(event.client_handle)),
                },
            };
            self.deliver(Message::Event(message), delivery);
        }
    }

    fn deliver(&self, message: Message, delivery: &mut Delivery) {
        match delivery {
            Delivery::Callback(handler) => {
                handler.handle(self.subscription_id, message);
                self.delivered.fetch_add(1, Ordering::SeqCst);
            }
            Delivery::Channel(channel) => match channel.try_send(message) {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::SeqCst);
                }
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::SeqCst);
                    self.report(
                        SubscriptionError::SlowConsumer {
                            subscription_id: self.subscription_id,
                            dropped: 1,
                        }
                        .into(),
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    self.dropped.fetch_add(1, Ordering::SeqCst);
                    trace!(subscription_id = self.subscription_id, "Consumer channel closed");
                }
            },
        }
    }
}

fn item_count(data: &NotificationData) -> usize {
    match data {
        NotificationData::DataChange(change) => change.monitored_items.len(),
        NotificationData::Events(events) => events.events.len(),
        _ => 0,
    }
}

fn unknown_handle(client_handle: u32) -> UaError {
    SubscriptionError::UnknownHandle { client_handle }.into()
}

/// Moves notifications into the callback queue without waiting, so a
/// blocked handler never stalls the publish loop.
async fn admit(
    shared: Arc<Shared>,
    mut upstream: mpsc::Receiver<PublishNotification>,
    queue: mpsc::Sender<PublishNotification>,
    cancel: CancellationToken,
) {
    loop {
        let notification = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = shared.closed_signal.cancelled() => break,
            notification = upstream.recv() => match notification {
                Some(notification) => notification,
                None => break,
            },
        };
        match queue.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(notification)) => shared.reject(&notification),
            Err(TrySendError::Closed(_)) => break,
        }
    }
}

async fn pump(
    shared: Arc<Shared>,
    mut queue: mpsc::Receiver<PublishNotification>,
    mut delivery: Delivery,
    cancel: CancellationToken,
) {
    debug!(subscription_id = shared.subscription_id, "Delivery started");
    loop {
        let notification = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = shared.closed_signal.cancelled() => break,
            notification = queue.recv() => match notification {
                Some(notification) => notification,
                None => break,
            },
        };
        shared.process(notification, &mut delivery).await;
    }
    debug!(
        subscription_id = shared.subscription_id,
        delivered = shared.delivered.load(Ordering::SeqCst),
        dropped = shared.dropped.load(Ordering::SeqCst),
        "Delivery stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use uaconv_proto::{
        MonitoredItemCreateResult, MonitoredItemModifyResult, MonitoredItemNotification, Variant,
    };

    /// Accepts everything except nodes listed in `reject` and item ids
    /// listed in `reject_ids`.
    #[derive(Default)]
    struct MockService {
        notify: Mutex<Option<mpsc::Sender<PublishNotification>>>,
        reject: Mutex<HashSet<String>>,
        reject_ids: Mutex<HashSet<u32>>,
        created: Mutex<Vec<MonitoredItemCreateRequest>>,
        modified: Mutex<Vec<MonitoredItemModifyRequest>>,
        modes: Mutex<Vec<(MonitoringMode, Vec<u32>)>>,
        modified_settings: Mutex<Option<SubscriptionSettings>>,
        creates: AtomicUsize,
        deletes: AtomicUsize,
        cancels: AtomicUsize,
        next_item_id: AtomicU32,
    }

    impl MockService {
        fn notify(&self) -> mpsc::Sender<PublishNotification> {
            self.notify.lock().clone().unwrap()
        }
    }

    #[async_trait]
    impl SubscriptionService for MockService {
        async fn subscribe(
            &self,
            _settings: &SubscriptionSettings,
            notify: mpsc::Sender<PublishNotification>,
        ) -> UaResult<u32> {
            *self.notify.lock() = Some(notify);
            Ok(7)
        }

        async fn create_monitored_items(
            &self,
            _subscription_id: u32,
            items: Vec<MonitoredItemCreateRequest>,
        ) -> UaResult<Vec<uaconv_proto::MonitoredItemCreateResult>> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.created.lock().extend(items.iter().cloned());
            let reject = self.reject.lock().clone();
            Ok(items
                .iter()
                .map(|item| {
                    if reject.contains(&item.item_to_monitor.node_id.to_string()) {
                        MonitoredItemCreateResult {
                            status_code: StatusCode::BAD_NODE_ID_UNKNOWN,
                            ..Default::default()
                        }
                    } else {
                        MonitoredItemCreateResult {
                            monitored_item_id: self.next_item_id.fetch_add(1, Ordering::SeqCst)
                                + 1,
                            ..Default::default()
                        }
                    }
                })
                .collect())
        }

        async fn delete_monitored_items(
            &self,
            _subscription_id: u32,
            ids: Vec<u32>,
        ) -> UaResult<Vec<StatusCode>> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(vec![StatusCode::GOOD; ids.len()])
        }

        async fn modify_monitored_items(
            &self,
            _subscription_id: u32,
            items: Vec<MonitoredItemModifyRequest>,
        ) -> UaResult<Vec<MonitoredItemModifyResult>> {
            let results = items
                .iter()
                .map(|item| MonitoredItemModifyResult {
                    revised_sampling_interval: item.requested_parameters.sampling_interval,
                    revised_queue_size: item.requested_parameters.queue_size,
                    ..Default::default()
                })
                .collect();
            self.modified.lock().extend(items);
            Ok(results)
        }

        async fn set_monitoring_mode(
            &self,
            _subscription_id: u32,
            mode: MonitoringMode,
            ids: Vec<u32>,
        ) -> UaResult<Vec<StatusCode>> {
            let reject = self.reject_ids.lock().clone();
            let results = ids
                .iter()
                .map(|id| {
                    if reject.contains(id) {
                        StatusCode::BAD_MONITORED_ITEM_ID_INVALID
                    } else {
                        StatusCode::GOOD
                    }
                })
                .collect();
            self.modes.lock().push((mode, ids));
            Ok(results)
        }

        async fn modify_subscription(
            &self,
            _subscription_id: u32,
            settings: &SubscriptionSettings,
        ) -> UaResult<ModifySubscriptionResponse> {
            *self.modified_settings.lock() = Some(settings.clone());
            Ok(ModifySubscriptionResponse {
                revised_publishing_interval: settings.publishing_interval_millis(),
                revised_lifetime_count: settings.lifetime_count,
                revised_max_keep_alive_count: settings.keepalive_count,
            })
        }

        async fn cancel(&self, _subscription_id: u32) -> UaResult<()> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn monitor() -> (NodeMonitor, Arc<MockService>) {
        let service = Arc::new(MockService::default());
        (
            NodeMonitor::new(service.clone(), SubscriptionSettings::default()),
            service,
        )
    }

    fn change(subscription_id: u32, handles: &[u32]) -> PublishNotification {
        PublishNotification::data(
            subscription_id,
            Utc::now(),
            NotificationData::DataChange(DataChangeNotification {
                monitored_items: handles
                    .iter()
                    .map(|handle| MonitoredItemNotification {
                        client_handle: *handle,
                        value: DataValue::new(Variant::Int32(*handle as i32)),
                    })
                    .collect(),
                diagnostic_infos: Vec::new(),
            }),
        )
    }

    async fn settle(subscription: &Subscription, items: u64) {
        for _ in 0..200 {
            if subscription.delivered() + subscription.dropped() >= items {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pump did not process {items} items");
    }

    #[tokio::test]
    async fn test_empty_add_is_noop() {
        let (monitor, service) = monitor();
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::default(), mpsc::channel(4).0)
            .await
            .unwrap();

        subscription.add_nodes::<&str>(&[]).await.unwrap();
        assert_eq!(monitor.last_client_handle(), 100);
        assert_eq!(service.creates.load(Ordering::SeqCst), 0);
        assert_eq!(subscription.subscribed().await, 0);
    }

    #[tokio::test]
    async fn test_handles_increase_and_are_not_reused() {
        let (monitor, _service) = monitor();
        let subscription = monitor
            .channel_subscribe(
                SubscribeArgs::nodes(["ns=2;s=a", "ns=2;s=b"]),
                mpsc::channel(4).0,
            )
            .await
            .unwrap();

        let items = subscription.monitored_items().await;
        assert_eq!(
            items.iter().map(|i| i.client_handle).collect::<Vec<_>>(),
            vec![101, 102]
        );
        assert!(items.iter().all(|i| i.monitored_item_id != 0));

        subscription.remove_nodes(&["ns=2;s=a"]).await.unwrap();
        subscription.add_nodes(&["ns=2;s=a"]).await.unwrap();
        let handles: Vec<u32> = subscription
            .monitored_items()
            .await
            .iter()
            .map(|i| i.client_handle)
            .collect();
        assert_eq!(handles, vec![102, 103]);
    }

    #[tokio::test]
    async fn test_duplicate_add_rejected() {
        let (monitor, service) = monitor();
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::nodes(["ns=2;i=5"]), mpsc::channel(4).0)
            .await
            .unwrap();

        let error = subscription.add_nodes(&["ns=2;i=5"]).await.unwrap_err();
        assert!(matches!(
            error,
            UaError::Subscription(SubscriptionError::AlreadyMonitored { .. })
        ));
        assert_eq!(service.creates.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.last_client_handle(), 101);
    }

    #[tokio::test]
    async fn test_partial_add_keeps_accepted() {
        let (monitor, service) = monitor();
        service.reject.lock().insert("ns=2;s=bad".to_string());
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::default(), mpsc::channel(4).0)
            .await
            .unwrap();

        let error = subscription
            .add_nodes(&["ns=2;s=good", "ns=2;s=bad"])
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            UaError::Service(ServiceError::BadItem { index: 1, .. })
        ));
        assert_eq!(error.status(), Some(StatusCode::BAD_NODE_ID_UNKNOWN));
        let items = subscription.monitored_items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].node_id.to_string(), "ns=2;s=good");
    }

    #[tokio::test]
    async fn test_add_monitor_items_uses_request_parameters() {
        let (monitor, service) = monitor();
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::default(), mpsc::channel(4).0)
            .await
            .unwrap();

        let custom = MonitoringParameters {
            client_handle: 9999,
            sampling_interval: 250.0,
            filter: ExtensionObject::null(),
            queue_size: 5,
            discard_oldest: false,
        };
        let items = subscription
            .add_monitor_items(&[
                MonitorRequest::parse("ns=2;s=a").unwrap(),
                MonitorRequest::parse("ns=2;s=b")
                    .unwrap()
                    .with_mode(MonitoringMode::Sampling)
                    .with_parameters(custom),
            ])
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[1].monitoring_mode, MonitoringMode::Sampling);
        let created = service.created.lock().clone();
        assert_eq!(created[0].monitoring_mode, MonitoringMode::Reporting);
        assert_eq!(created[0].requested_parameters.queue_size, 10);
        assert_eq!(created[1].monitoring_mode, MonitoringMode::Sampling);
        assert_eq!(created[1].requested_parameters.sampling_interval, 250.0);
        assert_eq!(created[1].requested_parameters.queue_size, 5);
        // The subscription owns the client handle.
        assert_eq!(created[1].requested_parameters.client_handle, items[1].client_handle);
        assert_eq!(items[1].client_handle, 102);
    }

    #[tokio::test]
    async fn test_add_monitor_events_carries_filter() {
        let (monitor, service) = monitor();
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::default(), mpsc::channel(4).0)
            .await
            .unwrap();

        let filter = EventFilter::default();
        subscription
            .add_monitor_events(&filter, &[MonitorRequest::parse("i=2253").unwrap()])
            .await
            .unwrap();

        let created = service.created.lock().clone();
        assert_eq!(created[0].requested_parameters.filter, filter.to_extension_object());
        assert_eq!(created[0].requested_parameters.sampling_interval, 0.0);
    }

    #[tokio::test]
    async fn test_modify_monitor_items_skips_requests_without_parameters() {
        let (monitor, service) = monitor();
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::nodes(["ns=2;s=a", "ns=2;s=b"]), mpsc::channel(4).0)
            .await
            .unwrap();

        let parameters = MonitoringParameters {
            sampling_interval: 50.0,
            queue_size: 10,
            ..Default::default()
        };
        subscription
            .modify_monitor_items(&[
                MonitorRequest::parse("ns=2;s=a").unwrap(),
                MonitorRequest::parse("ns=2;s=b").unwrap().with_parameters(parameters),
            ])
            .await
            .unwrap();

        let modified = service.modified.lock().clone();
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0].monitored_item_id, 2);
        assert_eq!(modified[0].requested_parameters.client_handle, 102);
        assert_eq!(modified[0].requested_parameters.queue_size, 10);
    }

    #[tokio::test]
    async fn test_modify_unknown_node_sends_nothing() {
        let (monitor, service) = monitor();
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::nodes(["ns=2;s=a"]), mpsc::channel(4).0)
            .await
            .unwrap();

        let error = subscription
            .modify_monitor_items(&[MonitorRequest::parse("ns=2;s=zz")
                .unwrap()
                .with_parameters(MonitoringParameters::default())])
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            UaError::Subscription(SubscriptionError::NotFound { .. })
        ));
        assert!(service.modified.lock().is_empty());
    }

    #[tokio::test]
    async fn test_set_monitoring_mode_updates_accepted_items() {
        let (monitor, service) = monitor();
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::nodes(["ns=2;s=a", "ns=2;s=b"]), mpsc::channel(4).0)
            .await
            .unwrap();
        service.reject_ids.lock().insert(2);

        let error = subscription
            .set_monitoring_mode(MonitoringMode::Disabled, &["ns=2;s=a", "ns=2;s=b"])
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            UaError::Service(ServiceError::BadItem { index: 1, .. })
        ));
        assert_eq!(
            service.modes.lock().clone(),
            vec![(MonitoringMode::Disabled, vec![1, 2])]
        );

        let modes: Vec<MonitoringMode> = subscription
            .monitored_items()
            .await
            .iter()
            .map(|item| item.monitoring_mode)
            .collect();
        assert_eq!(modes, vec![MonitoringMode::Disabled, MonitoringMode::Reporting]);
    }

    #[tokio::test]
    async fn test_set_monitoring_mode_empty_or_unknown_sends_nothing() {
        let (monitor, service) = monitor();
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::nodes(["ns=2;s=a"]), mpsc::channel(4).0)
            .await
            .unwrap();

        subscription
            .set_monitoring_mode_for_node_ids(MonitoringMode::Sampling, &[])
            .await
            .unwrap();
        let error = subscription
            .set_monitoring_mode(MonitoringMode::Sampling, &["ns=2;s=a", "ns=2;s=x"])
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            UaError::Subscription(SubscriptionError::NotFound { .. })
        ));
        assert!(service.modes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_modify_stores_settings() {
        let (monitor, service) = monitor();
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::default(), mpsc::channel(4).0)
            .await
            .unwrap();

        let settings = SubscriptionSettings {
            publishing_interval: Duration::from_millis(250),
            queue_size: 4,
            ..SubscriptionSettings::default()
        };
        let response = subscription.modify(settings.clone()).await.unwrap();
        assert_eq!(response.revised_publishing_interval, 250.0);
        assert_eq!(subscription.settings(), settings);
        assert_eq!(service.modified_settings.lock().clone(), Some(settings));

        // Items added afterwards use the new defaults.
        subscription.add_nodes(&["ns=2;s=late"]).await.unwrap();
        assert_eq!(service.created.lock()[0].requested_parameters.queue_size, 4);
    }

    #[tokio::test]
    async fn test_modify_rejects_invalid_settings() {
        let (monitor, service) = monitor();
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::default(), mpsc::channel(4).0)
            .await
            .unwrap();

        let settings = SubscriptionSettings {
            keepalive_count: 0,
            ..SubscriptionSettings::default()
        };
        assert!(subscription.modify(settings).await.is_err());
        assert!(service.modified_settings.lock().is_none());
        assert_eq!(subscription.settings(), SubscriptionSettings::default());
    }

    #[tokio::test]
    async fn test_remove_unknown_node_sends_nothing() {
        let (monitor, service) = monitor();
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::nodes(["ns=2;i=1"]), mpsc::channel(4).0)
            .await
            .unwrap();

        let error = subscription
            .remove_nodes(&["ns=2;i=1", "ns=2;i=2"])
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            UaError::Subscription(SubscriptionError::NotFound { .. })
        ));
        assert_eq!(service.deletes.load(Ordering::SeqCst), 0);
        assert_eq!(subscription.subscribed().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_initial_node_creates_nothing() {
        let (monitor, service) = monitor();
        let result = monitor
            .channel_subscribe(SubscribeArgs::nodes(["not a node"]), mpsc::channel(4).0)
            .await;
        assert!(result.is_err());
        assert!(service.notify.lock().is_none());
    }

    #[tokio::test]
    async fn test_rejected_initial_set_cancels() {
        let (monitor, service) = monitor();
        service.reject.lock().insert("ns=2;i=9".to_string());
        let result = monitor
            .channel_subscribe(SubscribeArgs::nodes(["ns=2;i=9"]), mpsc::channel(4).0)
            .await;
        assert!(result.is_err());
        assert_eq!(service.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (monitor, service) = monitor();
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::default(), mpsc::channel(4).0)
            .await
            .unwrap();

        subscription.unsubscribe().await.unwrap();
        subscription.clone().unsubscribe().await.unwrap();
        assert!(subscription.is_closed());
        assert_eq!(service.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_delivery_resolves_handles() {
        let (monitor, service) = monitor();
        let (tx, mut rx) = mpsc::channel(8);
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::nodes(["ns=2;s=Level"]), tx)
            .await
            .unwrap();

        service.notify().send(change(7, &[101, 555])).await.unwrap();

        let known = rx.recv().await.unwrap();
        assert_eq!(known.node_id().unwrap().to_string(), "ns=2;s=Level");
        assert!(known.error().is_none());
        let unknown = rx.recv().await.unwrap();
        assert!(unknown.node_id().is_none());
        assert!(matches!(
            unknown.error(),
            Some(UaError::Subscription(SubscriptionError::UnknownHandle { client_handle: 555 }))
        ));
        assert_eq!(subscription.delivered(), 2);
    }

    #[tokio::test]
    async fn test_slow_channel_consumer() {
        const CAPACITY: usize = 4;
        let (mut monitor, service) = monitor();
        let slow = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&slow);
        monitor.set_error_handler(move |_, error| {
            if matches!(error, UaError::Subscription(SubscriptionError::SlowConsumer { .. })) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let (tx, _rx) = mpsc::channel(CAPACITY);
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::nodes(["ns=2;i=1"]), tx)
            .await
            .unwrap();

        let notify = service.notify();
        for _ in 0..=CAPACITY {
            notify.send(change(7, &[101])).await.unwrap();
        }
        settle(&subscription, CAPACITY as u64 + 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(subscription.delivered(), CAPACITY as u64);
        assert_eq!(subscription.dropped(), 1);
        assert_eq!(slow.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_callback_queue_drops_notification() {
        let (mut monitor, service) = monitor();
        let slow = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&slow);
        monitor.set_error_handler(move |_, error| {
            if matches!(error, UaError::Subscription(SubscriptionError::SlowConsumer { .. })) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // The first call parks the pump until the gate opens.
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let entered = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&entered);
        let mut gate = Some(gate_rx);
        let subscription = monitor
            .subscribe(
                SubscribeArgs::nodes(["ns=2;i=1", "ns=2;i=2", "ns=2;i=3"]),
                move |_: u32, _: Message| {
                    if let Some(gate) = gate.take() {
                        flag.store(true, Ordering::SeqCst);
                        let _ = gate.recv();
                    }
                },
            )
            .await
            .unwrap();

        let notify = service.notify();
        notify.send(change(7, &[101])).await.unwrap();
        for _ in 0..200 {
            if entered.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(entered.load(Ordering::SeqCst), "handler never called");

        for _ in 0..CALLBACK_QUEUE_LEN {
            notify.send(change(7, &[101])).await.unwrap();
        }
        // Queued behind the fill, so it finds the queue full.
        notify.send(change(7, &[101, 102, 103])).await.unwrap();
        for _ in 0..200 {
            if subscription.dropped() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(subscription.dropped(), 3);

        gate_tx.send(()).unwrap();
        let sent = CALLBACK_QUEUE_LEN as u64 + 1 + 3;
        settle(&subscription, sent).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(subscription.delivered(), CALLBACK_QUEUE_LEN as u64 + 1);
        assert_eq!(subscription.delivered() + subscription.dropped(), sent);
        assert_eq!(slow.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_counts_add_up() {
        let (monitor, service) = monitor();
        let (tx, _rx) = mpsc::channel(3);
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::nodes(["ns=2;i=1", "ns=2;i=2"]), tx)
            .await
            .unwrap();

        let notify = service.notify();
        notify.send(change(7, &[101, 102])).await.unwrap();
        notify.send(change(7, &[102, 101, 101])).await.unwrap();
        settle(&subscription, 5).await;
        assert_eq!(subscription.delivered() + subscription.dropped(), 5);
        assert_eq!(subscription.delivered(), 3);
    }

    #[tokio::test]
    async fn test_callback_delivery_and_errors() {
        let (mut monitor, service) = monitor();
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        monitor.set_error_handler(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = monitor
            .subscribe(SubscribeArgs::nodes(["ns=2;i=1"]), move |id: u32, message: Message| {
                assert_eq!(id, 7);
                sink.lock().push(message.node_id().cloned());
            })
            .await
            .unwrap();

        let notify = service.notify();
        notify.send(change(8, &[101])).await.unwrap();
        notify
            .send(PublishNotification::error(7, UaError::channel_closed()))
            .await
            .unwrap();
        notify.send(change(7, &[101])).await.unwrap();
        settle(&subscription, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(subscription.delivered(), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_event_delivery() {
        let (monitor, service) = monitor();
        let (tx, mut rx) = mpsc::channel(4);
        let subscription = monitor
            .channel_subscribe(
                SubscribeArgs::nodes(["i=2253"]).with_events(EventFilter::select(&["Message"])),
                tx,
            )
            .await
            .unwrap();

        let publish_time = Utc::now();
        let events = NotificationData::Events(EventNotificationList {
            events: vec![uaconv_proto::EventFieldList {
                client_handle: 101,
                event_fields: vec![Variant::String("Overpressure".into())],
            }],
        });
        service
            .notify()
            .send(PublishNotification::data(7, publish_time, events))
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            Message::Event(event) => {
                assert_eq!(event.node_id.unwrap().to_string(), "i=2253");
                assert_eq!(event.fields.len(), 1);
                assert_eq!(event.fields[0].source_timestamp, Some(publish_time));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(subscription.delivered(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (monitor, service) = monitor();
        let (tx, mut rx) = mpsc::channel(4);
        let subscription = monitor
            .channel_subscribe(SubscribeArgs::nodes(["ns=2;i=1"]), tx)
            .await
            .unwrap();

        subscription.unsubscribe().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = service.notify().send(change(7, &[101])).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(subscription.delivered(), 0);
    }
}
