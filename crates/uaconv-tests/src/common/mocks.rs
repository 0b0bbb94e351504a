// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! A [`SubscriptionService`] that never touches the network, so the node
//! monitor can be tested in isolation.
//!
//! - Configurable rejection and error injection
//! - Call counters for verifying which operations hit the "server"
//! - The captured notification queue, to feed the pump directly

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uaconv_client::{PublishNotification, SubscriptionService, SubscriptionSettings, UaError, UaResult};
use uaconv_proto::{
    ModifySubscriptionResponse, MonitoredItemCreateRequest, MonitoredItemCreateResult,
    MonitoredItemModifyRequest, MonitoredItemModifyResult, MonitoringMode, StatusCode,
};

/// Subscription id handed out by [`MockSubscriptionService`].
pub const MOCK_SUBSCRIPTION_ID: u32 = 42;

/// In-memory subscription service.
#[derive(Debug, Default)]
pub struct MockSubscriptionService {
    notify: Mutex<Option<mpsc::Sender<PublishNotification>>>,
    reject: Mutex<HashSet<String>>,
    created_nodes: Mutex<Vec<String>>,
    modes: Mutex<Vec<MonitoringMode>>,
    fail_create: AtomicBool,
    next_item_id: AtomicU32,

    /// Calls to `subscribe`.
    pub subscribe_count: AtomicU64,
    /// Calls to `create_monitored_items`.
    pub create_count: AtomicU64,
    /// Calls to `delete_monitored_items`.
    pub delete_count: AtomicU64,
    /// Calls to `modify_monitored_items`.
    pub modify_count: AtomicU64,
    /// Calls to `set_monitoring_mode`.
    pub mode_count: AtomicU64,
    /// Calls to `modify_subscription`.
    pub modify_subscription_count: AtomicU64,
    /// Calls to `cancel`.
    pub cancel_count: AtomicU64,
}

impl MockSubscriptionService {
    /// Creates a service that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects monitored items for `node` with BadNodeIdUnknown.
    pub fn reject(&self, node: &str) {
        self.reject.lock().insert(node.to_string());
    }

    /// Makes every CreateMonitoredItems call fail outright.
    pub fn fail_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Queue the subscription's notifications go to.
    pub fn sender(&self) -> Option<mpsc::Sender<PublishNotification>> {
        self.notify.lock().clone()
    }

    /// Pushes a notification into the pump.
    ///
    /// # Panics
    ///
    /// Panics if nothing subscribed yet.
    pub async fn notify(&self, notification: PublishNotification) {
        let sender = self.sender().expect("no subscription registered");
        sender
            .send(notification)
            .await
            .expect("subscription queue closed");
    }

    /// Nodes passed to CreateMonitoredItems, in order.
    pub fn created_nodes(&self) -> Vec<String> {
        self.created_nodes.lock().clone()
    }

    /// Modes passed to SetMonitoringMode, in order.
    pub fn modes(&self) -> Vec<MonitoringMode> {
        self.modes.lock().clone()
    }

    /// Total network-bound calls.
    pub fn network_calls(&self) -> u64 {
        self.subscribe_count.load(Ordering::SeqCst)
            + self.create_count.load(Ordering::SeqCst)
            + self.delete_count.load(Ordering::SeqCst)
            + self.modify_count.load(Ordering::SeqCst)
            + self.mode_count.load(Ordering::SeqCst)
            + self.modify_subscription_count.load(Ordering::SeqCst)
            + self.cancel_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubscriptionService for MockSubscriptionService {
    async fn subscribe(
        &self,
        _settings: &SubscriptionSettings,
        notify: mpsc::Sender<PublishNotification>,
    ) -> UaResult<u32> {
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        *self.notify.lock() = Some(notify);
        Ok(MOCK_SUBSCRIPTION_ID)
    }

    async fn create_monitored_items(
        &self,
        _subscription_id: u32,
        items: Vec<MonitoredItemCreateRequest>,
    ) -> UaResult<Vec<MonitoredItemCreateResult>> {
        self.create_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(UaError::bad_result(
                "CreateMonitoredItems",
                StatusCode::BAD_TOO_MANY_OPERATIONS,
            ));
        }
        let reject = self.reject.lock().clone();
        let mut created = self.created_nodes.lock();
        Ok(items
            .iter()
            .map(|item| {
                let node = item.item_to_monitor.node_id.to_string();
                created.push(node.clone());
                if reject.contains(&node) {
                    MonitoredItemCreateResult {
                        status_code: StatusCode::BAD_NODE_ID_UNKNOWN,
                        ..Default::default()
                    }
                } else {
                    MonitoredItemCreateResult {
                        monitored_item_id: self.next_item_id.fetch_add(1, Ordering::SeqCst) + 1,
                        ..Default::default()
                    }
                }
            })
            .collect())
    }

    async fn delete_monitored_items(
        &self,
        _subscription_id: u32,
        monitored_item_ids: Vec<u32>,
    ) -> UaResult<Vec<StatusCode>> {
        self.delete_count.fetch_add(1, Ordering::SeqCst);
        Ok(vec![StatusCode::GOOD; monitored_item_ids.len()])
    }

    async fn modify_monitored_items(
        &self,
        _subscription_id: u32,
        items: Vec<MonitoredItemModifyRequest>,
    ) -> UaResult<Vec<MonitoredItemModifyResult>> {
        self.modify_count.fetch_add(1, Ordering::SeqCst);
        Ok(items
            .iter()
            .map(|item| MonitoredItemModifyResult {
                revised_sampling_interval: item.requested_parameters.sampling_interval,
                revised_queue_size: item.requested_parameters.queue_size,
                ..Default::default()
            })
            .collect())
    }

    async fn set_monitoring_mode(
        &self,
        _subscription_id: u32,
        mode: MonitoringMode,
        monitored_item_ids: Vec<u32>,
    ) -> UaResult<Vec<StatusCode>> {
        self.mode_count.fetch_add(1, Ordering::SeqCst);
        self.modes.lock().push(mode);
        Ok(vec![StatusCode::GOOD; monitored_item_ids.len()])
    }

    async fn modify_subscription(
        &self,
        _subscription_id: u32,
        settings: &SubscriptionSettings,
    ) -> UaResult<ModifySubscriptionResponse> {
        self.modify_subscription_count.fetch_add(1, Ordering::SeqCst);
        Ok(ModifySubscriptionResponse {
            revised_publishing_interval: settings.publishing_interval_millis(),
            revised_lifetime_count: settings.lifetime_count,
            revised_max_keep_alive_count: settings.keepalive_count,
        })
    }

    async fn cancel(&self, _subscription_id: u32) -> UaResult<()> {
        self.cancel_count.fetch_add(1, Ordering::SeqCst);
        self.notify.lock().take();
        Ok(())
    }
}
