// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Publish loop and the subscription service seam.
//!
//! The server pushes nothing on its own: the client keeps a PublishRequest
//! outstanding and the server answers it with the next notification message
//! of any of the session's subscriptions. The [`PublishLoop`] does that,
//! acknowledges each message on the following request, and forwards the
//! payloads to the queue registered for the subscription.
//!
//! [`SubscriptionService`] is what the node monitor talks to. The client
//! implements it; tests substitute a mock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uaconv_proto::{
    ModifySubscriptionResponse, MonitoredItemCreateRequest, MonitoredItemCreateResult,
    MonitoredItemModifyRequest, MonitoredItemModifyResult, MonitoringMode, NotificationData,
    NotificationMessage, PublishRequest, PublishResponse, StatusCode, SubscriptionAcknowledgement,
};

use crate::config::{PublishSettings, SubscriptionSettings};
use crate::dispatcher::Dispatcher;
use crate::error::{ProtocolError, TransportError, UaError, UaResult};
use crate::response::expect_good;

// =============================================================================
// PublishNotification
// =============================================================================

/// One payload of a notification message, or a publish failure.
#[derive(Debug, Clone)]
pub struct PublishNotification {
    /// Subscription the payload belongs to.
    pub subscription_id: u32,
    /// Publish time reported by the server.
    pub publish_time: DateTime<Utc>,
    /// The payload, or why none could be obtained.
    pub data: UaResult<NotificationData>,
}

impl PublishNotification {
    /// A payload for `subscription_id`.
    pub fn data(subscription_id: u32, publish_time: DateTime<Utc>, data: NotificationData) -> Self {
        Self {
            subscription_id,
            publish_time,
            data: Ok(data),
        }
    }

    /// A failure for `subscription_id`.
    pub fn error(subscription_id: u32, error: UaError) -> Self {
        Self {
            subscription_id,
            publish_time: Utc::now(),
            data: Err(error),
        }
    }
}

// =============================================================================
// SubscriptionService
// =============================================================================

/// Server-side subscription operations used by the node monitor.
#[async_trait]
pub trait SubscriptionService: Send + Sync + 'static {
    /// Creates a subscription whose notifications are sent to `notify`.
    /// Returns the server-assigned subscription id.
    async fn subscribe(
        &self,
        settings: &SubscriptionSettings,
        notify: mpsc::Sender<PublishNotification>,
    ) -> UaResult<u32>;

    /// Creates monitored items; one result per item, in request order.
    async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: Vec<MonitoredItemCreateRequest>,
    ) -> UaResult<Vec<MonitoredItemCreateResult>>;

    /// Deletes monitored items; one status per id.
    async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        monitored_item_ids: Vec<u32>,
    ) -> UaResult<Vec<StatusCode>>;

    /// Changes the parameters of monitored items; one result per item.
    async fn modify_monitored_items(
        &self,
        subscription_id: u32,
        items: Vec<MonitoredItemModifyRequest>,
    ) -> UaResult<Vec<MonitoredItemModifyResult>>;

    /// Sets the monitoring mode of monitored items; one status per id.
    async fn set_monitoring_mode(
        &self,
        subscription_id: u32,
        mode: MonitoringMode,
        monitored_item_ids: Vec<u32>,
    ) -> UaResult<Vec<StatusCode>>;

    /// Changes the subscription's publishing parameters.
    async fn modify_subscription(
        &self,
        subscription_id: u32,
        settings: &SubscriptionSettings,
    ) -> UaResult<ModifySubscriptionResponse>;

    /// Deletes the subscription and stops routing its notifications.
    async fn cancel(&self, subscription_id: u32) -> UaResult<()>;
}

// =============================================================================
// SubscriptionRegistry
// =============================================================================

/// Notification queues keyed by subscription id.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    queues: Mutex<HashMap<u32, mpsc::Sender<PublishNotification>>>,
    changed: Notify,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes notifications of `subscription_id` to `queue`.
    pub fn register(&self, subscription_id: u32, queue: mpsc::Sender<PublishNotification>) {
        self.queues.lock().insert(subscription_id, queue);
        self.changed.notify_one();
    }

    /// Stops routing `subscription_id`.
    pub fn unregister(&self, subscription_id: u32) -> bool {
        self.queues.lock().remove(&subscription_id).is_some()
    }

    /// Number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.queues.lock().len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.queues.lock().is_empty()
    }

    fn queue(&self, subscription_id: u32) -> Option<mpsc::Sender<PublishNotification>> {
        self.queues.lock().get(&subscription_id).cloned()
    }

    fn all(&self) -> Vec<(u32, mpsc::Sender<PublishNotification>)> {
        self.queues
            .lock()
            .iter()
            .map(|(id, queue)| (*id, queue.clone()))
            .collect()
    }

    /// Delivers to one subscription. A closed queue is unregistered.
    async fn deliver(&self, notification: PublishNotification) {
        let id = notification.subscription_id;
        let Some(queue) = self.queue(id) else {
            warn!(subscription_id = id, "Notification for unknown subscription");
            return;
        };
        if queue.send(notification).await.is_err() {
            debug!(subscription_id = id, "Subscription queue closed");
            self.unregister(id);
        }
    }

    /// Sends `error` to every subscription.
    async fn fan_out(&self, error: &UaError) {
        for (id, queue) in self.all() {
            if queue
                .send(PublishNotification::error(id, error.clone()))
                .await
                .is_err()
            {
                self.unregister(id);
            }
        }
    }
}

// =============================================================================
// PublishLoop
// =============================================================================

/// Keeps one PublishRequest in flight while any subscription is registered.
pub struct PublishLoop {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<SubscriptionRegistry>,
    settings: PublishSettings,
    cancel: CancellationToken,
    acknowledgements: Vec<SubscriptionAcknowledgement>,
}

impl PublishLoop {
    /// Creates the loop; nothing runs until [`run`](Self::run).
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        registry: Arc<SubscriptionRegistry>,
        settings: PublishSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            registry,
            settings,
            cancel,
            acknowledgements: Vec::new(),
        }
    }

    /// Runs until cancelled or the channel closes.
    pub async fn run(mut self) {
        debug!("Publish loop started");
        let cancel = self.cancel.clone();
        loop {
            if self.registry.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.registry.changed.notified() => continue,
                }
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.publish_once() => result,
            };

            match result {
                Ok(()) => {}
                Err(e) if is_channel_closed(&e) => {
                    self.registry.fan_out(&e).await;
                    break;
                }
                Err(e) => {
                    if e.status() != Some(StatusCode::BAD_NO_SUBSCRIPTION) {
                        warn!(error = %e, "Publish failed");
                        self.registry.fan_out(&e).await;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.retry_delay) => {}
                    }
                }
            }
        }
        debug!("Publish loop stopped");
    }

    async fn publish_once(&mut self) -> UaResult<()> {
        let request = PublishRequest {
            subscription_acknowledgements: self.acknowledgements.clone(),
        };
        let pending = self.dispatcher.send(request).await?;
        // Sent, so the server has seen the acknowledgements.
        self.acknowledgements.clear();

        let envelope = pending.recv_timeout(self.publish_timeout()).await?;
        let (_, response) = expect_good::<PublishResponse>(envelope)?;
        self.handle_response(response).await;
        Ok(())
    }

    fn publish_timeout(&self) -> Duration {
        self.settings.timeout + self.dispatcher.timeout()
    }

    async fn handle_response(&mut self, response: PublishResponse) {
        let PublishResponse {
            subscription_id,
            notification_message,
            ..
        } = response;
        trace!(
            subscription_id,
            sequence_number = notification_message.sequence_number,
            payloads = notification_message.notification_data.len(),
            "Publish response"
        );
        if notification_message.is_keep_alive() {
            return;
        }
        self.acknowledgements.push(SubscriptionAcknowledgement {
            subscription_id,
            sequence_number: notification_message.sequence_number,
        });
        for notification in split_message(subscription_id, &notification_message) {
            self.registry.deliver(notification).await;
        }
    }
}

/// Decodes every payload of a notification message.
pub fn split_message(
    subscription_id: u32,
    message: &NotificationMessage,
) -> Vec<PublishNotification> {
    message
        .notification_data
        .iter()
        .map(|object| match NotificationData::from_extension_object(object) {
            Ok(data) => PublishNotification::data(subscription_id, message.publish_time, data),
            Err(e) => PublishNotification::error(
                subscription_id,
                ProtocolError::decode("notification data", e).into(),
            ),
        })
        .collect()
}

fn is_channel_closed(error: &UaError) -> bool {
    matches!(
        error,
        UaError::Transport(TransportError::ChannelClosed | TransportError::Io { .. })
    )
}
