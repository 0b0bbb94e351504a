// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built configurations and notification payloads.

use std::time::Duration;

use chrono::Utc;
use uaconv_client::{ClientConfig, PublishNotification, PublishSettings, SubscriptionSettings};
use uaconv_proto::{
    DataChangeNotification, DataValue, EventFieldList, EventNotificationList,
    MonitoredItemNotification, NotificationData, Variant,
};

/// Endpoint every in-memory test pretends to talk to.
pub const TEST_ENDPOINT: &str = "opc.tcp://localhost:4840";

/// Client configurations.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// Defaults with short timeouts for in-memory tests.
    pub fn local() -> ClientConfig {
        let mut config = ClientConfig::new(TEST_ENDPOINT);
        config.request_timeout = Duration::from_secs(2);
        config.publish = PublishSettings {
            timeout: Duration::from_secs(5),
            retry_delay: Duration::from_millis(20),
        };
        config
    }

    /// Subscription settings with a fast publishing interval.
    pub fn fast_subscription() -> SubscriptionSettings {
        SubscriptionSettings::fast()
    }

    /// A YAML document equivalent to [`local`](Self::local).
    pub fn yaml() -> String {
        format!(
            r#"
endpoint: "{TEST_ENDPOINT}"
application_name: fixture
request_timeout: 2s
session:
  name_prefix: fixture
  timeout: 30s
  locale_ids: ["en-US"]
subscription:
  publishing_interval: 250ms
  queue_size: 4
publish:
  timeout: 5s
  retry_delay: 20ms
"#
        )
    }
}

/// Notification payloads.
pub struct NotificationFixtures;

impl NotificationFixtures {
    /// A data change with one `Int32` value per handle, equal to the handle.
    pub fn data_change(handles: &[u32]) -> NotificationData {
        NotificationData::DataChange(DataChangeNotification {
            monitored_items: handles
                .iter()
                .map(|handle| MonitoredItemNotification {
                    client_handle: *handle,
                    value: DataValue::new(Variant::Int32(*handle as i32)),
                })
                .collect(),
            diagnostic_infos: Vec::new(),
        })
    }

    /// An event list with one event per handle carrying `message`.
    pub fn events(handles: &[u32], message: &str) -> NotificationData {
        NotificationData::Events(EventNotificationList {
            events: handles
                .iter()
                .map(|handle| EventFieldList {
                    client_handle: *handle,
                    event_fields: vec![Variant::String(message.to_string())],
                })
                .collect(),
        })
    }

    /// Wraps `data` for `subscription_id`.
    pub fn notification(subscription_id: u32, data: NotificationData) -> PublishNotification {
        PublishNotification::data(subscription_id, Utc::now(), data)
    }
}
