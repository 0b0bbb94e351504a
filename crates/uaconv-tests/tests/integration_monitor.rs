// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Node Monitor Integration Tests
//!
//! - `test_monitor_*`: bookkeeping against [`MockSubscriptionService`]
//! - `test_e2e_*`: the full stack against the scripted server

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use uaconv_client::{
    Message, MonitorRequest, NodeMonitor, ServiceError, SubscribeArgs, SubscriptionError,
    UaError,
};
use uaconv_proto::{EventFilter, MonitoringMode, MonitoringParameters, NodeId, StatusCode, Variant};
use uaconv_tests::prelude::*;

fn mock_monitor() -> (Arc<MockSubscriptionService>, NodeMonitor) {
    let service = Arc::new(MockSubscriptionService::new());
    let monitor = NodeMonitor::new(service.clone(), ConfigFixtures::fast_subscription());
    (service, monitor)
}

fn slow_consumer_counter(monitor: &mut NodeMonitor) -> Arc<AtomicUsize> {
    let reports = Arc::new(AtomicUsize::new(0));
    let counter = reports.clone();
    monitor.set_error_handler(move |_, error| {
        if matches!(error, UaError::Subscription(SubscriptionError::SlowConsumer { .. })) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    reports
}

// =============================================================================
// Against the mock service
// =============================================================================

#[tokio::test]
async fn test_monitor_handles_continue_across_subscriptions() {
    let (_service, monitor) = mock_monitor();
    let (tx, _rx) = mpsc::channel(8);

    let first = monitor
        .channel_subscribe(SubscribeArgs::nodes(["ns=2;i=1", "ns=2;i=2"]), tx.clone())
        .await
        .unwrap();
    let second = monitor
        .channel_subscribe(SubscribeArgs::nodes(["ns=2;i=3"]), tx)
        .await
        .unwrap();

    let mut handles: Vec<u32> = first
        .monitored_items()
        .await
        .iter()
        .map(|item| item.client_handle)
        .collect();
    handles.sort_unstable();
    assert_eq!(handles, [101, 102]);
    assert_eq!(second.monitored_items().await[0].client_handle, 103);
    assert_eq!(monitor.last_client_handle(), 103);
}

#[tokio::test]
async fn test_monitor_empty_and_unknown_changes_stay_local() {
    let (service, monitor) = mock_monitor();
    let (tx, _rx) = mpsc::channel(8);
    let subscription = monitor
        .channel_subscribe(SubscribeArgs::nodes(["ns=2;i=1"]), tx)
        .await
        .unwrap();
    let calls = service.network_calls();

    subscription.add_nodes::<&str>(&[]).await.unwrap();
    let error = subscription.remove_nodes(&["ns=2;i=99"]).await.unwrap_err();

    assert!(matches!(
        error,
        UaError::Subscription(SubscriptionError::NotFound { .. })
    ));
    assert_eq!(service.network_calls(), calls);
    assert_eq!(subscription.subscribed().await, 1);
}

#[tokio::test]
async fn test_monitor_partial_add_keeps_accepted_items() {
    let (service, monitor) = mock_monitor();
    service.reject("ns=2;i=3");
    let (tx, _rx) = mpsc::channel(8);
    let subscription = monitor
        .channel_subscribe(SubscribeArgs::nodes(["ns=2;i=1"]), tx)
        .await
        .unwrap();

    let error = subscription
        .add_nodes(&["ns=2;i=2", "ns=2;i=3", "ns=2;i=4"])
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        UaError::Service(ServiceError::BadItem { index: 1, status, .. })
            if status == StatusCode::BAD_NODE_ID_UNKNOWN
    ));
    let mut nodes: Vec<String> = subscription
        .monitored_items()
        .await
        .iter()
        .map(|item| item.node_id.to_string())
        .collect();
    nodes.sort();
    assert_eq!(nodes, ["ns=2;i=1", "ns=2;i=2", "ns=2;i=4"]);
}

#[tokio::test]
async fn test_monitor_failed_batch_is_unregistered() {
    let (service, monitor) = mock_monitor();
    let (tx, _rx) = mpsc::channel(8);
    let subscription = monitor
        .channel_subscribe(SubscribeArgs::nodes(["ns=2;i=1"]), tx)
        .await
        .unwrap();
    service.fail_creates(true);

    let error = subscription.add_nodes(&["ns=2;i=2"]).await.unwrap_err();

    assert_eq!(error.status(), Some(StatusCode::BAD_TOO_MANY_OPERATIONS));
    assert_eq!(subscription.subscribed().await, 1);

    service.fail_creates(false);
    subscription.add_nodes(&["ns=2;i=2"]).await.unwrap();
    assert_eq!(subscription.subscribed().await, 2);
}

#[tokio::test]
async fn test_monitor_concurrent_unsubscribe_cancels_once() {
    let (service, monitor) = mock_monitor();
    let (tx, _rx) = mpsc::channel(8);
    let subscription = monitor
        .channel_subscribe(SubscribeArgs::nodes(["ns=2;i=1"]), tx)
        .await
        .unwrap();

    let (second, third) = (subscription.clone(), subscription.clone());
    let (a, b, c) = tokio::join!(
        subscription.unsubscribe(),
        second.unsubscribe(),
        third.unsubscribe()
    );

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert!(subscription.is_closed());
    assert_eq!(service.cancel_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_monitor_slow_consumer_reported_once() {
    let (service, mut monitor) = mock_monitor();
    let reports = slow_consumer_counter(&mut monitor);
    let nodes: Vec<String> = (1..=5).map(|i| format!("ns=2;i={i}")).collect();
    let (tx, _rx) = mpsc::channel(4);
    let subscription = monitor
        .channel_subscribe(SubscribeArgs::nodes(nodes), tx)
        .await
        .unwrap();

    service
        .notify(NotificationFixtures::notification(
            MOCK_SUBSCRIPTION_ID,
            NotificationFixtures::data_change(&[101, 102, 103, 104, 105]),
        ))
        .await;

    eventually(|| subscription.delivered() + subscription.dropped() == 5).await;
    assert_eq!(subscription.delivered(), 4);
    assert_eq!(subscription.dropped(), 1);
    eventually(|| reports.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn test_monitor_callback_sees_every_item_in_order() {
    let (service, monitor) = mock_monitor();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = monitor
        .subscribe(
            SubscribeArgs::nodes(["ns=2;i=1", "ns=2;i=2"]),
            move |_: u32, message: Message| {
                let _ = tx.send(message);
            },
        )
        .await
        .unwrap();

    service
        .notify(NotificationFixtures::notification(
            MOCK_SUBSCRIPTION_ID,
            NotificationFixtures::data_change(&[102, 101, 999]),
        ))
        .await;

    let first = within(rx.recv()).await.unwrap();
    let second = within(rx.recv()).await.unwrap();
    let third = within(rx.recv()).await.unwrap();
    assert_eq!(first.node_id(), Some(&NodeId::numeric(2, 2)));
    assert_eq!(second.node_id(), Some(&NodeId::numeric(2, 1)));
    assert!(third.node_id().is_none());
    assert!(matches!(
        third.error(),
        Some(UaError::Subscription(SubscriptionError::UnknownHandle { client_handle: 999 }))
    ));
    assert_eq!(subscription.delivered(), 3);
}

#[tokio::test]
async fn test_monitor_item_maintenance_on_unknown_node_stays_local() {
    let (service, monitor) = mock_monitor();
    let subscription = monitor
        .channel_subscribe(SubscribeArgs::nodes(["ns=2;s=a"]), mpsc::channel(4).0)
        .await
        .unwrap();
    let calls = service.network_calls();

    let modify = subscription
        .modify_monitor_items(&[MonitorRequest::parse("ns=2;s=x")
            .unwrap()
            .with_parameters(MonitoringParameters::default())])
        .await;
    let mode = subscription
        .set_monitoring_mode(MonitoringMode::Disabled, &["ns=2;s=x"])
        .await;
    assert!(matches!(
        modify,
        Err(UaError::Subscription(SubscriptionError::NotFound { .. }))
    ));
    assert!(matches!(
        mode,
        Err(UaError::Subscription(SubscriptionError::NotFound { .. }))
    ));

    // Requests without parameters are skipped entirely.
    subscription
        .modify_monitor_items(&[MonitorRequest::parse("ns=2;s=a").unwrap()])
        .await
        .unwrap();
    assert_eq!(service.network_calls(), calls);

    subscription
        .set_monitoring_mode(MonitoringMode::Sampling, &["ns=2;s=a"])
        .await
        .unwrap();
    assert_eq!(service.modes(), vec![MonitoringMode::Sampling]);
    assert_eq!(service.mode_count.load(Ordering::SeqCst), 1);
}

// =============================================================================
// End to end
// =============================================================================

#[tokio::test]
async fn test_e2e_data_change_delivery() {
    init_test_logging();
    let harness = TestHarness::connect(ServerScript::default()).await.unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    let subscription = within(
        harness
            .monitor()
            .channel_subscribe(SubscribeArgs::nodes(["ns=2;s=Level", "ns=2;s=Flow"]), tx),
    )
    .await
    .unwrap();
    assert_eq!(harness.server.monitored_items(), 2);
    assert_eq!(harness.client.subscriptions(), 1);

    harness
        .server
        .publish(
            subscription.subscription_id(),
            NotificationFixtures::data_change(&[102, 101]),
        )
        .await;

    let first = within(rx.recv()).await.unwrap();
    let second = within(rx.recv()).await.unwrap();
    assert_eq!(first.node_id(), Some(&NodeId::string(2, "Flow")));
    assert_eq!(second.node_id(), Some(&NodeId::string(2, "Level")));
    subscription.unsubscribe().await.unwrap();
}

#[tokio::test]
async fn test_e2e_remove_and_unsubscribe() {
    let harness = TestHarness::connect(ServerScript::default()).await.unwrap();
    let (tx, _rx) = mpsc::channel(8);
    let subscription = within(
        harness
            .monitor()
            .channel_subscribe(SubscribeArgs::nodes(["ns=2;s=Level", "ns=2;s=Flow"]), tx),
    )
    .await
    .unwrap();

    subscription.remove_nodes(&["ns=2;s=Level"]).await.unwrap();
    assert_eq!(harness.server.monitored_items(), 1);
    assert_eq!(harness.server.count("DeleteMonitoredItemsRequest"), 1);

    subscription.unsubscribe().await.unwrap();
    subscription.unsubscribe().await.unwrap();
    assert_eq!(harness.server.count("DeleteSubscriptionsRequest"), 1);
    assert_eq!(harness.client.subscriptions(), 0);
}

#[tokio::test]
async fn test_e2e_rejected_initial_node() {
    let script = ServerScript::default().reject("ns=2;s=Bad");
    let harness = TestHarness::connect(script).await.unwrap();
    let (tx, _rx) = mpsc::channel(8);

    let error = within(
        harness
            .monitor()
            .channel_subscribe(SubscribeArgs::nodes(["ns=2;s=Level", "ns=2;s=Bad"]), tx),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        error,
        UaError::Service(ServiceError::BadItem { index: 1, .. })
    ));
    assert_eq!(harness.server.count("DeleteSubscriptionsRequest"), 1);
    assert_eq!(harness.client.subscriptions(), 0);
}

#[tokio::test]
async fn test_e2e_events() {
    let harness = TestHarness::connect(ServerScript::default()).await.unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    let args = SubscribeArgs::nodes(["i=2253"])
        .with_events(EventFilter::select(&["Message"]));
    let subscription = within(harness.monitor().channel_subscribe(args, tx))
        .await
        .unwrap();

    harness
        .server
        .publish(
            subscription.subscription_id(),
            NotificationFixtures::events(&[101], "Overheat"),
        )
        .await;

    let Message::Event(event) = within(rx.recv()).await.unwrap() else {
        panic!("expected an event");
    };
    assert_eq!(event.node_id, Some(NodeId::numeric(0, 2253)));
    assert_eq!(
        event.fields[0].value,
        Some(Variant::String("Overheat".into()))
    );
    subscription.unsubscribe().await.unwrap();
}

#[tokio::test]
async fn test_e2e_item_maintenance() {
    let harness = TestHarness::connect(ServerScript::default()).await.unwrap();
    let (tx, _rx) = mpsc::channel(8);
    let subscription = within(
        harness
            .monitor()
            .channel_subscribe(SubscribeArgs::default(), tx),
    )
    .await
    .unwrap();

    let items = within(subscription.add_monitor_items(&[
        MonitorRequest::parse("ns=2;s=Level").unwrap(),
        MonitorRequest::parse("ns=2;s=Flow")
            .unwrap()
            .with_mode(MonitoringMode::Sampling),
    ]))
    .await
    .unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(
        harness.server.monitoring_mode("ns=2;s=Flow"),
        Some(MonitoringMode::Sampling)
    );

    let parameters = MonitoringParameters {
        sampling_interval: 20.0,
        queue_size: 3,
        ..Default::default()
    };
    within(subscription.modify_monitor_items(&[
        MonitorRequest::parse("ns=2;s=Level").unwrap().with_parameters(parameters),
    ]))
    .await
    .unwrap();
    assert_eq!(harness.server.count("ModifyMonitoredItemsRequest"), 1);

    within(subscription.set_monitoring_mode(MonitoringMode::Disabled, &["ns=2;s=Level"]))
        .await
        .unwrap();
    assert_eq!(
        harness.server.monitoring_mode("ns=2;s=Level"),
        Some(MonitoringMode::Disabled)
    );

    let mut settings = subscription.settings();
    settings.max_notifications_per_publish = 50;
    let revised = within(subscription.modify(settings.clone())).await.unwrap();
    assert_eq!(revised.revised_lifetime_count, settings.lifetime_count);
    assert_eq!(harness.server.count("ModifySubscriptionRequest"), 1);
    assert_eq!(subscription.settings(), settings);

    subscription.unsubscribe().await.unwrap();
}

#[tokio::test]
async fn test_e2e_undecodable_payload_reaches_error_handler() {
    let harness = TestHarness::connect(ServerScript::default()).await.unwrap();
    let mut monitor = harness.monitor();
    let (errors_tx, mut errors) = mpsc::unbounded_channel();
    monitor.set_error_handler(move |subscription_id, error| {
        let _ = errors_tx.send((subscription_id, error));
    });
    let (tx, _rx) = mpsc::channel(8);
    let subscription = within(monitor.channel_subscribe(SubscribeArgs::nodes(["ns=2;s=Level"]), tx))
        .await
        .unwrap();
    let id = subscription.subscription_id();

    harness
        .server
        .publish_raw(id, vec![uaconv_proto::ExtensionObject::null()])
        .await;

    let (reported, error) = within(errors.recv()).await.unwrap();
    assert_eq!(reported, id);
    assert_eq!(error.category(), "protocol");
    subscription.unsubscribe().await.unwrap();
}
