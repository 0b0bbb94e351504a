// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `subscribe` command.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uaconv_client::{Client, ClientConfig, Message, NodeMonitor, SubscribeArgs as MonitorArgs};

use crate::cli::{Cli, OutputFormat, SubscribeArgs};
use crate::commands::read::print_value;
use crate::error::BinResult;
use crate::shutdown::shutdown_token;

/// Prints data changes until interrupted, then the delivery counters.
pub async fn subscribe(cli: &Cli, config: ClientConfig, args: SubscribeArgs) -> BinResult<()> {
    let shutdown = shutdown_token()?;
    let mut settings = config.subscription.clone();
    if let Some(interval) = args.interval {
        settings.publishing_interval = interval;
    }

    let client = Arc::new(Client::connect(config).await?);
    let mut monitor = NodeMonitor::new(client.clone(), settings);
    monitor.set_error_handler(|subscription_id, error| {
        warn!(subscription_id, error = %error, "Subscription error");
    });

    let (tx, mut rx) = mpsc::channel(args.buffer.max(1));
    let monitor_args = MonitorArgs::nodes(args.nodes).with_cancel(shutdown.child_token());
    let subscription = match monitor.channel_subscribe(monitor_args, tx).await {
        Ok(subscription) => subscription,
        Err(e) => {
            let _ = client.close().await;
            return Err(e.into());
        }
    };
    info!(
        subscription_id = subscription.subscription_id(),
        "Subscribed, press Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => print_message(cli.output, &message),
                None => break,
            },
        }
    }

    let unsubscribed = subscription.unsubscribe().await;
    let closed = client.close().await;

    match cli.output {
        OutputFormat::Text => println!(
            "delivered: {}, dropped: {}",
            subscription.delivered(),
            subscription.dropped()
        ),
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "delivered": subscription.delivered(),
                "dropped": subscription.dropped(),
            })
        ),
    }

    unsubscribed?;
    closed?;
    Ok(())
}

fn print_message(output: OutputFormat, message: &Message) {
    match message {
        Message::DataChange(change) => match (&change.node_id, &change.value) {
            (Some(node), Some(value)) => print_value(output, node, value),
            _ => {
                if let Some(error) = &change.error {
                    warn!(error = %error, "Undeliverable data change");
                }
            }
        },
        Message::Event(event) => {
            let node = event
                .node_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            let fields: Vec<String> = event
                .fields
                .iter()
                .filter_map(|field| field.value.as_ref().map(ToString::to_string))
                .collect();
            println!("{node}\tevent\t{}", fields.join(", "));
        }
    }
}
