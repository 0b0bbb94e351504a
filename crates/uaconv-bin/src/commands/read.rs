// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `read` command.

use uaconv_client::{Client, ClientConfig};
use uaconv_proto::{DataValue, NodeId, StatusCode};

use crate::cli::{Cli, OutputFormat, ReadArgs};
use crate::error::BinResult;

/// Connects, reads the given nodes and prints one line per node.
pub async fn read(cli: &Cli, config: ClientConfig, args: ReadArgs) -> BinResult<()> {
    let nodes = NodeId::parse_all(&args.nodes).map_err(uaconv_client::UaError::from)?;
    let client = Client::connect(config).await?;

    let result = client.read(&nodes).await;
    let closed = client.close().await;
    let result = result?;
    closed?;

    for (node, value) in nodes.iter().zip(&result.values) {
        print_value(cli.output, node, value);
    }
    Ok(())
}

pub(crate) fn print_value(output: OutputFormat, node: &NodeId, value: &DataValue) {
    let status = value.status.unwrap_or(StatusCode::GOOD);
    let rendered = value
        .value
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "null".to_string());
    let timestamp = value
        .source_timestamp
        .or(value.server_timestamp)
        .map(|t| t.to_rfc3339());

    match output {
        OutputFormat::Text => match timestamp {
            Some(ts) => println!("{node}\t{rendered}\t{status}\t{ts}"),
            None => println!("{node}\t{rendered}\t{status}"),
        },
        OutputFormat::Json => {
            let line = serde_json::json!({
                "node": node.to_string(),
                "value": rendered,
                "status": status.to_string(),
                "timestamp": timestamp,
            });
            println!("{line}");
        }
    }
}
