// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `hello` command.

use tokio::io::AsyncWriteExt;
use tracing::info;
use uaconv_client::{transport, ClientConfig};

use crate::cli::{Cli, OutputFormat};
use crate::error::BinResult;

/// Performs the handshake and prints the server's Acknowledge.
pub async fn hello(cli: &Cli, config: ClientConfig) -> BinResult<()> {
    let (mut connection, ack) = transport::dial(&config).await?;
    info!(endpoint = %config.endpoint, "Handshake complete");
    let _ = connection.shutdown().await;

    match cli.output {
        OutputFormat::Text => {
            println!("Acknowledge from {}", config.endpoint);
            println!("  Protocol version:    {}", ack.version);
            println!("  Receive buffer size: {}", ack.receive_buffer_size);
            println!("  Send buffer size:    {}", ack.send_buffer_size);
            println!("  Max message size:    {}", ack.max_message_size);
            println!("  Max chunk count:     {}", ack.max_chunk_count);
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "endpoint": config.endpoint,
                "version": ack.version,
                "receive_buffer_size": ack.receive_buffer_size,
                "send_buffer_size": ack.send_buffer_size,
                "max_message_size": ack.max_message_size,
                "max_chunk_count": ack.max_chunk_count,
            });
            println!("{output}");
        }
    }
    Ok(())
}
