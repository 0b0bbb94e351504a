// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Interrupt handling for long-running commands.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::BinResult;

/// Returns a token that is cancelled on SIGINT or SIGTERM (Ctrl-C on
/// Windows).
///
/// Handlers are registered before this returns, so a signal that arrives
/// right after is not lost.
pub fn shutdown_token() -> BinResult<CancellationToken> {
    let token = CancellationToken::new();
    let trigger = token.clone();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
            trigger.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
            }
            trigger.cancel();
        });
    }

    Ok(token)
}
