// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.

mod hello;
mod read;
mod subscribe;

pub use hello::hello;
pub use read::read;
pub use subscribe::subscribe;

use uaconv_client::ClientConfig;

use crate::cli::{Cli, Commands};
use crate::error::{BinError, BinResult};

/// Executes the command selected on the command line.
pub async fn execute(cli: Cli) -> BinResult<()> {
    let config = load_config(&cli)?;
    match cli.command.clone() {
        Commands::Hello => hello::hello(&cli, config).await,
        Commands::Read(args) => read::read(&cli, config, args).await,
        Commands::Subscribe(args) => subscribe::subscribe(&cli, config, args).await,
    }
}

/// Builds the client configuration from the file and flags.
///
/// `--endpoint` wins over `UACONV_*` variables, which win over the file.
pub fn load_config(cli: &Cli) -> BinResult<ClientConfig> {
    let mut config = match (&cli.config, &cli.endpoint) {
        (Some(path), _) => ClientConfig::load(path)
            .map_err(|e| BinError::from(e).with_context(format!("loading {}", path.display())))?,
        (None, Some(endpoint)) => {
            let mut config = ClientConfig::new(endpoint.clone());
            config.apply_env_overrides();
            config
        }
        (None, None) => {
            return Err(BinError::config(
                "no endpoint given: pass --endpoint or --config",
            ))
        }
    };
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    config.validate()?;
    Ok(config)
}
