// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uaconv-bin
//!
//! Command line front end for `uaconv-client`.
//!
//! ## Usage
//!
//! ```bash
//! # Handshake only
//! uaconv -e opc.tcp://localhost:4840 hello
//!
//! # Read values
//! uaconv -e opc.tcp://localhost:4840 read "ns=2;s=Tank.Level" "ns=2;i=7"
//!
//! # Watch values until Ctrl-C, using a config file
//! uaconv -c client.yaml subscribe "ns=2;s=Tank.Level" -i 250ms
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod shutdown;

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use logging::init_logging;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
