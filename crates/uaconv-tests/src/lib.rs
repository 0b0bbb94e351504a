// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uaconv Integration Tests
//!
//! Test utilities and integration suites for the uaconv workspace.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p uaconv-tests
//! cargo test -p uaconv-tests --test integration_monitor
//! cargo test -p uaconv-tests -- --nocapture
//! ```
//!
//! ## Suites
//!
//! - `integration_channel.rs`: handshake, channel open/close, sequencing
//! - `integration_session.rs`: session establishment and rejection
//! - `integration_client.rs`: reads, concurrency, publish loop
//! - `integration_monitor.rs`: node monitor against mock and scripted servers
//! - `integration_config.rs`: configuration files and overrides
//!
//! ## Writing New Tests
//!
//! ```rust,ignore
//! use uaconv_tests::prelude::*;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = TestHarness::connect(ServerScript::default()).await.unwrap();
//!     let result = harness.client.read(&["ns=2;i=1".parse().unwrap()]).await;
//!     // ... assertions
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::mocks::*;
    pub use crate::common::server::*;
    pub use crate::common::{init_test_logging, temp_test_dir};
}
