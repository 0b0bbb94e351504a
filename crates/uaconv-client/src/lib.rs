// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA secure conversation client and subscription notification pump.
//!
//! This crate drives the I/O side of a client built on `uaconv-proto`:
//! the UACP handshake, the secure channel, session establishment, a
//! request-handle demultiplexer shared by concurrent requests and the
//! publish loop that feeds subscriptions.
//!
//! # Features
//!
//! - Hello/Acknowledge handshake over TCP or any async stream
//! - Secure channel open/close with security policy None
//! - CreateSession/ActivateSession with anonymous, user name or
//!   certificate identity
//! - Concurrent requests correlated by request handle
//! - [`NodeMonitor`] for data change and event subscriptions, delivered
//!   to a callback or a channel with slow-consumer accounting
//!
//! # Error Handling
//!
//! ```text
//! UaError
//! ├── Transport     - Socket, handshake and timeout failures
//! ├── Protocol      - Malformed or unexpected messages
//! ├── Session       - Session lifecycle errors
//! ├── Service       - Non-Good status in a response
//! ├── Subscription  - Monitored item and delivery errors
//! ├── Configuration - Invalid settings
//! └── Codec         - Local parse failures
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uaconv_client::{Client, ClientConfig, NodeMonitor, SubscribeArgs};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("opc.tcp://localhost:4840");
//!     let client = Arc::new(Client::connect(config.clone()).await?);
//!
//!     let monitor = NodeMonitor::new(client.clone(), config.subscription.clone());
//!     let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//!     let subscription = monitor
//!         .channel_subscribe(SubscribeArgs::nodes(["ns=2;s=Tank.Level"]), tx)
//!         .await?;
//!
//!     while let Some(message) = rx.recv().await {
//!         println!("{message:?}");
//!     }
//!
//!     subscription.unsubscribe().await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod keystore;
pub mod monitor;
pub mod publish;
pub mod response;
pub mod secure_channel;
pub mod security;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use client::{Client, Connector, ReadResult};
pub use config::{
    ChannelSettings, ClientConfig, ClientConfigBuilder, ConfigFormat, IdentityConfig,
    PublishSettings, SecurityMode, SecurityPolicy, SessionSettings, SubscriptionSettings,
};
pub use dispatcher::{Dispatcher, PendingResponse};
pub use error::{
    ConfigurationError, ErrorCode, ErrorSeverity, ProtocolError, ServiceError, SessionError,
    SubscriptionError, TransportError, UaError, UaErrorContext, UaResult,
};
pub use identity::{IdentityEncoder, IdentityToken, PlainIdentityEncoder};
pub use keystore::{KeyPair, KeyStore};
pub use monitor::{
    DataChangeMessage, ErrorHandler, EventMessage, Message, MessageHandler, MonitoredItem,
    MonitorRequest, NodeMonitor, SubscribeArgs, Subscription,
};
pub use publish::{PublishNotification, SubscriptionService};
pub use secure_channel::SecureChannel;
pub use security::{NoneSigner, Signer};
pub use session::{Session, SessionInfo, SessionState};
pub use transport::{BoxConnection, Connection, Endpoint};

/// Re-export of the wire format crate.
pub use uaconv_proto as proto;
