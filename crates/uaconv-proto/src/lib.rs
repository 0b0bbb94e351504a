// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA binary wire format for the uaconv client.
//!
//! This crate holds everything that is pure data: built-in type encoding,
//! UACP handshake framing, secure conversation headers and the service
//! messages the client exchanges. It performs no I/O.
//!
//! # Layers
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ services    RequestEnvelope / ResponseEnvelope │
//! ├───────────────────────────────────────────────┤
//! │ uasc        SecureMessage<T> (OPN, MSG, CLO)   │
//! ├───────────────────────────────────────────────┤
//! │ uacp        Header, Hello, Acknowledge, Error  │
//! ├───────────────────────────────────────────────┤
//! │ encoding    Encode / Decode for built-in types │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use uaconv_proto::{
//!     Decode, Encode, ReadRequest, ReadValueId, RequestEnvelope, RequestHeader, NodeId,
//! };
//!
//! let request = RequestEnvelope::new(
//!     RequestHeader::default(),
//!     ReadRequest {
//!         nodes_to_read: vec![ReadValueId::value_of("ns=2;s=Tank.Level".parse().unwrap())],
//!         ..Default::default()
//!     },
//! );
//! let mut bytes = request.to_bytes();
//! assert_eq!(RequestEnvelope::decode(&mut bytes).unwrap(), request);
//! # let _ = NodeId::null();
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod encoding;
pub mod error;
pub mod node_id;
pub mod services;
pub mod status;
pub mod structures;
pub mod uacp;
pub mod uasc;
pub mod variant;

pub use codec::{BinaryCodec, Codec};
pub use encoding::{now, ByteString, Decode, Encode};
pub use error::{CodecError, CodecResult};
pub use node_id::{ExpandedNodeId, NodeId, NodeIdentifier};
pub use services::{
    ActivateSessionRequest, ActivateSessionResponse, CloseSecureChannelRequest,
    CloseSecureChannelResponse, CloseSessionRequest, CloseSessionResponse,
    CreateMonitoredItemsRequest, CreateMonitoredItemsResponse, CreateSessionRequest,
    CreateSessionResponse, CreateSubscriptionRequest, CreateSubscriptionResponse,
    DeleteMonitoredItemsRequest, DeleteMonitoredItemsResponse, DeleteSubscriptionsRequest,
    DeleteSubscriptionsResponse, ModifyMonitoredItemsRequest, ModifyMonitoredItemsResponse,
    ModifySubscriptionRequest, ModifySubscriptionResponse, OpenSecureChannelRequest,
    OpenSecureChannelResponse, PublishRequest, PublishResponse, ReadRequest, ReadResponse,
    RequestEnvelope, ResponseEnvelope, ServiceBody, ServiceFault, ServiceRequest,
    ServiceResponse, SetMonitoringModeRequest, SetMonitoringModeResponse,
};
pub use status::StatusCode;
pub use structures::{
    AnonymousIdentityToken, ApplicationDescription, ApplicationType, ChannelSecurityToken,
    DataChangeNotification, EndpointDescription, EventFieldList, EventFilter,
    EventNotificationList, MessageSecurityMode, MonitoredItemCreateRequest,
    MonitoredItemCreateResult, MonitoredItemModifyRequest, MonitoredItemModifyResult,
    MonitoredItemNotification, MonitoringMode, MonitoringParameters,
    NotificationData, NotificationMessage, ReadValueId, RequestHeader, ResponseHeader,
    SecurityTokenRequestType, SignatureData, SignedSoftwareCertificate,
    StatusChangeNotification, SubscriptionAcknowledgement, TimestampsToReturn,
    UserNameIdentityToken, UserTokenPolicy, UserTokenType, X509IdentityToken,
};
pub use uacp::{Acknowledge, ChunkType, ErrorMessage, Header, Hello, MessageType};
pub use uasc::{
    AsymmetricSecurityHeader, SecureMessage, SecurityHeader, SequenceHeader,
    SymmetricSecurityHeader, SECURE_HEADER_LEN, SECURITY_POLICY_NONE,
};
pub use variant::{
    DataValue, DiagnosticInfo, ExtensionBody, ExtensionObject, LocalizedText, QualifiedName,
    Variant, VariantArray,
};
