// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Service messages and the request/response envelopes.
//!
//! A service body on the wire is a type tag followed by the header and the
//! body fields:
//!
//! ```text
//! ┌──────────────────────┬──────────────────────┬─────────────────┐
//! │ type tag             │ RequestHeader /      │ body fields     │
//! │ (expanded NodeId)    │ ResponseHeader       │                 │
//! └──────────────────────┴──────────────────────┴─────────────────┘
//! ```
//!
//! [`RequestEnvelope`] and [`ResponseEnvelope`] hold those three parts as
//! named fields. The body types here therefore contain only the fields that
//! follow the header.

use bytes::{Bytes, BytesMut};

use crate::encoding::{structure, ByteString, Decode, Encode};
use crate::error::{CodecError, CodecResult};
use crate::node_id::{ExpandedNodeId, NodeId};
use crate::status::StatusCode;
use crate::structures::{
    ApplicationDescription, ChannelSecurityToken, EndpointDescription, MessageSecurityMode,
    MonitoredItemCreateRequest, MonitoredItemCreateResult, MonitoredItemModifyRequest,
    MonitoredItemModifyResult, MonitoringMode, NotificationMessage, ReadValueId,
    RequestHeader, ResponseHeader, SecurityTokenRequestType, SignatureData,
    SignedSoftwareCertificate, SubscriptionAcknowledgement, TimestampsToReturn,
};
use crate::variant::{DataValue, DiagnosticInfo, ExtensionObject};

// =============================================================================
// Secure channel
// =============================================================================

structure! {
    /// Opens (or renews) a secure channel.
    OpenSecureChannelRequest {
        /// Protocol version, 0.
        client_protocol_version: u32,
        /// Issue or renew.
        request_type: SecurityTokenRequestType,
        /// Requested security mode.
        security_mode: MessageSecurityMode,
        /// Client nonce.
        client_nonce: ByteString,
        /// Requested token lifetime in milliseconds.
        requested_lifetime: u32,
    }
}

structure! {
    /// Answer to [`OpenSecureChannelRequest`].
    OpenSecureChannelResponse {
        /// Server protocol version.
        server_protocol_version: u32,
        /// Issued token.
        security_token: ChannelSecurityToken,
        /// Server nonce.
        server_nonce: ByteString,
    }
}

structure! {
    /// Closes a secure channel. Servers do not answer it.
    CloseSecureChannelRequest {}
}

structure! {
    /// Answer to [`CloseSecureChannelRequest`].
    CloseSecureChannelResponse {}
}

// =============================================================================
// Session
// =============================================================================

structure! {
    /// Creates a session.
    CreateSessionRequest {
        /// Client application description.
        client_description: ApplicationDescription,
        /// Server URI.
        server_uri: String,
        /// Endpoint URL the client connected to.
        endpoint_url: String,
        /// Human-readable session name.
        session_name: String,
        /// Client nonce.
        client_nonce: ByteString,
        /// Client certificate.
        client_certificate: ByteString,
        /// Requested session timeout in milliseconds.
        requested_session_timeout: f64,
        /// Largest response the client accepts.
        max_response_message_size: u32,
    }
}

structure! {
    /// Answer to [`CreateSessionRequest`].
    CreateSessionResponse {
        /// Session id.
        session_id: NodeId,
        /// Token to put in every request header.
        authentication_token: NodeId,
        /// Revised session timeout in milliseconds.
        revised_session_timeout: f64,
        /// Server nonce.
        server_nonce: ByteString,
        /// Server certificate.
        server_certificate: ByteString,
        /// Endpoints of the server.
        server_endpoints: Vec<EndpointDescription>,
        /// Server software certificates.
        server_software_certificates: Vec<SignedSoftwareCertificate>,
        /// Server signature over the client certificate and nonce.
        server_signature: SignatureData,
        /// Largest request the server accepts.
        max_request_message_size: u32,
    }
}

structure! {
    /// Activates a created session.
    ActivateSessionRequest {
        /// Client signature over the server certificate and nonce.
        client_signature: SignatureData,
        /// Client software certificates.
        client_software_certificates: Vec<SignedSoftwareCertificate>,
        /// Preferred locales.
        locale_ids: Vec<String>,
        /// Encoded user identity token.
        user_identity_token: ExtensionObject,
        /// Signature proving possession of the user token.
        user_token_signature: SignatureData,
    }
}

structure! {
    /// Answer to [`ActivateSessionRequest`].
    ActivateSessionResponse {
        /// New server nonce.
        server_nonce: ByteString,
        /// Per-software-certificate results.
        results: Vec<StatusCode>,
        /// Diagnostics.
        diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

structure! {
    /// Closes a session.
    CloseSessionRequest {
        /// Delete the session's subscriptions too.
        delete_subscriptions: bool,
    }
}

structure! {
    /// Answer to [`CloseSessionRequest`].
    CloseSessionResponse {}
}

// =============================================================================
// Attribute
// =============================================================================

structure! {
    /// Reads node attributes.
    ReadRequest {
        /// Maximum cache age in milliseconds.
        max_age: f64,
        /// Timestamps to return.
        timestamps_to_return: TimestampsToReturn,
        /// Attributes to read.
        nodes_to_read: Vec<ReadValueId>,
    }
}

structure! {
    /// Answer to [`ReadRequest`].
    ReadResponse {
        /// One value per requested attribute.
        results: Vec<DataValue>,
        /// Diagnostics.
        diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

// =============================================================================
// Subscription
// =============================================================================

structure! {
    /// Creates a subscription.
    CreateSubscriptionRequest {
        /// Publishing interval in milliseconds.
        requested_publishing_interval: f64,
        /// Lifetime in publishing intervals.
        requested_lifetime_count: u32,
        /// Keep-alive count in publishing intervals.
        requested_max_keep_alive_count: u32,
        /// Notifications per publish (0 = unlimited).
        max_notifications_per_publish: u32,
        /// Publishing enabled.
        publishing_enabled: bool,
        /// Relative priority.
        priority: u8,
    }
}

structure! {
    /// Answer to [`CreateSubscriptionRequest`].
    CreateSubscriptionResponse {
        /// Subscription id.
        subscription_id: u32,
        /// Revised publishing interval.
        revised_publishing_interval: f64,
        /// Revised lifetime count.
        revised_lifetime_count: u32,
        /// Revised keep-alive count.
        revised_max_keep_alive_count: u32,
    }
}

structure! {
    /// Changes the parameters of a subscription.
    ModifySubscriptionRequest {
        /// Target subscription.
        subscription_id: u32,
        /// Publishing interval in milliseconds.
        requested_publishing_interval: f64,
        /// Lifetime in publishing intervals.
        requested_lifetime_count: u32,
        /// Keep-alive count in publishing intervals.
        requested_max_keep_alive_count: u32,
        /// Notifications per publish (0 = unlimited).
        max_notifications_per_publish: u32,
        /// Relative priority.
        priority: u8,
    }
}

structure! {
    /// Answer to [`ModifySubscriptionRequest`].
    ModifySubscriptionResponse {
        /// Revised publishing interval.
        revised_publishing_interval: f64,
        /// Revised lifetime count.
        revised_lifetime_count: u32,
        /// Revised keep-alive count.
        revised_max_keep_alive_count: u32,
    }
}

structure! {
    /// Deletes subscriptions.
    DeleteSubscriptionsRequest {
        /// Subscriptions to delete.
        subscription_ids: Vec<u32>,
    }
}

structure! {
    /// Answer to [`DeleteSubscriptionsRequest`].
    DeleteSubscriptionsResponse {
        /// One status per subscription.
        results: Vec<StatusCode>,
        /// Diagnostics.
        diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

structure! {
    /// Creates monitored items in a subscription.
    CreateMonitoredItemsRequest {
        /// Target subscription.
        subscription_id: u32,
        /// Timestamps to return.
        timestamps_to_return: TimestampsToReturn,
        /// Items to create.
        items_to_create: Vec<MonitoredItemCreateRequest>,
    }
}

structure! {
    /// Answer to [`CreateMonitoredItemsRequest`].
    CreateMonitoredItemsResponse {
        /// One result per requested item, in request order.
        results: Vec<MonitoredItemCreateResult>,
        /// Diagnostics.
        diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

structure! {
    /// Changes the parameters of monitored items.
    ModifyMonitoredItemsRequest {
        /// Target subscription.
        subscription_id: u32,
        /// Timestamps to return.
        timestamps_to_return: TimestampsToReturn,
        /// Items to modify.
        items_to_modify: Vec<MonitoredItemModifyRequest>,
    }
}

structure! {
    /// Answer to [`ModifyMonitoredItemsRequest`].
    ModifyMonitoredItemsResponse {
        /// One result per item, in request order.
        results: Vec<MonitoredItemModifyResult>,
        /// Diagnostics.
        diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

structure! {
    /// Sets the monitoring mode of monitored items.
    SetMonitoringModeRequest {
        /// Target subscription.
        subscription_id: u32,
        /// New mode.
        monitoring_mode: MonitoringMode,
        /// Server-assigned ids of the items.
        monitored_item_ids: Vec<u32>,
    }
}

structure! {
    /// Answer to [`SetMonitoringModeRequest`].
    SetMonitoringModeResponse {
        /// One status per item.
        results: Vec<StatusCode>,
        /// Diagnostics.
        diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

structure! {
    /// Deletes monitored items from a subscription.
    DeleteMonitoredItemsRequest {
        /// Target subscription.
        subscription_id: u32,
        /// Server-assigned ids of the items.
        monitored_item_ids: Vec<u32>,
    }
}

structure! {
    /// Answer to [`DeleteMonitoredItemsRequest`].
    DeleteMonitoredItemsResponse {
        /// One status per item.
        results: Vec<StatusCode>,
        /// Diagnostics.
        diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

structure! {
    /// Asks for the next notification message of any subscription.
    PublishRequest {
        /// Acknowledgements for received messages.
        subscription_acknowledgements: Vec<SubscriptionAcknowledgement>,
    }
}

structure! {
    /// Answer to [`PublishRequest`].
    PublishResponse {
        /// Subscription the message belongs to.
        subscription_id: u32,
        /// Sequence numbers not yet acknowledged.
        available_sequence_numbers: Vec<u32>,
        /// More notifications are waiting.
        more_notifications: bool,
        /// The notifications.
        notification_message: NotificationMessage,
        /// Results of the acknowledgements.
        results: Vec<StatusCode>,
        /// Diagnostics.
        diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

structure! {
    /// Generic failure response; the status is in the header.
    ServiceFault {}
}

// =============================================================================
// Registry
// =============================================================================

macro_rules! service_registry {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $variant:ident($ty:ident) = $id:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub enum $name {
            $(
                #[doc = concat!("[`", stringify!($ty), "`] body.")]
                $variant($ty),
            )+
        }

        impl $name {
            /// Binary encoding id used as the type tag.
            pub fn type_id(&self) -> u32 {
                match self {
                    $( Self::$variant(_) => $id, )+
                }
            }

            /// Name of the body type.
            pub fn name(&self) -> &'static str {
                match self {
                    $( Self::$variant(_) => stringify!($ty), )+
                }
            }

            /// Name of the body type registered under `type_id`.
            pub fn name_of(type_id: u32) -> Option<&'static str> {
                match type_id {
                    $( $id => Some(stringify!($ty)), )+
                    _ => None,
                }
            }

            fn encode_body(&self, buf: &mut BytesMut) {
                match self {
                    $( Self::$variant(body) => body.encode(buf), )+
                }
            }

            fn decode_body(type_id: u32, buf: &mut Bytes) -> CodecResult<Self> {
                match type_id {
                    $( $id => Ok(Self::$variant(<$ty as Decode>::decode(buf)?)), )+
                    other => Err(CodecError::UnknownService(other)),
                }
            }
        }

        $(
            impl From<$ty> for $name {
                fn from(body: $ty) -> Self {
                    Self::$variant(body)
                }
            }

            impl TryFrom<$name> for $ty {
                type Error = $name;

                fn try_from(value: $name) -> Result<Self, $name> {
                    match value {
                        $name::$variant(body) => Ok(body),
                        other => Err(other),
                    }
                }
            }

            impl ServiceBody for $ty {
                const NAME: &'static str = stringify!($ty);
                const TYPE_ID: u32 = $id;
            }
        )+
    };
}

/// Static identity of a service body type.
pub trait ServiceBody {
    /// Type name, e.g. `ReadResponse`.
    const NAME: &'static str;
    /// Binary encoding id.
    const TYPE_ID: u32;
}

service_registry! {
    /// Every request body this client sends.
    ServiceRequest {
        OpenSecureChannel(OpenSecureChannelRequest) = 446,
        CloseSecureChannel(CloseSecureChannelRequest) = 452,
        CreateSession(CreateSessionRequest) = 461,
        ActivateSession(ActivateSessionRequest) = 467,
        CloseSession(CloseSessionRequest) = 473,
        Read(ReadRequest) = 631,
        CreateMonitoredItems(CreateMonitoredItemsRequest) = 751,
        ModifyMonitoredItems(ModifyMonitoredItemsRequest) = 763,
        SetMonitoringMode(SetMonitoringModeRequest) = 769,
        DeleteMonitoredItems(DeleteMonitoredItemsRequest) = 781,
        CreateSubscription(CreateSubscriptionRequest) = 787,
        ModifySubscription(ModifySubscriptionRequest) = 793,
        Publish(PublishRequest) = 826,
        DeleteSubscriptions(DeleteSubscriptionsRequest) = 847,
    }
}

service_registry! {
    /// Every response body this client understands.
    ServiceResponse {
        ServiceFault(ServiceFault) = 397,
        OpenSecureChannel(OpenSecureChannelResponse) = 449,
        CloseSecureChannel(CloseSecureChannelResponse) = 455,
        CreateSession(CreateSessionResponse) = 464,
        ActivateSession(ActivateSessionResponse) = 470,
        CloseSession(CloseSessionResponse) = 476,
        Read(ReadResponse) = 634,
        CreateMonitoredItems(CreateMonitoredItemsResponse) = 754,
        ModifyMonitoredItems(ModifyMonitoredItemsResponse) = 766,
        SetMonitoringMode(SetMonitoringModeResponse) = 772,
        DeleteMonitoredItems(DeleteMonitoredItemsResponse) = 784,
        CreateSubscription(CreateSubscriptionResponse) = 790,
        ModifySubscription(ModifySubscriptionResponse) = 796,
        Publish(PublishResponse) = 829,
        DeleteSubscriptions(DeleteSubscriptionsResponse) = 850,
    }
}

/// Reads a type tag and returns its numeric id.
fn decode_type_tag(buf: &mut Bytes) -> CodecResult<u32> {
    let tag = ExpandedNodeId::decode(buf)?;
    match (tag.node_id.namespace_index, tag.node_id.as_numeric()) {
        (0, Some(id)) => Ok(id),
        _ => Err(CodecError::UnknownService(0)),
    }
}

// =============================================================================
// Envelopes
// =============================================================================

/// An outgoing request: type tag, header and body as named fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    /// Binary encoding id of `body`.
    pub type_tag: u32,
    /// Request header.
    pub header: RequestHeader,
    /// Request body.
    pub body: ServiceRequest,
}

impl RequestEnvelope {
    /// Wraps `body`, deriving the type tag from it.
    pub fn new(header: RequestHeader, body: impl Into<ServiceRequest>) -> Self {
        let body = body.into();
        Self {
            type_tag: body.type_id(),
            header,
            body,
        }
    }
}

impl Encode for RequestEnvelope {
    fn encode(&self, buf: &mut BytesMut) {
        ExpandedNodeId::numeric(self.type_tag).encode(buf);
        self.header.encode(buf);
        self.body.encode_body(buf);
    }
}

impl Decode for RequestEnvelope {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        let type_tag = decode_type_tag(buf)?;
        if ServiceRequest::name_of(type_tag).is_none() {
            return Err(match ServiceResponse::name_of(type_tag) {
                Some(name) => CodecError::WrongDirection { name },
                None => CodecError::UnknownService(type_tag),
            });
        }
        let header = RequestHeader::decode(buf)?;
        let body = ServiceRequest::decode_body(type_tag, buf)?;
        Ok(Self {
            type_tag,
            header,
            body,
        })
    }
}

/// An incoming response: type tag, header and body as named fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    /// Binary encoding id of `body`.
    pub type_tag: u32,
    /// Response header.
    pub header: ResponseHeader,
    /// Response body.
    pub body: ServiceResponse,
}

impl ResponseEnvelope {
    /// Wraps `body`, deriving the type tag from it.
    pub fn new(header: ResponseHeader, body: impl Into<ServiceResponse>) -> Self {
        let body = body.into();
        Self {
            type_tag: body.type_id(),
            header,
            body,
        }
    }

    /// Handle of the request this answers.
    pub fn request_handle(&self) -> u32 {
        self.header.request_handle
    }

    /// Overall service result.
    pub fn service_result(&self) -> StatusCode {
        self.header.service_result
    }

    /// Name of the body type.
    pub fn name(&self) -> &'static str {
        self.body.name()
    }
}

impl Encode for ResponseEnvelope {
    fn encode(&self, buf: &mut BytesMut) {
        ExpandedNodeId::numeric(self.type_tag).encode(buf);
        self.header.encode(buf);
        self.body.encode_body(buf);
    }
}

impl Decode for ResponseEnvelope {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        let type_tag = decode_type_tag(buf)?;
        if ServiceResponse::name_of(type_tag).is_none() {
            return Err(match ServiceRequest::name_of(type_tag) {
                Some(name) => CodecError::WrongDirection { name },
                None => CodecError::UnknownService(type_tag),
            });
        }
        let header = ResponseHeader::decode(buf)?;
        let body = ServiceResponse::decode_body(type_tag, buf)?;
        Ok(Self {
            type_tag,
            header,
            body,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
