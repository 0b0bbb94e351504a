// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Structures and enumerations shared by the service messages.

use chrono::{DateTime, Utc};

use crate::encoding::{enumeration, structure, ByteString};
use crate::error::CodecResult;
use crate::node_id::NodeId;
use crate::status::StatusCode;
use crate::variant::{DataValue, DiagnosticInfo, ExtensionObject, LocalizedText, QualifiedName, Variant};

/// Binary encoding ids of structures carried inside extension objects.
pub mod encoding_id {
    /// AnonymousIdentityToken.
    pub const ANONYMOUS_IDENTITY_TOKEN: u32 = 321;
    /// UserNameIdentityToken.
    pub const USER_NAME_IDENTITY_TOKEN: u32 = 324;
    /// X509IdentityToken.
    pub const X509_IDENTITY_TOKEN: u32 = 327;
    /// EventFilter.
    pub const EVENT_FILTER: u32 = 727;
    /// DataChangeNotification.
    pub const DATA_CHANGE_NOTIFICATION: u32 = 811;
    /// StatusChangeNotification.
    pub const STATUS_CHANGE_NOTIFICATION: u32 = 820;
    /// EventNotificationList.
    pub const EVENT_NOTIFICATION_LIST: u32 = 916;
}

/// Node attribute ids.
pub mod attribute_id {
    /// NodeId attribute.
    pub const NODE_ID: u32 = 1;
    /// BrowseName attribute.
    pub const BROWSE_NAME: u32 = 3;
    /// DisplayName attribute.
    pub const DISPLAY_NAME: u32 = 4;
    /// EventNotifier attribute, monitored for events.
    pub const EVENT_NOTIFIER: u32 = 12;
    /// Value attribute.
    pub const VALUE: u32 = 13;
}

/// BaseEventType, the default type definition for event field selection.
pub const BASE_EVENT_TYPE: u32 = 2041;

// =============================================================================
// Enumerations
// =============================================================================

enumeration! {
    /// Message security applied on a secure channel.
    MessageSecurityMode {
        /// Invalid.
        Invalid = 0,
        /// No signing or encryption.
        #[default]
        None = 1,
        /// Signed.
        Sign = 2,
        /// Signed and encrypted.
        SignAndEncrypt = 3,
    }
}

enumeration! {
    /// Whether an OpenSecureChannel request issues or renews a token.
    SecurityTokenRequestType {
        /// New token on a new channel.
        #[default]
        Issue = 0,
        /// Renewal on an existing channel.
        Renew = 1,
    }
}

enumeration! {
    /// Kind of OPC UA application.
    ApplicationType {
        /// Server.
        Server = 0,
        /// Client.
        #[default]
        Client = 1,
        /// Both client and server.
        ClientAndServer = 2,
        /// Discovery server.
        DiscoveryServer = 3,
    }
}

enumeration! {
    /// User identity token kinds accepted by an endpoint.
    UserTokenType {
        /// No user.
        #[default]
        Anonymous = 0,
        /// User name and password.
        UserName = 1,
        /// X.509 certificate.
        Certificate = 2,
        /// Externally issued token.
        IssuedToken = 3,
    }
}

enumeration! {
    /// Timestamps a server returns with values.
    TimestampsToReturn {
        /// Source timestamp only.
        Source = 0,
        /// Server timestamp only.
        Server = 1,
        /// Both timestamps.
        #[default]
        Both = 2,
        /// No timestamps.
        Neither = 3,
    }
}

enumeration! {
    /// Monitoring mode of a monitored item.
    MonitoringMode {
        /// Not sampled.
        Disabled = 0,
        /// Sampled, not reported.
        Sampling = 1,
        /// Sampled and reported.
        #[default]
        Reporting = 2,
    }
}

// =============================================================================
// Headers
// =============================================================================

structure! {
    /// Header carried by every request.
    RequestHeader {
        /// Session authentication token (null before a session exists).
        authentication_token: NodeId,
        /// Time the request was sent.
        timestamp: DateTime<Utc>,
        /// Client-assigned handle echoed in the response.
        request_handle: u32,
        /// Diagnostics bit mask.
        return_diagnostics: u32,
        /// Audit log entry id.
        audit_entry_id: String,
        /// Timeout hint in milliseconds.
        timeout_hint: u32,
        /// Reserved.
        additional_header: ExtensionObject,
    }
}

structure! {
    /// Header carried by every response.
    ResponseHeader {
        /// Time the response was sent.
        timestamp: DateTime<Utc>,
        /// Handle of the request being answered.
        request_handle: u32,
        /// Overall result.
        service_result: StatusCode,
        /// Service-level diagnostics.
        service_diagnostics: DiagnosticInfo,
        /// Strings referenced by diagnostics.
        string_table: Vec<String>,
        /// Reserved.
        additional_header: ExtensionObject,
    }
}

impl ResponseHeader {
    /// A Good header answering `request_handle`.
    pub fn good(request_handle: u32) -> Self {
        Self {
            timestamp: crate::encoding::now(),
            request_handle,
            ..Default::default()
        }
    }
}

// =============================================================================
// Application / endpoint descriptions
// =============================================================================

structure! {
    /// Describes an application.
    ApplicationDescription {
        /// Globally unique application URI.
        application_uri: String,
        /// Product URI.
        product_uri: String,
        /// Display name.
        application_name: LocalizedText,
        /// Application kind.
        application_type: ApplicationType,
        /// Gateway server URI.
        gateway_server_uri: String,
        /// Discovery profile URI.
        discovery_profile_uri: String,
        /// Discovery URLs.
        discovery_urls: Vec<String>,
    }
}

structure! {
    /// A user token kind an endpoint accepts.
    UserTokenPolicy {
        /// Policy id to put in identity tokens.
        policy_id: String,
        /// Token kind.
        token_type: UserTokenType,
        /// Issued token type URI.
        issued_token_type: String,
        /// Issuer endpoint URL.
        issuer_endpoint_url: String,
        /// Security policy used to encrypt the token.
        security_policy_uri: String,
    }
}

structure! {
    /// A server endpoint.
    EndpointDescription {
        /// Endpoint URL.
        endpoint_url: String,
        /// Server description.
        server: ApplicationDescription,
        /// Server certificate.
        server_certificate: ByteString,
        /// Security mode.
        security_mode: MessageSecurityMode,
        /// Security policy URI.
        security_policy_uri: String,
        /// Accepted user tokens.
        user_identity_tokens: Vec<UserTokenPolicy>,
        /// Transport profile URI.
        transport_profile_uri: String,
        /// Relative security level.
        security_level: u8,
    }
}

structure! {
    /// A signature and the algorithm that produced it.
    SignatureData {
        /// Algorithm URI (empty when unsigned).
        algorithm: String,
        /// Signature bytes.
        signature: ByteString,
    }
}

impl SignatureData {
    /// Returns `true` when no signature is present.
    pub fn is_empty(&self) -> bool {
        self.algorithm.is_empty() && self.signature.is_null()
    }
}

structure! {
    /// A software certificate with its signature.
    SignedSoftwareCertificate {
        /// Certificate bytes.
        certificate_data: ByteString,
        /// Signature bytes.
        signature: ByteString,
    }
}

structure! {
    /// Token issued by OpenSecureChannel.
    ChannelSecurityToken {
        /// Secure channel id assigned by the server.
        channel_id: u32,
        /// Token id to put in symmetric security headers.
        token_id: u32,
        /// Creation time.
        created_at: DateTime<Utc>,
        /// Lifetime granted in milliseconds.
        revised_lifetime: u32,
    }
}

// =============================================================================
// Identity tokens
// =============================================================================

structure! {
    /// Anonymous user.
    AnonymousIdentityToken {
        /// Policy id from the endpoint's user token policy.
        policy_id: String,
    }
}

structure! {
    /// User name and (possibly encrypted) password.
    UserNameIdentityToken {
        /// Policy id from the endpoint's user token policy.
        policy_id: String,
        /// User name.
        user_name: String,
        /// Password bytes, encrypted per `encryption_algorithm`.
        password: ByteString,
        /// Encryption algorithm URI (empty for plain text).
        encryption_algorithm: String,
    }
}

structure! {
    /// X.509 certificate user.
    X509IdentityToken {
        /// Policy id from the endpoint's user token policy.
        policy_id: String,
        /// DER certificate.
        certificate_data: ByteString,
    }
}

// =============================================================================
// Reading and monitoring
// =============================================================================

structure! {
    /// Identifies one attribute of one node.
    ReadValueId {
        /// Node.
        node_id: NodeId,
        /// Attribute id, see [`attribute_id`].
        attribute_id: u32,
        /// Index range for arrays.
        index_range: String,
        /// Requested data encoding.
        data_encoding: QualifiedName,
    }
}

impl ReadValueId {
    /// The Value attribute of `node_id`.
    pub fn value_of(node_id: NodeId) -> Self {
        Self {
            node_id,
            attribute_id: attribute_id::VALUE,
            ..Default::default()
        }
    }

    /// The EventNotifier attribute of `node_id`.
    pub fn events_of(node_id: NodeId) -> Self {
        Self {
            node_id,
            attribute_id: attribute_id::EVENT_NOTIFIER,
            ..Default::default()
        }
    }
}

structure! {
    /// Sampling and queueing parameters of a monitored item.
    MonitoringParameters {
        /// Handle echoed in notifications.
        client_handle: u32,
        /// Sampling interval in milliseconds (-1 = publishing interval).
        sampling_interval: f64,
        /// Data change or event filter.
        filter: ExtensionObject,
        /// Server-side queue size.
        queue_size: u32,
        /// Discard oldest on overflow.
        discard_oldest: bool,
    }
}

structure! {
    /// One item of a CreateMonitoredItems request.
    MonitoredItemCreateRequest {
        /// What to monitor.
        item_to_monitor: ReadValueId,
        /// Monitoring mode.
        monitoring_mode: MonitoringMode,
        /// Parameters.
        requested_parameters: MonitoringParameters,
    }
}

structure! {
    /// One result of a CreateMonitoredItems response.
    MonitoredItemCreateResult {
        /// Item status.
        status_code: StatusCode,
        /// Server-assigned monitored item id.
        monitored_item_id: u32,
        /// Revised sampling interval.
        revised_sampling_interval: f64,
        /// Revised queue size.
        revised_queue_size: u32,
        /// Filter result.
        filter_result: ExtensionObject,
    }
}

structure! {
    /// One item of a ModifyMonitoredItems request.
    MonitoredItemModifyRequest {
        /// Server-assigned id of the item.
        monitored_item_id: u32,
        /// New parameters; the client handle is kept.
        requested_parameters: MonitoringParameters,
    }
}

structure! {
    /// One result of a ModifyMonitoredItems response.
    MonitoredItemModifyResult {
        /// Item status.
        status_code: StatusCode,
        /// Revised sampling interval.
        revised_sampling_interval: f64,
        /// Revised queue size.
        revised_queue_size: u32,
        /// Filter result.
        filter_result: ExtensionObject,
    }
}

structure! {
    /// Operand selecting an event field by browse path.
    SimpleAttributeOperand {
        /// Event type the path starts from.
        type_definition_id: NodeId,
        /// Browse path.
        browse_path: Vec<QualifiedName>,
        /// Attribute id.
        attribute_id: u32,
        /// Index range.
        index_range: String,
    }
}

structure! {
    /// One element of a content filter.
    ContentFilterElement {
        /// Filter operator.
        filter_operator: i32,
        /// Operands.
        filter_operands: Vec<ExtensionObject>,
    }
}

structure! {
    /// Where clause of an event filter.
    ContentFilter {
        /// Elements.
        elements: Vec<ContentFilterElement>,
    }
}

structure! {
    /// Event filter: selected fields and an optional where clause.
    EventFilter {
        /// Fields to return for each event.
        select_clauses: Vec<SimpleAttributeOperand>,
        /// Filter condition.
        where_clause: ContentFilter,
    }
}

impl EventFilter {
    /// Selects the named BaseEventType fields, without a where clause.
    pub fn select(fields: &[&str]) -> Self {
        Self {
            select_clauses: fields
                .iter()
                .map(|name| SimpleAttributeOperand {
                    type_definition_id: NodeId::numeric(0, BASE_EVENT_TYPE),
                    browse_path: vec![QualifiedName {
                        namespace_index: 0,
                        name: (*name).to_string(),
                    }],
                    attribute_id: attribute_id::VALUE,
                    index_range: String::new(),
                })
                .collect(),
            where_clause: ContentFilter::default(),
        }
    }

    /// Wraps the filter for use in [`MonitoringParameters::filter`].
    pub fn to_extension_object(&self) -> ExtensionObject {
        ExtensionObject::from_encodable(encoding_id::EVENT_FILTER, self)
    }
}

// =============================================================================
// Notifications
// =============================================================================

structure! {
    /// Acknowledges a received notification message.
    SubscriptionAcknowledgement {
        /// Subscription id.
        subscription_id: u32,
        /// Sequence number being acknowledged.
        sequence_number: u32,
    }
}

structure! {
    /// Notifications published for one subscription.
    NotificationMessage {
        /// Sequence number to acknowledge.
        sequence_number: u32,
        /// Publish time.
        publish_time: DateTime<Utc>,
        /// Notification payloads.
        notification_data: Vec<ExtensionObject>,
    }
}

structure! {
    /// One changed value.
    MonitoredItemNotification {
        /// Client handle of the monitored item.
        client_handle: u32,
        /// New value.
        value: DataValue,
    }
}

structure! {
    /// Data change payload.
    DataChangeNotification {
        /// Changed values.
        monitored_items: Vec<MonitoredItemNotification>,
        /// Diagnostics.
        diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

structure! {
    /// Fields of one event.
    EventFieldList {
        /// Client handle of the monitored item.
        client_handle: u32,
        /// Selected fields in select-clause order.
        event_fields: Vec<Variant>,
    }
}

structure! {
    /// Event payload.
    EventNotificationList {
        /// Events.
        events: Vec<EventFieldList>,
    }
}

structure! {
    /// Subscription status change payload.
    StatusChangeNotification {
        /// New status.
        status: StatusCode,
        /// Diagnostics.
        diagnostic_info: DiagnosticInfo,
    }
}

/// A decoded notification payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationData {
    /// Data changes.
    DataChange(DataChangeNotification),
    /// Events.
    Events(EventNotificationList),
    /// Subscription status change.
    StatusChange(StatusChangeNotification),
    /// Payload of an unrecognized type.
    Unknown(ExtensionObject),
}

impl NotificationData {
    /// Decodes a payload according to its encoding id.
    pub fn from_extension_object(object: &ExtensionObject) -> CodecResult<Self> {
        Ok(match object.encoding_id() {
            Some(encoding_id::DATA_CHANGE_NOTIFICATION) => Self::DataChange(object.decode_body()?),
            Some(encoding_id::EVENT_NOTIFICATION_LIST) => Self::Events(object.decode_body()?),
            Some(encoding_id::STATUS_CHANGE_NOTIFICATION) => {
                Self::StatusChange(object.decode_body()?)
            }
            _ => Self::Unknown(object.clone()),
        })
    }

    /// Wraps the payload in an extension object.
    pub fn to_extension_object(&self) -> ExtensionObject {
        match self {
            Self::DataChange(v) => {
                ExtensionObject::from_encodable(encoding_id::DATA_CHANGE_NOTIFICATION, v)
            }
            Self::Events(v) => ExtensionObject::from_encodable(encoding_id::EVENT_NOTIFICATION_LIST, v),
            Self::StatusChange(v) => {
                ExtensionObject::from_encodable(encoding_id::STATUS_CHANGE_NOTIFICATION, v)
            }
            Self::Unknown(object) => object.clone(),
        }
    }
}

impl NotificationMessage {
    /// Decodes every payload of the message.
    pub fn notifications(&self) -> CodecResult<Vec<NotificationData>> {
        self.notification_data
            .iter()
            .map(NotificationData::from_extension_object)
            .collect()
    }

    /// Returns `true` for a keep-alive (no payloads).
    pub fn is_keep_alive(&self) -> bool {
        self.notification_data.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{Decode, Encode};

    #[test]
    fn test_enumeration_wire_values() {
        assert_eq!(MessageSecurityMode::SignAndEncrypt.value(), 3);
        assert_eq!(MonitoringMode::from_value(2), Some(MonitoringMode::Reporting));
        assert_eq!(TimestampsToReturn::default(), TimestampsToReturn::Both);

        let mut bytes = bytes::Bytes::from_static(&[9, 0, 0, 0]);
        assert!(MessageSecurityMode::decode(&mut bytes).is_err());
    }

    #[test]
    fn test_request_header_roundtrip() {
        let header = RequestHeader {
            authentication_token: NodeId::opaque(0, vec![7; 4]),
            timestamp: DateTime::<Utc>::from_timestamp(1_650_000_000, 0).unwrap(),
            request_handle: 42,
            timeout_hint: 0xffff,
            ..Default::default()
        };
        let mut bytes = header.to_bytes();
        assert_eq!(RequestHeader::decode(&mut bytes).unwrap(), header);
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_notification_payload_dispatch() {
        let change = DataChangeNotification {
            monitored_items: vec![MonitoredItemNotification {
                client_handle: 101,
                value: DataValue::new(Variant::Double(21.5)),
            }],
            diagnostic_infos: Vec::new(),
        };
        let events = EventNotificationList {
            events: vec![EventFieldList {
                client_handle: 102,
                event_fields: vec![Variant::String("overheat".into())],
            }],
        };
        let message = NotificationMessage {
            sequence_number: 1,
            publish_time: Utc::now(),
            notification_data: vec![
                NotificationData::DataChange(change.clone()).to_extension_object(),
                NotificationData::Events(events.clone()).to_extension_object(),
                ExtensionObject::from_encodable(9999, &0u32),
            ],
        };

        let decoded = message.notifications().unwrap();
        assert_eq!(decoded[0], NotificationData::DataChange(change));
        assert_eq!(decoded[1], NotificationData::Events(events));
        assert!(matches!(decoded[2], NotificationData::Unknown(_)));
        assert!(!message.is_keep_alive());
    }

    #[test]
    fn test_event_filter_select() {
        let filter = EventFilter::select(&["EventId", "Message"]);
        assert_eq!(filter.select_clauses.len(), 2);
        assert_eq!(filter.select_clauses[1].browse_path[0].name, "Message");
        let object = filter.to_extension_object();
        assert_eq!(object.encoding_id(), Some(encoding_id::EVENT_FILTER));
        assert_eq!(object.decode_body::<EventFilter>().unwrap(), filter);
    }
}
