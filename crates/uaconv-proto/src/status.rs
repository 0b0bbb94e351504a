// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA status codes.

use std::fmt;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::encoding::{Decode, Encode};
use crate::error::CodecResult;

/// A 32-bit OPC UA status code.
///
/// The top two bits carry the severity: `00` good, `01` uncertain, `10` bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

macro_rules! status_codes {
    ($( $(#[$meta:meta])* $name:ident = $value:literal ),+ $(,)?) => {
        impl StatusCode {
            $( $(#[$meta])* pub const $name: StatusCode = StatusCode($value); )+

            /// Returns the symbolic name, or `None` for codes not in the table.
            pub fn symbol(self) -> Option<&'static str> {
                match self.0 & 0xffff_0000 {
                    $( $value => Some(stringify!($name)), )+
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    /// Success.
    GOOD = 0x0000_0000,
    /// Unspecified failure.
    BAD_UNEXPECTED_ERROR = 0x8001_0000,
    /// Internal error.
    BAD_INTERNAL_ERROR = 0x8002_0000,
    /// Out of memory.
    BAD_OUT_OF_MEMORY = 0x8003_0000,
    /// Resource unavailable.
    BAD_RESOURCE_UNAVAILABLE = 0x8004_0000,
    /// Low-level communication failure.
    BAD_COMMUNICATION_ERROR = 0x8005_0000,
    /// Encoding failed.
    BAD_ENCODING_ERROR = 0x8006_0000,
    /// Decoding failed.
    BAD_DECODING_ERROR = 0x8007_0000,
    /// Encoding limits exceeded.
    BAD_ENCODING_LIMITS_EXCEEDED = 0x8008_0000,
    /// Unknown response.
    BAD_UNKNOWN_RESPONSE = 0x8009_0000,
    /// Operation timed out.
    BAD_TIMEOUT = 0x800a_0000,
    /// Service not supported.
    BAD_SERVICE_UNSUPPORTED = 0x800b_0000,
    /// Server shutting down.
    BAD_SHUTDOWN = 0x800c_0000,
    /// Server not connected.
    BAD_SERVER_NOT_CONNECTED = 0x800d_0000,
    /// Server halted.
    BAD_SERVER_HALTED = 0x800e_0000,
    /// Nothing to do.
    BAD_NOTHING_TO_DO = 0x800f_0000,
    /// Too many operations.
    BAD_TOO_MANY_OPERATIONS = 0x8010_0000,
    /// Certificate invalid.
    BAD_CERTIFICATE_INVALID = 0x8012_0000,
    /// Security checks failed.
    BAD_SECURITY_CHECKS_FAILED = 0x8013_0000,
    /// Certificate untrusted.
    BAD_CERTIFICATE_UNTRUSTED = 0x801a_0000,
    /// User access denied.
    BAD_USER_ACCESS_DENIED = 0x801f_0000,
    /// Identity token invalid.
    BAD_IDENTITY_TOKEN_INVALID = 0x8020_0000,
    /// Identity token rejected.
    BAD_IDENTITY_TOKEN_REJECTED = 0x8021_0000,
    /// Secure channel id invalid.
    BAD_SECURE_CHANNEL_ID_INVALID = 0x8022_0000,
    /// Invalid timestamp.
    BAD_INVALID_TIMESTAMP = 0x8023_0000,
    /// Nonce invalid.
    BAD_NONCE_INVALID = 0x8024_0000,
    /// Session id invalid.
    BAD_SESSION_ID_INVALID = 0x8025_0000,
    /// Session closed.
    BAD_SESSION_CLOSED = 0x8026_0000,
    /// Session not activated.
    BAD_SESSION_NOT_ACTIVATED = 0x8027_0000,
    /// Subscription id invalid.
    BAD_SUBSCRIPTION_ID_INVALID = 0x8028_0000,
    /// Request header invalid.
    BAD_REQUEST_HEADER_INVALID = 0x802a_0000,
    /// Request cancelled by client.
    BAD_REQUEST_CANCELLED_BY_CLIENT = 0x802c_0000,
    /// No communication with the data source.
    BAD_NO_COMMUNICATION = 0x8031_0000,
    /// Waiting for initial data.
    BAD_WAITING_FOR_INITIAL_DATA = 0x8032_0000,
    /// NodeId syntax invalid.
    BAD_NODE_ID_INVALID = 0x8033_0000,
    /// NodeId unknown.
    BAD_NODE_ID_UNKNOWN = 0x8034_0000,
    /// Attribute id invalid.
    BAD_ATTRIBUTE_ID_INVALID = 0x8035_0000,
    /// Not readable.
    BAD_NOT_READABLE = 0x803a_0000,
    /// Not writable.
    BAD_NOT_WRITABLE = 0x803b_0000,
    /// Out of range.
    BAD_OUT_OF_RANGE = 0x803c_0000,
    /// Not supported.
    BAD_NOT_SUPPORTED = 0x803d_0000,
    /// Not found.
    BAD_NOT_FOUND = 0x803e_0000,
    /// Monitoring mode invalid.
    BAD_MONITORING_MODE_INVALID = 0x8041_0000,
    /// Monitored item id invalid.
    BAD_MONITORED_ITEM_ID_INVALID = 0x8042_0000,
    /// Monitored item filter invalid.
    BAD_MONITORED_ITEM_FILTER_INVALID = 0x8043_0000,
    /// Too many subscriptions.
    BAD_TOO_MANY_SUBSCRIPTIONS = 0x8077_0000,
    /// Too many publish requests.
    BAD_TOO_MANY_PUBLISH_REQUESTS = 0x8078_0000,
    /// No subscription.
    BAD_NO_SUBSCRIPTION = 0x8079_0000,
    /// Sequence number unknown.
    BAD_SEQUENCE_NUMBER_UNKNOWN = 0x807a_0000,
    /// TCP server too busy.
    BAD_TCP_SERVER_TOO_BUSY = 0x807d_0000,
    /// TCP message type invalid.
    BAD_TCP_MESSAGE_TYPE_INVALID = 0x807e_0000,
    /// TCP secure channel unknown.
    BAD_TCP_SECURE_CHANNEL_UNKNOWN = 0x807f_0000,
    /// TCP message too large.
    BAD_TCP_MESSAGE_TOO_LARGE = 0x8080_0000,
    /// TCP not enough resources.
    BAD_TCP_NOT_ENOUGH_RESOURCES = 0x8081_0000,
    /// TCP internal error.
    BAD_TCP_INTERNAL_ERROR = 0x8082_0000,
    /// TCP endpoint URL invalid.
    BAD_TCP_ENDPOINT_URL_INVALID = 0x8083_0000,
    /// Request interrupted.
    BAD_REQUEST_INTERRUPTED = 0x8084_0000,
    /// Request timed out.
    BAD_REQUEST_TIMEOUT = 0x8085_0000,
    /// Secure channel closed.
    BAD_SECURE_CHANNEL_CLOSED = 0x8086_0000,
    /// Secure channel token unknown.
    BAD_SECURE_CHANNEL_TOKEN_UNKNOWN = 0x8087_0000,
    /// Sequence number invalid.
    BAD_SEQUENCE_NUMBER_INVALID = 0x8088_0000,
    /// Protocol version unsupported.
    BAD_PROTOCOL_VERSION_UNSUPPORTED = 0x80be_0000,
    /// Too many monitored items.
    BAD_TOO_MANY_MONITORED_ITEMS = 0x80db_0000,
}

impl StatusCode {
    /// Returns `true` for good codes (severity bits `00`).
    #[inline]
    pub const fn is_good(self) -> bool {
        self.0 & 0xc000_0000 == 0
    }

    /// Returns `true` for uncertain codes (severity bits `01`).
    #[inline]
    pub const fn is_uncertain(self) -> bool {
        self.0 & 0xc000_0000 == 0x4000_0000
    }

    /// Returns `true` for bad codes (severity bit `1x`).
    #[inline]
    pub const fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns the symbolic name or a generic severity name.
    pub fn name(self) -> &'static str {
        self.symbol().unwrap_or(if self.is_good() {
            "GOOD"
        } else if self.is_uncertain() {
            "UNCERTAIN"
        } else {
            "BAD"
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.0)
    }
}

impl From<u32> for StatusCode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Encode for StatusCode {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
    }
}

impl Decode for StatusCode {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        Ok(Self(u32::decode(buf)?))
    }
}
