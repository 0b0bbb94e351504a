// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Node identifiers and their binary forms.
//!
//! # String syntax
//!
//! ```text
//! ns=<namespace>;i=<u32>      numeric
//! ns=<namespace>;s=<text>     string
//! ns=<namespace>;g=<guid>     guid
//! ns=<namespace>;b=<base64>   opaque
//! ```
//!
//! The `ns=` part may be omitted for namespace 0. [`NodeId`]'s `Display`
//! output is canonical (namespace 0 is never printed), so it is safe to use
//! as a map key after parsing.
//!
//! # Binary encodings
//!
//! | byte | form      | body                         |
//! |------|-----------|------------------------------|
//! | 0x00 | two-byte  | u8 id                        |
//! | 0x01 | four-byte | u8 namespace, u16 id         |
//! | 0x02 | numeric   | u16 namespace, u32 id        |
//! | 0x03 | string    | u16 namespace, String        |
//! | 0x04 | guid      | u16 namespace, Guid          |
//! | 0x05 | opaque    | u16 namespace, ByteString    |
//!
//! [`ExpandedNodeId`] adds the `0x80` (namespace URI) and `0x40` (server
//! index) flags to the encoding byte.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::encoding::{Decode, Encode, ByteString};
use crate::error::{CodecError, CodecResult};

const TWO_BYTE: u8 = 0x00;
const FOUR_BYTE: u8 = 0x01;
const NUMERIC: u8 = 0x02;
const STRING: u8 = 0x03;
const GUID: u8 = 0x04;
const OPAQUE: u8 = 0x05;
const NAMESPACE_URI_FLAG: u8 = 0x80;
const SERVER_INDEX_FLAG: u8 = 0x40;

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA node identifier: a namespace index plus an identifier.
///
/// ```
/// use uaconv_proto::NodeId;
///
/// let node: NodeId = "ns=2;s=Line1.Temperature".parse().unwrap();
/// assert_eq!(node, NodeId::string(2, "Line1.Temperature"));
/// assert_eq!(node.to_string(), "ns=2;s=Line1.Temperature");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 is the OPC UA namespace).
    pub namespace_index: u16,

    /// The identifier within the namespace.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// Creates a numeric node id.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node id.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Creates a GUID node id.
    #[inline]
    pub fn guid(namespace_index: u16, value: Uuid) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Guid(value),
        }
    }

    /// Creates an opaque node id.
    #[inline]
    pub fn opaque(namespace_index: u16, value: Vec<u8>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Opaque(value),
        }
    }

    /// The null node id (`i=0`).
    #[inline]
    pub const fn null() -> Self {
        Self {
            namespace_index: 0,
            identifier: NodeIdentifier::Numeric(0),
        }
    }

    /// Returns `true` for `i=0`.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && matches!(self.identifier, NodeIdentifier::Numeric(0))
    }

    /// Returns the numeric identifier, if any.
    #[inline]
    pub fn as_numeric(&self) -> Option<u32> {
        match self.identifier {
            NodeIdentifier::Numeric(v) => Some(v),
            _ => None,
        }
    }

    /// Parses each string, stopping at the first invalid one.
    pub fn parse_all<S: AsRef<str>>(inputs: &[S]) -> CodecResult<Vec<NodeId>> {
        inputs.iter().map(|s| s.as_ref().parse()).collect()
    }

    /// Encodes the identifier body after the given encoding byte flags.
    fn encode_with_flags(&self, flags: u8, buf: &mut BytesMut) {
        match &self.identifier {
            NodeIdentifier::Numeric(id) if self.namespace_index == 0 && *id <= 0xff => {
                (TWO_BYTE | flags).encode(buf);
                (*id as u8).encode(buf);
            }
            NodeIdentifier::Numeric(id) if self.namespace_index <= 0xff && *id <= 0xffff => {
                (FOUR_BYTE | flags).encode(buf);
                (self.namespace_index as u8).encode(buf);
                (*id as u16).encode(buf);
            }
            NodeIdentifier::Numeric(id) => {
                (NUMERIC | flags).encode(buf);
                self.namespace_index.encode(buf);
                id.encode(buf);
            }
            NodeIdentifier::String(s) => {
                (STRING | flags).encode(buf);
                self.namespace_index.encode(buf);
                s.encode(buf);
            }
            NodeIdentifier::Guid(g) => {
                (GUID | flags).encode(buf);
                self.namespace_index.encode(buf);
                g.encode(buf);
            }
            NodeIdentifier::Opaque(b) => {
                (OPAQUE | flags).encode(buf);
                self.namespace_index.encode(buf);
                ByteString::from(b.as_slice()).encode(buf);
            }
        }
    }

    /// Decodes the body for an encoding byte with the flag bits removed.
    fn decode_body(encoding: u8, buf: &mut Bytes) -> CodecResult<Self> {
        match encoding {
            TWO_BYTE => Ok(Self::numeric(0, u32::from(u8::decode(buf)?))),
            FOUR_BYTE => {
                let ns = u8::decode(buf)?;
                let id = u16::decode(buf)?;
                Ok(Self::numeric(u16::from(ns), u32::from(id)))
            }
            NUMERIC => {
                let ns = u16::decode(buf)?;
                Ok(Self::numeric(ns, u32::decode(buf)?))
            }
            STRING => {
                let ns = u16::decode(buf)?;
                Ok(Self::string(ns, String::decode(buf)?))
            }
            GUID => {
                let ns = u16::decode(buf)?;
                Ok(Self::guid(ns, Uuid::decode(buf)?))
            }
            OPAQUE => {
                let ns = u16::decode(buf)?;
                Ok(Self::opaque(ns, ByteString::decode(buf)?.0))
            }
            other => Err(CodecError::InvalidNodeIdEncoding(other)),
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_index != 0 {
            write!(f, "ns={};", self.namespace_index)?;
        }
        write!(f, "{}", self.identifier)
    }
}

impl FromStr for NodeId {
    type Err = CodecError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let s = input.trim();

        let (namespace_index, rest) = match s.strip_prefix("ns=") {
            Some(tail) => {
                let (ns, id) = tail
                    .split_once(';')
                    .ok_or_else(|| CodecError::invalid_node_id(input, "Missing identifier after namespace"))?;
                let ns: u16 = ns
                    .parse()
                    .map_err(|_| CodecError::invalid_node_id(input, "Invalid namespace index"))?;
                (ns, id)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = rest.strip_prefix("i=") {
            NodeIdentifier::Numeric(
                id.parse()
                    .map_err(|_| CodecError::invalid_node_id(input, "Invalid numeric identifier"))?,
            )
        } else if let Some(id) = rest.strip_prefix("s=") {
            NodeIdentifier::String(id.to_string())
        } else if let Some(id) = rest.strip_prefix("g=") {
            NodeIdentifier::Guid(
                Uuid::parse_str(id)
                    .map_err(|e| CodecError::invalid_node_id(input, format!("Invalid GUID: {e}")))?,
            )
        } else if let Some(id) = rest.strip_prefix("b=") {
            NodeIdentifier::Opaque(
                BASE64
                    .decode(id)
                    .map_err(|e| CodecError::invalid_node_id(input, format!("Invalid base64: {e}")))?,
            )
        } else {
            return Err(CodecError::invalid_node_id(
                input,
                "Unknown identifier type. Expected i=, s=, g=, or b=",
            ));
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

impl Encode for NodeId {
    fn encode(&self, buf: &mut BytesMut) {
        self.encode_with_flags(0, buf);
    }
}

impl Decode for NodeId {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        let encoding = u8::decode(buf)?;
        Self::decode_body(encoding, buf)
    }
}

// =============================================================================
// NodeIdentifier
// =============================================================================

/// The identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),
    /// String identifier.
    String(String),
    /// GUID identifier.
    Guid(Uuid),
    /// Opaque byte identifier.
    Opaque(Vec<u8>),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={}", v),
            Self::String(v) => write!(f, "s={}", v),
            Self::Guid(v) => write!(f, "g={}", v),
            Self::Opaque(v) => write!(f, "b={}", BASE64.encode(v)),
        }
    }
}

// =============================================================================
// ExpandedNodeId
// =============================================================================

/// A NodeId that may carry a namespace URI and server index.
///
/// Service bodies are prefixed with one of these as their type tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ExpandedNodeId {
    /// The local node id.
    pub node_id: NodeId,
    /// Namespace URI, when the namespace is given by URI instead of index.
    pub namespace_uri: Option<String>,
    /// Server index (0 is the local server).
    pub server_index: u32,
}

impl ExpandedNodeId {
    /// Wraps a local numeric id in namespace 0.
    pub fn numeric(value: u32) -> Self {
        Self::from(NodeId::numeric(0, value))
    }
}

impl From<NodeId> for ExpandedNodeId {
    fn from(node_id: NodeId) -> Self {
        Self {
            node_id,
            namespace_uri: None,
            server_index: 0,
        }
    }
}

impl Encode for ExpandedNodeId {
    fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0;
        if self.namespace_uri.is_some() {
            flags |= NAMESPACE_URI_FLAG;
        }
        if self.server_index != 0 {
            flags |= SERVER_INDEX_FLAG;
        }
        self.node_id.encode_with_flags(flags, buf);
        if let Some(uri) = &self.namespace_uri {
            uri.encode(buf);
        }
        if self.server_index != 0 {
            self.server_index.encode(buf);
        }
    }
}

impl Decode for ExpandedNodeId {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        let encoding = u8::decode(buf)?;
        let node_id = NodeId::decode_body(encoding & 0x3f, buf)?;
        let namespace_uri = if encoding & NAMESPACE_URI_FLAG != 0 {
            Some(String::decode(buf)?)
        } else {
            None
        };
        let server_index = if encoding & SERVER_INDEX_FLAG != 0 {
            u32::decode(buf)?
        } else {
            0
        };
        Ok(Self {
            node_id,
            namespace_uri,
            server_index,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
