// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Composite built-in types: names, texts, extension objects, diagnostics,
//! variants and data values.

use std::fmt;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::encoding::{decode_length, ByteString, Decode, Encode};
use crate::error::{CodecError, CodecResult};
use crate::node_id::{ExpandedNodeId, NodeId};
use crate::status::StatusCode;

/// Recursion limit for nested diagnostic infos and variants.
const MAX_DEPTH: usize = 16;

// =============================================================================
// QualifiedName / LocalizedText
// =============================================================================

/// A name qualified by a namespace index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Namespace index.
    pub namespace_index: u16,
    /// Name.
    pub name: String,
}

impl Encode for QualifiedName {
    fn encode(&self, buf: &mut BytesMut) {
        self.namespace_index.encode(buf);
        self.name.encode(buf);
    }
}

impl Decode for QualifiedName {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        Ok(Self {
            namespace_index: u16::decode(buf)?,
            name: String::decode(buf)?,
        })
    }
}

/// Human-readable text with an optional locale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LocalizedText {
    /// Locale id such as `en-US`; empty when absent.
    pub locale: String,
    /// Text; empty when absent.
    pub text: String,
}

impl LocalizedText {
    /// Text without a locale.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            locale: String::new(),
            text: text.into(),
        }
    }
}

impl Encode for LocalizedText {
    fn encode(&self, buf: &mut BytesMut) {
        let mut mask = 0u8;
        if !self.locale.is_empty() {
            mask |= 0x01;
        }
        if !self.text.is_empty() {
            mask |= 0x02;
        }
        mask.encode(buf);
        if mask & 0x01 != 0 {
            self.locale.encode(buf);
        }
        if mask & 0x02 != 0 {
            self.text.encode(buf);
        }
    }
}

impl Decode for LocalizedText {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        let mask = u8::decode(buf)?;
        let locale = if mask & 0x01 != 0 { String::decode(buf)? } else { String::new() };
        let text = if mask & 0x02 != 0 { String::decode(buf)? } else { String::new() };
        Ok(Self { locale, text })
    }
}

// =============================================================================
// ExtensionObject
// =============================================================================

/// Body of an [`ExtensionObject`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExtensionBody {
    /// No body.
    #[default]
    None,
    /// Binary-encoded structure.
    Binary(Bytes),
    /// XML-encoded structure.
    Xml(Bytes),
}

/// A structure wrapped with its encoding id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtensionObject {
    /// Binary encoding id of the contained structure.
    pub type_id: NodeId,
    /// Encoded body.
    pub body: ExtensionBody,
}

impl ExtensionObject {
    /// The null extension object.
    pub fn null() -> Self {
        Self::default()
    }

    /// Wraps a structure using its binary encoding id.
    pub fn from_encodable<T: Encode>(encoding_id: u32, value: &T) -> Self {
        Self {
            type_id: NodeId::numeric(0, encoding_id),
            body: ExtensionBody::Binary(value.to_bytes()),
        }
    }

    /// Returns `true` if no body is present.
    pub fn is_null(&self) -> bool {
        matches!(self.body, ExtensionBody::None)
    }

    /// Numeric encoding id in namespace 0, if that is what the type id is.
    pub fn encoding_id(&self) -> Option<u32> {
        if self.type_id.namespace_index == 0 {
            self.type_id.as_numeric()
        } else {
            None
        }
    }

    /// Decodes the binary body as `T`.
    pub fn decode_body<T: Decode>(&self) -> CodecResult<T> {
        match &self.body {
            ExtensionBody::Binary(bytes) => T::decode(&mut bytes.clone()),
            _ => T::decode(&mut Bytes::new()),
        }
    }
}

impl Encode for ExtensionObject {
    fn encode(&self, buf: &mut BytesMut) {
        self.type_id.encode(buf);
        let (tag, body): (u8, &[u8]) = match &self.body {
            ExtensionBody::None => (0, &[][..]),
            ExtensionBody::Binary(body) => (1, body.as_ref()),
            ExtensionBody::Xml(body) => (2, body.as_ref()),
        };
        tag.encode(buf);
        if tag != 0 {
            (body.len() as i32).encode(buf);
            buf.extend_from_slice(body);
        }
    }
}

impl Decode for ExtensionObject {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        let type_id = NodeId::decode(buf)?;
        let body = match u8::decode(buf)? {
            0 => ExtensionBody::None,
            tag => {
                let len = decode_length(buf, "ExtensionObject")?.unwrap_or(0);
                let raw = buf.split_to(len);
                if tag == 2 {
                    ExtensionBody::Xml(raw)
                } else {
                    ExtensionBody::Binary(raw)
                }
            }
        };
        Ok(Self { type_id, body })
    }
}

// =============================================================================
// DiagnosticInfo
// =============================================================================

/// Vendor diagnostics attached to results.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiagnosticInfo {
    /// Index into the string table for the symbolic id.
    pub symbolic_id: Option<i32>,
    /// Index into the string table for the namespace URI.
    pub namespace_uri: Option<i32>,
    /// Index into the string table for the locale.
    pub locale: Option<i32>,
    /// Index into the string table for the localized text.
    pub localized_text: Option<i32>,
    /// Free-form vendor text.
    pub additional_info: Option<String>,
    /// Status code of an inner operation.
    pub inner_status_code: Option<StatusCode>,
    /// Diagnostics of an inner operation.
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

impl DiagnosticInfo {
    fn decode_depth(buf: &mut Bytes, depth: usize) -> CodecResult<Self> {
        if depth > MAX_DEPTH {
            return Err(CodecError::TooDeep("DiagnosticInfo"));
        }
        let mask = u8::decode(buf)?;
        let mut info = Self::default();
        if mask & 0x01 != 0 {
            info.symbolic_id = Some(i32::decode(buf)?);
        }
        if mask & 0x02 != 0 {
            info.namespace_uri = Some(i32::decode(buf)?);
        }
        if mask & 0x08 != 0 {
            info.locale = Some(i32::decode(buf)?);
        }
        if mask & 0x04 != 0 {
            info.localized_text = Some(i32::decode(buf)?);
        }
        if mask & 0x10 != 0 {
            info.additional_info = Some(String::decode(buf)?);
        }
        if mask & 0x20 != 0 {
            info.inner_status_code = Some(StatusCode::decode(buf)?);
        }
        if mask & 0x40 != 0 {
            info.inner_diagnostic_info = Some(Box::new(Self::decode_depth(buf, depth + 1)?));
        }
        Ok(info)
    }
}

impl Encode for DiagnosticInfo {
    fn encode(&self, buf: &mut BytesMut) {
        let mut mask = 0u8;
        if self.symbolic_id.is_some() {
            mask |= 0x01;
        }
        if self.namespace_uri.is_some() {
            mask |= 0x02;
        }
        if self.localized_text.is_some() {
            mask |= 0x04;
        }
        if self.locale.is_some() {
            mask |= 0x08;
        }
        if self.additional_info.is_some() {
            mask |= 0x10;
        }
        if self.inner_status_code.is_some() {
            mask |= 0x20;
        }
        if self.inner_diagnostic_info.is_some() {
            mask |= 0x40;
        }
        mask.encode(buf);
        if let Some(v) = self.symbolic_id {
            v.encode(buf);
        }
        if let Some(v) = self.namespace_uri {
            v.encode(buf);
        }
        if let Some(v) = self.locale {
            v.encode(buf);
        }
        if let Some(v) = self.localized_text {
            v.encode(buf);
        }
        if let Some(v) = &self.additional_info {
            v.encode(buf);
        }
        if let Some(v) = self.inner_status_code {
            v.encode(buf);
        }
        if let Some(v) = &self.inner_diagnostic_info {
            v.encode(buf);
        }
    }
}

impl Decode for DiagnosticInfo {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        Self::decode_depth(buf, 0)
    }
}

// =============================================================================
// Variant
// =============================================================================

/// A value of any built-in type.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    /// No value.
    #[default]
    Empty,
    /// Boolean.
    Boolean(bool),
    /// Signed byte.
    SByte(i8),
    /// Byte.
    Byte(u8),
    /// 16-bit signed integer.
    Int16(i16),
    /// 16-bit unsigned integer.
    UInt16(u16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 32-bit unsigned integer.
    UInt32(u32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit unsigned integer.
    UInt64(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// String.
    String(String),
    /// Timestamp.
    DateTime(DateTime<Utc>),
    /// GUID.
    Guid(Uuid),
    /// Byte string.
    ByteString(ByteString),
    /// XML fragment.
    XmlElement(String),
    /// Node id.
    NodeId(Box<NodeId>),
    /// Node id with namespace URI and server index.
    ExpandedNodeId(Box<ExpandedNodeId>),
    /// Status code.
    StatusCode(StatusCode),
    /// Qualified name.
    QualifiedName(Box<QualifiedName>),
    /// Localized text.
    LocalizedText(Box<LocalizedText>),
    /// Extension object.
    ExtensionObject(Box<ExtensionObject>),
    /// Data value.
    DataValue(Box<DataValue>),
    /// A nested variant; only valid as an array element.
    Variant(Box<Variant>),
    /// Diagnostic info.
    DiagnosticInfo(Box<DiagnosticInfo>),
    /// One-dimensional (or flattened multi-dimensional) array.
    Array(Box<VariantArray>),
}

/// Array payload of a [`Variant`].
#[derive(Debug, Clone, PartialEq)]
pub struct VariantArray {
    /// Built-in type id of every element.
    pub element_type: u8,
    /// Elements, all of `element_type`.
    pub values: Vec<Variant>,
    /// Dimensions for multi-dimensional arrays.
    pub dimensions: Option<Vec<i32>>,
}

impl Variant {
    /// Built-in type id (0 for empty).
    pub fn type_id(&self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Boolean(_) => 1,
            Self::SByte(_) => 2,
            Self::Byte(_) => 3,
            Self::Int16(_) => 4,
            Self::UInt16(_) => 5,
            Self::Int32(_) => 6,
            Self::UInt32(_) => 7,
            Self::Int64(_) => 8,
            Self::UInt64(_) => 9,
            Self::Float(_) => 10,
            Self::Double(_) => 11,
            Self::String(_) => 12,
            Self::DateTime(_) => 13,
            Self::Guid(_) => 14,
            Self::ByteString(_) => 15,
            Self::XmlElement(_) => 16,
            Self::NodeId(_) => 17,
            Self::ExpandedNodeId(_) => 18,
            Self::StatusCode(_) => 19,
            Self::QualifiedName(_) => 20,
            Self::LocalizedText(_) => 21,
            Self::ExtensionObject(_) => 22,
            Self::DataValue(_) => 23,
            Self::Variant(_) => 24,
            Self::DiagnosticInfo(_) => 25,
            Self::Array(array) => array.element_type,
        }
    }

    /// Name of the contained type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Empty => "Empty",
            Self::Boolean(_) => "Boolean",
            Self::SByte(_) => "SByte",
            Self::Byte(_) => "Byte",
            Self::Int16(_) => "Int16",
            Self::UInt16(_) => "UInt16",
            Self::Int32(_) => "Int32",
            Self::UInt32(_) => "UInt32",
            Self::Int64(_) => "Int64",
            Self::UInt64(_) => "UInt64",
            Self::Float(_) => "Float",
            Self::Double(_) => "Double",
            Self::String(_) => "String",
            Self::DateTime(_) => "DateTime",
            Self::Guid(_) => "Guid",
            Self::ByteString(_) => "ByteString",
            Self::XmlElement(_) => "XmlElement",
            Self::NodeId(_) => "NodeId",
            Self::ExpandedNodeId(_) => "ExpandedNodeId",
            Self::StatusCode(_) => "StatusCode",
            Self::QualifiedName(_) => "QualifiedName",
            Self::LocalizedText(_) => "LocalizedText",
            Self::ExtensionObject(_) => "ExtensionObject",
            Self::DataValue(_) => "DataValue",
            Self::Variant(_) => "Variant",
            Self::DiagnosticInfo(_) => "DiagnosticInfo",
            Self::Array(_) => "Array",
        }
    }

    /// Numeric value as `f64`, if the variant is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::SByte(v) => Some(f64::from(v)),
            Self::Byte(v) => Some(f64::from(v)),
            Self::Int16(v) => Some(f64::from(v)),
            Self::UInt16(v) => Some(f64::from(v)),
            Self::Int32(v) => Some(f64::from(v)),
            Self::UInt32(v) => Some(f64::from(v)),
            Self::Int64(v) => Some(v as f64),
            Self::UInt64(v) => Some(v as f64),
            Self::Float(v) => Some(f64::from(v)),
            Self::Double(v) => Some(v),
            _ => None,
        }
    }

    fn encode_scalar(&self, buf: &mut BytesMut) {
        match self {
            Self::Empty | Self::Array(_) => {}
            Self::Boolean(v) => v.encode(buf),
            Self::SByte(v) => v.encode(buf),
            Self::Byte(v) => v.encode(buf),
            Self::Int16(v) => v.encode(buf),
            Self::UInt16(v) => v.encode(buf),
            Self::Int32(v) => v.encode(buf),
            Self::UInt32(v) => v.encode(buf),
            Self::Int64(v) => v.encode(buf),
            Self::UInt64(v) => v.encode(buf),
            Self::Float(v) => v.encode(buf),
            Self::Double(v) => v.encode(buf),
            Self::String(v) => v.encode(buf),
            Self::DateTime(v) => v.encode(buf),
            Self::Guid(v) => v.encode(buf),
            Self::ByteString(v) => v.encode(buf),
            Self::XmlElement(v) => v.encode(buf),
            Self::NodeId(v) => v.encode(buf),
            Self::ExpandedNodeId(v) => v.encode(buf),
            Self::StatusCode(v) => v.encode(buf),
            Self::QualifiedName(v) => v.encode(buf),
            Self::LocalizedText(v) => v.encode(buf),
            Self::ExtensionObject(v) => v.encode(buf),
            Self::DataValue(v) => v.encode(buf),
            // Nested variants carry their own type byte.
            Self::Variant(v) => v.encode(buf),
            Self::DiagnosticInfo(v) => v.encode(buf),
        }
    }

    fn decode_depth(buf: &mut Bytes, depth: usize) -> CodecResult<Self> {
        if depth > MAX_DEPTH {
            return Err(CodecError::TooDeep("Variant"));
        }
        let mask = u8::decode(buf)?;
        let type_id = mask & 0x3f;
        if mask & 0x80 == 0 {
            return Self::decode_scalar(type_id, buf, depth);
        }
        let count = decode_length(buf, "Variant array")?.unwrap_or(0);
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(Self::decode_scalar(type_id, buf, depth)?);
        }
        let dimensions = if mask & 0x40 != 0 {
            Some(Vec::<i32>::decode(buf)?)
        } else {
            None
        };
        Ok(Self::Array(Box::new(VariantArray {
            element_type: type_id,
            values,
            dimensions,
        })))
    }

    fn decode_scalar(type_id: u8, buf: &mut Bytes, depth: usize) -> CodecResult<Self> {
        Ok(match type_id {
            0 => Self::Empty,
            1 => Self::Boolean(bool::decode(buf)?),
            2 => Self::SByte(i8::decode(buf)?),
            3 => Self::Byte(u8::decode(buf)?),
            4 => Self::Int16(i16::decode(buf)?),
            5 => Self::UInt16(u16::decode(buf)?),
            6 => Self::Int32(i32::decode(buf)?),
            7 => Self::UInt32(u32::decode(buf)?),
            8 => Self::Int64(i64::decode(buf)?),
            9 => Self::UInt64(u64::decode(buf)?),
            10 => Self::Float(f32::decode(buf)?),
            11 => Self::Double(f64::decode(buf)?),
            12 => Self::String(String::decode(buf)?),
            13 => Self::DateTime(DateTime::<Utc>::decode(buf)?),
            14 => Self::Guid(Uuid::decode(buf)?),
            15 => Self::ByteString(ByteString::decode(buf)?),
            16 => Self::XmlElement(String::decode(buf)?),
            17 => Self::NodeId(Box::new(NodeId::decode(buf)?)),
            18 => Self::ExpandedNodeId(Box::new(ExpandedNodeId::decode(buf)?)),
            19 => Self::StatusCode(StatusCode::decode(buf)?),
            20 => Self::QualifiedName(Box::new(QualifiedName::decode(buf)?)),
            21 => Self::LocalizedText(Box::new(LocalizedText::decode(buf)?)),
            22 => Self::ExtensionObject(Box::new(ExtensionObject::decode(buf)?)),
            23 => Self::DataValue(Box::new(DataValue::decode_depth(buf, depth + 1)?)),
            24 => Self::Variant(Box::new(Self::decode_depth(buf, depth + 1)?)),
            25 => Self::DiagnosticInfo(Box::new(DiagnosticInfo::decode(buf)?)),
            other => return Err(CodecError::UnsupportedVariant(other)),
        })
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::SByte(v) => write!(f, "{v}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Guid(v) => write!(f, "{v}"),
            Self::ByteString(v) => write!(f, "{v:?}"),
            Self::XmlElement(v) => write!(f, "{v}"),
            Self::NodeId(v) => write!(f, "{v}"),
            Self::ExpandedNodeId(v) => write!(f, "{}", v.node_id),
            Self::StatusCode(v) => write!(f, "{v}"),
            Self::QualifiedName(v) => write!(f, "{}:{}", v.namespace_index, v.name),
            Self::LocalizedText(v) => write!(f, "{}", v.text),
            Self::ExtensionObject(v) => write!(f, "ExtensionObject({})", v.type_id),
            Self::DataValue(v) => match &v.value {
                Some(value) => write!(f, "{value} ({})", v.status()),
                None => write!(f, "null ({})", v.status()),
            },
            Self::Variant(v) => write!(f, "{v}"),
            Self::DiagnosticInfo(_) => write!(f, "DiagnosticInfo"),
            Self::Array(array) => {
                write!(f, "[")?;
                for (i, value) in array.values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl Encode for Variant {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Array(array) => {
                let mut mask = array.element_type | 0x80;
                if array.dimensions.is_some() {
                    mask |= 0x40;
                }
                mask.encode(buf);
                (array.values.len() as i32).encode(buf);
                for value in &array.values {
                    value.encode_scalar(buf);
                }
                if let Some(dimensions) = &array.dimensions {
                    dimensions.encode(buf);
                }
            }
            scalar => {
                scalar.type_id().encode(buf);
                scalar.encode_scalar(buf);
            }
        }
    }
}

impl Decode for Variant {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        Self::decode_depth(buf, 0)
    }
}

// =============================================================================
// DataValue
// =============================================================================

/// A value with status and timestamps.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    /// The value.
    pub value: Option<Variant>,
    /// Status of the value; absent means Good.
    pub status: Option<StatusCode>,
    /// Timestamp from the data source.
    pub source_timestamp: Option<DateTime<Utc>>,
    /// Sub-100ns part of the source timestamp.
    pub source_picoseconds: Option<u16>,
    /// Timestamp from the server.
    pub server_timestamp: Option<DateTime<Utc>>,
    /// Sub-100ns part of the server timestamp.
    pub server_picoseconds: Option<u16>,
}

impl DataValue {
    /// A Good value without timestamps.
    pub fn new(value: Variant) -> Self {
        Self {
            value: Some(value),
            ..Default::default()
        }
    }

    /// The value's status, Good when absent.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::GOOD)
    }
}

impl Encode for DataValue {
    fn encode(&self, buf: &mut BytesMut) {
        let mut mask = 0u8;
        if self.value.is_some() {
            mask |= 0x01;
        }
        if self.status.is_some() {
            mask |= 0x02;
        }
        if self.source_timestamp.is_some() {
            mask |= 0x04;
        }
        if self.server_timestamp.is_some() {
            mask |= 0x08;
        }
        if self.source_picoseconds.is_some() {
            mask |= 0x10;
        }
        if self.server_picoseconds.is_some() {
            mask |= 0x20;
        }
        mask.encode(buf);
        if let Some(v) = &self.value {
            v.encode(buf);
        }
        if let Some(v) = self.status {
            v.encode(buf);
        }
        if let Some(v) = &self.source_timestamp {
            v.encode(buf);
        }
        if let Some(v) = self.source_picoseconds {
            v.encode(buf);
        }
        if let Some(v) = &self.server_timestamp {
            v.encode(buf);
        }
        if let Some(v) = self.server_picoseconds {
            v.encode(buf);
        }
    }
}

impl DataValue {
    fn decode_depth(buf: &mut Bytes, depth: usize) -> CodecResult<Self> {
        let mask = u8::decode(buf)?;
        let mut value = Self::default();
        if mask & 0x01 != 0 {
            value.value = Some(Variant::decode_depth(buf, depth)?);
        }
        if mask & 0x02 != 0 {
            value.status = Some(StatusCode::decode(buf)?);
        }
        if mask & 0x04 != 0 {
            value.source_timestamp = Some(DateTime::<Utc>::decode(buf)?);
        }
        if mask & 0x10 != 0 {
            value.source_picoseconds = Some(u16::decode(buf)?);
        }
        if mask & 0x08 != 0 {
            value.server_timestamp = Some(DateTime::<Utc>::decode(buf)?);
        }
        if mask & 0x20 != 0 {
            value.server_picoseconds = Some(u16::decode(buf)?);
        }
        Ok(value)
    }
}

impl Decode for DataValue {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        Self::decode_depth(buf, 0)
    }
}

// =============================================================================
// Tests
// =============================================================================
