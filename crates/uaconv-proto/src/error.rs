// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Codec error types.
//!
//! Every failure to turn bytes into a typed message (or a string into a
//! [`NodeId`](crate::NodeId)) is reported as a [`CodecError`]. The client
//! crate treats all of them as protocol violations.

use thiserror::Error;

/// Result type for encoding and decoding.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding OPC UA binary data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The buffer ended before a value could be read.
    #[error("Truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the value being decoded.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// A length prefix was negative (other than -1) or larger than the input.
    #[error("Invalid length {length} for {what}")]
    InvalidLength {
        /// What was being decoded.
        what: &'static str,
        /// The offending length prefix.
        length: i64,
    },

    /// String bytes were not valid UTF-8.
    #[error("Invalid UTF-8 in string value")]
    InvalidUtf8,

    /// Unknown NodeId encoding byte.
    #[error("Invalid NodeId encoding byte 0x{0:02X}")]
    InvalidNodeIdEncoding(u8),

    /// A NodeId string could not be parsed.
    #[error("Invalid NodeId '{input}': {reason}")]
    InvalidNodeId {
        /// The input string.
        input: String,
        /// Why parsing failed.
        reason: String,
    },

    /// Unknown or unsupported Variant type id.
    #[error("Unsupported Variant type id {0}")]
    UnsupportedVariant(u8),

    /// An enumeration carried a value outside its defined range.
    #[error("Invalid value {value} for enumeration {name}")]
    InvalidEnumValue {
        /// Enumeration name.
        name: &'static str,
        /// Received value.
        value: i32,
    },

    /// A DateTime could not be represented.
    #[error("DateTime out of range: {0} ticks")]
    InvalidDateTime(i64),

    /// Unknown 3-byte message type code.
    #[error("Unknown message type {0:?}")]
    UnknownMessageType([u8; 3]),

    /// Unknown chunk type byte.
    #[error("Unknown chunk type 0x{0:02X}")]
    UnknownChunkType(u8),

    /// The frame's message type was not what the decoder expected.
    #[error("Unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessageType {
        /// Expected type code.
        expected: &'static str,
        /// Actual type code.
        actual: &'static str,
    },

    /// The header size field disagrees with the bytes available.
    #[error("Message size mismatch: header says {declared}, frame has {actual}")]
    SizeMismatch {
        /// Size from the header.
        declared: u32,
        /// Actual frame length.
        actual: usize,
    },

    /// The type tag of a service body is not in the registry.
    #[error("Unknown service type id {0}")]
    UnknownService(u32),

    /// A service type id appeared where the other direction was expected.
    #[error("Service {name} is not valid in this direction")]
    WrongDirection {
        /// Service name.
        name: &'static str,
    },

    /// Nesting of recursive structures exceeded the limit.
    #[error("Nesting depth exceeded for {0}")]
    TooDeep(&'static str),
}

impl CodecError {
    /// Creates a truncated-input error.
    pub fn truncated(needed: usize, remaining: usize) -> Self {
        Self::Truncated { needed, remaining }
    }

    /// Creates an invalid NodeId string error.
    pub fn invalid_node_id(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_message() {
        let err = CodecError::truncated(4, 1);
        assert_eq!(err.to_string(), "Truncated input: needed 4 bytes, 1 remaining");
    }

    #[test]
    fn test_invalid_node_id_message() {
        let err = CodecError::invalid_node_id("ns=x", "Invalid namespace index");
        assert!(err.to_string().contains("ns=x"));
        assert!(err.to_string().contains("namespace"));
    }
}
