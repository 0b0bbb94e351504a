// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The codec seam between the secure channel and the wire format.
//!
//! The secure channel only sees [`Codec`], so tests can substitute a codec
//! that fails on demand. [`BinaryCodec`] is the OPC UA binary implementation
//! and additionally offers the server direction, which test servers use.

use bytes::Bytes;

use crate::error::CodecResult;
use crate::services::{RequestEnvelope, ResponseEnvelope};
use crate::uasc::SecureMessage;

/// Turns outgoing requests into frames and incoming frames into responses.
pub trait Codec: Send + Sync + 'static {
    /// Encodes a request message into a complete frame.
    fn encode_request(&self, message: &SecureMessage<RequestEnvelope>) -> CodecResult<Bytes>;

    /// Decodes a complete frame into a response message.
    fn decode_response(&self, frame: Bytes) -> CodecResult<SecureMessage<ResponseEnvelope>>;

    /// Codec name for logging.
    fn name(&self) -> &'static str {
        "binary"
    }
}

/// OPC UA binary encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    /// Encodes a response message (server direction).
    pub fn encode_response(&self, message: &SecureMessage<ResponseEnvelope>) -> Bytes {
        message.encode_frame()
    }

    /// Decodes a request frame (server direction).
    pub fn decode_request(&self, frame: Bytes) -> CodecResult<SecureMessage<RequestEnvelope>> {
        SecureMessage::decode_frame(frame)
    }
}

impl Codec for BinaryCodec {
    fn encode_request(&self, message: &SecureMessage<RequestEnvelope>) -> CodecResult<Bytes> {
        Ok(message.encode_frame())
    }

    fn decode_response(&self, frame: Bytes) -> CodecResult<SecureMessage<ResponseEnvelope>> {
        SecureMessage::decode_frame(frame)
    }
}
