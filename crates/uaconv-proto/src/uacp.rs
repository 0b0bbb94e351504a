// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! UA Connection Protocol (UACP) framing.
//!
//! Every frame on the wire starts with the same 8-byte header:
//!
//! ```text
//! ┌──────────────┬────────────┬──────────────────────┐
//! │ type (3 B)   │ chunk (1 B)│ total size (u32 LE)  │
//! │ HEL ACK ERR  │ F C A      │ header + payload     │
//! │ MSG OPN CLO  │            │                      │
//! └──────────────┴────────────┴──────────────────────┘
//! ```
//!
//! A connection opens with `HEL` from the client, answered by `ACK` (or
//! `ERR`). After that, secure conversation frames (`OPN`, `MSG`, `CLO`)
//! follow; see [`crate::uasc`].

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::encoding::{structure, Decode, Encode};
use crate::error::{CodecError, CodecResult};
use crate::status::StatusCode;

// =============================================================================
// MessageType / ChunkType
// =============================================================================

/// The 3-byte message type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// `HEL`: client hello.
    Hello,
    /// `ACK`: server acknowledge.
    Acknowledge,
    /// `ERR`: fatal error, the connection closes afterwards.
    Error,
    /// `RHE`: reverse hello.
    ReverseHello,
    /// `MSG`: secure conversation service message.
    Message,
    /// `OPN`: open secure channel.
    OpenSecureChannel,
    /// `CLO`: close secure channel.
    CloseSecureChannel,
}

impl MessageType {
    /// The wire code.
    pub const fn code(self) -> &'static [u8; 3] {
        match self {
            Self::Hello => b"HEL",
            Self::Acknowledge => b"ACK",
            Self::Error => b"ERR",
            Self::ReverseHello => b"RHE",
            Self::Message => b"MSG",
            Self::OpenSecureChannel => b"OPN",
            Self::CloseSecureChannel => b"CLO",
        }
    }

    /// The wire code as text.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "HEL",
            Self::Acknowledge => "ACK",
            Self::Error => "ERR",
            Self::ReverseHello => "RHE",
            Self::Message => "MSG",
            Self::OpenSecureChannel => "OPN",
            Self::CloseSecureChannel => "CLO",
        }
    }

    /// Parses a wire code.
    pub fn from_code(code: [u8; 3]) -> CodecResult<Self> {
        Ok(match &code {
            b"HEL" => Self::Hello,
            b"ACK" => Self::Acknowledge,
            b"ERR" => Self::Error,
            b"RHE" => Self::ReverseHello,
            b"MSG" => Self::Message,
            b"OPN" => Self::OpenSecureChannel,
            b"CLO" => Self::CloseSecureChannel,
            _ => return Err(CodecError::UnknownMessageType(code)),
        })
    }

    /// Returns `true` for the secure conversation types (`OPN`, `MSG`, `CLO`).
    pub const fn is_secure(self) -> bool {
        matches!(
            self,
            Self::Message | Self::OpenSecureChannel | Self::CloseSecureChannel
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chunk indicator following the message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChunkType {
    /// `F`: final (or only) chunk.
    #[default]
    Final,
    /// `C`: intermediate chunk.
    Intermediate,
    /// `A`: abort.
    Abort,
}

impl ChunkType {
    /// The wire byte.
    pub const fn code(self) -> u8 {
        match self {
            Self::Final => b'F',
            Self::Intermediate => b'C',
            Self::Abort => b'A',
        }
    }

    /// Parses the wire byte.
    pub fn from_code(code: u8) -> CodecResult<Self> {
        match code {
            b'F' => Ok(Self::Final),
            b'C' => Ok(Self::Intermediate),
            b'A' => Ok(Self::Abort),
            other => Err(CodecError::UnknownChunkType(other)),
        }
    }
}

// =============================================================================
// Header
// =============================================================================

/// The 8-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message type.
    pub message_type: MessageType,
    /// Chunk type.
    pub chunk_type: ChunkType,
    /// Total frame size including this header.
    pub message_size: u32,
}

impl Header {
    /// Encoded length.
    pub const LEN: usize = 8;

    /// Creates a final-chunk header.
    pub fn new(message_type: MessageType, message_size: u32) -> Self {
        Self {
            message_type,
            chunk_type: ChunkType::Final,
            message_size,
        }
    }

    /// Bytes following the header.
    pub fn payload_len(&self) -> usize {
        (self.message_size as usize).saturating_sub(Self::LEN)
    }
}

impl Encode for Header {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self.message_type.code());
        buf.put_u8(self.chunk_type.code());
        self.message_size.encode(buf);
    }
}

impl Decode for Header {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        let code = [u8::decode(buf)?, u8::decode(buf)?, u8::decode(buf)?];
        let message_type = MessageType::from_code(code)?;
        let chunk_type = ChunkType::from_code(u8::decode(buf)?)?;
        let message_size = u32::decode(buf)?;
        if (message_size as usize) < Self::LEN {
            return Err(CodecError::SizeMismatch {
                declared: message_size,
                actual: Self::LEN,
            });
        }
        Ok(Self {
            message_type,
            chunk_type,
            message_size,
        })
    }
}

/// Encodes a complete frame: header with the computed size, then `body`.
pub fn encode_frame<T: Encode + ?Sized>(message_type: MessageType, body: &T) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    Header::new(message_type, 0).encode(&mut buf);
    body.encode(&mut buf);
    let size = buf.len() as u32;
    buf[4..8].copy_from_slice(&size.to_le_bytes());
    buf.freeze()
}

/// Splits a complete frame into its header and payload, checking the size.
pub fn decode_frame(mut frame: Bytes) -> CodecResult<(Header, Bytes)> {
    let actual = frame.len();
    let header = Header::decode(&mut frame)?;
    if header.message_size as usize != actual {
        return Err(CodecError::SizeMismatch {
            declared: header.message_size,
            actual,
        });
    }
    Ok((header, frame))
}

// =============================================================================
// Handshake messages
// =============================================================================

structure! {
    /// `HEL` payload sent by the client to open a connection.
    Hello {
        /// Protocol version, 0.
        version: u32,
        /// Largest chunk the client can receive.
        receive_buffer_size: u32,
        /// Largest chunk the client will send.
        send_buffer_size: u32,
        /// Largest message the client accepts (0 = no limit).
        max_message_size: u32,
        /// Largest chunk count the client accepts (0 = no limit).
        max_chunk_count: u32,
        /// URL of the endpoint the client wants to reach.
        endpoint_url: String,
    }
}

impl Hello {
    /// Total frame size: 32 bytes plus the URL.
    pub fn message_size(&self) -> u32 {
        (Header::LEN + 24 + self.endpoint_url.len()) as u32
    }
}

structure! {
    /// `ACK` payload with the limits the server will use.
    Acknowledge {
        /// Protocol version.
        version: u32,
        /// Largest chunk the server can receive.
        receive_buffer_size: u32,
        /// Largest chunk the server will send.
        send_buffer_size: u32,
        /// Largest message the server accepts.
        max_message_size: u32,
        /// Largest chunk count the server accepts.
        max_chunk_count: u32,
    }
}

structure! {
    /// `ERR` payload: the server's reason for dropping the connection.
    ErrorMessage {
        /// Status code describing the failure.
        error: StatusCode,
        /// Diagnostic text.
        reason: String,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hello() -> Hello {
        Hello {
            version: 0,
            receive_buffer_size: 65535,
            send_buffer_size: 65535,
            max_message_size: 4000,
            max_chunk_count: 0,
            endpoint_url: "opc.tcp://wow.its.easy:11111/UA/Server".into(),
        }
    }

    #[test]
    fn test_hello_frame_roundtrip() {
        let hello = sample_hello();
        let frame = encode_frame(MessageType::Hello, &hello);
        assert_eq!(frame.len(), 70);
        assert_eq!(hello.message_size(), 70);
        assert_eq!(&frame[..8], b"HELF\x46\x00\x00\x00");

        let (header, mut payload) = decode_frame(frame).unwrap();
        assert_eq!(header.message_type, MessageType::Hello);
        assert_eq!(header.chunk_type, ChunkType::Final);
        assert_eq!(header.message_size, 70);
        assert_eq!(Hello::decode(&mut payload).unwrap(), hello);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_acknowledge_and_error_frames() {
        let ack = Acknowledge {
            version: 0,
            receive_buffer_size: 8192,
            send_buffer_size: 8192,
            max_message_size: 0,
            max_chunk_count: 0,
        };
        let frame = encode_frame(MessageType::Acknowledge, &ack);
        assert_eq!(frame.len(), 28);
        let (_, mut payload) = decode_frame(frame).unwrap();
        assert_eq!(Acknowledge::decode(&mut payload).unwrap(), ack);

        let err = ErrorMessage {
            error: StatusCode::BAD_TCP_SERVER_TOO_BUSY,
            reason: "busy".into(),
        };
        let (header, mut payload) = decode_frame(encode_frame(MessageType::Error, &err)).unwrap();
        assert_eq!(header.message_type, MessageType::Error);
        assert_eq!(ErrorMessage::decode(&mut payload).unwrap(), err);
    }

    #[test]
    fn test_unknown_type_and_chunk() {
        let mut bytes = Bytes::from_static(b"XYZF\x08\x00\x00\x00");
        assert_eq!(
            Header::decode(&mut bytes),
            Err(CodecError::UnknownMessageType(*b"XYZ"))
        );
        let mut bytes = Bytes::from_static(b"MSGQ\x08\x00\x00\x00");
        assert_eq!(Header::decode(&mut bytes), Err(CodecError::UnknownChunkType(b'Q')));
    }

    #[test]
    fn test_size_mismatch() {
        let frame = encode_frame(MessageType::Hello, &sample_hello());
        let truncated = frame.slice(..60);
        assert!(matches!(
            decode_frame(truncated),
            Err(CodecError::SizeMismatch { declared: 70, actual: 60 })
        ));
    }

    #[test]
    fn test_secure_types() {
        assert!(MessageType::OpenSecureChannel.is_secure());
        assert!(!MessageType::Hello.is_secure());
        assert_eq!(MessageType::from_code(*b"CLO").unwrap().to_string(), "CLO");
    }
}
