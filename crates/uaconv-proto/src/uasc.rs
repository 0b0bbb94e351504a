// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! UA Secure Conversation (UASC) message layout.
//!
//! ```text
//! ┌────────────┬────────────┬──────────────────────┬────────────────┬──────┐
//! │ UACP header│ channel id │ security header      │ sequence header│ body │
//! │ 8 B        │ u32        │ OPN: asymmetric      │ seq no, req id │      │
//! │            │            │ MSG/CLO: token id    │                │      │
//! └────────────┴────────────┴──────────────────────┴────────────────┴──────┘
//! ```
//!
//! Only the `None` security policy is supported, so bodies are neither
//! signed nor encrypted.

use bytes::{Bytes, BytesMut};

use crate::encoding::{structure, ByteString, Decode, Encode};
use crate::error::{CodecError, CodecResult};
use crate::uacp::{decode_frame, ChunkType, Header, MessageType};

/// Length of the UACP header plus the channel id.
pub const SECURE_HEADER_LEN: usize = Header::LEN + 4;

/// Security policy URI for unsecured channels.
pub const SECURITY_POLICY_NONE: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";

structure! {
    /// Security header of `OPN` messages.
    AsymmetricSecurityHeader {
        /// Security policy URI.
        security_policy_uri: String,
        /// Sender certificate (null for policy None).
        sender_certificate: ByteString,
        /// Thumbprint of the receiver certificate (null for policy None).
        receiver_certificate_thumbprint: ByteString,
    }
}

impl AsymmetricSecurityHeader {
    /// Header for the `None` policy.
    pub fn none() -> Self {
        Self::policy(SECURITY_POLICY_NONE)
    }

    /// Header announcing `uri`, without certificates.
    pub fn policy(uri: &str) -> Self {
        Self {
            security_policy_uri: uri.to_string(),
            ..Default::default()
        }
    }
}

structure! {
    /// Security header of `MSG` and `CLO` messages.
    SymmetricSecurityHeader {
        /// Security token id issued by the server.
        token_id: u32,
    }
}

structure! {
    /// Sequence header shared by all secure messages.
    SequenceHeader {
        /// Monotonic per-channel sequence number.
        sequence_number: u32,
        /// Request id used to match responses.
        request_id: u32,
    }
}

/// Either security header, chosen by the message type.
#[derive(Debug, Clone, PartialEq)]
pub enum SecurityHeader {
    /// For `OPN`.
    Asymmetric(AsymmetricSecurityHeader),
    /// For `MSG` and `CLO`.
    Symmetric(SymmetricSecurityHeader),
}

impl Encode for SecurityHeader {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Asymmetric(header) => header.encode(buf),
            Self::Symmetric(header) => header.encode(buf),
        }
    }
}

/// A complete secure conversation message.
#[derive(Debug, Clone, PartialEq)]
pub struct SecureMessage<T> {
    /// `OPN`, `MSG` or `CLO`.
    pub message_type: MessageType,
    /// Secure channel id (0 before the server assigns one).
    pub channel_id: u32,
    /// Security header.
    pub security: SecurityHeader,
    /// Sequence header.
    pub sequence: SequenceHeader,
    /// Service payload.
    pub body: T,
}

impl<T> SecureMessage<T> {
    /// An `OPN` message with the `None` policy header.
    pub fn open(channel_id: u32, sequence: SequenceHeader, body: T) -> Self {
        Self {
            message_type: MessageType::OpenSecureChannel,
            channel_id,
            security: SecurityHeader::Asymmetric(AsymmetricSecurityHeader::none()),
            sequence,
            body,
        }
    }

    /// A `MSG` message.
    pub fn message(channel_id: u32, token_id: u32, sequence: SequenceHeader, body: T) -> Self {
        Self {
            message_type: MessageType::Message,
            channel_id,
            security: SecurityHeader::Symmetric(SymmetricSecurityHeader { token_id }),
            sequence,
            body,
        }
    }

    /// A `CLO` message.
    pub fn close(channel_id: u32, token_id: u32, sequence: SequenceHeader, body: T) -> Self {
        Self {
            message_type: MessageType::CloseSecureChannel,
            channel_id,
            security: SecurityHeader::Symmetric(SymmetricSecurityHeader { token_id }),
            sequence,
            body,
        }
    }
}

impl<T: Encode> SecureMessage<T> {
    /// Encodes the whole frame, filling in the size.
    pub fn encode_frame(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128);
        Header::new(self.message_type, 0).encode(&mut buf);
        self.channel_id.encode(&mut buf);
        self.security.encode(&mut buf);
        self.sequence.encode(&mut buf);
        self.body.encode(&mut buf);
        let size = buf.len() as u32;
        buf[4..8].copy_from_slice(&size.to_le_bytes());
        buf.freeze()
    }
}

impl<T: Decode> SecureMessage<T> {
    /// Decodes a whole frame.
    pub fn decode_frame(frame: Bytes) -> CodecResult<Self> {
        let (header, mut payload) = decode_frame(frame)?;
        if !header.message_type.is_secure() {
            return Err(CodecError::UnexpectedMessageType {
                expected: "OPN, MSG or CLO",
                actual: header.message_type.as_str(),
            });
        }
        if header.chunk_type != ChunkType::Final {
            return Err(CodecError::UnknownChunkType(header.chunk_type.code()));
        }
        let channel_id = u32::decode(&mut payload)?;
        let security = if header.message_type == MessageType::OpenSecureChannel {
            SecurityHeader::Asymmetric(AsymmetricSecurityHeader::decode(&mut payload)?)
        } else {
            SecurityHeader::Symmetric(SymmetricSecurityHeader::decode(&mut payload)?)
        };
        let sequence = SequenceHeader::decode(&mut payload)?;
        let body = T::decode(&mut payload)?;
        Ok(Self {
            message_type: header.message_type,
            channel_id,
            security,
            sequence,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        CloseSecureChannelRequest, OpenSecureChannelRequest, RequestEnvelope,
    };
    use crate::structures::{MessageSecurityMode, RequestHeader};

    #[test]
    fn test_open_layout() {
        let body = RequestEnvelope::new(
            RequestHeader::default(),
            OpenSecureChannelRequest {
                security_mode: MessageSecurityMode::None,
                requested_lifetime: 3_600_000,
                ..Default::default()
            },
        );
        let message = SecureMessage::open(
            0,
            SequenceHeader {
                sequence_number: 1,
                request_id: 1,
            },
            body,
        );
        let frame = message.encode_frame();
        assert_eq!(&frame[..4], b"OPNF");
        assert_eq!(
            u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize,
            frame.len()
        );
        // channel id 0, then the policy URI length
        assert_eq!(&frame[8..12], &[0, 0, 0, 0]);
        assert_eq!(
            i32::from_le_bytes([frame[12], frame[13], frame[14], frame[15]]) as usize,
            SECURITY_POLICY_NONE.len()
        );

        let decoded = SecureMessage::<RequestEnvelope>::decode_frame(frame).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_close_uses_token_id() {
        let message = SecureMessage::close(
            9,
            4,
            SequenceHeader {
                sequence_number: 7,
                request_id: 7,
            },
            RequestEnvelope::new(RequestHeader::default(), CloseSecureChannelRequest {}),
        );
        let frame = message.encode_frame();
        assert_eq!(&frame[..4], b"CLOF");
        assert_eq!(&frame[8..16], &[9, 0, 0, 0, 4, 0, 0, 0]);
        let decoded = SecureMessage::<RequestEnvelope>::decode_frame(frame).unwrap();
        assert_eq!(
            decoded.security,
            SecurityHeader::Symmetric(SymmetricSecurityHeader { token_id: 4 })
        );
    }

    #[test]
    fn test_rejects_handshake_frames() {
        let frame = crate::uacp::encode_frame(MessageType::Acknowledge, &crate::uacp::Acknowledge::default());
        assert!(matches!(
            SecureMessage::<RequestEnvelope>::decode_frame(frame),
            Err(CodecError::UnexpectedMessageType { actual: "ACK", .. })
        ));
    }
}
