// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Secure channel.
//!
//! A [`SecureChannel`] owns one handshaken connection. It numbers outgoing
//! messages, stamps request headers, and validates the channel id of every
//! inbound frame once the server has assigned one.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                   SecureChannel                     │
//! │  open() / request() / close()   (&mut self)         │
//! └────────────────────────────────────────────────────┘
//!          │ into_split()                 │
//!          ▼                              ▼
//! ┌──────────────────────┐   ┌──────────────────────────┐
//! │    ChannelSender     │   │     ChannelReceiver      │
//! │ sequence number,     │   │ 12-byte header, channel  │
//! │ request handle,      │   │ id check, ERR frames     │
//! │ token id             │   │                          │
//! └──────────────────────┘   └──────────────────────────┘
//! ```
//!
//! Before session activation the channel is driven directly: every
//! request is followed by the matching `recv`, so responses correlate by
//! arrival order. Afterwards the halves are handed to the
//! [`Dispatcher`](crate::dispatcher::Dispatcher).

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use once_cell::sync::OnceCell;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, info, warn};
use uaconv_proto::{
    uacp, AsymmetricSecurityHeader, BinaryCodec, ChannelSecurityToken, CloseSecureChannelRequest,
    Codec, Decode, ErrorMessage, Header, MessageSecurityMode, MessageType, NodeId, OpenSecureChannelRequest,
    OpenSecureChannelResponse, RequestEnvelope, RequestHeader, ResponseEnvelope, SecureMessage,
    SecurityHeader, SecurityTokenRequestType, SequenceHeader, ServiceRequest, SECURE_HEADER_LEN,
};

use crate::config::ClientConfig;
use crate::error::{ProtocolError, TransportError, UaResult};
use crate::response::expect_good;
use crate::security::generate_nonce;
use crate::transport::BoxConnection;

/// Smallest frame limit applied regardless of configuration.
const MIN_FRAME_LIMIT: usize = 8192;

/// Channel id shared by both halves, set once by the first response.
type SharedChannelId = Arc<OnceCell<u32>>;

// =============================================================================
// ChannelSender
// =============================================================================

/// Write half: numbers and encodes outgoing requests.
pub struct ChannelSender {
    writer: WriteHalf<BoxConnection>,
    codec: Arc<dyn Codec>,
    channel_id: SharedChannelId,
    token_id: u32,
    sequence_number: u32,
    request_handle: u32,
    timeout_hint: u32,
    policy_uri: &'static str,
}

impl ChannelSender {
    /// Sequence number of the last message written.
    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    /// Request handle of the last request written.
    pub fn request_handle(&self) -> u32 {
        self.request_handle
    }

    /// Handle the next request will carry.
    pub fn next_request_handle(&self) -> u32 {
        self.request_handle.wrapping_add(1)
    }

    /// Security token in use.
    pub fn token_id(&self) -> u32 {
        self.token_id
    }

    /// Sends `body` and returns the request handle it was sent with.
    ///
    /// Both counters advance before the write and are restored if encoding
    /// or writing fails, so a failed send leaves no gap.
    pub async fn send(
        &mut self,
        body: impl Into<ServiceRequest>,
        authentication_token: &NodeId,
    ) -> UaResult<u32> {
        let body = body.into();
        let previous = (self.sequence_number, self.request_handle);
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.request_handle = self.request_handle.wrapping_add(1);

        match self.write_message(body, authentication_token).await {
            Ok(()) => Ok(self.request_handle),
            Err(e) => {
                (self.sequence_number, self.request_handle) = previous;
                Err(e)
            }
        }
    }

    async fn write_message(
        &mut self,
        body: ServiceRequest,
        authentication_token: &NodeId,
    ) -> UaResult<()> {
        let header = RequestHeader {
            authentication_token: authentication_token.clone(),
            timestamp: uaconv_proto::now(),
            request_handle: self.request_handle,
            timeout_hint: self.timeout_hint,
            ..Default::default()
        };
        let name = body.name();
        let message_type = match &body {
            ServiceRequest::OpenSecureChannel(_) => MessageType::OpenSecureChannel,
            ServiceRequest::CloseSecureChannel(_) => MessageType::CloseSecureChannel,
            _ => MessageType::Message,
        };
        let envelope = RequestEnvelope::new(header, body);
        let sequence = SequenceHeader {
            sequence_number: self.sequence_number,
            request_id: self.request_handle,
        };
        let channel_id = self.channel_id.get().copied().unwrap_or(0);
        let message = match message_type {
            MessageType::OpenSecureChannel => {
                let mut message = SecureMessage::open(channel_id, sequence, envelope);
                message.security =
                    SecurityHeader::Asymmetric(AsymmetricSecurityHeader::policy(self.policy_uri));
                message
            }
            MessageType::CloseSecureChannel => {
                SecureMessage::close(channel_id, self.token_id, sequence, envelope)
            }
            _ => SecureMessage::message(channel_id, self.token_id, sequence, envelope),
        };

        let frame = self.codec.encode_request(&message)?;
        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| TransportError::io("write message", e))?;
        self.writer
            .flush()
            .await
            .map_err(|e| TransportError::io("write message", e))?;

        debug!(
            service = name,
            channel_id,
            sequence_number = self.sequence_number,
            request_handle = self.request_handle,
            size = frame.len(),
            "Sent {}",
            message_type.as_str()
        );
        Ok(())
    }

    /// Sends CloseSecureChannel, then shuts the write side down.
    ///
    /// A failed close request is logged; the shutdown happens either way.
    pub async fn close(&mut self) {
        if let Err(e) = self.send(CloseSecureChannelRequest {}, &NodeId::null()).await {
            warn!(error = %e, "Failed to send CloseSecureChannel");
        }
        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "Connection shutdown failed");
        }
        info!(
            channel_id = self.channel_id.get().copied().unwrap_or(0),
            "Secure channel closed"
        );
    }
}

// =============================================================================
// ChannelReceiver
// =============================================================================

/// Read half: reads frames and validates the channel id.
pub struct ChannelReceiver {
    reader: ReadHalf<BoxConnection>,
    codec: Arc<dyn Codec>,
    channel_id: SharedChannelId,
    frame_limit: usize,
}

impl ChannelReceiver {
    /// Reads and decodes the next response.
    ///
    /// An `ERR` frame becomes [`ProtocolError::ServerError`]. The first
    /// response assigns the channel id; later ones must carry the same id.
    pub async fn recv(&mut self) -> UaResult<ResponseEnvelope> {
        let frame = self.read_secure_frame().await?;
        let message = self
            .codec
            .decode_response(frame)
            .map_err(|e| ProtocolError::decode("secure message", e))?;

        let assigned = *self.channel_id.get_or_init(|| message.channel_id);
        if assigned != message.channel_id {
            return Err(ProtocolError::ChannelIdMismatch {
                expected: assigned,
                actual: message.channel_id,
            }
            .into());
        }

        debug!(
            service = message.body.name(),
            channel_id = message.channel_id,
            sequence_number = message.sequence.sequence_number,
            request_handle = message.body.request_handle(),
            "Received {}",
            message.message_type.as_str()
        );
        Ok(message.body)
    }

    async fn read_secure_frame(&mut self) -> UaResult<Bytes> {
        let mut head = [0u8; SECURE_HEADER_LEN];
        self.reader
            .read_exact(&mut head)
            .await
            .map_err(|e| TransportError::io("read message header", e))?;
        let header = Header::decode(&mut Bytes::copy_from_slice(&head[..Header::LEN]))
            .map_err(|e| ProtocolError::decode("message header", e))?;

        let size = header.message_size as usize;
        if size < SECURE_HEADER_LEN || size > self.frame_limit {
            return Err(ProtocolError::decode(
                "message header",
                uaconv_proto::CodecError::InvalidLength {
                    what: "secure message",
                    length: size as i64,
                },
            )
            .into());
        }

        let mut frame = BytesMut::with_capacity(size);
        frame.extend_from_slice(&head);
        frame.resize(size, 0);
        self.reader
            .read_exact(&mut frame[SECURE_HEADER_LEN..])
            .await
            .map_err(|e| TransportError::io("read message body", e))?;
        let frame = frame.freeze();

        match header.message_type {
            MessageType::Error => {
                let (_, mut payload) = uacp::decode_frame(frame)
                    .map_err(|e| ProtocolError::decode("Error", e))?;
                let error = ErrorMessage::decode(&mut payload)
                    .map_err(|e| ProtocolError::decode("Error", e))?;
                warn!(status = %error.error, reason = %error.reason, "Server sent ERR");
                Err(ProtocolError::ServerError {
                    status: error.error,
                    reason: error.reason,
                }
                .into())
            }
            t if t.is_secure() => Ok(frame),
            other => Err(ProtocolError::UnexpectedFrame {
                actual: other.as_str(),
                expected: "OPN, MSG or CLO",
            }
            .into()),
        }
    }
}

// =============================================================================
// SecureChannel
// =============================================================================

/// A secure channel over one connection.
pub struct SecureChannel {
    sender: ChannelSender,
    receiver: ChannelReceiver,
    security_mode: MessageSecurityMode,
    lifetime: u32,
    request_timeout: Duration,
    token: Option<ChannelSecurityToken>,
}

impl SecureChannel {
    /// Wraps a handshaken connection using the binary codec.
    pub fn new(connection: BoxConnection, config: &ClientConfig) -> Self {
        Self::with_codec(connection, config, Arc::new(BinaryCodec))
    }

    /// Wraps a handshaken connection using `codec`.
    pub fn with_codec(
        connection: BoxConnection,
        config: &ClientConfig,
        codec: Arc<dyn Codec>,
    ) -> Self {
        let (reader, writer) = tokio::io::split(connection);
        let channel_id = SharedChannelId::default();
        let timeout_hint = u32::try_from(config.request_timeout.as_millis()).unwrap_or(u32::MAX);

        Self {
            sender: ChannelSender {
                writer,
                codec: Arc::clone(&codec),
                channel_id: Arc::clone(&channel_id),
                token_id: 0,
                sequence_number: 0,
                request_handle: 0,
                timeout_hint,
                policy_uri: config.channel.security_policy.uri(),
            },
            receiver: ChannelReceiver {
                reader,
                codec,
                channel_id,
                frame_limit: (config.channel.receive_buffer_size as usize).max(MIN_FRAME_LIMIT),
            },
            security_mode: config.channel.security_mode.to_message_security_mode(),
            lifetime: config.channel.lifetime_millis(),
            request_timeout: config.request_timeout,
            token: None,
        }
    }

    /// Channel id, 0 until the server assigns one.
    pub fn channel_id(&self) -> u32 {
        self.sender.channel_id.get().copied().unwrap_or(0)
    }

    /// Security token id, 0 before [`open`](Self::open).
    pub fn token_id(&self) -> u32 {
        self.sender.token_id
    }

    /// Token issued by the server on open.
    pub fn security_token(&self) -> Option<&ChannelSecurityToken> {
        self.token.as_ref()
    }

    /// Sequence number of the last message sent.
    pub fn sequence_number(&self) -> u32 {
        self.sender.sequence_number
    }

    /// Handle of the last request sent.
    pub fn request_handle(&self) -> u32 {
        self.sender.request_handle
    }

    /// Request timeout applied by [`request`](Self::request).
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Opens the channel: issues a token with a fresh client nonce.
    pub async fn open(&mut self) -> UaResult<()> {
        let request = OpenSecureChannelRequest {
            client_protocol_version: 0,
            request_type: SecurityTokenRequestType::Issue,
            security_mode: self.security_mode,
            client_nonce: generate_nonce().into(),
            requested_lifetime: self.lifetime,
        };
        let envelope = self.request(request, &NodeId::null()).await?;
        let (_, response) = expect_good::<OpenSecureChannelResponse>(envelope)?;

        let token = response.security_token;
        let assigned = *self.sender.channel_id.get_or_init(|| token.channel_id);
        if assigned != token.channel_id {
            return Err(ProtocolError::ChannelIdMismatch {
                expected: assigned,
                actual: token.channel_id,
            }
            .into());
        }
        self.sender.token_id = token.token_id;
        info!(
            channel_id = token.channel_id,
            token_id = token.token_id,
            revised_lifetime = token.revised_lifetime,
            "Secure channel opened"
        );
        self.token = Some(token);
        Ok(())
    }

    /// Sends a request; returns its request handle.
    pub async fn send(
        &mut self,
        body: impl Into<ServiceRequest>,
        authentication_token: &NodeId,
    ) -> UaResult<u32> {
        self.sender.send(body, authentication_token).await
    }

    /// Receives the next response.
    pub async fn recv(&mut self) -> UaResult<ResponseEnvelope> {
        self.receiver.recv().await
    }

    /// Sends a request and waits for the next response, bounded by the
    /// request timeout.
    pub async fn request(
        &mut self,
        body: impl Into<ServiceRequest>,
        authentication_token: &NodeId,
    ) -> UaResult<ResponseEnvelope> {
        let body = body.into();
        let name = body.name();
        self.send(body, authentication_token).await?;
        match tokio::time::timeout(self.request_timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::RequestTimeout {
                request: name,
                duration: self.request_timeout,
            }
            .into()),
        }
    }

    /// Closes the channel. The connection is always shut down.
    pub async fn close(&mut self) {
        self.sender.close().await;
    }

    /// Splits the channel into its halves.
    pub fn into_split(self) -> (ChannelSender, ChannelReceiver) {
        (self.sender, self.receiver)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::{Context, Poll};

    use chrono::Utc;
    use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
    use uaconv_proto::{
        ReadRequest, ReadResponse, ResponseHeader, StatusCode, SECURITY_POLICY_NONE,
    };

    use crate::config::{ChannelSettings, SecurityMode, SecurityPolicy};
    use crate::error::UaError;

    fn config() -> ClientConfig {
        ClientConfig::new("opc.tcp://localhost:4840")
    }

    async fn read_request(server: &mut DuplexStream) -> SecureMessage<RequestEnvelope> {
        let frame = crate::transport::read_frame(server, 1 << 20).await.unwrap();
        BinaryCodec.decode_request(frame).unwrap()
    }

    async fn write_response(
        server: &mut DuplexStream,
        channel_id: u32,
        request: &SecureMessage<RequestEnvelope>,
        body: impl Into<uaconv_proto::ServiceResponse>,
    ) {
        let envelope =
            ResponseEnvelope::new(ResponseHeader::good(request.body.header.request_handle), body);
        let message = SecureMessage::message(channel_id, 1, request.sequence.clone(), envelope);
        server
            .write_all(&BinaryCodec.encode_response(&message))
            .await
            .unwrap();
    }

    fn open_response(channel_id: u32, token_id: u32) -> OpenSecureChannelResponse {
        OpenSecureChannelResponse {
            security_token: ChannelSecurityToken {
                channel_id,
                token_id,
                created_at: Utc::now(),
                revised_lifetime: 3_600_000,
            },
            server_nonce: vec![0; 32].into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_open_assigns_channel_and_token() {
        let (client, mut server) = tokio::io::duplex(1 << 16);
        let mut channel = SecureChannel::new(Box::new(client), &config());

        let server_task = tokio::spawn(async move {
            let request = read_request(&mut server).await;
            assert_eq!(request.message_type, MessageType::OpenSecureChannel);
            assert_eq!(request.channel_id, 0);
            assert_eq!(request.sequence.sequence_number, 1);
            assert_eq!(request.body.header.request_handle, 1);
            assert_eq!(
                request.security,
                SecurityHeader::Asymmetric(AsymmetricSecurityHeader::policy(SECURITY_POLICY_NONE))
            );
            match &request.body.body {
                ServiceRequest::OpenSecureChannel(open) => {
                    assert_eq!(open.client_nonce.len(), 32);
                    assert_eq!(open.request_type, SecurityTokenRequestType::Issue);
                    assert_eq!(open.requested_lifetime, 3_600_000);
                }
                other => panic!("unexpected {}", other.name()),
            }
            let envelope = ResponseEnvelope::new(
                ResponseHeader::good(1),
                open_response(7, 3),
            );
            let message = SecureMessage::open(7, request.sequence.clone(), envelope);
            server
                .write_all(&BinaryCodec.encode_response(&message))
                .await
                .unwrap();
            server
        });

        channel.open().await.unwrap();
        assert_eq!(channel.channel_id(), 7);
        assert_eq!(channel.token_id(), 3);
        assert_eq!(channel.sequence_number(), 1);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_open_announces_configured_policy() {
        let (client, mut server) = tokio::io::duplex(1 << 16);
        let mut config = config();
        config.channel = ChannelSettings {
            security_mode: SecurityMode::Sign,
            security_policy: SecurityPolicy::Basic256Sha256,
            ..Default::default()
        };
        let mut channel = SecureChannel::new(Box::new(client), &config);

        let open = tokio::spawn(async move { channel.open().await });
        let request = read_request(&mut server).await;
        let SecurityHeader::Asymmetric(header) = &request.security else {
            panic!("expected an asymmetric header");
        };
        assert_eq!(header.security_policy_uri, SecurityPolicy::Basic256Sha256.uri());
        match &request.body.body {
            ServiceRequest::OpenSecureChannel(open) => {
                assert_eq!(open.security_mode, MessageSecurityMode::Sign);
            }
            other => panic!("unexpected {}", other.name()),
        }
        drop(server);
        assert!(open.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_sequence_numbers_increase() {
        let (client, mut server) = tokio::io::duplex(1 << 16);
        let mut channel = SecureChannel::new(Box::new(client), &config());

        for expected in 1..=3u32 {
            let handle = channel.send(ReadRequest::default(), &NodeId::null()).await.unwrap();
            assert_eq!(handle, expected);
            let request = read_request(&mut server).await;
            assert_eq!(request.message_type, MessageType::Message);
            assert_eq!(request.sequence.sequence_number, expected);
            assert_eq!(request.sequence.request_id, expected);
        }
    }

    #[tokio::test]
    async fn test_request_matches_response() {
        let (client, mut server) = tokio::io::duplex(1 << 16);
        let mut channel = SecureChannel::new(Box::new(client), &config());

        tokio::spawn(async move {
            let request = read_request(&mut server).await;
            write_response(&mut server, 4, &request, ReadResponse::default()).await;
            server
        });

        let response = channel.request(ReadRequest::default(), &NodeId::null()).await.unwrap();
        assert_eq!(response.request_handle(), 1);
        assert_eq!(response.name(), "ReadResponse");
        assert_eq!(channel.channel_id(), 4);
    }

    #[tokio::test]
    async fn test_channel_id_mismatch() {
        let (client, mut server) = tokio::io::duplex(1 << 16);
        let mut channel = SecureChannel::new(Box::new(client), &config());

        tokio::spawn(async move {
            let first = read_request(&mut server).await;
            write_response(&mut server, 4, &first, ReadResponse::default()).await;
            let second = read_request(&mut server).await;
            write_response(&mut server, 5, &second, ReadResponse::default()).await;
            server
        });

        channel.request(ReadRequest::default(), &NodeId::null()).await.unwrap();
        let error = channel
            .request(ReadRequest::default(), &NodeId::null())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            UaError::Protocol(ProtocolError::ChannelIdMismatch {
                expected: 4,
                actual: 5
            })
        ));
    }

    #[tokio::test]
    async fn test_error_frame() {
        let (client, mut server) = tokio::io::duplex(1 << 16);
        let mut channel = SecureChannel::new(Box::new(client), &config());

        tokio::spawn(async move {
            let _ = read_request(&mut server).await;
            let error = ErrorMessage {
                error: StatusCode::BAD_SECURE_CHANNEL_ID_INVALID,
                reason: "unknown channel".into(),
            };
            server
                .write_all(&uacp::encode_frame(MessageType::Error, &error))
                .await
                .unwrap();
            server
        });

        let error = channel
            .request(ReadRequest::default(), &NodeId::null())
            .await
            .unwrap_err();
        assert!(matches!(
            &error,
            UaError::Protocol(ProtocolError::ServerError { reason, .. }) if reason == "unknown channel"
        ));
        assert_eq!(error.status(), Some(StatusCode::BAD_SECURE_CHANNEL_ID_INVALID));
    }

    #[tokio::test]
    async fn test_close_sends_clo_and_shuts_down() {
        let (client, mut server) = tokio::io::duplex(1 << 16);
        let mut channel = SecureChannel::new(Box::new(client), &config());

        channel.close().await;
        let request = read_request(&mut server).await;
        assert_eq!(request.message_type, MessageType::CloseSecureChannel);
        let mut rest = Vec::new();
        assert_eq!(server.read_to_end(&mut rest).await.unwrap(), 0);
    }

    /// Connection whose writes fail after `allowed` successful writes.
    struct FailingConnection {
        shutdown: Arc<AtomicBool>,
        allowed: usize,
    }

    impl AsyncRead for FailingConnection {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for FailingConnection {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.allowed == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken")));
            }
            self.allowed -= 1;
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.shutdown.store(true, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_failed_send_rolls_back_counters() {
        let connection = FailingConnection {
            shutdown: Arc::new(AtomicBool::new(false)),
            allowed: 1,
        };
        let mut channel = SecureChannel::new(Box::new(connection), &config());

        assert_eq!(channel.send(ReadRequest::default(), &NodeId::null()).await.unwrap(), 1);
        let error = channel
            .send(ReadRequest::default(), &NodeId::null())
            .await
            .unwrap_err();
        assert_eq!(error.category(), "transport");
        assert_eq!(channel.sequence_number(), 1);
        assert_eq!(channel.request_handle(), 1);
    }

    #[tokio::test]
    async fn test_close_shuts_down_when_write_fails() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let connection = FailingConnection {
            shutdown: Arc::clone(&shutdown),
            allowed: 0,
        };
        let mut channel = SecureChannel::new(Box::new(connection), &config());

        channel.close().await;
        assert!(shutdown.load(Ordering::SeqCst));
        assert_eq!(channel.sequence_number(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let (client, _server) = tokio::io::duplex(1 << 16);
        let mut channel = SecureChannel::new(Box::new(client), &config());

        let error = channel
            .request(ReadRequest::default(), &NodeId::null())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            UaError::Transport(TransportError::RequestTimeout { request: "ReadRequest", .. })
        ));
    }
}
