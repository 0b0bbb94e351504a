// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Byte stream transport and the UACP handshake.
//!
//! A [`Connection`] is any ordered, reliable byte stream. In production it is
//! a [`TcpStream`]; tests use [`tokio::io::duplex`]. [`dial`] connects to an
//! `opc.tcp://` endpoint and performs the Hello/Acknowledge exchange, after
//! which the stream is ready for the secure channel.

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};
use uaconv_proto::{uacp, Acknowledge, Decode, ErrorMessage, Header, Hello, MessageType};

use crate::config::ClientConfig;
use crate::error::{ProtocolError, TransportError, UaErrorContext, UaResult};

/// Default OPC UA TCP port.
pub const DEFAULT_PORT: u16 = 4840;

/// Upper bound on a single frame accepted during the handshake.
const MAX_HANDSHAKE_FRAME: usize = 64 * 1024;

// =============================================================================
// Connection
// =============================================================================

/// An ordered, reliable byte stream.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// A type-erased connection.
pub type BoxConnection = Box<dyn Connection>;

// =============================================================================
// Endpoint
// =============================================================================

/// A parsed `opc.tcp://host[:port][/path]` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Path after the authority, including the leading slash.
    pub path: String,
}

impl Endpoint {
    /// Parses an endpoint URL.
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let rest = url
            .strip_prefix("opc.tcp://")
            .ok_or_else(|| TransportError::invalid_endpoint(url, "scheme must be opc.tcp"))?;

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(TransportError::invalid_endpoint(url, "missing host"));
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            // [v6]:port
            let end = bracketed
                .find(']')
                .ok_or_else(|| TransportError::invalid_endpoint(url, "unterminated IPv6 host"))?;
            let port = bracketed[end + 1..].strip_prefix(':');
            (&bracketed[..end], port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        let port = match port {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| TransportError::invalid_endpoint(url, format!("invalid port '{p}'")))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// `host:port` for socket connection.
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "opc.tcp://{}{}", self.socket_addr(), self.path)
    }
}

// =============================================================================
// Handshake
// =============================================================================

/// Reads one complete UACP frame (header included).
pub async fn read_frame<R>(reader: &mut R, limit: usize) -> UaResult<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; Header::LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| TransportError::io("read frame header", e))?;
    let parsed = Header::decode(&mut Bytes::copy_from_slice(&header))
        .map_err(|e| ProtocolError::decode("frame header", e))?;

    let size = parsed.message_size as usize;
    if size > limit {
        return Err(ProtocolError::decode(
            "frame header",
            uaconv_proto::CodecError::InvalidLength {
                what: "frame",
                length: size as i64,
            },
        )
        .into());
    }

    let mut frame = BytesMut::with_capacity(size);
    frame.extend_from_slice(&header);
    frame.resize(size, 0);
    reader
        .read_exact(&mut frame[Header::LEN..])
        .await
        .map_err(|e| TransportError::io("read frame body", e))?;
    Ok(frame.freeze())
}

/// Sends Hello and waits for Acknowledge.
///
/// An `ERR` answer becomes [`TransportError::Rejected`].
pub async fn handshake<S>(stream: &mut S, hello: &Hello) -> UaResult<Acknowledge>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let frame = uacp::encode_frame(MessageType::Hello, hello);
    stream
        .write_all(&frame)
        .await
        .map_err(|e| TransportError::io("write hello", e))?;
    stream
        .flush()
        .await
        .map_err(|e| TransportError::io("write hello", e))?;
    debug!(endpoint = %hello.endpoint_url, size = frame.len(), "Sent HEL");

    let frame = read_frame(stream, MAX_HANDSHAKE_FRAME).await?;
    let (header, mut payload) =
        uacp::decode_frame(frame).map_err(|e| ProtocolError::decode("handshake frame", e))?;

    match header.message_type {
        MessageType::Acknowledge => {
            let ack = Acknowledge::decode(&mut payload)
                .map_err(|e| ProtocolError::decode("Acknowledge", e))?;
            debug!(
                receive_buffer_size = ack.receive_buffer_size,
                send_buffer_size = ack.send_buffer_size,
                "Received ACK"
            );
            Ok(ack)
        }
        MessageType::Error => {
            let err = ErrorMessage::decode(&mut payload)
                .map_err(|e| ProtocolError::decode("Error", e))?;
            Err(TransportError::Rejected {
                status: err.error,
                reason: err.reason,
            }
            .into())
        }
        other => Err(ProtocolError::UnexpectedFrame {
            actual: other.as_str(),
            expected: "ACK",
        }
        .into()),
    }
}

/// Connects to the configured endpoint and performs the handshake.
pub async fn dial(config: &ClientConfig) -> UaResult<(BoxConnection, Acknowledge)> {
    let endpoint = Endpoint::parse(&config.endpoint)?;
    let addr = endpoint.socket_addr();

    let mut stream = connect_tcp(&addr, &config.endpoint, config.connect_timeout)
        .await
        .with_endpoint(&config.endpoint)?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    let ack = handshake(&mut stream, &config.hello())
        .await
        .with_endpoint(&config.endpoint)?;
    info!(endpoint = %endpoint, "Connected");
    Ok((Box::new(stream), ack))
}

async fn connect_tcp(addr: &str, endpoint: &str, timeout: Duration) -> UaResult<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(TransportError::io("connect", e).into()),
        Err(_) => Err(TransportError::ConnectTimeout {
            endpoint: endpoint.to_string(),
            duration: timeout,
        }
        .into()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UaError;
    use uaconv_proto::StatusCode;

    #[test]
    fn test_parse_endpoint() {
        let endpoint = Endpoint::parse("opc.tcp://wow.its.easy:11111/UA/Server").unwrap();
        assert_eq!(endpoint.host, "wow.its.easy");
        assert_eq!(endpoint.port, 11111);
        assert_eq!(endpoint.path, "/UA/Server");

        let endpoint = Endpoint::parse("opc.tcp://plc").unwrap();
        assert_eq!(endpoint.port, DEFAULT_PORT);
        assert_eq!(endpoint.socket_addr(), "plc:4840");

        let endpoint = Endpoint::parse("opc.tcp://[::1]:4841").unwrap();
        assert_eq!(endpoint.host, "::1");
        assert_eq!(endpoint.socket_addr(), "[::1]:4841");
    }

    #[test]
    fn test_parse_endpoint_errors() {
        assert!(Endpoint::parse("http://plc:4840").is_err());
        assert!(Endpoint::parse("opc.tcp://").is_err());
        assert!(Endpoint::parse("opc.tcp://plc:notaport").is_err());
    }

    fn hello() -> Hello {
        ClientConfig::new("opc.tcp://localhost:4840").hello()
    }

    #[tokio::test]
    async fn test_handshake_ack() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let server_task = tokio::spawn(async move {
            let frame = read_frame(&mut server, 4096).await.unwrap();
            let (header, mut payload) = uacp::decode_frame(frame).unwrap();
            assert_eq!(header.message_type, MessageType::Hello);
            let hello = Hello::decode(&mut payload).unwrap();
            assert_eq!(hello.endpoint_url, "opc.tcp://localhost:4840");

            let ack = Acknowledge {
                receive_buffer_size: 8192,
                send_buffer_size: 8192,
                ..Default::default()
            };
            server
                .write_all(&uacp::encode_frame(MessageType::Acknowledge, &ack))
                .await
                .unwrap();
        });

        let ack = handshake(&mut client, &hello()).await.unwrap();
        assert_eq!(ack.receive_buffer_size, 8192);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        tokio::spawn(async move {
            let _ = read_frame(&mut server, 4096).await;
            let err = ErrorMessage {
                error: StatusCode::BAD_TCP_SERVER_TOO_BUSY,
                reason: "too many clients".into(),
            };
            let _ = server
                .write_all(&uacp::encode_frame(MessageType::Error, &err))
                .await;
        });

        let error = handshake(&mut client, &hello()).await.unwrap_err();
        assert!(matches!(
            error,
            UaError::Transport(TransportError::Rejected { status, .. })
                if status == StatusCode::BAD_TCP_SERVER_TOO_BUSY
        ));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn test_handshake_eof() {
        let (mut client, server) = tokio::io::duplex(4096);
        drop(server);
        let error = handshake(&mut client, &hello()).await.unwrap_err();
        assert_eq!(error.category(), "transport");
    }
}
