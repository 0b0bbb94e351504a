// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Secure Channel Integration Tests
//!
//! - `test_hello_*`: UACP handshake framing
//! - `test_channel_*`: open, request, close against the scripted server

use uaconv_client::response::expect_good;
use uaconv_client::transport::handshake;
use uaconv_client::{SecureChannel, ServiceError, UaError};
use uaconv_proto::uacp::{decode_frame, encode_frame};
use uaconv_proto::{
    Decode, Hello, MessageType, NodeId, ReadRequest, ReadResponse, ReadValueId, StatusCode,
    Variant,
};
use uaconv_tests::prelude::*;

// =============================================================================
// Handshake
// =============================================================================

#[test]
fn test_hello_frame_size() {
    let hello = Hello {
        version: 0,
        receive_buffer_size: 65535,
        send_buffer_size: 65535,
        max_message_size: 4000,
        max_chunk_count: 0,
        endpoint_url: "opc.tcp://wow.its.easy:11111/UA/Server".into(),
    };
    assert_eq!(hello.message_size(), 70);

    let frame = encode_frame(MessageType::Hello, &hello);
    assert_eq!(frame.len(), 70);

    let (header, mut payload) = decode_frame(frame).unwrap();
    assert_eq!(header.message_type, MessageType::Hello);
    assert_eq!(header.message_size, 70);
    assert_eq!(Hello::decode(&mut payload).unwrap(), hello);
}

#[tokio::test]
async fn test_hello_carries_configured_endpoint() {
    let config = ConfigFixtures::local();
    let (mut connection, server) = MockServer::start(ServerScript::default());

    let ack = within(handshake(&mut connection, &config.hello()))
        .await
        .unwrap();

    assert_eq!(ack.receive_buffer_size, 65535);
    let hello = server.hello().unwrap();
    assert_eq!(hello.endpoint_url, TEST_ENDPOINT);
    assert_eq!(hello.receive_buffer_size, config.channel.receive_buffer_size);
}

// =============================================================================
// Channel lifecycle
// =============================================================================

async fn open_channel(script: ServerScript) -> (SecureChannel, MockServer) {
    let config = ConfigFixtures::local();
    let (mut connection, server) = MockServer::start(script);
    handshake(&mut connection, &config.hello()).await.unwrap();
    let mut channel = SecureChannel::new(connection, &config);
    within(channel.open()).await.unwrap();
    (channel, server)
}

#[tokio::test]
async fn test_channel_open_assigns_ids() {
    let (channel, server) = open_channel(ServerScript::default()).await;

    assert_eq!(channel.channel_id(), 11);
    assert_eq!(channel.token_id(), 1);
    assert_eq!(channel.security_token().unwrap().channel_id, 11);
    assert_eq!(server.requests(), ["OpenSecureChannelRequest"]);
}

#[tokio::test]
async fn test_channel_request_advances_sequence() {
    let script = ServerScript::default().value("ns=2;s=Level", Variant::Double(4.5));
    let (mut channel, _server) = open_channel(script).await;

    let before = channel.sequence_number();
    let handle_before = channel.request_handle();
    let request = ReadRequest {
        nodes_to_read: vec![ReadValueId::value_of(NodeId::string(2, "Level"))],
        ..Default::default()
    };
    let envelope = within(channel.request(request, &NodeId::null()))
        .await
        .unwrap();

    assert_eq!(channel.sequence_number(), before + 1);
    assert_eq!(channel.request_handle(), handle_before + 1);
    assert_eq!(envelope.request_handle(), channel.request_handle());
    let (_, response) = expect_good::<ReadResponse>(envelope).unwrap();
    assert_eq!(response.results[0].value, Some(Variant::Double(4.5)));
}

#[tokio::test]
async fn test_channel_fault_is_bad_result() {
    let script = ServerScript::default().fault("ReadRequest", StatusCode::BAD_SERVICE_UNSUPPORTED);
    let (mut channel, _server) = open_channel(script).await;

    let envelope = within(channel.request(ReadRequest::default(), &NodeId::null()))
        .await
        .unwrap();
    let error = expect_good::<ReadResponse>(envelope).unwrap_err();

    assert!(matches!(
        error,
        UaError::Service(ServiceError::BadResult { status, .. })
            if status == StatusCode::BAD_SERVICE_UNSUPPORTED
    ));
}

#[tokio::test]
async fn test_channel_close_sends_clo() {
    let (mut channel, server) = open_channel(ServerScript::default()).await;

    within(channel.close()).await;

    eventually(|| server.channel_closed()).await;
    assert_eq!(
        server.requests(),
        ["OpenSecureChannelRequest", "CloseSecureChannelRequest"]
    );
}

#[tokio::test]
async fn test_channel_open_fails_when_server_drops() {
    let config = ConfigFixtures::local();
    let (mut connection, server) = MockServer::start(ServerScript::default());
    handshake(&mut connection, &config.hello()).await.unwrap();
    server.disconnect().await;

    let mut channel = SecureChannel::new(connection, &config);
    let error = within(channel.open()).await.unwrap_err();

    assert_eq!(error.category(), "transport");
    assert_eq!(channel.channel_id(), 0);
}
