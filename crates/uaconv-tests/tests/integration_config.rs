// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Configuration Integration Tests
//!
//! Loading configuration files from disk and connecting with the result.

use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use uaconv_client::{
    Client, ClientConfig, ConfigFormat, ConfigurationError, IdentityConfig, SessionState,
    TransportError, UaError,
};
use uaconv_tests::prelude::*;

#[test]
fn test_load_yaml_file() {
    let dir = temp_test_dir("uaconv-config");
    let path = dir.path().join("client.yaml");
    fs::write(&path, ConfigFixtures::yaml()).unwrap();

    let config = ClientConfig::load(&path).unwrap();

    assert_eq!(config.application_name, "fixture");
    assert_eq!(config.request_timeout, Duration::from_secs(2));
    assert_eq!(config.session.name_prefix, "fixture");
    assert_eq!(config.subscription.publishing_interval, Duration::from_millis(250));
    assert_eq!(config.subscription.queue_size, 4);
    assert_eq!(config.publish.retry_delay, Duration::from_millis(20));
    assert!(matches!(config.session.identity, IdentityConfig::Anonymous));
}

#[test]
fn test_load_toml_file() {
    let dir = temp_test_dir("uaconv-config");
    let path = dir.path().join("client.toml");
    fs::write(
        &path,
        format!(
            r#"
endpoint = "{TEST_ENDPOINT}"
request_timeout = "3s"

[session]
name_prefix = "toml"

[session.identity]
type = "user_name"
username = "operator"
password = "secret"
"#
        ),
    )
    .unwrap();

    let config = ClientConfig::load(&path).unwrap();

    assert_eq!(config.request_timeout, Duration::from_secs(3));
    assert_eq!(config.session.name_prefix, "toml");
    assert!(matches!(
        config.session.identity,
        IdentityConfig::UserName { ref username, .. } if username == "operator"
    ));
}

#[test]
fn test_unsupported_extension() {
    let dir = temp_test_dir("uaconv-config");
    let path = dir.path().join("client.ini");
    fs::write(&path, "endpoint=opc.tcp://localhost:4840").unwrap();

    let error = ClientConfig::load(&path).unwrap_err();

    assert!(matches!(
        error,
        UaError::Configuration(ConfigurationError::UnsupportedFormat { .. })
    ));
}

#[test]
fn test_invalid_endpoint_rejected() {
    let error = ClientConfig::load_from_str("endpoint: http://localhost:4840", ConfigFormat::Yaml)
        .unwrap_err();

    assert!(matches!(
        error,
        UaError::Transport(TransportError::InvalidEndpoint { .. })
    ));
    assert_eq!(error.category(), "transport");
}

#[test]
fn test_overrides_from_lookup() {
    let mut config = ClientConfig::load_from_str(&ConfigFixtures::yaml(), ConfigFormat::Yaml).unwrap();
    let vars: HashMap<&str, &str> = [
        ("ENDPOINT", "opc.tcp://plant:4841"),
        ("USERNAME", "operator"),
    ]
    .into_iter()
    .collect();

    config.apply_overrides(|key| vars.get(key).map(|value| value.to_string()));

    assert_eq!(config.endpoint, "opc.tcp://plant:4841");
    assert!(matches!(
        config.session.identity,
        IdentityConfig::UserName { ref password, .. } if password.is_empty()
    ));
    assert_eq!(config.session.name_prefix, "fixture");
    config.validate().unwrap();
}

#[tokio::test]
async fn test_loaded_config_connects() {
    let config = ClientConfig::load_from_str(&ConfigFixtures::yaml(), ConfigFormat::Yaml).unwrap();
    let (connection, server) = MockServer::start(ServerScript::default());

    let client = within(Client::connector(config).connect_stream(connection))
        .await
        .unwrap();

    assert_eq!(client.session_state().await, SessionState::Activated);
    assert_eq!(server.hello().unwrap().endpoint_url, TEST_ENDPOINT);
    client.close().await.unwrap();
}
