// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client configuration.
//!
//! A [`ClientConfig`] can be built in code with [`ClientConfig::builder`] or
//! loaded from a YAML or TOML file. Selected fields can be overridden from
//! the environment:
//!
//! ```text
//! UACONV_ENDPOINT=opc.tcp://plc:4840
//! UACONV_SESSION_NAME=line-3
//! UACONV_USERNAME=operator
//! UACONV_PASSWORD=secret
//! ```
//!
//! # Example
//!
//! ```yaml
//! endpoint: opc.tcp://localhost:4840
//! request_timeout: 5s
//! session:
//!   name_prefix: line-3
//!   identity:
//!     type: user_name
//!     username: operator
//!     password: secret
//! subscription:
//!   publishing_interval: 500ms
//! ```

use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uaconv_proto::{
    ApplicationDescription, ApplicationType, Hello, LocalizedText, MessageSecurityMode,
    SECURITY_POLICY_NONE,
};

use crate::error::{ConfigurationError, TransportError, UaError, UaResult};

/// Default environment variable prefix.
pub const ENV_PREFIX: &str = "UACONV";

// =============================================================================
// SecurityMode
// =============================================================================

/// OPC UA message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// No security (messages are neither signed nor encrypted).
    #[default]
    None,

    /// Messages are signed but not encrypted.
    Sign,

    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

impl SecurityMode {
    /// Returns `true` if this mode provides no security.
    #[inline]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        }
    }

    /// Returns the wire enumeration.
    pub const fn to_message_security_mode(self) -> MessageSecurityMode {
        match self {
            Self::None => MessageSecurityMode::None,
            Self::Sign => MessageSecurityMode::Sign,
            Self::SignAndEncrypt => MessageSecurityMode::SignAndEncrypt,
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SecurityMode {
    type Err = UaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" | "nosecurity" => Ok(Self::None),
            "sign" | "signed" => Ok(Self::Sign),
            "signandencrypt" | "signencrypt" | "encrypted" => Ok(Self::SignAndEncrypt),
            _ => Err(UaError::invalid_config("security_mode", format!("unknown mode '{s}'"))),
        }
    }
}

// =============================================================================
// SecurityPolicy
// =============================================================================

/// OPC UA security policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    /// No security policy.
    #[default]
    None,

    /// Basic256Sha256.
    Basic256Sha256,

    /// Aes128Sha256RsaOaep.
    Aes128Sha256RsaOaep,

    /// Aes256Sha256RsaPss.
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    /// Returns the OPC UA policy URI.
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::None => SECURITY_POLICY_NONE,
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
            Self::Aes128Sha256RsaOaep => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep"
            }
            Self::Aes256Sha256RsaPss => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss"
            }
        }
    }

    /// Returns the short name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Basic256Sha256 => "Basic256Sha256",
            Self::Aes128Sha256RsaOaep => "Aes128Sha256RsaOaep",
            Self::Aes256Sha256RsaPss => "Aes256Sha256RsaPss",
        }
    }

    /// Creates from URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            s if s.ends_with("#None") => Some(Self::None),
            s if s.ends_with("#Basic256Sha256") => Some(Self::Basic256Sha256),
            s if s.contains("Aes128_Sha256_RsaOaep") => Some(Self::Aes128Sha256RsaOaep),
            s if s.contains("Aes256_Sha256_RsaPss") => Some(Self::Aes256Sha256RsaPss),
            _ => Option::None,
        }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SecurityPolicy {
    type Err = UaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(policy) = Self::from_uri(s) {
            return Ok(policy);
        }

        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(Self::None),
            "basic256sha256" => Ok(Self::Basic256Sha256),
            "aes128sha256rsaoaep" | "aes128" => Ok(Self::Aes128Sha256RsaOaep),
            "aes256sha256rsapss" | "aes256" => Ok(Self::Aes256Sha256RsaPss),
            _ => Err(UaError::invalid_config(
                "security_policy",
                format!("unknown policy '{s}'"),
            )),
        }
    }
}

// =============================================================================
// IdentityConfig
// =============================================================================

/// How the session authenticates its user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityConfig {
    /// Anonymous user.
    #[default]
    Anonymous,

    /// Username and password.
    UserName {
        /// The username.
        username: String,
        /// The password.
        password: String,
    },

    /// X.509 certificate.
    Certificate {
        /// Path to the DER certificate file.
        certificate_path: String,
        /// Path to the private key file.
        private_key_path: String,
    },
}

impl IdentityConfig {
    /// Returns the type name.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Anonymous => "Anonymous",
            Self::UserName { .. } => "UserName",
            Self::Certificate { .. } => "Certificate",
        }
    }
}

impl fmt::Display for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UserName { username, .. } => write!(f, "UserName({username})"),
            Self::Certificate { certificate_path, .. } => {
                write!(f, "Certificate({certificate_path})")
            }
        }
    }
}

// =============================================================================
// ClientConfig
// =============================================================================

/// Complete client configuration.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use uaconv_client::config::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .endpoint("opc.tcp://localhost:4840")
///     .request_timeout(Duration::from_secs(5))
///     .build()
///     .unwrap();
/// assert_eq!(config.session.name_prefix, "uaconv");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint URL (e.g., "opc.tcp://localhost:4840").
    pub endpoint: String,

    /// Application name sent in the client description.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Application URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_uri: Option<String>,

    /// Product URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_uri: Option<String>,

    /// Timeout for a single request/response exchange.
    #[serde(default = "default_request_timeout")]
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// TCP connect timeout.
    #[serde(default = "default_connect_timeout")]
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Secure channel settings.
    #[serde(default)]
    pub channel: ChannelSettings,

    /// Session settings.
    #[serde(default)]
    pub session: SessionSettings,

    /// Default subscription settings.
    #[serde(default)]
    pub subscription: SubscriptionSettings,

    /// Publish loop settings.
    #[serde(default)]
    pub publish: PublishSettings,
}

fn default_application_name() -> String {
    "uaconv".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

impl ClientConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Creates a configuration with defaults and the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Loads a configuration file; the format follows the extension.
    ///
    /// Environment overrides are applied before validation.
    pub fn load(path: impl AsRef<Path>) -> UaResult<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read(path.display().to_string(), e))?;
        let mut config = Self::parse(&content, format)
            .map_err(|message| ConfigurationError::parse(path.display().to_string(), message))?;

        config.apply_env_overrides();
        config.validate()?;

        debug!(endpoint = %config.endpoint, identity = %config.session.identity, "Configuration loaded");
        Ok(config)
    }

    /// Parses and validates a configuration string.
    pub fn load_from_str(content: &str, format: ConfigFormat) -> UaResult<Self> {
        let config = Self::parse(content, format)
            .map_err(|message| ConfigurationError::parse("<string>", message))?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str, format: ConfigFormat) -> Result<Self, String> {
        match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        }
    }

    /// Applies `UACONV_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(format!("{ENV_PREFIX}_{key}")).ok());
    }

    /// Applies overrides from `lookup`, which maps an unprefixed key such as
    /// `ENDPOINT` to a value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup("ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(prefix) = lookup("SESSION_NAME") {
            self.session.name_prefix = prefix;
        }
        if let Some(username) = lookup("USERNAME") {
            let password = lookup("PASSWORD").unwrap_or_default();
            self.session.identity = IdentityConfig::UserName { username, password };
        }
    }

    /// Validates this configuration.
    pub fn validate(&self) -> UaResult<()> {
        if self.endpoint.is_empty() {
            return Err(UaError::invalid_config("endpoint", "must not be empty"));
        }
        if !self.endpoint.starts_with("opc.tcp://") {
            return Err(TransportError::invalid_endpoint(
                &self.endpoint,
                "Endpoint must start with opc.tcp://",
            )
            .into());
        }

        if self.channel.security_mode.is_none() != (self.channel.security_policy == SecurityPolicy::None)
        {
            return Err(UaError::invalid_config(
                "channel",
                "security mode and policy must both be None or both be set",
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(UaError::invalid_config("request_timeout", "must be greater than 0"));
        }
        if self.session.timeout.is_zero() {
            return Err(UaError::invalid_config("session.timeout", "must be greater than 0"));
        }
        if self.session.name_prefix.is_empty() {
            return Err(UaError::invalid_config("session.name_prefix", "must not be empty"));
        }
        if let IdentityConfig::UserName { username, .. } = &self.session.identity {
            if username.is_empty() {
                return Err(UaError::invalid_config(
                    "session.identity.username",
                    "must not be empty",
                ));
            }
        }

        self.subscription.validate()?;
        Ok(())
    }

    /// Returns the effective application URI.
    pub fn effective_application_uri(&self) -> String {
        self.application_uri
            .clone()
            .unwrap_or_else(|| format!("urn:uaconv:{}", self.application_name.replace(' ', "")))
    }

    /// Client description sent in CreateSession.
    pub fn application_description(&self) -> ApplicationDescription {
        ApplicationDescription {
            application_uri: self.effective_application_uri(),
            product_uri: self.product_uri.clone().unwrap_or_default(),
            application_name: LocalizedText::new(&self.application_name),
            application_type: ApplicationType::Client,
            ..Default::default()
        }
    }

    /// Hello message for the configured endpoint and buffer sizes.
    pub fn hello(&self) -> Hello {
        Hello {
            version: 0,
            receive_buffer_size: self.channel.receive_buffer_size,
            send_buffer_size: self.channel.send_buffer_size,
            max_message_size: self.channel.max_message_size,
            max_chunk_count: self.channel.max_chunk_count,
            endpoint_url: self.endpoint.clone(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            application_name: default_application_name(),
            application_uri: None,
            product_uri: None,
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            channel: ChannelSettings::default(),
            session: SessionSettings::default(),
            subscription: SubscriptionSettings::default(),
            publish: PublishSettings::default(),
        }
    }
}

// =============================================================================
// ClientConfigBuilder
// =============================================================================

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    endpoint: Option<String>,
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Sets the endpoint URL.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.application_name = name.into();
        self
    }

    /// Sets the application URI.
    pub fn application_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.application_uri = Some(uri.into());
        self
    }

    /// Sets the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the session name prefix.
    pub fn session_name(mut self, prefix: impl Into<String>) -> Self {
        self.config.session.name_prefix = prefix.into();
        self
    }

    /// Sets the requested session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session.timeout = timeout;
        self
    }

    /// Sets the preferred locales.
    pub fn locale_ids<I, S>(mut self, locales: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.session.locale_ids = locales.into_iter().map(Into::into).collect();
        self
    }

    /// Uses username authentication.
    pub fn username(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.session.identity = IdentityConfig::UserName {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    /// Uses anonymous authentication.
    pub fn anonymous(mut self) -> Self {
        self.config.session.identity = IdentityConfig::Anonymous;
        self
    }

    /// Uses certificate authentication.
    pub fn certificate_auth(
        mut self,
        certificate_path: impl Into<String>,
        private_key_path: impl Into<String>,
    ) -> Self {
        self.config.session.identity = IdentityConfig::Certificate {
            certificate_path: certificate_path.into(),
            private_key_path: private_key_path.into(),
        };
        self
    }

    /// Sets the channel settings.
    pub fn channel(mut self, settings: ChannelSettings) -> Self {
        self.config.channel = settings;
        self
    }

    /// Sets the default subscription settings.
    pub fn subscription(mut self, settings: SubscriptionSettings) -> Self {
        self.config.subscription = settings;
        self
    }

    /// Sets the publish loop settings.
    pub fn publish(mut self, settings: PublishSettings) -> Self {
        self.config.publish = settings;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> UaResult<ClientConfig> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| UaError::invalid_config("endpoint", "is required"))?;
        let config = ClientConfig {
            endpoint,
            ..self.config
        };
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// ChannelSettings
// =============================================================================

/// Secure channel and UACP buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Security mode.
    #[serde(default)]
    pub security_mode: SecurityMode,

    /// Security policy.
    #[serde(default)]
    pub security_policy: SecurityPolicy,

    /// Requested security token lifetime.
    #[serde(default = "default_channel_lifetime")]
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,

    /// Largest chunk the client can receive.
    #[serde(default = "default_buffer_size")]
    pub receive_buffer_size: u32,

    /// Largest chunk the client will send.
    #[serde(default = "default_buffer_size")]
    pub send_buffer_size: u32,

    /// Largest message the client accepts (0 = no limit).
    #[serde(default)]
    pub max_message_size: u32,

    /// Largest chunk count the client accepts (0 = no limit).
    #[serde(default)]
    pub max_chunk_count: u32,
}

fn default_channel_lifetime() -> Duration {
    Duration::from_secs(3600)
}

fn default_buffer_size() -> u32 {
    65535
}

impl ChannelSettings {
    /// Requested lifetime in milliseconds, saturating at `u32::MAX`.
    pub fn lifetime_millis(&self) -> u32 {
        u32::try_from(self.lifetime.as_millis()).unwrap_or(u32::MAX)
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            security_mode: SecurityMode::default(),
            security_policy: SecurityPolicy::default(),
            lifetime: default_channel_lifetime(),
            receive_buffer_size: default_buffer_size(),
            send_buffer_size: default_buffer_size(),
            max_message_size: 0,
            max_chunk_count: 0,
        }
    }
}

// =============================================================================
// SessionSettings
// =============================================================================

/// Session establishment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Session name prefix; the name sent is `<prefix>-<unix nanos>`.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Requested session timeout.
    #[serde(default = "default_session_timeout")]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Preferred locales, most preferred first.
    #[serde(default)]
    pub locale_ids: Vec<String>,

    /// User identity.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Largest response the client accepts (0 = no limit).
    #[serde(default)]
    pub max_response_message_size: u32,
}

fn default_name_prefix() -> String {
    "uaconv".to_string()
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            timeout: default_session_timeout(),
            locale_ids: Vec::new(),
            identity: IdentityConfig::default(),
            max_response_message_size: 0,
        }
    }
}

// =============================================================================
// SubscriptionSettings
// =============================================================================

/// Subscription and monitored item defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Publishing interval.
    #[serde(default = "default_publishing_interval")]
    #[serde(with = "humantime_serde")]
    pub publishing_interval: Duration,

    /// Lifetime count (publishing intervals before the subscription expires).
    #[serde(default = "default_lifetime_count")]
    pub lifetime_count: u32,

    /// Max keep-alive count.
    #[serde(default = "default_keepalive_count")]
    pub keepalive_count: u32,

    /// Maximum notifications per publish (0 = unlimited).
    #[serde(default = "default_max_notifications")]
    pub max_notifications_per_publish: u32,

    /// Priority (0-255, higher is more important).
    #[serde(default)]
    pub priority: u8,

    /// Publishing enabled.
    #[serde(default = "default_true")]
    pub publishing_enabled: bool,

    /// Sampling interval requested for each monitored item.
    #[serde(default = "default_sampling_interval")]
    #[serde(with = "humantime_serde")]
    pub sampling_interval: Duration,

    /// Server-side queue size per monitored item.
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,

    /// Discard the oldest value when the server queue is full.
    #[serde(default = "default_true")]
    pub discard_oldest: bool,
}

fn default_publishing_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_lifetime_count() -> u32 {
    60
}

fn default_keepalive_count() -> u32 {
    10
}

fn default_max_notifications() -> u32 {
    65535
}

fn default_sampling_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_queue_size() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            publishing_interval: default_publishing_interval(),
            lifetime_count: default_lifetime_count(),
            keepalive_count: default_keepalive_count(),
            max_notifications_per_publish: default_max_notifications(),
            priority: 0,
            publishing_enabled: true,
            sampling_interval: default_sampling_interval(),
            queue_size: default_queue_size(),
            discard_oldest: true,
        }
    }
}

impl SubscriptionSettings {
    /// Creates settings for fast sampling (100ms publishing interval).
    pub fn fast() -> Self {
        Self {
            publishing_interval: Duration::from_millis(100),
            sampling_interval: Duration::from_millis(100),
            keepalive_count: 5,
            ..Default::default()
        }
    }

    /// Creates settings with a custom publishing interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            publishing_interval: interval,
            ..Default::default()
        }
    }

    /// Publishing interval in milliseconds as sent on the wire.
    pub fn publishing_interval_millis(&self) -> f64 {
        self.publishing_interval.as_secs_f64() * 1000.0
    }

    /// Sampling interval in milliseconds as sent on the wire.
    pub fn sampling_interval_millis(&self) -> f64 {
        self.sampling_interval.as_secs_f64() * 1000.0
    }

    /// Validates the settings.
    pub fn validate(&self) -> UaResult<()> {
        if self.publishing_interval.is_zero() {
            return Err(UaError::invalid_config(
                "subscription.publishing_interval",
                "must be greater than 0",
            ));
        }
        if self.keepalive_count == 0 {
            return Err(UaError::invalid_config(
                "subscription.keepalive_count",
                "must be greater than 0",
            ));
        }
        if self.lifetime_count < self.keepalive_count.saturating_mul(3) {
            return Err(UaError::invalid_config(
                "subscription.lifetime_count",
                format!(
                    "must be at least three times keepalive_count ({})",
                    self.keepalive_count
                ),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// PublishSettings
// =============================================================================

/// Publish loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSettings {
    /// How long one PublishRequest may stay outstanding.
    #[serde(default = "default_publish_timeout")]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Delay before retrying after a failed publish.
    #[serde(default = "default_retry_delay")]
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

fn default_publish_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            timeout: default_publish_timeout(),
            retry_delay: default_retry_delay(),
        }
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> UaResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            _ => Err(ConfigurationError::UnsupportedFormat {
                path: path.display().to_string(),
            }
            .into()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const YAML: &str = r#"
endpoint: opc.tcp://localhost:4840
request_timeout: 5s
session:
  name_prefix: line-3
  locale_ids: [en, de]
  identity:
    type: user_name
    username: operator
    password: secret
subscription:
  publishing_interval: 500ms
  lifetime_count: 30
  keepalive_count: 10
"#;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("opc.tcp://localhost:4840");
        assert!(config.validate().is_ok());
        assert_eq!(config.session.name_prefix, "uaconv");
        assert_eq!(config.channel.receive_buffer_size, 65535);
        assert_eq!(config.channel.lifetime_millis(), 3_600_000);
        assert_eq!(config.subscription.publishing_interval_millis(), 1000.0);
        assert_eq!(config.session.identity, IdentityConfig::Anonymous);
    }

    #[test]
    fn test_load_yaml() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.session.locale_ids, vec!["en", "de"]);
        assert_eq!(
            config.subscription.publishing_interval,
            Duration::from_millis(500)
        );
        assert!(matches!(
            config.session.identity,
            IdentityConfig::UserName { ref username, .. } if username == "operator"
        ));
    }

    #[test]
    fn test_load_toml() {
        let toml = r#"
endpoint = "opc.tcp://plc:4840"
connect_timeout = "2s"

[channel]
receive_buffer_size = 8192
"#;
        let config = ClientConfig::load_from_str(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.channel.receive_buffer_size, 8192);
        assert_eq!(config.channel.send_buffer_size, 65535);
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("client.yml")).unwrap(),
            ConfigFormat::Yaml
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("client.toml")).unwrap(),
            ConfigFormat::Toml
        );
        assert!(ConfigFormat::from_path(Path::new("client.json")).is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ENDPOINT", "opc.tcp://override:4841"),
            ("USERNAME", "admin"),
            ("PASSWORD", "pw"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::new("opc.tcp://localhost:4840");
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.endpoint, "opc.tcp://override:4841");
        assert_eq!(
            config.session.identity,
            IdentityConfig::UserName {
                username: "admin".into(),
                password: "pw".into()
            }
        );
    }

    #[test]
    fn test_validation() {
        assert!(ClientConfig::builder().build().is_err());
        assert!(ClientConfig::builder().endpoint("http://x").build().is_err());

        let secured = ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .channel(ChannelSettings {
                security_mode: SecurityMode::Sign,
                ..Default::default()
            })
            .build();
        assert!(secured.is_err());

        // A consistent mode and policy is valid; the connector checks the signer.
        let signed = ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .channel(ChannelSettings {
                security_mode: SecurityMode::Sign,
                security_policy: SecurityPolicy::Basic256Sha256,
                ..Default::default()
            })
            .build();
        assert!(signed.is_ok());

        let bad_lifetime = SubscriptionSettings {
            lifetime_count: 5,
            keepalive_count: 10,
            ..Default::default()
        };
        assert!(bad_lifetime.validate().is_err());
    }

    #[test]
    fn test_security_parsing() {
        assert_eq!("sign-and-encrypt".parse::<SecurityMode>().unwrap(), SecurityMode::SignAndEncrypt);
        assert_eq!(
            "http://opcfoundation.org/UA/SecurityPolicy#None"
                .parse::<SecurityPolicy>()
                .unwrap(),
            SecurityPolicy::None
        );
        assert!("rot13".parse::<SecurityPolicy>().is_err());
        assert_eq!(SecurityMode::None.to_message_security_mode(), MessageSecurityMode::None);
    }

    #[test]
    fn test_hello_from_config() {
        let config = ClientConfig::new("opc.tcp://wow.its.easy:11111/UA/Server");
        let hello = config.hello();
        assert_eq!(hello.message_size(), 70);
        assert_eq!(hello.send_buffer_size, 65535);
    }

    #[test]
    fn test_application_description() {
        let config = ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .application_name("Line Monitor")
            .build()
            .unwrap();
        let description = config.application_description();
        assert_eq!(description.application_uri, "urn:uaconv:LineMonitor");
        assert_eq!(description.application_type, ApplicationType::Client);
    }
}
