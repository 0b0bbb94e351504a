// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! User identity tokens.
//!
//! The session asks an [`IdentityEncoder`] to turn the configured
//! [`IdentityToken`] into the extension object sent with ActivateSession.
//! [`PlainIdentityEncoder`] sends the token unencrypted, which is what the
//! `None` policy allows.

use std::fmt;
use std::fs;

use uaconv_proto::structures::encoding_id;
use uaconv_proto::{
    AnonymousIdentityToken, EndpointDescription, ExtensionObject, UserNameIdentityToken,
    UserTokenType, X509IdentityToken,
};

use crate::config::IdentityConfig;
use crate::error::{ConfigurationError, UaResult};

/// A user identity ready to be encoded.
#[derive(Clone, PartialEq, Eq)]
pub enum IdentityToken {
    /// Anonymous user.
    Anonymous,
    /// Username and password.
    UserName {
        /// The username.
        username: String,
        /// The password.
        password: String,
    },
    /// DER certificate.
    X509 {
        /// The certificate.
        certificate: Vec<u8>,
    },
}

impl IdentityToken {
    /// Builds the token from configuration, reading certificate files.
    pub fn from_config(config: &IdentityConfig) -> UaResult<Self> {
        Ok(match config {
            IdentityConfig::Anonymous => Self::Anonymous,
            IdentityConfig::UserName { username, password } => Self::UserName {
                username: username.clone(),
                password: password.clone(),
            },
            IdentityConfig::Certificate {
                certificate_path, ..
            } => Self::X509 {
                certificate: fs::read(certificate_path)
                    .map_err(|e| ConfigurationError::file_read(certificate_path, e))?,
            },
        })
    }

    /// The matching user token type.
    pub fn token_type(&self) -> UserTokenType {
        match self {
            Self::Anonymous => UserTokenType::Anonymous,
            Self::UserName { .. } => UserTokenType::UserName,
            Self::X509 { .. } => UserTokenType::Certificate,
        }
    }

    /// Picks the policy id the server advertises for this token type,
    /// falling back to a conventional name.
    pub fn policy_id(&self, endpoints: &[EndpointDescription]) -> String {
        let token_type = self.token_type();
        endpoints
            .iter()
            .flat_map(|endpoint| endpoint.user_identity_tokens.iter())
            .find(|policy| policy.token_type == token_type)
            .map(|policy| policy.policy_id.clone())
            .unwrap_or_else(|| {
                match token_type {
                    UserTokenType::Anonymous => "anonymous",
                    UserTokenType::UserName => "username",
                    _ => "certificate",
                }
                .to_string()
            })
    }
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::UserName { username, .. } => f
                .debug_struct("UserName")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::X509 { certificate } => f
                .debug_struct("X509")
                .field("certificate", &format_args!("{} bytes", certificate.len()))
                .finish(),
        }
    }
}

/// Converts an identity token into its wire form.
pub trait IdentityEncoder: Send + Sync + fmt::Debug {
    /// Encodes `token` under `policy_id`. `server_nonce` is available for
    /// policies that encrypt the secret.
    fn encode(
        &self,
        token: &IdentityToken,
        policy_id: &str,
        server_nonce: &[u8],
    ) -> UaResult<ExtensionObject>;
}

/// Sends tokens without encryption.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainIdentityEncoder;

impl IdentityEncoder for PlainIdentityEncoder {
    fn encode(
        &self,
        token: &IdentityToken,
        policy_id: &str,
        _server_nonce: &[u8],
    ) -> UaResult<ExtensionObject> {
        let policy_id = policy_id.to_string();
        Ok(match token {
            IdentityToken::Anonymous => ExtensionObject::from_encodable(
                encoding_id::ANONYMOUS_IDENTITY_TOKEN,
                &AnonymousIdentityToken { policy_id },
            ),
            IdentityToken::UserName { username, password } => ExtensionObject::from_encodable(
                encoding_id::USER_NAME_IDENTITY_TOKEN,
                &UserNameIdentityToken {
                    policy_id,
                    user_name: username.clone(),
                    password: password.as_bytes().into(),
                    encryption_algorithm: String::new(),
                },
            ),
            IdentityToken::X509 { certificate } => ExtensionObject::from_encodable(
                encoding_id::X509_IDENTITY_TOKEN,
                &X509IdentityToken {
                    policy_id,
                    certificate_data: certificate.clone().into(),
                },
            ),
        })
    }
}
