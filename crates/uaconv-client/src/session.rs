// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA session management.
//!
//! A session is established in two steps over an open secure channel:
//! CreateSession, which exchanges nonces and certificates, and
//! ActivateSession, which proves possession of the client key and presents
//! the user identity.
//!
//! ```text
//! Unestablished ──create──▶ Created ──activate──▶ Activated ──close──▶ Closed
//!        │                     │
//!        └──── failure ────────┴──────▶ Failed (refuses open)
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uaconv_proto::{
    ActivateSessionRequest, ActivateSessionResponse, ByteString, CloseSessionRequest,
    CloseSessionResponse, CreateSessionRequest, CreateSessionResponse, EndpointDescription,
    NodeId, SignatureData,
};

use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{SessionError, UaResult};
use crate::identity::{IdentityEncoder, IdentityToken, PlainIdentityEncoder};
use crate::keystore::KeyStore;
use crate::response::{expect, expect_good};
use crate::secure_channel::SecureChannel;
use crate::security::{check_algorithm, generate_nonce, signing_input, NoneSigner, Signer};

// =============================================================================
// SessionState
// =============================================================================

/// State of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing sent yet.
    #[default]
    Unestablished,

    /// CreateSession succeeded.
    Created,

    /// ActivateSession succeeded; the session is usable.
    Activated,

    /// The session was closed.
    Closed,

    /// Establishment failed; the session cannot be reused.
    Failed,
}

impl SessionState {
    /// Returns `true` if the session is usable.
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Activated)
    }

    /// Returns `true` if the session can no longer be opened.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// State name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unestablished => "Unestablished",
            Self::Created => "Created",
            Self::Activated => "Activated",
            Self::Closed => "Closed",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// SessionInfo
// =============================================================================

/// Parameters captured from CreateSession.
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    /// Session name sent to the server.
    pub name: String,

    /// Server-assigned session id.
    pub session_id: NodeId,

    /// Token carried in every request header.
    pub authentication_token: NodeId,

    /// Revised session timeout.
    pub revised_timeout: Duration,

    /// Largest request the server accepts (0 = no limit).
    pub max_request_message_size: u32,

    /// Latest server nonce.
    pub server_nonce: ByteString,

    /// Server certificate.
    pub server_certificate: ByteString,

    /// Endpoints reported by the server.
    pub server_endpoints: Vec<EndpointDescription>,
}

// =============================================================================
// Session
// =============================================================================

/// A session layered on a secure channel.
pub struct Session {
    config: Arc<ClientConfig>,
    keys: Arc<KeyStore>,
    signer: Arc<dyn Signer>,
    identity_encoder: Arc<dyn IdentityEncoder>,
    identity: IdentityToken,
    state: SessionState,
    info: Option<SessionInfo>,
    client_signature: SignatureData,
}

impl Session {
    /// Creates an unestablished session using the None policy strategies.
    ///
    /// Fails if the configured identity cannot be loaded.
    pub fn new(config: Arc<ClientConfig>, keys: Arc<KeyStore>) -> UaResult<Self> {
        let identity = IdentityToken::from_config(&config.session.identity)?;
        Ok(Self {
            config,
            keys,
            signer: Arc::new(NoneSigner),
            identity_encoder: Arc::new(PlainIdentityEncoder),
            identity,
            state: SessionState::Unestablished,
            info: None,
            client_signature: SignatureData::default(),
        })
    }

    /// Replaces the signer.
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = signer;
        self
    }

    /// Replaces the identity encoder.
    pub fn with_identity_encoder(mut self, encoder: Arc<dyn IdentityEncoder>) -> Self {
        self.identity_encoder = encoder;
        self
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Parameters from CreateSession, once created.
    pub fn info(&self) -> Option<&SessionInfo> {
        self.info.as_ref()
    }

    /// Authentication token, null before creation.
    pub fn authentication_token(&self) -> NodeId {
        self.info
            .as_ref()
            .map(|info| info.authentication_token.clone())
            .unwrap_or_default()
    }

    /// Creates and activates the session.
    ///
    /// Activation is never attempted if creation fails. Any failure leaves
    /// the session [`Failed`](SessionState::Failed).
    pub async fn open(&mut self, channel: &mut SecureChannel) -> UaResult<()> {
        if self.state != SessionState::Unestablished {
            return Err(SessionError::invalid_state("open", self.state.as_str()).into());
        }
        let result = match self.create(channel).await {
            Ok(()) => self.activate(channel).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            self.state = SessionState::Failed;
            e.log("Session establishment failed");
        }
        result
    }

    async fn create(&mut self, channel: &mut SecureChannel) -> UaResult<()> {
        let name = format!("{}-{}", self.config.session.name_prefix, unix_nanos());
        let nonce = generate_nonce();
        let certificate = self.keys.local_certificate();

        let request = CreateSessionRequest {
            client_description: self.config.application_description(),
            server_uri: String::new(),
            endpoint_url: self.config.endpoint.clone(),
            session_name: name.clone(),
            client_nonce: nonce.clone().into(),
            client_certificate: certificate.clone(),
            requested_session_timeout: self.config.session.timeout.as_millis() as f64,
            max_response_message_size: self.config.session.max_response_message_size,
        };
        let envelope = channel.request(request, &NodeId::null()).await?;
        let (_, response) = expect_good::<CreateSessionResponse>(envelope)?;

        // The server signs our certificate and nonce; we sign its pair.
        check_algorithm(self.signer.as_ref(), &response.server_signature)?;
        self.signer.verify(
            &signing_input(certificate.as_slice(), &nonce),
            &response.server_signature,
        )?;
        self.client_signature = self.signer.sign(&signing_input(
            response.server_certificate.as_slice(),
            response.server_nonce.as_slice(),
        ))?;

        info!(
            session_name = %name,
            session_id = %response.session_id,
            revised_timeout_ms = response.revised_session_timeout,
            "Session created"
        );
        self.info = Some(SessionInfo {
            name,
            session_id: response.session_id,
            authentication_token: response.authentication_token,
            revised_timeout: Duration::from_secs_f64(
                (response.revised_session_timeout / 1000.0).max(0.0),
            ),
            max_request_message_size: response.max_request_message_size,
            server_nonce: response.server_nonce,
            server_certificate: response.server_certificate,
            server_endpoints: response.server_endpoints,
        });
        self.state = SessionState::Created;
        Ok(())
    }

    async fn activate(&mut self, channel: &mut SecureChannel) -> UaResult<()> {
        let info = match (&self.info, self.state) {
            (Some(info), SessionState::Created) => info,
            _ => return Err(SessionError::invalid_state("activate", self.state.as_str()).into()),
        };

        let policy_id = self.identity.policy_id(&info.server_endpoints);
        let token = self.identity_encoder.encode(
            &self.identity,
            &policy_id,
            info.server_nonce.as_slice(),
        )?;
        debug!(
            token_type = ?self.identity.token_type(),
            policy_id = %policy_id,
            "Activating session"
        );

        let request = ActivateSessionRequest {
            client_signature: self.client_signature.clone(),
            client_software_certificates: Vec::new(),
            locale_ids: self.config.session.locale_ids.clone(),
            user_identity_token: token,
            user_token_signature: SignatureData::default(),
        };
        let authentication_token = info.authentication_token.clone();
        let envelope = channel.request(request, &authentication_token).await?;
        let (header, response) = expect::<ActivateSessionResponse>(envelope)?;

        if header.service_result.is_bad() {
            return Err(SessionError::ActivationRejected {
                status: header.service_result,
            }
            .into());
        }
        if let Some(status) = response.results.iter().find(|status| status.0 != 0) {
            return Err(SessionError::ActivationRejected { status: *status }.into());
        }

        if let Some(info) = self.info.as_mut() {
            info.server_nonce = response.server_nonce;
        }
        self.state = SessionState::Activated;
        info!("Session activated");
        Ok(())
    }

    /// Sends CloseSession (deleting subscriptions). The session is
    /// [`Closed`](SessionState::Closed) afterwards whatever the outcome.
    pub async fn close(&mut self, dispatcher: &Dispatcher) -> UaResult<()> {
        if self.state != SessionState::Activated {
            self.state = SessionState::Closed;
            return Ok(());
        }
        let result = dispatcher
            .call(CloseSessionRequest {
                delete_subscriptions: true,
            })
            .await
            .and_then(expect_good::<CloseSessionResponse>);
        self.state = SessionState::Closed;

        match result {
            Ok(_) => {
                info!("Session closed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "CloseSession failed");
                Err(e)
            }
        }
    }

    /// Marks the session failed, e.g. after the channel was lost.
    pub fn fail(&mut self) {
        self.state = SessionState::Failed;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("identity", &self.identity)
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}
