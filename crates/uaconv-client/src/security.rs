// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Signature strategies.
//!
//! Session establishment exchanges signatures over `certificate || nonce`.
//! How they are computed depends on the security policy; the session only
//! talks to a [`Signer`]. [`NoneSigner`] serves the `None` policy; any other
//! policy is usable only with an injected signer for that policy.

use std::fmt;

use rand::RngCore;
use uaconv_proto::SignatureData;

use crate::config::SecurityPolicy;
use crate::error::{SessionError, UaError, UaResult};

/// Length of generated nonces.
pub const NONCE_LENGTH: usize = 32;

/// Creates a random nonce.
pub fn generate_nonce() -> Vec<u8> {
    let mut nonce = vec![0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// The data a session signature covers: `certificate || nonce`.
pub fn signing_input(certificate: &[u8], nonce: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(certificate.len() + nonce.len());
    data.extend_from_slice(certificate);
    data.extend_from_slice(nonce);
    data
}

/// Produces and checks signatures for one security policy.
pub trait Signer: Send + Sync + fmt::Debug {
    /// Policy the signer implements.
    fn policy(&self) -> SecurityPolicy;

    /// Algorithm URI placed in [`SignatureData::algorithm`].
    fn algorithm(&self) -> &str;

    /// Signs `data`.
    fn sign(&self, data: &[u8]) -> UaResult<SignatureData>;

    /// Checks `signature` over `data`.
    fn verify(&self, data: &[u8], signature: &SignatureData) -> UaResult<()>;
}

/// Signer for the `None` policy: empty signatures, everything verifies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneSigner;

impl Signer for NoneSigner {
    fn policy(&self) -> SecurityPolicy {
        SecurityPolicy::None
    }

    fn algorithm(&self) -> &str {
        ""
    }

    fn sign(&self, _data: &[u8]) -> UaResult<SignatureData> {
        Ok(SignatureData::default())
    }

    fn verify(&self, _data: &[u8], _signature: &SignatureData) -> UaResult<()> {
        Ok(())
    }
}

/// Checks that the configured policy is served by `signer`, or by
/// [`NoneSigner`] when none is injected.
pub fn check_policy(policy: SecurityPolicy, signer: Option<&dyn Signer>) -> UaResult<()> {
    let offered = signer.map_or(SecurityPolicy::None, |signer| signer.policy());
    if offered == policy {
        return Ok(());
    }
    let reason = match signer {
        Some(_) => format!("policy {policy} does not match the signer's policy {offered}"),
        None => format!("policy {policy} needs a signer for that policy"),
    };
    Err(UaError::invalid_config("channel.security_policy", reason))
}

/// Fails verification of any non-empty signature whose algorithm differs
/// from the signer's.
pub(crate) fn check_algorithm(signer: &dyn Signer, signature: &SignatureData) -> UaResult<()> {
    if signature.is_empty() || signature.algorithm == signer.algorithm() {
        Ok(())
    } else {
        Err(SessionError::SignatureInvalid.into())
    }
}
