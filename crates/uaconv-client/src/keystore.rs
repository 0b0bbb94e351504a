// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Certificate and private key storage.
//!
//! Key pairs are indexed by the SHA-1 thumbprint of their DER certificate,
//! the same value OPC UA puts in `receiver_certificate_thumbprint`. A store
//! belongs to one client and is shared with its channel and session via
//! `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use uaconv_proto::ByteString;

use crate::error::{ConfigurationError, UaResult};

/// Hex SHA-1 thumbprint of a DER certificate.
pub fn thumbprint(certificate: &[u8]) -> String {
    hex::encode(Sha1::digest(certificate))
}

/// A certificate and its private key.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// DER certificate.
    pub certificate: Vec<u8>,
    /// Private key bytes.
    pub private_key: Vec<u8>,
}

impl KeyPair {
    /// Creates a key pair.
    pub fn new(certificate: Vec<u8>, private_key: Vec<u8>) -> Self {
        Self {
            certificate,
            private_key,
        }
    }

    /// Reads both files.
    pub fn load(certificate_path: impl AsRef<Path>, private_key_path: impl AsRef<Path>) -> UaResult<Self> {
        let read = |path: &Path| {
            fs::read(path).map_err(|e| ConfigurationError::file_read(path.display().to_string(), e))
        };
        Ok(Self::new(
            read(certificate_path.as_ref())?,
            read(private_key_path.as_ref())?,
        ))
    }

    /// Thumbprint of the certificate.
    pub fn thumbprint(&self) -> String {
        thumbprint(&self.certificate)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("thumbprint", &self.thumbprint())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Key pairs keyed by thumbprint, plus the client's own pair.
#[derive(Debug, Default)]
pub struct KeyStore {
    pairs: RwLock<HashMap<String, Arc<KeyPair>>>,
    local: RwLock<Option<String>>,
}

impl KeyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose local pair is `pair`.
    pub fn with_local(pair: KeyPair) -> Self {
        let store = Self::new();
        store.set_local(pair);
        store
    }

    /// Adds a pair and returns its thumbprint. An existing entry is replaced.
    pub fn insert(&self, pair: KeyPair) -> String {
        let thumbprint = pair.thumbprint();
        self.pairs.write().insert(thumbprint.clone(), Arc::new(pair));
        thumbprint
    }

    /// Adds a pair and makes it the local one.
    pub fn set_local(&self, pair: KeyPair) -> String {
        let thumbprint = self.insert(pair);
        *self.local.write() = Some(thumbprint.clone());
        thumbprint
    }

    /// Looks up a pair by thumbprint.
    pub fn get(&self, thumbprint: &str) -> Option<Arc<KeyPair>> {
        self.pairs.read().get(thumbprint).cloned()
    }

    /// Removes a pair. Removing the local pair clears it.
    pub fn remove(&self, thumbprint: &str) -> Option<Arc<KeyPair>> {
        let removed = self.pairs.write().remove(thumbprint);
        let mut local = self.local.write();
        if local.as_deref() == Some(thumbprint) {
            *local = None;
        }
        removed
    }

    /// The client's own pair.
    pub fn local(&self) -> Option<Arc<KeyPair>> {
        let local = self.local.read().clone()?;
        self.get(&local)
    }

    /// The local certificate, or a null byte string without one.
    pub fn local_certificate(&self) -> ByteString {
        self.local()
            .map(|pair| ByteString::from(pair.certificate.clone()))
            .unwrap_or_default()
    }

    /// Number of stored pairs.
    pub fn len(&self) -> usize {
        self.pairs.read().len()
    }

    /// Returns `true` if no pair is stored.
    pub fn is_empty(&self) -> bool {
        self.pairs.read().is_empty()
    }
}
