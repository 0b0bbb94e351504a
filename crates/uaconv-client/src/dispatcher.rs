// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Request-handle demultiplexer.
//!
//! After session activation the [`Dispatcher`] owns the channel. Writes go
//! through an async mutex; a reader task owns the read half and routes each
//! response to the slot registered under its request handle. This lets the
//! publish loop keep a PublishRequest outstanding while other requests run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uaconv_proto::{NodeId, ResponseEnvelope, ServiceRequest};

use crate::error::{TransportError, UaError, UaResult};
use crate::secure_channel::{ChannelReceiver, ChannelSender, SecureChannel};

type Slot = oneshot::Sender<UaResult<ResponseEnvelope>>;
type PendingMap = Arc<SyncMutex<HashMap<u32, Slot>>>;

// =============================================================================
// PendingResponse
// =============================================================================

/// A request that has been written and awaits its response.
#[derive(Debug)]
pub struct PendingResponse {
    request: &'static str,
    request_handle: u32,
    timeout: Duration,
    receiver: oneshot::Receiver<UaResult<ResponseEnvelope>>,
}

impl PendingResponse {
    /// Handle the request was sent with.
    pub fn request_handle(&self) -> u32 {
        self.request_handle
    }

    /// Waits for the response with the dispatcher's request timeout.
    pub async fn recv(self) -> UaResult<ResponseEnvelope> {
        let timeout = self.timeout;
        self.recv_timeout(timeout).await
    }

    /// Waits for the response with a custom timeout.
    pub async fn recv_timeout(self, timeout: Duration) -> UaResult<ResponseEnvelope> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(UaError::channel_closed()),
            Err(_) => Err(TransportError::RequestTimeout {
                request: self.request,
                duration: timeout,
            }
            .into()),
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Shares one secure channel between concurrent requests.
pub struct Dispatcher {
    sender: Mutex<ChannelSender>,
    pending: PendingMap,
    authentication_token: NodeId,
    timeout: Duration,
    cancel: CancellationToken,
    reader: SyncMutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Takes over `channel` and starts the reader task.
    ///
    /// Every request carries `authentication_token`.
    pub fn start(channel: SecureChannel, authentication_token: NodeId) -> Arc<Self> {
        let timeout = channel.request_timeout();
        let (sender, receiver) = channel.into_split();
        let pending = PendingMap::default();
        let cancel = CancellationToken::new();

        let reader = tokio::spawn(read_loop(receiver, Arc::clone(&pending), cancel.clone()));

        Arc::new(Self {
            sender: Mutex::new(sender),
            pending,
            authentication_token,
            timeout,
            cancel,
            reader: SyncMutex::new(Some(reader)),
        })
    }

    /// Default request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of requests awaiting a response.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` once the dispatcher has been closed or its reader
    /// has stopped.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Writes a request and returns the slot its response will arrive in.
    ///
    /// The slot is registered before the write so a fast response cannot
    /// be missed; it is removed again if the write fails.
    pub async fn send(&self, body: impl Into<ServiceRequest>) -> UaResult<PendingResponse> {
        if self.is_closed() {
            return Err(UaError::channel_closed());
        }
        let body = body.into();
        let request = body.name();
        let (tx, rx) = oneshot::channel();

        let mut sender = self.sender.lock().await;
        let handle = sender.next_request_handle();
        self.pending.lock().insert(handle, tx);
        // The reader may have drained the map between the check and the insert.
        if self.is_closed() {
            self.pending.lock().remove(&handle);
            return Err(UaError::channel_closed());
        }

        match sender.send(body, &self.authentication_token).await {
            Ok(sent) => {
                debug_assert_eq!(sent, handle);
                Ok(PendingResponse {
                    request,
                    request_handle: handle,
                    timeout: self.timeout,
                    receiver: rx,
                })
            }
            Err(e) => {
                self.pending.lock().remove(&handle);
                Err(e)
            }
        }
    }

    /// Sends a request and waits for its response.
    pub async fn call(&self, body: impl Into<ServiceRequest>) -> UaResult<ResponseEnvelope> {
        self.send(body).await?.recv().await
    }

    /// Stops the reader, closes the channel and fails every pending request.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.sender.lock().await.close().await;
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            let _ = reader.await;
        }
        fail_pending(&self.pending);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_loop(mut receiver: ChannelReceiver, pending: PendingMap, cancel: CancellationToken) {
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = receiver.recv() => result,
        };

        match result {
            Ok(envelope) => {
                let handle = envelope.request_handle();
                let slot = pending.lock().remove(&handle);
                match slot {
                    Some(slot) => {
                        let _ = slot.send(Ok(envelope));
                    }
                    None => {
                        warn!(
                            request_handle = handle,
                            service = envelope.name(),
                            "Dropping unmatched response"
                        );
                    }
                }
            }
            Err(e) => {
                if !cancel.is_cancelled() {
                    e.log("Secure channel reader stopped");
                }
                break;
            }
        }
    }
    cancel.cancel();
    fail_pending(&pending);
    debug!("Dispatcher reader exited");
}

fn fail_pending(pending: &PendingMap) {
    let slots: Vec<Slot> = pending.lock().drain().map(|(_, slot)| slot).collect();
    for slot in slots {
        let _ = slot.send(Err(UaError::channel_closed()));
    }
}
