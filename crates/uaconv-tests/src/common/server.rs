// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Scripted Server
//!
//! An in-memory OPC UA server speaking the binary protocol over a
//! `tokio::io::duplex` pair. It answers every service the client uses,
//! holds PublishRequests until the test queues a notification, and records
//! the requests it saw for verification.
//!
//! ```rust,ignore
//! let (connection, server) = MockServer::start(ServerScript::default());
//! let client = Client::connector(config).connect_stream(connection).await?;
//! server.publish(subscription_id, data).await;
//! assert_eq!(server.count("ReadRequest"), 1);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uaconv_client::transport::read_frame;
use uaconv_client::BoxConnection;
use uaconv_proto::uacp::{self, MessageType};
use uaconv_proto::{
    Acknowledge, ActivateSessionResponse, BinaryCodec, ChannelSecurityToken,
    CloseSessionResponse, CreateMonitoredItemsResponse, CreateSessionResponse,
    CreateSubscriptionResponse, DataValue, Decode, DeleteMonitoredItemsResponse,
    DeleteSubscriptionsResponse, EndpointDescription, ExtensionObject, Hello,
    ModifyMonitoredItemsResponse, ModifySubscriptionResponse, MonitoredItemCreateResult,
    MonitoredItemModifyResult, MonitoringMode, NodeId, NotificationData, NotificationMessage,
    OpenSecureChannelResponse, PublishResponse, ReadResponse, RequestEnvelope, ResponseEnvelope,
    ResponseHeader, SecureMessage, SequenceHeader, ServiceFault, ServiceRequest,
    ServiceResponse, SetMonitoringModeResponse, StatusCode, SubscriptionAcknowledgement,
    UserTokenPolicy, UserTokenType, Variant,
};

const FRAME_LIMIT: usize = 1 << 20;

// =============================================================================
// ServerScript
// =============================================================================

/// How the server answers.
#[derive(Debug, Clone)]
pub struct ServerScript {
    /// Channel id assigned on open.
    pub channel_id: u32,
    /// Token id assigned on open.
    pub token_id: u32,
    /// Authentication token returned by CreateSession.
    pub authentication_token: NodeId,
    /// Per-token results returned by ActivateSession.
    pub activation_results: Vec<StatusCode>,
    /// Values served by Read, keyed by node string form.
    pub values: HashMap<String, Variant>,
    /// Nodes rejected by CreateMonitoredItems.
    pub reject_nodes: HashSet<String>,
    /// Services answered with a ServiceFault carrying the status.
    pub faults: HashMap<&'static str, StatusCode>,
    /// First subscription id handed out.
    pub first_subscription_id: u32,
    /// Acknowledge sent in reply to Hello.
    pub ack: Acknowledge,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            channel_id: 11,
            token_id: 1,
            authentication_token: NodeId::numeric(1, 9001),
            activation_results: Vec::new(),
            values: HashMap::new(),
            reject_nodes: HashSet::new(),
            faults: HashMap::new(),
            first_subscription_id: 1,
            ack: Acknowledge {
                version: 0,
                receive_buffer_size: 65535,
                send_buffer_size: 65535,
                max_message_size: 0,
                max_chunk_count: 0,
            },
        }
    }
}

impl ServerScript {
    /// Serves `value` for `node`.
    pub fn value(mut self, node: &str, value: Variant) -> Self {
        self.values.insert(node.to_string(), value);
        self
    }

    /// Rejects monitoring of `node`.
    pub fn reject(mut self, node: &str) -> Self {
        self.reject_nodes.insert(node.to_string());
        self
    }

    /// Answers `service` with a fault.
    pub fn fault(mut self, service: &'static str, status: StatusCode) -> Self {
        self.faults.insert(service, status);
        self
    }

    /// Returns `results` from ActivateSession.
    pub fn activation_results(mut self, results: Vec<StatusCode>) -> Self {
        self.activation_results = results;
        self
    }
}

// =============================================================================
// MockServer
// =============================================================================

#[derive(Default)]
struct PublishQueue {
    waiting: VecDeque<(SequenceHeader, u32)>,
    queued: VecDeque<(u32, Vec<ExtensionObject>)>,
    sequence_number: u32,
}

struct Shared {
    script: ServerScript,
    writer: tokio::sync::Mutex<WriteHalf<DuplexStream>>,
    requests: Mutex<Vec<&'static str>>,
    hello: Mutex<Option<Hello>>,
    acknowledgements: Mutex<Vec<SubscriptionAcknowledgement>>,
    monitored: Mutex<HashMap<u32, (NodeId, MonitoringMode)>>,
    publish: Mutex<PublishQueue>,
    next_subscription_id: AtomicU32,
    next_item_id: AtomicU32,
    channel_closed: AtomicBool,
}

/// Handle to a running scripted server.
pub struct MockServer {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Starts a server; returns the client end of the connection.
    pub fn start(script: ServerScript) -> (BoxConnection, Self) {
        let (client, server) = tokio::io::duplex(1 << 20);
        let (reader, writer) = tokio::io::split(server);
        let shared = Arc::new(Shared {
            next_subscription_id: AtomicU32::new(script.first_subscription_id),
            script,
            writer: tokio::sync::Mutex::new(writer),
            requests: Mutex::new(Vec::new()),
            hello: Mutex::new(None),
            acknowledgements: Mutex::new(Vec::new()),
            monitored: Mutex::new(HashMap::new()),
            publish: Mutex::new(PublishQueue::default()),
            next_item_id: AtomicU32::new(1000),
            channel_closed: AtomicBool::new(false),
        });
        let task = tokio::spawn(serve(Arc::clone(&shared), reader));
        (Box::new(client), Self { shared, task })
    }

    /// Names of the request bodies received, in order.
    pub fn requests(&self) -> Vec<&'static str> {
        self.shared.requests.lock().clone()
    }

    /// How often `service` was requested.
    pub fn count(&self, service: &str) -> usize {
        self.shared
            .requests
            .lock()
            .iter()
            .filter(|name| **name == service)
            .count()
    }

    /// The Hello received during the handshake.
    pub fn hello(&self) -> Option<Hello> {
        self.shared.hello.lock().clone()
    }

    /// Acknowledgements received in PublishRequests.
    pub fn acknowledgements(&self) -> Vec<SubscriptionAcknowledgement> {
        self.shared.acknowledgements.lock().clone()
    }

    /// Returns `true` once a CloseSecureChannel message arrived.
    pub fn channel_closed(&self) -> bool {
        self.shared.channel_closed.load(Ordering::SeqCst)
    }

    /// Number of monitored items currently alive.
    pub fn monitored_items(&self) -> usize {
        self.shared.monitored.lock().len()
    }

    /// Monitoring mode of the live item for `node`.
    pub fn monitoring_mode(&self, node: &str) -> Option<MonitoringMode> {
        self.shared
            .monitored
            .lock()
            .values()
            .find(|(node_id, _)| node_id.to_string() == node)
            .map(|(_, mode)| *mode)
    }

    /// Answers the next PublishRequest with `data` for `subscription_id`.
    pub async fn publish(&self, subscription_id: u32, data: NotificationData) {
        self.publish_raw(subscription_id, vec![data.to_extension_object()])
            .await;
    }

    /// Answers the next PublishRequest with raw payloads.
    pub async fn publish_raw(&self, subscription_id: u32, payloads: Vec<ExtensionObject>) {
        self.shared
            .publish
            .lock()
            .queued
            .push_back((subscription_id, payloads));
        self.shared.flush_publish().await;
    }

    /// Answers the next PublishRequest with a keep-alive.
    pub async fn keep_alive(&self, subscription_id: u32) {
        self.publish_raw(subscription_id, Vec::new()).await;
    }

    /// Waits until `service` was requested at least `times` times.
    pub async fn wait_for(&self, service: &str, times: usize) {
        for _ in 0..1000 {
            if self.count(service) >= times {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "{service} requested {} times, expected {times}",
            self.count(service)
        );
    }

    /// Drops the connection without a goodbye.
    pub async fn disconnect(&self) {
        self.task.abort();
        let _ = self.shared.writer.lock().await.shutdown().await;
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// Serving
// =============================================================================

async fn serve(shared: Arc<Shared>, mut reader: ReadHalf<DuplexStream>) {
    let Ok(frame) = read_frame(&mut reader, FRAME_LIMIT).await else {
        return;
    };
    if let Ok((_, mut payload)) = uacp::decode_frame(frame) {
        if let Ok(hello) = Hello::decode(&mut payload) {
            *shared.hello.lock() = Some(hello);
        }
    }
    let ack = uacp::encode_frame(MessageType::Acknowledge, &shared.script.ack);
    shared.write(&ack).await;

    loop {
        let frame = match read_frame(&mut reader, FRAME_LIMIT).await {
            Ok(frame) => frame,
            Err(_) => break,
        };
        let request = match BinaryCodec.decode_request(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Mock server could not decode request");
                break;
            }
        };
        shared.requests.lock().push(request.body.body.name());
        if request.message_type == MessageType::CloseSecureChannel {
            shared.channel_closed.store(true, Ordering::SeqCst);
            break;
        }
        shared.handle(request).await;
    }
    debug!("Mock server stopped");
}

impl Shared {
    async fn write(&self, frame: &[u8]) {
        let mut writer = self.writer.lock().await;
        let _ = writer.write_all(frame).await;
        let _ = writer.flush().await;
    }

    async fn respond(
        &self,
        sequence: &SequenceHeader,
        header: ResponseHeader,
        body: impl Into<ServiceResponse>,
    ) {
        let envelope = ResponseEnvelope::new(header, body);
        let message = SecureMessage::message(
            self.script.channel_id,
            self.script.token_id,
            sequence.clone(),
            envelope,
        );
        self.write(&BinaryCodec.encode_response(&message)).await;
    }

    async fn handle(&self, request: SecureMessage<RequestEnvelope>) {
        let handle = request.body.header.request_handle;
        let name = request.body.body.name();
        let header = ResponseHeader::good(handle);

        if let Some(status) = self.script.faults.get(name) {
            let header = ResponseHeader {
                service_result: *status,
                ..header
            };
            self.respond(&request.sequence, header, ServiceFault::default())
                .await;
            return;
        }

        let body: ServiceResponse = match &request.body.body {
            ServiceRequest::OpenSecureChannel(open) => {
                let response = OpenSecureChannelResponse {
                    security_token: ChannelSecurityToken {
                        channel_id: self.script.channel_id,
                        token_id: self.script.token_id,
                        created_at: Utc::now(),
                        revised_lifetime: open.requested_lifetime,
                    },
                    server_nonce: vec![0; 32].into(),
                    ..Default::default()
                };
                let envelope = ResponseEnvelope::new(header, response);
                let message =
                    SecureMessage::open(self.script.channel_id, request.sequence.clone(), envelope);
                self.write(&BinaryCodec.encode_response(&message)).await;
                return;
            }
            ServiceRequest::CreateSession(create) => CreateSessionResponse {
                session_id: NodeId::numeric(1, 5000),
                authentication_token: self.script.authentication_token.clone(),
                revised_session_timeout: create.requested_session_timeout,
                server_nonce: vec![3; 32].into(),
                server_endpoints: vec![EndpointDescription {
                    endpoint_url: create.endpoint_url.clone(),
                    user_identity_tokens: vec![
                        UserTokenPolicy {
                            policy_id: "anonymous".into(),
                            token_type: UserTokenType::Anonymous,
                            ..Default::default()
                        },
                        UserTokenPolicy {
                            policy_id: "username".into(),
                            token_type: UserTokenType::UserName,
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                }],
                ..Default::default()
            }
            .into(),
            ServiceRequest::ActivateSession(_) => ActivateSessionResponse {
                server_nonce: vec![4; 32].into(),
                results: self.script.activation_results.clone(),
                ..Default::default()
            }
            .into(),
            ServiceRequest::CloseSession(_) => CloseSessionResponse::default().into(),
            ServiceRequest::Read(read) => ReadResponse {
                results: read
                    .nodes_to_read
                    .iter()
                    .map(|item| match self.script.values.get(&item.node_id.to_string()) {
                        Some(value) => DataValue::new(value.clone()),
                        None => DataValue {
                            status: Some(StatusCode::BAD_NODE_ID_UNKNOWN),
                            ..Default::default()
                        },
                    })
                    .collect(),
                ..Default::default()
            }
            .into(),
            ServiceRequest::CreateSubscription(create) => CreateSubscriptionResponse {
                subscription_id: self.next_subscription_id.fetch_add(1, Ordering::SeqCst),
                revised_publishing_interval: create.requested_publishing_interval,
                revised_lifetime_count: create.requested_lifetime_count,
                revised_max_keep_alive_count: create.requested_max_keep_alive_count,
            }
            .into(),
            ServiceRequest::CreateMonitoredItems(create) => {
                let mut monitored = self.monitored.lock();
                let results = create
                    .items_to_create
                    .iter()
                    .map(|item| {
                        let node = &item.item_to_monitor.node_id;
                        if self.script.reject_nodes.contains(&node.to_string()) {
                            MonitoredItemCreateResult {
                                status_code: StatusCode::BAD_NODE_ID_UNKNOWN,
                                ..Default::default()
                            }
                        } else {
                            let id = self.next_item_id.fetch_add(1, Ordering::SeqCst);
                            monitored.insert(id, (node.clone(), item.monitoring_mode));
                            MonitoredItemCreateResult {
                                monitored_item_id: id,
                                revised_sampling_interval: item
                                    .requested_parameters
                                    .sampling_interval,
                                revised_queue_size: item.requested_parameters.queue_size,
                                ..Default::default()
                            }
                        }
                    })
                    .collect();
                CreateMonitoredItemsResponse {
                    results,
                    ..Default::default()
                }
                .into()
            }
            ServiceRequest::DeleteMonitoredItems(delete) => {
                let mut monitored = self.monitored.lock();
                DeleteMonitoredItemsResponse {
                    results: delete
                        .monitored_item_ids
                        .iter()
                        .map(|id| match monitored.remove(id) {
                            Some(_) => StatusCode::GOOD,
                            None => StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
                        })
                        .collect(),
                    ..Default::default()
                }
                .into()
            }
            ServiceRequest::ModifyMonitoredItems(modify) => {
                let monitored = self.monitored.lock();
                ModifyMonitoredItemsResponse {
                    results: modify
                        .items_to_modify
                        .iter()
                        .map(|item| {
                            if monitored.contains_key(&item.monitored_item_id) {
                                MonitoredItemModifyResult {
                                    revised_sampling_interval: item
                                        .requested_parameters
                                        .sampling_interval,
                                    revised_queue_size: item.requested_parameters.queue_size,
                                    ..Default::default()
                                }
                            } else {
                                MonitoredItemModifyResult {
                                    status_code: StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
                                    ..Default::default()
                                }
                            }
                        })
                        .collect(),
                    ..Default::default()
                }
                .into()
            }
            ServiceRequest::SetMonitoringMode(set) => {
                let mut monitored = self.monitored.lock();
                SetMonitoringModeResponse {
                    results: set
                        .monitored_item_ids
                        .iter()
                        .map(|id| match monitored.get_mut(id) {
                            Some((_, mode)) => {
                                *mode = set.monitoring_mode;
                                StatusCode::GOOD
                            }
                            None => StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
                        })
                        .collect(),
                    ..Default::default()
                }
                .into()
            }
            ServiceRequest::ModifySubscription(modify) => ModifySubscriptionResponse {
                revised_publishing_interval: modify.requested_publishing_interval,
                revised_lifetime_count: modify.requested_lifetime_count,
                revised_max_keep_alive_count: modify.requested_max_keep_alive_count,
            }
            .into(),
            ServiceRequest::DeleteSubscriptions(delete) => DeleteSubscriptionsResponse {
                results: vec![StatusCode::GOOD; delete.subscription_ids.len()],
                ..Default::default()
            }
            .into(),
            ServiceRequest::Publish(publish) => {
                self.acknowledgements
                    .lock()
                    .extend(publish.subscription_acknowledgements.iter().cloned());
                self.publish
                    .lock()
                    .waiting
                    .push_back((request.sequence.clone(), handle));
                self.flush_publish().await;
                return;
            }
            ServiceRequest::CloseSecureChannel(_) => return,
        };
        self.respond(&request.sequence, header, body).await;
    }

    /// Pairs waiting PublishRequests with queued notifications.
    async fn flush_publish(&self) {
        loop {
            let next = {
                let mut queue = self.publish.lock();
                if queue.waiting.is_empty() || queue.queued.is_empty() {
                    None
                } else {
                    queue.sequence_number += 1;
                    let sequence_number = queue.sequence_number;
                    queue
                        .waiting
                        .pop_front()
                        .zip(queue.queued.pop_front())
                        .map(|(request, payload)| (request, payload, sequence_number))
                }
            };
            let Some(((sequence, handle), (subscription_id, payloads), number)) = next else {
                return;
            };
            let response = PublishResponse {
                subscription_id,
                available_sequence_numbers: vec![number],
                notification_message: NotificationMessage {
                    sequence_number: number,
                    publish_time: uaconv_proto::now(),
                    notification_data: payloads,
                },
                ..Default::default()
            };
            self.respond(&sequence, ResponseHeader::good(handle), response)
                .await;
        }
    }
}
