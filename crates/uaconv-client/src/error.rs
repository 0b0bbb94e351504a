// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client error types.
//!
//! Errors are grouped by the layer that raised them so callers can decide
//! how to react without matching on every variant:
//!
//! ```text
//! UaError
//! ├── Transport     - I/O, dial and handshake failures (fatal to the channel)
//! ├── Protocol      - malformed or unexpected peer behaviour
//! ├── Session       - lifecycle violations and activation rejection
//! ├── Service       - non-Good status inside a well-formed response
//! ├── Subscription  - monitored item bookkeeping and slow consumers
//! ├── Configuration - invalid settings
//! └── Codec         - local parse failures (NodeId strings)
//! ```
//!
//! # Examples
//!
//! ```
//! use uaconv_client::error::{UaError, SubscriptionError, ErrorSeverity};
//!
//! let error = UaError::from(SubscriptionError::not_found("ns=2;s=Missing"));
//! assert_eq!(error.category(), "subscription");
//! assert!(!error.is_retryable());
//! assert_eq!(error.severity(), ErrorSeverity::Error);
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;
use uaconv_proto::{CodecError, StatusCode};

// =============================================================================
// UaError - Main Error Type
// =============================================================================

/// The main error type of the client.
///
/// Every variant is cheap to clone so a single failure can be fanned out to
/// several subscriptions.
#[derive(Debug, Clone, Error)]
pub enum UaError {
    /// Transport errors.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// Protocol violations.
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    /// Session lifecycle errors.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Non-Good status in a response.
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// Subscription errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Local parse failures.
    #[error("{0}")]
    Codec(#[from] CodecError),
}

impl UaError {
    // =========================================================================
    // Convenience Factory Methods
    // =========================================================================

    /// Creates a channel closed error.
    pub fn channel_closed() -> Self {
        Self::Transport(TransportError::ChannelClosed)
    }

    /// Creates a response mismatch error.
    pub fn response_mismatch(actual: &'static str, expected: &'static str) -> Self {
        Self::Protocol(ProtocolError::ResponseMismatch { actual, expected })
    }

    /// Creates a bad service result error.
    pub fn bad_result(service: &'static str, status: StatusCode) -> Self {
        Self::Service(ServiceError::BadResult { service, status })
    }

    /// Creates an invalid configuration value error.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration(ConfigurationError::invalid_value(field, reason))
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns `true` if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Service(e) => e.is_retryable(),
            Self::Subscription(e) => e.is_retryable(),
            Self::Session(_) | Self::Protocol(_) | Self::Configuration(_) | Self::Codec(_) => {
                false
            }
        }
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Transport(e) => e.severity(),
            Self::Protocol(_) => ErrorSeverity::Error,
            Self::Session(e) => e.severity(),
            Self::Service(_) => ErrorSeverity::Warning,
            Self::Subscription(e) => e.severity(),
            Self::Configuration(_) => ErrorSeverity::Critical,
            Self::Codec(_) => ErrorSeverity::Error,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::Session(_) => "session",
            Self::Service(_) => "service",
            Self::Subscription(_) => "subscription",
            Self::Configuration(_) => "configuration",
            Self::Codec(_) => "codec",
        }
    }

    /// Returns a unique error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Transport(e) => e.error_code(),
            Self::Protocol(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::Service(e) => e.error_code(),
            Self::Subscription(e) => e.error_code(),
            Self::Configuration(e) => e.error_code(),
            Self::Codec(_) => ErrorCode::new(7, 1),
        }
    }

    /// Returns the OPC UA status carried by the error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Transport(TransportError::Rejected { status, .. })
            | Self::Protocol(ProtocolError::ServerError { status, .. })
            | Self::Session(SessionError::ActivationRejected { status })
            | Self::Service(ServiceError::BadResult { status, .. })
            | Self::Service(ServiceError::BadItem { status, .. }) => Some(*status),
            Self::Transport(TransportError::RequestTimeout { .. }) => Some(StatusCode::BAD_TIMEOUT),
            Self::Transport(TransportError::ChannelClosed) => {
                Some(StatusCode::BAD_SECURE_CHANNEL_CLOSED)
            }
            _ => None,
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let code = self.error_code();

        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
        }
    }
}

// =============================================================================
// TransportError
// =============================================================================

/// Byte stream failures. All of them end the channel.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// I/O failure on the connection.
    #[error("I/O error during {operation}: {source}")]
    Io {
        /// What was being done.
        operation: &'static str,
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },

    /// TCP connect did not complete in time.
    #[error("Connection to '{endpoint}' timed out after {duration:?}")]
    ConnectTimeout {
        /// Target endpoint.
        endpoint: String,
        /// Timeout used.
        duration: Duration,
    },

    /// Endpoint URL could not be parsed.
    #[error("Invalid endpoint URL '{url}': {reason}")]
    InvalidEndpoint {
        /// The URL.
        url: String,
        /// Why it is invalid.
        reason: String,
    },

    /// The server answered Hello with an `ERR` frame.
    #[error("Server rejected the connection: {status} {reason}")]
    Rejected {
        /// Status sent by the server.
        status: StatusCode,
        /// Reason text.
        reason: String,
    },

    /// The channel was closed while the request was pending.
    #[error("Secure channel closed")]
    ChannelClosed,

    /// No response arrived in time.
    #[error("{request} timed out after {duration:?}")]
    RequestTimeout {
        /// Request name.
        request: &'static str,
        /// Timeout used.
        duration: Duration,
    },
}

impl TransportError {
    /// Creates an I/O error.
    pub fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io {
            operation,
            source: Arc::new(source),
        }
    }

    /// Creates an invalid endpoint error.
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
            ),
            Self::ConnectTimeout { .. } | Self::RequestTimeout { .. } => true,
            Self::Rejected { status, .. } => *status == StatusCode::BAD_TCP_SERVER_TOO_BUSY,
            Self::ChannelClosed => true,
            Self::InvalidEndpoint { .. } => false,
        }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ConnectTimeout { .. } | Self::RequestTimeout { .. } => ErrorSeverity::Warning,
            Self::ChannelClosed => ErrorSeverity::Warning,
            Self::InvalidEndpoint { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Io { .. } => ErrorCode::new(1, 1),
            Self::ConnectTimeout { .. } => ErrorCode::new(1, 2),
            Self::InvalidEndpoint { .. } => ErrorCode::new(1, 3),
            Self::Rejected { .. } => ErrorCode::new(1, 4),
            Self::ChannelClosed => ErrorCode::new(1, 5),
            Self::RequestTimeout { .. } => ErrorCode::new(1, 6),
        }
    }
}

// =============================================================================
// ProtocolError
// =============================================================================

/// The peer did something the protocol does not allow.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// An inbound header carried a different channel id.
    #[error("Channel id mismatch: expected {expected}, got {actual}")]
    ChannelIdMismatch {
        /// Assigned channel id.
        expected: u32,
        /// Id in the header.
        actual: u32,
    },

    /// The response was of another service kind.
    #[error("Unexpected response {actual}, expected {expected}")]
    ResponseMismatch {
        /// Received body type.
        actual: &'static str,
        /// Expected body type.
        expected: &'static str,
    },

    /// A publish response named another subscription.
    #[error("Subscription id mismatch: expected {expected}, got {actual}")]
    SubscriptionIdMismatch {
        /// Subscription the message was routed to.
        expected: u32,
        /// Id in the message.
        actual: u32,
    },

    /// A frame could not be decoded.
    #[error("Failed to decode {what}: {source}")]
    Decode {
        /// What was being decoded.
        what: &'static str,
        /// Codec failure.
        #[source]
        source: CodecError,
    },

    /// The server sent an `ERR` frame.
    #[error("Server error {status}: {reason}")]
    ServerError {
        /// Status sent by the server.
        status: StatusCode,
        /// Reason text.
        reason: String,
    },

    /// A frame of an unexpected UACP type arrived.
    #[error("Unexpected {actual} frame, expected {expected}")]
    UnexpectedFrame {
        /// Received message type.
        actual: &'static str,
        /// Expected message type.
        expected: &'static str,
    },
}

impl ProtocolError {
    /// Creates a decode error.
    pub fn decode(what: &'static str, source: CodecError) -> Self {
        Self::Decode { what, source }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ChannelIdMismatch { .. } => ErrorCode::new(2, 1),
            Self::ResponseMismatch { .. } => ErrorCode::new(2, 2),
            Self::SubscriptionIdMismatch { .. } => ErrorCode::new(2, 3),
            Self::Decode { .. } => ErrorCode::new(2, 4),
            Self::ServerError { .. } => ErrorCode::new(2, 5),
            Self::UnexpectedFrame { .. } => ErrorCode::new(2, 6),
        }
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Session lifecycle errors.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The operation is not allowed in the current state.
    #[error("Cannot {operation} a session in state {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// Current state.
        state: &'static str,
    },

    /// ActivateSession returned a non-Good status.
    #[error("Session activation rejected: {status}")]
    ActivationRejected {
        /// Rejecting status.
        status: StatusCode,
    },

    /// The server signature did not verify.
    #[error("Server signature verification failed")]
    SignatureInvalid,
}

impl SessionError {
    /// Creates an invalid state error.
    pub fn invalid_state(operation: &'static str, state: &'static str) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::InvalidState { .. } => ErrorSeverity::Warning,
            Self::ActivationRejected { .. } | Self::SignatureInvalid => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidState { .. } => ErrorCode::new(3, 1),
            Self::ActivationRejected { .. } => ErrorCode::new(3, 2),
            Self::SignatureInvalid => ErrorCode::new(3, 3),
        }
    }
}

// =============================================================================
// ServiceError
// =============================================================================

/// A well-formed response carried a failure status.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The service result was not Good.
    #[error("{service} failed: {status}")]
    BadResult {
        /// Service name.
        service: &'static str,
        /// Service result.
        status: StatusCode,
    },

    /// A per-item result was not Good.
    #[error("{service} item {index} failed: {status}")]
    BadItem {
        /// Service name.
        service: &'static str,
        /// Position in the request.
        index: usize,
        /// Item status.
        status: StatusCode,
    },

    /// The response had a different number of results than requested.
    #[error("{service} returned {actual} results for {expected} items")]
    ResultCountMismatch {
        /// Service name.
        service: &'static str,
        /// Items requested.
        expected: usize,
        /// Results received.
        actual: usize,
    },
}

impl ServiceError {
    /// Returns `true` for statuses that are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BadResult { status, .. } | Self::BadItem { status, .. } => matches!(
                *status,
                StatusCode::BAD_TIMEOUT
                    | StatusCode::BAD_REQUEST_TIMEOUT
                    | StatusCode::BAD_TOO_MANY_OPERATIONS
                    | StatusCode::BAD_RESOURCE_UNAVAILABLE
                    | StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS
            ),
            Self::ResultCountMismatch { .. } => false,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::BadResult { .. } => ErrorCode::new(4, 1),
            Self::BadItem { .. } => ErrorCode::new(4, 2),
            Self::ResultCountMismatch { .. } => ErrorCode::new(4, 3),
        }
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Monitored item bookkeeping and delivery errors.
#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    /// The node is not monitored by this subscription.
    #[error("Node '{node}' is not monitored")]
    NotFound {
        /// Canonical node string.
        node: String,
    },

    /// The node is already monitored by this subscription.
    #[error("Node '{node}' is already monitored")]
    AlreadyMonitored {
        /// Canonical node string.
        node: String,
    },

    /// A notification referenced a client handle with no node.
    #[error("No node registered for client handle {client_handle}")]
    UnknownHandle {
        /// The handle.
        client_handle: u32,
    },

    /// The consumer could not keep up and notifications were dropped.
    #[error("Slow consumer on subscription {subscription_id}: dropped {dropped} item(s)")]
    SlowConsumer {
        /// Subscription id.
        subscription_id: u32,
        /// Items dropped by this event.
        dropped: usize,
    },

    /// The subscription has been unsubscribed.
    #[error("Subscription {subscription_id} is closed")]
    Closed {
        /// Subscription id.
        subscription_id: u32,
    },
}

impl SubscriptionError {
    /// Creates a not found error.
    pub fn not_found(node: impl Into<String>) -> Self {
        Self::NotFound { node: node.into() }
    }

    /// Creates an already monitored error.
    pub fn already_monitored(node: impl Into<String>) -> Self {
        Self::AlreadyMonitored { node: node.into() }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SlowConsumer { .. })
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::SlowConsumer { .. } | Self::UnknownHandle { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::new(5, 1),
            Self::AlreadyMonitored { .. } => ErrorCode::new(5, 2),
            Self::UnknownHandle { .. } => ErrorCode::new(5, 3),
            Self::SlowConsumer { .. } => ErrorCode::new(5, 4),
            Self::Closed { .. } => ErrorCode::new(5, 5),
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Invalid settings.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// A field has an invalid value.
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Why it is invalid.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("Failed to read configuration file '{path}': {source}")]
    FileRead {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration file '{path}': {message}")]
    Parse {
        /// File path.
        path: String,
        /// Parser message.
        message: String,
    },

    /// The file extension names no supported format.
    #[error("Unsupported configuration format: '{path}' (use .yaml, .yml or .toml)")]
    UnsupportedFormat {
        /// File path.
        path: String,
    },
}

impl ConfigurationError {
    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a file read error.
    pub fn file_read(path: impl Into<String>, source: io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Creates a parse error.
    pub fn parse(path: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidValue { .. } => ErrorCode::new(6, 1),
            Self::FileRead { .. } => ErrorCode::new(6, 2),
            Self::Parse { .. } => ErrorCode::new(6, 3),
            Self::UnsupportedFormat { .. } => ErrorCode::new(6, 4),
        }
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code.
///
/// Format: `UA-XXYY` where XX is the category and YY the specific error.
///
/// Categories:
/// - 1: Transport
/// - 2: Protocol
/// - 3: Session
/// - 4: Service
/// - 5: Subscription
/// - 6: Configuration
/// - 7: Codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category (1-7).
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }

    /// Returns the full error code as a u16.
    pub fn as_u16(&self) -> u16 {
        ((self.category as u16) << 8) | (self.code as u16)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A Result type with UaError.
pub type UaResult<T> = Result<T, UaError>;

// =============================================================================
// Error Context Extension
// =============================================================================

/// Extension trait for logging errors with context before propagating them.
pub trait UaErrorContext<T> {
    /// Adds endpoint context to errors.
    fn with_endpoint(self, endpoint: &str) -> UaResult<T>;

    /// Adds subscription context to errors.
    fn with_subscription(self, subscription_id: u32) -> UaResult<T>;
}

impl<T> UaErrorContext<T> for UaResult<T> {
    fn with_endpoint(self, endpoint: &str) -> UaResult<T> {
        self.map_err(|e| {
            tracing::debug!(endpoint = endpoint, error = %e, "OPC UA error with endpoint context");
            e
        })
    }

    fn with_subscription(self, subscription_id: u32) -> UaResult<T> {
        self.map_err(|e| {
            tracing::debug!(subscription_id, error = %e, "OPC UA error with subscription context");
            e
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_retryable() {
        let refused = TransportError::io(
            "connect",
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert!(refused.is_retryable());
        assert!(TransportError::ChannelClosed.is_retryable());
        assert!(!TransportError::invalid_endpoint("http://x", "scheme").is_retryable());

        let busy = TransportError::Rejected {
            status: StatusCode::BAD_TCP_SERVER_TOO_BUSY,
            reason: "busy".into(),
        };
        assert!(busy.is_retryable());
    }

    #[test]
    fn test_protocol_errors_not_retryable() {
        let error = UaError::from(ProtocolError::ChannelIdMismatch {
            expected: 1,
            actual: 2,
        });
        assert!(!error.is_retryable());
        assert_eq!(error.category(), "protocol");
        assert_eq!(error.error_code().to_string(), "UA-0201");
    }

    #[test]
    fn test_response_mismatch_message() {
        let error = UaError::response_mismatch("ServiceFault", "ReadResponse");
        assert_eq!(
            error.to_string(),
            "Unexpected response ServiceFault, expected ReadResponse"
        );
    }

    #[test]
    fn test_status_extraction() {
        let error = UaError::from(SessionError::ActivationRejected {
            status: StatusCode::BAD_IDENTITY_TOKEN_REJECTED,
        });
        assert_eq!(error.status(), Some(StatusCode::BAD_IDENTITY_TOKEN_REJECTED));
        assert_eq!(
            UaError::channel_closed().status(),
            Some(StatusCode::BAD_SECURE_CHANNEL_CLOSED)
        );
        assert_eq!(UaError::invalid_config("endpoint", "empty").status(), None);
    }

    #[test]
    fn test_service_retryable_statuses() {
        assert!(ServiceError::BadResult {
            service: "PublishRequest",
            status: StatusCode::BAD_TIMEOUT,
        }
        .is_retryable());
        assert!(!ServiceError::BadItem {
            service: "CreateMonitoredItemsRequest",
            index: 0,
            status: StatusCode::BAD_NODE_ID_UNKNOWN,
        }
        .is_retryable());
    }

    #[test]
    fn test_severity() {
        let slow = UaError::from(SubscriptionError::SlowConsumer {
            subscription_id: 1,
            dropped: 1,
        });
        assert_eq!(slow.severity(), ErrorSeverity::Warning);
        assert_eq!(slow.tracing_level(), Level::WARN);
        assert_eq!(
            UaError::invalid_config("x", "y").severity(),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_error_code() {
        let code = ErrorCode::new(5, 4);
        assert_eq!(code.to_string(), "UA-0504");
        assert_eq!(code.as_u16(), 0x0504);
    }

    #[test]
    fn test_clone_keeps_io_source() {
        let error = UaError::from(TransportError::io(
            "read",
            io::Error::new(io::ErrorKind::UnexpectedEof, "eof"),
        ));
        let copy = error.clone();
        assert_eq!(error.to_string(), copy.to_string());
        assert!(std::error::Error::source(&copy).is_some());
    }
}
