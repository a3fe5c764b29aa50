//! Error taxonomy and the structured error envelope callers receive.
//!
//! Every fallible public operation in this workspace returns
//! `Result<T, HubError>`. `HubError` carries enough structure
//! (`operation`, `context`, `recovery`) to reconstruct the
//! `{code, message, operation, context, recovery, cause}` envelope a host
//! application forwards to its own error taxonomy; [`HubError::code`] and
//! [`HubError::into_envelope`] do that reconstruction.

use std::fmt;
use thiserror::Error;

/// Stable identifier for an error kind, independent of the formatted
/// message. Hosts can match on this without parsing `Display` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Operation not allowed in the current lifecycle state.
    InvalidState,
    /// Malformed or out-of-range configuration.
    InvalidConfig,
    /// Referenced queue, topic, subscription, consumer, or port is absent.
    NotFound,
    /// Duplicate name on create/register.
    AlreadyExists,
    /// Enqueue refused due to `max_size`.
    QueueFull,
    /// Handler failure or broker-port failure.
    DeliveryFailed,
    /// Receive or shutdown deadline exceeded.
    Timeout,
    /// Missing required fields in an envelope.
    ValidationFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidState => "INVALID_STATE",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::QueueFull => "QUEUE_FULL",
            Self::DeliveryFailed => "DELIVERY_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::ValidationFailed => "VALIDATION_FAILED",
        };
        write!(f, "{s}")
    }
}

/// Where and when an error occurred.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Milliseconds since the Unix epoch when the error was raised.
    pub timestamp: u64,
    /// Module that raised the error, e.g. `"queue"`, `"topic"`, `"port_registry"`.
    pub module: &'static str,
    /// Free-form extra context (queue name, port name, subscription id, ...).
    pub detail: Option<String>,
}

impl ErrorContext {
    fn new(module: &'static str, detail: Option<String>) -> Self {
        Self {
            timestamp: crate::event::now_millis(),
            module,
            detail,
        }
    }
}

/// Guidance for a caller deciding whether to retry.
#[derive(Debug, Clone)]
pub struct Recovery {
    /// Whether retrying the operation might succeed.
    pub can_retry: bool,
    /// Suggested delay before retrying, if `can_retry`.
    pub retry_delay_ms: Option<u64>,
    /// Maximum retries the core itself will attempt on the caller's behalf
    /// (queue sends never retry automatically; this is informational).
    pub max_retries: Option<u32>,
    /// Human-readable remediation suggestions.
    pub suggestions: Vec<&'static str>,
}

impl Recovery {
    const fn not_retryable() -> Self {
        Self {
            can_retry: false,
            retry_delay_ms: None,
            max_retries: None,
            suggestions: Vec::new(),
        }
    }

    fn retryable(delay_ms: u64) -> Self {
        Self {
            can_retry: true,
            retry_delay_ms: Some(delay_ms),
            max_retries: None,
            suggestions: vec!["retry after the suggested delay"],
        }
    }
}

/// The error type returned by every fallible operation in this workspace.
#[derive(Error, Debug)]
pub enum HubError {
    /// Operation not allowed in the current lifecycle state.
    #[error("invalid state for {operation}: {detail}")]
    InvalidState {
        /// The operation that was rejected.
        operation: &'static str,
        /// Human-readable explanation (e.g. current vs. required state).
        detail: String,
    },

    /// Malformed or out-of-range configuration.
    #[error("invalid config for {operation}: {detail}")]
    InvalidConfig {
        /// The operation whose configuration was rejected.
        operation: &'static str,
        /// Human-readable explanation.
        detail: String,
    },

    /// Referenced queue, topic, subscription, consumer, or port is absent.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// What kind of entity was missing, e.g. `"queue"`.
        kind: &'static str,
        /// The name or id that was looked up.
        name: String,
    },

    /// Duplicate name on create/register.
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// What kind of entity already existed, e.g. `"topic"`.
        kind: &'static str,
        /// The duplicate name.
        name: String,
    },

    /// Enqueue refused due to `max_size`.
    #[error("queue '{queue}' is full (max_size={max_size})")]
    QueueFull {
        /// The queue that rejected the send.
        queue: String,
        /// The configured capacity.
        max_size: usize,
    },

    /// Handler failure or broker-port failure.
    #[error("delivery failed for {operation}: {detail}")]
    DeliveryFailed {
        /// The operation that failed delivery.
        operation: &'static str,
        /// Human-readable explanation.
        detail: String,
        /// The underlying cause, if any.
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Receive or shutdown deadline exceeded.
    #[error("timeout during {operation} after {elapsed_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// How long the operation waited before giving up.
        elapsed_ms: u64,
    },

    /// Missing required fields in an envelope.
    #[error("validation failed for {operation}: {detail}")]
    ValidationFailed {
        /// The operation whose input failed validation.
        operation: &'static str,
        /// Human-readable explanation.
        detail: String,
    },
}

impl HubError {
    /// The stable [`ErrorCode`] for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidState { .. } => ErrorCode::InvalidState,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::QueueFull { .. } => ErrorCode::QueueFull,
            Self::DeliveryFailed { .. } => ErrorCode::DeliveryFailed,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::ValidationFailed { .. } => ErrorCode::ValidationFailed,
        }
    }

    /// The `operation` this error was raised from.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::InvalidState { operation, .. }
            | Self::InvalidConfig { operation, .. }
            | Self::DeliveryFailed { operation, .. }
            | Self::Timeout { operation, .. }
            | Self::ValidationFailed { operation, .. } => operation,
            Self::NotFound { kind, .. } | Self::AlreadyExists { kind, .. } => kind,
            Self::QueueFull { .. } => "send",
        }
    }

    /// Recovery guidance for this error.
    #[must_use]
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::QueueFull { .. } => Recovery::retryable(50),
            Self::Timeout { .. } => Recovery::retryable(100),
            Self::DeliveryFailed { .. } => Recovery::retryable(1_000),
            Self::InvalidState { .. }
            | Self::InvalidConfig { .. }
            | Self::NotFound { .. }
            | Self::AlreadyExists { .. }
            | Self::ValidationFailed { .. } => Recovery::not_retryable(),
        }
    }

    /// Build a `{code, message, operation, context, recovery, cause}`
    /// envelope, for hosts that want to serialize the error rather than
    /// match on the enum.
    #[must_use]
    pub fn into_envelope(self) -> ErrorEnvelope {
        let code = self.code();
        let operation = self.operation();
        let recovery = self.recovery();
        let message = self.to_string();
        let detail = match &self {
            Self::InvalidState { detail, .. }
            | Self::InvalidConfig { detail, .. }
            | Self::DeliveryFailed { detail, .. }
            | Self::ValidationFailed { detail, .. } => Some(detail.clone()),
            Self::NotFound { name, .. } | Self::AlreadyExists { name, .. } => Some(name.clone()),
            Self::QueueFull { queue, .. } => Some(queue.clone()),
            Self::Timeout { .. } => None,
        };
        let cause = if let Self::DeliveryFailed { cause, .. } = self {
            cause.map(|c| c.to_string())
        } else {
            None
        };
        ErrorEnvelope {
            code,
            message,
            operation,
            context: ErrorContext::new(operation, detail),
            recovery,
            cause,
        }
    }
}

/// The serializable `{code, message, operation, context, recovery, cause}`
/// shape a host application forwards across its own boundary.
#[derive(Debug, Clone)]
pub struct ErrorEnvelope {
    /// Stable error identifier.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// The operation that raised the error.
    pub operation: &'static str,
    /// Where/when context.
    pub context: ErrorContext,
    /// Retry guidance.
    pub recovery: Recovery,
    /// The underlying cause's message, if any.
    pub cause: Option<String>,
}
