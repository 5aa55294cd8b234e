use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Main error type for the interlink communication layer
#[derive(Debug)]
pub enum LinkError {
    /// Configuration or CLI argument errors
    Config(String),

    /// Rate limiting operation errors
    RateLimit(String),

    /// Middleware pipeline errors (interception or stage failure)
    Pipeline(PipelineError),

    /// Message queue errors
    Queue(QueueError),

    /// Conflict detection and resolution errors
    Conflict(ConflictError),

    /// Storage backend errors
    Storage(String),

    /// JSON serialization/deserialization errors
    Serialization(serde_json::Error),

    /// System I/O errors
    Io(std::io::Error),

    /// Internal lock poisoning or concurrency errors
    Concurrency(String),
}

/// Errors raised while driving a payload through a middleware chain
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineError {
    /// Deliberate halt from an admission-control stage (e.g. rate limit exceeded)
    Intercepted {
        middleware: String,
        reason: String,
        retry_after_ms: Option<u64>,
    },

    /// Unexpected failure inside a stage
    Failed { middleware: String, message: String },
}

/// Message queue specific errors
#[derive(Clone, Debug, PartialEq)]
pub enum QueueError {
    /// A registered filter refused the message; nothing was stored
    Filtered { message_type: String },

    /// No processor is registered for this message type
    NoProcessor { message_type: String },

    /// Processor returned an error
    Processing { message_id: String, reason: String },

    /// Message could not be found
    NotFound(String),
}

/// Conflict resolution errors
#[derive(Clone, Debug, PartialEq)]
pub enum ConflictError {
    /// No pending conflict with this id
    NotFound(String),

    /// Strategy name could not be parsed
    UnknownStrategy(String),

    /// `user-choice` requires a caller supplied value
    MissingUserChoice(String),

    /// `custom-resolver` requires a resolver registered for the path
    NoCustomResolver(String),

    /// A custom resolver returned an error
    Resolver { path: String, reason: String },
}

impl PipelineError {
    /// Build an interception signal; the manager fills in the middleware name.
    pub fn intercept(reason: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        PipelineError::Intercepted {
            middleware: String::new(),
            reason: reason.into(),
            retry_after_ms,
        }
    }

    /// Build a stage failure; the manager fills in the middleware name.
    pub fn failed(message: impl Into<String>) -> Self {
        PipelineError::Failed {
            middleware: String::new(),
            message: message.into(),
        }
    }

    pub fn middleware(&self) -> &str {
        match self {
            PipelineError::Intercepted { middleware, .. } => middleware,
            PipelineError::Failed { middleware, .. } => middleware,
        }
    }

    pub fn is_interception(&self) -> bool {
        matches!(self, PipelineError::Intercepted { .. })
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            PipelineError::Intercepted { retry_after_ms, .. } => *retry_after_ms,
            PipelineError::Failed { .. } => None,
        }
    }

    /// Attach the name of the stage that raised this error, unless already set
    pub(crate) fn attributed_to(mut self, name: &str) -> Self {
        let slot = match &mut self {
            PipelineError::Intercepted { middleware, .. } => middleware,
            PipelineError::Failed { middleware, .. } => middleware,
        };
        if slot.is_empty() {
            *slot = name.to_string();
        }
        self
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Config(msg) => write!(f, "Configuration error: {}", msg),
            LinkError::RateLimit(msg) => write!(f, "Rate limiting error: {}", msg),
            LinkError::Pipeline(err) => write!(f, "Pipeline error: {}", err),
            LinkError::Queue(err) => write!(f, "Queue error: {}", err),
            LinkError::Conflict(err) => write!(f, "Conflict error: {}", err),
            LinkError::Storage(msg) => write!(f, "Storage error: {}", msg),
            LinkError::Serialization(err) => write!(f, "Serialization error: {}", err),
            LinkError::Io(err) => write!(f, "I/O error: {}", err),
            LinkError::Concurrency(msg) => write!(f, "Concurrency error: {}", msg),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Intercepted {
                middleware,
                reason,
                retry_after_ms: Some(ms),
            } => write!(
                f,
                "intercepted by '{}': {} (retry after {}ms)",
                middleware, reason, ms
            ),
            PipelineError::Intercepted {
                middleware, reason, ..
            } => write!(f, "intercepted by '{}': {}", middleware, reason),
            PipelineError::Failed {
                middleware,
                message,
            } => write!(f, "middleware '{}' failed: {}", middleware, message),
        }
    }
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Filtered { message_type } => {
                write!(f, "message of type '{}' rejected by filter", message_type)
            }
            QueueError::NoProcessor { message_type } => {
                write!(f, "no processor registered for type '{}'", message_type)
            }
            QueueError::Processing { message_id, reason } => {
                write!(f, "processing message {} failed: {}", message_id, reason)
            }
            QueueError::NotFound(id) => write!(f, "message {} not found", id),
        }
    }
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictError::NotFound(id) => write!(f, "conflict {} not found", id),
            ConflictError::UnknownStrategy(name) => {
                write!(f, "unknown resolution strategy '{}'", name)
            }
            ConflictError::MissingUserChoice(id) => {
                write!(f, "conflict {} requires a user supplied value", id)
            }
            ConflictError::NoCustomResolver(path) => {
                write!(f, "no custom resolver registered for path '{}'", path)
            }
            ConflictError::Resolver { path, reason } => {
                write!(f, "custom resolver for '{}' failed: {}", path, reason)
            }
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LinkError::Io(err) => Some(err),
            LinkError::Serialization(err) => Some(err),
            LinkError::Pipeline(err) => Some(err),
            LinkError::Queue(err) => Some(err),
            LinkError::Conflict(err) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for PipelineError {}
impl std::error::Error for QueueError {}
impl std::error::Error for ConflictError {}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, LinkError>;

impl IntoResponse for LinkError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let retry_after = match &self {
            LinkError::Pipeline(err) => err.retry_after_ms(),
            _ => None,
        };

        let error_response = json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.user_message(),
                "type": self.error_type(),
            }
        });

        let mut response = (status_code, Json(error_response)).into_response();
        if let Some(ms) = retry_after {
            // retry-after is expressed in whole seconds
            let seconds = ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl LinkError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            LinkError::Config(_) => StatusCode::BAD_REQUEST,
            LinkError::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            LinkError::Pipeline(PipelineError::Intercepted { .. }) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            LinkError::Pipeline(PipelineError::Failed { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            LinkError::Queue(QueueError::Filtered { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            LinkError::Queue(QueueError::NotFound(_)) => StatusCode::NOT_FOUND,
            LinkError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LinkError::Conflict(ConflictError::NotFound(_)) => StatusCode::NOT_FOUND,
            LinkError::Conflict(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LinkError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            LinkError::Serialization(_) => StatusCode::BAD_REQUEST,
            LinkError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LinkError::Concurrency(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            LinkError::Config(msg) => format!("Configuration error: {}", msg),
            LinkError::RateLimit(_) => "Rate limit exceeded. Please try again later.".to_string(),
            LinkError::Pipeline(err) => err.to_string(),
            LinkError::Queue(err) => err.to_string(),
            LinkError::Conflict(err) => err.to_string(),
            LinkError::Storage(_) => {
                "Storage temporarily unavailable. Please try again later.".to_string()
            }
            LinkError::Serialization(_) => {
                "Data processing error. Please check your request format.".to_string()
            }
            LinkError::Io(_) | LinkError::Concurrency(_) => {
                "Internal server error. Please try again later.".to_string()
            }
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            LinkError::Config(_) => "configuration_error",
            LinkError::RateLimit(_) => "rate_limit_exceeded",
            LinkError::Pipeline(PipelineError::Intercepted { .. }) => "intercepted",
            LinkError::Pipeline(PipelineError::Failed { .. }) => "middleware_error",
            LinkError::Queue(_) => "queue_error",
            LinkError::Conflict(_) => "conflict_error",
            LinkError::Storage(_) => "storage_error",
            LinkError::Serialization(_) => "serialization_error",
            LinkError::Io(_) => "io_error",
            LinkError::Concurrency(_) => "concurrency_error",
        }
    }
}

// Conversions from common error types
impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Io(err)
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Serialization(err)
    }
}

impl From<PipelineError> for LinkError {
    fn from(err: PipelineError) -> Self {
        LinkError::Pipeline(err)
    }
}

impl From<QueueError> for LinkError {
    fn from(err: QueueError) -> Self {
        LinkError::Queue(err)
    }
}

impl From<ConflictError> for LinkError {
    fn from(err: ConflictError) -> Self {
        LinkError::Conflict(err)
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::LinkError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::LinkError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! concurrency_error {
    ($msg:expr) => {
        $crate::error::LinkError::Concurrency($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::LinkError::Concurrency(format!($fmt, $($arg)*))
    };
}
