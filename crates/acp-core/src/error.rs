//! Error types for ACP Core
//!
//! Four classes of failure flow through the pipeline:
//! - validation errors, detected before any external call
//! - configuration errors (missing credentials)
//! - external-service errors from the model or the key-value store
//! - gate rejections, which are *not* errors and never appear here

use acp_diff::AnimationError;
use std::time::Duration;

/// Errors from the external model service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// No credentials for the model service
    #[error("model client is not configured")]
    NotConfigured,

    /// Upstream asked us to back off
    #[error("model service rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Upstream rejected the request body
    #[error("model service rejected input: {0}")]
    MalformedInput(String),

    /// Call exceeded its budget
    #[error("model call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Network or non-success status
    #[error("model transport error: {0}")]
    Transport(String),

    /// Response could not be understood
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// Whether a caller could reasonably retry
    ///
    /// The core itself never retries; this is a hint for hosts.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Transport(_)
        )
    }

    #[inline]
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Transform service failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    /// Request failed validation
    #[error("invalid transform request: {0}")]
    Validation(String),

    /// Underlying model call failed
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl From<AnimationError> for TransformError {
    fn from(err: AnimationError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Batch evaluation failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    /// Batch is missing required identifiers
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// Scoring call failed
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Key-value store failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable or rejected the operation
    #[error("store backend error: {0}")]
    Backend(String),

    /// Stored value could not be (de)serialized
    #[error("store serialization error for '{key}': {message}")]
    Serialization { key: String, message: String },
}

impl StoreError {
    pub(crate) fn serialization(key: impl Into<String>, err: &serde_json::Error) -> Self {
        Self::Serialization {
            key: key.into(),
            message: err.to_string(),
        }
    }
}

/// Session lifecycle violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Session has reached its terminal state
    #[error("session {0} has ended")]
    SessionEnded(String),

    /// No such session is being accumulated
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// Record belongs to another session
    #[error("record for session {record} appended to session {session}")]
    SessionMismatch { session: String, record: String },
}

/// Configuration loading failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Errors surfaced by the inbound handlers
///
/// Each variant maps to one status code via [`ApiError::status_code`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// Malformed or missing request fields
    #[error("bad request: {0}")]
    Validation(String),

    /// No matching resource
    #[error("not found: {0}")]
    NotFound(String),

    /// Upstream rate limit, surfaced distinctly for backoff
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Required credentials absent
    #[error("service unavailable: {0}")]
    NotConfigured(String),

    /// External service failed or timed out
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Store failed on a read path
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ApiError {
    /// HTTP-style status code
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::RateLimited { .. } => 429,
            Self::Upstream(_) => 502,
            Self::NotConfigured(_) => 503,
            Self::Storage(_) => 500,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NotConfigured => Self::NotConfigured(err.to_string()),
            ModelError::RateLimited { retry_after } => Self::RateLimited { retry_after },
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<TransformError> for ApiError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::Validation(msg) => Self::Validation(msg),
            TransformError::Model(model) => model.into(),
        }
    }
}

impl From<EvaluationError> for ApiError {
    fn from(err: EvaluationError) -> Self {
        match err {
            EvaluationError::InvalidBatch(msg) => Self::Validation(msg),
            EvaluationError::Model(model) => model.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::UnknownSession(_) => Self::NotFound(err.to_string()),
            other => Self::Validation(other.to_string()),
        }
    }
}
