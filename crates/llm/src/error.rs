use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors produced by the streaming core.
///
/// Only [`LlmError::ConfigurationMissing`] and [`LlmError::ModelUnknown`] are
/// returned before a stream exists; every other kind is surfaced inside the
/// stream as an `error` event followed by `message_complete` (for any partial
/// text) and `stream_end`.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No usable API key for the chosen provider (and no OpenRouter
    /// fallback), or the backend rejected the key we sent.
    #[error("Provider '{provider}' is not usable: {detail}")]
    ConfigurationMissing { provider: String, detail: String },

    /// Neither id nor alias resolved in the model registry.
    #[error("Unknown model or class: '{0}'")]
    ModelUnknown(String),

    /// The backend rejected with an explicit rate-limit signal.
    #[error("Rate limited by {provider}: {message}")]
    RateLimited { provider: String, message: String },

    /// Advisory pre-flight rejection from the quota manager.
    #[error("Quota exceeded for {provider}/{model}")]
    QuotaExceeded { provider: String, model: String },

    /// Network, connection or stream-decode failure.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// The backend returned a malformed or unexpected stream shape.
    #[error("Protocol failure: {0}")]
    ProtocolFailure(String),

    /// The backend signalled a safety/policy stop.
    #[error("Content blocked by {provider}: {message}")]
    ContentBlocked { provider: String, message: String },

    /// Cooperative cancellation.
    #[error("cancelled")]
    Cancelled,

    /// Per-request deadline expired.
    #[error("timeout")]
    Timeout,

    /// The CLI adapter's process exited non-zero or its output did not parse.
    #[error("Subprocess failure: {0}")]
    SubprocessFailure(String),

    /// Unexpected invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LlmError {
    /// Classify a non-success provider HTTP status the way every adapter
    /// does: explicit kinds for the statuses that change caller behavior,
    /// everything else a protocol failure.
    pub(crate) fn from_status(provider: &str, status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::ConfigurationMissing {
                provider: provider.to_string(),
                detail: message,
            },
            429 => Self::RateLimited {
                provider: provider.to_string(),
                message,
            },
            400 => Self::ProtocolFailure(message),
            500..=599 => Self::TransportFailure(format!("{provider} returned {status}: {message}")),
            _ => Self::ProtocolFailure(format!("{provider} returned {status}: {message}")),
        }
    }

    /// Numeric code carried on the in-stream `error` event, when one exists.
    pub(crate) fn event_code(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::ConfigurationMissing { .. } => Some(401),
            Self::ContentBlocked { .. } => Some(451),
            _ => None,
        }
    }
}
