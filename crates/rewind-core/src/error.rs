use rewind_config::ConfigError;
use tracing::error;

use crate::protocol::SourceId;

/// Errors reported by the replay backend or the channel to it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// The request could not be delivered or no reply arrived.
    #[error("Transport failure during '{method}': {message}")]
    Transport { method: String, message: String },

    /// The backend received the request and refused it.
    #[error("'{method}' rejected by backend (code {code}): {message}")]
    Rejected {
        method: String,
        code: i64,
        message: String,
    },

    /// The session has been closed.
    #[error("Session closed")]
    Closed,
}

impl GatewayError {
    /// Returns true if this error is transient and the request may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transport { .. })
    }

    pub fn transport(method: &str, message: impl Into<String>) -> Self {
        GatewayError::Transport {
            method: method.to_string(),
            message: message.into(),
        }
    }

    pub fn rejected(method: &str, code: i64, message: impl Into<String>) -> Self {
        GatewayError::Rejected {
            method: method.to_string(),
            code,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the thread coordination core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ThreadError {
    /// A query ran before the data it depends on was complete.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Data from the backend contradicts an expected invariant.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    /// A remote call failed.
    #[error(transparent)]
    Remote(#[from] GatewayError),

    #[error("No session has been established")]
    NoSession,

    #[error("Unknown source: {0}")]
    UnknownSource(SourceId),

    #[error("No pause for async index {0}")]
    NoPauseForAsyncIndex(usize),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ConfigError> for ThreadError {
    fn from(err: ConfigError) -> Self {
        ThreadError::Config(err.to_string())
    }
}

/// Log an invariant failure and build the matching error.
pub fn invariant(message: impl Into<String>) -> ThreadError {
    let message = message.into();
    error!(%message, "invariant violated");
    ThreadError::InvariantViolation(message)
}

pub type ThreadResult<T> = Result<T, ThreadError>;
pub type GatewayResult<T> = Result<T, GatewayError>;
