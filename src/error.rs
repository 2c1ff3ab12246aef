use std::time::Duration;

use reqwest::StatusCode;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum HttpUtilError {
    /// An argument was null-like, blank or malformed at configuration time.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },
    /// An argument was outside its accepted range.
    #[error("argument `{name}` out of range: {reason}")]
    OutOfRange { name: &'static str, reason: String },
    /// A raw form body could not be split into `key=value` pairs.
    #[error("invalid form content: {0}")]
    ContentFormat(String),
    /// The builder, client or registry was already disposed.
    #[error("{0} has been disposed")]
    Disposed(&'static str),
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The buffered response body exceeded the configured limit.
    #[error("response body exceeds the buffer limit of {limit} bytes")]
    BodyTooLarge { limit: usize },
    /// The configured timeout elapsed and no retry was left.
    #[error(
        "the request was canceled due to the configured timeout of {} seconds elapsing",
        .timeout.as_secs_f64()
    )]
    Timeout { timeout: Duration },
    /// The caller cancelled the operation.
    #[error("the operation was cancelled")]
    Cancelled,
    /// Non-success HTTP status with success enforcement enabled.
    #[error("response status code does not indicate success: {status} ({reason})")]
    Status { status: StatusCode, reason: String },
    /// Response decoding error.
    #[error("decode error: {0}")]
    Decode(String),
}

impl HttpUtilError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn out_of_range(name: &'static str, reason: impl Into<String>) -> Self {
        Self::OutOfRange {
            name,
            reason: reason.into(),
        }
    }

    /// Returns `true` when the configured timeout elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` when the caller cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Status code carried by a [`HttpUtilError::Status`] error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(err) => err.status(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for HttpUtilError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
