use crate::tenant::GuardRejection;

/// Errors raised by the streaming transport path.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("request timeout: {0}")]
    Timeout(String),
    #[error("stream closed by server")]
    StreamClosed,
}

impl From<reqwest::Error> for TransportError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Self::Timeout(value.to_string());
        }
        Self::Connection(value.to_string())
    }
}

/// Errors raised while mapping a raw frame into a [`DomainEvent`].
///
/// These are per-frame failures: the offending frame is dropped and the
/// connection keeps running.
///
/// [`DomainEvent`]: crate::event::DomainEvent
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("frame data is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("frame data is not a JSON object")]
    NotObject,
    #[error("frame is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Errors raised by the REST polling fallback.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("poll request failed: {0}")]
    Request(String),
    #[error("poll request timeout: {0}")]
    Timeout(String),
    #[error("poll http error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("invalid poll response: {0}")]
    InvalidResponse(String),
    #[error("tenant guard rejected poll: {0}")]
    Tenant(GuardRejection),
}

impl From<reqwest::Error> for PollError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Self::Timeout(value.to_string());
        }
        Self::Request(value.to_string())
    }
}
