//! Transport error taxonomy.
//!
//! Retry eligibility is decided by a total match over a closed kind
//! enumeration produced at the transport boundary. Nothing downstream
//! inspects error message strings.

use thiserror::Error;

/// Classification of a terminal stream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// No terminal state was reached within the configured duration. Covers
    /// both the wall-clock request timer and the per-chunk idle timer; an
    /// abort-by-timer is indistinguishable from a transport stall on purpose.
    Timeout,
    /// Connection-level failure: refused, reset, or closed before the stream
    /// signalled completion.
    Connection,
    /// The endpoint answered with a body that is not an event stream.
    StreamUnsupported,
    /// The API rejected the request (non-2xx status).
    Api,
    /// The stream delivered consecutive payloads that could not be decoded.
    InvalidPayload,
}

impl StreamErrorKind {
    /// Whether a failure of this kind warrants re-issuing the request.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        match self {
            Self::Timeout | Self::Connection | Self::StreamUnsupported => true,
            Self::Api | Self::InvalidPayload => false,
        }
    }
}

impl std::fmt::Display for StreamErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::StreamUnsupported => "stream unsupported",
            Self::Api => "api",
            Self::InvalidPayload => "invalid payload",
        };
        f.write_str(name)
    }
}

/// A classified terminal stream failure with human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct StreamError {
    pub kind: StreamErrorKind,
    pub message: String,
}

impl StreamError {
    #[must_use]
    pub fn new(kind: StreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StreamErrorKind::Timeout, message)
    }

    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(StreamErrorKind::Connection, message)
    }

    #[must_use]
    pub fn api(message: impl Into<String>) -> Self {
        Self::new(StreamErrorKind::Api, message)
    }
}
