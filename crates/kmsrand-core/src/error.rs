//! Error taxonomy for the random byte source.
//!
//! Every failure is surfaced to the immediate caller exactly once. Nothing in
//! this crate retries, pads, or substitutes locally generated bytes.

use thiserror::Error;

/// Boxed transport error carried as the source of [`Error::Connection`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by [`RandomByteSource`](crate::RandomByteSource) and the
/// services it wraps.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller asked for more bytes than the protocol's signed 32-bit
    /// length field can carry. Detected locally; no remote call is made.
    #[error("request too large: cannot request more than {max} bytes ({requested} requested)")]
    RequestTooLarge { requested: usize, max: usize },

    /// The session with the remote service could not be established or broke
    /// down in transport.
    #[error("failed to connect to the random service: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The remote service rejected a well-formed request, or answered with a
    /// body that could not be decoded.
    #[error("failed to generate random bytes: {0}")]
    RemoteCall(#[from] RemoteError),

    /// The remote service returned fewer bytes than were requested.
    #[error("not enough bytes returned ({received} wanted {requested})")]
    ShortResponse { requested: usize, received: usize },
}

impl Error {
    /// Connection error without an underlying cause.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Connection error wrapping a transport-level cause.
    pub fn connection_with(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Error status reported by the remote service.
///
/// Mirrors the `{"error": {"code", "status", "message"}}` envelope used by
/// Google APIs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status} ({code}): {message}")]
pub struct RemoteError {
    /// HTTP status code.
    pub code: u16,
    /// Canonical status name, e.g. `INVALID_ARGUMENT`.
    pub status: String,
    /// Human-readable message from the service.
    pub message: String,
}

impl RemoteError {
    pub fn new(code: u16, status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            status: status.into(),
            message: message.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
