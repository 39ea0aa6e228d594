use std::sync::Arc;

use thiserror::Error;

/// Represents a result type for operations in the feature flag client.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to users of the client.
///
/// Failures of the streaming connection and of data application are never returned from here;
/// they are reported through [`crate::status::State`] instead.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The env secret is not base64 or does not carry account, project and environment ids.
    #[error("invalid env secret")]
    InvalidEnvSecret,

    /// Invalid streaming URL configuration.
    #[error("invalid streaming_url configuration")]
    InvalidStreamingUrl(#[source] url::ParseError),

    /// A bootstrap document could not be parsed.
    #[error("invalid data json")]
    InvalidJson(#[source] Arc<serde_json::Error>),

    /// Bootstrapping from external data is only allowed in offline mode.
    #[error("client is not in offline mode")]
    NotOffline,

    /// Indicates that the streaming thread panicked. This should normally never happen.
    #[error("streaming thread panicked")]
    StreamingThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidJson(Arc::new(value))
    }
}
