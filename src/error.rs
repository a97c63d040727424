//! Unified error type.

use thiserror::Error;

/// A boxed error from the underlying client.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shorthand for results carrying [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by tether's fallible operations.
///
/// Send failures are never retried here. They reach interceptors through
/// `after` and, for the synchronous producer, the caller through the return
/// value. Usage mistakes (closing twice, sending after close) are not errors;
/// they panic.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying client reported a failure.
    #[error("client: {0}")]
    Client(#[source] BoxError),

    /// The underlying client stopped accepting messages before this one
    /// could be handed over.
    #[error("client input closed before the message was forwarded")]
    ClientClosed,

    /// The synchronous send was dropped (timed out, aborted) before the
    /// client reported an outcome. Whether the broker got the message is
    /// unknown.
    #[error("send dropped before the client reported an outcome")]
    Cancelled,

    /// A configuration value was rejected at build time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Wraps any client error.
    pub fn client(err: impl Into<BoxError>) -> Self {
        Self::Client(err.into())
    }
}
