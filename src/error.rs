//! Unified error type for the framework.

use thiserror::Error;

use crate::envelope::ErrorDetail;

/// Every failure the framework itself can raise.
///
/// Handler-level failures are expected to be reported as `Err(Error)` too
/// (typically `Error::Handler`), so that the endpoint engine can turn them
/// into `ERROR` replies without ever letting a panic or a bare `Result::Err`
/// escape the receive loop.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode message body")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode message body")]
    Decode(#[source] serde_json::Error),

    #[error("handler for '{0}' failed")]
    Handler(String, #[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("operation '{0}' is reserved and cannot be registered")]
    ReservedOp(String),

    #[error("Unknown message type '{0}'")]
    UnknownOp(String),

    #[error("handler panicked")]
    HandlerPanicked,

    #[error("envelope does not expect a response")]
    NotARequest,

    #[error("request id '{0}' is already being tracked")]
    DuplicateRequestId(String),

    #[error("no pending call found for id '{0}'")]
    UnknownCorrelationId(String),

    #[error("session is not tracked by the pending registry")]
    UnknownSession,

    #[error("request timed out waiting for a reply")]
    Timeout,

    #[error("session was closed while the call was outstanding")]
    SessionClosed,

    #[error("client is not connected to a session")]
    NotConnected,

    #[error("session is not open")]
    SessionNotOpen,

    #[error("request envelope has no correlation id")]
    MissingCorrelationId,

    #[error("failed to connect proxy '{name}' to a '{client_type}' after exhausting retries")]
    ProxyExhausted { name: String, client_type: String },

    #[error("no proxy registered under name '{0}'")]
    UnknownProxy(String),

    #[error("proxy '{name}' is cached as a different client type than the expected '{expected}'")]
    ProxyTypeMismatch { name: String, expected: String },

    #[error("remote error: {0}")]
    Remote(ErrorDetail),
}

impl Error {
    /// Wrap an arbitrary handler failure, tagging it with the op that
    /// produced it.
    pub fn handler(op: impl Into<String>, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Handler(op.into(), Box::new(cause))
    }
}
