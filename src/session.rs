//! Session handle: the unit tracked by the pending-call registry and the
//! per-class session registry, and the thing a handler or proxy actually
//! sends through.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio_tungstenite::tungstenite::Message;

use crate::{
    envelope::Envelope,
    error::Error,
    transport::{self, OutboundSink},
};

/// Process-wide monotonically increasing session identifier. Sessions in
/// this framework are not addressed by anything the transport host hands
/// back (e.g. a socket fd could be reused); minting our own id sidesteps
/// that entirely.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque session identifier, stable for the lifetime of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Mint a fresh id for tests that need one without a real [`Session`]
    /// (e.g. exercising [`crate::pending::PendingCallRegistry`] directly).
    #[cfg(test)]
    pub(crate) fn new_for_test() -> Self {
        Self::next()
    }
}

/// A cheap, cloneable handle to one connection's sending half.
///
/// Cloning a `Session` does not duplicate the connection; every clone shares
/// the same underlying sink and open flag, which is what lets the session
/// registry, the pending-call registry, and a broadcast loop all hold a copy
/// concurrently.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    sink: Arc<dyn OutboundSink>,
}

impl Session {
    #[must_use]
    pub fn new(sink: Arc<dyn OutboundSink>) -> Self {
        Self {
            id: SessionId::next(),
            sink,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sink.is_open()
    }

    /// Stamp `sentMillis` (unless `envelope` is a reply) and send it.
    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<(), Error> {
        let mut envelope = envelope.clone();
        envelope.stamp_sent();
        let message = transport::encode_envelope(&envelope)?;
        self.sink.send(message).await
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.sink.send(Message::Ping(transport::ping_payload().into())).await
    }

    /// Reply to a peer-initiated ping by echoing the payload back as a pong.
    /// `tokio_tungstenite` answers pings automatically at the protocol
    /// level for some transports but not all, so the endpoint engine does it
    /// explicitly here regardless.
    pub async fn ping_reply(&self, payload: Vec<u8>) -> Result<(), Error> {
        self.sink.send(Message::Pong(payload.into())).await
    }

    pub async fn close(&self) -> Result<(), Error> {
        self.sink.close(None).await
    }

    pub async fn close_with_reason(&self, reason: impl Into<String>) -> Result<(), Error> {
        self.sink.close(Some(reason.into())).await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}
