//! Pending-call registry: per-session bookkeeping of outstanding requests
//! awaiting a reply.
//!
//! Each tracked call is backed by a [`tokio::sync::oneshot`] channel rather
//! than an explicit `Mutex` + `Condvar` latch — a oneshot already has exactly
//! the semantics this registry needs (at-most-one signal, tolerates the
//! signal arriving before the wait, and a dropped sender resolves the waiter
//! instead of hanging it).

use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::{
    envelope::{Envelope, ErrorDetail},
    error::Error,
    session::SessionId,
};

fn session_closed_reply(id: &str) -> Envelope {
    Envelope::synthetic_error(
        id,
        ErrorDetail {
            error: Error::SessionClosed.to_string(),
            reasons: None,
            stack_trace: None,
        },
    )
}

fn timeout_reply(id: &str) -> Envelope {
    Envelope::synthetic_error(
        id,
        ErrorDetail {
            error: Error::Timeout.to_string(),
            reasons: None,
            stack_trace: None,
        },
    )
}

/// A mapping `session -> (request-id -> pending call)`.
///
/// Installed with [`PendingCallRegistry::install_session`] when a
/// [`crate::client::Client`] adopts a session, and purged in full with
/// [`PendingCallRegistry::purge_session`] when that session closes.
#[derive(Default)]
pub struct PendingCallRegistry {
    sessions: DashMap<SessionId, DashMap<String, oneshot::Sender<Envelope>>>,
}

impl PendingCallRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the (initially empty) call table for `session`, idempotently.
    pub fn install_session(&self, session: SessionId) {
        self.sessions.entry(session).or_default();
    }

    /// Start tracking `request` (which must carry a correlation id) and
    /// return a receiver that resolves when the reply arrives, the call
    /// times out, or the session is purged.
    ///
    /// # Errors
    /// [`Error::MissingCorrelationId`] if `request` has no id;
    /// [`Error::DuplicateRequestId`] if that id is already tracked for this
    /// session.
    pub fn start_tracking(
        &self,
        session: SessionId,
        request: &Envelope,
    ) -> Result<oneshot::Receiver<Envelope>, Error> {
        let id = request.id.clone().ok_or(Error::MissingCorrelationId)?;
        let table = self.sessions.entry(session).or_default();
        if table.contains_key(&id) {
            return Err(Error::DuplicateRequestId(id));
        }
        let (tx, rx) = oneshot::channel();
        table.insert(id, tx);
        Ok(rx)
    }

    /// Deliver `reply` to the waiter tracked under `id`, consuming the
    /// entry. A reply for an id this registry never tracked (including one
    /// that already timed out and was removed) is reported but otherwise
    /// harmless — the sender side just drops it silently.
    ///
    /// # Errors
    /// [`Error::UnknownSession`] / [`Error::UnknownCorrelationId`] if there
    /// is nothing tracked for this `(session, id)` pair.
    pub fn signal_result(&self, session: SessionId, id: &str, reply: Envelope) -> Result<(), Error> {
        let table = self.sessions.get(&session).ok_or(Error::UnknownSession)?;
        let (_, tx) = table
            .remove(id)
            .ok_or_else(|| Error::UnknownCorrelationId(id.to_string()))?;
        // The receiver may already be gone (timed out and dropped); that is
        // not this registry's problem to report.
        let _ = tx.send(reply);
        Ok(())
    }

    /// Stop tracking `id` without signalling it (used after a timeout fires
    /// to prevent a late reply from trying to signal a dead receiver).
    pub fn stop_tracking(&self, session: SessionId, id: &str) {
        if let Some(table) = self.sessions.get(&session) {
            table.remove(id);
        }
    }

    /// Remove every pending call for `session`, resolving each waiter with a
    /// synthetic `ERROR` reply so no caller hangs forever past a close.
    pub fn purge_session(&self, session: SessionId) {
        if let Some((_, table)) = self.sessions.remove(&session) {
            for (id, tx) in table {
                let _ = tx.send(session_closed_reply(&id));
            }
        }
    }
}

/// Await `rx`, applying `timeout` (a `Duration::ZERO` means "wait forever",
/// negative timeouts are unrepresentable by `Duration` and
/// so are rejected by the type system rather than at runtime).
///
/// On timeout, the pending entry is removed so a reply that arrives after
/// the deadline is simply dropped rather than erroring.
pub async fn await_result(
    rx: oneshot::Receiver<Envelope>,
    timeout: Duration,
    registry: &PendingCallRegistry,
    session: SessionId,
    id: &str,
) -> Envelope {
    if timeout.is_zero() {
        return rx.await.unwrap_or_else(|_| session_closed_reply(id));
    }
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(envelope)) => envelope,
        Ok(Err(_)) => session_closed_reply(id),
        Err(_elapsed) => {
            registry.stop_tracking(session, id);
            timeout_reply(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn request() -> Envelope {
        Envelope::request("ECHO", None)
    }

    #[rstest]
    fn start_tracking_requires_an_id() {
        let registry = PendingCallRegistry::new();
        let session = SessionId::new_for_test();
        let notif = Envelope::notification("ECHO", None);
        assert!(matches!(
            registry.start_tracking(session, &notif),
            Err(Error::MissingCorrelationId)
        ));
    }

    #[rstest]
    fn duplicate_id_is_rejected() {
        let registry = PendingCallRegistry::new();
        let session = SessionId::new_for_test();
        let req = request();
        registry.install_session(session);
        registry.start_tracking(session, &req).expect("first tracking call");
        assert!(matches!(
            registry.start_tracking(session, &req),
            Err(Error::DuplicateRequestId(_))
        ));
    }

    #[tokio::test]
    async fn signal_result_resolves_the_waiter() {
        let registry = PendingCallRegistry::new();
        let session = SessionId::new_for_test();
        registry.install_session(session);
        let req = request();
        let rx = registry.start_tracking(session, &req).expect("tracking");
        let id = req.id.clone().expect("request has id");
        let reply = Envelope::success_response(&req, None).expect("request expects a response");
        registry.signal_result(session, &id, reply).expect("signal");
        let received = rx.await.expect("waiter resolves");
        assert_eq!(received.id, req.id);
    }

    #[tokio::test]
    async fn purge_session_resolves_outstanding_waiters_with_error() {
        let registry = PendingCallRegistry::new();
        let session = SessionId::new_for_test();
        registry.install_session(session);
        let req = request();
        let rx = registry.start_tracking(session, &req).expect("tracking");
        registry.purge_session(session);
        let received = rx.await.expect("waiter resolves even on purge");
        assert_eq!(received.op, crate::envelope::OP_ERROR);
    }

    #[tokio::test]
    async fn await_result_times_out_and_stops_tracking() {
        let registry = PendingCallRegistry::new();
        let session = SessionId::new_for_test();
        registry.install_session(session);
        let req = request();
        let id = req.id.clone().expect("request has id");
        let rx = registry.start_tracking(session, &req).expect("tracking");
        let reply = await_result(rx, Duration::from_millis(10), &registry, session, &id).await;
        assert_eq!(reply.op, crate::envelope::OP_ERROR);
        // A late signal should now fail: the entry was removed on timeout.
        assert!(registry.signal_result(session, &id, reply).is_err());
    }
}
