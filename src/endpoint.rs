//! Endpoint engine: the single receive-loop body shared by
//! [`crate::client::Client`] and [`crate::service::Service`].
//!
//! Decodes one frame, dispatches requests to the handler table, routes
//! replies to whichever [`ReplyRoute`] the owner installed, and guarantees
//! that nothing — a decode failure, an unknown op, a handler's `Err`, or a
//! handler panic — escapes as an unhandled exception.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use tracing::{debug, trace, warn};

use crate::{
    envelope::{Envelope, StackCap, WireEnvelope},
    error::Error,
    handler::HandlerTable,
    pending::PendingCallRegistry,
    session::Session,
    transport::WireMessage,
};

/// Where a reply envelope (`RESPONSE`/`ERROR`) gets routed once decoded.
pub enum ReplyRoute {
    /// Client role: replies complete a tracked pending call.
    Client(Arc<PendingCallRegistry>),
    /// Service role: replies have no meaning for a pure service and are
    /// logged and dropped: a service ignores replies.
    Ignore,
}

/// Shared dispatch/reply logic. Cheap to clone (everything behind an `Arc`),
/// so both [`crate::client::Client`] and [`crate::service::Service`] hold one
/// and hand a clone into each connection's receive-loop task.
pub struct Endpoint {
    handlers: Arc<HandlerTable>,
    replies: ReplyRoute,
    stack_cap: StackCap,
}

impl Endpoint {
    #[must_use]
    pub fn new(handlers: Arc<HandlerTable>, replies: ReplyRoute, stack_cap: StackCap) -> Self {
        Self {
            handlers,
            replies,
            stack_cap,
        }
    }

    /// Handle one transport frame for `session`.
    pub async fn on_frame(&self, session: &Session, frame: WireMessage) {
        match frame {
            WireMessage::Text(text) => self.on_payload(session, &text).await,
            WireMessage::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => self.on_payload(session, &text).await,
                Err(e) => warn!(error = %e, "binary frame was not valid UTF-8, dropping"),
            },
            WireMessage::Ping(payload) => {
                if let Err(e) = session.ping_reply(payload).await {
                    warn!(error = %e, "failed to reply to ping");
                }
            }
            WireMessage::Pong(_) | WireMessage::Close => {}
        }
    }

    async fn on_payload(&self, session: &Session, raw: &str) {
        let received_millis = crate::envelope::now_millis();
        let wire: Result<WireEnvelope, _> = serde_json::from_str(raw);
        let wire = match wire {
            Ok(wire) => wire,
            Err(e) => {
                warn!(error = %e, "failed to parse envelope JSON, dropping frame");
                return;
            }
        };
        let id = wire.id.clone();
        let envelope = match Envelope::try_from(wire) {
            Ok(envelope) => envelope,
            Err(missing_op) => {
                warn!(id = ?missing_op.id, "envelope has a missing or null op, dropping frame");
                if let Some(id) = id {
                    let reply = Envelope::synthetic_error(
                        id,
                        crate::envelope::ErrorDetail {
                            error: "missing or null 'op' field".to_string(),
                            reasons: None,
                            stack_trace: None,
                        },
                    );
                    if let Err(e) = session.send_envelope(&reply).await {
                        warn!(error = %e, "failed to send decode-error reply");
                    }
                }
                return;
            }
        };
        let mut envelope = envelope;
        envelope.received_millis = Some(received_millis);
        self.route(session, envelope).await;
    }

    async fn route(&self, session: &Session, envelope: Envelope) {
        if envelope.is_reply() {
            self.handle_reply(session, envelope);
            return;
        }
        self.handle_request(session, envelope).await;
    }

    fn handle_reply(&self, session: &Session, envelope: Envelope) {
        match &self.replies {
            ReplyRoute::Client(registry) => {
                let Some(id) = envelope.id.clone() else {
                    // Unreachable given is_reply()'s own check, kept defensive.
                    return;
                };
                if let Err(e) = registry.signal_result(session.id(), &id, envelope) {
                    // An orphan reply (no pending call, e.g. it already timed
                    // out): dropped rather than surfaced anywhere.
                    debug!(id, error = %e, "dropping reply with no matching pending call");
                }
            }
            ReplyRoute::Ignore => {
                trace!(op = %envelope.op, "service ignoring reply-shaped envelope");
            }
        }
    }

    async fn handle_request(&self, session: &Session, mut envelope: Envelope) {
        envelope.start_processing_millis = Some(crate::envelope::now_millis());
        let handler = self.handlers.get(&envelope.op);
        let outcome = match handler {
            Some(handler) => {
                match AssertUnwindSafe(handler.handle(envelope.body.as_deref()))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(_panic) => {
                        warn!(op = %envelope.op, "handler panicked");
                        Err(Error::HandlerPanicked)
                    }
                }
            }
            None => Err(Error::UnknownOp(envelope.op.clone())),
        };
        envelope.stop_processing_millis = Some(crate::envelope::now_millis());
        if !envelope.expects_response() {
            if let Err(e) = outcome {
                warn!(op = %envelope.op, error = %e, "notification handler failed, no reply expected");
            }
            return;
        }
        let mut reply = match outcome {
            Ok(body) => Envelope::success_response(&envelope, body)
                .unwrap_or_else(|e| Envelope::error_response(Some(&envelope), &e, self.stack_cap)),
            Err(e) => Envelope::error_response(Some(&envelope), &e, self.stack_cap),
        };
        reply.start_processing_millis = envelope.start_processing_millis;
        reply.stop_processing_millis = envelope.stop_processing_millis;
        if let Err(e) = session.send_envelope(&reply).await {
            warn!(op = %envelope.op, error = %e, "failed to send reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tokio_tungstenite::tungstenite::Message;

    use super::*;
    use crate::{message::MessageType, transport::OutboundSink};

    struct RecordingSink {
        open: std::sync::atomic::AtomicBool,
        sent: StdMutex<Vec<Message>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                open: std::sync::atomic::AtomicBool::new(true),
                sent: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl OutboundSink for RecordingSink {
        async fn send(&self, message: Message) -> Result<(), Error> {
            self.sent.lock().unwrap_or_else(|p| p.into_inner()).push(message);
            Ok(())
        }
        async fn close(&self, _reason: Option<String>) -> Result<(), Error> {
            self.open.store(false, std::sync::atomic::Ordering::Relaxed);
            Ok(())
        }
        fn is_open(&self) -> bool {
            self.open.load(std::sync::atomic::Ordering::Relaxed)
        }
    }

    fn service_endpoint(handlers: Arc<HandlerTable>) -> Endpoint {
        Endpoint::new(handlers, ReplyRoute::Ignore, StackCap::Default)
    }

    #[tokio::test]
    async fn dispatches_known_op_and_sends_response() {
        let handlers = Arc::new(HandlerTable::new());
        let mt: MessageType<String, String> = MessageType::new("ECHO");
        handlers
            .register(&mt, |req: String| async move { Ok(req) })
            .expect("register");
        let endpoint = service_endpoint(handlers);
        let sink = RecordingSink::new();
        let session = Session::new(sink.clone());

        let request = Envelope::request("ECHO", crate::codec::encode(&"hi".to_string()).unwrap());
        let raw = serde_json::to_string(&request).expect("encode");
        endpoint.on_frame(&session, WireMessage::Text(raw)).await;

        let sent = sink.sent.lock().unwrap_or_else(|p| p.into_inner());
        assert_eq!(sent.len(), 1);
    }

    #[tokio::test]
    async fn unknown_op_becomes_error_reply() {
        let handlers = Arc::new(HandlerTable::new());
        let endpoint = service_endpoint(handlers);
        let sink = RecordingSink::new();
        let session = Session::new(sink.clone());

        let request = Envelope::request("NOPE", None);
        let raw = serde_json::to_string(&request).expect("encode");
        endpoint.on_frame(&session, WireMessage::Text(raw)).await;

        let sent = sink.sent.lock().unwrap_or_else(|p| p.into_inner());
        let Message::Text(text) = &sent[0] else { panic!("expected text") };
        assert!(text.contains("\"op\":\"ERROR\""));
    }

    #[tokio::test]
    async fn notification_with_failing_handler_sends_nothing() {
        let handlers = Arc::new(HandlerTable::new());
        let mt: MessageType<(), ()> = MessageType::new("FAIL");
        handlers
            .register(&mt, |_: ()| async move { Err(Error::HandlerPanicked) })
            .expect("register");
        let endpoint = service_endpoint(handlers);
        let sink = RecordingSink::new();
        let session = Session::new(sink.clone());

        let notif = Envelope::notification("FAIL", None);
        let raw = serde_json::to_string(&notif).expect("encode");
        endpoint.on_frame(&session, WireMessage::Text(raw)).await;

        assert!(sink.sent.lock().unwrap_or_else(|p| p.into_inner()).is_empty());
    }

    #[tokio::test]
    async fn handler_panic_becomes_error_reply_not_a_crash() {
        let handlers = Arc::new(HandlerTable::new());
        let mt: MessageType<(), ()> = MessageType::new("BOOM");
        handlers
            .register(&mt, |_: ()| async move {
                panic!("boom");
                #[allow(unreachable_code)]
                Ok(())
            })
            .expect("register");
        let endpoint = service_endpoint(handlers);
        let sink = RecordingSink::new();
        let session = Session::new(sink.clone());

        let request = Envelope::request("BOOM", None);
        let raw = serde_json::to_string(&request).expect("encode");
        endpoint.on_frame(&session, WireMessage::Text(raw)).await;

        let sent = sink.sent.lock().unwrap_or_else(|p| p.into_inner());
        let Message::Text(text) = &sent[0] else { panic!("expected text") };
        assert!(text.contains("\"op\":\"ERROR\""));
    }
}
