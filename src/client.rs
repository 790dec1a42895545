//! Client: connects outbound to a service, tracks exactly one active
//! session, and exposes request/response and fire-and-forget sends.

use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::value::RawValue;
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::warn;

use crate::{
    codec,
    envelope::{Envelope, ErrorDetail},
    error::Error,
    handler::HandlerTable,
    endpoint::{Endpoint, ReplyRoute},
    message::MessageType,
    pending::{self, PendingCallRegistry},
    proxy::ProxiedClient,
    session::Session,
    transport::{self, WsOutbound},
};

/// A timed-out or zero-timeout `sendRequest` never blocks the caller
/// indefinitely; this is the default applied when a call site doesn't pick
/// one explicitly.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A view over a reply envelope, typed to the response a [`MessageType`]
/// declares.
#[derive(Debug, Clone)]
pub struct Response<Res> {
    envelope: Envelope,
    _marker: PhantomData<Res>,
}

impl<Res: DeserializeOwned> Response<Res> {
    #[must_use]
    pub fn new(envelope: Envelope) -> Self {
        Self {
            envelope,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn is_successful(&self) -> bool {
        !self.envelope.op.eq_ignore_ascii_case(crate::envelope::OP_ERROR)
    }

    /// Decode the response body as `Res`.
    ///
    /// # Errors
    /// Returns the decode failure if the body doesn't match `Res`. Call
    /// [`Response::is_successful`] first — decoding an `ERROR` body as `Res`
    /// will generally fail.
    pub fn get_response(&self) -> Result<Res, Error> {
        codec::decode(self.envelope.body.as_deref())
    }

    /// Decode the response body as an [`ErrorDetail`], falling back to a
    /// detail wrapping the raw body text if it isn't shaped as one.
    #[must_use]
    pub fn get_error(&self) -> ErrorDetail {
        codec::decode(self.envelope.body.as_deref()).unwrap_or_else(|_| ErrorDetail {
            error: self
                .envelope
                .body
                .as_ref()
                .map(|b| b.get().to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
            reasons: None,
            stack_trace: None,
        })
    }

    /// # Errors
    /// [`Error::Remote`] wrapping [`Response::get_error`] if this response is
    /// an `ERROR` reply.
    pub fn throw_if_error(&self) -> Result<(), Error> {
        if self.is_successful() {
            Ok(())
        } else {
            Err(Error::Remote(self.get_error()))
        }
    }

    /// Milliseconds between send and receive, if both marks are present.
    #[must_use]
    pub fn roundtrip_millis(&self) -> Option<i64> {
        Some(self.envelope.received_millis? - self.envelope.sent_millis?)
    }

    /// Milliseconds the remote side spent in the handler, if both marks are
    /// present.
    #[must_use]
    pub fn processing_millis(&self) -> Option<i64> {
        Some(self.envelope.stop_processing_millis? - self.envelope.start_processing_millis?)
    }
}

/// A client connection. Holds at most one active [`Session`] at a time;
/// [`Client::set_session`] swaps it (closing the previous one) and
/// [`Client::connect_to`] is the usual way to obtain a fresh one.
pub struct Client {
    endpoint: Arc<Endpoint>,
    registry: Arc<PendingCallRegistry>,
    session: RwLock<Option<Session>>,
    recv_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    open: Arc<AtomicBool>,
    default_timeout: Duration,
}

impl Client {
    /// A client with no handler table of its own (it never receives
    /// unsolicited requests) and the default request timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_handlers(Arc::new(HandlerTable::new()))
    }

    /// A client that can also serve server-initiated requests over the same
    /// connection (e.g. `DEPENDENCY_UPDATED` pushes modeled as requests).
    #[must_use]
    pub fn with_handlers(handlers: Arc<HandlerTable>) -> Self {
        let registry = Arc::new(PendingCallRegistry::new());
        let endpoint = Arc::new(Endpoint::new(
            handlers,
            ReplyRoute::Client(registry.clone()),
            crate::envelope::StackCap::Default,
        ));
        Self {
            endpoint,
            registry,
            session: RwLock::new(None),
            recv_task: tokio::sync::Mutex::new(None),
            open: Arc::new(AtomicBool::new(false)),
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Connect to `url` and return a ready-to-use client.
    ///
    /// # Errors
    /// Propagates the WebSocket handshake failure.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let client = Self::new();
        client.connect_to(url).await?;
        Ok(client)
    }

    /// (Re)connect this client to `url`, installing the new session and
    /// closing whatever was previously installed.
    ///
    /// # Errors
    /// Propagates the WebSocket handshake failure.
    pub async fn connect_to(&self, url: &str) -> Result<(), Error> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(Error::Transport)?;
        let (sink, stream) = stream.split();
        let session = Session::new(Arc::new(WsOutbound::new(sink)));
        self.install(session, stream).await
    }

    async fn install<S>(
        &self,
        session: Session,
        mut stream: futures_util::stream::SplitStream<tokio_tungstenite::WebSocketStream<S>>,
    ) -> Result<(), Error>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let previous = self.set_session(session.clone()).await?;
        if let Some(previous) = previous {
            let _ = previous.close().await;
        }
        let endpoint = self.endpoint.clone();
        let registry = self.registry.clone();
        let task_session = session.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(message) => {
                        if let Some(frame) = transport::from_tungstenite(message) {
                            endpoint.on_frame(&task_session, frame).await;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "transport error reading frame, closing session");
                        break;
                    }
                }
            }
            registry.purge_session(task_session.id());
        });
        let mut guard = self.recv_task.lock().await;
        if let Some(old) = guard.replace(handle) {
            old.abort();
        }
        Ok(())
    }

    /// Install `session` as this client's active session, returning the
    /// previously-installed one (if any), which is *not* closed by this
    /// call — callers connecting through [`Client::connect_to`] close it
    /// themselves; a caller driving its own transport is free to keep it
    /// alive.
    ///
    /// # Errors
    /// [`Error::SessionNotOpen`] if `session` is already closed.
    pub async fn set_session(&self, session: Session) -> Result<Option<Session>, Error> {
        if !session.is_open() {
            return Err(Error::SessionNotOpen);
        }
        self.registry.install_session(session.id());
        self.open.store(true, Ordering::Relaxed);
        let mut guard = self.session.write().await;
        Ok(guard.replace(session))
    }

    #[must_use]
    pub async fn is_open(&self) -> bool {
        self.session.read().await.as_ref().is_some_and(Session::is_open)
    }

    /// Close the active session (if any), purging any pending calls on it.
    ///
    /// # Errors
    /// Propagates a transport failure while sending the close frame.
    pub async fn close(&self) -> Result<(), Error> {
        self.open.store(false, Ordering::Relaxed);
        if let Some(session) = self.session.write().await.take() {
            let result = session.close().await;
            self.registry.purge_session(session.id());
            result?;
        }
        if let Some(handle) = self.recv_task.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn current_session(&self) -> Result<Session, Error> {
        self.session.read().await.clone().ok_or(Error::NotConnected)
    }

    /// Send a fire-and-forget message; no reply is expected or awaited.
    ///
    /// # Errors
    /// [`Error::NotConnected`] if no session is installed; propagates a
    /// transport send failure and an encode failure.
    pub async fn send_message<Req, Res>(&self, msg_type: &MessageType<Req, Res>, body: &Req) -> Result<(), Error>
    where
        Req: Serialize,
    {
        let session = self.current_session().await?;
        let body = codec::encode(body)?;
        let envelope = Envelope::notification(msg_type.name(), body);
        session.send_envelope(&envelope).await
    }

    /// Send a request and block this task until the reply arrives or
    /// `timeout` elapses (`Duration::ZERO` waits forever).
    ///
    /// # Errors
    /// [`Error::NotConnected`] if no session is installed; propagates an
    /// encode failure or a transport send failure. A timed-out or
    /// session-closed call resolves to a synthetic `ERROR`
    /// [`Response`] rather than an `Err` — inspect it with
    /// [`Response::throw_if_error`].
    pub async fn send_request<Req, Res>(
        &self,
        msg_type: &MessageType<Req, Res>,
        body: &Req,
        timeout: Duration,
    ) -> Result<Response<Res>, Error>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let reply = self
            .send_request_raw(msg_type.name(), codec::encode(body)?, timeout)
            .await?;
        Ok(Response::new(reply))
    }

    async fn send_request_raw(
        &self,
        op: &str,
        body: Option<Box<RawValue>>,
        timeout: Duration,
    ) -> Result<Envelope, Error> {
        let session = self.current_session().await?;
        let request = Envelope::request(op, body);
        let id = request.id.clone().unwrap_or_default();
        let rx = self.registry.start_tracking(session.id(), &request)?;
        if let Err(e) = session.send_envelope(&request).await {
            self.registry.stop_tracking(session.id(), &id);
            return Err(e);
        }
        Ok(pending::await_result(rx, timeout, &self.registry, session.id(), &id).await)
    }

    /// Send a request using [`Client::default_timeout`].
    ///
    /// # Errors
    /// See [`Client::send_request`].
    pub async fn send_request_default<Req, Res>(
        &self,
        msg_type: &MessageType<Req, Res>,
        body: &Req,
    ) -> Result<Response<Res>, Error>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        self.send_request(msg_type, body, self.default_timeout).await
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn [`Client::send_request`] as a background task so the caller does not
/// block this task waiting for the reply; this is the Rust shape of
/// `sendRequestAsync` — awaiting everything is the default in async Rust, so
/// the distinguishing feature of the "async" variant is that the call
/// proceeds independent of whether the returned handle is ever awaited.
pub fn send_request_async<Req, Res>(
    client: Arc<Client>,
    msg_type: MessageType<Req, Res>,
    body: Req,
    timeout: Duration,
) -> JoinHandle<Result<Response<Res>, Error>>
where
    Req: Serialize + Send + 'static,
    Res: DeserializeOwned + Send + 'static,
{
    tokio::spawn(async move { client.send_request(&msg_type, &body, timeout).await })
}

#[async_trait]
impl ProxiedClient for Client {
    async fn connect(url: &str) -> Result<Self, Error> {
        Client::connect(url).await
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}
