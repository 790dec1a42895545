//! Service: accepts inbound WebSocket connections for one service class,
//! tracks their sessions, runs a keep-alive scheduler, and dispatches
//! requests through the same [`crate::endpoint::Endpoint`] a client uses.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use futures_util::StreamExt;
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    codec,
    envelope::{Envelope, StackCap},
    error::Error,
    endpoint::{Endpoint, ReplyRoute},
    handler::{HandlerTable, RawHandler},
    registry::SessionRegistry,
    session::{Session, SessionId},
    status::{self, StatusExtension},
    transport,
};

/// Keep-alive ping cadence used unless a caller picks something else.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

struct StatusHandler {
    extension: Arc<tokio::sync::RwLock<Option<Arc<dyn StatusExtension>>>>,
}

#[async_trait::async_trait]
impl RawHandler for StatusHandler {
    async fn handle(
        &self,
        _body: Option<&serde_json::value::RawValue>,
    ) -> Result<Option<Box<serde_json::value::RawValue>>, Error> {
        let extension = self.extension.read().await.clone();
        let status = status::build_status(extension.as_deref()).await;
        codec::encode(&status)
    }
}

struct CloseAllSessionsHandler {
    sessions: Arc<SessionRegistry>,
    class: String,
}

#[async_trait::async_trait]
impl RawHandler for CloseAllSessionsHandler {
    async fn handle(
        &self,
        _body: Option<&serde_json::value::RawValue>,
    ) -> Result<Option<Box<serde_json::value::RawValue>>, Error> {
        for session in self.sessions.sessions(&self.class) {
            if let Err(e) = session.close_with_reason("service is going away").await {
                warn!(error = %e, "failed to close session during CLOSE_ALL_SESSIONS");
            }
        }
        Ok(None)
    }
}

/// A running (or not-yet-started) WebSocket service for one service class.
pub struct Service {
    class: String,
    handlers: Arc<HandlerTable>,
    sessions: Arc<SessionRegistry>,
    endpoint: Arc<Endpoint>,
    ping_interval: Duration,
    status_extension: Arc<tokio::sync::RwLock<Option<Arc<dyn StatusExtension>>>>,
    keepalive: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Service {
    #[must_use]
    pub fn new(class: impl Into<String>) -> Self {
        Self::with_ping_interval(class, DEFAULT_PING_INTERVAL)
    }

    #[must_use]
    pub fn with_ping_interval(class: impl Into<String>, ping_interval: Duration) -> Self {
        let class = class.into();
        let handlers = Arc::new(HandlerTable::new());
        let sessions = Arc::new(SessionRegistry::new());
        let status_extension = Arc::new(tokio::sync::RwLock::new(None));

        handlers.insert_builtin(
            crate::envelope::OP_STATUS,
            Arc::new(StatusHandler {
                extension: status_extension.clone(),
            }),
        );
        handlers.insert_builtin(
            crate::envelope::OP_CLOSE_ALL_SESSIONS,
            Arc::new(CloseAllSessionsHandler {
                sessions: sessions.clone(),
                class: class.clone(),
            }),
        );

        let endpoint = Arc::new(Endpoint::new(handlers.clone(), ReplyRoute::Ignore, StackCap::Default));

        Self {
            class,
            handlers,
            sessions,
            endpoint,
            ping_interval,
            status_extension,
            keepalive: tokio::sync::Mutex::new(None),
        }
    }

    /// The handler table to register application ops on before [`Service::serve`].
    #[must_use]
    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    /// Install (or replace) the `STATUS` extension hook.
    pub async fn set_status_extension(&self, extension: Arc<dyn StatusExtension>) {
        *self.status_extension.write().await = Some(extension);
    }

    /// Start the keep-alive ping scheduler if it isn't already running.
    /// Starting twice is a logged no-op.
    pub async fn start_keepalive(self: &Arc<Self>) {
        let mut guard = self.keepalive.lock().await;
        if guard.is_some() {
            info!(class = %self.class, "keep-alive already running, ignoring duplicate start");
            return;
        }
        let service = self.clone();
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.ping_interval);
            loop {
                ticker.tick().await;
                for session in service.sessions.all_sessions() {
                    if let Err(e) = session.ping().await {
                        warn!(session = ?session.id(), error = %e, "keep-alive ping failed");
                    }
                }
            }
        }));
    }

    pub async fn stop_keepalive(&self) {
        if let Some(handle) = self.keepalive.lock().await.take() {
            handle.abort();
        }
    }

    /// Bind `addr` and accept connections until the listener errors.
    ///
    /// # Errors
    /// Propagates a bind failure.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<(), Error> {
        self.start_keepalive().await;
        let listener = TcpListener::bind(addr).await?;
        info!(class = %self.class, %addr, "service listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let service = self.clone();
            tokio::spawn(async move {
                if let Err(e) = service.accept_stream(stream).await {
                    warn!(%peer, error = %e, "connection ended with error");
                }
            });
        }
    }

    /// Accept one already-connected TCP stream as a new session for this
    /// service's class, driving its receive loop until the peer disconnects
    /// or a transport error occurs. [`Service::serve`] calls this per
    /// accepted connection; callers embedding their own listener (e.g. the
    /// end-to-end test harness) can call it directly.
    ///
    /// # Errors
    /// Propagates a failure to complete the WebSocket upgrade handshake.
    pub async fn accept_stream(self: Arc<Self>, stream: tokio::net::TcpStream) -> Result<(), Error> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        let (sink, mut stream) = ws.split();
        let session = Session::new(Arc::new(transport::WsOutbound::new(sink)));
        self.sessions.add(&self.class, session.clone());

        while let Some(message) = stream.next().await {
            match message {
                Ok(message) => {
                    if let Some(frame) = transport::from_tungstenite(message) {
                        self.endpoint.on_frame(&session, frame).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "transport error reading frame, closing session");
                    break;
                }
            }
        }
        self.sessions.remove(&self.class, session.id());
        Ok(())
    }

    /// Send `envelope` to every session currently tracked for this service's
    /// class, returning the per-session send result.
    pub async fn broadcast(&self, envelope: &Envelope) -> HashMap<SessionId, Result<(), Error>> {
        let mut results = HashMap::new();
        for session in self.sessions.sessions(&self.class) {
            let result = session.send_envelope(envelope).await;
            if let Err(e) = &result {
                warn!(session = ?session.id(), error = %e, "broadcast delivery failed");
            }
            results.insert(session.id(), result);
        }
        results
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.sessions(&self.class).len()
    }
}
