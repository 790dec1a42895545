//! Frame transport adapter: encodes/decodes envelopes onto WebSocket frames
//! and owns the outbound half of a connection.
//!
//! Receiving is driven by whoever accepted or opened the connection
//! ([`crate::client::Client::connect_to`] or
//! [`crate::service::Service::accept_stream`]): each owns a
//! [`futures_util::stream::SplitStream`] and feeds decoded frames into
//! [`crate::endpoint::Endpoint::on_frame`]. Sending is funneled through
//! [`OutboundSink`] so a [`crate::session::Session`] can be cloned and handed
//! to a pending-call reply, a broadcast, or a keep-alive ping without
//! contending on the receive side.

use async_trait::async_trait;
use futures_util::{stream::SplitSink, SinkExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Mutex,
};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

use crate::{
    envelope::Envelope,
    error::Error,
};

/// Frames above this size are sent as [`WireMessage::Binary`] instead of
/// [`WireMessage::Text`].
pub const MAX_TEXT_MESSAGE_LENGTH: usize = 64 * 1024;

/// A transport-agnostic view of the frames this crate cares about. Kept
/// separate from `tokio_tungstenite::tungstenite::Message` so the endpoint
/// engine and tests don't need to depend on tungstenite's frame type
/// directly.
#[derive(Debug, Clone)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Translate a tungstenite frame. Returns `None` for frame kinds that carry
/// no envelope and need no reaction here (`Frame`, which tungstenite never
/// surfaces to user code directly).
#[must_use]
pub fn from_tungstenite(message: Message) -> Option<WireMessage> {
    match message {
        Message::Text(t) => Some(WireMessage::Text(t.to_string())),
        Message::Binary(b) => Some(WireMessage::Binary(b.to_vec())),
        Message::Ping(p) => Some(WireMessage::Ping(p.to_vec())),
        Message::Pong(p) => Some(WireMessage::Pong(p.to_vec())),
        Message::Close(_) => Some(WireMessage::Close),
        Message::Frame(_) => None,
    }
}

/// Encode an envelope as a text or binary frame depending on its serialized
/// size.
pub fn encode_envelope(envelope: &Envelope) -> Result<Message, Error> {
    let json = serde_json::to_string(envelope).map_err(Error::Encode)?;
    if json.len() <= MAX_TEXT_MESSAGE_LENGTH {
        Ok(Message::Text(json.into()))
    } else {
        Ok(Message::Binary(json.into_bytes().into()))
    }
}

/// Render the current time as the ASCII-decimal keep-alive ping payload.
#[must_use]
pub fn ping_payload() -> Vec<u8> {
    crate::envelope::now_millis().to_string().into_bytes()
}

/// The sending half of a connection, abstracted so [`crate::session::Session`]
/// can hold it as a trait object regardless of the concrete stream type
/// (`TcpStream`, a TLS stream, ...).
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), Error>;
    async fn close(&self, reason: Option<String>) -> Result<(), Error>;
    fn is_open(&self) -> bool;
}

/// [`OutboundSink`] backed by a real `tokio_tungstenite` stream.
pub struct WsOutbound<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    open: std::sync::atomic::AtomicBool,
}

impl<S> WsOutbound<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(sink: SplitSink<WebSocketStream<S>, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            open: std::sync::atomic::AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl<S> OutboundSink for WsOutbound<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, message: Message) -> Result<(), Error> {
        if !self.is_open() {
            return Err(Error::SessionNotOpen);
        }
        let mut sink = self.sink.lock().await;
        let result = sink.send(message).await;
        if result.is_err() {
            self.open.store(false, std::sync::atomic::Ordering::Relaxed);
        }
        result.map_err(Error::Transport)
    }

    async fn close(&self, reason: Option<String>) -> Result<(), Error> {
        let frame = reason.map(|r| tokio_tungstenite::tungstenite::protocol::CloseFrame {
            code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
            reason: r.into(),
        });
        let mut sink = self.sink.lock().await;
        let result = sink.send(Message::Close(frame)).await;
        self.open.store(false, std::sync::atomic::Ordering::Relaxed);
        result.map_err(Error::Transport)
    }

    fn is_open(&self) -> bool {
        self.open.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::envelope::Envelope;

    #[rstest]
    fn small_envelope_encodes_as_text() {
        let env = Envelope::notification("ECHO", None);
        let message = encode_envelope(&env).expect("encode");
        assert!(matches!(message, Message::Text(_)));
    }

    #[rstest]
    fn oversized_envelope_encodes_as_binary() {
        let body = serde_json::value::to_raw_value(&"x".repeat(MAX_TEXT_MESSAGE_LENGTH + 1))
            .expect("encode raw value");
        let env = Envelope::notification("ECHO", Some(body));
        let message = encode_envelope(&env).expect("encode");
        assert!(matches!(message, Message::Binary(_)));
    }

    #[rstest]
    fn ping_payload_is_ascii_decimal_millis() {
        let payload = ping_payload();
        let text = String::from_utf8(payload).expect("ascii");
        text.parse::<i64>().expect("decimal");
    }
}
