//! A bidirectional request/response messaging framework layered over
//! WebSocket.
//!
//! # Architecture
//!
//! An [`envelope::Envelope`] is the one message shape exchanged on the wire:
//! a correlation id, an op name, an opaque JSON body, and timing marks. A
//! [`message::MessageType`] names an op and its request/response types; a
//! [`handler::HandlerTable`] maps op names (case-insensitively) to the async
//! functions that serve them. The [`endpoint::Endpoint`] is the shared
//! receive-loop body: it decodes a frame, dispatches a request through the
//! handler table or routes a reply into the [`pending::PendingCallRegistry`],
//! and never lets a decode failure, an unknown op, a handler's `Err`, or a
//! handler panic escape as an unhandled exception.
//!
//! [`client::Client`] is the outbound side: connect, send a fire-and-forget
//! message, or send a request and await its [`client::Response`].
//! [`service::Service`] is the inbound side: accept connections for one
//! service class, track their sessions, run a keep-alive scheduler, and
//! serve both application ops and the built-in `STATUS`/`CLOSE_ALL_SESSIONS`
//! ops. [`proxy::ServiceProxy`] is a lazy, reconnecting handle a service uses
//! to call another service as a client.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use roramu::{message::MessageType, service::Service};
//!
//! # async fn run() -> Result<(), roramu::error::Error> {
//! static GREET: MessageType<String, String> = MessageType::new("GREET");
//!
//! let service = Arc::new(Service::new("greeter"));
//! service
//!     .handlers()
//!     .register(&GREET, |name: String| async move { Ok(format!("hello, {name}")) })?;
//! service.serve("127.0.0.1:0".parse().unwrap()).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod message;
pub mod pending;
pub mod proxy;
pub mod registry;
pub mod service;
pub mod session;
pub mod status;
pub mod transport;

pub use client::{Client, Response};
pub use envelope::Envelope;
pub use error::Error;
pub use message::MessageType;
pub use service::Service;
pub use session::Session;
