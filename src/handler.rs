//! Handler table: a case-insensitive registry mapping an op name to the
//! async function that serves it.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::value::RawValue;

use crate::{
    codec,
    envelope::RESERVED_OPS,
    error::Error,
    message::MessageType,
};

/// Object-safe handler invoked with a raw (still-encoded) request body.
///
/// [`HandlerTable::register`] and friends build one of these per registered
/// [`MessageType`], so callers never touch `RawValue` directly.
#[async_trait]
pub trait RawHandler: Send + Sync {
    async fn handle(&self, body: Option<&RawValue>) -> Result<Option<Box<RawValue>>, Error>;
}

struct TypedHandler<Req, Res, F> {
    op: String,
    f: F,
    _marker: std::marker::PhantomData<fn(Req) -> Res>,
}

#[async_trait]
impl<Req, Res, F, Fut> RawHandler for TypedHandler<Req, Res, F>
where
    Req: DeserializeOwned + Send + Sync + 'static,
    Res: Serialize + Send + Sync + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Res, Error>> + Send + 'static,
{
    async fn handle(&self, body: Option<&RawValue>) -> Result<Option<Box<RawValue>>, Error> {
        let request: Req = codec::decode(body)?;
        let response = (self.f)(request).await.map_err(|e| match e {
            // Re-tag with the op name unless the handler already did (e.g. a
            // decode error propagated from a nested call).
            Error::Handler(..) => e,
            other => Error::handler(self.op.clone(), other),
        })?;
        codec::encode(&response)
    }
}

/// Case-insensitive registry of op handlers.
///
/// Built-in ops (`STATUS`, `CLOSE_ALL_SESSIONS`) are inserted by
/// [`crate::service::Service`] via [`HandlerTable::insert_builtin`], which
/// bypasses the reserved-op check that [`HandlerTable::register`] enforces
/// for user-supplied ops.
#[derive(Default)]
pub struct HandlerTable {
    handlers: DashMap<String, Arc<dyn RawHandler>>,
}

impl HandlerTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request/response handler under `msg_type`.
    ///
    /// # Errors
    /// Returns [`Error::ReservedOp`] if `msg_type`'s name collides
    /// case-insensitively with a reserved op (`RESPONSE`, `ERROR`, `STATUS`,
    /// `CLOSE_ALL_SESSIONS`, `DEPENDENCY_UPDATED`).
    pub fn register<Req, Res, F, Fut>(&self, msg_type: &MessageType<Req, Res>, f: F) -> Result<(), Error>
    where
        Req: DeserializeOwned + Send + Sync + 'static,
        Res: Serialize + Send + Sync + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, Error>> + Send + 'static,
    {
        self.insert(
            msg_type.name(),
            Arc::new(TypedHandler {
                op: msg_type.name().to_string(),
                f,
                _marker: std::marker::PhantomData,
            }),
        )
    }

    fn insert(&self, name: &str, handler: Arc<dyn RawHandler>) -> Result<(), Error> {
        let key = name.to_ascii_uppercase();
        if RESERVED_OPS.iter().any(|r| r.eq_ignore_ascii_case(&key)) {
            return Err(Error::ReservedOp(name.to_string()));
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    /// Insert a handler bypassing the reserved-op check. Used only by
    /// [`crate::service::Service`] to install the built-in `STATUS` and
    /// `CLOSE_ALL_SESSIONS` handlers.
    pub(crate) fn insert_builtin(&self, name: &str, handler: Arc<dyn RawHandler>) {
        self.handlers.insert(name.to_ascii_uppercase(), handler);
    }

    /// Look up the handler registered for `op`, case-insensitively.
    #[must_use]
    pub fn get(&self, op: &str) -> Option<Arc<dyn RawHandler>> {
        self.handlers.get(&op.to_ascii_uppercase()).map(|e| Arc::clone(e.value()))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[tokio::test]
    async fn register_and_dispatch_round_trip() {
        let table = HandlerTable::new();
        let mt: MessageType<String, String> = MessageType::new("ECHO");
        table
            .register(&mt, |req: String| async move { Ok(req) })
            .expect("register");

        let handler = table.get("echo").expect("case-insensitive lookup");
        let body = codec::encode(&"hi".to_string()).expect("encode").expect("non-null");
        let reply = handler.handle(Some(&body)).await.expect("handle");
        let decoded: String = codec::decode(reply.as_deref()).expect("decode");
        assert_eq!(decoded, "hi");
    }

    #[rstest]
    #[case("RESPONSE")]
    #[case("error")]
    #[case("Status")]
    #[case("close_all_sessions")]
    fn register_rejects_reserved_ops(#[case] name: &'static str) {
        let table = HandlerTable::new();
        let mt: MessageType<(), ()> = MessageType::new(name);
        let result = table.register(&mt, |_: ()| async move { Ok(()) });
        assert!(matches!(result, Err(Error::ReservedOp(_))));
    }

    #[rstest]
    fn unknown_op_returns_none() {
        let table = HandlerTable::new();
        assert!(table.get("NOPE").is_none());
    }
}
