//! Message-type registry: ties an op name to a request/response type pair so
//! callers never hand-pick a codec for a given op.

use std::marker::PhantomData;

/// A named op paired with the request and response types exchanged under it.
///
/// `MessageType` carries no codec logic itself — [`crate::handler`] and
/// [`crate::client`] use [`crate::codec`] against the types named here. The
/// `fn(Req) -> Res` marker keeps the type `Send + Sync` and usable in a
/// `const fn` constructor regardless of what bounds `Req`/`Res` eventually
/// need.
pub struct MessageType<Req, Res> {
    name: &'static str,
    _marker: PhantomData<fn(Req) -> Res>,
}

impl<Req, Res> MessageType<Req, Res> {
    /// Declare a message type under `name`. `name` is matched
    /// case-insensitively against the wire `op` field.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// The op name this message type is registered under.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

// PhantomData<fn(Req) -> Res> is Send + Sync + Copy regardless of Req/Res, so
// MessageType can be too; derive(Clone, Copy) would require Req: Clone/Res: Clone
// because of how derive macros expand bounds, so these are implemented by hand.
impl<Req, Res> Clone for MessageType<Req, Res> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Req, Res> Copy for MessageType<Req, Res> {}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn name_is_preserved() {
        let mt: MessageType<String, i32> = MessageType::new("ECHO");
        assert_eq!(mt.name(), "ECHO");
    }

    #[rstest]
    fn is_copy() {
        let mt: MessageType<(), ()> = MessageType::new("PING");
        let copy = mt;
        assert_eq!(mt.name(), copy.name());
    }
}
