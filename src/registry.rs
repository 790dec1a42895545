//! Per-service-class session registry: `service-class -> (session-id -> session)`.
//!
//! Backs [`crate::service::Service`]'s broadcast and keep-alive scheduler. A
//! class's inner map is removed entirely once its last session disconnects,
//! so an idle service carries no empty maps.

use dashmap::{mapref::entry::Entry, DashMap};

use crate::session::{Session, SessionId};

#[derive(Default)]
pub struct SessionRegistry {
    classes: DashMap<String, DashMap<SessionId, Session>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, class: &str, session: Session) {
        self.classes
            .entry(class.to_string())
            .or_default()
            .insert(session.id(), session);
    }

    /// Remove `session` from `class`'s set, and drop the class entry
    /// entirely if that was its last session.
    pub fn remove(&self, class: &str, id: SessionId) {
        if let Entry::Occupied(mut entry) = self.classes.entry(class.to_string()) {
            entry.get_mut().remove(&id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    #[must_use]
    pub fn sessions(&self, class: &str) -> Vec<Session> {
        self.classes
            .get(class)
            .map(|m| m.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default()
    }

    /// Every tracked session across every class, for the keep-alive
    /// scheduler.
    #[must_use]
    pub fn all_sessions(&self) -> Vec<Session> {
        self.classes
            .iter()
            .flat_map(|class| class.value().iter().map(|e| e.value().clone()).collect::<Vec<_>>())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rstest::rstest;
    use tokio_tungstenite::tungstenite::Message;

    use super::*;
    use crate::{error::Error, transport::OutboundSink};

    struct NoopSink;

    #[async_trait]
    impl OutboundSink for NoopSink {
        async fn send(&self, _message: Message) -> Result<(), Error> {
            Ok(())
        }
        async fn close(&self, _reason: Option<String>) -> Result<(), Error> {
            Ok(())
        }
        fn is_open(&self) -> bool {
            true
        }
    }

    fn session() -> Session {
        Session::new(std::sync::Arc::new(NoopSink))
    }

    #[rstest]
    fn add_and_list_sessions_for_class() {
        let registry = SessionRegistry::new();
        let s = session();
        registry.add("greeter", s.clone());
        assert_eq!(registry.sessions("greeter").len(), 1);
        assert!(registry.sessions("other").is_empty());
    }

    #[rstest]
    fn removing_last_session_drops_the_class_entry() {
        let registry = SessionRegistry::new();
        let s = session();
        registry.add("greeter", s.clone());
        registry.remove("greeter", s.id());
        assert!(registry.sessions("greeter").is_empty());
        assert!(registry.classes.is_empty());
    }

    #[rstest]
    fn all_sessions_spans_every_class() {
        let registry = SessionRegistry::new();
        registry.add("a", session());
        registry.add("b", session());
        assert_eq!(registry.all_sessions().len(), 2);
    }
}
