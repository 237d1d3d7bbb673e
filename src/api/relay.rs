//! Purpose: Track live realtime sessions and fan mutation events out to them.
//! Exports: `SessionId`, `SessionRegistry`, `Relay`.
//! Role: The registry owns the session set; the relay is handed a registry
//! and never touches the store.
//! Invariants: Delivery is best-effort, at-most-once, non-blocking; a slow or
//! dead session never stalls fan-out to the others.
//! Invariants: `publish` never delivers to the originating session;
//! `broadcast_user_count` deliberately reaches every session.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use crate::api::events::ServerEvent;
use crate::core::error::{Error, ErrorKind};

const SESSION_ID_BYTES: usize = 8;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Result<Self, Error> {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        getrandom::fill(&mut bytes).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message(format!("failed to generate session id: {err}"))
        })?;
        let mut id = String::with_capacity(SESSION_ID_BYTES * 2);
        for byte in bytes {
            use std::fmt::Write;
            let _ = write!(id, "{byte:02x}");
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connected-session set. Membership is in-memory only and reconstructed
/// from live connections after a restart.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, mpsc::UnboundedSender<ServerEvent>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new session and hand back its outbound queue.
    pub fn register(&self) -> Result<(SessionId, mpsc::UnboundedReceiver<ServerEvent>), Error> {
        let session_id = SessionId::generate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(session_id.clone(), tx);
        Ok((session_id, rx))
    }

    pub fn unregister(&self, session_id: &SessionId) {
        self.lock().remove(session_id);
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<SessionId, mpsc::UnboundedSender<ServerEvent>>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fan-out half of the realtime channel. Owns no session state; it is
/// handed the registry it publishes through.
#[derive(Clone)]
pub struct Relay {
    registry: Arc<SessionRegistry>,
}

impl Relay {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `event` to every registered session except `origin`.
    pub fn publish(&self, event: ServerEvent, origin: &SessionId) {
        let sessions = self.registry.lock();
        for (session_id, tx) in sessions.iter() {
            if session_id == origin {
                continue;
            }
            if tx.send(event.clone()).is_err() {
                debug!(session = %session_id, "dropping event for closed session");
            }
        }
    }

    /// Presence signal: the current session count, to all sessions.
    pub fn broadcast_user_count(&self) {
        let sessions = self.registry.lock();
        let count = sessions.len();
        for (session_id, tx) in sessions.iter() {
            if tx.send(ServerEvent::UserCount(count)).is_err() {
                debug!(session = %session_id, "dropping user count for closed session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Relay, SessionRegistry};
    use crate::api::events::ServerEvent;
    use std::sync::Arc;

    #[test]
    fn session_ids_are_distinct() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = registry.register().expect("register");
        let (b, _rx_b) = registry.register().expect("register");
        assert_ne!(a, b);
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn publish_skips_the_originating_session() {
        let registry = Arc::new(SessionRegistry::new());
        let relay = Relay::new(registry.clone());
        let (origin, mut origin_rx) = registry.register().expect("register");
        let (_other, mut other_rx) = registry.register().expect("register");

        relay.publish(ServerEvent::SnippetDeleted("abc".to_string()), &origin);

        assert_eq!(
            other_rx.try_recv().expect("delivered"),
            ServerEvent::SnippetDeleted("abc".to_string())
        );
        assert!(other_rx.try_recv().is_err(), "delivered exactly once");
        assert!(origin_rx.try_recv().is_err(), "origin must not receive");
    }

    #[test]
    fn user_count_reaches_every_session() {
        let registry = Arc::new(SessionRegistry::new());
        let relay = Relay::new(registry.clone());
        let (_a, mut rx_a) = registry.register().expect("register");
        let (_b, mut rx_b) = registry.register().expect("register");

        relay.broadcast_user_count();

        assert_eq!(rx_a.try_recv().expect("a"), ServerEvent::UserCount(2));
        assert_eq!(rx_b.try_recv().expect("b"), ServerEvent::UserCount(2));
    }

    #[test]
    fn unregistered_sessions_stop_receiving() {
        let registry = Arc::new(SessionRegistry::new());
        let relay = Relay::new(registry.clone());
        let (origin, _origin_rx) = registry.register().expect("register");
        let (gone, mut gone_rx) = registry.register().expect("register");

        registry.unregister(&gone);
        assert_eq!(registry.count(), 1);

        relay.publish(ServerEvent::SnippetDeleted("abc".to_string()), &origin);
        relay.broadcast_user_count();
        assert!(gone_rx.try_recv().is_err());
    }

    #[test]
    fn closed_receivers_are_swallowed() {
        let registry = Arc::new(SessionRegistry::new());
        let relay = Relay::new(registry.clone());
        let (origin, _origin_rx) = registry.register().expect("register");
        let (_dead, dead_rx) = registry.register().expect("register");
        drop(dead_rx);

        // Must not panic or error; the dead session silently misses events.
        relay.publish(ServerEvent::SnippetDeleted("abc".to_string()), &origin);
        relay.broadcast_user_count();
    }
}
