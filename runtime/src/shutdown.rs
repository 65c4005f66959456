//! Process-exit hook closing the sessions of the current loop iteration.
//!
//! The supervisor registers its primary (and logging) session once per
//! iteration. Registration replaces the previous one, so a hook that
//! survives many reconnects only ever refers to live sessions. On shutdown
//! [`ShutdownHook::close_all`] takes the registered sessions and closes each
//! of them exactly once.

use bpm_connector_core::transport::Session;
use std::sync::{Arc, Mutex, PoisonError};

/// Holds the sessions to close when the process stops.
#[derive(Clone, Default)]
pub struct ShutdownHook {
    sessions: Arc<Mutex<Vec<Arc<dyn Session>>>>,
}

impl ShutdownHook {
    /// Create a hook with nothing registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registered sessions.
    pub fn register(&self, sessions: Vec<Arc<dyn Session>>) {
        let ids: Vec<String> = sessions.iter().map(|s| s.id().to_string()).collect();
        *self.sessions.lock().unwrap_or_else(PoisonError::into_inner) = sessions;
        tracing::debug!(sessions = ?ids, "Shutdown hook registered");
    }

    /// Forget the registered sessions without closing them.
    pub fn clear(&self) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn registered(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Close every registered session once. Later calls are no-ops until the
    /// next registration.
    pub async fn close_all(&self) {
        let sessions = std::mem::take(&mut *self.sessions.lock().unwrap_or_else(PoisonError::into_inner));

        for session in sessions {
            close_session(session.as_ref()).await;
        }
    }
}

/// Close `session`, logging instead of returning the outcome.
///
/// A session that is already gone is expected after a broken connection and
/// only traced; any other failure is logged at debug level.
pub(crate) async fn close_session(session: &dyn Session) {
    match session.close().await {
        Ok(()) => tracing::info!(session_id = %session.id(), "Session closed"),
        Err(e) if e.is_already_closed() => {
            tracing::trace!(session_id = %session.id(), "Session already closed");
        }
        Err(e) => {
            tracing::debug!(session_id = %session.id(), error = %e, "Session close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use bpm_connector_testing::InMemoryBroker;

    #[tokio::test]
    async fn close_all_closes_each_session_once() {
        let broker = InMemoryBroker::new();
        let transport = broker.transport();
        let primary = transport.connect().await.unwrap();
        let logging = transport.connect().await.unwrap();

        let hook = ShutdownHook::new();
        hook.register(vec![Arc::clone(&primary), Arc::clone(&logging)]);
        assert_eq!(hook.registered(), 2);

        hook.close_all().await;
        hook.close_all().await;

        assert_eq!(broker.close_calls(), vec![primary.id(), logging.id()]);
        assert_eq!(hook.registered(), 0);
    }

    #[tokio::test]
    async fn register_replaces_previous_sessions() {
        let broker = InMemoryBroker::new();
        let transport = broker.transport();
        let first = transport.connect().await.unwrap();
        let second = transport.connect().await.unwrap();

        let hook = ShutdownHook::new();
        hook.register(vec![first]);
        hook.register(vec![Arc::clone(&second)]);
        hook.close_all().await;

        assert_eq!(broker.close_calls(), vec![second.id()]);
    }

    #[tokio::test]
    async fn already_closed_sessions_are_tolerated() {
        let broker = InMemoryBroker::new();
        let session = broker.transport().connect().await.unwrap();
        session.close().await.unwrap();

        let hook = ShutdownHook::new();
        hook.register(vec![Arc::clone(&session)]);
        hook.close_all().await;

        assert_eq!(broker.close_calls().len(), 2);
    }
}
