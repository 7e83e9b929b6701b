//! Concurrency-safe registry of live agent sessions

use crate::connection::{ClientId, Connection};
use crate::{OutpostError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A registered connection together with its cancellation signal
#[derive(Debug)]
pub struct Session {
    connection: Arc<Connection>,
    cancel: CancellationToken,
}

impl Session {
    /// The session's connection
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Session identity
    pub fn id(&self) -> ClientId {
        self.connection.id()
    }

    /// Whether the session was deliberately cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the session is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    async fn close(&self) {
        self.cancel.cancel();
        if let Err(e) = self.connection.close().await {
            warn!(client = %self.id(), "Failed to close connection: {}", e);
        }
    }
}

/// Sessions keyed by identity.
///
/// Every session token is a child of the registry's parent token, so
/// cancelling the parent cancels every session at once.
pub struct SessionRegistry {
    sessions: Mutex<Option<HashMap<ClientId, Arc<Session>>>>,
    parent: CancellationToken,
}

impl SessionRegistry {
    /// Create a registry whose sessions are cancelled along with `parent`
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            sessions: Mutex::new(Some(HashMap::new())),
            parent,
        }
    }

    /// Register a connection under its identity
    pub async fn add(&self, connection: Arc<Connection>) -> Result<Arc<Session>> {
        let session = Arc::new(Session {
            connection,
            cancel: self.parent.child_token(),
        });

        {
            let mut guard = self.sessions.lock().await;
            if let Some(sessions) = guard.as_mut() {
                sessions.insert(session.id(), session.clone());
                debug!(client = %session.id(), "Session added");
                return Ok(session);
            }
        }

        session.close().await;
        Err(OutpostError::RegistryClosed)
    }

    /// Look up a session
    pub async fn get(&self, id: ClientId) -> Option<Arc<Session>> {
        let guard = self.sessions.lock().await;
        guard.as_ref()?.get(&id).cloned()
    }

    /// Cancel, close and forget a session. Returns `false` if it was absent.
    pub async fn remove(&self, id: ClientId) -> bool {
        let removed = {
            let mut guard = self.sessions.lock().await;
            guard.as_mut().and_then(|sessions| sessions.remove(&id))
        };

        match removed {
            Some(session) => {
                session.close().await;
                debug!(client = %id, "Session removed");
                true
            }
            None => false,
        }
    }

    /// Identities of every live session, ascending
    pub async fn ids(&self) -> Vec<ClientId> {
        let guard = self.sessions.lock().await;
        let mut ids: Vec<ClientId> = guard
            .as_ref()
            .map(|sessions| sessions.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Every live session
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        let guard = self.sessions.lock().await;
        guard
            .as_ref()
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        let guard = self.sessions.lock().await;
        guard.as_ref().map_or(0, HashMap::len)
    }

    /// Whether no session is live
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close every session and stop accepting new ones
    pub async fn close_all(&self) {
        let drained = {
            let mut guard = self.sessions.lock().await;
            guard.take().unwrap_or_default()
        };

        debug!("Closing {} sessions", drained.len());
        for session in drained.into_values() {
            session.close().await;
        }
    }
}
