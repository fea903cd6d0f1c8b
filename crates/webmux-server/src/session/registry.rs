//! Authoritative session store.
//!
//! Owns every live [`Session`] keyed by id: creation (spawning the backing
//! process through the injected spawner), lookup, and removal. A session id
//! never reappears once removed; ids are assigned monotonically.

use super::history::HistoryBuffer;
use super::process::{ProcessEvent, ProcessHandle, ProcessSpawner};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::info;
use webmux_proto::{MuxError, MuxResult, SessionId};

/// Lifecycle state of a session. `Exited` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Exited,
}

/// A logical terminal: one backing process plus its bounded scrollback.
pub struct Session {
    pub id: SessionId,
    /// User that created the session; never changes.
    pub owner: String,
    pub state: SessionState,
    pub process: Box<dyn ProcessHandle>,
    pub history: HistoryBuffer,
}

/// All live sessions, keyed by id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
    spawner: Box<dyn ProcessSpawner>,
    next_id: AtomicU64,
    history_capacity: usize,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(
        spawner: Box<dyn ProcessSpawner>,
        history_capacity: usize,
        max_sessions: usize,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            spawner,
            next_id: AtomicU64::new(1),
            history_capacity,
            max_sessions,
        }
    }

    /// Spawn a process and register a session for it. On spawn failure
    /// nothing is registered and the error reaches the caller. The
    /// max-sessions cap is checked with the map's write lock held, so
    /// concurrent creates cannot overshoot it; an over-cap spawn is killed
    /// before the error is returned.
    pub async fn create(
        &self,
        owner: &str,
        shell: Option<&str>,
        cols: u16,
        rows: u16,
    ) -> MuxResult<(SessionId, mpsc::UnboundedReceiver<ProcessEvent>)> {
        let (mut process, events) = self.spawner.spawn(shell, cols, rows)?;

        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_sessions {
            drop(sessions);
            let _ = process.kill();
            return Err(MuxError::Spawn(format!(
                "max sessions ({}) reached",
                self.max_sessions
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        sessions.insert(
            id,
            Session {
                id,
                owner: owner.to_string(),
                state: SessionState::Running,
                process,
                history: HistoryBuffer::new(self.history_capacity),
            },
        );
        drop(sessions);
        info!(session_id = id, owner, "session created");

        Ok((id, events))
    }

    /// Owner of a session, if it exists.
    pub async fn owner_of(&self, id: SessionId) -> Option<String> {
        self.sessions.read().await.get(&id).map(|s| s.owner.clone())
    }

    /// Access a session immutably via a callback (holds the read lock).
    pub async fn with_session<F, R>(&self, id: SessionId, f: F) -> MuxResult<R>
    where
        F: FnOnce(&Session) -> R,
    {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(MuxError::SessionNotFound(id))?;
        Ok(f(session))
    }

    /// Access a session mutably via a callback (holds the write lock).
    pub async fn with_session_mut<F, R>(&self, id: SessionId, f: F) -> MuxResult<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(MuxError::SessionNotFound(id))?;
        Ok(f(session))
    }

    /// Mark a session exited and deregister it. Idempotent: returns the
    /// session record the first time, `None` on any later call.
    pub async fn remove(&self, id: SessionId) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let mut session = sessions.remove(&id)?;
        session.state = SessionState::Exited;
        info!(session_id = session.id, "session removed");
        Some(session)
    }

    /// Number of live sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
