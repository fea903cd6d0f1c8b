//! User directory: which sessions a user owns and which connection is
//! currently bound to receive that user's output.
//!
//! Session ids are kept in insertion order so "first remaining" is a
//! well-defined fallback when the active session goes away.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use webmux_proto::SessionId;

use super::router::ConnId;

/// Identity used when a connection supplies no user token.
pub const DEFAULT_USER: &str = "default";

#[derive(Debug, Default)]
struct UserEntry {
    /// Owned sessions, insertion-ordered.
    session_ids: Vec<SessionId>,
    /// The one connection currently receiving this user's output.
    bound_connection: Option<ConnId>,
    /// Last session the user switched to; survives disconnects.
    active_session: Option<SessionId>,
}

/// Maps user ids to their owned sessions and routing binding.
pub struct UserDirectory {
    users: RwLock<HashMap<String, UserEntry>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Canonicalize a handshake-supplied identifier. Pure: empty or absent
    /// tokens collapse to [`DEFAULT_USER`].
    pub fn resolve_user(token: Option<&str>) -> String {
        match token.map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => DEFAULT_USER.to_string(),
        }
    }

    /// Owned session ids in insertion order.
    pub async fn sessions_of(&self, user: &str) -> Vec<SessionId> {
        let users = self.users.read().await;
        users
            .get(user)
            .map(|e| e.session_ids.clone())
            .unwrap_or_default()
    }

    /// Record a newly created session; it becomes the user's active one.
    pub async fn add_session(&self, user: &str, id: SessionId) {
        let mut users = self.users.write().await;
        let entry = users.entry(user.to_string()).or_default();
        if !entry.session_ids.contains(&id) {
            entry.session_ids.push(id);
        }
        entry.active_session = Some(id);
    }

    /// Drop a session from the owner's list. Idempotent. If it was the
    /// active session, the first remaining one takes over.
    pub async fn remove_session(&self, user: &str, id: SessionId) {
        let mut users = self.users.write().await;
        if let Some(entry) = users.get_mut(user) {
            entry.session_ids.retain(|&s| s != id);
            if entry.active_session == Some(id) {
                entry.active_session = entry.session_ids.first().copied();
            }
        }
    }

    /// The user's active session hint, if any.
    pub async fn active_of(&self, user: &str) -> Option<SessionId> {
        let users = self.users.read().await;
        users.get(user).and_then(|e| e.active_session)
    }

    /// Update the active session hint.
    pub async fn set_active(&self, user: &str, id: SessionId) {
        let mut users = self.users.write().await;
        if let Some(entry) = users.get_mut(user) {
            entry.active_session = Some(id);
        }
    }

    /// Bind a connection as the user's routing target, replacing any
    /// previous binding.
    pub async fn bind(&self, user: &str, conn: ConnId) {
        let mut users = self.users.write().await;
        let entry = users.entry(user.to_string()).or_default();
        entry.bound_connection = Some(conn);
        debug!(user, conn_id = conn, "connection bound");
    }

    /// Clear the binding, but only if it still refers to `conn`. A stale
    /// disconnect must never clobber a newer binding from a reconnect.
    pub async fn unbind(&self, user: &str, conn: ConnId) -> bool {
        let mut users = self.users.write().await;
        if let Some(entry) = users.get_mut(user) {
            if entry.bound_connection == Some(conn) {
                entry.bound_connection = None;
                debug!(user, conn_id = conn, "connection unbound");
                return true;
            }
        }
        false
    }

    /// The connection currently bound for a user, if any.
    pub async fn bound(&self, user: &str) -> Option<ConnId> {
        let users = self.users.read().await;
        users.get(user).and_then(|e| e.bound_connection)
    }

    /// Remove a user entirely, returning the sessions they owned.
    /// Used by ephemeral-owner mode on disconnect.
    pub async fn purge_user(&self, user: &str) -> Vec<SessionId> {
        let mut users = self.users.write().await;
        users
            .remove(user)
            .map(|e| e.session_ids)
            .unwrap_or_default()
    }
}
