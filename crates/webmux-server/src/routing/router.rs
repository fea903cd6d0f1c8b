//! Connection table and output delivery policy.
//!
//! Tracks every open connection (its user, its connection-local active
//! terminal, and its outbound event sender) and implements the one place
//! that decides which connections receive a session's output.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use webmux_proto::{ServerEvent, SessionId};

/// Identifier for one network connection, invalidated on disconnect.
pub type ConnId = u64;

/// How session output maps to connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingMode {
    /// Sessions are private per user; output goes only to the owner's
    /// currently bound connection.
    OwnerAffinity,
    /// Sessions are process-wide; every connection receives all output.
    Broadcast,
}

struct ConnState {
    user: String,
    /// Connection-local display selection. A routing hint only; it never
    /// affects process execution.
    active_session: Option<SessionId>,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Per-connection state plus the delivery decision.
pub struct ConnectionRouter {
    mode: RoutingMode,
    conns: RwLock<HashMap<ConnId, ConnState>>,
    next_conn_id: AtomicU64,
}

impl ConnectionRouter {
    pub fn new(mode: RoutingMode) -> Self {
        Self {
            mode,
            conns: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    /// Register an open connection, allocating its id.
    pub async fn register(&self, user: &str, tx: mpsc::UnboundedSender<ServerEvent>) -> ConnId {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let state = ConnState {
            user: user.to_string(),
            active_session: None,
            tx,
        };
        self.conns.write().await.insert(conn_id, state);
        conn_id
    }

    /// Forget a closed connection. Idempotent.
    pub async fn unregister(&self, conn_id: ConnId) {
        self.conns.write().await.remove(&conn_id);
    }

    /// User the connection resolved to at connect time.
    pub async fn user_of(&self, conn_id: ConnId) -> Option<String> {
        let conns = self.conns.read().await;
        conns.get(&conn_id).map(|c| c.user.clone())
    }

    pub async fn set_active(&self, conn_id: ConnId, id: SessionId) {
        let mut conns = self.conns.write().await;
        if let Some(conn) = conns.get_mut(&conn_id) {
            conn.active_session = Some(id);
        }
    }

    /// Clear any connection's active pointer that refers to a gone session.
    pub async fn clear_active(&self, id: SessionId) {
        let mut conns = self.conns.write().await;
        for conn in conns.values_mut() {
            if conn.active_session == Some(id) {
                conn.active_session = None;
            }
        }
    }

    /// Send an event to one specific connection. Best effort: a missing or
    /// closed connection drops the event.
    pub async fn send_to(&self, conn_id: ConnId, event: ServerEvent) {
        let conns = self.conns.read().await;
        if let Some(conn) = conns.get(&conn_id) {
            let _ = conn.tx.send(event);
        }
    }

    /// Deliver a session-originated event. In broadcast mode every open
    /// connection receives it; in owner-affinity mode only the owner's
    /// bound connection does, and the event is dropped when none is bound
    /// (the history buffer is the only retention).
    pub async fn route(&self, bound: Option<ConnId>, event: ServerEvent) {
        match self.mode {
            RoutingMode::Broadcast => {
                let conns = self.conns.read().await;
                for conn in conns.values() {
                    let _ = conn.tx.send(event.clone());
                }
            }
            RoutingMode::OwnerAffinity => match bound {
                Some(conn_id) => self.send_to(conn_id, event).await,
                None => debug!("no bound connection, output dropped"),
            },
        }
    }

    /// Number of open connections.
    pub async fn count(&self) -> usize {
        self.conns.read().await.len()
    }
}
