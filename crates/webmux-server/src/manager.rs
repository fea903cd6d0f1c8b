//! Session orchestration: the entry point connections call into.
//!
//! Composes the registry, user directory, and connection router to implement
//! create/switch/input/resize/close/list, the reconnect restore sequence,
//! and the dispatch of process output and exit events. This module is the
//! single place that knows about routing-mode policy for lifecycle events;
//! per-chunk delivery policy lives in [`ConnectionRouter::route`].

use crate::routing::{ConnId, ConnectionRouter, RoutingMode, UserDirectory, DEFAULT_USER};
use crate::session::{
    ProcessEvent, ProcessSpawner, SessionRegistry, SessionState, DEFAULT_HISTORY_CAPACITY,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webmux_proto::{MuxResult, ServerEvent, SessionId};

/// Terminal size given to freshly spawned sessions; clients resize after.
const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

/// Knobs the orchestrator needs, extracted from the server config.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub routing: RoutingMode,
    /// When false (ephemeral-owner mode), a disconnect kills every session
    /// the connection's owner holds.
    pub persistent: bool,
    pub history_capacity: usize,
    pub max_sessions: usize,
    pub default_shell: Option<String>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            routing: RoutingMode::OwnerAffinity,
            persistent: true,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            max_sessions: 100,
            default_shell: None,
        }
    }
}

/// Orchestrates sessions, users, and connections. Cheap to clone; clones
/// share state, and independent instances are fully isolated.
#[derive(Clone)]
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    directory: Arc<UserDirectory>,
    router: Arc<ConnectionRouter>,
    settings: Arc<ManagerSettings>,
}

impl SessionManager {
    pub fn new(settings: ManagerSettings, spawner: Box<dyn ProcessSpawner>) -> Self {
        let registry = Arc::new(SessionRegistry::new(
            spawner,
            settings.history_capacity,
            settings.max_sessions,
        ));
        Self {
            registry,
            directory: Arc::new(UserDirectory::new()),
            router: Arc::new(ConnectionRouter::new(settings.routing)),
            settings: Arc::new(settings),
        }
    }

    /// A connection opened. Resolves the user, runs the restore sequence if
    /// the user already owns sessions, otherwise creates the default one.
    /// Returns the allocated connection id and the resolved user.
    pub async fn connect(
        &self,
        token: Option<&str>,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) -> (ConnId, String) {
        let user = self.resolve_user(token);
        let conn_id = self.router.register(&user, tx).await;
        let existing = self.directory.sessions_of(&user).await;

        if existing.is_empty() {
            self.directory.bind(&user, conn_id).await;
            match self.create_session(conn_id, &user, None, true).await {
                Ok(session_id) => {
                    info!(conn_id, user = %user, session_id, "connected, initial session created");
                }
                Err(e) => {
                    warn!(conn_id, user = %user, error = %e, "initial session spawn failed");
                }
            }
        } else {
            // Replay each surviving session, then take over routing.
            for &session_id in &existing {
                self.router
                    .send_to(
                        conn_id,
                        ServerEvent::TerminalCreated {
                            session_id,
                            is_initial: false,
                            is_restored: true,
                        },
                    )
                    .await;
                let history = self
                    .registry
                    .with_session(session_id, |s| {
                        if s.history.is_empty() {
                            None
                        } else {
                            Some(s.history.snapshot())
                        }
                    })
                    .await
                    .ok()
                    .flatten();
                if let Some(history) = history {
                    self.router
                        .send_to(
                            conn_id,
                            ServerEvent::TerminalHistory {
                                session_id,
                                history: String::from_utf8_lossy(&history).into_owned(),
                            },
                        )
                        .await;
                }
            }
            self.directory.bind(&user, conn_id).await;
            let active = self.directory.active_of(&user).await;
            if let Some(active) = active {
                self.router.set_active(conn_id, active).await;
            }
            self.router
                .send_to(
                    conn_id,
                    ServerEvent::TerminalsRestored {
                        session_ids: existing.clone(),
                        active,
                    },
                )
                .await;
            info!(conn_id, user = %user, restored = existing.len(), "connected, sessions restored");
        }

        (conn_id, user)
    }

    /// A connection closed. Clears its routing binding (only if still
    /// pointing at this connection) and, in ephemeral-owner mode, reaps the
    /// owner's sessions.
    pub async fn disconnect(&self, conn_id: ConnId) {
        let user = self.router.user_of(conn_id).await;
        self.router.unregister(conn_id).await;
        let Some(user) = user else { return };

        self.directory.unbind(&user, conn_id).await;

        if !self.settings.persistent {
            for session_id in self.directory.purge_user(&user).await {
                let _ = self
                    .registry
                    .with_session_mut(session_id, |s| s.process.kill())
                    .await;
            }
        }
        let open_connections = self.router.count().await;
        info!(
            conn_id,
            user = %user,
            open_connections,
            "connection closed"
        );
    }

    /// Explicit `create-terminal` request.
    pub async fn create(&self, conn_id: ConnId, shell: Option<&str>) {
        let Some(user) = self.router.user_of(conn_id).await else {
            return;
        };
        if let Err(e) = self.create_session(conn_id, &user, shell, false).await {
            warn!(conn_id, user = %user, error = %e, "create-terminal failed");
        }
    }

    /// `switch-terminal`: a connection-local display selection. Never
    /// touches the process or output routing; unknown or foreign ids are
    /// silently dropped.
    pub async fn switch(&self, conn_id: ConnId, session_id: SessionId) {
        if !self.authorized(conn_id, session_id).await {
            debug!(conn_id, session_id, "switch to unknown or foreign session ignored");
            return;
        }
        self.router.set_active(conn_id, session_id).await;
        if let Some(user) = self.router.user_of(conn_id).await {
            self.directory.set_active(&user, session_id).await;
        }
        // Acknowledged to the requester only; other connections are not
        // told about the new selection.
        self.router
            .send_to(conn_id, ServerEvent::TerminalSwitched { session_id })
            .await;
    }

    /// `terminal-input`: best-effort forward to the process's stdin.
    pub async fn input(&self, conn_id: ConnId, session_id: SessionId, data: &str) {
        if !self.authorized(conn_id, session_id).await {
            return;
        }
        let result = self
            .registry
            .with_session_mut(session_id, |s| {
                if s.state == SessionState::Running {
                    s.process.write(data.as_bytes())
                } else {
                    Ok(())
                }
            })
            .await;
        if let Ok(Err(e)) = result {
            debug!(session_id, error = %e, "input write failed");
        }
    }

    /// `terminal-resize`: best-effort forward to the process.
    pub async fn resize(&self, conn_id: ConnId, session_id: SessionId, cols: u16, rows: u16) {
        if !self.authorized(conn_id, session_id).await {
            return;
        }
        let result = self
            .registry
            .with_session_mut(session_id, |s| {
                if s.state == SessionState::Running {
                    s.process.resize(cols, rows)
                } else {
                    Ok(())
                }
            })
            .await;
        if let Ok(Err(e)) = result {
            debug!(session_id, error = %e, "resize failed");
        }
    }

    /// `close-terminal`: fire-and-forget kill. Deregistration happens when
    /// the process's exit event arrives; a kill for an already-gone session
    /// is a no-op.
    pub async fn close(&self, conn_id: ConnId, session_id: SessionId) {
        if !self.authorized(conn_id, session_id).await {
            return;
        }
        let result = self
            .registry
            .with_session_mut(session_id, |s| s.process.kill())
            .await;
        if let Ok(Err(e)) = result {
            debug!(session_id, error = %e, "kill failed");
        }
    }

    /// `get-terminals`: answer with the caller's session list and active id.
    pub async fn list(&self, conn_id: ConnId) {
        let Some(user) = self.router.user_of(conn_id).await else {
            return;
        };
        let session_ids = self.directory.sessions_of(&user).await;
        let active = self.directory.active_of(&user).await;
        self.router
            .send_to(conn_id, ServerEvent::TerminalsList { session_ids, active })
            .await;
    }

    /// Live session count (for logging and tests).
    pub async fn session_count(&self) -> usize {
        self.registry.count().await
    }

    // ── Internal ───────────────────────────────────────────────────────

    fn resolve_user(&self, token: Option<&str>) -> String {
        match self.settings.routing {
            // Broadcast mode has no per-user ownership; everything is shared.
            RoutingMode::Broadcast => DEFAULT_USER.to_string(),
            RoutingMode::OwnerAffinity => UserDirectory::resolve_user(token),
        }
    }

    /// Whether a connection may act on a session: owner match in
    /// owner-affinity mode, any known session in broadcast mode.
    async fn authorized(&self, conn_id: ConnId, session_id: SessionId) -> bool {
        let Some(owner) = self.registry.owner_of(session_id).await else {
            return false;
        };
        match self.settings.routing {
            RoutingMode::Broadcast => true,
            RoutingMode::OwnerAffinity => {
                self.router.user_of(conn_id).await.as_deref() == Some(owner.as_str())
            }
        }
    }

    /// Spawn a session, register it, start its event pump, and announce it.
    async fn create_session(
        &self,
        conn_id: ConnId,
        user: &str,
        shell: Option<&str>,
        is_initial: bool,
    ) -> MuxResult<SessionId> {
        let shell = shell.or(self.settings.default_shell.as_deref());
        let (session_id, mut events) = self
            .registry
            .create(user, shell, DEFAULT_COLS, DEFAULT_ROWS)
            .await?;
        self.directory.add_session(user, session_id).await;
        self.router.set_active(conn_id, session_id).await;

        let manager = self.clone();
        let owner = user.to_string();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ProcessEvent::Output(bytes) => {
                        manager.on_output(&owner, session_id, &bytes).await;
                    }
                    ProcessEvent::Exit { code, signal } => {
                        manager.on_exit(&owner, session_id, code, signal).await;
                        break;
                    }
                }
            }
        });

        let created = ServerEvent::TerminalCreated {
            session_id,
            is_initial,
            is_restored: false,
        };
        match self.settings.routing {
            // Session identity is process-wide in broadcast mode.
            RoutingMode::Broadcast => self.router.route(None, created).await,
            RoutingMode::OwnerAffinity => self.router.send_to(conn_id, created).await,
        }
        Ok(session_id)
    }

    /// Process output: record to history, then deliver per routing policy.
    /// The binding is read before the append: a restore snapshotting history
    /// between the two delivers a racing chunk at most once (live or
    /// replayed), never twice.
    async fn on_output(&self, owner: &str, session_id: SessionId, bytes: &[u8]) {
        let bound = self.directory.bound(owner).await;
        if self
            .registry
            .with_session_mut(session_id, |s| s.history.append(bytes))
            .await
            .is_err()
        {
            // Session already cleaned up; late output is dropped.
            return;
        }
        self.router
            .route(
                bound,
                ServerEvent::TerminalOutput {
                    session_id,
                    data: String::from_utf8_lossy(bytes).into_owned(),
                },
            )
            .await;
    }

    /// Process exit: deregister exactly once, update the owner's list and
    /// active fallback, clear stale display pointers, notify.
    async fn on_exit(&self, owner: &str, session_id: SessionId, code: i32, signal: Option<String>) {
        if self.registry.remove(session_id).await.is_none() {
            return;
        }
        self.directory.remove_session(owner, session_id).await;
        self.router.clear_active(session_id).await;

        let bound = self.directory.bound(owner).await;
        self.router
            .route(
                bound,
                ServerEvent::TerminalClosed {
                    session_id,
                    exit_code: code,
                    signal,
                },
            )
            .await;
        info!(session_id, owner, code, "session exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ProcessHandle;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::time::timeout;
    use webmux_proto::MuxError;

    /// Test double for a spawned process. Input writes are recorded and
    /// echoed back as output; kill emits the terminal exit event, matching
    /// the real pump's contract.
    struct FakeProcess {
        event_tx: mpsc::UnboundedSender<ProcessEvent>,
        written: Arc<StdMutex<Vec<u8>>>,
        killed: Arc<AtomicBool>,
    }

    impl ProcessHandle for FakeProcess {
        fn write(&mut self, data: &[u8]) -> MuxResult<()> {
            self.written.lock().unwrap().extend_from_slice(data);
            let _ = self.event_tx.send(ProcessEvent::Output(data.to_vec()));
            Ok(())
        }

        fn resize(&mut self, _cols: u16, _rows: u16) -> MuxResult<()> {
            Ok(())
        }

        fn kill(&mut self) -> MuxResult<()> {
            self.killed.store(true, Ordering::SeqCst);
            let _ = self.event_tx.send(ProcessEvent::Exit {
                code: 137,
                signal: Some("SIGKILL".into()),
            });
            Ok(())
        }
    }

    /// Remote control for one fake process, in spawn order.
    struct FakeControl {
        event_tx: mpsc::UnboundedSender<ProcessEvent>,
        written: Arc<StdMutex<Vec<u8>>>,
        killed: Arc<AtomicBool>,
    }

    #[derive(Clone, Default)]
    struct FakeSpawner {
        controls: Arc<StdMutex<Vec<FakeControl>>>,
        fail_next: Arc<AtomicBool>,
    }

    impl FakeSpawner {
        fn control(&self, index: usize) -> FakeControl {
            let controls = self.controls.lock().unwrap();
            let c = &controls[index];
            FakeControl {
                event_tx: c.event_tx.clone(),
                written: c.written.clone(),
                killed: c.killed.clone(),
            }
        }
    }

    impl ProcessSpawner for FakeSpawner {
        fn spawn(
            &self,
            _shell: Option<&str>,
            _cols: u16,
            _rows: u16,
        ) -> MuxResult<(Box<dyn ProcessHandle>, mpsc::UnboundedReceiver<ProcessEvent>)> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(MuxError::Spawn("fake spawn failure".into()));
            }
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let written = Arc::new(StdMutex::new(Vec::new()));
            let killed = Arc::new(AtomicBool::new(false));
            self.controls.lock().unwrap().push(FakeControl {
                event_tx: event_tx.clone(),
                written: written.clone(),
                killed: killed.clone(),
            });
            Ok((
                Box::new(FakeProcess {
                    event_tx,
                    written,
                    killed,
                }),
                event_rx,
            ))
        }
    }

    fn fake_manager(settings: ManagerSettings) -> (SessionManager, FakeSpawner) {
        let spawner = FakeSpawner::default();
        let manager = SessionManager::new(settings, Box::new(spawner.clone()));
        (manager, spawner)
    }

    async fn connect(
        manager: &SessionManager,
        token: &str,
    ) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (conn_id, _user) = manager.connect(Some(token), tx).await;
        (conn_id, rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for server event")
            .expect("event channel closed")
    }

    fn created_id(event: &ServerEvent) -> SessionId {
        match event {
            ServerEvent::TerminalCreated { session_id, .. } => *session_id,
            other => panic!("expected terminal-created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_connect_creates_initial_session() {
        let (manager, _spawner) = fake_manager(ManagerSettings::default());
        let (_conn, mut rx) = connect(&manager, "alice").await;

        match next_event(&mut rx).await {
            ServerEvent::TerminalCreated {
                is_initial: true,
                is_restored: false,
                ..
            } => {}
            other => panic!("expected initial terminal-created, got {other:?}"),
        }
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn reconnect_restores_sessions_and_history() {
        let (manager, spawner) = fake_manager(ManagerSettings::default());
        let (conn1, mut rx1) = connect(&manager, "alice").await;
        let sid = created_id(&next_event(&mut rx1).await);

        let control = spawner.control(0);
        control
            .event_tx
            .send(ProcessEvent::Output(b"hello".to_vec()))
            .unwrap();
        match next_event(&mut rx1).await {
            ServerEvent::TerminalOutput { data, .. } => assert_eq!(data, "hello"),
            other => panic!("expected terminal-output, got {other:?}"),
        }

        manager.disconnect(conn1).await;

        // Output while nobody is bound goes only to the history buffer.
        control
            .event_tx
            .send(ProcessEvent::Output(b" world".to_vec()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (_conn2, mut rx2) = connect(&manager, "alice").await;
        match next_event(&mut rx2).await {
            ServerEvent::TerminalCreated {
                session_id,
                is_restored: true,
                is_initial: false,
            } => assert_eq!(session_id, sid),
            other => panic!("expected restored terminal-created, got {other:?}"),
        }
        match next_event(&mut rx2).await {
            ServerEvent::TerminalHistory {
                session_id,
                history,
            } => {
                assert_eq!(session_id, sid);
                assert_eq!(history, "hello world");
            }
            other => panic!("expected terminal-history, got {other:?}"),
        }
        match next_event(&mut rx2).await {
            ServerEvent::TerminalsRestored {
                session_ids,
                active,
            } => {
                assert_eq!(session_ids, vec![sid]);
                assert_eq!(active, Some(sid));
            }
            other => panic!("expected terminals-restored, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn restored_chunks_are_not_also_delivered_live() {
        let (manager, spawner) = fake_manager(ManagerSettings::default());
        let (conn1, mut rx1) = connect(&manager, "alice").await;
        let sid = created_id(&next_event(&mut rx1).await);
        manager.disconnect(conn1).await;

        // Emitted while nobody is bound: history only.
        let control = spawner.control(0);
        control
            .event_tx
            .send(ProcessEvent::Output(b"buffered".to_vec()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (_conn2, mut rx2) = connect(&manager, "alice").await;
        assert!(matches!(
            next_event(&mut rx2).await,
            ServerEvent::TerminalCreated { is_restored: true, .. }
        ));
        match next_event(&mut rx2).await {
            ServerEvent::TerminalHistory { history, .. } => assert_eq!(history, "buffered"),
            other => panic!("expected terminal-history, got {other:?}"),
        }
        assert!(matches!(
            next_event(&mut rx2).await,
            ServerEvent::TerminalsRestored { .. }
        ));
        // The replayed chunk must not arrive a second time as live output.
        assert!(rx2.try_recv().is_err());

        // A fresh chunk after the restore arrives live, exactly once.
        control
            .event_tx
            .send(ProcessEvent::Output(b"fresh".to_vec()))
            .unwrap();
        match next_event(&mut rx2).await {
            ServerEvent::TerminalOutput { session_id, data } => {
                assert_eq!(session_id, sid);
                assert_eq!(data, "fresh");
            }
            other => panic!("expected terminal-output, got {other:?}"),
        }
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_of_unbound_connection_keeps_newer_binding() {
        let (manager, spawner) = fake_manager(ManagerSettings::default());
        let (conn1, mut rx1) = connect(&manager, "alice").await;
        let _sid = created_id(&next_event(&mut rx1).await);

        // Second connection for the same user takes over the binding.
        let (_conn2, mut rx2) = connect(&manager, "alice").await;
        while !matches!(
            next_event(&mut rx2).await,
            ServerEvent::TerminalsRestored { .. }
        ) {}

        let control = spawner.control(0);
        control
            .event_tx
            .send(ProcessEvent::Output(b"ping".to_vec()))
            .unwrap();
        assert!(matches!(
            next_event(&mut rx2).await,
            ServerEvent::TerminalOutput { .. }
        ));
        assert!(rx1.try_recv().is_err());

        // The older connection's disconnect must not clear conn2's binding.
        manager.disconnect(conn1).await;
        control
            .event_tx
            .send(ProcessEvent::Output(b"pong".to_vec()))
            .unwrap();
        assert!(matches!(
            next_event(&mut rx2).await,
            ServerEvent::TerminalOutput { .. }
        ));
    }

    #[tokio::test]
    async fn close_removes_exactly_once_and_falls_back() {
        let (manager, spawner) = fake_manager(ManagerSettings::default());
        let (conn, mut rx) = connect(&manager, "alice").await;
        let first = created_id(&next_event(&mut rx).await);

        manager.create(conn, None).await;
        let second = created_id(&next_event(&mut rx).await);
        assert_ne!(first, second);

        manager.close(conn, first).await;
        match next_event(&mut rx).await {
            ServerEvent::TerminalClosed {
                session_id,
                exit_code,
                signal,
            } => {
                assert_eq!(session_id, first);
                assert_eq!(exit_code, 137);
                assert_eq!(signal.as_deref(), Some("SIGKILL"));
            }
            other => panic!("expected terminal-closed, got {other:?}"),
        }
        assert_eq!(manager.session_count().await, 1);

        // Repeated close of the dead session is a no-op.
        manager.close(conn, first).await;
        assert!(spawner.control(0).killed.load(Ordering::SeqCst));
        assert!(rx.try_recv().is_err());

        manager.list(conn).await;
        match next_event(&mut rx).await {
            ServerEvent::TerminalsList {
                session_ids,
                active,
            } => {
                assert_eq!(session_ids, vec![second]);
                assert_eq!(active, Some(second));
            }
            other => panic!("expected terminals-list, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn switch_to_unknown_session_is_silent() {
        let (manager, _spawner) = fake_manager(ManagerSettings::default());
        let (conn, mut rx) = connect(&manager, "alice").await;
        let sid = created_id(&next_event(&mut rx).await);

        manager.switch(conn, 9999).await;
        assert!(rx.try_recv().is_err());

        // Valid switch still acknowledged afterwards.
        manager.switch(conn, sid).await;
        assert!(matches!(
            next_event(&mut rx).await,
            ServerEvent::TerminalSwitched { session_id } if session_id == sid
        ));
    }

    #[tokio::test]
    async fn foreign_session_input_is_ignored() {
        let (manager, spawner) = fake_manager(ManagerSettings::default());
        let (_alice_conn, mut alice_rx) = connect(&manager, "alice").await;
        let alice_sid = created_id(&next_event(&mut alice_rx).await);
        let (bob_conn, mut bob_rx) = connect(&manager, "bob").await;
        let _bob_sid = created_id(&next_event(&mut bob_rx).await);

        manager.input(bob_conn, alice_sid, "rm -rf /\n").await;
        assert!(spawner.control(0).written.lock().unwrap().is_empty());
        // Bob cannot close Alice's session either.
        manager.close(bob_conn, alice_sid).await;
        assert!(!spawner.control(0).killed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn spawn_failure_registers_nothing() {
        let (manager, spawner) = fake_manager(ManagerSettings::default());
        spawner.fail_next.store(true, Ordering::SeqCst);

        let (conn, mut rx) = connect(&manager, "alice").await;
        assert_eq!(manager.session_count().await, 0);
        assert!(rx.try_recv().is_err());

        // The connection stays usable; an explicit create works afterwards.
        manager.create(conn, None).await;
        let _sid = created_id(&next_event(&mut rx).await);
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn broadcast_mode_shares_sessions_across_users() {
        let settings = ManagerSettings {
            routing: RoutingMode::Broadcast,
            ..ManagerSettings::default()
        };
        let (manager, spawner) = fake_manager(settings);

        let (_conn1, mut rx1) = connect(&manager, "alice").await;
        let sid = created_id(&next_event(&mut rx1).await);

        // A different token sees the same session set.
        let (conn2, mut rx2) = connect(&manager, "bob").await;
        match next_event(&mut rx2).await {
            ServerEvent::TerminalCreated {
                session_id,
                is_restored: true,
                ..
            } => assert_eq!(session_id, sid),
            other => panic!("expected restored terminal-created, got {other:?}"),
        }
        while !matches!(
            next_event(&mut rx2).await,
            ServerEvent::TerminalsRestored { .. }
        ) {}

        // Output reaches every connection.
        spawner
            .control(0)
            .event_tx
            .send(ProcessEvent::Output(b"shared".to_vec()))
            .unwrap();
        assert!(matches!(
            next_event(&mut rx1).await,
            ServerEvent::TerminalOutput { .. }
        ));
        assert!(matches!(
            next_event(&mut rx2).await,
            ServerEvent::TerminalOutput { .. }
        ));

        // Switch is acknowledged to the requester only.
        manager.switch(conn2, sid).await;
        assert!(matches!(
            next_event(&mut rx2).await,
            ServerEvent::TerminalSwitched { .. }
        ));
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn ephemeral_mode_kills_sessions_on_disconnect() {
        let settings = ManagerSettings {
            persistent: false,
            ..ManagerSettings::default()
        };
        let (manager, spawner) = fake_manager(settings);

        let (conn, mut rx) = connect(&manager, "alice").await;
        let _sid = created_id(&next_event(&mut rx).await);

        manager.disconnect(conn).await;
        assert!(spawner.control(0).killed.load(Ordering::SeqCst));

        // Exit event drains through the pump and the registry empties.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn max_sessions_cap_is_enforced() {
        let settings = ManagerSettings {
            max_sessions: 1,
            ..ManagerSettings::default()
        };
        let (manager, spawner) = fake_manager(settings);
        let (conn, mut rx) = connect(&manager, "alice").await;
        let _sid = created_id(&next_event(&mut rx).await);

        manager.create(conn, None).await;
        assert_eq!(manager.session_count().await, 1);
        assert!(rx.try_recv().is_err());
        // The over-cap process never outlives the rejected create.
        assert!(spawner.control(1).killed.load(Ordering::SeqCst));
        assert!(!spawner.control(0).killed.load(Ordering::SeqCst));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn end_to_end_echo_and_restore_with_real_pty() {
        use crate::session::PtySpawner;

        let manager = SessionManager::new(ManagerSettings::default(), Box::new(PtySpawner));
        let (conn, mut rx) = connect(&manager, "alice").await;
        let sid = created_id(&next_event(&mut rx).await);

        manager.input(conn, sid, "echo hi_webmux\n").await;
        let deadline = Duration::from_secs(10);
        let mut seen = String::new();
        let found = timeout(deadline, async {
            loop {
                if let ServerEvent::TerminalOutput { data, .. } = next_event(&mut rx).await {
                    seen.push_str(&data);
                    // Skip the local echo of the typed command line.
                    if seen.contains("hi_webmux")
                        && !seen.trim_end().ends_with("echo hi_webmux")
                    {
                        break;
                    }
                }
            }
        })
        .await;
        assert!(found.is_ok(), "no echo output observed: {seen:?}");

        manager.disconnect(conn).await;
        let (_conn2, mut rx2) = connect(&manager, "alice").await;
        match next_event(&mut rx2).await {
            ServerEvent::TerminalCreated {
                session_id,
                is_restored: true,
                ..
            } => assert_eq!(session_id, sid),
            other => panic!("expected restored session, got {other:?}"),
        }
        match next_event(&mut rx2).await {
            ServerEvent::TerminalHistory { history, .. } => {
                assert!(history.contains("hi_webmux"));
            }
            other => panic!("expected terminal-history, got {other:?}"),
        }
    }
}
