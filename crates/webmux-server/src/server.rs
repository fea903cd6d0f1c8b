//! Core server: accepts WebSocket connections and runs each one's event
//! loop against the session manager.

use crate::config::ServerConfig;
use crate::manager::{ManagerSettings, SessionManager};
use crate::routing::ConnId;
use crate::session::PtySpawner;
use crate::transport::websocket::{self, WebSocketConnection};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webmux_proto::{encode_event, decode_client_event, ClientEvent, MuxError, MuxResult};

/// The webmux server instance.
pub struct MuxServer {
    config: ServerConfig,
    manager: SessionManager,
}

impl MuxServer {
    pub fn new(config: ServerConfig) -> Self {
        let settings = ManagerSettings {
            routing: config.routing,
            persistent: config.persistent,
            history_capacity: config.history_capacity,
            max_sessions: config.max_sessions,
            default_shell: config.default_shell.clone(),
        };
        let manager = SessionManager::new(settings, Box::new(PtySpawner));
        Self { config, manager }
    }

    /// Bind and serve until the listener fails.
    pub async fn run(self) -> MuxResult<()> {
        let addr: SocketAddr = format!("0.0.0.0:{}", self.config.port)
            .parse()
            .map_err(|e| MuxError::Config(format!("invalid address: {e}")))?;

        let mut conn_rx = websocket::start_listener(addr).await?;

        info!(
            port = self.config.port,
            routing = ?self.config.routing,
            persistent = self.config.persistent,
            "webmux-server ready"
        );

        let server = Arc::new(self);
        while let Some(conn) = conn_rx.recv().await {
            let srv = server.clone();
            tokio::spawn(async move {
                if let Err(e) = srv.handle_connection(conn).await {
                    warn!(error = %e, "connection error");
                }
            });
        }

        info!("listener closed, shutting down");
        Ok(())
    }

    /// Per-connection loop: restore-or-create on entry, then pump inbound
    /// client events and outbound server events until either side ends.
    async fn handle_connection(&self, conn: WebSocketConnection) -> MuxResult<()> {
        let remote = conn.remote_addr;
        let mut ws = conn.ws_stream;

        let (tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (conn_id, user) = self.manager.connect(conn.user_token.as_deref(), tx).await;
        info!(conn_id, user = %user, remote = %remote, "client connected");

        let result = self.connection_loop(&mut ws, conn_id, &mut outbound_rx).await;

        // Cleanup runs regardless of how the loop ended.
        self.manager.disconnect(conn_id).await;
        result
    }

    async fn connection_loop(
        &self,
        ws: &mut tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
        conn_id: ConnId,
        outbound_rx: &mut mpsc::UnboundedReceiver<webmux_proto::ServerEvent>,
    ) -> MuxResult<()> {
        loop {
            tokio::select! {
                Some(event) = outbound_rx.recv() => {
                    let text = encode_event(&event)?;
                    websocket::ws_send_text(ws, &text).await?;
                }

                frame = websocket::ws_recv_text(ws) => {
                    match frame {
                        Ok(Some(text)) => match decode_client_event(&text) {
                            Ok(event) => self.dispatch(conn_id, event).await,
                            Err(e) => {
                                debug!(conn_id, error = %e, "ignoring malformed client event");
                            }
                        },
                        Ok(None) => {
                            debug!(conn_id, "client closed connection");
                            return Ok(());
                        }
                        Err(e) => {
                            debug!(conn_id, error = %e, "connection ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Route one decoded client event into the manager.
    async fn dispatch(&self, conn_id: ConnId, event: ClientEvent) {
        match event {
            ClientEvent::CreateTerminal { shell } => {
                self.manager.create(conn_id, shell.as_deref()).await;
            }
            ClientEvent::SwitchTerminal { session_id } => {
                self.manager.switch(conn_id, session_id).await;
            }
            ClientEvent::TerminalInput { session_id, input } => {
                self.manager.input(conn_id, session_id, &input).await;
            }
            ClientEvent::TerminalResize {
                session_id,
                cols,
                rows,
            } => {
                self.manager.resize(conn_id, session_id, cols, rows).await;
            }
            ClientEvent::CloseTerminal { session_id } => {
                self.manager.close(conn_id, session_id).await;
            }
            ClientEvent::GetTerminals => {
                self.manager.list(conn_id).await;
            }
        }
    }
}
