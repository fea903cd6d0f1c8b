//! webmux wire events.
//!
//! Every message on the wire is a JSON object with a `type` field naming the
//! event and camelCase payload keys alongside it. Terminal data travels as
//! UTF-8 text (process output is lossy-decoded before transmission) so the
//! whole protocol stays inspectable JSON.

use serde::{Deserialize, Serialize};

/// Identifier for a terminal session, stable for the process's lifetime.
/// Assigned monotonically by the server.
pub type SessionId = u64;

/// Events sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Request a new terminal session.
    #[serde(rename_all = "camelCase")]
    CreateTerminal {
        /// Shell executable override. Absent means platform default.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shell: Option<String>,
    },
    /// Update this connection's active terminal (display selection only).
    #[serde(rename_all = "camelCase")]
    SwitchTerminal { session_id: SessionId },
    /// Forward keystrokes to a terminal's stdin.
    #[serde(rename_all = "camelCase")]
    TerminalInput { session_id: SessionId, input: String },
    /// Forward a resize to the backing process.
    #[serde(rename_all = "camelCase")]
    TerminalResize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    /// Request that a terminal's process be killed.
    #[serde(rename_all = "camelCase")]
    CloseTerminal { session_id: SessionId },
    /// Request the current terminal list.
    GetTerminals,
}

/// Events sent by the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// A terminal now exists. `is_initial` marks the default session created
    /// for a fresh user; `is_restored` marks re-announcement on reconnect.
    #[serde(rename_all = "camelCase")]
    TerminalCreated {
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "is_false")]
        is_initial: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        is_restored: bool,
    },
    /// Live output chunk from a terminal's process.
    #[serde(rename_all = "camelCase")]
    TerminalOutput { session_id: SessionId, data: String },
    /// Buffered scrollback replayed on restore.
    #[serde(rename_all = "camelCase")]
    TerminalHistory { session_id: SessionId, history: String },
    /// A terminal's process exited. `signal` is absent on a normal exit.
    #[serde(rename_all = "camelCase")]
    TerminalClosed {
        session_id: SessionId,
        exit_code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal: Option<String>,
    },
    /// Bulk sync after a reconnect: every surviving session id plus the
    /// previously-active one.
    #[serde(rename_all = "camelCase")]
    TerminalsRestored {
        session_ids: Vec<SessionId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active: Option<SessionId>,
    },
    /// Answer to `get-terminals`.
    #[serde(rename_all = "camelCase")]
    TerminalsList {
        session_ids: Vec<SessionId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active: Option<SessionId>,
    },
    /// Acknowledgement of `switch-terminal`, sent only to the requester.
    #[serde(rename_all = "camelCase")]
    TerminalSwitched { session_id: SessionId },
}

fn is_false(v: &bool) -> bool {
    !*v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_wire_shape() {
        let json = r#"{"type":"terminal-input","sessionId":3,"input":"ls\n"}"#;
        let ev: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            ev,
            ClientEvent::TerminalInput {
                session_id: 3,
                input: "ls\n".into()
            }
        );
    }

    #[test]
    fn create_without_shell() {
        let ev: ClientEvent = serde_json::from_str(r#"{"type":"create-terminal"}"#).unwrap();
        assert_eq!(ev, ClientEvent::CreateTerminal { shell: None });
    }

    #[test]
    fn server_event_tags() {
        let ev = ServerEvent::TerminalCreated {
            session_id: 1,
            is_initial: true,
            is_restored: false,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""type":"terminal-created""#));
        assert!(json.contains(r#""isInitial":true"#));
        // false flags are omitted from the wire
        assert!(!json.contains("isRestored"));
    }

    #[test]
    fn closed_signal_optional() {
        let ev = ServerEvent::TerminalClosed {
            session_id: 9,
            exit_code: 0,
            signal: None,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(!json.contains("signal"));
        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }
}
