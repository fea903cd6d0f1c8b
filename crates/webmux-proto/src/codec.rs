//! JSON encode/decode helpers for wire events.
//!
//! The transport carries one JSON object per WebSocket text frame; these
//! helpers centralize the serde_json calls and fold parse failures into
//! [`MuxError::Codec`].

use crate::error::{MuxError, MuxResult};
use crate::events::{ClientEvent, ServerEvent};
use serde::Serialize;

/// Encode any wire event to a JSON string.
pub fn encode_event<E: Serialize>(event: &E) -> MuxResult<String> {
    serde_json::to_string(event).map_err(|e| MuxError::Codec(e.to_string()))
}

/// Decode a client-originated event from a JSON text frame.
pub fn decode_client_event(text: &str) -> MuxResult<ClientEvent> {
    serde_json::from_str(text).map_err(|e| MuxError::Codec(e.to_string()))
}

/// Decode a server-originated event (used by client-side consumers and tests).
pub fn decode_server_event(text: &str) -> MuxResult<ServerEvent> {
    serde_json::from_str(text).map_err(|e| MuxError::Codec(e.to_string()))
}
