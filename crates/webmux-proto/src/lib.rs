//! webmux-proto: Shared protocol library for webmux.
//!
//! Provides the JSON event types exchanged between terminal clients and the
//! webmux server, encode/decode helpers, and the common error taxonomy.

pub mod codec;
pub mod error;
pub mod events;

// Re-export commonly used items at crate root.
pub use codec::{decode_client_event, decode_server_event, encode_event};
pub use error::{MuxError, MuxResult};
pub use events::{ClientEvent, ServerEvent, SessionId};
