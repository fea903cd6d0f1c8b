//! Session subsystem: process boundary, bounded history, session registry.

pub mod history;
pub mod process;
pub mod registry;

pub use history::{HistoryBuffer, DEFAULT_HISTORY_CAPACITY};
pub use process::{ProcessEvent, ProcessHandle, ProcessSpawner, PtySpawner};
pub use registry::{Session, SessionRegistry, SessionState};
