//! Routing subsystem: user directory and connection router.

pub mod directory;
pub mod router;

pub use directory::{UserDirectory, DEFAULT_USER};
pub use router::{ConnId, ConnectionRouter, RoutingMode};
