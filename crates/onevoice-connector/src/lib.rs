//! onevoice connector - process lifecycle around the coordination core
//!
//! Owns everything that touches the outside world: configuration, the
//! channel transport boundary, the broadcast listener, the heartbeat
//! publisher, the inactivity watchdog, the supervising restart loop, and the
//! status HTTP server.

pub mod channel;
pub mod config;
pub mod heartbeat;
pub mod listener;
pub mod status;
pub mod supervisor;
pub mod watchdog;
