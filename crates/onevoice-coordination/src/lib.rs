//! onevoice coordination - who is allowed to speak
//!
//! Peer discovery and leader election over the broadcast channel, plus the
//! per-issuer admission filter that every peer maintains identically whether
//! it is leader or standby.

pub mod admission;
pub mod election;
pub mod registry;

pub use admission::*;
pub use election::*;
pub use registry::*;
