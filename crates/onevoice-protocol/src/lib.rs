//! onevoice protocol - channel event model and wire conventions
//!
//! Defines what travels over the shared broadcast channel: peer presence
//! announcements, candidate commands from users, and the invisible marker
//! that separates protocol traffic from ordinary chat.

pub mod constants;
pub mod events;
pub mod identity;

pub use constants::*;
pub use events::*;
pub use identity::*;
