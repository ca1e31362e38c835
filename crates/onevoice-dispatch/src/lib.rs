//! onevoice dispatch - from admitted command to chat reply
//!
//! The leader-gated command dispatcher, the HTTP client for the external
//! command-execution service, and the single-consumer outbound queue that
//! serializes every write to the channel.

pub mod commands;
pub mod dispatcher;
pub mod error;
pub mod outbound;

pub use commands::*;
pub use dispatcher::*;
pub use error::*;
pub use outbound::*;
