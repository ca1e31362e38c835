use thiserror::Error;

/// Errors in the dispatch layer. All of these are recoverable per-command or
/// per-send failures; none unwind past their worker.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("command service request failed: {0}")]
    Service(String),

    #[error("channel write failed: {0}")]
    ChannelWrite(String),
}
