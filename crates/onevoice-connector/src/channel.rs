//! Boundary to the external broadcast channel.
//!
//! The real transport is a headless-browser driver that joins the chat,
//! scrapes new log entries, and types outgoing lines; it lives out of tree
//! and plugs in through [`ChannelTransport`]. The core never sees callbacks
//! or DOM details, only a bounded stream of decoded [`ChatLine`]s and a
//! cloneable write handle. All reads and writes go through one driver task
//! per session, which serializes access to the underlying transport.

use std::future::Future;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use onevoice_protocol::ChatLine;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The session or its event stream is unusable. Session-fatal: the
    /// supervisor tears down and restarts.
    #[error("channel connectivity lost: {0}")]
    ConnectionLost(String),

    /// Login credentials were rejected outright. Terminal for the keyed
    /// identity: the supervisor falls back to a guest identity instead of
    /// retrying the same login forever.
    #[error("login credentials rejected")]
    InvalidCredentials,

    #[error("channel transport failure: {0}")]
    Transport(String),
}

/// A live attachment to the channel.
pub struct ChannelSession {
    /// Channel/session identifier, for the status page.
    pub session_id: String,
    /// Decoded entries in the order the channel delivered them to us.
    /// There is no ordering guarantee across observers.
    pub events: mpsc::Receiver<ChatLine>,
    /// Cloneable write/control handle.
    pub handle: SessionHandle,
}

/// Commands a session driver task services. Transports construct a
/// [`SessionHandle`] over the sending side of a command channel.
#[derive(Debug)]
pub enum SessionCommand {
    SendLine(String, oneshot::Sender<Result<(), SessionError>>),
    Rejoin(oneshot::Sender<Result<(), SessionError>>),
    Close,
}

/// Write/control handle for one session. All commands funnel into the
/// session's single driver task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(tx: mpsc::Sender<SessionCommand>) -> Self {
        Self { tx }
    }

    /// Hand one raw line to the channel.
    pub async fn send_line(&self, line: &str) -> Result<(), SessionError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::SendLine(line.to_string(), ack_tx))
            .await
            .map_err(|_| SessionError::ConnectionLost("session driver gone".into()))?;
        ack_rx
            .await
            .map_err(|_| SessionError::ConnectionLost("session driver gone".into()))?
    }

    /// Best-effort re-attach to the channel without a full restart.
    pub async fn rejoin(&self) -> Result<(), SessionError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Rejoin(ack_tx))
            .await
            .map_err(|_| SessionError::ConnectionLost("session driver gone".into()))?;
        ack_rx
            .await
            .map_err(|_| SessionError::ConnectionLost("session driver gone".into()))?
    }

    /// Close the session. Idempotent: closing an already-closed session is
    /// a no-op.
    pub async fn close(&self) {
        let _ = self.tx.send(SessionCommand::Close).await;
    }
}

impl onevoice_dispatch::ChannelWriter for SessionHandle {
    async fn send_line(&self, line: &str) -> Result<(), onevoice_dispatch::DispatchError> {
        SessionHandle::send_line(self, line)
            .await
            .map_err(|e| onevoice_dispatch::DispatchError::ChannelWrite(e.to_string()))
    }
}

/// Factory for channel sessions. One transport outlives many sessions.
pub trait ChannelTransport: Send + Sync + 'static {
    fn connect(
        &self,
        guest: bool,
    ) -> impl Future<Output = Result<ChannelSession, SessionError>> + Send;
}

pub mod loopback {
    //! In-memory channel shared by every connected session.
    //!
    //! Stands in for the browser-driven transport in tests and local runs.
    //! Every line any session sends is broadcast back to all sessions, own
    //! lines included, exactly like a public chat log. Delivery is lossy
    //! when a subscriber's buffer is full, which is faithful to the real
    //! channel's lack of guarantees.

    use std::sync::Arc;

    use tokio::sync::mpsc::error::TrySendError;
    use tokio::sync::{mpsc, Mutex};

    use onevoice_protocol::ChatLine;

    use super::{ChannelSession, ChannelTransport, SessionCommand, SessionError, SessionHandle};

    const SUBSCRIBER_BUFFER: usize = 256;

    #[derive(Default)]
    struct Shared {
        subscribers: Vec<mpsc::Sender<ChatLine>>,
        history: Vec<ChatLine>,
        reject_keyed_login: bool,
        fail_rejoin: bool,
        next_session: u64,
    }

    /// The shared chat log. Clone freely; all clones observe the same log.
    #[derive(Clone, Default)]
    pub struct LoopbackChannel {
        inner: Arc<Mutex<Shared>>,
    }

    impl LoopbackChannel {
        pub fn new() -> Self {
            Self::default()
        }

        /// Post a line as an end user.
        pub async fn post(&self, author: &str, text: &str) {
            self.broadcast(ChatLine::new(Some(author.to_string()), text))
                .await;
        }

        /// Post a raw line with no attributed author, the way the channel
        /// renders protocol traffic.
        pub async fn post_raw(&self, text: &str) {
            self.broadcast(ChatLine::new(None, text)).await;
        }

        /// Everything posted so far, oldest first.
        pub async fn history(&self) -> Vec<ChatLine> {
            self.inner.lock().await.history.clone()
        }

        /// Make keyed (non-guest) logins fail with
        /// [`SessionError::InvalidCredentials`].
        pub async fn reject_keyed_logins(&self, reject: bool) {
            self.inner.lock().await.reject_keyed_login = reject;
        }

        /// Make soft rejoin attempts fail.
        pub async fn fail_rejoins(&self, fail: bool) {
            self.inner.lock().await.fail_rejoin = fail;
        }

        pub fn transport(&self) -> LoopbackTransport {
            LoopbackTransport {
                channel: self.clone(),
            }
        }

        async fn broadcast(&self, line: ChatLine) {
            let mut shared = self.inner.lock().await;
            shared.history.push(line.clone());
            shared.subscribers.retain(|tx| match tx.try_send(line.clone()) {
                Ok(()) => true,
                // Lossy delivery: a slow subscriber misses the line.
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Closed(_)) => false,
            });
        }
    }

    /// [`ChannelTransport`] over a [`LoopbackChannel`].
    pub struct LoopbackTransport {
        channel: LoopbackChannel,
    }

    impl ChannelTransport for LoopbackTransport {
        async fn connect(&self, guest: bool) -> Result<ChannelSession, SessionError> {
            let (event_tx, event_rx) = mpsc::channel(SUBSCRIBER_BUFFER);
            let session_id = {
                let mut shared = self.channel.inner.lock().await;
                if !guest && shared.reject_keyed_login {
                    return Err(SessionError::InvalidCredentials);
                }
                shared.next_session += 1;
                shared.subscribers.push(event_tx);
                format!("loopback-{}", shared.next_session)
            };

            let (cmd_tx, mut cmd_rx) = mpsc::channel(64);
            let channel = self.channel.clone();
            tokio::spawn(async move {
                while let Some(cmd) = cmd_rx.recv().await {
                    match cmd {
                        SessionCommand::SendLine(text, ack) => {
                            channel.broadcast(ChatLine::new(None, text)).await;
                            let _ = ack.send(Ok(()));
                        }
                        SessionCommand::Rejoin(ack) => {
                            let failed = channel.inner.lock().await.fail_rejoin;
                            let _ = ack.send(if failed {
                                Err(SessionError::Transport("rejoin refused".into()))
                            } else {
                                Ok(())
                            });
                        }
                        SessionCommand::Close => break,
                    }
                }
            });

            Ok(ChannelSession {
                session_id,
                events: event_rx,
                handle: SessionHandle::new(cmd_tx),
            })
        }
    }

}
