//! Top-level lifecycle: boot, listen before electing, run, tear down,
//! back off, restart.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use onevoice_coordination::{AdmissionControl, CoordinationContext, CoordinationHandle};
use onevoice_dispatch::{run_sender, AllowList, CommandClient, CommandDispatcher, OutboundQueue};
use onevoice_protocol::constants::{
    HEARTBEAT_INTERVAL, INACTIVITY_TIMEOUT, MAX_COMMAND_WORKERS, PEER_TIMEOUT, RESTART_CEILING,
    RESTART_DELAY, RESTART_WINDOW, SEND_DELAY, STARTUP_LISTEN, THRASH_PAUSE,
};
use onevoice_protocol::{classify, rollcall_line, ChannelEvent, ChatLine, PeerId};

use crate::channel::{ChannelSession, ChannelTransport, SessionError};
use crate::config::Config;
use crate::heartbeat::run_heartbeat;
use crate::listener::BroadcastListener;
use crate::status::{note_transition, StatusHandle};
use crate::watchdog::Watchdog;

/// Timing and sizing knobs, defaulting to the production constants.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub listen_phase: Duration,
    pub heartbeat_interval: Duration,
    pub peer_timeout: Duration,
    pub send_delay: Duration,
    pub inactivity_timeout: Duration,
    pub restart_window: Duration,
    pub restart_ceiling: u32,
    pub thrash_pause: Duration,
    pub restart_delay: Duration,
    pub max_workers: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            listen_phase: STARTUP_LISTEN,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            peer_timeout: PEER_TIMEOUT,
            send_delay: SEND_DELAY,
            inactivity_timeout: INACTIVITY_TIMEOUT,
            restart_window: RESTART_WINDOW,
            restart_ceiling: RESTART_CEILING,
            thrash_pause: THRASH_PAUSE,
            restart_delay: RESTART_DELAY,
            max_workers: MAX_COMMAND_WORKERS,
        }
    }
}

/// Counts restart attempts, each within the rolling window of the previous.
/// A gap wider than the window starts the count over at 1.
#[derive(Debug)]
pub struct RestartLedger {
    window: Duration,
    count_in_window: u32,
    last_restart: Option<Instant>,
}

impl RestartLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            count_in_window: 0,
            last_restart: None,
        }
    }

    /// Record a restart attempt at `now`; returns the running count.
    pub fn record(&mut self, now: Instant) -> u32 {
        match self.last_restart {
            Some(prev) if now.duration_since(prev) < self.window => self.count_in_window += 1,
            _ => self.count_in_window = 1,
        }
        self.last_restart = Some(now);
        self.count_in_window
    }
}

/// Wraps the whole lifecycle. Each failed session is torn down completely
/// (timers canceled, tasks stopped, session closed, coordination state
/// discarded) before the next `Starting` attempt.
pub struct Supervisor<T: ChannelTransport> {
    config: Config,
    tuning: SupervisorConfig,
    transport: T,
    status: StatusHandle,
    client: Arc<CommandClient>,
    allow_list: Arc<AllowList>,
    refresh_rx: mpsc::Receiver<()>,
    ledger: RestartLedger,
    /// Cleared permanently once the keyed login is rejected.
    use_key_login: bool,
    self_id: PeerId,
}

impl<T: ChannelTransport> Supervisor<T> {
    pub fn new(
        config: Config,
        tuning: SupervisorConfig,
        transport: T,
        status: StatusHandle,
        refresh_rx: mpsc::Receiver<()>,
    ) -> Self {
        let client = Arc::new(CommandClient::new(
            config.service.base_url.clone(),
            config.service.api_key.clone(),
        ));
        let use_key_login = config.channel.login_key.is_some();
        Self {
            config,
            transport,
            status,
            client,
            allow_list: Arc::new(AllowList::new()),
            refresh_rx,
            ledger: RestartLedger::new(tuning.restart_window),
            tuning,
            use_key_login,
            self_id: PeerId::generate(),
        }
    }

    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    /// Run forever. Every exit from a session, whatever the reason, loops
    /// back to a fresh `Starting` attempt after backoff; a crash loop is
    /// converted into a slow, bounded-cost retry loop by the restart ledger.
    pub async fn run(mut self) {
        self.status
            .push_event(format!("Instance starting with id {}.", self.self_id.short()))
            .await;
        loop {
            let attempt = self.ledger.record(Instant::now());
            if attempt > self.tuning.restart_ceiling {
                tracing::error!(attempt, "restart ceiling exceeded; cooling down");
                self.status.set_status("Thrashing; cooling down...").await;
                self.status
                    .push_event("Restarting too fast; pausing before the next attempt.")
                    .await;
                tokio::time::sleep(self.tuning.thrash_pause).await;
            }

            let failure = match self.run_session().await {
                Ok(never) => match never {},
                Err(e) => e,
            };

            if matches!(
                failure.downcast_ref::<SessionError>(),
                Some(SessionError::InvalidCredentials)
            ) {
                // Terminal for the keyed identity: do not retry it.
                self.use_key_login = false;
                self.status.set_status("Invalid key!").await;
                self.status
                    .push_event("Login key rejected; switching to guest identity.")
                    .await;
            } else {
                tracing::error!(error = %failure, "session failed; restarting");
                self.status.set_status("Crashed! Restarting...").await;
                self.status.push_event(format!("Fatal: {failure}")).await;
            }

            tokio::time::sleep(self.tuning.restart_delay).await;
        }
    }

    /// One full `Starting -> Listening -> Running` pass. Only returns on
    /// failure; all per-run state is created here and torn down before
    /// returning.
    async fn run_session(&mut self) -> Result<Infallible, anyhow::Error> {
        self.status.set_status("Connecting to channel...").await;
        self.status.push_event("Performing full start...").await;

        let guest = !self.use_key_login;
        let ChannelSession {
            session_id,
            mut events,
            handle,
        } = self.transport.connect(guest).await?;
        self.status.set_session_id(session_id.clone()).await;
        self.status
            .push_event(format!("Joined channel (session {session_id})."))
            .await;

        // The allow-list must be populated before any command can run;
        // failure here aborts the whole startup attempt.
        let definitions = self
            .client
            .fetch_command_list()
            .await
            .map_err(|e| anyhow::anyhow!("failed to fetch command list: {e}"))?;
        let verb_count = self.allow_list.replace_from_definitions(&definitions).await;
        self.status
            .push_event(format!("Fetched {verb_count} commands from the service."))
            .await;

        // Fresh coordination state for this run. Elections stay gated until
        // the listening phase has elapsed.
        let coordination = CoordinationHandle::new(CoordinationContext::new(
            self.self_id.clone(),
            self.tuning.peer_timeout,
            Instant::now() + self.tuning.listen_phase,
        ));

        // Outbound path: one queue, one sender, one mirror into the status
        // snapshot.
        let (outbound, outbound_rx) = OutboundQueue::channel();
        let (last_sent_tx, mut last_sent_rx) = watch::channel(String::new());
        let sender_task = tokio::spawn(run_sender(
            outbound_rx,
            handle.clone(),
            self.tuning.send_delay,
            last_sent_tx,
        ));
        let status_for_sent = self.status.clone();
        let sent_mirror = tokio::spawn(async move {
            while last_sent_rx.changed().await.is_ok() {
                let text = last_sent_rx.borrow_and_update().clone();
                status_for_sent.record_sent(text).await;
            }
        });

        // Announce, then listen before the first election.
        outbound.enqueue(&rollcall_line(&self.self_id)).await;
        self.status.set_status("Listening for peers...").await;
        self.status
            .push_event(format!(
                "Listening {}ms for other instances...",
                self.tuning.listen_phase.as_millis()
            ))
            .await;
        listen_for_peers(&mut events, &coordination, self.tuning.listen_phase).await;

        if let Some(transition) = coordination.evaluate(Instant::now()).await {
            note_transition(&self.status, &transition).await;
        }
        self.status
            .push_event("Listening phase complete; first election held.")
            .await;

        // Running: listener, heartbeat, watchdog.
        let heartbeat_task = tokio::spawn(run_heartbeat(
            self.self_id.clone(),
            self.tuning.heartbeat_interval,
            outbound.clone(),
            coordination.clone(),
            self.status.clone(),
        ));
        let (watchdog, mut watchdog_fired) = Watchdog::spawn(self.tuning.inactivity_timeout);
        let dispatcher = CommandDispatcher::new(
            coordination.clone(),
            Arc::clone(&self.allow_list),
            Arc::clone(&self.client),
            outbound.clone(),
            self.tuning.max_workers,
        );
        let listener = BroadcastListener::new(
            self.self_id.clone(),
            coordination,
            AdmissionControl::default(),
            dispatcher,
            watchdog.clone(),
            self.status.clone(),
        );
        let mut listener_task = tokio::spawn(listener.run(events));

        let failure: anyhow::Error = loop {
            tokio::select! {
                res = &mut listener_task => {
                    break match res {
                        Ok(session_err) => anyhow::Error::new(session_err),
                        Err(join_err) => anyhow::anyhow!("listener task failed: {join_err}"),
                    };
                }
                Some(()) = watchdog_fired.recv() => {
                    self.status
                        .push_event("Channel idle too long; attempting soft rejoin.")
                        .await;
                    match handle.rejoin().await {
                        Ok(()) => {
                            self.status.push_event("Soft rejoin succeeded.").await;
                        }
                        Err(e) => {
                            break anyhow::anyhow!("soft rejoin failed: {e}");
                        }
                    }
                }
                Some(()) = self.refresh_rx.recv() => {
                    match self.client.fetch_command_list().await {
                        Ok(definitions) => {
                            let n = self
                                .allow_list
                                .replace_from_definitions(&definitions)
                                .await;
                            self.status
                                .push_event(format!("Refreshed allow-list ({n} commands)."))
                                .await;
                        }
                        Err(e) => {
                            // Transient: the old allow-list stays in force.
                            tracing::warn!(error = %e, "allow-list refresh failed");
                            self.status.push_event("Allow-list refresh failed.").await;
                        }
                    }
                }
            }
        };

        // Teardown, in order: timers, tasks, session. Close is idempotent;
        // coordination state dies with this scope.
        watchdog.cancel().await;
        heartbeat_task.abort();
        listener_task.abort();
        sender_task.abort();
        sent_mirror.abort();
        handle.close().await;

        Err(failure)
    }
}

/// The `Listening` phase: collect peer presence only, for a fixed window.
/// Commands are not processed; elections are gated inside the coordination
/// context for the same window.
async fn listen_for_peers(
    events: &mut mpsc::Receiver<ChatLine>,
    coordination: &CoordinationHandle,
    window: Duration,
) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return,
            line = events.recv() => match line {
                Some(line) => {
                    if let ChannelEvent::PeerPresence { peer, .. } = classify(&line) {
                        coordination.touch(peer, Instant::now()).await;
                    }
                }
                // Stream already closed; the running phase will hit the
                // same condition and fail the session properly.
                None => return,
            },
        }
    }
}
