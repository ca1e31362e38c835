//! Drains the decoded channel event stream and routes each event.
//!
//! Presence announcements feed the registry and trigger re-election;
//! candidate commands run through admission control on every peer, leader or
//! standby, so that throttling state stays identical across the fleet. Only
//! the dispatcher, downstream, knows whether this instance may act.

use std::time::Instant;

use tokio::sync::mpsc;

use onevoice_coordination::{AdmissionControl, AdmissionOutcome, CoordinationHandle};
use onevoice_dispatch::CommandDispatcher;
use onevoice_protocol::{classify, ChannelEvent, ChatLine, PeerId};

use crate::channel::SessionError;
use crate::status::{note_transition, StatusHandle};
use crate::watchdog::WatchdogHandle;

pub struct BroadcastListener {
    self_id: PeerId,
    coordination: CoordinationHandle,
    admission: AdmissionControl,
    dispatcher: CommandDispatcher,
    watchdog: WatchdogHandle,
    status: StatusHandle,
}

impl BroadcastListener {
    pub fn new(
        self_id: PeerId,
        coordination: CoordinationHandle,
        admission: AdmissionControl,
        dispatcher: CommandDispatcher,
        watchdog: WatchdogHandle,
        status: StatusHandle,
    ) -> Self {
        Self {
            self_id,
            coordination,
            admission,
            dispatcher,
            watchdog,
            status,
        }
    }

    /// Process events in delivery order until the stream closes, which is
    /// session-fatal. All per-event failures are absorbed here or below.
    pub async fn run(mut self, mut events: mpsc::Receiver<ChatLine>) -> SessionError {
        while let Some(line) = events.recv().await {
            self.watchdog.feed();
            self.handle(line).await;
        }
        SessionError::ConnectionLost("channel event stream closed".into())
    }

    async fn handle(&mut self, line: ChatLine) {
        match classify(&line) {
            ChannelEvent::PeerPresence { peer, kind } => {
                if peer != self.self_id {
                    tracing::debug!(peer = %peer.short(), ?kind, "peer presence");
                }
                if let Some(transition) = self
                    .coordination
                    .observe_presence(peer, Instant::now())
                    .await
                {
                    note_transition(&self.status, &transition).await;
                }
            }
            ChannelEvent::CandidateCommand {
                issuer,
                verb,
                args,
                ..
            } => match self.admission.check(&issuer, &verb, Instant::now()) {
                AdmissionOutcome::Accepted => {
                    if self.coordination.is_leader().await {
                        self.status
                            .record_command(format!("!{verb} {} (from {issuer})", args.join(" ")))
                            .await;
                    }
                    self.dispatcher.dispatch(issuer, verb, args).await;
                }
                AdmissionOutcome::Throttled => {
                    self.status
                        .push_event(format!("Throttled {issuer} for spamming !{verb}."))
                        .await;
                }
                AdmissionOutcome::DroppedCooldown | AdmissionOutcome::DroppedPenalty => {
                    tracing::debug!(%issuer, %verb, "command dropped by admission control");
                }
            },
            ChannelEvent::Ignorable => {}
        }
    }
}
