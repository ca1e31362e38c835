//! Periodic self-announcement and re-election tick.

use std::time::Duration;
use std::time::Instant;

use onevoice_coordination::CoordinationHandle;
use onevoice_dispatch::OutboundQueue;
use onevoice_protocol::{heartbeat_line, PeerId};

use crate::status::{note_transition, StatusHandle};

/// Announce ourselves every `interval`, then re-evaluate leadership. A
/// failed or dropped announcement is logged by the outbound path and
/// recovered by the next tick; the timeout safety factor tolerates a missed
/// beat. Runs until the task is aborted at teardown.
pub async fn run_heartbeat(
    self_id: PeerId,
    interval: Duration,
    outbound: OutboundQueue,
    coordination: CoordinationHandle,
    status: StatusHandle,
) {
    loop {
        tokio::time::sleep(interval).await;
        outbound.enqueue(&heartbeat_line(&self_id)).await;
        if let Some(transition) = coordination.evaluate(Instant::now()).await {
            note_transition(&status, &transition).await;
        }
    }
}
