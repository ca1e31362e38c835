//! Inactivity watchdog: a single-owner timer rearmed on every qualifying
//! event, with idempotent cancel.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug)]
enum Msg {
    Feed,
    Cancel,
}

/// Handle to a running watchdog task.
#[derive(Debug, Clone)]
pub struct WatchdogHandle {
    tx: mpsc::Sender<Msg>,
}

impl WatchdogHandle {
    /// Push the deadline out by a full timeout. Cheap; call on every
    /// observed channel event. Dropped feeds while one is already pending
    /// are harmless.
    pub fn feed(&self) {
        let _ = self.tx.try_send(Msg::Feed);
    }

    /// Stop the watchdog. Idempotent: canceling a fired or already-canceled
    /// watchdog is a no-op, not an error.
    pub async fn cancel(&self) {
        let _ = self.tx.send(Msg::Cancel).await;
    }
}

pub struct Watchdog;

impl Watchdog {
    /// Spawn a watchdog that signals on `fired` after `timeout` of silence,
    /// then rearms itself. Consecutive fires without intervening activity
    /// arrive one full timeout apart.
    pub fn spawn(timeout: Duration) -> (WatchdogHandle, mpsc::Receiver<()>) {
        let (tx, mut rx) = mpsc::channel(32);
        let (fired_tx, fired_rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut deadline = Instant::now() + timeout;
            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(Msg::Feed) => deadline = Instant::now() + timeout,
                        Some(Msg::Cancel) | None => return,
                    },
                    _ = tokio::time::sleep_until(deadline) => {
                        // Full fired buffer means the owner has not handled
                        // the previous fire yet; dropping this one is fine.
                        let _ = fired_tx.try_send(());
                        deadline = Instant::now() + timeout;
                    }
                }
            }
        });

        (WatchdogHandle { tx }, fired_rx)
    }
}
