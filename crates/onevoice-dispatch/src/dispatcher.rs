//! Leader-gated command execution over a bounded worker pool.

use std::sync::Arc;

use tokio::sync::Semaphore;

use onevoice_coordination::CoordinationHandle;

use crate::commands::{AllowList, CommandClient};
use crate::outbound::OutboundQueue;

/// Verb answered from the definition-string fetch instead of the execution
/// endpoint.
pub const COMMANDS_META_VERB: &str = "commands";

/// Takes admitted candidate commands, applies the leadership and allow-list
/// gates, and executes survivors on worker tasks bounded by a semaphore.
///
/// Standbys keep running admission control upstream of this dispatcher so
/// their throttling state stays warm, but everything they feed in here is
/// dropped at the leadership gate without side effects.
pub struct CommandDispatcher {
    coordination: CoordinationHandle,
    allow_list: Arc<AllowList>,
    client: Arc<CommandClient>,
    outbound: OutboundQueue,
    workers: Arc<Semaphore>,
}

impl CommandDispatcher {
    pub fn new(
        coordination: CoordinationHandle,
        allow_list: Arc<AllowList>,
        client: Arc<CommandClient>,
        outbound: OutboundQueue,
        max_workers: usize,
    ) -> Self {
        Self {
            coordination,
            allow_list,
            client,
            outbound,
            workers: Arc::new(Semaphore::new(max_workers)),
        }
    }

    /// Dispatch one admitted command. Never blocks on the worker pool and
    /// never returns an error: per-command failures are absorbed by the
    /// worker, which answers the issuer with an apology instead.
    pub async fn dispatch(&self, issuer: String, verb: String, args: Vec<String>) {
        if !self.coordination.is_leader().await {
            tracing::debug!(%issuer, %verb, "standby; dropping command");
            return;
        }

        if !self.allow_list.contains(&verb).await {
            tracing::debug!(%issuer, %verb, "verb not in allow-list; dropping");
            return;
        }

        tracing::info!(%issuer, %verb, ?args, "leader accepted command");

        let workers = Arc::clone(&self.workers);
        let client = Arc::clone(&self.client);
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            // Queue behind the pool rather than stalling the caller; the
            // permit bounds how many external calls run at once.
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            if verb == COMMANDS_META_VERB {
                run_commands_listing(&client, &outbound, &issuer).await;
            } else {
                run_command(&client, &outbound, &issuer, &verb, &args).await;
            }
        });
    }
}

async fn run_command(
    client: &CommandClient,
    outbound: &OutboundQueue,
    issuer: &str,
    verb: &str,
    args: &[String],
) {
    match client.execute(verb, issuer, args).await {
        Ok(Some(reply)) => outbound.enqueue(&reply).await,
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, issuer, verb, "command execution failed");
            outbound
                .enqueue(&format!(
                    "@{issuer} Sorry, the command server seems to be down."
                ))
                .await;
        }
    }
}

async fn run_commands_listing(client: &CommandClient, outbound: &OutboundQueue, issuer: &str) {
    outbound
        .enqueue(&format!("@{issuer} Fetching command list from server..."))
        .await;
    match client.fetch_command_list().await {
        Ok(definitions) => {
            outbound.enqueue("--- Available Commands ---").await;
            for definition in &definitions {
                outbound.enqueue(definition).await;
            }
            outbound.enqueue("--------------------------").await;
        }
        Err(e) => {
            tracing::error!(error = %e, issuer, "command list fetch failed");
            outbound
                .enqueue(&format!(
                    "@{issuer} Sorry, couldn't fetch the command list."
                ))
                .await;
        }
    }
}
