//! HTTP client for the external command-execution service, and the
//! dynamically refreshable verb allow-list derived from it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use onevoice_protocol::constants::{COMMAND_LIST_TIMEOUT, COMMAND_SIGIL, COMMAND_TIMEOUT};

use crate::DispatchError;

#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    command: &'a str,
    username: &'a str,
    args: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    reply: Option<String>,
}

/// Client for the command-execution service. Every request carries the
/// shared secret and an explicit timeout; failures surface as recoverable
/// [`DispatchError`]s, never as a crash.
#[derive(Debug)]
pub struct CommandClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CommandClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: api_key.into(),
        }
    }

    /// `POST /command` — execute one admitted command on behalf of `issuer`.
    /// Returns the reply text for the chat, if the service produced one.
    pub async fn execute(
        &self,
        verb: &str,
        issuer: &str,
        args: &[String],
    ) -> Result<Option<String>, DispatchError> {
        let url = format!("{}/command", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .timeout(COMMAND_TIMEOUT)
            .json(&CommandRequest {
                command: verb,
                username: issuer,
                args,
            })
            .send()
            .await
            .map_err(|e| DispatchError::Service(e.to_string()))?
            .error_for_status()
            .map_err(|e| DispatchError::Service(e.to_string()))?;

        let body: CommandResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Service(e.to_string()))?;
        Ok(body.reply)
    }

    /// `GET /commands` — fetch the verb-definition strings the service
    /// currently supports.
    pub async fn fetch_command_list(&self) -> Result<Vec<String>, DispatchError> {
        let url = format!("{}/commands", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("x-api-key", &self.api_key)
            .timeout(COMMAND_LIST_TIMEOUT)
            .send()
            .await
            .map_err(|e| DispatchError::Service(e.to_string()))?
            .error_for_status()
            .map_err(|e| DispatchError::Service(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| DispatchError::Service(e.to_string()))
    }
}

/// The set of verbs the dispatcher will execute, refreshable at runtime.
#[derive(Debug, Default)]
pub struct AllowList {
    verbs: RwLock<HashSet<String>>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the verb set from the service's definition strings. Each
    /// definition starts with the sigil-prefixed verb, e.g.
    /// `"!roll <dice> - roll some dice"`. Returns the new verb count.
    pub async fn replace_from_definitions(&self, definitions: &[String]) -> usize {
        let verbs: HashSet<String> = definitions.iter().filter_map(|d| parse_verb(d)).collect();
        let count = verbs.len();
        *self.verbs.write().await = verbs;
        count
    }

    pub async fn contains(&self, verb: &str) -> bool {
        self.verbs.read().await.contains(verb)
    }

    pub async fn len(&self) -> usize {
        self.verbs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.verbs.read().await.is_empty()
    }
}

fn parse_verb(definition: &str) -> Option<String> {
    let first = definition.split_whitespace().next()?;
    let verb = first.strip_prefix(COMMAND_SIGIL).unwrap_or(first);
    if verb.is_empty() {
        return None;
    }
    Some(verb.to_lowercase())
}
