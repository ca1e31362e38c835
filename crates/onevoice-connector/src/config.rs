//! Process configuration: optional TOML file plus `ONEVOICE_*` environment
//! overrides. Required settings missing is a fatal startup error, raised
//! before any run loop exists.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChannelConfig {
    /// Invite/target URL of the channel to join.
    #[serde(default)]
    pub invite_url: String,
    /// Anonymous login key. Absent means play as a guest from the start.
    #[serde(default)]
    pub login_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServiceConfig {
    /// Base URL of the command-execution service.
    #[serde(default)]
    pub base_url: String,
    /// Shared secret sent as `x-api-key` on every request.
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides,
    /// then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, anyhow::Error> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config file {}", p.display()))?;
                Self::from_toml_str(&raw)
                    .with_context(|| format!("invalid config file {}", p.display()))?
            }
            None => Config::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, anyhow::Error> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ONEVOICE_INVITE_URL") {
            self.channel.invite_url = v;
        }
        if let Ok(v) = std::env::var("ONEVOICE_LOGIN_KEY") {
            self.channel.login_key = Some(v);
        }
        if let Ok(v) = std::env::var("ONEVOICE_SERVICE_URL") {
            self.service.base_url = v;
        }
        if let Ok(v) = std::env::var("ONEVOICE_API_KEY") {
            self.service.api_key = v;
        }
        if let Ok(v) = std::env::var("ONEVOICE_STATUS_ADDR") {
            self.status.bind_addr = v;
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let mut missing = Vec::new();
        if self.channel.invite_url.is_empty() {
            missing.push("channel.invite_url (ONEVOICE_INVITE_URL)");
        }
        if self.service.base_url.is_empty() {
            missing.push("service.base_url (ONEVOICE_SERVICE_URL)");
        }
        if self.service.api_key.is_empty() {
            missing.push("service.api_key (ONEVOICE_API_KEY)");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("missing required configuration: {}", missing.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_toml_parses_and_validates() {
        let config = Config::from_toml_str(
            r#"
            [channel]
            invite_url = "https://example.test/invite/abc"
            login_key = "secret-key"

            [service]
            base_url = "https://commands.example.test"
            api_key = "hunter2"

            [status]
            bind_addr = "127.0.0.1:9090"
            "#,
        )
        .expect("parse");
        assert!(config.validate().is_ok());
        assert_eq!(config.channel.login_key.as_deref(), Some("secret-key"));
        assert_eq!(config.status.bind_addr, "127.0.0.1:9090");
    }

    #[test]
    fn test_missing_required_settings_fail_validation() {
        let config = Config::from_toml_str(
            r#"
            [channel]
            invite_url = "https://example.test/invite/abc"
            "#,
        )
        .expect("parse");
        let err = config.validate().expect_err("must fail");
        let msg = err.to_string();
        assert!(msg.contains("service.base_url"));
        assert!(msg.contains("service.api_key"));
        assert!(!msg.contains("invite_url"));
    }

    #[test]
    fn test_status_bind_addr_defaults() {
        let config = Config::from_toml_str("").expect("parse");
        assert_eq!(config.status.bind_addr, "0.0.0.0:8080");
        assert!(config.channel.login_key.is_none());
    }

    #[test]
    fn test_load_reads_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"
            [channel]
            invite_url = "https://example.test/invite/abc"
            [service]
            base_url = "https://commands.example.test"
            api_key = "hunter2"
            "#
        )
        .expect("write");
        let config = Config::load(Some(file.path())).expect("load");
        assert_eq!(config.channel.invite_url, "https://example.test/invite/abc");
    }
}
