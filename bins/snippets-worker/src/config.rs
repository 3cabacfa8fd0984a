// Worker startup settings read from the environment
use anyhow::{bail, Context, Result};
use std::str::FromStr;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_ACK_MARKER: &str = "repeat";

/// Which sandbox runtime executes snippets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeKind {
    #[default]
    Docker,
    Process,
}

impl FromStr for RuntimeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(RuntimeKind::Docker),
            "process" => Ok(RuntimeKind::Process),
            other => bail!("Invalid runtime '{}', valid options: docker, process", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub runtime: RuntimeKind,
    /// Our own actor identity; acknowledgements from it never trigger re-runs
    pub bot_id: String,
    pub ack_marker: String,
    /// Overrides the token from the service config file
    pub token: Option<String>,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let runtime = match get("SNIPPETS_RUNTIME") {
            Some(raw) => raw.parse::<RuntimeKind>().context("Failed to parse SNIPPETS_RUNTIME")?,
            None => RuntimeKind::default(),
        };

        let bot_id = get("SNIPPETS_BOT_ID")
            .context("SNIPPETS_BOT_ID must be set to the service's own user id")?;

        Ok(Self {
            redis_url: get("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            runtime,
            bot_id,
            ack_marker: get("SNIPPETS_ACK_MARKER").unwrap_or_else(|| DEFAULT_ACK_MARKER.to_string()),
            token: get("SNIPPETS_TOKEN"),
        })
    }
}
