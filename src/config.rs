use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::capability::{Capability, CapabilityDescriptor, CapabilityRegistry};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_SESSIONS: usize = 64;
const DEFAULT_SESSION_IDLE_SECS: u64 = 1800;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub server_name: String,
    pub instructions: Option<String>,
    /// Template cloned into every new session before it connects.
    pub capabilities: CapabilityRegistry,
    /// `None` when `MCP_REQUEST_TIMEOUT_SECS=0`.
    pub request_timeout: Option<Duration>,
    pub max_sessions: usize,
    /// Sessions silent for longer are closed. `None` when `MCP_SESSION_IDLE_SECS=0`.
    pub session_idle_timeout: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("invalid bind address or port")]
    InvalidSocket,
    #[error("MCP_CAPABILITIES must be a capability object: {0}")]
    InvalidCapabilities(String),
    #[error("MCP_REQUEST_TIMEOUT_SECS must be a non-negative integer")]
    InvalidRequestTimeout,
    #[error("MCP_MAX_SESSIONS must be a positive integer")]
    InvalidMaxSessions,
    #[error("MCP_SESSION_IDLE_SECS must be a non-negative integer")]
    InvalidSessionIdle,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_addr = non_empty("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = non_empty("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);
        let server_name =
            non_empty("MCP_SERVER_NAME").unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        let instructions = non_empty("MCP_INSTRUCTIONS");

        let capabilities = match non_empty("MCP_CAPABILITIES") {
            Some(raw) => parse_capabilities(&raw)?,
            None => default_capabilities()?,
        };

        let request_timeout = optional_secs(
            non_empty("MCP_REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
            ConfigError::InvalidRequestTimeout,
        )?;
        let session_idle_timeout = optional_secs(
            non_empty("MCP_SESSION_IDLE_SECS"),
            DEFAULT_SESSION_IDLE_SECS,
            ConfigError::InvalidSessionIdle,
        )?;

        let max_sessions = non_empty("MCP_MAX_SESSIONS")
            .map(|value| {
                value
                    .parse::<usize>()
                    .ok()
                    .filter(|max| *max > 0)
                    .ok_or(ConfigError::InvalidMaxSessions)
            })
            .transpose()?
            .unwrap_or(DEFAULT_MAX_SESSIONS);

        let config = Self {
            bind_addr,
            bind_port,
            server_name,
            instructions,
            capabilities,
            request_timeout,
            max_sessions,
            session_idle_timeout,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

// Whole seconds; zero turns the timeout off.
fn optional_secs(
    raw: Option<String>,
    default: u64,
    invalid: ConfigError,
) -> Result<Option<Duration>, ConfigError> {
    let secs = match raw {
        Some(value) => value.parse::<u64>().map_err(|_| invalid)?,
        None => default,
    };
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

fn parse_capabilities(raw: &str) -> Result<CapabilityRegistry, ConfigError> {
    let descriptor: CapabilityDescriptor = serde_json::from_str(raw)
        .map_err(|err| ConfigError::InvalidCapabilities(err.to_string()))?;

    let mut registry = CapabilityRegistry::new();
    registry
        .declare_descriptor(descriptor)
        .map_err(|err| ConfigError::InvalidCapabilities(err.to_string()))?;
    Ok(registry)
}

pub fn default_capabilities() -> Result<CapabilityRegistry, ConfigError> {
    [
        Capability::resources(true, true),
        Capability::tools(true),
        Capability::prompts(true),
        Capability::Logging,
        Capability::Completions,
    ]
    .into_iter()
    .try_fold(CapabilityRegistry::new(), CapabilityRegistry::with)
    .map_err(|err| ConfigError::InvalidCapabilities(err.to_string()))
}
