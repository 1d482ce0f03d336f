use std::env;
use std::num::NonZeroUsize;

use thiserror::Error;

use crate::server::{AdmissionPolicy, ServerOptions};
use crate::transport::{Framing, MAX_MESSAGE_BYTES};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server_name: String,
    pub server_version: String,
    pub framing: Framing,
    pub max_message_bytes: usize,
    pub admission: AdmissionPolicy,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_SERVER_NAME must not be empty")]
    EmptyServerName,
    #[error("MCP_FRAMING must be \"line\" or \"header\"")]
    InvalidFraming,
    #[error("MCP_MAX_MESSAGE_BYTES must be a positive integer")]
    InvalidMaxMessageBytes,
    #[error("MCP_MAX_IN_FLIGHT must be a positive integer")]
    InvalidMaxInFlight,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let server_name = match lookup("MCP_SERVER_NAME") {
            Some(name) if name.trim().is_empty() => return Err(ConfigError::EmptyServerName),
            Some(name) => name.trim().to_string(),
            None => env!("CARGO_PKG_NAME").to_string(),
        };
        let server_version =
            value("MCP_SERVER_VERSION").unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

        let framing = value("MCP_FRAMING")
            .map(|value| value.parse::<Framing>().map_err(|_| ConfigError::InvalidFraming))
            .transpose()?
            .unwrap_or_default();

        let max_message_bytes = value("MCP_MAX_MESSAGE_BYTES")
            .map(|value| {
                value
                    .parse::<NonZeroUsize>()
                    .map(NonZeroUsize::get)
                    .map_err(|_| ConfigError::InvalidMaxMessageBytes)
            })
            .transpose()?
            .unwrap_or(MAX_MESSAGE_BYTES);

        let admission = value("MCP_MAX_IN_FLIGHT")
            .map(|value| {
                value
                    .parse::<NonZeroUsize>()
                    .map(AdmissionPolicy::Bounded)
                    .map_err(|_| ConfigError::InvalidMaxInFlight)
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            server_name,
            server_version,
            framing,
            max_message_bytes,
            admission,
        })
    }

    /// Server options carrying this configuration, with no providers wired.
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions::new(self.server_name.clone(), self.server_version.clone())
            .with_admission(self.admission)
    }
}
