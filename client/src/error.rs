//! Unified error handling for the SDK.

use crate::config::ConfigError;

/// SDK error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] supportive_engine::Error),

    #[error("Not initialized: {0}")]
    NotInitialized(&'static str),

    #[error("Polling requires a Tokio runtime: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

impl ClientError {
    /// The transport error behind this error, if any.
    pub fn transport(&self) -> Option<&supportive_engine::TransportError> {
        match self {
            ClientError::Engine(supportive_engine::Error::Transport(err)) => Some(err),
            _ => None,
        }
    }
}

/// Result type alias for SDK calls.
pub type Result<T> = std::result::Result<T, ClientError>;
