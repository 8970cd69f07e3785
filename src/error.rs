//! Error taxonomy shared by the configuration store and the lifecycle manager.

use crate::config::schema::SchemaError;
use crate::engine::EngineError;
use crate::vault::VaultError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Missing or contradictory settings. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Login or token lookup failed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("{0} not initialized")]
    NotInitialized(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The document failed the structural schema. Nothing was written.
    #[error("Invalid configuration: {0}")]
    Validation(#[from] SchemaError),

    /// Initialize, start or stop of the engine failed.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Vault error: {0}")]
    Backend(#[from] VaultError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<EngineError> for AgentError {
    fn from(err: EngineError) -> Self {
        AgentError::Lifecycle(err.to_string())
    }
}

impl AgentError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AgentError::NotFound(_))
    }
}
