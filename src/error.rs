use thiserror::Error;

use crate::gateway::GatewayError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid intervention: {0}")]
    InvalidIntervention(String),

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Debate has not started")]
    NotStarted,

    #[error("Debate already stopped ({reason})")]
    DebateStopped { reason: crate::debate::StopReason },

    #[error("Agent not found: {id}")]
    AgentNotFound { id: crate::agent::AgentId },

    #[error("Role not found: {0}")]
    RoleNotFound(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Transcript write failed: {0}")]
    SinkWrite(String),

    #[error("Engine is no longer running")]
    EngineClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
