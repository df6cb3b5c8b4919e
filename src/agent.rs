//! Debate participants.
//!
//! An agent is a flat configuration record: identity, generation parameters
//! and a handle to its system prompt. Personas differ only in data.

use serde::{Deserialize, Serialize};

/// Reserved speaker id for Director-authored messages.
pub const DIRECTOR_ID: &str = "director";

/// Default sampling temperature when neither the agent nor the config sets one.
pub const DEFAULT_TEMPERATURE: f32 = 0.6;

/// Default completion length cap in tokens.
pub const DEFAULT_MAX_TOKENS: u32 = 512;

/// Stable identifier of an agent within a debate roster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id collides with the reserved director id.
    pub fn is_reserved(&self) -> bool {
        self.0.eq_ignore_ascii_case(DIRECTOR_ID)
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Opaque reference to a system prompt, resolved by a [`crate::roles::PromptSource`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptHandle(String);

impl PromptHandle {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn key(&self) -> &str {
        &self.0
    }
}

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationParams {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Apply a partial override, returning the merged parameters.
    pub fn merged(&self, over: &ParamOverride) -> Self {
        Self {
            model: over.model.clone().unwrap_or_else(|| self.model.clone()),
            temperature: over.temperature.unwrap_or(self.temperature),
            max_tokens: over.max_tokens.unwrap_or(self.max_tokens),
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(crate::Error::InvalidConfiguration(format!(
                "temperature {} outside 0.0..=2.0",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "max_tokens must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial generation-parameter change carried by an Override intervention.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamOverride {
    pub agent_id: Option<AgentId>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ParamOverride {
    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.temperature.is_none() && self.max_tokens.is_none()
    }
}

/// A configured persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: AgentId,
    pub name: String,
    pub prompt: PromptHandle,
    pub params: GenerationParams,
}

impl AgentConfig {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        prompt: PromptHandle,
        params: GenerationParams,
    ) -> Self {
        Self {
            id: AgentId::new(id),
            name: name.into(),
            prompt,
            params,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(crate::Error::InvalidConfiguration(
                "agent id must not be empty".to_string(),
            ));
        }
        if self.id.is_reserved() {
            return Err(crate::Error::InvalidConfiguration(format!(
                "agent id '{}' is reserved",
                self.id
            )));
        }
        self.params.validate()
    }
}
