//! Roster composition before a debate starts.
//!
//! The [`Lobby`] is the only place agents can be added, removed, edited or
//! reordered. [`Lobby::finish`] consumes it, so the roster handed to the
//! engine cannot change shape afterwards.

use std::fs;

use crate::agent::{AgentConfig, AgentId, GenerationParams, PromptHandle};
use crate::config::Config;
use crate::roles::{default_system_prompt, InlinePrompts, RoleLibrary};
use crate::util::expand_tilde;
use crate::{alog_debug, Error, Result};

/// Everything the engine needs to start: roster, topic and prompts.
#[derive(Debug, Clone)]
pub struct Roster {
    pub agents: Vec<AgentConfig>,
    pub topic: String,
    pub prompts: InlinePrompts,
}

#[derive(Debug, Clone, Default)]
pub struct Lobby {
    topic: Option<String>,
    agents: Vec<AgentConfig>,
    prompts: InlinePrompts,
}

impl Lobby {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_topic(&mut self, topic: impl Into<String>) {
        self.topic = Some(topic.into());
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn agents(&self) -> &[AgentConfig] {
        &self.agents
    }

    pub fn prompts(&self) -> &InlinePrompts {
        &self.prompts
    }

    /// Add an agent. A taken id gets a `_1`, `_2`, ... suffix; the id actually
    /// used is returned.
    pub fn add(
        &mut self,
        id: &str,
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        params: GenerationParams,
    ) -> Result<AgentId> {
        let id = self.unique_id(id);
        let config = AgentConfig::new(id.as_str(), name, PromptHandle::new(id.as_str()), params);
        config.validate()?;
        self.prompts.insert(id.as_str(), system_prompt);
        alog_debug!("Lobby::add id={} name={}", config.id, config.name);
        self.agents.push(config);
        Ok(id)
    }

    /// Add an agent from the role library.
    pub fn add_role(
        &mut self,
        library: &RoleLibrary,
        role_id: &str,
        params: GenerationParams,
    ) -> Result<AgentId> {
        let role = library.load(role_id)?;
        self.add(&role.id, role.name, role.system_prompt, params)
    }

    pub fn remove(&mut self, id: &AgentId) -> Result<AgentConfig> {
        let index = self.index_of(id)?;
        let removed = self.agents.remove(index);
        self.prompts.remove(removed.prompt.key());
        alog_debug!("Lobby::remove id={}", id);
        Ok(removed)
    }

    pub fn rename(&mut self, id: &AgentId, name: impl Into<String>) -> Result<()> {
        let index = self.index_of(id)?;
        self.agents[index].name = name.into();
        Ok(())
    }

    pub fn set_params(&mut self, id: &AgentId, params: GenerationParams) -> Result<()> {
        params.validate()?;
        let index = self.index_of(id)?;
        self.agents[index].params = params;
        Ok(())
    }

    pub fn set_prompt(&mut self, id: &AgentId, system_prompt: impl Into<String>) -> Result<()> {
        let index = self.index_of(id)?;
        let key = self.agents[index].prompt.key().to_string();
        self.prompts.insert(key, system_prompt);
        Ok(())
    }

    /// Move an agent to `position` in the turn order (clamped to the end).
    pub fn move_to(&mut self, id: &AgentId, position: usize) -> Result<()> {
        let index = self.index_of(id)?;
        let agent = self.agents.remove(index);
        let position = position.min(self.agents.len());
        self.agents.insert(position, agent);
        Ok(())
    }

    /// Consume the lobby. Requires a topic and at least one agent.
    pub fn finish(self) -> Result<Roster> {
        let topic = self
            .topic
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::InvalidConfiguration("a debate topic is required".to_string()))?;
        if self.agents.is_empty() {
            return Err(Error::InvalidConfiguration(
                "cannot start a debate with 0 agents".to_string(),
            ));
        }
        Ok(Roster {
            agents: self.agents,
            topic,
            prompts: self.prompts,
        })
    }

    /// Build a lobby from `[[agents]]` and `seed_topic`, resolving prompts
    /// against `library`.
    pub fn from_config(config: &Config, library: &RoleLibrary) -> Result<Self> {
        let mut lobby = Self::new();
        if let Some(topic) = &config.conversation.seed_topic {
            lobby.set_topic(topic.clone());
        }
        for entry in &config.agents {
            let params = entry.params(&config.model);
            let (name, prompt) = if let Some(prompt) = &entry.system_prompt {
                (entry.name.clone(), prompt.clone())
            } else if let Some(file) = &entry.system_prompt_file {
                let prompt = fs::read_to_string(expand_tilde(file))?;
                (entry.name.clone(), prompt.trim().to_string())
            } else {
                let role_id = entry.role.as_deref().unwrap_or(&entry.id);
                match library.load(role_id) {
                    Ok(role) => (entry.name.clone().or(Some(role.name)), role.system_prompt),
                    Err(Error::RoleNotFound(_)) if entry.role.is_none() => {
                        let name = entry.name.clone().unwrap_or_else(|| entry.id.clone());
                        let prompt = default_system_prompt(&name);
                        (Some(name), prompt)
                    }
                    Err(e) => return Err(e),
                }
            };
            let name = name.unwrap_or_else(|| entry.id.clone());
            lobby.add(&entry.id, name, prompt, params)?;
        }
        Ok(lobby)
    }

    fn index_of(&self, id: &AgentId) -> Result<usize> {
        self.agents
            .iter()
            .position(|a| &a.id == id)
            .ok_or_else(|| Error::AgentNotFound { id: id.clone() })
    }

    fn unique_id(&self, base: &str) -> AgentId {
        let taken = |candidate: &str| self.agents.iter().any(|a| a.id.as_str() == candidate);
        if !taken(base) {
            return AgentId::new(base);
        }
        let mut counter = 1;
        loop {
            let candidate = format!("{}_{}", base, counter);
            if !taken(&candidate) {
                return AgentId::new(candidate);
            }
            counter += 1;
        }
    }
}
