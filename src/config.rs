use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::{GenerationParams, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::gateway::openrouter::{DEFAULT_API_KEY_ENV, DEFAULT_BASE_URL};
use crate::util::expand_tilde;
use crate::{alog_debug, Error, Result};

pub const DEFAULT_MODEL: &str = "qwen/qwen3-30b-a3b:instruct";

/// Turn-loop tuning, the `[conversation]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub rounds: u32,
    pub history_window_utts: usize,
    /// Consecutive repeats that stop the debate. 0 disables the guard.
    /// A reply is a repeat when it matches each of the agent's last
    /// `stop_on_repeat` utterances.
    pub stop_on_repeat: u32,
    pub repeat_similarity_threshold: f64,
    pub query_delay_seconds: f64,
    pub request_timeout_seconds: f64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub workers: usize,
    pub seed_topic: Option<String>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            rounds: 50,
            history_window_utts: 12,
            stop_on_repeat: 2,
            repeat_similarity_threshold: 0.88,
            query_delay_seconds: 5.0,
            request_timeout_seconds: 120.0,
            max_retries: 3,
            retry_backoff_ms: 1000,
            workers: 2,
            seed_topic: None,
        }
    }
}

/// Default generation parameters, the `[model]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl ModelConfig {
    pub fn params(&self) -> GenerationParams {
        GenerationParams::new(self.name.clone())
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRouterConfig {
    pub base_url: String,
    pub api_key_envvar: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_envvar: DEFAULT_API_KEY_ENV.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TranscriptConfig {
    /// JSONL output. Defaults to `~/.arena/debates.jsonl`.
    pub file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RolesConfig {
    /// Role library directory. Defaults to `~/.arena/roles`.
    pub dir: Option<String>,
}

/// One `[[agents]]` entry.
///
/// The system prompt comes from `system_prompt`, else `system_prompt_file`,
/// else the role library entry named by `role` (or by `id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentEntry {
    pub id: String,
    pub name: Option<String>,
    pub system_prompt: Option<String>,
    pub system_prompt_file: Option<String>,
    pub role: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl AgentEntry {
    /// Per-agent parameters layered over the `[model]` defaults.
    pub fn params(&self, defaults: &ModelConfig) -> GenerationParams {
        let mut params = defaults.params();
        if let Some(model) = &self.model {
            params.model = model.clone();
        }
        if let Some(temperature) = self.temperature {
            params.temperature = temperature;
        }
        if let Some(max_tokens) = self.max_tokens {
            params.max_tokens = max_tokens;
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub openrouter: OpenRouterConfig,
    #[serde(default)]
    pub transcript: TranscriptConfig,
    #[serde(default)]
    pub roles: RolesConfig,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

impl Config {
    pub fn arena_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".arena"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::arena_dir()?.join("arena.toml"))
    }

    pub fn transcript_path(&self) -> Result<PathBuf> {
        match &self.transcript.file {
            Some(file) => Ok(expand_tilde(file)),
            None => Ok(Self::arena_dir()?.join("debates.jsonl")),
        }
    }

    pub fn roles_dir(&self) -> Result<PathBuf> {
        match &self.roles.dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::arena_dir()?.join("roles")),
        }
    }

    /// Load the default config file, or defaults if it does not exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            alog_debug!("Config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        alog_debug!("Config::load path={}", path.display());
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        alog_debug!(
            "Config loaded: rounds={} agents={} model={}",
            config.conversation.rounds,
            config.agents.len(),
            config.model.name
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                alog_debug!("Creating config directory: {}", parent.display());
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        alog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Engine tuning derived from `[conversation]`, validated.
    pub fn engine_settings(&self) -> Result<EngineSettings> {
        let c = &self.conversation;
        let settings = EngineSettings {
            max_rounds: c.rounds,
            history_window: c.history_window_utts,
            stop_on_repeat: c.stop_on_repeat,
            repeat_threshold: c.repeat_similarity_threshold,
            query_delay: secs(c.query_delay_seconds, "query_delay_seconds")?,
            request_timeout: secs(c.request_timeout_seconds, "request_timeout_seconds")?,
            max_retries: c.max_retries,
            retry_backoff: Duration::from_millis(c.retry_backoff_ms),
            workers: c.workers,
        };
        settings.validate()?;
        Ok(settings)
    }
}

fn secs(value: f64, field: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| Error::InvalidConfiguration(format!("{} must be a non-negative number", field)))
}

/// Validated numbers the engine runs on.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub max_rounds: u32,
    /// Messages included in each request's context.
    pub history_window: usize,
    pub stop_on_repeat: u32,
    pub repeat_threshold: f64,
    /// Pause between consecutive turns. Forced re-turns skip it.
    pub query_delay: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    /// First retry delay; doubles on each further attempt.
    pub retry_backoff: Duration,
    pub workers: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let c = ConversationConfig::default();
        Self {
            max_rounds: c.rounds,
            history_window: c.history_window_utts,
            stop_on_repeat: c.stop_on_repeat,
            repeat_threshold: c.repeat_similarity_threshold,
            query_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(120),
            max_retries: c.max_retries,
            retry_backoff: Duration::from_millis(c.retry_backoff_ms),
            workers: c.workers,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfiguration(msg.to_string()));
        if self.max_rounds == 0 {
            return invalid("rounds must be positive");
        }
        if self.history_window == 0 {
            return invalid("history_window_utts must be positive");
        }
        if !(self.repeat_threshold > 0.0 && self.repeat_threshold <= 1.0) {
            return invalid("repeat_similarity_threshold must be in (0, 1]");
        }
        if self.request_timeout.is_zero() {
            return invalid("request_timeout_seconds must be positive");
        }
        if self.workers == 0 {
            return invalid("workers must be positive");
        }
        Ok(())
    }

    /// Delay before retry `attempt` (1-based): `retry_backoff * 2^(attempt-1)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.retry_backoff.saturating_mul(1u32 << exp)
    }
}
