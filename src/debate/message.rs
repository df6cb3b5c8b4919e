//! Conversation log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, GenerationParams, DIRECTOR_ID};
use crate::intervention::Tier;

/// Who produced a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Agent(AgentId),
    Director,
}

impl Speaker {
    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            Speaker::Agent(id) => Some(id),
            Speaker::Director => None,
        }
    }

    /// Wire id: the agent id, or the reserved `director` id.
    pub fn id_str(&self) -> &str {
        match self {
            Speaker::Agent(id) => id.as_str(),
            Speaker::Director => DIRECTOR_ID,
        }
    }
}

/// What a message represents in the debate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum MessageKind {
    /// Synthetic opening message carrying the topic.
    Seed,
    /// An agent's turn contribution.
    Turn,
    /// Director input.
    Intervention { tier: Tier, weight: f32 },
}

/// One immutable entry of the conversation log.
///
/// `seq` equals the message's position in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub round: u32,
    pub speaker: Speaker,
    pub content: String,
    pub kind: MessageKind,
    pub params: Option<GenerationParams>,
}

impl Message {
    pub fn new(
        seq: u64,
        round: u32,
        speaker: Speaker,
        content: impl Into<String>,
        kind: MessageKind,
        params: Option<GenerationParams>,
    ) -> Self {
        Self {
            seq,
            timestamp: Utc::now(),
            round,
            speaker,
            content: content.into(),
            kind,
            params,
        }
    }

    pub fn is_director(&self) -> bool {
        matches!(self.speaker, Speaker::Director)
    }
}
