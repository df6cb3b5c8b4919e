//! Canonical conversation state.
//!
//! `ConversationState` is owned by the turn scheduler and never shared
//! mutably. Everything else sees `&` views or clones.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::agent::{AgentConfig, AgentId, ParamOverride};
use crate::error::{Error, Result};
use crate::intervention::Tier;

use super::message::{Message, MessageKind, Speaker};
use super::phase::{Phase, PhaseHistoryEntry, PhaseTracker};

/// Director text waiting to be folded into the next agent's context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub tier: Tier,
    pub weight: f32,
    pub text: String,
}

/// Standing Override directive, in force until a later Override replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub weight: f32,
    pub text: String,
    /// Sequence number of the director message that set it.
    pub seq: u64,
}

/// Agents, history, counters and lifecycle of one debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    topic: String,
    agents: Vec<AgentConfig>,
    history: Vec<Message>,
    rounds_completed: u32,
    max_rounds: u32,
    turn_index: usize,
    phase: PhaseTracker,
    repeat_counts: HashMap<AgentId, u32>,
    directive: Option<Directive>,
    pending_notes: Vec<Note>,
}

impl ConversationState {
    /// Validate the roster and round cap and seed the log with the topic.
    ///
    /// The state is left in the Lobby phase; the scheduler moves it on.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` for an empty roster, duplicate or invalid agent
    /// ids, an empty topic or a zero round cap.
    pub fn seeded(agents: Vec<AgentConfig>, topic: &str, max_rounds: u32) -> Result<Self> {
        if agents.is_empty() {
            return Err(Error::InvalidConfiguration(
                "cannot start a debate with 0 agents".to_string(),
            ));
        }
        if max_rounds == 0 {
            return Err(Error::InvalidConfiguration(
                "max_rounds must be positive".to_string(),
            ));
        }
        if topic.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "seed topic must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for agent in &agents {
            agent.validate()?;
            if !seen.insert(agent.id.clone()) {
                return Err(Error::InvalidConfiguration(format!(
                    "duplicate agent id '{}'",
                    agent.id
                )));
            }
        }

        let seed = Message::new(0, 0, Speaker::Director, topic.trim(), MessageKind::Seed, None);

        Ok(Self {
            topic: topic.trim().to_string(),
            agents,
            history: vec![seed],
            rounds_completed: 0,
            max_rounds,
            turn_index: 0,
            phase: PhaseTracker::new(),
            repeat_counts: HashMap::new(),
            directive: None,
            pending_notes: Vec::new(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn agents(&self) -> &[AgentConfig] {
        &self.agents
    }

    pub fn agent(&self, index: usize) -> Option<&AgentConfig> {
        self.agents.get(index)
    }

    pub fn agent_index(&self, id: &AgentId) -> Option<usize> {
        self.agents.iter().position(|a| &a.id == id)
    }

    pub fn agent_by_id(&self, id: &AgentId) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| &a.id == id)
    }

    pub fn turn_index(&self) -> usize {
        self.turn_index
    }

    pub fn rounds_completed(&self) -> u32 {
        self.rounds_completed
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    pub fn round_cap_reached(&self) -> bool {
        self.rounds_completed >= self.max_rounds
    }

    /// Round number stamped on new messages (1-based).
    pub fn current_round(&self) -> u32 {
        (self.rounds_completed + 1).min(self.max_rounds)
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn phase(&self) -> &Phase {
        self.phase.current()
    }

    pub fn phase_history(&self) -> &[PhaseHistoryEntry] {
        self.phase.history()
    }

    pub fn set_phase(&mut self, target: Phase) -> Result<()> {
        self.phase.transition(target)
    }

    /// Append a message, assigning the next sequence number.
    pub fn append(
        &mut self,
        speaker: Speaker,
        content: impl Into<String>,
        kind: MessageKind,
        params: Option<crate::agent::GenerationParams>,
    ) -> &Message {
        let seq = self.history.len() as u64;
        let round = self.current_round();
        self.history
            .push(Message::new(seq, round, speaker, content, kind, params));
        &self.history[self.history.len() - 1]
    }

    /// The last `n` messages, oldest first. The log itself is never truncated.
    pub fn context_window(&self, n: usize) -> &[Message] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    /// Move to the next slot. Returns true when the move completed a round.
    pub fn advance_turn(&mut self) -> bool {
        self.turn_index = (self.turn_index + 1) % self.agents.len();
        if self.turn_index == 0 {
            self.rounds_completed += 1;
            true
        } else {
            false
        }
    }

    pub fn repeat_count(&self, agent: &AgentId) -> u32 {
        self.repeat_counts.get(agent).copied().unwrap_or(0)
    }

    /// Update an agent's consecutive-repeat counter and return the new value.
    pub fn record_repeat(&mut self, agent: &AgentId, is_repeat: bool) -> u32 {
        let count = self.repeat_counts.entry(agent.clone()).or_insert(0);
        if is_repeat {
            *count += 1;
        } else {
            *count = 0;
        }
        *count
    }

    pub fn directive(&self) -> Option<&Directive> {
        self.directive.as_ref()
    }

    pub fn set_directive(&mut self, directive: Directive) {
        self.directive = Some(directive);
    }

    pub fn pending_notes(&self) -> &[Note] {
        &self.pending_notes
    }

    pub fn push_note(&mut self, note: Note) {
        self.pending_notes.push(note);
    }

    /// Hand the pending notes to a turn about to be dispatched.
    pub fn take_notes(&mut self) -> Vec<Note> {
        std::mem::take(&mut self.pending_notes)
    }

    /// Give notes back after a failed turn, ahead of anything newer.
    pub fn restore_notes(&mut self, mut notes: Vec<Note>) {
        notes.append(&mut self.pending_notes);
        self.pending_notes = notes;
    }

    /// Change an agent's generation parameters. Identity and order are untouched.
    pub fn override_params(&mut self, agent: &AgentId, change: &ParamOverride) -> Result<()> {
        let config = self
            .agents
            .iter_mut()
            .find(|a| &a.id == agent)
            .ok_or_else(|| Error::AgentNotFound { id: agent.clone() })?;
        let merged = config.params.merged(change);
        merged
            .validate()
            .map_err(|e| Error::InvalidIntervention(e.to_string()))?;
        config.params = merged;
        Ok(())
    }
}
