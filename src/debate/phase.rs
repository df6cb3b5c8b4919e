//! Debate lifecycle phases with transition validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::error::{Error, Result};

/// Why a debate ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum StopReason {
    /// The Director quit.
    ManualQuit,
    /// The configured round cap was reached.
    RoundLimitReached { rounds: u32 },
    /// An agent kept repeating itself.
    RepetitionLimitReached { agent_id: AgentId, repeats: u32 },
    /// A turn failed more times than the retry budget allows.
    GatewayExhausted { agent_id: AgentId, attempts: u32 },
    /// A collaborator failed in a way the engine cannot recover from.
    Fatal { detail: String },
}

impl StopReason {
    /// Expected endings, as opposed to failures.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            StopReason::ManualQuit
                | StopReason::RoundLimitReached { .. }
                | StopReason::RepetitionLimitReached { .. }
        )
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::ManualQuit => write!(f, "manual quit"),
            StopReason::RoundLimitReached { rounds } => {
                write!(f, "round limit reached after {} rounds", rounds)
            }
            StopReason::RepetitionLimitReached { agent_id, repeats } => {
                write!(f, "{} repeated itself {} times", agent_id, repeats)
            }
            StopReason::GatewayExhausted { agent_id, attempts } => {
                write!(f, "gateway failed {} times for {}", attempts, agent_id)
            }
            StopReason::Fatal { detail } => write!(f, "fatal: {}", detail),
        }
    }
}

/// Lifecycle phase.
///
/// ```text
/// Lobby -> Running <-> Paused
///             \          /
///              -> Stopped
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum Phase {
    /// Composing the roster; nothing has been said yet.
    #[default]
    Lobby,
    /// Turns are being scheduled.
    Running,
    /// No new turn is dispatched until resumed.
    Paused,
    /// Terminal.
    Stopped(StopReason),
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Lobby => "lobby",
            Phase::Running => "running",
            Phase::Paused => "paused",
            Phase::Stopped(_) => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Stopped(_))
    }

    /// Whether the debate has started and not yet ended.
    pub fn is_live(&self) -> bool {
        matches!(self, Phase::Running | Phase::Paused)
    }

    /// Valid transitions:
    /// - Lobby -> Running
    /// - Running -> Paused
    /// - Paused -> Running
    /// - Running | Paused -> Stopped
    pub fn can_transition(&self, target: &Phase) -> bool {
        matches!(
            (self, target),
            (Phase::Lobby, Phase::Running)
                | (Phase::Running, Phase::Paused)
                | (Phase::Paused, Phase::Running)
                | (Phase::Running, Phase::Stopped(_))
                | (Phase::Paused, Phase::Stopped(_))
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Stopped(reason) => write!(f, "stopped ({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// A record of a phase transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    pub phase: Phase,
    pub entered_at: DateTime<Utc>,
}

/// Current phase plus the ordered history of every phase entered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTracker {
    current: Phase,
    history: Vec<PhaseHistoryEntry>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            current: Phase::Lobby,
            history: vec![PhaseHistoryEntry {
                phase: Phase::Lobby,
                entered_at: Utc::now(),
            }],
        }
    }

    pub fn current(&self) -> &Phase {
        &self.current
    }

    pub fn history(&self) -> &[PhaseHistoryEntry] {
        &self.history
    }

    /// Move to `target`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, target: Phase) -> Result<()> {
        if !self.current.can_transition(&target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.current.name().to_string(),
                to: target.name().to_string(),
            });
        }
        self.history.push(PhaseHistoryEntry {
            phase: target.clone(),
            entered_at: Utc::now(),
        });
        self.current = target;
        Ok(())
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
