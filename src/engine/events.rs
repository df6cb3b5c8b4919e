//! Events the engine publishes to its front-end.

use serde::Serialize;

use crate::agent::AgentId;
use crate::debate::{Message, Phase, StopReason};

/// Context attached to every error event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorInfo {
    /// Short machine-friendly kind, e.g. `gateway_timeout`, `sink_write`.
    pub kind: String,
    pub detail: String,
    /// Phase the engine was in when the error happened.
    pub phase: String,
    pub agent_id: Option<AgentId>,
    /// What the engine was trying to do.
    pub action: String,
    /// Whether the engine carries on.
    pub recoverable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum EngineEvent {
    TurnStarted {
        agent_id: AgentId,
        agent_name: String,
        attempt: u32,
        forced: bool,
    },
    TurnCompleted(Message),
    Intervened(Message),
    StateChanged(Phase),
    Stopped(StopReason),
    Error(ErrorInfo),
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::TurnStarted { .. } => "turn_started",
            EngineEvent::TurnCompleted(_) => "turn_completed",
            EngineEvent::Intervened(_) => "intervened",
            EngineEvent::StateChanged(_) => "state_changed",
            EngineEvent::Stopped(_) => "stopped",
            EngineEvent::Error(_) => "error",
        }
    }
}
