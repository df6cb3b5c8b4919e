//! Turn scheduler: the debate state machine.
//!
//! The scheduler is synchronous and owns the [`ConversationState`]. Every
//! operation mutates state and returns the [`Effect`]s the runtime must carry
//! out (dispatch a request, persist a message, publish an event, arm the
//! dispatch timer). It never awaits, so it can be driven step by step in
//! tests without a runtime.
//!
//! # Request epochs
//!
//! Each dispatch gets a fresh epoch. A result is applied only if its epoch is
//! the one outstanding; anything else (a request orphaned by `stop`, a
//! duplicate delivery) is dropped.
//!
//! # Forced re-turns
//!
//! An Override intervention names an agent to re-query immediately. If a
//! request is in flight it completes and is committed first, then the forced
//! turn follows. A forced turn for the agent whose slot it is consumes that
//! slot; a forced turn for anyone else is an extra turn and leaves the
//! rotation where it was.

use std::time::Duration;

use crate::agent::{AgentConfig, AgentId, GenerationParams, PromptHandle};
use crate::config::EngineSettings;
use crate::debate::{
    ConversationState, Directive, Message, MessageKind, Note, Phase, Speaker, StopReason,
};
use crate::error::{Error, Result};
use crate::gateway::{ContextMessage, GatewayError};
use crate::intervention::{self, InterventionEvent, Tier, Timing};
use crate::repetition;
use crate::{alog, alog_debug, alog_warn};

use super::events::{EngineEvent, ErrorInfo};

/// A completion request the runtime should send to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub epoch: u64,
    pub agent_id: AgentId,
    pub agent_name: String,
    pub prompt: PromptHandle,
    pub context: Vec<ContextMessage>,
    pub params: GenerationParams,
    /// 1 for the first try of a turn, 2 for the first retry, and so on.
    pub attempt: u32,
    pub forced: bool,
}

/// Side effects requested by the scheduler, executed in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Dispatch(TurnRequest),
    /// Persist a committed message.
    Record(Message),
    Emit(EngineEvent),
    /// Call `advance` after this delay, replacing any earlier plan.
    Schedule(Duration),
    /// Cancel the outstanding request.
    Cancel,
}

#[derive(Debug, Clone)]
struct InFlight {
    epoch: u64,
    agent_index: usize,
    attempt: u32,
    forced: bool,
    notes: Vec<Note>,
}

pub struct TurnScheduler {
    settings: EngineSettings,
    state: Option<ConversationState>,
    epoch: u64,
    in_flight: Option<InFlight>,
    /// Agent index owed a forced re-turn.
    forced: Option<usize>,
    /// Failed attempts of the turn about to be dispatched.
    failures: u32,
}

impl TurnScheduler {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            state: None,
            epoch: 0,
            in_flight: None,
            forced: None,
            failures: 0,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn state(&self) -> Option<&ConversationState> {
        self.state.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.state
            .as_ref()
            .map(|s| s.phase().clone())
            .unwrap_or_default()
    }

    pub fn history(&self) -> &[Message] {
        self.state.as_ref().map(|s| s.history()).unwrap_or(&[])
    }

    pub fn is_awaiting(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn outstanding_epoch(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|f| f.epoch)
    }

    pub fn forced_pending(&self) -> Option<&AgentId> {
        let state = self.state.as_ref()?;
        self.forced.and_then(|i| state.agent(i)).map(|a| &a.id)
    }

    /// Display name for a speaker, `Director` for the director.
    pub fn speaker_name(&self, speaker: &Speaker) -> String {
        match speaker {
            Speaker::Director => "Director".to_string(),
            Speaker::Agent(id) => self
                .state
                .as_ref()
                .and_then(|s| s.agent_by_id(id))
                .map(|a| a.name.clone())
                .unwrap_or_else(|| id.to_string()),
        }
    }

    /// Seed the conversation and enter Running.
    pub fn start(
        &mut self,
        agents: Vec<AgentConfig>,
        seed_topic: &str,
        max_rounds: u32,
    ) -> Result<Vec<Effect>> {
        if let Some(state) = &self.state {
            return Err(Error::InvalidPhaseTransition {
                from: state.phase().name().to_string(),
                to: Phase::Running.name().to_string(),
            });
        }
        let mut state = ConversationState::seeded(agents, seed_topic, max_rounds)?;
        state.set_phase(Phase::Running)?;
        alog!(
            "Debate started: {} agents, {} rounds, topic={:?}",
            state.agents().len(),
            max_rounds,
            crate::util::preview(state.topic(), 60)
        );
        let seed = state.history()[0].clone();
        self.state = Some(state);

        Ok(vec![
            Effect::Record(seed),
            Effect::Emit(EngineEvent::StateChanged(Phase::Running)),
            Effect::Schedule(Duration::ZERO),
        ])
    }

    /// Dispatch the next turn if the debate is Running and idle.
    pub fn advance(&mut self) -> Result<Vec<Effect>> {
        let state = self.state.as_mut().ok_or(Error::NotStarted)?;
        match state.phase() {
            Phase::Stopped(reason) => {
                return Err(Error::DebateStopped {
                    reason: reason.clone(),
                })
            }
            Phase::Paused => {
                alog_debug!("advance: paused, nothing dispatched");
                return Ok(Vec::new());
            }
            Phase::Lobby => return Err(Error::NotStarted),
            Phase::Running => {}
        }
        if self.in_flight.is_some() {
            alog_debug!("advance: request outstanding, nothing dispatched");
            return Ok(Vec::new());
        }

        let forced = self.forced.take();
        let agent_index = forced.unwrap_or(state.turn_index());
        let agent = state.agents()[agent_index].clone();
        let notes = state.take_notes();
        let context = build_context(state, &agent, &notes, self.settings.history_window);

        self.epoch += 1;
        let attempt = self.failures + 1;
        self.in_flight = Some(InFlight {
            epoch: self.epoch,
            agent_index,
            attempt,
            forced: forced.is_some(),
            notes,
        });

        alog_debug!(
            "Dispatch epoch={} agent={} attempt={} forced={} context={}",
            self.epoch,
            agent.id,
            attempt,
            forced.is_some(),
            context.len()
        );

        Ok(vec![
            Effect::Emit(EngineEvent::TurnStarted {
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                attempt,
                forced: forced.is_some(),
            }),
            Effect::Dispatch(TurnRequest {
                epoch: self.epoch,
                agent_id: agent.id,
                agent_name: agent.name,
                prompt: agent.prompt,
                context,
                params: agent.params,
                attempt,
                forced: forced.is_some(),
            }),
        ])
    }

    /// Apply the result of request `epoch`.
    pub fn complete(
        &mut self,
        epoch: u64,
        result: std::result::Result<String, GatewayError>,
    ) -> Vec<Effect> {
        let Some(state) = self.state.as_ref() else {
            alog_warn!("complete: epoch={} before start, discarded", epoch);
            return Vec::new();
        };
        if state.phase().is_terminal() {
            alog_debug!("complete: epoch={} after stop, discarded", epoch);
            return Vec::new();
        }
        match &self.in_flight {
            Some(f) if f.epoch == epoch => {}
            _ => {
                alog_debug!(
                    "complete: stale epoch={} (outstanding {:?}), discarded",
                    epoch,
                    self.outstanding_epoch()
                );
                return Vec::new();
            }
        }
        let Some(flight) = self.in_flight.take() else {
            return Vec::new();
        };

        match result {
            Ok(text) => self.commit(flight, text),
            Err(e) => self.fail(flight, e),
        }
    }

    fn commit(&mut self, flight: InFlight, text: String) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(state) = self.state.as_mut() else {
            return effects;
        };
        let agent = state.agents()[flight.agent_index].clone();
        self.failures = 0;

        let is_repeat = self.settings.stop_on_repeat > 0
            && repetition::check(
                state.history(),
                &agent.id,
                &text,
                self.settings.stop_on_repeat as usize,
                self.settings.repeat_threshold,
            );
        let message = state
            .append(
                Speaker::Agent(agent.id.clone()),
                text,
                MessageKind::Turn,
                Some(agent.params.clone()),
            )
            .clone();
        let repeats = state.record_repeat(&agent.id, is_repeat);

        alog!(
            "Turn committed seq={} round={} agent={} repeat={}",
            message.seq,
            message.round,
            agent.id,
            repeats
        );
        effects.push(Effect::Record(message.clone()));
        effects.push(Effect::Emit(EngineEvent::TurnCompleted(message)));

        if self.settings.stop_on_repeat > 0 && repeats >= self.settings.stop_on_repeat {
            self.halt(
                StopReason::RepetitionLimitReached {
                    agent_id: agent.id,
                    repeats,
                },
                &mut effects,
            );
            return effects;
        }

        // A forced turn consumes the slot only if the slot is its own; a
        // normal turn holds its slot while a re-turn for it is owed.
        let advance = if flight.forced {
            flight.agent_index == state.turn_index()
        } else {
            self.forced != Some(state.turn_index())
        };
        if advance {
            state.advance_turn();
        }
        // An owed re-turn is still dispatched after the final round closes.
        if self.forced.is_none() && state.round_cap_reached() {
            let rounds = state.rounds_completed();
            self.halt(StopReason::RoundLimitReached { rounds }, &mut effects);
            return effects;
        }

        let delay = if self.forced.is_some() {
            Duration::ZERO
        } else {
            self.settings.query_delay
        };
        effects.push(Effect::Schedule(delay));
        effects
    }

    fn fail(&mut self, flight: InFlight, error: GatewayError) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(state) = self.state.as_mut() else {
            return effects;
        };
        let agent_id = state.agents()[flight.agent_index].id.clone();
        state.restore_notes(flight.notes);
        if flight.forced && self.forced.is_none() {
            self.forced = Some(flight.agent_index);
        }
        self.failures = flight.attempt;

        let retry = flight.attempt <= self.settings.max_retries;
        let info = ErrorInfo {
            kind: error.kind().to_string(),
            detail: error.to_string(),
            phase: state.phase().name().to_string(),
            agent_id: Some(agent_id.clone()),
            action: format!("complete turn (attempt {})", flight.attempt),
            recoverable: retry,
        };
        effects.push(Effect::Emit(EngineEvent::Error(info)));

        if retry {
            let backoff = self.settings.backoff_for(flight.attempt);
            alog_warn!(
                "Turn failed agent={} attempt={}: {}; retrying in {:?}",
                agent_id,
                flight.attempt,
                error,
                backoff
            );
            effects.push(Effect::Schedule(backoff));
        } else {
            alog_warn!(
                "Turn failed agent={} attempt={}: {}; retries exhausted",
                agent_id,
                flight.attempt,
                error
            );
            self.halt(
                StopReason::GatewayExhausted {
                    agent_id,
                    attempts: flight.attempt,
                },
                &mut effects,
            );
        }
        effects
    }

    /// Gate new dispatches. The outstanding request, if any, carries on.
    pub fn pause(&mut self) -> Result<Vec<Effect>> {
        let state = self.live_state_mut()?;
        if state.phase() == &Phase::Paused {
            return Ok(Vec::new());
        }
        state.set_phase(Phase::Paused)?;
        alog!("Debate paused");
        Ok(vec![Effect::Emit(EngineEvent::StateChanged(Phase::Paused))])
    }

    pub fn resume(&mut self) -> Result<Vec<Effect>> {
        let awaiting = self.in_flight.is_some();
        let state = self.live_state_mut()?;
        if state.phase() != &Phase::Paused {
            return Ok(Vec::new());
        }
        state.set_phase(Phase::Running)?;
        alog!("Debate resumed");
        let mut effects = vec![Effect::Emit(EngineEvent::StateChanged(Phase::Running))];
        if !awaiting {
            effects.push(Effect::Schedule(Duration::ZERO));
        }
        Ok(effects)
    }

    /// Apply a Director intervention. Nothing changes if it is rejected.
    pub fn inject(&mut self, event: InterventionEvent) -> Result<Vec<Effect>> {
        let in_flight_index = self.in_flight.as_ref().map(|f| f.agent_index);
        let forced = self.forced;
        let state = self.live_state_mut()?;

        // Re-validate: events can be built by hand.
        let tier = intervention::classify(event.weight)?;
        if tier != event.tier {
            return Err(Error::InvalidIntervention(format!(
                "weight {} is {} not {}",
                event.weight, tier, event.tier
            )));
        }
        if event.text.trim().is_empty() {
            return Err(Error::InvalidIntervention(
                "intervention text is empty".to_string(),
            ));
        }
        if event.params.is_some() && tier != Tier::Override {
            return Err(Error::InvalidIntervention(format!(
                "{} interventions cannot change generation parameters",
                tier
            )));
        }
        if matches!(event.timing, Timing::ForceReturn { .. }) && tier != Tier::Override {
            return Err(Error::InvalidIntervention(format!(
                "{} interventions cannot force a re-turn",
                tier
            )));
        }

        let target = match &event.timing {
            Timing::ForceReturn { agent: Some(id) } => Some(state.agent_index(id).ok_or_else(
                || Error::InvalidIntervention(format!("unknown target agent '{}'", id)),
            )?),
            Timing::ForceReturn { agent: None } => {
                Some(in_flight_index.or(forced).unwrap_or(state.turn_index()))
            }
            Timing::BeforeNextTurn => None,
        };
        if tier == Tier::Override && target.is_none() {
            return Err(Error::InvalidIntervention(
                "override interventions must force a re-turn".to_string(),
            ));
        }

        if let (Some(change), Some(target)) = (&event.params, target) {
            let agent_id = match &change.agent_id {
                Some(id) => id.clone(),
                None => state.agents()[target].id.clone(),
            };
            if state.agent_index(&agent_id).is_none() {
                return Err(Error::InvalidIntervention(format!(
                    "unknown target agent '{}'",
                    agent_id
                )));
            }
            state.override_params(&agent_id, change)?;
            alog_debug!("Override params applied to {}", agent_id);
        }

        let message = state
            .append(
                Speaker::Director,
                event.text.clone(),
                MessageKind::Intervention {
                    tier,
                    weight: event.weight,
                },
                None,
            )
            .clone();
        alog!(
            "Intervention seq={} tier={} weight={:.2}",
            message.seq,
            tier,
            event.weight
        );
        let mut effects = vec![
            Effect::Record(message.clone()),
            Effect::Emit(EngineEvent::Intervened(message.clone())),
        ];

        match tier {
            Tier::Subtle | Tier::Mandatory => state.push_note(Note {
                tier,
                weight: event.weight,
                text: event.text,
            }),
            Tier::Override => {
                state.set_directive(Directive {
                    weight: event.weight,
                    text: event.text,
                    seq: message.seq,
                });
                let running = state.phase() == &Phase::Running;
                self.forced = target;
                if in_flight_index.is_none() {
                    self.failures = 0;
                    if running {
                        effects.push(Effect::Schedule(Duration::ZERO));
                    }
                }
            }
        }
        Ok(effects)
    }

    /// End the debate. Any outstanding result will be discarded.
    pub fn stop(&mut self, reason: StopReason) -> Result<Vec<Effect>> {
        let state = self.state.as_ref().ok_or(Error::NotStarted)?;
        if state.phase().is_terminal() {
            return Ok(Vec::new());
        }
        let mut effects = Vec::new();
        self.halt(reason, &mut effects);
        Ok(effects)
    }

    fn halt(&mut self, reason: StopReason, effects: &mut Vec<Effect>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if let Err(e) = state.set_phase(Phase::Stopped(reason.clone())) {
            alog_warn!("halt: {}", e);
            return;
        }
        self.epoch += 1;
        if let Some(flight) = self.in_flight.take() {
            state.restore_notes(flight.notes);
            effects.push(Effect::Cancel);
        }
        self.forced = None;
        alog!("Debate stopped: {}", reason);
        effects.push(Effect::Emit(EngineEvent::StateChanged(Phase::Stopped(
            reason.clone(),
        ))));
        effects.push(Effect::Emit(EngineEvent::Stopped(reason)));
    }

    fn live_state_mut(&mut self) -> Result<&mut ConversationState> {
        let state = self.state.as_mut().ok_or(Error::NotStarted)?;
        if let Phase::Stopped(reason) = state.phase() {
            return Err(Error::DebateStopped {
                reason: reason.clone(),
            });
        }
        Ok(state)
    }
}

/// Build the context for `agent`'s turn.
///
/// The bounded history window comes first: the agent's own messages as
/// assistant turns, everyone else's as `Name: text` user turns. Director
/// interventions are not replayed verbatim; they reach the agent through the
/// standing directive and the pending notes, which follow the window. A
/// closing user turn restates the topic and hands over the floor.
pub fn build_context(
    state: &ConversationState,
    agent: &AgentConfig,
    notes: &[Note],
    window: usize,
) -> Vec<ContextMessage> {
    let mut context = Vec::new();

    for message in state.context_window(window) {
        match (&message.speaker, message.kind) {
            (Speaker::Agent(id), _) if id == &agent.id => {
                context.push(ContextMessage::assistant(message.content.clone()));
            }
            (Speaker::Agent(id), _) => {
                let name = state
                    .agent_by_id(id)
                    .map(|a| a.name.as_str())
                    .unwrap_or(id.as_str());
                context.push(ContextMessage::user(format!("{}: {}", name, message.content)));
            }
            (Speaker::Director, _) => {}
        }
    }

    if let Some(directive) = state.directive() {
        context.push(ContextMessage::system(intervention::render(
            Tier::Override,
            directive.weight,
            &directive.text,
        )));
    }
    for note in notes {
        context.push(ContextMessage::system(intervention::render(
            note.tier,
            note.weight,
            &note.text,
        )));
    }

    let opened = state
        .history()
        .iter()
        .any(|m| matches!(m.speaker, Speaker::Agent(_)));
    let instruction = if opened {
        format!(
            "The debate topic is: {}\n\nIt is now your turn. Respond as {}. \
             Keep it concise (under 200 words). React to the previous speaker.",
            state.topic(),
            agent.name
        )
    } else {
        format!(
            "The debate topic is: {}\n\nYou are {}. Open the debate on this topic. \
             Keep it concise (under 200 words).",
            state.topic(),
            agent.name
        )
    };
    context.push(ContextMessage::user(instruction));
    context
}
