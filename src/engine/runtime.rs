//! The runtime loop: single owner of the scheduler.
//!
//! One tokio task owns the [`TurnScheduler`] and is the only place
//! conversation state changes. It multiplexes three inputs with a biased
//! `select!`:
//!
//! 1. Director commands (highest priority, always drained first)
//! 2. Completion results from the worker pool
//! 3. The dispatch timer armed by `Effect::Schedule`
//!
//! Events leave over a `crossbeam_channel`, so a slow front-end never blocks
//! the loop.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentConfig, AgentId};
use crate::config::EngineSettings;
use crate::debate::{Message, Phase, PhaseHistoryEntry, StopReason};
use crate::gateway::CompletionGateway;
use crate::intervention::InterventionEvent;
use crate::roles::PromptSource;
use crate::transcript::{
    SinkWarning, TranscriptHandle, TranscriptRecord, TranscriptSink, TranscriptWriter,
    WriterReport,
};
use crate::{alog, alog_debug, alog_error, alog_warn, Error, Result};

use super::events::{EngineEvent, ErrorInfo};
use super::pool::{TurnOutcome, WorkerPool};
use super::scheduler::{Effect, TurnScheduler};

/// Director commands accepted by a running debate.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Pause,
    Resume,
    Inject(InterventionEvent),
    Quit,
}

/// How a debate ended and everything it said.
#[derive(Debug, Clone)]
pub struct DebateSummary {
    pub debate_id: Uuid,
    pub reason: StopReason,
    pub rounds_completed: u32,
    pub messages: Vec<Message>,
    /// Every phase the debate entered, starting with the lobby.
    pub phases: Vec<PhaseHistoryEntry>,
    pub transcript: WriterReport,
}

/// Cloneable sender for Director commands.
#[derive(Debug, Clone)]
pub struct Director {
    tx: mpsc::UnboundedSender<Control>,
}

impl Director {
    fn send(&self, control: Control) -> Result<()> {
        self.tx.send(control).map_err(|_| Error::EngineClosed)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Control::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Control::Resume)
    }

    /// Classify and submit an intervention. Weight and text are checked
    /// here; target and parameter checks happen in the engine and come back
    /// as error events.
    pub fn inject(&self, weight: f32, text: &str) -> Result<()> {
        let event = InterventionEvent::new(weight, text)?;
        self.send(Control::Inject(event))
    }

    pub fn inject_event(&self, event: InterventionEvent) -> Result<()> {
        self.send(Control::Inject(event))
    }

    pub fn quit(&self) -> Result<()> {
        self.send(Control::Quit)
    }
}

/// Handle to a launched debate.
pub struct DebateHandle {
    id: Uuid,
    director: Director,
    events: Receiver<EngineEvent>,
    join: JoinHandle<Result<DebateSummary>>,
}

impl DebateHandle {
    /// Identifies this debate in logs and in its summary.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn director(&self) -> Director {
        self.director.clone()
    }

    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    pub fn pause(&self) -> Result<()> {
        self.director.pause()
    }

    pub fn resume(&self) -> Result<()> {
        self.director.resume()
    }

    pub fn inject(&self, weight: f32, text: &str) -> Result<()> {
        self.director.inject(weight, text)
    }

    pub fn quit(&self) -> Result<()> {
        self.director.quit()
    }

    /// Wait for the debate to end.
    pub async fn wait(self) -> Result<DebateSummary> {
        let DebateHandle { director, join, .. } = self;
        let summary = join.await.map_err(|e| Error::TaskJoin(e.to_string()))?;
        drop(director);
        summary
    }

    /// Split into the pieces a front-end needs.
    pub fn into_parts(
        self,
    ) -> (
        Director,
        Receiver<EngineEvent>,
        JoinHandle<Result<DebateSummary>>,
    ) {
        (self.director, self.events, self.join)
    }
}

/// Debate engine with its collaborators wired in.
pub struct Engine {
    settings: EngineSettings,
    gateway: Arc<dyn CompletionGateway>,
    prompts: Arc<dyn PromptSource>,
    writer: Option<TranscriptWriter>,
}

impl Engine {
    pub fn new(
        settings: EngineSettings,
        gateway: Arc<dyn CompletionGateway>,
        prompts: Arc<dyn PromptSource>,
    ) -> Self {
        Self {
            settings,
            gateway,
            prompts,
            writer: None,
        }
    }

    pub fn with_transcript(mut self, sink: impl TranscriptSink + 'static) -> Self {
        self.writer = Some(TranscriptWriter::new(sink));
        self
    }

    pub fn with_writer(mut self, writer: TranscriptWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Validate, start the debate and spawn its runtime loop.
    ///
    /// Must be called inside a tokio runtime. Configuration problems are
    /// returned here and nothing is spawned.
    pub fn launch(self, agents: Vec<AgentConfig>, topic: &str) -> Result<DebateHandle> {
        self.settings.validate()?;

        let mut scheduler = TurnScheduler::new(self.settings.clone());
        let initial = scheduler.start(agents, topic, self.settings.max_rounds)?;
        let id = Uuid::new_v4();
        alog!("Debate {} launched with {} workers", id, self.settings.workers);

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let (warn_tx, warn_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = crossbeam_channel::unbounded();

        let pool = WorkerPool::new(
            self.gateway,
            self.prompts,
            self.settings.workers,
            self.settings.request_timeout,
            result_tx,
        );
        let transcript = self
            .writer
            .map(|writer| writer.with_warnings(warn_tx).spawn());

        let runtime = Runtime {
            id,
            scheduler,
            pool,
            transcript,
            events_tx,
            in_flight: None,
            next_dispatch: None,
        };
        let join = tokio::spawn(runtime.run(initial, control_rx, result_rx, warn_rx));

        Ok(DebateHandle {
            id,
            director: Director { tx: control_tx },
            events: events_rx,
            join,
        })
    }
}

struct Runtime {
    id: Uuid,
    scheduler: TurnScheduler,
    pool: WorkerPool,
    transcript: Option<TranscriptHandle>,
    events_tx: Sender<EngineEvent>,
    in_flight: Option<CancellationToken>,
    next_dispatch: Option<Instant>,
}

impl Runtime {
    async fn run(
        mut self,
        initial: Vec<Effect>,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        mut result_rx: mpsc::UnboundedReceiver<TurnOutcome>,
        mut warn_rx: mpsc::UnboundedReceiver<SinkWarning>,
    ) -> Result<DebateSummary> {
        self.apply(initial);

        while self.scheduler.phase().is_live() {
            let timer = self.next_dispatch;
            tokio::select! {
                biased;
                control = control_rx.recv() => match control {
                    Some(control) => {
                        self.handle_control(control);
                        self.drain_controls(&mut control_rx);
                    }
                    None => {
                        alog_debug!("Runtime: all director handles dropped");
                        self.handle_control(Control::Quit);
                    }
                },
                Some(outcome) = result_rx.recv() => {
                    self.drain_controls(&mut control_rx);
                    alog_debug!(
                        "Runtime: outcome epoch={} agent={} ok={}",
                        outcome.epoch,
                        outcome.agent_id,
                        outcome.result.is_ok()
                    );
                    let effects = self.scheduler.complete(outcome.epoch, outcome.result);
                    self.apply(effects);
                },
                Some(warning) = warn_rx.recv() => self.warn_sink(warning),
                _ = tokio::time::sleep_until(timer.unwrap_or_else(Instant::now)), if timer.is_some() => {
                    self.next_dispatch = None;
                    self.drain_controls(&mut control_rx);
                    if self.scheduler.phase().is_terminal() {
                        break;
                    }
                    match self.scheduler.advance() {
                        Ok(effects) => self.apply(effects),
                        Err(e) => {
                            alog_error!("Runtime: advance failed: {}", e);
                            self.fatal(e, "advance");
                        }
                    }
                }
            }
        }

        self.shutdown(&mut warn_rx).await
    }

    fn drain_controls(&mut self, control_rx: &mut mpsc::UnboundedReceiver<Control>) {
        while let Ok(control) = control_rx.try_recv() {
            self.handle_control(control);
        }
    }

    fn handle_control(&mut self, control: Control) {
        alog_debug!("Runtime: control {:?}", control);
        let (action, result) = match control {
            Control::Pause => ("pause", self.scheduler.pause()),
            Control::Resume => ("resume", self.scheduler.resume()),
            Control::Inject(event) => ("inject", self.scheduler.inject(event)),
            Control::Quit => ("quit", self.scheduler.stop(StopReason::ManualQuit)),
        };
        match result {
            Ok(effects) => self.apply(effects),
            Err(e) => {
                alog_warn!("Runtime: {} rejected: {}", action, e);
                let kind = match e {
                    Error::InvalidIntervention(_) => "invalid_intervention",
                    Error::DebateStopped { .. } => "debate_stopped",
                    _ => "rejected",
                };
                self.emit_error(kind, e.to_string(), None, action, true);
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Dispatch(request) => {
                    self.in_flight = Some(self.pool.submit(request));
                }
                Effect::Record(message) => self.record(&message),
                Effect::Emit(event) => {
                    let _ = self.events_tx.send(event);
                }
                Effect::Schedule(delay) => {
                    alog_debug!("Runtime: next dispatch in {:?}", delay);
                    self.next_dispatch = Some(Instant::now() + delay);
                }
                Effect::Cancel => {
                    if let Some(token) = self.in_flight.take() {
                        token.cancel();
                    }
                }
            }
        }
        if !self.scheduler.is_awaiting() {
            self.in_flight = None;
        }
    }

    fn record(&mut self, message: &Message) {
        let Some(transcript) = &self.transcript else {
            return;
        };
        let name = self.scheduler.speaker_name(&message.speaker);
        let record = TranscriptRecord::from_message(message, &name);
        if let Err(e) = transcript.submit(record) {
            alog_error!("Runtime: {}", e);
            self.emit_error("sink_write", e.to_string(), None, "record message", true);
        }
    }

    fn warn_sink(&self, warning: SinkWarning) {
        self.emit_error(
            "sink_write",
            warning.detail,
            None,
            &format!("write transcript seq {}", warning.seq),
            true,
        );
    }

    fn fatal(&mut self, error: Error, action: &str) {
        self.emit_error("fatal", error.to_string(), None, action, false);
        match self.scheduler.stop(StopReason::Fatal {
            detail: error.to_string(),
        }) {
            Ok(effects) => self.apply(effects),
            Err(e) => alog_error!("Runtime: could not stop after fatal error: {}", e),
        }
    }

    fn emit_error(
        &self,
        kind: &str,
        detail: String,
        agent_id: Option<AgentId>,
        action: &str,
        recoverable: bool,
    ) {
        let _ = self.events_tx.send(EngineEvent::Error(ErrorInfo {
            kind: kind.to_string(),
            detail,
            phase: self.scheduler.phase().name().to_string(),
            agent_id,
            action: action.to_string(),
            recoverable,
        }));
    }

    async fn shutdown(
        mut self,
        warn_rx: &mut mpsc::UnboundedReceiver<SinkWarning>,
    ) -> Result<DebateSummary> {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }

        let report = match self.transcript.take() {
            Some(transcript) => transcript.close().await?,
            None => WriterReport::default(),
        };
        while let Ok(warning) = warn_rx.try_recv() {
            self.warn_sink(warning);
        }
        if !report.unwritten.is_empty() {
            self.emit_error(
                "sink_write",
                format!("{} transcript records were not written", report.unwritten.len()),
                None,
                "close transcript",
                false,
            );
        }

        let reason = match self.scheduler.phase() {
            Phase::Stopped(reason) => reason,
            other => StopReason::Fatal {
                detail: format!("runtime exited while {}", other),
            },
        };
        let state = self.scheduler.state();
        let summary = DebateSummary {
            debate_id: self.id,
            reason,
            rounds_completed: state.map(|s| s.rounds_completed()).unwrap_or(0),
            messages: self.scheduler.history().to_vec(),
            phases: state.map(|s| s.phase_history().to_vec()).unwrap_or_default(),
            transcript: report,
        };
        if summary.reason.is_expected() {
            alog!(
                "Debate {} finished: {} after {} rounds, {} messages",
                summary.debate_id,
                summary.reason,
                summary.rounds_completed,
                summary.messages.len()
            );
        } else {
            alog_warn!(
                "Debate {} failed: {} after {} rounds, {} messages",
                summary.debate_id,
                summary.reason,
                summary.rounds_completed,
                summary.messages.len()
            );
        }
        Ok(summary)
    }
}
