//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A scripted completion gateway that records every request
//! - Agent rosters with inline prompts
//! - Collecting engine events with a deadline

#![allow(dead_code)]
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::{Receiver, TryRecvError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use arena::agent::{AgentConfig, GenerationParams};
use arena::config::EngineSettings;
use arena::engine::{DebateHandle, Engine, EngineEvent};
use arena::gateway::{CompletionGateway, CompletionRequest, GatewayError};
use arena::lobby::Lobby;
use arena::roles::InlinePrompts;
use arena::transcript::TranscriptSink;

pub const TOPIC: &str = "Should cities ban private cars from their centres?";

/// Default wait for an expected event.
pub const DEADLINE: Duration = Duration::from_secs(5);

/// One scripted gateway response.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(GatewayError),
    /// Never answer; only cancellation or the caller's timeout ends it.
    Hang,
}

/// Gateway that plays back a script, then answers with fresh text.
///
/// Unscripted replies are `"<Name> argues <random hex>"`, so they never trip
/// the repetition guard. The name is taken from the `You are <Name>.` system
/// prompt that [`roster`] sets up.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Reply>>,
    fallback: Option<Reply>,
    delay: Duration,
    requests: Mutex<Vec<CompletionRequest>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Counts a request as active until dropped.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_script(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.script.lock().unwrap().extend(replies);
        self
    }

    /// Reply used once the script runs out.
    pub fn with_fallback(mut self, reply: Reply) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Most requests that were ever running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Display names of the agents asked so far, in order.
    pub fn speakers(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| agent_name(&r.system_prompt))
            .collect()
    }
}

#[async_trait]
impl CompletionGateway for ScriptedGateway {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<String, GatewayError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        let reply = next.or_else(|| self.fallback.clone());

        tokio::select! {
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }

        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Hang) => {
                cancel.cancelled().await;
                Err(GatewayError::Cancelled)
            }
            None => Ok(format!(
                "{} argues {}",
                agent_name(&request.system_prompt),
                Uuid::new_v4().simple()
            )),
        }
    }
}

fn agent_name(system_prompt: &str) -> String {
    system_prompt
        .trim_start_matches("You are ")
        .trim_end_matches('.')
        .to_string()
}

/// Agents named `names`, with ids lowercased and prompts `You are <Name>.`
pub fn roster(names: &[&str]) -> (Vec<AgentConfig>, InlinePrompts) {
    let mut lobby = Lobby::new();
    lobby.set_topic(TOPIC);
    for name in names {
        lobby
            .add(
                &name.to_lowercase(),
                *name,
                format!("You are {}.", name),
                GenerationParams::new("test-model"),
            )
            .unwrap();
    }
    let roster = lobby.finish().unwrap();
    (roster.agents, roster.prompts)
}

/// Fast settings: no inter-turn delay and millisecond backoff.
pub fn settings(max_rounds: u32) -> EngineSettings {
    EngineSettings {
        max_rounds,
        query_delay: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
        retry_backoff: Duration::from_millis(1),
        ..EngineSettings::default()
    }
}

/// Launch a debate between `names` on [`TOPIC`].
pub fn launch(
    settings: EngineSettings,
    gateway: Arc<ScriptedGateway>,
    names: &[&str],
    sink: impl TranscriptSink + 'static,
) -> DebateHandle {
    let (agents, prompts) = roster(names);
    Engine::new(settings, gateway, Arc::new(prompts))
        .with_transcript(sink)
        .launch(agents, TOPIC)
        .unwrap()
}

/// Events seen so far, with helpers to wait for more.
pub struct EventLog {
    rx: Receiver<EngineEvent>,
    pub seen: Vec<EngineEvent>,
    /// Events before this index have been handed out by `wait_for`.
    cursor: usize,
}

impl EventLog {
    pub fn new(rx: Receiver<EngineEvent>) -> Self {
        Self {
            rx,
            seen: Vec::new(),
            cursor: 0,
        }
    }

    /// Pull whatever is queued without waiting.
    pub fn drain(&mut self) -> &[EngineEvent] {
        loop {
            match self.rx.try_recv() {
                Ok(event) => self.seen.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        &self.seen
    }

    /// Wait for the next event matching `pred` after the last one returned.
    ///
    /// Panics after [`DEADLINE`].
    pub async fn wait_for(&mut self, pred: impl Fn(&EngineEvent) -> bool) -> EngineEvent {
        let deadline = tokio::time::Instant::now() + DEADLINE;
        loop {
            self.drain();
            if let Some(offset) = self.seen[self.cursor..].iter().position(|e| pred(e)) {
                let index = self.cursor + offset;
                self.cursor = index + 1;
                return self.seen[index].clone();
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting for event; saw {:?}", self.names());
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    pub fn count(&self, pred: impl Fn(&EngineEvent) -> bool) -> usize {
        self.seen.iter().filter(|e| pred(e)).count()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.seen.iter().map(|e| e.name()).collect()
    }
}

pub fn is_turn_started(event: &EngineEvent) -> bool {
    matches!(event, EngineEvent::TurnStarted { .. })
}

pub fn is_turn_completed(event: &EngineEvent) -> bool {
    matches!(event, EngineEvent::TurnCompleted(_))
}

pub fn is_stopped(event: &EngineEvent) -> bool {
    matches!(event, EngineEvent::Stopped(_))
}
