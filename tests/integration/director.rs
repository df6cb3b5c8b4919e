//! Director control of a running debate.
//!
//! Pause, resume and quit, plus the three intervention tiers. The scripted
//! gateway is slowed down so commands reliably land while a request is
//! outstanding.

use std::sync::Arc;
use std::time::Duration;

use arena::agent::{AgentId, ParamOverride};
use arena::debate::{MessageKind, Phase, Speaker, StopReason};
use arena::engine::EngineEvent;
use arena::gateway::ChatRole;
use arena::intervention::{InterventionEvent, Tier};
use arena::transcript::MemoryTranscript;
use arena::Error;
use tokio_test::{assert_err, assert_ok};

use crate::fixtures::{
    is_stopped, is_turn_completed, is_turn_started, launch, settings, EventLog, Reply,
    ScriptedGateway,
};

const SLOW: Duration = Duration::from_millis(100);

fn system_texts(request: &arena::gateway::CompletionRequest) -> Vec<&str> {
    request
        .context
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect()
}

// ============================================================================
// Pause / resume / quit
// ============================================================================

/// Test: Pause lets the outstanding turn land but dispatches nothing new
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pause_holds_next_turn() {
    let gateway = Arc::new(ScriptedGateway::new().with_delay(SLOW));
    let handle = launch(
        settings(3),
        gateway.clone(),
        &["Alpha", "Beta"],
        MemoryTranscript::new(),
    );
    let mut events = EventLog::new(handle.events().clone());

    events.wait_for(is_turn_started).await;
    assert_ok!(handle.pause());
    events
        .wait_for(|e| matches!(e, EngineEvent::StateChanged(Phase::Paused)))
        .await;
    events.wait_for(is_turn_completed).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    events.drain();
    assert_eq!(events.count(is_turn_started), 1);
    assert_eq!(gateway.requests().len(), 1);

    assert_ok!(handle.resume());
    events
        .wait_for(|e| matches!(e, EngineEvent::StateChanged(Phase::Running)))
        .await;
    match events.wait_for(is_turn_started).await {
        EngineEvent::TurnStarted { agent_name, .. } => assert_eq!(agent_name, "Beta"),
        other => panic!("unexpected {:?}", other),
    }

    handle.quit().unwrap();
    let summary = handle.wait().await.unwrap();
    assert_eq!(summary.reason, StopReason::ManualQuit);
    let phases: Vec<&str> = summary.phases.iter().map(|p| p.phase.name()).collect();
    assert_eq!(phases, vec!["lobby", "running", "paused", "running", "stopped"]);
}

/// Test: Quit cancels the outstanding request and commits nothing more
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_quit_cancels_in_flight() {
    let gateway = Arc::new(ScriptedGateway::new().with_fallback(Reply::Hang));
    let handle = launch(settings(5), gateway.clone(), &["Alpha"], MemoryTranscript::new());
    let mut events = EventLog::new(handle.events().clone());

    events.wait_for(is_turn_started).await;
    handle.quit().unwrap();
    let summary = handle.wait().await.unwrap();

    assert_eq!(summary.reason, StopReason::ManualQuit);
    assert_eq!(summary.messages.len(), 1);
    assert_eq!(gateway.requests().len(), 1);

    events.drain();
    assert_eq!(events.count(is_turn_completed), 0);
    assert_eq!(events.count(is_stopped), 1);
}

/// Test: Commands after the debate ended report a closed engine
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_commands_after_stop_fail() {
    let gateway = Arc::new(ScriptedGateway::new());
    let handle = launch(settings(1), gateway, &["Alpha"], MemoryTranscript::new());
    let director = handle.director();

    handle.wait().await.unwrap();

    assert!(matches!(director.pause(), Err(Error::EngineClosed)));
    assert_err!(director.resume());
    assert_err!(director.inject(0.5, "Too late"));
}

// ============================================================================
// Interventions
// ============================================================================

/// Test: Subtle note reaches the next turn only
/// Given Alpha's request outstanding
/// When the Director adds a subtle note
/// Then Beta's context carries it once and later turns do not
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_subtle_note_reaches_next_turn() {
    let gateway = Arc::new(ScriptedGateway::new().with_delay(SLOW));
    let handle = launch(
        settings(2),
        gateway.clone(),
        &["Alpha", "Beta"],
        MemoryTranscript::new(),
    );
    let mut events = EventLog::new(handle.events().clone());

    events.wait_for(is_turn_started).await;
    handle.inject(0.1, "Mention bicycles").unwrap();
    let summary = handle.wait().await.unwrap();

    let requests = gateway.requests();
    assert_eq!(requests.len(), 4);
    assert!(system_texts(&requests[0]).is_empty());
    let beta = system_texts(&requests[1]);
    assert_eq!(beta.len(), 1);
    assert!(beta[0].starts_with("[Contextual Note]"));
    assert!(beta[0].contains("Mention bicycles"));
    assert!(system_texts(&requests[2]).is_empty());

    // The Director message is logged at the point it was given.
    let director = &summary.messages[1];
    assert_eq!(director.speaker, Speaker::Director);
    assert_eq!(
        director.kind,
        MessageKind::Intervention {
            tier: Tier::Subtle,
            weight: 0.1
        }
    );
    assert!(matches!(summary.messages[2].speaker, Speaker::Agent(_)));
}

/// Test: Mandatory instruction is rendered as such
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mandatory_instruction() {
    let gateway = Arc::new(ScriptedGateway::new().with_delay(SLOW));
    let handle = launch(
        settings(1),
        gateway.clone(),
        &["Alpha", "Beta"],
        MemoryTranscript::new(),
    );
    let mut events = EventLog::new(handle.events().clone());

    events.wait_for(is_turn_started).await;
    handle.inject(0.75, "Cite a real city").unwrap();
    handle.wait().await.unwrap();

    let requests = gateway.requests();
    let beta = system_texts(&requests[1]);
    assert_eq!(beta.len(), 1);
    assert!(beta[0].starts_with("[MANDATORY INSTRUCTION]"));
    assert!(beta[0].contains("Cite a real city"));
}

/// Test: Override forces a re-turn and persists
/// Given Alpha's request outstanding
/// When the Director overrides
/// Then Alpha is asked again immediately and the directive stays in context
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_override_forces_return() {
    let gateway = Arc::new(ScriptedGateway::new().with_delay(SLOW));
    let handle = launch(
        settings(2),
        gateway.clone(),
        &["Alpha", "Beta"],
        MemoryTranscript::new(),
    );
    let mut events = EventLog::new(handle.events().clone());

    events.wait_for(is_turn_started).await;
    handle.inject(0.9, "Talk only about buses").unwrap();
    match events.wait_for(is_turn_started).await {
        EngineEvent::TurnStarted {
            agent_name, forced, ..
        } => {
            assert_eq!(agent_name, "Alpha");
            assert!(forced);
        }
        other => panic!("unexpected {:?}", other),
    }
    let summary = handle.wait().await.unwrap();

    assert_eq!(summary.reason, StopReason::RoundLimitReached { rounds: 2 });
    assert_eq!(
        gateway.speakers(),
        vec!["Alpha", "Alpha", "Beta", "Alpha", "Beta"]
    );
    let requests = gateway.requests();
    assert!(system_texts(&requests[0]).is_empty());
    for request in &requests[1..] {
        let texts = system_texts(request);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("SYSTEM OVERRIDE"));
        assert!(texts[0].contains("Talk only about buses"));
    }
}

/// Test: Targeted override gives another agent an extra turn
/// Given Alpha's request outstanding in a three-agent debate
/// When the Director overrides targeting Gamma
/// Then Gamma speaks next and the rotation then carries on from Beta
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_targeted_override_extra_turn() {
    let gateway = Arc::new(ScriptedGateway::new().with_delay(SLOW));
    let handle = launch(
        settings(1),
        gateway.clone(),
        &["Alpha", "Beta", "Gamma"],
        MemoryTranscript::new(),
    );
    let mut events = EventLog::new(handle.events().clone());

    events.wait_for(is_turn_started).await;
    let event = InterventionEvent::new(0.95, "Gamma, answer Alpha directly")
        .unwrap()
        .targeting(AgentId::new("gamma"))
        .unwrap();
    handle.director().inject_event(event).unwrap();
    let summary = handle.wait().await.unwrap();

    assert_eq!(summary.reason, StopReason::RoundLimitReached { rounds: 1 });
    assert_eq!(gateway.speakers(), vec!["Alpha", "Gamma", "Beta", "Gamma"]);
}

/// Test: Override with parameter change
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_override_changes_generation_params() {
    let gateway = Arc::new(ScriptedGateway::new().with_delay(SLOW));
    let handle = launch(
        settings(2),
        gateway.clone(),
        &["Alpha", "Beta"],
        MemoryTranscript::new(),
    );
    let mut events = EventLog::new(handle.events().clone());

    events.wait_for(is_turn_started).await;
    let event = InterventionEvent::new(0.85, "Be bolder")
        .unwrap()
        .with_params(ParamOverride {
            temperature: Some(1.4),
            max_tokens: Some(64),
            ..Default::default()
        })
        .unwrap();
    handle.director().inject_event(event).unwrap();
    handle.wait().await.unwrap();

    let requests = gateway.requests();
    assert_eq!(requests[0].temperature, 0.6);
    for request in requests.iter().filter(|r| r.system_prompt == "You are Alpha.").skip(1) {
        assert_eq!(request.temperature, 1.4);
        assert_eq!(request.max_tokens, 64);
    }
    for request in requests.iter().filter(|r| r.system_prompt == "You are Beta.") {
        assert_eq!(request.temperature, 0.6);
    }
}

/// Test: Invalid interventions change nothing
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_interventions_rejected() {
    let gateway = Arc::new(ScriptedGateway::new().with_delay(SLOW));
    let handle = launch(
        settings(1),
        gateway.clone(),
        &["Alpha", "Beta"],
        MemoryTranscript::new(),
    );
    let mut events = EventLog::new(handle.events().clone());

    assert!(matches!(
        handle.inject(1.5, "too strong"),
        Err(Error::InvalidIntervention(_))
    ));
    assert!(matches!(
        handle.inject(0.5, "   "),
        Err(Error::InvalidIntervention(_))
    ));

    events.wait_for(is_turn_started).await;
    let unknown = InterventionEvent::new(0.9, "Nobody is here")
        .unwrap()
        .targeting(AgentId::new("nobody"))
        .unwrap();
    handle.director().inject_event(unknown).unwrap();
    match events.wait_for(|e| matches!(e, EngineEvent::Error(_))).await {
        EngineEvent::Error(info) => {
            assert_eq!(info.kind, "invalid_intervention");
            assert!(info.recoverable);
        }
        other => panic!("unexpected {:?}", other),
    }

    let summary = handle.wait().await.unwrap();
    assert_eq!(summary.reason, StopReason::RoundLimitReached { rounds: 1 });
    assert!(summary.messages.iter().all(|m| !m.is_director() || m.seq == 0));
    assert_eq!(gateway.speakers(), vec!["Alpha", "Beta"]);
}
