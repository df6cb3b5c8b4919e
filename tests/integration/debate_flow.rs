//! End-to-end debate flow.
//!
//! These tests run the real engine against the scripted gateway and check
//! turn order, context building, the stop conditions and the transcript.

use std::sync::Arc;
use std::time::Duration;

use arena::debate::{MessageKind, Speaker, StopReason};
use arena::engine::{Engine, EngineEvent};
use arena::gateway::ChatRole;
use arena::transcript::{JsonlTranscript, MemoryTranscript};
use arena::Error;
use tempfile::TempDir;

use crate::fixtures::{
    is_turn_completed, launch, roster, settings, EventLog, Reply, ScriptedGateway, TOPIC,
};

/// Test: Round-robin debate to the round limit
/// Given two agents and a two-round limit
/// When the debate runs unattended
/// Then each agent speaks once per round, in roster order
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_round_robin_to_round_limit() {
    let gateway = Arc::new(ScriptedGateway::new());
    let sink = MemoryTranscript::new();
    let handle = launch(settings(2), gateway.clone(), &["Alpha", "Beta"], sink.clone());
    let mut events = EventLog::new(handle.events().clone());

    let summary = handle.wait().await.unwrap();

    assert_eq!(summary.reason, StopReason::RoundLimitReached { rounds: 2 });
    assert_eq!(summary.rounds_completed, 2);
    assert_eq!(gateway.speakers(), vec!["Alpha", "Beta", "Alpha", "Beta"]);

    let rounds: Vec<u32> = summary.messages.iter().map(|m| m.round).collect();
    assert_eq!(rounds, vec![0, 1, 1, 2, 2]);
    let seqs: Vec<u64> = summary.messages.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    assert_eq!(summary.messages[0].kind, MessageKind::Seed);
    assert_eq!(summary.messages[0].speaker, Speaker::Director);
    assert_eq!(summary.messages[0].content, TOPIC);

    events.drain();
    assert_eq!(events.count(is_turn_completed), 4);
    assert!(matches!(
        events.seen.first(),
        Some(EngineEvent::StateChanged(_))
    ));
    assert!(matches!(
        events.seen.last(),
        Some(EngineEvent::Stopped(StopReason::RoundLimitReached { rounds: 2 }))
    ));
}

/// Test: Every message reaches the transcript in order
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transcript_matches_history() {
    let gateway = Arc::new(ScriptedGateway::new());
    let sink = MemoryTranscript::new();
    let handle = launch(settings(2), gateway, &["Alpha", "Beta"], sink.clone());

    let summary = handle.wait().await.unwrap();
    let records = sink.records();

    assert_eq!(summary.transcript.written, 5);
    assert!(summary.transcript.unwritten.is_empty());
    assert_eq!(records.len(), summary.messages.len());
    for (record, message) in records.iter().zip(&summary.messages) {
        assert_eq!(record.seq, message.seq);
        assert_eq!(record.content, message.content);
    }
    let speakers: Vec<&str> = records.iter().map(|r| r.agent_id.as_str()).collect();
    assert_eq!(speakers, vec!["director", "alpha", "beta", "alpha", "beta"]);
    assert_eq!(records[1].agent_name, "Alpha");
    assert_eq!(records[1].model.as_deref(), Some("test-model"));
}

/// Test: Context reflects who said what
/// Given a finished two-agent debate
/// When inspecting the requests the gateway saw
/// Then others' turns are user messages, own turns are assistant messages
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_context_attributes_speakers() {
    let gateway = Arc::new(ScriptedGateway::new());
    let handle = launch(
        settings(2),
        gateway.clone(),
        &["Alpha", "Beta"],
        MemoryTranscript::new(),
    );
    let summary = handle.wait().await.unwrap();
    let requests = gateway.requests();
    let alpha_first = &summary.messages[1].content;

    // Opening request: no turns yet, only the instruction.
    assert_eq!(requests[0].context.len(), 1);
    assert!(requests[0].context[0].content.contains("Open the debate"));
    assert!(requests[0].context[0].content.contains(TOPIC));

    // Beta sees Alpha's turn attributed by name.
    let beta = &requests[1];
    assert_eq!(beta.context[0].role, ChatRole::User);
    assert_eq!(beta.context[0].content, format!("Alpha: {}", alpha_first));
    let last = beta.context.last().unwrap();
    assert!(last.content.contains("Respond as Beta"));

    // Alpha later sees its own turn as an assistant message.
    let alpha_again = &requests[2];
    assert_eq!(alpha_again.context[0].role, ChatRole::Assistant);
    assert_eq!(&alpha_again.context[0].content, alpha_first);
    assert_eq!(alpha_again.system_prompt, "You are Alpha.");
}

/// Test: History window bounds the context
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_history_window_bounds_context() {
    let gateway = Arc::new(ScriptedGateway::new());
    let mut settings = settings(3);
    settings.history_window = 2;
    let handle = launch(
        settings,
        gateway.clone(),
        &["Alpha", "Beta", "Gamma"],
        MemoryTranscript::new(),
    );
    handle.wait().await.unwrap();

    let requests = gateway.requests();
    assert_eq!(requests.len(), 9);
    for request in &requests {
        // window + closing instruction
        assert!(request.context.len() <= 3, "context too long: {:?}", request.context);
    }
    assert_eq!(requests[8].context.len(), 3);
}

/// Test: A repeating agent ends the debate
/// Given agents that say the same thing every turn
/// When the repeat limit is hit
/// Then the debate stops with RepetitionLimitReached for the first offender
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_repetition_stops_debate() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .with_fallback(Reply::Text("Cars are bad and that is that.".to_string())),
    );
    let mut settings = settings(10);
    settings.stop_on_repeat = 2;
    let handle = launch(settings, gateway, &["Alpha", "Beta"], MemoryTranscript::new());

    let summary = handle.wait().await.unwrap();

    assert_eq!(
        summary.reason,
        StopReason::RepetitionLimitReached {
            agent_id: "alpha".into(),
            repeats: 2,
        }
    );
    // seed + A, B, A(repeat 1), B(repeat 1), A(repeat 2)
    assert_eq!(summary.messages.len(), 6);
}

/// Test: Repetition guard off
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_repetition_guard_disabled() {
    let gateway = Arc::new(
        ScriptedGateway::new().with_fallback(Reply::Text("Same again.".to_string())),
    );
    let mut settings = settings(3);
    settings.stop_on_repeat = 0;
    let handle = launch(settings, gateway, &["Alpha"], MemoryTranscript::new());

    let summary = handle.wait().await.unwrap();
    assert_eq!(summary.reason, StopReason::RoundLimitReached { rounds: 3 });
}

/// Test: Extra workers never overlap turns
/// Given a pool of four workers and a slow gateway
/// When the debate runs
/// Then only one request is ever outstanding
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_request_in_flight() {
    let gateway = Arc::new(ScriptedGateway::new().with_delay(Duration::from_millis(10)));
    let mut settings = settings(3);
    settings.workers = 4;
    let handle = launch(
        settings,
        gateway.clone(),
        &["Alpha", "Beta"],
        MemoryTranscript::new(),
    );
    handle.wait().await.unwrap();

    assert_eq!(gateway.requests().len(), 6);
    assert_eq!(gateway.peak_concurrency(), 1);
}

/// Test: Replies are sanitised before they are committed
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_replies_are_sanitized() {
    let gateway = Arc::new(ScriptedGateway::new().with_script([Reply::Text(
        "<think>plan the attack</think>Alpha: Trams are the answer.".to_string(),
    )]));
    let handle = launch(settings(1), gateway, &["Alpha"], MemoryTranscript::new());

    let summary = handle.wait().await.unwrap();
    assert_eq!(summary.messages[1].content, "Trams are the answer.");
}

/// Test: JSONL transcript on disk
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_jsonl_transcript_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("logs").join("debates.jsonl");
    let sink = JsonlTranscript::open(&path).unwrap();

    let gateway = Arc::new(ScriptedGateway::new());
    let handle = launch(settings(2), gateway, &["Alpha"], sink);
    let summary = handle.wait().await.unwrap();

    let records = JsonlTranscript::read_all(&path).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].kind, MessageKind::Seed);
    assert_eq!(records[1].kind, MessageKind::Turn);
    assert_eq!(records[2].content, summary.messages[2].content);
}

/// Test: Bad input is rejected before anything runs
#[tokio::test]
async fn test_launch_rejects_invalid_input() {
    let gateway = Arc::new(ScriptedGateway::new());
    let (agents, prompts) = roster(&["Alpha"]);
    let prompts = Arc::new(prompts);

    let result = Engine::new(settings(2), gateway.clone(), prompts.clone()).launch(agents, "  ");
    assert!(matches!(result, Err(Error::InvalidConfiguration(_))));

    let result = Engine::new(settings(2), gateway.clone(), prompts.clone()).launch(Vec::new(), TOPIC);
    assert!(matches!(result, Err(Error::InvalidConfiguration(_))));

    let (agents, _) = roster(&["Alpha"]);
    let mut bad = settings(2);
    bad.workers = 0;
    let result = Engine::new(bad, gateway.clone(), prompts).launch(agents, TOPIC);
    assert!(matches!(result, Err(Error::InvalidConfiguration(_))));

    assert!(gateway.requests().is_empty());
}
