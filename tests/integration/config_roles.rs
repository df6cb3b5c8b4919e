//! From a config file on disk to a finished debate.

use std::fs;
use std::sync::Arc;

use arena::config::Config;
use arena::debate::StopReason;
use arena::engine::Engine;
use arena::lobby::Lobby;
use arena::roles::RoleLibrary;
use arena::transcript::JsonlTranscript;
use tempfile::TempDir;

use crate::fixtures::ScriptedGateway;

fn write_config(dir: &TempDir) -> std::path::PathBuf {
    let roles = dir.path().join("roles");
    fs::create_dir_all(&roles).unwrap();
    fs::write(roles.join("optimist.txt"), "Name: Optimist\nYou are Optimist.\n").unwrap();

    let toml = format!(
        r#"
[conversation]
rounds = 2
query_delay_seconds = 0.0
retry_backoff_ms = 1
seed_topic = "Should the work week be four days?"

[model]
name = "test-model"

[roles]
dir = "{roles}"

[transcript]
file = "{transcript}"

[[agents]]
id = "optimist"

[[agents]]
id = "critic"
name = "The Critic"
system_prompt = "You are The Critic."
temperature = 0.2
"#,
        roles = roles.display(),
        transcript = dir.path().join("out").join("debates.jsonl").display(),
    );
    let path = dir.path().join("arena.toml");
    fs::write(&path, toml).unwrap();
    path
}

/// Test: Config, role library and lobby feed a real debate
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_debate_from_config_file() {
    let dir = TempDir::new().unwrap();
    let config = Config::load_from(&write_config(&dir)).unwrap();

    let settings = config.engine_settings().unwrap();
    assert_eq!(settings.max_rounds, 2);
    assert!(settings.query_delay.is_zero());

    let library = RoleLibrary::new(config.roles_dir().unwrap());
    let roster = Lobby::from_config(&config, &library)
        .unwrap()
        .finish()
        .unwrap();
    let names: Vec<&str> = roster.agents.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Optimist", "The Critic"]);

    let transcript_path = config.transcript_path().unwrap();
    let gateway = Arc::new(ScriptedGateway::new());
    let handle = Engine::new(settings, gateway.clone(), Arc::new(roster.prompts))
        .with_transcript(JsonlTranscript::open(&transcript_path).unwrap())
        .launch(roster.agents, &roster.topic)
        .unwrap();
    let summary = handle.wait().await.unwrap();

    assert_eq!(summary.reason, StopReason::RoundLimitReached { rounds: 2 });
    assert_eq!(gateway.speakers(), vec!["Optimist", "The Critic", "Optimist", "The Critic"]);
    for request in gateway.requests() {
        assert_eq!(request.model, "test-model");
        let expected = if request.system_prompt == "You are The Critic." { 0.2 } else { 0.6 };
        assert_eq!(request.temperature, expected);
    }

    let records = JsonlTranscript::read_all(&transcript_path).unwrap();
    let names: Vec<&str> = records.iter().map(|r| r.agent_name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Director", "Optimist", "The Critic", "Optimist", "The Critic"]
    );
    assert_eq!(records[0].content, "Should the work week be four days?");
}

/// Test: An unknown explicit role is an error
#[test]
fn test_unknown_role_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::load_from(&write_config(&dir)).unwrap();
    config.agents[0].role = Some("ghost".to_string());

    let library = RoleLibrary::new(config.roles_dir().unwrap());
    let result = Lobby::from_config(&config, &library);
    assert!(matches!(result, Err(arena::Error::RoleNotFound(_))));
}
