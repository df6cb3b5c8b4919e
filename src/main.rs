use std::collections::HashMap;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;

use arena::agent::AgentId;
use arena::config::Config;
use arena::debate::{Message, MessageKind};
use arena::engine::{Director, EngineEvent, Engine};
use arena::gateway::OpenRouterGateway;
use arena::intervention::InterventionEvent;
use arena::lobby::Lobby;
use arena::roles::RoleLibrary;
use arena::transcript::JsonlTranscript;
use arena::util::preview;
use arena::{alog, alog_debug, alog_warn, Error, Result};

/// Weight used by the `u:` shorthand.
const SUBTLE_WEIGHT: f32 = 0.1;

/// Arena - multi-agent debate engine with a live Director
#[derive(Parser, Debug)]
#[command(name = "arena")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    ARENA_DEBUG=1   Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.arena/arena.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a debate with the configured agents
    Run {
        /// Config file (defaults to ~/.arena/arena.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of rounds
        #[arg(long)]
        rounds: Option<u32>,

        /// Seconds to wait between turns
        #[arg(long)]
        delay: Option<f64>,

        /// Debate topic (overrides seed_topic)
        #[arg(long)]
        topic: Option<String>,

        /// Do not read Director commands from stdin
        #[arg(long)]
        no_interactive: bool,
    },

    /// List the role library
    Roles {
        /// Config file (defaults to ~/.arena/arena.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// A line of Director input.
#[derive(Debug, Clone, PartialEq)]
enum Input {
    Pause,
    Resume,
    Quit,
    Help,
    Inject {
        weight: f32,
        target: Option<AgentId>,
        text: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    arena::log::init_with_debug(cli.debug);

    match cli.command {
        Command::Run {
            config,
            rounds,
            delay,
            topic,
            no_interactive,
        } => run_debate(config, rounds, delay, topic, !no_interactive),
        Command::Roles { config } => run_roles(config),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(&path),
        None => Config::load(),
    }
}

fn run_roles(config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;
    let library = RoleLibrary::new(config.roles_dir()?);
    let ids = library.list()?;
    if ids.is_empty() {
        println!("No roles in {}", library.dir().display());
        return Ok(());
    }

    println!("{:<16} {:<20} PROMPT", "ID", "NAME");
    println!("{}", "-".repeat(72));
    for id in ids {
        match library.load(&id) {
            Ok(role) => println!(
                "{:<16} {:<20} {}",
                role.id,
                role.name,
                preview(&role.system_prompt.replace('\n', " "), 34)
            ),
            Err(e) => println!("{:<16} <unreadable: {}>", id, e),
        }
    }
    Ok(())
}

fn run_debate(
    config_path: Option<PathBuf>,
    rounds: Option<u32>,
    delay: Option<f64>,
    topic: Option<String>,
    interactive: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(rounds) = rounds {
        config.conversation.rounds = rounds;
    }
    if let Some(delay) = delay {
        config.conversation.query_delay_seconds = delay;
    }
    if let Some(topic) = topic {
        config.conversation.seed_topic = Some(topic);
    }
    let settings = config.engine_settings()?;

    let library = RoleLibrary::new(config.roles_dir()?);
    let mut lobby = Lobby::from_config(&config, &library)?;
    if lobby.agents().is_empty() {
        alog_debug!("No [[agents]] configured, seating the role library");
        for id in library.list()? {
            lobby.add_role(&library, &id, config.model.params())?;
        }
    }
    if lobby.topic().is_none() {
        return Err(Error::InvalidConfiguration(
            "no debate topic: pass --topic or set conversation.seed_topic".to_string(),
        ));
    }
    let roster = lobby.finish()?;

    let gateway = OpenRouterGateway::from_env(
        &config.openrouter.base_url,
        &config.openrouter.api_key_envvar,
    )?;
    let transcript_path = config.transcript_path()?;
    let transcript = JsonlTranscript::open(&transcript_path)?;

    let names: HashMap<AgentId, String> = roster
        .agents
        .iter()
        .map(|a| (a.id.clone(), a.name.clone()))
        .collect();
    println!("Topic: {}", roster.topic);
    println!(
        "Agents: {}",
        roster
            .agents
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Transcript: {}", transcript_path.display());
    if interactive {
        println!("Director: p pause, r resume, q quit, i <weight> [@agent] <text>, u:<text>, ? help");
    }

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(async {
        let engine = Engine::new(settings, Arc::new(gateway), Arc::new(roster.prompts))
            .with_transcript(transcript);
        let handle = engine.launch(roster.agents, &roster.topic)?;
        alog!("Debate {} running", handle.id());
        let (director, events, join) = handle.into_parts();

        let printer = thread::spawn(move || print_events(events, names));
        if interactive {
            let director = director.clone();
            thread::spawn(move || read_director_input(director));
        }

        let ctrl_c = director.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                alog!("Ctrl-C received, stopping debate");
                let _ = ctrl_c.quit();
            }
        });

        let summary = join.await.map_err(|e| Error::TaskJoin(e.to_string()))??;
        let _ = printer.join();
        Ok::<_, Error>(summary)
    })?;

    println!();
    println!("Debate ended: {}", summary.reason);
    println!(
        "{} rounds, {} messages, {} transcript records written",
        summary.rounds_completed,
        summary.messages.len(),
        summary.transcript.written
    );
    if !summary.transcript.unwritten.is_empty() {
        println!(
            "WARNING: {} records could not be written to {}",
            summary.transcript.unwritten.len(),
            transcript_path.display()
        );
    }
    Ok(())
}

fn print_events(events: Receiver<EngineEvent>, names: HashMap<AgentId, String>) {
    let name_of = |message: &Message| -> String {
        match message.speaker.agent_id() {
            Some(id) => names.get(id).cloned().unwrap_or_else(|| id.to_string()),
            None => "Director".to_string(),
        }
    };

    for event in events.iter() {
        match event {
            EngineEvent::TurnStarted {
                agent_name,
                attempt,
                forced,
                ..
            } => {
                let mut note = String::new();
                if attempt > 1 {
                    note.push_str(&format!(" (attempt {})", attempt));
                }
                if forced {
                    note.push_str(" (forced)");
                }
                eprintln!("... {} is thinking{}", agent_name, note);
            }
            EngineEvent::TurnCompleted(message) => {
                println!();
                println!("[round {}] {}:", message.round, name_of(&message));
                println!("{}", message.content);
            }
            EngineEvent::Intervened(message) => {
                if let MessageKind::Intervention { tier, weight } = message.kind {
                    println!();
                    println!("[Director {} {:.2}] {}", tier, weight, message.content);
                }
            }
            EngineEvent::StateChanged(phase) => eprintln!("-- {} --", phase),
            EngineEvent::Stopped(reason) => eprintln!("-- stopped: {} --", reason),
            EngineEvent::Error(info) => {
                let agent = info
                    .agent_id
                    .as_ref()
                    .map(|id| format!(" [{}]", id))
                    .unwrap_or_default();
                eprintln!("! {}{}: {} ({})", info.kind, agent, info.detail, info.action);
            }
        }
    }
}

fn read_director_input(director: Director) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let input = match parse_input(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(msg) => {
                eprintln!("? {}", msg);
                continue;
            }
        };
        let sent = match input {
            Input::Pause => director.pause(),
            Input::Resume => director.resume(),
            Input::Quit => director.quit(),
            Input::Help => {
                eprintln!("p pause | r resume | q quit | i <weight> [@agent] <text> | u:<text>");
                Ok(())
            }
            Input::Inject {
                weight,
                target,
                text,
            } => InterventionEvent::new(weight, text)
                .and_then(|event| match target {
                    Some(agent) => event.targeting(agent),
                    None => Ok(event),
                })
                .and_then(|event| director.inject_event(event)),
        };
        match sent {
            Ok(()) => {}
            Err(Error::EngineClosed) => break,
            Err(e) => {
                alog_warn!("Director input rejected: {}", e);
                eprintln!("? {}", e);
            }
        }
    }
}

/// Parse one line of Director input. Blank lines yield `None`.
fn parse_input(line: &str) -> std::result::Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(text) = line.strip_prefix("u:") {
        return Ok(Some(Input::Inject {
            weight: SUBTLE_WEIGHT,
            target: None,
            text: text.trim().to_string(),
        }));
    }

    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };
    match cmd {
        "p" | "pause" => Ok(Some(Input::Pause)),
        "r" | "resume" => Ok(Some(Input::Resume)),
        "q" | "quit" => Ok(Some(Input::Quit)),
        "?" | "h" | "help" => Ok(Some(Input::Help)),
        "i" | "inject" => {
            let (weight, rest) = rest
                .split_once(char::is_whitespace)
                .ok_or("usage: i <weight> [@agent] <text>")?;
            let weight: f32 = weight
                .parse()
                .map_err(|_| format!("not a weight: {}", weight))?;
            let rest = rest.trim();
            let (target, text) = match rest.strip_prefix('@') {
                Some(tagged) => match tagged.split_once(char::is_whitespace) {
                    Some((agent, text)) => (Some(AgentId::new(agent)), text.trim()),
                    None => return Err("missing text after @agent".to_string()),
                },
                None => (None, rest),
            };
            Ok(Some(Input::Inject {
                weight,
                target,
                text: text.to_string(),
            }))
        }
        other => Err(format!("unknown command: {}", other)),
    }
}
