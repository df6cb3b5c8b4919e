//! Repetition guard.
//!
//! Detects an agent restating itself without relying on exact string
//! equality. Text is normalised (lowercase, punctuation stripped, whitespace
//! collapsed) and compared as character-bigram sets with the Dice
//! coefficient, which tracks the matching-blocks ratio closely for prose while
//! staying linear in the input length.

use std::collections::HashSet;

use crate::agent::AgentId;
use crate::debate::Message;

/// Similarity of two utterances in `0.0..=1.0`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a_norm = normalize(a);
    let b_norm = normalize(b);

    if a_norm == b_norm {
        return 1.0;
    }
    if a_norm.is_empty() || b_norm.is_empty() {
        return 0.0;
    }

    let a_bigrams = bigrams(&a_norm);
    let b_bigrams = bigrams(&b_norm);

    if a_bigrams.is_empty() || b_bigrams.is_empty() {
        // Single-char texts that differ
        return 0.0;
    }

    let shared = a_bigrams.intersection(&b_bigrams).count();
    (2 * shared) as f64 / (a_bigrams.len() + b_bigrams.len()) as f64
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn bigrams(text: &str) -> HashSet<(char, char)> {
    text.chars().zip(text.chars().skip(1)).collect()
}

/// The last `window` utterances by `agent`, newest last.
pub fn recent_utterances<'a>(
    history: &'a [Message],
    agent: &AgentId,
    window: usize,
) -> Vec<&'a str> {
    let mut recent: Vec<&str> = history
        .iter()
        .rev()
        .filter(|m| m.speaker.agent_id() == Some(agent))
        .take(window)
        .map(|m| m.content.as_str())
        .collect();
    recent.reverse();
    recent
}

/// Whether `candidate` repeats what `agent` has recently said.
///
/// The candidate is compared with the agent's last `window` utterances. It
/// counts as a repeat only if it is at least `threshold` similar to every one
/// of them. An agent with no prior utterance can never repeat. Other agents'
/// messages are ignored.
pub fn check(
    history: &[Message],
    agent: &AgentId,
    candidate: &str,
    window: usize,
    threshold: f64,
) -> bool {
    if window == 0 {
        return false;
    }
    let recent = recent_utterances(history, agent, window);
    !recent.is_empty()
        && recent
            .iter()
            .all(|prev| similarity(prev, candidate) >= threshold)
}
