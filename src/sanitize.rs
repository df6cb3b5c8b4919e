//! Reply clean-up applied to every completion before it reaches the log.
//!
//! Reasoning models leak their scratchpad (`<think>` blocks, `[THOUGHT: ..]`
//! markers) and chat models like to prefix replies with a speaker tag.

use regex::Regex;
use std::sync::LazyLock;

/// `<think> ... </think>` blocks, across lines.
static THINK_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").unwrap());

/// `[THOUGHT: ...]` markers.
static THOUGHT_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\[THOUGHT[:\s].*?\]").unwrap());

/// `Role: <think>` with no closing tag swallows the rest of the reply.
static UNCLOSED_THINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^[A-Za-z]+:\s*<think>.*").unwrap());

/// Leading `Role:` tag on any line.
static ROLE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[A-Za-z]+:\s*").unwrap());

static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n+").unwrap());

/// Strip model-internal thoughts and speaker tags, collapse blank-line runs
/// and trim.
pub fn sanitize_reply(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let t = THINK_BLOCK_RE.replace_all(text, "");
    let t = THOUGHT_MARKER_RE.replace_all(&t, "");
    let t = UNCLOSED_THINK_RE.replace_all(&t, "");
    let t = ROLE_TAG_RE.replace_all(&t, "");
    let t = BLANK_RUN_RE.replace_all(&t, "\n\n");
    t.trim().to_string()
}
