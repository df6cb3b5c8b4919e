//! System-prompt resolution.
//!
//! An agent carries a [`PromptHandle`]; a [`PromptSource`] turns it into the
//! system prompt text when a request is built. Two sources ship here: the
//! on-disk [`RoleLibrary`] and the in-memory [`InlinePrompts`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::agent::PromptHandle;
use crate::{alog_debug, alog_warn, Error, Result};

/// Resolves prompt handles to system-prompt text.
///
/// Called from worker tasks on the blocking pool, so implementations may do
/// synchronous I/O.
pub trait PromptSource: Send + Sync {
    fn resolve(&self, handle: &PromptHandle) -> Result<String>;
}

/// Prompt used when an agent is configured without one.
pub fn default_system_prompt(name: &str) -> String {
    format!(
        "You are {}. Stay in role, respond concisely in 2-4 paragraphs, use plain language, \
         and when you propose a speculative strategic outcome, label it clearly as speculation. \
         Do NOT output chain-of-thought, internal reasoning steps, or meta-level thinking markers. \
         Provide only the response text that should be shown to users.",
        name
    )
}

/// A persona loaded from the role library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
}

impl Role {
    /// Parse role file contents. An optional first line `Name: X` sets the
    /// display name; otherwise the id is capitalised.
    pub fn parse(id: &str, content: &str) -> Self {
        let content = content.trim();
        let mut lines = content.lines();
        if let Some(first) = lines.next() {
            if first.to_lowercase().starts_with("name:") {
                if let Some((_, name)) = first.split_once(':') {
                    let prompt = lines.collect::<Vec<_>>().join("\n");
                    return Self {
                        id: id.to_string(),
                        name: name.trim().to_string(),
                        system_prompt: prompt.trim().to_string(),
                    };
                }
            }
        }
        Self {
            id: id.to_string(),
            name: capitalize(id),
            system_prompt: content.to_string(),
        }
    }
}

fn capitalize(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

/// Directory of `<id>.txt` role files.
#[derive(Debug, Clone)]
pub struct RoleLibrary {
    dir: PathBuf,
}

impl RoleLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            alog_debug!("Creating roles directory: {}", self.dir.display());
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    /// Role ids available in the library, sorted. A missing directory is empty.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn load(&self, id: &str) -> Result<Role> {
        if id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(Error::RoleNotFound(id.to_string()));
        }
        let path = self.dir.join(format!("{}.txt", id));
        if !path.exists() {
            alog_warn!("Role file not found: {}", path.display());
            return Err(Error::RoleNotFound(id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        alog_debug!("Role loaded: {} ({} bytes)", id, content.len());
        Ok(Role::parse(id, &content))
    }
}

impl PromptSource for RoleLibrary {
    fn resolve(&self, handle: &PromptHandle) -> Result<String> {
        Ok(self.load(handle.key())?.system_prompt)
    }
}

/// Prompts held in memory, keyed by handle.
#[derive(Debug, Clone, Default)]
pub struct InlinePrompts {
    prompts: HashMap<String, String>,
}

impl InlinePrompts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, prompt: impl Into<String>) -> PromptHandle {
        let key = key.into();
        self.prompts.insert(key.clone(), prompt.into());
        PromptHandle::new(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.prompts.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.prompts.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

impl PromptSource for InlinePrompts {
    fn resolve(&self, handle: &PromptHandle) -> Result<String> {
        self.get(handle.key())
            .map(str::to_string)
            .ok_or_else(|| Error::RoleNotFound(handle.key().to_string()))
    }
}
