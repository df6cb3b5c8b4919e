//! Completion gateway: the seam between the engine and whatever service
//! turns a prompt plus context into text.
//!
//! The engine only knows the [`CompletionGateway`] trait. The OpenRouter
//! client in [`openrouter`] is one implementation; tests use scripted ones.

pub mod openrouter;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use openrouter::OpenRouterGateway;

/// Failure modes of a single completion request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// No reply within the per-request timeout.
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),

    /// Transport, HTTP status or payload error.
    #[error("completion failed: {0}")]
    Failure(String),

    /// The request was cancelled before it finished.
    #[error("completion cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Short machine-friendly kind used in error events.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Timeout(_) => "gateway_timeout",
            GatewayError::Failure(_) => "gateway_failure",
            GatewayError::Cancelled => "gateway_cancelled",
        }
    }
}

/// Chat role of a context message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One entry of the context sent with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ContextMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Everything a gateway needs to produce one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub context: Vec<ContextMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl CompletionRequest {
    /// System prompt followed by the context, in wire order.
    pub fn messages(&self) -> Vec<ContextMessage> {
        let mut messages = Vec::with_capacity(self.context.len() + 1);
        messages.push(ContextMessage::system(self.system_prompt.clone()));
        messages.extend(self.context.iter().cloned());
        messages
    }
}

/// An external text-completion service.
///
/// Implementations must return promptly once `cancel` fires. The caller
/// enforces `request.timeout` as well, so honouring it here is optional.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<String, GatewayError>;
}
