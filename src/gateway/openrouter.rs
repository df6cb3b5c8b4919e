//! OpenAI-compatible chat completions over HTTP (OpenRouter by default).

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{CompletionGateway, CompletionRequest, GatewayError};
use crate::error::{Error, Result};
use crate::{alog_debug, alog_warn};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_API_KEY_ENV: &str = "OPENROUTER_API_KEY";

const REFERER: &str = "https://github.com/arena-debate/arena";
const TITLE: &str = "Arena Debate Engine";

/// Chat-completions client.
pub struct OpenRouterGateway {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenRouterGateway {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::InvalidConfiguration(format!("http client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Build a client whose API key is read from `api_key_env`.
    pub fn from_env(base_url: &str, api_key_env: &str) -> Result<Self> {
        let api_key = std::env::var(api_key_env).map_err(|_| {
            Error::InvalidConfiguration(format!(
                "API key environment variable '{}' is not set",
                api_key_env
            ))
        })?;
        if api_key.trim().is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "API key environment variable '{}' is empty",
                api_key_env
            )));
        }
        Self::new(base_url, api_key)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(&self, request: &CompletionRequest) -> std::result::Result<String, GatewayError> {
        let body = request_body(request);

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(request.timeout)
                } else {
                    GatewayError::Failure(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Failure(format!(
                "API error ({}): {}",
                status, body
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Failure(format!("invalid response body: {}", e)))?;

        extract_content(&json)
    }
}

fn request_body(request: &CompletionRequest) -> serde_json::Value {
    serde_json::json!({
        "model": request.model,
        "messages": request.messages(),
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
    })
}

fn extract_content(json: &serde_json::Value) -> std::result::Result<String, GatewayError> {
    if let Some(err) = json.get("error") {
        return Err(GatewayError::Failure(format!("provider error: {}", err)));
    }
    let content = json["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("")
        .trim();
    if content.is_empty() {
        return Err(GatewayError::Failure("empty completion".to_string()));
    }
    Ok(content.to_string())
}

#[async_trait]
impl CompletionGateway for OpenRouterGateway {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<String, GatewayError> {
        alog_debug!(
            "OpenRouter request model={} messages={} max_tokens={}",
            request.model,
            request.context.len() + 1,
            request.max_tokens
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            result = self.send(request) => {
                if let Err(ref e) = result {
                    alog_warn!("OpenRouter request failed: {}", e);
                }
                result
            }
        }
    }
}

impl std::fmt::Debug for OpenRouterGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterGateway")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
