//! Worker pool for completion requests.
//!
//! Each dispatched turn runs as its own tokio task, gated by a semaphore so
//! at most `capacity` requests hit the gateway at once. Results are sent back
//! to the runtime loop as [`TurnOutcome`] messages; the pool never touches
//! conversation state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::agent::AgentId;
use crate::gateway::{CompletionGateway, CompletionRequest, GatewayError};
use crate::roles::PromptSource;
use crate::sanitize::sanitize_reply;
use crate::util::blocking_with_timeout;
use crate::{alog_debug, alog_trace};

use super::scheduler::TurnRequest;

/// A finished request, tagged with the epoch it was dispatched under.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub epoch: u64,
    pub agent_id: AgentId,
    pub result: Result<String, GatewayError>,
}

pub struct WorkerPool {
    gateway: Arc<dyn CompletionGateway>,
    prompts: Arc<dyn PromptSource>,
    permits: Arc<Semaphore>,
    request_timeout: Duration,
    result_tx: mpsc::UnboundedSender<TurnOutcome>,
}

impl WorkerPool {
    pub fn new(
        gateway: Arc<dyn CompletionGateway>,
        prompts: Arc<dyn PromptSource>,
        capacity: usize,
        request_timeout: Duration,
        result_tx: mpsc::UnboundedSender<TurnOutcome>,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            gateway,
            prompts,
            permits: Arc::new(Semaphore::new(capacity)),
            request_timeout,
            result_tx,
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `request` in the background. The returned token cancels it.
    pub fn submit(&self, request: TurnRequest) -> CancellationToken {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let gateway = self.gateway.clone();
        let prompts = self.prompts.clone();
        let permits = self.permits.clone();
        let timeout = self.request_timeout;
        let tx = self.result_tx.clone();

        alog_debug!(
            "WorkerPool::submit epoch={} agent={} available={}",
            request.epoch,
            request.agent_id,
            self.available()
        );

        tokio::spawn(async move {
            let epoch = request.epoch;
            let agent_id = request.agent_id.clone();
            let result = run_turn(gateway, prompts, permits, timeout, request, token).await;
            alog_trace!("Worker finished epoch={} ok={}", epoch, result.is_ok());
            let _ = tx.send(TurnOutcome {
                epoch,
                agent_id,
                result,
            });
        });

        cancel
    }
}

async fn run_turn(
    gateway: Arc<dyn CompletionGateway>,
    prompts: Arc<dyn PromptSource>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    request: TurnRequest,
    cancel: CancellationToken,
) -> Result<String, GatewayError> {
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
        permit = permits.acquire_owned() => permit
            .map_err(|_| GatewayError::Failure("worker pool closed".to_string()))?,
    };

    let handle = request.prompt.clone();
    let system_prompt = blocking_with_timeout(timeout, move || prompts.resolve(&handle))
        .await
        .map_err(|e| GatewayError::Failure(format!("prompt resolution failed: {}", e)))?;

    let completion = CompletionRequest {
        system_prompt,
        context: request.context,
        model: request.params.model,
        temperature: request.params.temperature,
        max_tokens: request.params.max_tokens,
        timeout,
    };

    let text = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
        result = tokio::time::timeout(timeout, gateway.complete(&completion, cancel.clone())) => {
            match result {
                Ok(inner) => inner?,
                Err(_) => return Err(GatewayError::Timeout(timeout)),
            }
        }
    };

    let cleaned = sanitize_reply(&text);
    if cleaned.is_empty() {
        return Err(GatewayError::Failure(
            "reply was empty after sanitising".to_string(),
        ));
    }
    Ok(cleaned)
}
