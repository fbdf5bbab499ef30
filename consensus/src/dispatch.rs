//! Provider fan-out with per-call timeouts
//!
//! One task per enabled provider is spawned on a [`JoinSet`]. Each task owns
//! its own response slot and is bounded by its own timeout, so a slow or
//! failing provider never affects its siblings. The dispatcher waits for
//! every task to settle before returning; there is no first-N short-circuit
//! and no retry.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::error::{ProviderError, ProviderFailureKind};
use crate::provider::{Provider, ProviderId, ProviderRequest};
use crate::types::{NormalizedInput, TaskType};

/// Raw output of one provider call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    pub provider: ProviderId,
    pub raw_text: String,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderFailure>,
}

impl ProviderResponse {
    /// A successful response carrying raw text
    pub fn success(provider: ProviderId, raw_text: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            provider,
            raw_text: raw_text.into(),
            latency_ms,
            finish_reason: None,
            tokens_used: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Record of a provider call that did not produce text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub kind: ProviderFailureKind,
    pub message: String,
}

impl ProviderFailure {
    fn from_error(provider: ProviderId, error: &ProviderError) -> Self {
        Self {
            provider,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Everything a dispatch round produced, in dispatch order
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    /// Successful responses
    pub responses: Vec<ProviderResponse>,
    /// Failed calls
    pub failures: Vec<ProviderFailure>,
    /// Number of providers called
    pub attempted: usize,
}

impl DispatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.responses.len()
    }

    /// Adjudication needs at least two independent sources
    pub fn can_adjudicate(&self) -> bool {
        self.responses.len() >= 2
    }
}

/// Fans identical work out to every provider
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    /// Timeout applied to every call for this input
    pub fn timeout_for(&self, input: &NormalizedInput) -> Duration {
        self.config.timeout_for(input.size_bytes())
    }

    /// Build the request sent to one provider.
    ///
    /// Every provider receives the same text; image references are only
    /// attached for vision-capable providers.
    pub fn build_request(
        &self,
        provider: &Provider,
        input: &NormalizedInput,
        system_prompt: &str,
        task_type: TaskType,
    ) -> ProviderRequest {
        let images = if provider.supports_vision() {
            input.image_refs()
        } else {
            Vec::new()
        };
        ProviderRequest {
            system_prompt: system_prompt.to_string(),
            user_prompt: render_user_prompt(input, task_type),
            images,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }

    /// Call every provider concurrently and wait for all of them to settle.
    pub async fn dispatch(
        &self,
        providers: &[Provider],
        input: &NormalizedInput,
        system_prompt: &str,
        task_type: TaskType,
    ) -> DispatchOutcome {
        let timeout = self.timeout_for(input);
        info!(
            providers = providers.len(),
            timeout_secs = timeout.as_secs(),
            %task_type,
            "Dispatching to providers"
        );

        let mut join_set: JoinSet<(usize, Result<ProviderResponse, ProviderFailure>)> =
            JoinSet::new();

        for (index, provider) in providers.iter().enumerate() {
            let provider = provider.clone();
            let request = self.build_request(&provider, input, system_prompt, task_type);

            join_set.spawn(async move {
                let id = provider.id();
                let start = Instant::now();
                let result = match tokio::time::timeout(timeout, provider.call(&request)).await {
                    Ok(Ok(reply)) => Ok(ProviderResponse {
                        provider: id,
                        raw_text: reply.content,
                        latency_ms: start.elapsed().as_millis() as u64,
                        finish_reason: Some(reply.finish_reason),
                        tokens_used: reply.tokens_used,
                        error: None,
                    }),
                    Ok(Err(e)) => Err(ProviderFailure::from_error(id, &e)),
                    Err(_) => Err(ProviderFailure::from_error(
                        id,
                        &ProviderError::Timeout(timeout.as_secs()),
                    )),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<ProviderResponse, ProviderFailure>>> =
            vec![None; providers.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    match &result {
                        Ok(response) => debug!(
                            provider = %response.provider,
                            latency_ms = response.latency_ms,
                            bytes = response.raw_text.len(),
                            "Provider responded"
                        ),
                        Err(failure) => warn!(
                            provider = %failure.provider,
                            kind = %failure.kind,
                            error = %failure.message,
                            "Provider call failed"
                        ),
                    }
                    slots[index] = Some(result);
                }
                Err(e) => {
                    warn!(error = %e, "Provider task aborted");
                }
            }
        }

        let mut outcome = DispatchOutcome {
            attempted: providers.len(),
            ..Default::default()
        };
        for (slot, provider) in slots.into_iter().zip(providers) {
            match slot {
                Some(Ok(response)) => outcome.responses.push(response),
                Some(Err(failure)) => outcome.failures.push(failure),
                None => outcome.failures.push(ProviderFailure {
                    provider: provider.id(),
                    kind: ProviderFailureKind::Request,
                    message: "provider task aborted before completing".to_string(),
                }),
            }
        }

        info!(
            succeeded = outcome.succeeded(),
            failed = outcome.failures.len(),
            "Dispatch complete"
        );
        outcome
    }
}

/// Render the shared user prompt: a one-line task instruction followed by
/// the normalized input as pretty JSON.
pub fn render_user_prompt(input: &NormalizedInput, task_type: TaskType) -> String {
    let payload = serde_json::to_string_pretty(input).unwrap_or_default();
    format!("{}\n\n{}", task_type.instruction(), payload)
}
