//! Provider identities and the injected call capability
//!
//! The engine never talks to a vendor API itself. Callers hand it an ordered
//! list of [`Provider`] values, each pairing a closed [`ProviderId`] with an
//! adapter implementing [`ProviderAdapter`]. The order of that list is the
//! canonical dispatch order used for every deterministic tie-break.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Closed set of analysis providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    /// Anthropic Claude
    Claude,
    /// OpenAI GPT
    Gpt,
    /// Google Gemini
    Gemini,
    /// xAI Grok
    Grok,
}

impl ProviderId {
    /// Default model requested from this provider
    pub fn model_id(&self) -> &'static str {
        match self {
            ProviderId::Claude => "claude-sonnet-4-5",
            ProviderId::Gpt => "gpt-4.1",
            ProviderId::Gemini => "gemini-2.5-pro",
            ProviderId::Grok => "grok-4",
        }
    }

    /// Whether plan page images can be attached to requests
    pub fn supports_vision(&self) -> bool {
        match self {
            ProviderId::Claude | ProviderId::Gpt | ProviderId::Gemini => true,
            ProviderId::Grok => false,
        }
    }

    /// Context window in tokens
    pub fn context_window(&self) -> u32 {
        match self {
            ProviderId::Claude => 200_000,
            ProviderId::Gpt => 1_000_000,
            ProviderId::Gemini => 1_000_000,
            ProviderId::Grok => 256_000,
        }
    }

    /// All providers in canonical order
    pub fn all() -> &'static [ProviderId] {
        &[
            ProviderId::Claude,
            ProviderId::Gpt,
            ProviderId::Gemini,
            ProviderId::Grok,
        ]
    }

    /// Parse a provider name as written on the command line or in file names.
    pub fn parse(raw: &str) -> Option<ProviderId> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Some(ProviderId::Claude),
            "gpt" | "openai" => Some(ProviderId::Gpt),
            "gemini" | "google" => Some(ProviderId::Gemini),
            "grok" | "xai" => Some(ProviderId::Grok),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderId::Claude => write!(f, "claude"),
            ProviderId::Gpt => write!(f, "gpt"),
            ProviderId::Gemini => write!(f, "gemini"),
            ProviderId::Grok => write!(f, "grok"),
        }
    }
}

/// One call's worth of prompt material
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// Page image references; empty for providers without vision
    pub images: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// What an adapter returns on success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderReply {
    pub content: String,
    pub finish_reason: String,
    pub tokens_used: Option<u32>,
}

impl ProviderReply {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: "stop".to_string(),
            tokens_used: None,
        }
    }
}

/// Vendor-specific call capability, implemented outside the engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Perform one completion call
    async fn call(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderError>;
}

/// A provider identity bound to its adapter
#[derive(Clone)]
pub struct Provider {
    id: ProviderId,
    adapter: Arc<dyn ProviderAdapter>,
}

impl Provider {
    pub fn new(id: ProviderId, adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self { id, adapter }
    }

    pub fn id(&self) -> ProviderId {
        self.id
    }

    pub fn model_id(&self) -> &'static str {
        self.id.model_id()
    }

    pub fn supports_vision(&self) -> bool {
        self.id.supports_vision()
    }

    pub async fn call(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderError> {
        self.adapter.call(request).await
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("model", &self.model_id())
            .finish()
    }
}
