//! Error taxonomy for the consensus engine
//!
//! Provider failures are caught at the dispatch boundary and recorded as
//! [`ProviderFailureKind`] values; they never abort a run. The only error
//! that reaches the caller from a run is [`ConsensusError::InsufficientProviders`]
//! with zero successes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detect::DisagreementKind;
use crate::provider::ProviderId;

/// Result type alias for engine operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Errors raised by a provider adapter call
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Provider call timed out after {0}s")]
    Timeout(u64),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Context window exceeded: {0}")]
    ContextOverflow(String),

    #[error("Request failed: {0}")]
    Request(String),
}

impl ProviderError {
    /// Stable classification recorded in run metadata
    pub fn kind(&self) -> ProviderFailureKind {
        match self {
            Self::Timeout(_) => ProviderFailureKind::Timeout,
            Self::Auth(_) => ProviderFailureKind::Auth,
            Self::RateLimit(_) => ProviderFailureKind::RateLimit,
            Self::ModelNotFound(_) => ProviderFailureKind::ModelNotFound,
            Self::ContextOverflow(_) => ProviderFailureKind::ContextOverflow,
            Self::Request(_) => ProviderFailureKind::Request,
        }
    }
}

/// Serializable classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFailureKind {
    Timeout,
    Auth,
    RateLimit,
    ModelNotFound,
    ContextOverflow,
    Request,
}

impl std::fmt::Display for ProviderFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Auth => write!(f, "auth"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::ModelNotFound => write!(f, "model_not_found"),
            Self::ContextOverflow => write!(f, "context_overflow"),
            Self::Request => write!(f, "request"),
        }
    }
}

/// Engine-level errors
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Insufficient providers: {succeeded} of {attempted} succeeded")]
    InsufficientProviders { succeeded: usize, attempted: usize },

    #[error("Schema invalid for {provider} (repairable: {repairable}): {reason}")]
    SchemaInvalid {
        provider: ProviderId,
        repairable: bool,
        reason: String,
    },

    #[error("Adjudication incomplete for {kind} disagreement on '{item_key}': no valid rationale")]
    AdjudicationIncomplete {
        item_key: String,
        kind: DisagreementKind,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}
