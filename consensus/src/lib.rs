//! Takeoff Consensus Library
//!
//! Multi-provider consensus and adjudication for construction plan
//! takeoffs. One normalized plan payload is sent to several independent
//! analysis providers; their (often malformed, often disagreeing) outputs
//! are reconciled into a single explainable takeoff.
//!
//! # Pipeline
//!
//! ```text
//! Dispatcher → Schema Aligner → Disagreement Detector → Rationale Builder
//!            → Adjudicator → Fusion Engine → Recommendation → caller
//! ```
//!
//! - [`dispatch`]: concurrent fan-out with per-call timeouts
//! - [`align`]: direct parse, ordered repair passes, partial extraction
//! - [`detect`]: cross-provider grouping and per-unit tolerance checks
//! - [`rationale`]: evidence and consistency scoring
//! - [`adjudicate`]: deterministic winner selection
//! - [`fusion`]: the reconciled item list, issues and quality analysis
//! - [`recommend`]: immutable performance model and provider ranking
//!
//! The library performs no network I/O of its own. Vendor access is
//! injected through [`provider::ProviderAdapter`], and no state survives a
//! run except the [`recommend::PerformanceModel`] value handed back to the
//! caller.

pub mod adjudicate;
pub mod align;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod fusion;
pub mod orchestrator;
pub mod provider;
pub mod rationale;
pub mod recommend;
pub mod report;
pub mod types;

pub use config::{EngineConfig, FusionPolicy};
pub use error::{ConsensusError, ConsensusResult, ProviderError, ProviderFailureKind};
pub use fusion::{AdjudicatedBy, FinalReconciledTakeoff, ReconciledItem};
pub use orchestrator::{Orchestrator, OrchestratorResult};
pub use provider::{Provider, ProviderAdapter, ProviderId, ProviderReply, ProviderRequest};
pub use recommend::{EngineRecommendation, PerformanceModel};
pub use types::{
    Category, NormalizedInput, QualityAnalysis, QualityIssue, TakeoffItem, TaskType, Unit,
};
