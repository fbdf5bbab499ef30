//! Performance-based provider recommendation
//!
//! [`PerformanceModel`] is an immutable value: observing a run returns a new
//! model and never mutates the old one. Callers persist it between runs if
//! they want history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::adjudicate::Verdict;
use crate::align::AlignedResponse;
use crate::config::EngineConfig;
use crate::detect::DetectionReport;
use crate::dispatch::ProviderFailure;
use crate::provider::ProviderId;

const ACCURACY_WEIGHT: f64 = 0.4;
const EVIDENCE_WEIGHT: f64 = 0.3;
const CONSISTENCY_WEIGHT: f64 = 0.2;
const RELIABILITY_WEIGHT: f64 = 0.1;

/// Context window at which a provider counts as large-context
pub const LARGE_CONTEXT_TOKENS: u32 = 1_000_000;

/// Cumulative statistics for one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderStats {
    pub runs: u64,
    pub disagreements: u64,
    pub wins: u64,
    /// Sum of the winning rationale's evidence score over all wins
    pub evidence_on_wins: f64,
    /// Sum of evidence over every rationale the provider contributed
    pub rationale_evidence: f64,
    pub rationales: u64,
    /// Responses that needed at least one repair pass
    pub repaired_responses: u64,
    /// Responses that failed outright or never became schema-valid
    pub invalid_responses: u64,
    /// Responses that were repaired or invalid
    pub error_responses: u64,
    pub items: u64,
}

impl ProviderStats {
    /// Wins over disagreements; 0.5 with no disagreements on record
    pub fn accuracy(&self) -> f64 {
        if self.disagreements == 0 {
            return 0.5;
        }
        self.wins as f64 / self.disagreements as f64
    }

    pub fn evidence(&self) -> f64 {
        if self.wins > 0 {
            self.evidence_on_wins / self.wins as f64
        } else if self.rationales > 0 {
            self.rationale_evidence / self.rationales as f64
        } else {
            0.5
        }
    }

    /// `1 - 0.3 * repaired ratio - 0.7 * invalid ratio`
    pub fn consistency(&self) -> f64 {
        if self.runs == 0 {
            return 1.0;
        }
        let runs = self.runs as f64;
        let repaired = self.repaired_responses as f64 / runs;
        let invalid = self.invalid_responses as f64 / runs;
        (1.0 - repaired * 0.3 - invalid * 0.7).clamp(0.0, 1.0)
    }

    /// Repaired-or-failed responses per item
    pub fn error_rate(&self) -> f64 {
        if self.items == 0 {
            return if self.error_responses > 0 { 1.0 } else { 0.0 };
        }
        (self.error_responses as f64 / self.items as f64).min(1.0)
    }
}

/// What one provider did in one run
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderObservation {
    pub provider: ProviderId,
    pub disagreements: u64,
    pub wins: u64,
    pub evidence_on_wins: f64,
    pub rationale_evidence: f64,
    pub rationales: u64,
    pub repaired: bool,
    pub invalid: bool,
    pub items: u64,
}

impl ProviderObservation {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            disagreements: 0,
            wins: 0,
            evidence_on_wins: 0.0,
            rationale_evidence: 0.0,
            rationales: 0,
            repaired: false,
            invalid: false,
            items: 0,
        }
    }
}

/// Per-provider facts from one run, in dispatch order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunObservation {
    pub providers: Vec<ProviderObservation>,
}

impl RunObservation {
    /// Collect observations from a finished run. `verdicts` is parallel to
    /// `detection.disagreements`.
    pub fn from_run(
        responses: &[AlignedResponse],
        failures: &[ProviderFailure],
        detection: &DetectionReport,
        verdicts: &[Verdict],
    ) -> Self {
        let mut providers: Vec<ProviderObservation> = responses
            .iter()
            .map(|r| ProviderObservation {
                repaired: r.repair_applied,
                invalid: !r.schema_valid,
                items: r.items.len() as u64,
                ..ProviderObservation::new(r.provider)
            })
            .collect();

        for observation in providers.iter_mut() {
            let id = observation.provider;
            observation.disagreements = detection
                .disagreements
                .iter()
                .filter(|d| d.providers.contains(&id))
                .count() as u64;

            for verdict in verdicts {
                let rationales = match verdict {
                    Verdict::Resolved(result) => {
                        if result.winner_provider == id {
                            observation.wins += 1;
                            observation.evidence_on_wins += result
                                .rationales
                                .iter()
                                .find(|r| r.provider == id)
                                .map_or(0.0, |r| r.evidence_score);
                        }
                        &result.rationales
                    }
                    Verdict::Unresolved { rationales, .. } => rationales,
                };
                for rationale in rationales.iter().filter(|r| r.provider == id) {
                    observation.rationale_evidence += rationale.evidence_score;
                    observation.rationales += 1;
                }
            }
        }

        providers.extend(failures.iter().map(|f| ProviderObservation {
            invalid: true,
            ..ProviderObservation::new(f.provider)
        }));

        Self { providers }
    }
}

/// Immutable per-provider performance history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceModel {
    pub providers: BTreeMap<ProviderId, ProviderStats>,
}

impl PerformanceModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self, provider: ProviderId) -> Option<&ProviderStats> {
        self.providers.get(&provider)
    }

    /// A new model with `observation` folded in.
    pub fn observe(&self, observation: &RunObservation) -> PerformanceModel {
        let mut next = self.clone();
        for seen in &observation.providers {
            let stats = next.providers.entry(seen.provider).or_default();
            stats.runs += 1;
            stats.disagreements += seen.disagreements;
            stats.wins += seen.wins;
            stats.evidence_on_wins += seen.evidence_on_wins;
            stats.rationale_evidence += seen.rationale_evidence;
            stats.rationales += seen.rationales;
            stats.items += seen.items;
            if seen.repaired {
                stats.repaired_responses += 1;
            }
            if seen.invalid {
                stats.invalid_responses += 1;
            }
            if seen.repaired || seen.invalid {
                stats.error_responses += 1;
            }
        }
        next
    }
}

/// Component and composite scores for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderScore {
    pub provider: ProviderId,
    pub accuracy: f64,
    pub evidence: f64,
    pub consistency: f64,
    pub error_rate: f64,
    pub composite: f64,
}

impl ProviderScore {
    pub fn from_stats(provider: ProviderId, stats: &ProviderStats) -> Self {
        let (accuracy, evidence, consistency, error_rate) = (
            stats.accuracy(),
            stats.evidence(),
            stats.consistency(),
            stats.error_rate(),
        );
        Self {
            provider,
            accuracy,
            evidence,
            consistency,
            error_rate,
            composite: ACCURACY_WEIGHT * accuracy
                + EVIDENCE_WEIGHT * evidence
                + CONSISTENCY_WEIGHT * consistency
                + RELIABILITY_WEIGHT * (1.0 - error_rate),
        }
    }
}

/// Suggested provider selection for future runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRecommendation {
    pub primary: Option<ProviderId>,
    /// Supporting providers, best first; only set for a hybrid
    pub secondaries: Vec<ProviderId>,
    /// No single provider cleared the confidence threshold
    pub hybrid: bool,
    /// Composite score of the primary
    pub confidence: f64,
    pub scores: Vec<ProviderScore>,
    pub notes: Vec<String>,
    /// History including this run
    pub performance_model: PerformanceModel,
}

/// Ranks providers from a [`PerformanceModel`]
#[derive(Debug, Clone)]
pub struct Recommender {
    threshold: f64,
    large_volume_items: usize,
}

impl Recommender {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            threshold: config.recommendation_threshold,
            large_volume_items: config.large_volume_items,
        }
    }

    /// Rank `candidates` (dispatch order breaks score ties).
    pub fn recommend(
        &self,
        model: PerformanceModel,
        candidates: &[ProviderId],
        total_items: usize,
    ) -> EngineRecommendation {
        let default_stats = ProviderStats::default();
        let mut scores: Vec<ProviderScore> = candidates
            .iter()
            .map(|id| ProviderScore::from_stats(*id, model.stats(*id).unwrap_or(&default_stats)))
            .collect();
        // stable: equal composites keep dispatch order
        scores.sort_by(|a, b| b.composite.total_cmp(&a.composite));

        let primary = scores.first().map(|s| s.provider);
        let confidence = scores.first().map_or(0.0, |s| s.composite);
        let hybrid = primary.is_some() && confidence < self.threshold;
        let secondaries: Vec<ProviderId> = if hybrid {
            scores.iter().skip(1).map(|s| s.provider).collect()
        } else {
            Vec::new()
        };

        let mut notes = Vec::new();
        if let Some(primary) = primary {
            if hybrid {
                notes.push(format!(
                    "No provider reached the {:.2} confidence threshold (best: {primary} at {confidence:.2}); use a hybrid of {primary} with secondaries and review risk-flagged items",
                    self.threshold
                ));
            } else {
                notes.push(format!(
                    "{primary} recommended as primary provider (score {confidence:.2})"
                ));
            }
        }
        if total_items > self.large_volume_items {
            let large: Vec<String> = ProviderId::all()
                .iter()
                .filter(|p| p.context_window() >= LARGE_CONTEXT_TOKENS)
                .map(ToString::to_string)
                .collect();
            notes.push(format!(
                "Large takeoff ({total_items} items): prefer large-context providers ({})",
                large.join(", ")
            ));
        }

        info!(
            primary = ?primary,
            hybrid,
            confidence,
            "Provider recommendation computed"
        );

        EngineRecommendation {
            primary,
            secondaries,
            hybrid,
            confidence,
            scores,
            notes,
            performance_model: model,
        }
    }
}
