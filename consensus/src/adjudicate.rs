//! Per-disagreement winner selection
//!
//! Every valid rationale is scored as
//! `evidence_weight * evidence + consistency_weight * consistency`
//! (0.6 / 0.4 by default). The highest score wins. Scores within
//! [`TIE_EPSILON`] of each other are a tie, and a tie goes to the provider
//! that comes first in dispatch order, which is the order of the
//! disagreement's provider list. Map iteration order never decides a
//! winner.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ScoringConfig;
use crate::detect::{Disagreement, DisagreementKind, DisputedValue};
use crate::error::{ConsensusError, ConsensusResult};
use crate::provider::ProviderId;
use crate::rationale::ModelRationale;

/// Scores closer than this are treated as equal
pub const TIE_EPSILON: f64 = 1e-9;

/// The authoritative value chosen for one disagreement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjudicationResult {
    pub kind: DisagreementKind,
    pub item_key: String,
    /// Always a member of the disagreement's provider set
    pub winner_provider: ProviderId,
    pub winner_value: DisputedValue,
    /// The winner's combined score
    pub confidence: f64,
    /// The winner's rationale text
    pub reasoning: String,
    /// Combined score per provider
    pub scores: BTreeMap<ProviderId, f64>,
    /// Whether dispatch order decided between equal scores
    #[serde(default)]
    pub tie_broken: bool,
    /// Every contributing rationale, valid or not
    pub rationales: Vec<ModelRationale>,
}

/// What adjudication concluded about one disagreement
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Resolved(AdjudicationResult),
    Unresolved {
        reason: String,
        rationales: Vec<ModelRationale>,
    },
}

impl Verdict {
    pub fn resolved(&self) -> Option<&AdjudicationResult> {
        match self {
            Verdict::Resolved(result) => Some(result),
            Verdict::Unresolved { .. } => None,
        }
    }
}

/// Picks winners from scored rationales
#[derive(Debug, Clone)]
pub struct Adjudicator {
    evidence_weight: f64,
    consistency_weight: f64,
}

impl Adjudicator {
    pub fn new(scoring: &ScoringConfig) -> Self {
        Self {
            evidence_weight: scoring.evidence_weight,
            consistency_weight: scoring.consistency_weight,
        }
    }

    /// Combined score for one rationale
    pub fn score(&self, rationale: &ModelRationale) -> f64 {
        self.evidence_weight * rationale.evidence_score
            + self.consistency_weight * rationale.consistency_score
    }

    /// Choose a winner among `rationales` for `disagreement`.
    ///
    /// Rationales from providers outside the disagreement and invalid
    /// rationales are never eligible. With no eligible rationale the result
    /// is [`ConsensusError::AdjudicationIncomplete`].
    pub fn adjudicate(
        &self,
        disagreement: &Disagreement,
        rationales: &[ModelRationale],
    ) -> ConsensusResult<AdjudicationResult> {
        let scores: BTreeMap<ProviderId, f64> =
            rationales.iter().map(|r| (r.provider, self.score(r))).collect();

        let mut best: Option<(&ModelRationale, f64)> = None;
        let mut tie_broken = false;

        for provider in &disagreement.providers {
            let Some(candidate) = rationales
                .iter()
                .find(|r| r.provider == *provider && r.valid)
            else {
                continue;
            };
            let score = self.score(candidate);
            match best {
                None => best = Some((candidate, score)),
                Some((_, best_score)) if score > best_score + TIE_EPSILON => {
                    best = Some((candidate, score));
                    tie_broken = false;
                }
                Some((_, best_score)) if (score - best_score).abs() <= TIE_EPSILON => {
                    tie_broken = true;
                }
                Some(_) => {}
            }
        }

        let Some((winner, confidence)) = best else {
            return Err(ConsensusError::AdjudicationIncomplete {
                item_key: disagreement.item_key.clone(),
                kind: disagreement.kind,
            });
        };

        info!(
            item_key = %disagreement.item_key,
            kind = %disagreement.kind,
            winner = %winner.provider,
            confidence,
            tie_broken,
            "Disagreement adjudicated"
        );

        Ok(AdjudicationResult {
            kind: disagreement.kind,
            item_key: disagreement.item_key.clone(),
            winner_provider: winner.provider,
            winner_value: winner.value.clone(),
            confidence,
            reasoning: winner.rationale.clone(),
            scores,
            tie_broken,
            rationales: rationales.to_vec(),
        })
    }

    /// Adjudicate and fold the outcome into a [`Verdict`].
    pub fn verdict(&self, disagreement: &Disagreement, rationales: Vec<ModelRationale>) -> Verdict {
        match self.adjudicate(disagreement, &rationales) {
            Ok(result) => Verdict::Resolved(result),
            Err(e) => Verdict::Unresolved {
                reason: e.to_string(),
                rationales,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Unit;

    fn disagreement(providers: Vec<ProviderId>) -> Disagreement {
        Disagreement {
            kind: DisagreementKind::Quantity,
            item_key: "drywall|finishes|".into(),
            values: providers
                .iter()
                .enumerate()
                .map(|(i, p)| (*p, DisputedValue::Number(500.0 + 20.0 * i as f64)))
                .collect(),
            providers,
            tolerance_violated: true,
            deviation: Some(0.04),
            evidence_strength: BTreeMap::new(),
            group: 0,
        }
    }

    fn rationale(provider: ProviderId, quantity: f64, evidence: f64, consistency: f64) -> ModelRationale {
        ModelRationale {
            provider,
            item_key: "drywall|finishes|".into(),
            kind: DisagreementKind::Quantity,
            value: DisputedValue::Number(quantity),
            quantity,
            unit: Unit::Sf,
            rationale: format!("{provider} says {quantity}"),
            citations: vec![],
            evidence_score: evidence,
            consistency_score: consistency,
            valid: quantity > 0.0,
        }
    }

    fn adjudicator() -> Adjudicator {
        Adjudicator::new(&ScoringConfig::default())
    }

    #[test]
    fn test_higher_evidence_wins_regardless_of_order() {
        let d = disagreement(vec![ProviderId::Claude, ProviderId::Gpt]);
        let result = adjudicator()
            .adjudicate(
                &d,
                &[
                    rationale(ProviderId::Claude, 500.0, 0.5, 1.0),
                    rationale(ProviderId::Gpt, 520.0, 0.8, 1.0),
                ],
            )
            .unwrap();
        assert_eq!(result.winner_provider, ProviderId::Gpt);
        assert_eq!(result.winner_value, DisputedValue::Number(520.0));
        assert!((result.confidence - 0.88).abs() < 1e-9);
        assert_eq!(result.reasoning, "gpt says 520");
        assert_eq!(result.rationales.len(), 2);
        assert!(!result.tie_broken);
    }

    #[test]
    fn test_tie_goes_to_first_in_dispatch_order() {
        // Gpt dispatched before Claude: enum order must not matter
        let d = disagreement(vec![ProviderId::Gpt, ProviderId::Claude]);
        let result = adjudicator()
            .adjudicate(
                &d,
                &[
                    rationale(ProviderId::Claude, 500.0, 0.7, 1.0),
                    rationale(ProviderId::Gpt, 520.0, 0.7, 1.0),
                ],
            )
            .unwrap();
        assert_eq!(result.winner_provider, ProviderId::Gpt);
        assert!(result.tie_broken);

        let reversed = disagreement(vec![ProviderId::Claude, ProviderId::Gpt]);
        let result = adjudicator()
            .adjudicate(
                &reversed,
                &[
                    rationale(ProviderId::Gpt, 520.0, 0.7, 1.0),
                    rationale(ProviderId::Claude, 500.0, 0.7, 1.0),
                ],
            )
            .unwrap();
        assert_eq!(result.winner_provider, ProviderId::Claude);
    }

    #[test]
    fn test_consistency_breaks_equal_evidence() {
        let d = disagreement(vec![ProviderId::Claude, ProviderId::Gemini]);
        let result = adjudicator()
            .adjudicate(
                &d,
                &[
                    rationale(ProviderId::Claude, 500.0, 0.7, 0.9),
                    rationale(ProviderId::Gemini, 520.0, 0.7, 1.0),
                ],
            )
            .unwrap();
        assert_eq!(result.winner_provider, ProviderId::Gemini);
    }

    #[test]
    fn test_invalid_rationale_cannot_win() {
        let d = disagreement(vec![ProviderId::Claude, ProviderId::Gpt]);
        let result = adjudicator()
            .adjudicate(
                &d,
                &[
                    rationale(ProviderId::Claude, 0.0, 1.0, 1.0),
                    rationale(ProviderId::Gpt, 520.0, 0.5, 0.9),
                ],
            )
            .unwrap();
        assert_eq!(result.winner_provider, ProviderId::Gpt);
    }

    #[test]
    fn test_no_valid_rationale_is_incomplete() {
        let d = disagreement(vec![ProviderId::Claude, ProviderId::Gpt]);
        let rationales = vec![
            rationale(ProviderId::Claude, 0.0, 0.9, 1.0),
            rationale(ProviderId::Gpt, 0.0, 0.9, 1.0),
        ];
        let err = adjudicator().adjudicate(&d, &rationales).unwrap_err();
        assert!(matches!(
            err,
            ConsensusError::AdjudicationIncomplete {
                kind: DisagreementKind::Quantity,
                ..
            }
        ));

        let verdict = adjudicator().verdict(&d, rationales);
        assert!(verdict.resolved().is_none());
    }

    #[test]
    fn test_winner_is_always_a_member() {
        let d = disagreement(vec![ProviderId::Claude, ProviderId::Gpt]);
        // a stray rationale from a non-member must be ignored
        let result = adjudicator()
            .adjudicate(
                &d,
                &[
                    rationale(ProviderId::Grok, 600.0, 1.0, 1.0),
                    rationale(ProviderId::Claude, 500.0, 0.5, 1.0),
                    rationale(ProviderId::Gpt, 520.0, 0.5, 1.0),
                ],
            )
            .unwrap();
        assert!(d.providers.contains(&result.winner_provider));
        assert_eq!(result.winner_provider, ProviderId::Claude);
    }
}
