//! Human-readable run summary and per-provider metrics

use serde::{Deserialize, Serialize};

use crate::align::AlignedResponse;
use crate::dispatch::ProviderFailure;
use crate::error::ProviderFailureKind;
use crate::fusion::FinalReconciledTakeoff;
use crate::provider::ProviderId;
use crate::recommend::{EngineRecommendation, RunObservation};

/// Lower bound of the high-confidence bucket
pub const HIGH_CONFIDENCE: f64 = 0.85;
/// Lower bound of the medium-confidence bucket
pub const MEDIUM_CONFIDENCE: f64 = 0.7;

/// How one provider fared in this run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetrics {
    pub provider: ProviderId,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub items: usize,
    pub repair_applied: bool,
    pub schema_valid: bool,
    pub partial_extraction: bool,
    pub disagreements: u64,
    pub wins: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ProviderFailureKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusReport {
    pub summary: Vec<String>,
    pub high_confidence_items: usize,
    pub medium_confidence_items: usize,
    pub low_confidence_items: usize,
    pub provider_metrics: Vec<ProviderMetrics>,
}

impl ConsensusReport {
    pub fn build(
        takeoff: &FinalReconciledTakeoff,
        responses: &[AlignedResponse],
        failures: &[ProviderFailure],
        observation: &RunObservation,
        recommendation: &EngineRecommendation,
    ) -> Self {
        let (mut high, mut medium, mut low) = (0, 0, 0);
        for item in &takeoff.items {
            match item.final_confidence {
                c if c >= HIGH_CONFIDENCE => high += 1,
                c if c >= MEDIUM_CONFIDENCE => medium += 1,
                _ => low += 1,
            }
        }

        let mut provider_metrics: Vec<ProviderMetrics> = responses
            .iter()
            .map(|r| {
                let seen = observation.providers.iter().find(|o| o.provider == r.provider);
                ProviderMetrics {
                    provider: r.provider,
                    succeeded: true,
                    latency_ms: Some(r.latency_ms),
                    items: r.items.len(),
                    repair_applied: r.repair_applied,
                    schema_valid: r.schema_valid,
                    partial_extraction: r.partial_extraction,
                    disagreements: seen.map_or(0, |o| o.disagreements),
                    wins: seen.map_or(0, |o| o.wins),
                    failure: None,
                }
            })
            .collect();
        provider_metrics.extend(failures.iter().map(|f| ProviderMetrics {
            provider: f.provider,
            succeeded: false,
            latency_ms: None,
            items: 0,
            repair_applied: false,
            schema_valid: false,
            partial_extraction: false,
            disagreements: 0,
            wins: 0,
            failure: Some(f.kind),
        }));

        let meta = &takeoff.metadata;
        let contributing = join(&meta.contributing_providers);
        let attempted = responses.len() + failures.len();
        let mut summary = vec![format!(
            "{} of {attempted} providers responded ({contributing})",
            responses.len()
        )];
        if meta.single_source {
            summary.push(format!(
                "Single-source result from {contributing}: no cross-provider verification was possible"
            ));
        }
        for failure in failures {
            summary.push(format!("{} failed ({}): {}", failure.provider, failure.kind, failure.message));
        }
        for response in responses.iter().filter(|r| r.repair_applied || !r.schema_valid) {
            let mut line = format!(
                "{} output needed repair ({}){}",
                response.provider,
                if response.repair_passes.is_empty() {
                    "no pass succeeded".to_string()
                } else {
                    response.repair_passes.join(" → ")
                },
                if response.schema_valid { "" } else { "; schema still invalid" }
            );
            if response.discarded_items > 0 {
                line.push_str(&format!("; {} items discarded", response.discarded_items));
            }
            summary.push(line);
        }
        summary.push(format!(
            "{} reconciled items, overall confidence {:.2}",
            meta.total_items, meta.overall_confidence
        ));
        summary.push(format!(
            "{} disagreements: {} resolved, {} unresolved",
            meta.disagreement_count, meta.resolved_conflicts, meta.unresolved_conflicts
        ));
        if meta.withheld_items > 0 {
            summary.push(format!(
                "{} items withheld below the agreement threshold",
                meta.withheld_items
            ));
        }
        let flagged = takeoff.items.iter().filter(|i| i.risk_flag).count();
        if flagged > 0 {
            summary.push(format!("{flagged} items risk-flagged for manual review"));
        }
        summary.extend(recommendation.notes.iter().cloned());

        Self {
            summary,
            high_confidence_items: high,
            medium_confidence_items: medium,
            low_confidence_items: low,
            provider_metrics,
        }
    }
}

fn join(providers: &[ProviderId]) -> String {
    providers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::detect::DisagreementDetector;
    use crate::fusion::{FusionContext, FusionEngine};
    use crate::recommend::PerformanceModel;
    use crate::types::{Category, TakeoffItem, TaskType, Unit};
    use chrono::{DateTime, Utc};

    fn fuse(responses: &[AlignedResponse], failures: &[ProviderFailure]) -> FinalReconciledTakeoff {
        let config = EngineConfig::default();
        let detection = DisagreementDetector::new(&config).detect(responses);
        let context = FusionContext {
            run_id: "run-1".into(),
            generated_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            task_type: TaskType::Takeoff,
            failures: failures.to_vec(),
            processing_time_ms: 5,
        };
        FusionEngine::new(&config).fuse(responses, &detection, &[], context)
    }

    fn recommendation(notes: &[&str]) -> EngineRecommendation {
        EngineRecommendation {
            primary: Some(ProviderId::Claude),
            secondaries: Vec::new(),
            hybrid: false,
            confidence: 0.9,
            scores: Vec::new(),
            notes: notes.iter().map(|n| n.to_string()).collect(),
            performance_model: PerformanceModel::new(),
        }
    }

    fn items(names: &[&str]) -> Vec<TakeoffItem> {
        names
            .iter()
            .map(|n| TakeoffItem::new(*n, 10.0, Unit::Ea, Category::Interior))
            .collect()
    }

    #[test]
    fn test_confidence_bucket_boundaries() {
        let responses = [AlignedResponse::from_items(
            ProviderId::Claude,
            items(&["Door", "Frame", "Hinge", "Closer"]),
        )];
        let mut takeoff = fuse(&responses, &[]);
        for (item, confidence) in takeoff.items.iter_mut().zip([0.85, 0.7, 0.69, 0.84]) {
            item.final_confidence = confidence;
        }

        let report = ConsensusReport::build(
            &takeoff,
            &responses,
            &[],
            &RunObservation::default(),
            &recommendation(&[]),
        );
        assert_eq!(report.high_confidence_items, 1);
        assert_eq!(report.medium_confidence_items, 2);
        assert_eq!(report.low_confidence_items, 1);
    }

    #[test]
    fn test_summary_names_single_source_and_failure() {
        let responses = [AlignedResponse::from_items(ProviderId::Gemini, items(&["Door"]))];
        let failures = [ProviderFailure {
            provider: ProviderId::Grok,
            kind: ProviderFailureKind::Timeout,
            message: "no response after 60s".into(),
        }];
        let takeoff = fuse(&responses, &failures);

        let report = ConsensusReport::build(
            &takeoff,
            &responses,
            &failures,
            &RunObservation::default(),
            &recommendation(&["Use gemini as primary"]),
        );
        assert_eq!(report.summary[0], "1 of 2 providers responded (gemini)");
        assert!(report.summary[1].starts_with("Single-source result from gemini"));
        assert_eq!(report.summary[2], "grok failed (timeout): no response after 60s");
        assert_eq!(report.summary.last().map(String::as_str), Some("Use gemini as primary"));

        let grok = report
            .provider_metrics
            .iter()
            .find(|m| m.provider == ProviderId::Grok)
            .unwrap();
        assert!(!grok.succeeded);
        assert_eq!(grok.failure, Some(ProviderFailureKind::Timeout));
    }

    #[test]
    fn test_summary_describes_repairs() {
        let mut repaired = AlignedResponse::from_items(ProviderId::Claude, items(&["Door"]));
        repaired.repair_applied = true;
        repaired.repair_passes = vec!["isolate_payload".into(), "balance_brackets".into()];
        repaired.discarded_items = 1;
        let mut invalid = AlignedResponse::empty(ProviderId::Gpt, "no json");
        invalid.repair_applied = true;
        let responses = [repaired, invalid];
        let takeoff = fuse(&responses, &[]);

        let report = ConsensusReport::build(
            &takeoff,
            &responses,
            &[],
            &RunObservation::default(),
            &recommendation(&[]),
        );
        assert!(!takeoff.metadata.single_source);
        assert!(report.summary.contains(
            &"claude output needed repair (isolate_payload → balance_brackets); 1 items discarded"
                .to_string()
        ));
        assert!(report
            .summary
            .contains(&"gpt output needed repair (no pass succeeded); schema still invalid".to_string()));
        assert!(report
            .summary
            .iter()
            .any(|line| line.starts_with("1 reconciled items")));
    }
}
