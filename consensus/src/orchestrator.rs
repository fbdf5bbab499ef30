//! Engine entry point
//!
//! [`Orchestrator::orchestrate`] runs the whole pipeline for one request:
//! dispatch, schema alignment, disagreement detection, rationale building,
//! adjudication, fusion and recommendation. Only dispatch suspends; every
//! later stage is pure and runs sequentially on the collected responses.

use std::collections::HashSet;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::adjudicate::{Adjudicator, Verdict};
use crate::align::{AlignedResponse, SchemaAligner};
use crate::config::EngineConfig;
use crate::detect::{DetectionReport, DisagreementDetector};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::{ConsensusError, ConsensusResult};
use crate::fusion::{FinalReconciledTakeoff, FusionContext, FusionEngine};
use crate::provider::{Provider, ProviderId};
use crate::rationale::RationaleBuilder;
use crate::recommend::{EngineRecommendation, PerformanceModel, Recommender, RunObservation};
use crate::report::ConsensusReport;
use crate::types::{NormalizedInput, TaskType};

/// Everything one run hands back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorResult {
    pub consensus_report: ConsensusReport,
    pub final_json: FinalReconciledTakeoff,
    pub engine_recommendation: EngineRecommendation,
}

/// Runs the consensus pipeline over an injected, ordered provider list
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: EngineConfig,
    providers: Vec<Provider>,
    dispatcher: Dispatcher,
}

impl Orchestrator {
    /// Build an orchestrator. The provider order is the canonical dispatch
    /// order; duplicate provider ids are rejected.
    pub fn new(config: EngineConfig, providers: Vec<Provider>) -> ConsensusResult<Self> {
        config.validate()?;
        let mut seen = HashSet::new();
        for provider in &providers {
            if !seen.insert(provider.id()) {
                return Err(ConsensusError::Config(format!(
                    "provider {} listed more than once",
                    provider.id()
                )));
            }
        }
        Ok(Self {
            dispatcher: Dispatcher::new(config.dispatch.clone()),
            config,
            providers,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(Provider::id).collect()
    }

    /// Run the pipeline with no prior performance history.
    pub async fn orchestrate(
        &self,
        input: &NormalizedInput,
        system_prompt: &str,
        task_type: TaskType,
    ) -> ConsensusResult<OrchestratorResult> {
        self.orchestrate_with_history(input, system_prompt, task_type, &PerformanceModel::new())
            .await
    }

    /// Run the pipeline; the returned recommendation carries `prior` updated
    /// with this run.
    pub async fn orchestrate_with_history(
        &self,
        input: &NormalizedInput,
        system_prompt: &str,
        task_type: TaskType,
        prior: &PerformanceModel,
    ) -> ConsensusResult<OrchestratorResult> {
        let started = Instant::now();
        let outcome = self
            .dispatcher
            .dispatch(&self.providers, input, system_prompt, task_type)
            .await;
        self.reconcile(outcome, task_type, prior, started)
    }

    /// Everything after dispatch. Pure apart from logging.
    ///
    /// Fails only with [`ConsensusError::InsufficientProviders`] when no
    /// provider succeeded. A single success yields a single-source result
    /// without disagreement processing.
    pub fn reconcile(
        &self,
        outcome: DispatchOutcome,
        task_type: TaskType,
        prior: &PerformanceModel,
        started: Instant,
    ) -> ConsensusResult<OrchestratorResult> {
        if outcome.succeeded() == 0 {
            warn!(attempted = outcome.attempted, "No provider succeeded");
            return Err(ConsensusError::InsufficientProviders {
                succeeded: 0,
                attempted: outcome.attempted,
            });
        }

        let aligner = SchemaAligner::new(self.config.repair_budget, task_type);
        let aligned: Vec<AlignedResponse> =
            outcome.responses.iter().map(|r| aligner.align(r)).collect();

        let detector = DisagreementDetector::new(&self.config);
        let mut detection = if outcome.can_adjudicate() {
            detector.detect(&aligned)
        } else {
            info!(
                provider = %aligned[0].provider,
                "Single provider succeeded; skipping disagreement processing"
            );
            DetectionReport {
                groups: detector.group(&aligned),
                disagreements: Vec::new(),
            }
        };

        let verdicts = self.adjudicate(&mut detection);

        let context = FusionContext {
            run_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            task_type,
            failures: outcome.failures.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
        };
        let final_json =
            FusionEngine::new(&self.config).fuse(&aligned, &detection, &verdicts, context);

        let observation =
            RunObservation::from_run(&aligned, &outcome.failures, &detection, &verdicts);
        let candidates: Vec<ProviderId> = aligned
            .iter()
            .map(|r| r.provider)
            .chain(outcome.failures.iter().map(|f| f.provider))
            .collect();
        let engine_recommendation = Recommender::new(&self.config).recommend(
            prior.observe(&observation),
            &candidates,
            final_json.metadata.total_items,
        );

        let consensus_report = ConsensusReport::build(
            &final_json,
            &aligned,
            &outcome.failures,
            &observation,
            &engine_recommendation,
        );

        info!(
            run_id = %final_json.metadata.run_id,
            items = final_json.metadata.total_items,
            disagreements = final_json.metadata.disagreement_count,
            unresolved = final_json.metadata.unresolved_conflicts,
            consensus_count = final_json.metadata.consensus_count,
            confidence = final_json.metadata.overall_confidence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Consensus run complete"
        );

        Ok(OrchestratorResult {
            consensus_report,
            final_json,
            engine_recommendation,
        })
    }

    /// Build rationales and a verdict for every disagreement, in order.
    fn adjudicate(&self, detection: &mut DetectionReport) -> Vec<Verdict> {
        let builder = RationaleBuilder::new(self.config.scoring.clone());
        let adjudicator = Adjudicator::new(&self.config.scoring);
        let DetectionReport {
            groups,
            disagreements,
        } = detection;

        disagreements
            .iter_mut()
            .map(|disagreement| {
                let group = &groups[disagreement.group];
                let rationales = builder.build(disagreement, group);
                let verdict = adjudicator.verdict(disagreement, rationales);
                if let Verdict::Unresolved { reason, .. } = &verdict {
                    warn!(item_key = %disagreement.item_key, %reason, "Disagreement left unresolved");
                }
                verdict
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockProviderAdapter, ProviderReply};
    use std::sync::Arc;

    fn provider(id: ProviderId, content: &'static str) -> Provider {
        let mut adapter = MockProviderAdapter::new();
        adapter
            .expect_call()
            .returning(move |_| Ok(ProviderReply::new(content)));
        Provider::new(id, Arc::new(adapter))
    }

    #[test]
    fn test_duplicate_providers_rejected() {
        let result = Orchestrator::new(
            EngineConfig::default(),
            vec![
                provider(ProviderId::Claude, "{}"),
                provider(ProviderId::Claude, "{}"),
            ],
        );
        assert!(matches!(result, Err(ConsensusError::Config(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            risk_threshold: 1.5,
            ..Default::default()
        };
        assert!(Orchestrator::new(config, vec![]).is_err());
    }

    #[test]
    fn test_reconcile_without_successes_fails() {
        let orchestrator = Orchestrator::new(EngineConfig::default(), vec![]).unwrap();
        let err = orchestrator
            .reconcile(
                DispatchOutcome {
                    attempted: 2,
                    ..Default::default()
                },
                TaskType::Full,
                &PerformanceModel::new(),
                Instant::now(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ConsensusError::InsufficientProviders {
                succeeded: 0,
                attempted: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_orchestrate_end_to_end() {
        let orchestrator = Orchestrator::new(
            EngineConfig::default(),
            vec![
                provider(
                    ProviderId::Claude,
                    r#"{"items":[{"name":"Drywall","quantity":500,"unit":"SF","category":"finishes"}]}"#,
                ),
                provider(
                    ProviderId::Gemini,
                    r#"{"items":[{"name":"Drywall","quantity":502,"unit":"SF","category":"finishes"}]}"#,
                ),
            ],
        )
        .unwrap();

        let result = orchestrator
            .orchestrate(&NormalizedInput::default(), "sys", TaskType::Takeoff)
            .await
            .unwrap();

        assert_eq!(result.final_json.items.len(), 1);
        assert_eq!(result.final_json.metadata.consensus_count, 2);
        assert!(!result.final_json.metadata.single_source);
        assert_eq!(result.consensus_report.high_confidence_items, 1);
        assert_eq!(
            result
                .engine_recommendation
                .performance_model
                .stats(ProviderId::Gemini)
                .map(|s| s.runs),
            Some(1)
        );
    }
}
