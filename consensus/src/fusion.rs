//! Fusion of all provider items into one reconciled takeoff
//!
//! Groups are visited in first-occurrence order (dispatch order, then item
//! order). Each group becomes one [`ReconciledItem`]:
//!
//! - no disagreement: member quantities are averaged and the item is tagged
//!   `consensus`;
//! - disagreement: the adjudicated value replaces each disputed field and the
//!   item is tagged with the winning provider, or `none` when a conflict
//!   could not be resolved.
//!
//! With two or more responses, a later group whose key was already
//! published and that carries no disagreement is folded into the earlier
//! item: averaged when within tolerance, otherwise the first-seen item is
//! kept unchanged and the ignored duplicate is disclosed in its conflict
//! notes. A single response is published line for line.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adjudicate::{AdjudicationResult, Verdict};
use crate::align::AlignedResponse;
use crate::config::{EngineConfig, FusionPolicy, ToleranceTable};
use crate::detect::{
    item_key, normalize, tolerance, DetectionReport, Disagreement, DisagreementKind, DisputedValue,
    ItemGroup,
};
use crate::dispatch::ProviderFailure;
use crate::provider::ProviderId;
use crate::rationale::ModelRationale;
use crate::types::{QualityAnalysis, QualityIssue, TakeoffItem, TaskType};

/// Member confidence assumed when a provider did not state one
pub const DEFAULT_MEMBER_CONFIDENCE: f64 = 0.8;

/// Confidence ceiling for items that still carry an unresolved conflict
pub const UNRESOLVED_CONFIDENCE_CAP: f64 = 0.5;

/// Who decided the published values of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum AdjudicatedBy {
    /// All contributing providers agreed
    Consensus,
    /// A conflict could not be adjudicated
    None,
    /// This provider won adjudication
    Provider(ProviderId),
}

impl std::fmt::Display for AdjudicatedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdjudicatedBy::Consensus => write!(f, "consensus"),
            AdjudicatedBy::None => write!(f, "none"),
            AdjudicatedBy::Provider(id) => write!(f, "{id}"),
        }
    }
}

impl From<AdjudicatedBy> for String {
    fn from(value: AdjudicatedBy) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for AdjudicatedBy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "consensus" => Ok(AdjudicatedBy::Consensus),
            "none" => Ok(AdjudicatedBy::None),
            other => ProviderId::parse(other)
                .map(AdjudicatedBy::Provider)
                .ok_or_else(|| format!("unknown adjudicator '{other}'")),
        }
    }
}

/// A published takeoff line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledItem {
    #[serde(flatten)]
    pub item: TakeoffItem,
    /// Identity key of the published fields (after any adjudicated
    /// name, category or location substitution)
    pub item_key: String,
    pub adjudicated_by: AdjudicatedBy,
    /// Providers whose items were merged into this line, in dispatch order
    pub sources: Vec<ProviderId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disagreements: Vec<Disagreement>,
    pub final_confidence: f64,
    pub risk_flag: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflict_notes: Vec<String>,
}

/// A disagreement and the adjudication that settled it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConflict {
    pub disagreement: Disagreement,
    pub adjudication: AdjudicationResult,
}

/// A disagreement no rationale could settle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedConflict {
    pub disagreement: Disagreement,
    pub reason: String,
    pub rationales: Vec<ModelRationale>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conflicts {
    pub resolved: Vec<ResolvedConflict>,
    pub unresolved: Vec<UnresolvedConflict>,
}

/// Run-level facts about the reconciled takeoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeoffMetadata {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub task_type: TaskType,
    pub overall_confidence: f64,
    pub total_items: usize,
    pub disagreement_count: usize,
    pub disagreements_by_kind: BTreeMap<DisagreementKind, usize>,
    pub resolved_conflicts: usize,
    pub unresolved_conflicts: usize,
    pub contributing_providers: Vec<ProviderId>,
    pub failed_providers: Vec<ProviderFailure>,
    /// Only one provider succeeded; nothing was cross-checked
    pub single_source: bool,
    pub consensus_count: usize,
    pub fusion_policy: FusionPolicy,
    /// Items held back by an agreement-threshold policy
    pub withheld_items: usize,
    pub estimated_total_cost: f64,
    pub processing_time_ms: u64,
}

/// The single authoritative document produced by a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReconciledTakeoff {
    pub metadata: TakeoffMetadata,
    pub items: Vec<ReconciledItem>,
    pub quality_analysis: QualityAnalysis,
    pub issues: Vec<QualityIssue>,
    pub conflicts: Conflicts,
}

/// Run facts the fusion engine records but does not compute
#[derive(Debug, Clone)]
pub struct FusionContext {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub task_type: TaskType,
    pub failures: Vec<ProviderFailure>,
    pub processing_time_ms: u64,
}

/// Merges aligned responses and adjudications into a
/// [`FinalReconciledTakeoff`]
#[derive(Debug, Clone)]
pub struct FusionEngine {
    tolerances: ToleranceTable,
    risk_threshold: f64,
    policy: FusionPolicy,
}

impl FusionEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            tolerances: config.tolerances.clone(),
            risk_threshold: config.risk_threshold,
            policy: config.fusion_policy,
        }
    }

    /// Fuse everything. `verdicts` is parallel to `detection.disagreements`.
    pub fn fuse(
        &self,
        responses: &[AlignedResponse],
        detection: &DetectionReport,
        verdicts: &[Verdict],
        context: FusionContext,
    ) -> FinalReconciledTakeoff {
        let (items, withheld) = self.fuse_items(responses, detection, verdicts);

        let mut conflicts = Conflicts::default();
        for (disagreement, verdict) in detection.disagreements.iter().zip(verdicts) {
            match verdict {
                Verdict::Resolved(adjudication) => conflicts.resolved.push(ResolvedConflict {
                    disagreement: disagreement.clone(),
                    adjudication: adjudication.clone(),
                }),
                Verdict::Unresolved { reason, rationales } => {
                    conflicts.unresolved.push(UnresolvedConflict {
                        disagreement: disagreement.clone(),
                        reason: reason.clone(),
                        rationales: rationales.clone(),
                    })
                }
            }
        }

        let overall_confidence = if items.is_empty() {
            0.0
        } else {
            items.iter().map(|i| i.final_confidence).sum::<f64>() / items.len() as f64
        };

        let metadata = TakeoffMetadata {
            run_id: context.run_id,
            generated_at: context.generated_at,
            task_type: context.task_type,
            overall_confidence,
            total_items: items.len(),
            disagreement_count: detection.disagreements.len(),
            disagreements_by_kind: detection.counts_by_kind(),
            resolved_conflicts: conflicts.resolved.len(),
            unresolved_conflicts: conflicts.unresolved.len(),
            contributing_providers: responses.iter().map(|r| r.provider).collect(),
            failed_providers: context.failures,
            single_source: responses.len() == 1,
            consensus_count: responses.len(),
            fusion_policy: self.policy,
            withheld_items: withheld,
            estimated_total_cost: items.iter().map(|i| i.item.extended_cost()).sum(),
            processing_time_ms: context.processing_time_ms,
        };

        FinalReconciledTakeoff {
            metadata,
            items,
            quality_analysis: merge_quality(responses),
            issues: merge_issues(responses),
            conflicts,
        }
    }

    /// Build the reconciled item list and count withheld items.
    pub fn fuse_items(
        &self,
        responses: &[AlignedResponse],
        detection: &DetectionReport,
        verdicts: &[Verdict],
    ) -> (Vec<ReconciledItem>, usize) {
        let successful = responses.len().max(1);
        // a lone provider's lines are never merged with each other
        let fold_duplicates = responses.len() > 1;
        let mut items: Vec<ReconciledItem> = Vec::new();
        let mut published: HashMap<String, usize> = HashMap::new();
        let mut withheld = 0;

        for (index, group) in detection.groups.iter().enumerate() {
            let agreement = group.provider_count() as f64 / successful as f64;
            if let FusionPolicy::AgreementThreshold { min_agreement } = self.policy {
                if agreement + tolerance::BOUNDARY_EPSILON < min_agreement {
                    debug!(item_key = %group.key, agreement, "Item withheld below agreement threshold");
                    withheld += 1;
                    continue;
                }
            }

            let involved: Vec<(&Disagreement, &Verdict)> = detection
                .disagreements
                .iter()
                .zip(verdicts)
                .filter(|(d, _)| d.group == index)
                .collect();

            if involved.is_empty() {
                if let Some(&existing) = published.get(&group.key).filter(|_| fold_duplicates) {
                    self.fold_duplicate(&mut items[existing], group);
                    continue;
                }
                published.insert(group.key.clone(), items.len());
                items.push(self.consensus_item(group, agreement));
            } else {
                published.entry(group.key.clone()).or_insert(items.len());
                items.push(self.adjudicated_item(group, agreement, &involved));
            }
        }

        (items, withheld)
    }

    fn consensus_item(&self, group: &ItemGroup, agreement: f64) -> ReconciledItem {
        let confidence = consensus_confidence(group, agreement);
        ReconciledItem {
            item: merged_base(group),
            item_key: group.key.clone(),
            adjudicated_by: AdjudicatedBy::Consensus,
            sources: group.providers(),
            disagreements: Vec::new(),
            final_confidence: confidence,
            risk_flag: confidence < self.risk_threshold,
            conflict_notes: Vec::new(),
        }
    }

    fn adjudicated_item(
        &self,
        group: &ItemGroup,
        agreement: f64,
        involved: &[(&Disagreement, &Verdict)],
    ) -> ReconciledItem {
        let mut item = merged_base(group);
        let mut adjudicated_by = AdjudicatedBy::None;
        let mut resolved_confidence: Option<f64> = None;
        let mut conflict_notes = Vec::new();

        for (disagreement, verdict) in involved {
            match verdict {
                Verdict::Resolved(result) => {
                    apply_winner(&mut item, group, result);
                    if adjudicated_by == AdjudicatedBy::None {
                        adjudicated_by = AdjudicatedBy::Provider(result.winner_provider);
                    }
                    resolved_confidence = Some(
                        resolved_confidence.map_or(result.confidence, |c| c.min(result.confidence)),
                    );
                }
                Verdict::Unresolved { .. } => {
                    let values = disagreement
                        .providers
                        .iter()
                        .filter_map(|p| disagreement.values.get(p).map(|v| format!("{p}={v}")))
                        .collect::<Vec<_>>()
                        .join(", ");
                    conflict_notes.push(format!(
                        "Unresolved {} conflict ({values}); no provider supplied a usable value",
                        disagreement.kind
                    ));
                }
            }
        }

        let mut confidence =
            resolved_confidence.unwrap_or_else(|| consensus_confidence(group, agreement));
        if !conflict_notes.is_empty() {
            confidence = confidence.min(UNRESOLVED_CONFIDENCE_CAP);
        }

        ReconciledItem {
            item_key: item_key(&item),
            item,
            adjudicated_by,
            sources: group.providers(),
            disagreements: involved.iter().map(|(d, _)| (*d).clone()).collect(),
            final_confidence: confidence,
            risk_flag: confidence < self.risk_threshold,
            conflict_notes,
        }
    }

    fn fold_duplicate(&self, existing: &mut ReconciledItem, group: &ItemGroup) {
        let candidate = merged_base(group);
        let same_unit = existing.item.unit == candidate.unit;
        if same_unit
            && tolerance::within_tolerance(
                existing.item.quantity,
                candidate.quantity,
                self.tolerances.for_unit(candidate.unit),
            )
        {
            existing.item.quantity = (existing.item.quantity + candidate.quantity) / 2.0;
            for provider in group.providers() {
                if !existing.sources.contains(&provider) {
                    existing.sources.push(provider);
                }
            }
            return;
        }

        let providers = group
            .providers()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        existing.conflict_notes.push(format!(
            "Ignored divergent duplicate from {providers}: {} {}",
            candidate.quantity, candidate.unit
        ));
    }
}

/// `0.5 * mean member confidence + 0.5 * agreement ratio`
fn consensus_confidence(group: &ItemGroup, agreement: f64) -> f64 {
    let stated: f64 = group
        .members
        .iter()
        .map(|m| m.item.confidence.unwrap_or(DEFAULT_MEMBER_CONFIDENCE))
        .sum();
    let mean = stated / group.members.len().max(1) as f64;
    (0.5 * mean + 0.5 * agreement.min(1.0)).clamp(0.0, 1.0)
}

/// First member's item, completed from the other members and with numeric
/// fields averaged across members that share its unit.
fn merged_base(group: &ItemGroup) -> TakeoffItem {
    let mut base = group.anchor().clone();

    for member in &group.members[1..] {
        let other = &member.item;
        fill_if_empty(&mut base.description, &other.description);
        fill_if_empty(&mut base.location, &other.location);
        fill_if_empty(&mut base.subcategory, &other.subcategory);
        fill_if_empty(&mut base.cost_code, &other.cost_code);
        fill_if_empty(&mut base.notes, &other.notes);
        if base.bounding_box.is_none() {
            base.bounding_box = other.bounding_box.clone();
        }
        if base.sheet.is_none() {
            base.sheet = other.sheet.clone();
        }
        if base.page.is_none() {
            base.page = other.page;
        }
    }

    let same_unit: Vec<&TakeoffItem> = group
        .members
        .iter()
        .map(|m| &m.item)
        .filter(|i| i.unit == base.unit)
        .collect();
    if let Some(mean) = tolerance::mean(&same_unit.iter().map(|i| i.quantity).collect::<Vec<_>>())
    {
        base.quantity = mean;
    }

    let costs: Vec<f64> = group
        .members
        .iter()
        .map(|m| m.item.unit_cost)
        .filter(|c| *c > 0.0)
        .collect();
    base.unit_cost = tolerance::mean(&costs).unwrap_or(0.0);

    let stated: Vec<f64> = group.members.iter().filter_map(|m| m.item.confidence).collect();
    base.confidence = tolerance::mean(&stated);
    base.partially_extracted = group.members.iter().all(|m| m.item.partially_extracted);

    base
}

fn fill_if_empty(target: &mut String, source: &str) {
    if target.trim().is_empty() && !source.trim().is_empty() {
        *target = source.to_string();
    }
}

/// Replace the disputed field with the winning provider's value.
fn apply_winner(item: &mut TakeoffItem, group: &ItemGroup, result: &AdjudicationResult) {
    let winner_item = group.item_for(result.winner_provider);
    match (&result.kind, &result.winner_value) {
        (DisagreementKind::Quantity, DisputedValue::Number(q)) => item.quantity = *q,
        (DisagreementKind::Cost, DisputedValue::Number(c)) => item.unit_cost = *c,
        (DisagreementKind::Category, DisputedValue::Category(c)) => item.category = *c,
        (DisagreementKind::Unit, DisputedValue::Unit(u)) => {
            // quantities are only comparable within one unit
            item.unit = *u;
            if let Some(winner) = winner_item {
                item.quantity = winner.quantity;
            }
        }
        (DisagreementKind::Location, DisputedValue::Text(text)) => item.location = text.clone(),
        (DisagreementKind::Name, DisputedValue::Text(text)) => item.name = text.clone(),
        _ => {}
    }
}

/// Union of all issues, deduplicated by description and location, most
/// severe first.
pub fn merge_issues(responses: &[AlignedResponse]) -> Vec<QualityIssue> {
    let mut seen = HashSet::new();
    let mut merged: Vec<QualityIssue> = responses
        .iter()
        .flat_map(|r| r.issues.iter())
        .filter(|issue| {
            seen.insert(format!(
                "{}|{}",
                normalize(&issue.description),
                normalize(&issue.location)
            ))
        })
        .cloned()
        .collect();
    merged.sort_by_key(|issue| issue.severity.rank());
    merged
}

/// The richest quality analysis by composite score; first in dispatch
/// order on ties; a conservative placeholder when none was supplied.
pub fn merge_quality(responses: &[AlignedResponse]) -> QualityAnalysis {
    let mut best: Option<(&QualityAnalysis, f64)> = None;
    for analysis in responses.iter().filter_map(|r| r.quality_analysis.as_ref()) {
        let score = analysis.composite_score();
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((analysis, score));
        }
    }
    best.map(|(a, _)| a.clone())
        .unwrap_or_else(QualityAnalysis::placeholder)
}
