//! Evidence and consistency scoring for each side of a disagreement
//!
//! Rationales only annotate; no [`TakeoffItem`] is modified here.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;
use crate::detect::{Disagreement, DisagreementKind, DisputedValue, ItemGroup};
use crate::provider::ProviderId;
use crate::types::{TakeoffItem, Unit};

// Bare references need a hyphen or dot so R19 batts and U419 assemblies are
// not read as sheets; single-letter R and U are insulation ratings.
static SHEET_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\b(?:(?i:sheet)\s+([A-Z]{1,2}-?\d{1,3}(?:\.\d{1,2})?)",
        r"|((?:[A-Z]{2}|[A-QSTV-Z])(?:-\d{1,3}(?:\.\d{1,2})?|\d{1,3}\.\d{1,2})))\b",
    ))
    .expect("SHEET_REF_RE regex should compile")
});

static PAGE_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:page|pg\.?)\s*(\d{1,4})\b").expect("PAGE_REF_RE regex should compile")
});

static DETAIL_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bdetail\s+(\d{1,3}\s*/\s*[A-Z]{1,2}-?\d{1,3}(?:\.\d{1,2})?)")
        .expect("DETAIL_REF_RE regex should compile")
});

static DIMENSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(\d+(?:\.\d+)?\s*(?:'|"|ft\b|feet\b|foot\b|in\b|inch|mm\b)|\d+(?:\.\d+)?\s*[x×]\s*\d+|#\d+\s*@)"#,
    )
    .expect("DIMENSION_RE regex should compile")
});

/// One provider's side of a disagreement, with its scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRationale {
    pub provider: ProviderId,
    pub item_key: String,
    pub kind: DisagreementKind,
    /// The value this provider asserted for the disputed field
    pub value: DisputedValue,
    pub quantity: f64,
    pub unit: Unit,
    pub rationale: String,
    pub citations: Vec<String>,
    pub evidence_score: f64,
    pub consistency_score: f64,
    /// Invalid rationales are kept for audit but cannot win
    pub valid: bool,
}

/// Sheet, page, detail and bounding-box references backing an item.
pub fn extract_citations(item: &TakeoffItem) -> Vec<String> {
    let mut citations: Vec<String> = Vec::new();
    let mut push = |c: String| {
        if !citations.contains(&c) {
            citations.push(c);
        }
    };

    if let Some(sheet) = item.sheet.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        push(format!("sheet {sheet}"));
    }
    if let Some(page) = item.page {
        push(format!("page {page}"));
    }
    if let Some(bbox) = &item.bounding_box {
        let page = bbox.page.map(|p| format!(" p{p}")).unwrap_or_default();
        push(format!(
            "bbox{page} ({}, {}, {}, {})",
            bbox.x, bbox.y, bbox.width, bbox.height
        ));
    }

    for text in [&item.location, &item.description, &item.notes] {
        for caps in DETAIL_REF_RE.captures_iter(text) {
            push(format!("detail {}", caps[1].split_whitespace().collect::<String>()));
        }
        for caps in SHEET_REF_RE.captures_iter(text) {
            if let Some(sheet) = caps.get(1).or_else(|| caps.get(2)) {
                push(format!("sheet {}", sheet.as_str()));
            }
        }
        for caps in PAGE_REF_RE.captures_iter(text) {
            push(format!("page {}", &caps[1]));
        }
    }

    citations
}

/// Whether any free-text field states an explicit dimension.
pub fn has_dimensions(item: &TakeoffItem) -> bool {
    [&item.name, &item.description, &item.notes]
        .iter()
        .any(|t| DIMENSION_RE.is_match(t))
}

/// Builds [`ModelRationale`]s for disagreements
#[derive(Debug, Clone)]
pub struct RationaleBuilder {
    scoring: ScoringConfig,
}

impl RationaleBuilder {
    pub fn new(scoring: ScoringConfig) -> Self {
        Self { scoring }
    }

    /// Evidence score in `[0, 1]`.
    pub fn evidence_score(&self, item: &TakeoffItem, citations: &[String]) -> f64 {
        let s = &self.scoring;
        let mut score = s.evidence_base;
        if !citations.is_empty() {
            score += s.citation_bonus;
        }
        if item.bounding_box.is_some() {
            score += s.bounding_box_bonus;
        }
        if has_dimensions(item) {
            score += s.dimension_bonus;
        }
        if item.notes.trim().chars().count() >= s.substantive_notes_len {
            score += s.notes_bonus;
        }
        score.min(1.0)
    }

    /// Consistency score in `[0, 1]`: penalized when the unit is unusual
    /// for the category.
    pub fn consistency_score(&self, item: &TakeoffItem) -> f64 {
        let mut score: f64 = 1.0;
        if !item.category.accepts_unit(item.unit) {
            score -= self.scoring.implausible_unit_penalty;
        }
        score.clamp(0.0, 1.0)
    }

    /// One rationale per contributing provider, in the disagreement's
    /// provider order. Each provider's evidence score is also recorded on
    /// the disagreement.
    pub fn build(&self, disagreement: &mut Disagreement, group: &ItemGroup) -> Vec<ModelRationale> {
        let mut rationales = Vec::with_capacity(disagreement.providers.len());
        for provider in &disagreement.providers {
            let (Some(item), Some(value)) =
                (group.item_for(*provider), disagreement.values.get(provider))
            else {
                continue;
            };
            let rationale = self.rationale_for(*provider, disagreement, item, value.clone());
            disagreement
                .evidence_strength
                .insert(*provider, rationale.evidence_score);
            rationales.push(rationale);
        }
        rationales
    }

    fn rationale_for(
        &self,
        provider: ProviderId,
        disagreement: &Disagreement,
        item: &TakeoffItem,
        value: DisputedValue,
    ) -> ModelRationale {
        let citations = extract_citations(item);
        let evidence_score = self.evidence_score(item, &citations);
        let consistency_score = self.consistency_score(item);
        let valid = value.is_meaningful();

        let mut rationale = format!(
            "{provider} asserts {} {value} for '{}' ({} {}); {} citation(s); evidence {evidence_score:.2}, consistency {consistency_score:.2}",
            disagreement.kind,
            item.name,
            item.quantity,
            item.unit,
            citations.len(),
        );
        if !item.category.accepts_unit(item.unit) {
            rationale.push_str(&format!("; {} is unusual for {} work", item.unit, item.category));
        }
        if !valid {
            rationale.push_str("; asserted value is not usable");
        }

        ModelRationale {
            provider,
            item_key: disagreement.item_key.clone(),
            kind: disagreement.kind,
            value,
            quantity: item.quantity,
            unit: item.unit,
            rationale,
            citations,
            evidence_score,
            consistency_score,
            valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Category};

    fn builder() -> RationaleBuilder {
        RationaleBuilder::new(ScoringConfig::default())
    }

    fn bare() -> TakeoffItem {
        TakeoffItem::new("Drywall", 500.0, Unit::Sf, Category::Finishes)
    }

    #[test]
    fn test_bare_item_scores_base() {
        let item = bare();
        let citations = extract_citations(&item);
        assert!(citations.is_empty());
        assert_eq!(builder().evidence_score(&item, &citations), 0.5);
        assert_eq!(builder().consistency_score(&item), 1.0);
    }

    #[test]
    fn test_fully_evidenced_item_caps_at_one() {
        let item = bare()
            .with_sheet("A-101")
            .with_bounding_box(BoundingBox {
                x: 10.0,
                y: 20.0,
                width: 100.0,
                height: 50.0,
                page: Some(3),
            })
            .with_description("5/8\" type X, 12' ceiling height")
            .with_notes("Measured both faces of all corridor partitions");
        let citations = extract_citations(&item);
        let score = builder().evidence_score(&item, &citations);
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_citations_from_text() {
        let item = bare()
            .with_location("Level 2 per Sheet A201")
            .with_notes("See Detail 5/A-501 and page 7");
        let citations = extract_citations(&item);
        assert!(citations.contains(&"sheet A201".to_string()));
        assert!(citations.contains(&"detail 5/A-501".to_string()));
        assert!(citations.contains(&"page 7".to_string()));
    }

    #[test]
    fn test_ratings_are_not_sheet_references() {
        let item = bare()
            .with_description("R19 batts in U419 wall, R-30 at roof")
            .with_notes("match S2.1 and E-201");
        let citations = extract_citations(&item);
        assert_eq!(
            citations,
            vec!["sheet S2.1".to_string(), "sheet E-201".to_string()]
        );
    }

    #[test]
    fn test_dimension_detection() {
        assert!(has_dimensions(&bare().with_description("2x4 studs @ 16\" o.c.")));
        assert!(has_dimensions(&bare().with_notes("#4 @ 12 o.c. each way")));
        assert!(!has_dimensions(&bare().with_description("gypsum board")));
    }

    #[test]
    fn test_implausible_unit_penalized() {
        let item = TakeoffItem::new("Footing", 12.0, Unit::Ea, Category::Structural);
        assert!((builder().consistency_score(&item) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_build_records_evidence_strength() {
        use crate::config::EngineConfig;
        use crate::detect::DisagreementDetector;
        use crate::align::AlignedResponse;

        let report = DisagreementDetector::new(&EngineConfig::default()).detect(&[
            AlignedResponse::from_items(ProviderId::Claude, vec![bare()]),
            AlignedResponse::from_items(
                ProviderId::Gpt,
                vec![TakeoffItem::new("Drywall", 520.0, Unit::Sf, Category::Finishes)
                    .with_sheet("A-101")],
            ),
        ]);
        let mut disagreement = report.disagreements[0].clone();
        let rationales = builder().build(&mut disagreement, &report.groups[0]);

        assert_eq!(rationales.len(), 2);
        assert_eq!(rationales[0].provider, ProviderId::Claude);
        assert!(rationales.iter().all(|r| r.valid));
        assert!(rationales[1].rationale.contains("1 citation(s)"));
        assert!((disagreement.evidence_strength[&ProviderId::Gpt] - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_zero_quantity_is_invalid() {
        let zero = DisputedValue::Number(0.0);
        assert!(!zero.is_meaningful());
        assert!(DisputedValue::Unit(Unit::Lf).is_meaningful());
    }
}
