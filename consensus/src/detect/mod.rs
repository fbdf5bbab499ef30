//! Disagreement detection across aligned provider outputs
//!
//! Items are first grouped into cross-provider entities (see [`matching`]);
//! every group with at least two contributing providers is then checked
//! field by field. Each flagged field yields one [`Disagreement`].

pub mod matching;
pub mod tolerance;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::align::AlignedResponse;
use crate::config::{EngineConfig, MatchingConfig, ToleranceTable};
use crate::provider::ProviderId;
use crate::types::{Category, TakeoffItem, Unit};

pub use matching::{item_key, normalize, similarity, SimilarityGate};

/// Field a disagreement is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisagreementKind {
    Quantity,
    Unit,
    Category,
    Location,
    Name,
    Cost,
}

impl std::fmt::Display for DisagreementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quantity => write!(f, "quantity"),
            Self::Unit => write!(f, "unit"),
            Self::Category => write!(f, "category"),
            Self::Location => write!(f, "location"),
            Self::Name => write!(f, "name"),
            Self::Cost => write!(f, "cost"),
        }
    }
}

/// A value one provider asserted for a disputed field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DisputedValue {
    Number(f64),
    Unit(Unit),
    Category(Category),
    Text(String),
}

impl DisputedValue {
    /// Whether the value can be published as authoritative
    pub fn is_meaningful(&self) -> bool {
        match self {
            Self::Number(n) => n.is_finite() && *n > 0.0,
            Self::Text(s) => !s.trim().is_empty(),
            Self::Unit(_) | Self::Category(_) => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for DisputedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Unit(u) => write!(f, "{u}"),
            Self::Category(c) => write!(f, "{c}"),
            Self::Text(s) => write!(f, "\"{s}\""),
        }
    }
}

/// A named conflict between at least two providers over one field of one
/// matched item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disagreement {
    #[serde(rename = "type")]
    pub kind: DisagreementKind,
    pub item_key: String,
    /// Contributing providers in dispatch order
    pub providers: Vec<ProviderId>,
    pub values: BTreeMap<ProviderId, DisputedValue>,
    pub tolerance_violated: bool,
    /// Relative spread for numeric kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deviation: Option<f64>,
    /// Filled in once rationales are built
    #[serde(default)]
    pub evidence_strength: BTreeMap<ProviderId, f64>,
    /// Index of the originating group
    #[serde(skip)]
    pub group: usize,
}

/// One provider's item inside a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub provider: ProviderId,
    pub item: TakeoffItem,
}

/// Items from different providers judged to be the same entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemGroup {
    /// Item key of the first member
    pub key: String,
    /// Members in dispatch order, at most one per provider
    pub members: Vec<GroupMember>,
}

impl ItemGroup {
    fn open(provider: ProviderId, item: TakeoffItem) -> Self {
        Self {
            key: item_key(&item),
            members: vec![GroupMember { provider, item }],
        }
    }

    pub fn anchor(&self) -> &TakeoffItem {
        &self.members[0].item
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        self.members.iter().map(|m| m.provider).collect()
    }

    pub fn contains(&self, provider: ProviderId) -> bool {
        self.members.iter().any(|m| m.provider == provider)
    }

    pub fn item_for(&self, provider: ProviderId) -> Option<&TakeoffItem> {
        self.members
            .iter()
            .find(|m| m.provider == provider)
            .map(|m| &m.item)
    }

    /// Distinct providers that reported this entity
    pub fn provider_count(&self) -> usize {
        self.members.len()
    }
}

/// Grouping plus the disagreements found in it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionReport {
    pub groups: Vec<ItemGroup>,
    pub disagreements: Vec<Disagreement>,
}

impl DetectionReport {
    pub fn for_group(&self, group: usize) -> impl Iterator<Item = &Disagreement> {
        self.disagreements.iter().filter(move |d| d.group == group)
    }

    pub fn counts_by_kind(&self) -> BTreeMap<DisagreementKind, usize> {
        let mut counts = BTreeMap::new();
        for d in &self.disagreements {
            *counts.entry(d.kind).or_insert(0) += 1;
        }
        counts
    }
}

/// Groups items across providers and flags conflicting fields
#[derive(Debug, Clone)]
pub struct DisagreementDetector {
    gate: SimilarityGate,
    matching: MatchingConfig,
    tolerances: ToleranceTable,
    cost_tolerance: f64,
}

impl DisagreementDetector {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            gate: SimilarityGate::new(config.matching.clone()),
            matching: config.matching.clone(),
            tolerances: config.tolerances.clone(),
            cost_tolerance: config.cost_tolerance,
        }
    }

    /// Group items only. Used for single-source runs.
    ///
    /// Responses are visited in dispatch order. An item joins the first
    /// group that has no item from its provider yet and passes the
    /// similarity gate against the group's first member; otherwise it opens
    /// a new group.
    pub fn group(&self, responses: &[AlignedResponse]) -> Vec<ItemGroup> {
        let mut groups: Vec<ItemGroup> = Vec::new();
        for response in responses {
            for item in &response.items {
                let slot = groups.iter().position(|g| {
                    !g.contains(response.provider) && self.gate.same_entity(g.anchor(), item)
                });
                match slot {
                    Some(index) => groups[index].members.push(GroupMember {
                        provider: response.provider,
                        item: item.clone(),
                    }),
                    None => groups.push(ItemGroup::open(response.provider, item.clone())),
                }
            }
        }
        groups
    }

    /// Group items and flag disagreements in every multi-provider group.
    pub fn detect(&self, responses: &[AlignedResponse]) -> DetectionReport {
        let groups = self.group(responses);
        let mut disagreements = Vec::new();

        for (index, group) in groups.iter().enumerate() {
            if group.provider_count() < 2 {
                continue;
            }
            for mut disagreement in self.inspect(group) {
                disagreement.group = index;
                debug!(
                    item_key = %disagreement.item_key,
                    kind = %disagreement.kind,
                    providers = disagreement.providers.len(),
                    "Disagreement detected"
                );
                disagreements.push(disagreement);
            }
        }

        DetectionReport {
            groups,
            disagreements,
        }
    }

    /// Check one group field by field, in a fixed kind order.
    pub fn inspect(&self, group: &ItemGroup) -> Vec<Disagreement> {
        let mut found = Vec::new();

        let units: BTreeSet<Unit> = group.members.iter().map(|m| m.item.unit).collect();
        if units.len() > 1 {
            found.push(self.categorical(group, DisagreementKind::Unit, |item| {
                Some(DisputedValue::Unit(item.unit))
            }));
        } else if let Some(&unit) = units.iter().next() {
            let quantities: Vec<f64> = group.members.iter().map(|m| m.item.quantity).collect();
            if tolerance::exceeds_tolerance(&quantities, self.tolerances.for_unit(unit)) {
                found.push(self.numeric(
                    group,
                    DisagreementKind::Quantity,
                    |item| Some(item.quantity),
                    &quantities,
                ));
            }
        }

        let categories: BTreeSet<Category> =
            group.members.iter().map(|m| m.item.category).collect();
        if categories.len() > 1 {
            found.push(self.categorical(group, DisagreementKind::Category, |item| {
                Some(DisputedValue::Category(item.category))
            }));
        }

        let locations: BTreeSet<String> = group
            .members
            .iter()
            .map(|m| normalize(&m.item.location))
            .filter(|l| !l.is_empty())
            .collect();
        if locations.len() > 1 {
            found.push(self.categorical(group, DisagreementKind::Location, |item| {
                let location = item.location.trim();
                (!location.is_empty()).then(|| DisputedValue::Text(location.to_string()))
            }));
        }

        if self.names_conflict(group) {
            found.push(self.categorical(group, DisagreementKind::Name, |item| {
                Some(DisputedValue::Text(item.name.clone()))
            }));
        }

        let costs: Vec<f64> = group
            .members
            .iter()
            .map(|m| m.item.unit_cost)
            .filter(|c| *c > 0.0)
            .collect();
        if tolerance::exceeds_tolerance(&costs, self.cost_tolerance) {
            found.push(self.numeric(
                group,
                DisagreementKind::Cost,
                |item| (item.unit_cost > 0.0).then_some(item.unit_cost),
                &costs,
            ));
        }

        found
    }

    fn names_conflict(&self, group: &ItemGroup) -> bool {
        let names: Vec<String> = group
            .members
            .iter()
            .map(|m| normalize(&m.item.name))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        names.iter().enumerate().any(|(i, a)| {
            names[i + 1..]
                .iter()
                .any(|b| similarity(a, b) < self.matching.name_conflict_threshold)
        })
    }

    fn categorical(
        &self,
        group: &ItemGroup,
        kind: DisagreementKind,
        value_of: impl Fn(&TakeoffItem) -> Option<DisputedValue>,
    ) -> Disagreement {
        let mut providers = Vec::new();
        let mut values = BTreeMap::new();
        for member in &group.members {
            if let Some(value) = value_of(&member.item) {
                providers.push(member.provider);
                values.insert(member.provider, value);
            }
        }
        Disagreement {
            kind,
            item_key: group.key.clone(),
            providers,
            values,
            tolerance_violated: false,
            deviation: None,
            evidence_strength: BTreeMap::new(),
            group: 0,
        }
    }

    fn numeric(
        &self,
        group: &ItemGroup,
        kind: DisagreementKind,
        value_of: impl Fn(&TakeoffItem) -> Option<f64>,
        compared: &[f64],
    ) -> Disagreement {
        let mut disagreement = self.categorical(group, kind, |item| {
            value_of(item).map(DisputedValue::Number)
        });
        disagreement.tolerance_violated = true;
        disagreement.deviation = Some(tolerance::relative_spread(compared));
        disagreement
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(provider: ProviderId, items: Vec<TakeoffItem>) -> AlignedResponse {
        AlignedResponse::from_items(provider, items)
    }

    fn detector() -> DisagreementDetector {
        DisagreementDetector::new(&EngineConfig::default())
    }

    fn drywall(quantity: f64) -> TakeoffItem {
        TakeoffItem::new("Drywall", quantity, Unit::Sf, Category::Finishes)
    }

    #[test]
    fn test_quantity_disagreement_beyond_tolerance() {
        let report = detector().detect(&[
            response(ProviderId::Claude, vec![drywall(500.0)]),
            response(ProviderId::Gpt, vec![drywall(520.0)]),
        ]);

        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.disagreements.len(), 1);
        let d = &report.disagreements[0];
        assert_eq!(d.kind, DisagreementKind::Quantity);
        assert_eq!(d.item_key, "drywall|finishes|");
        assert_eq!(d.providers, vec![ProviderId::Claude, ProviderId::Gpt]);
        assert_eq!(d.values[&ProviderId::Gpt], DisputedValue::Number(520.0));
        assert!(d.tolerance_violated);
    }

    #[test]
    fn test_within_tolerance_produces_nothing() {
        let report = detector().detect(&[
            response(ProviderId::Claude, vec![drywall(500.0)]),
            response(ProviderId::Gpt, vec![drywall(505.0)]),
            response(ProviderId::Gemini, vec![drywall(502.0)]),
        ]);
        assert_eq!(report.groups[0].provider_count(), 3);
        assert!(report.disagreements.is_empty());
    }

    #[test]
    fn test_count_items_use_tighter_tolerance() {
        let door = |q| TakeoffItem::new("Door", q, Unit::Ea, Category::Interior);
        // 1.5% spread: fine for area, too much for counts
        let report = detector().detect(&[
            response(ProviderId::Claude, vec![door(200.0)]),
            response(ProviderId::Gpt, vec![door(203.0)]),
        ]);
        assert_eq!(report.disagreements.len(), 1);
    }

    #[test]
    fn test_unit_mismatch_skips_quantity_comparison() {
        let report = detector().detect(&[
            response(ProviderId::Claude, vec![drywall(500.0)]),
            response(
                ProviderId::Gpt,
                vec![TakeoffItem::new("Drywall", 5.0, Unit::Sq, Category::Finishes)],
            ),
        ]);
        let kinds: Vec<_> = report.disagreements.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DisagreementKind::Unit]);
    }

    #[test]
    fn test_category_disagreement_on_identical_names() {
        let report = detector().detect(&[
            response(
                ProviderId::Claude,
                vec![TakeoffItem::new("Sheathing", 800.0, Unit::Sf, Category::Exterior)],
            ),
            response(
                ProviderId::Grok,
                vec![TakeoffItem::new("Sheathing", 800.0, Unit::Sf, Category::Structural)],
            ),
        ]);
        assert_eq!(report.disagreements.len(), 1);
        assert_eq!(report.disagreements[0].kind, DisagreementKind::Category);
    }

    #[test]
    fn test_single_provider_groups_never_disagree() {
        let report = detector().detect(&[
            response(ProviderId::Claude, vec![drywall(500.0), drywall(900.0)]),
            response(ProviderId::Gpt, vec![]),
        ]);
        assert_eq!(report.groups.len(), 2);
        assert!(report.disagreements.is_empty());
    }

    #[test]
    fn test_location_and_cost_disagreements() {
        let a = drywall(500.0).with_location("Level 1 East").with_unit_cost(2.0);
        let b = drywall(500.0).with_location("Level 1 West").with_unit_cost(2.5);
        let report = detector().detect(&[
            response(ProviderId::Claude, vec![a]),
            response(ProviderId::Gpt, vec![b]),
        ]);
        let kinds: Vec<_> = report.disagreements.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DisagreementKind::Location, DisagreementKind::Cost]
        );
    }

    #[test]
    fn test_name_conflict_below_threshold() {
        let a = TakeoffItem::new("Concrete Footing", 10.0, Unit::Cy, Category::Structural);
        let b = TakeoffItem::new("Concrete Footings", 10.0, Unit::Cy, Category::Structural);
        let c = TakeoffItem::new("Spread Footing", 10.0, Unit::Cy, Category::Structural)
            .with_description("Concrete footing");
        let close = detector().detect(&[
            response(ProviderId::Claude, vec![a.clone()]),
            response(ProviderId::Gpt, vec![b]),
        ]);
        assert!(close.disagreements.is_empty());

        let a = a.with_description("Concrete footing");
        let far = detector().detect(&[
            response(ProviderId::Claude, vec![a]),
            response(ProviderId::Gpt, vec![c]),
        ]);
        assert_eq!(far.disagreements.len(), 1);
        assert_eq!(far.disagreements[0].kind, DisagreementKind::Name);
    }

    #[test]
    fn test_grouping_is_deterministic() {
        let responses = vec![
            response(ProviderId::Claude, vec![drywall(500.0), drywall(510.0)]),
            response(ProviderId::Gpt, vec![drywall(505.0)]),
        ];
        let first = detector().detect(&responses);
        let second = detector().detect(&responses);
        assert_eq!(first, second);
        // the second Claude line cannot join a group Claude already holds
        assert_eq!(first.groups.len(), 2);
        assert_eq!(first.groups[0].providers(), vec![ProviderId::Claude, ProviderId::Gpt]);
    }
}
