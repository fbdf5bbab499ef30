//! Engine configuration
//!
//! Every tunable threshold of the pipeline lives here. Defaults reproduce the
//! documented behaviour; a TOML file and `TAKEOFF_*` environment variables
//! can override them.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{ConsensusError, ConsensusResult};
use crate::types::Unit;

/// How fused items are admitted into the final takeoff
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum FusionPolicy {
    /// Publish the union of all items, adjudicating only genuine conflicts
    #[default]
    Union,
    /// Publish only items reported by at least `min_agreement` of the
    /// successful providers
    AgreementThreshold { min_agreement: f64 },
}

/// Relative quantity tolerances per unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceTable {
    pub linear: f64,
    pub area: f64,
    pub volume: f64,
    pub count: f64,
}

impl Default for ToleranceTable {
    fn default() -> Self {
        Self {
            linear: 0.02,
            area: 0.02,
            volume: 0.02,
            count: 0.01,
        }
    }
}

impl ToleranceTable {
    pub fn for_unit(&self, unit: Unit) -> f64 {
        match unit {
            Unit::Lf => self.linear,
            Unit::Sf | Unit::Sq => self.area,
            Unit::Cf | Unit::Cy => self.volume,
            Unit::Ea => self.count,
        }
    }
}

/// Similarity gates for cross-provider item matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum normalized name similarity
    pub name_similarity: f64,
    /// Minimum normalized description similarity
    pub description_similarity: f64,
    /// Minimum location similarity when both locations are present
    pub location_similarity: f64,
    /// Names less similar than this inside one group are a name disagreement
    pub name_conflict_threshold: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            name_similarity: 0.7,
            description_similarity: 0.7,
            location_similarity: 0.6,
            name_conflict_threshold: 0.85,
        }
    }
}

/// Evidence and adjudication weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub evidence_base: f64,
    pub citation_bonus: f64,
    pub bounding_box_bonus: f64,
    pub dimension_bonus: f64,
    pub notes_bonus: f64,
    /// Minimum trimmed length for notes to count as substantive
    pub substantive_notes_len: usize,
    pub implausible_unit_penalty: f64,
    pub evidence_weight: f64,
    pub consistency_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            evidence_base: 0.5,
            citation_bonus: 0.2,
            bounding_box_bonus: 0.1,
            dimension_bonus: 0.1,
            notes_bonus: 0.1,
            substantive_notes_len: 20,
            implausible_unit_penalty: 0.1,
            evidence_weight: 0.6,
            consistency_weight: 0.4,
        }
    }
}

/// Per-call dispatch limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub timeout_base_secs: u64,
    /// Extra seconds granted per KiB of input
    pub timeout_per_kib_secs: f64,
    pub timeout_ceiling_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_base_secs: 60,
            timeout_per_kib_secs: 1.0,
            timeout_ceiling_secs: 180,
            max_tokens: 8192,
            temperature: 0.1,
        }
    }
}

impl DispatchConfig {
    /// Timeout for one provider call given the input size
    pub fn timeout_for(&self, input_bytes: usize) -> Duration {
        let scaled = self.timeout_base_secs as f64
            + (input_bytes as f64 / 1024.0) * self.timeout_per_kib_secs;
        let capped = scaled.min(self.timeout_ceiling_secs as f64).max(1.0);
        Duration::from_secs_f64(capped)
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tolerances: ToleranceTable,
    /// Relative tolerance for unit cost comparisons
    pub cost_tolerance: f64,
    pub matching: MatchingConfig,
    pub scoring: ScoringConfig,
    pub dispatch: DispatchConfig,
    /// Confidence below which a reconciled item is risk-flagged
    pub risk_threshold: f64,
    /// Composite score a provider needs to be recommended on its own
    pub recommendation_threshold: f64,
    /// Item count above which a large-context note is emitted
    pub large_volume_items: usize,
    /// Maximum number of text repair passes before partial extraction
    pub repair_budget: usize,
    pub fusion_policy: FusionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerances: ToleranceTable::default(),
            cost_tolerance: 0.05,
            matching: MatchingConfig::default(),
            scoring: ScoringConfig::default(),
            dispatch: DispatchConfig::default(),
            risk_threshold: 0.7,
            recommendation_threshold: 0.7,
            large_volume_items: 150,
            repair_budget: 4,
            fusion_policy: FusionPolicy::Union,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> ConsensusResult<Self> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|e| ConsensusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config {}", path.display()))?;
        let config = Self::from_toml_str(&raw)
            .with_context(|| format!("Invalid engine config {}", path.display()))?;
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `TAKEOFF_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse::<f64>("TAKEOFF_RISK_THRESHOLD") {
            self.risk_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("TAKEOFF_TIMEOUT_CEILING_SECS") {
            self.dispatch.timeout_ceiling_secs = v;
        }
        if let Some(v) = env_parse::<f64>("TAKEOFF_FUSION_MIN_AGREEMENT") {
            self.fusion_policy = FusionPolicy::AgreementThreshold { min_agreement: v };
        }
        self
    }

    /// Reject values that would make the pipeline meaningless.
    pub fn validate(&self) -> ConsensusResult<()> {
        let unit_ranges = [
            ("risk_threshold", self.risk_threshold),
            ("recommendation_threshold", self.recommendation_threshold),
            ("matching.name_similarity", self.matching.name_similarity),
            (
                "matching.description_similarity",
                self.matching.description_similarity,
            ),
            (
                "matching.location_similarity",
                self.matching.location_similarity,
            ),
        ];
        for (name, value) in unit_ranges {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConsensusError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        for unit in Unit::all() {
            let tolerance = self.tolerances.for_unit(*unit);
            if !(0.0..1.0).contains(&tolerance) {
                return Err(ConsensusError::Config(format!(
                    "tolerance for {unit} must be within [0, 1), got {tolerance}"
                )));
            }
        }

        let weights = self.scoring.evidence_weight + self.scoring.consistency_weight;
        if (weights - 1.0).abs() > 1e-6 {
            return Err(ConsensusError::Config(format!(
                "scoring weights must sum to 1.0, got {weights}"
            )));
        }

        if self.dispatch.timeout_ceiling_secs == 0 {
            return Err(ConsensusError::Config(
                "dispatch.timeout_ceiling_secs must be positive".to_string(),
            ));
        }

        if let FusionPolicy::AgreementThreshold { min_agreement } = self.fusion_policy {
            if !(0.0..=1.0).contains(&min_agreement) {
                return Err(ConsensusError::Config(format!(
                    "fusion min_agreement must be within [0, 1], got {min_agreement}"
                )));
            }
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.trim().parse().ok())
}
