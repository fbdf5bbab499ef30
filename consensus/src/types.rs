//! Core domain types shared by every stage of the consensus pipeline
//!
//! These types describe the single normalized payload that is sent to every
//! provider and the strict item/issue schema that provider outputs are
//! aligned into.

use serde::{Deserialize, Serialize};

/// Measurement unit of a takeoff quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Unit {
    /// Linear feet
    Lf,
    /// Square feet
    Sf,
    /// Cubic feet
    Cf,
    /// Cubic yards
    Cy,
    /// Each (count)
    Ea,
    /// Roofing squares (100 SF)
    Sq,
}

impl Unit {
    /// All units in declaration order
    pub fn all() -> &'static [Unit] {
        &[Unit::Lf, Unit::Sf, Unit::Cf, Unit::Cy, Unit::Ea, Unit::Sq]
    }

    /// Map the many ways providers spell a unit onto the enum.
    ///
    /// Returns `None` for anything unrecognised; callers default to `EA`.
    pub fn parse_lenient(raw: &str) -> Option<Unit> {
        let normalized: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
            .collect();
        let unit = match normalized.trim() {
            "lf" | "lin ft" | "linear ft" | "linear feet" | "linear foot" | "ft" | "feet" => {
                Unit::Lf
            }
            "sf" | "sq ft" | "sqft" | "square feet" | "square foot" | "ft2" => Unit::Sf,
            "cf" | "cu ft" | "cubic feet" | "cubic foot" | "ft3" => Unit::Cf,
            "cy" | "cu yd" | "cubic yards" | "cubic yard" | "yd3" => Unit::Cy,
            "ea" | "each" | "count" | "ct" | "pcs" | "pc" | "unit" | "units" => Unit::Ea,
            "sq" | "square" | "squares" | "roofing squares" => Unit::Sq,
            _ => return None,
        };
        Some(unit)
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unit::Lf => write!(f, "LF"),
            Unit::Sf => write!(f, "SF"),
            Unit::Cf => write!(f, "CF"),
            Unit::Cy => write!(f, "CY"),
            Unit::Ea => write!(f, "EA"),
            Unit::Sq => write!(f, "SQ"),
        }
    }
}

/// Trade category of a takeoff item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Structural,
    Exterior,
    Interior,
    Mep,
    Finishes,
    Other,
}

impl Category {
    /// Map category names and common trade synonyms onto the enum.
    pub fn parse_lenient(raw: &str) -> Option<Category> {
        let normalized = raw.trim().to_ascii_lowercase();
        let category = match normalized.as_str() {
            "structural" | "structure" | "concrete" | "framing" | "steel" | "foundation"
            | "foundations" | "masonry" => Category::Structural,
            "exterior" | "envelope" | "roofing" | "roof" | "siding" | "windows" | "sitework" => {
                Category::Exterior
            }
            "interior" | "interiors" | "doors" | "casework" | "millwork" | "partitions" => {
                Category::Interior
            }
            "mep" | "m/e/p" | "mechanical" | "electrical" | "plumbing" | "hvac"
            | "fire protection" => Category::Mep,
            "finishes" | "finish" | "drywall" | "paint" | "painting" | "flooring" | "tile"
            | "ceilings" => Category::Finishes,
            "other" | "general" | "misc" | "miscellaneous" => Category::Other,
            _ => return None,
        };
        Some(category)
    }

    /// Whether a unit is a normal way to measure items of this category.
    ///
    /// Structural and exterior work is measured by length, area or volume,
    /// never by count.
    pub fn accepts_unit(&self, unit: Unit) -> bool {
        match self {
            Category::Structural => !matches!(unit, Unit::Ea | Unit::Sq),
            Category::Exterior => unit != Unit::Ea,
            Category::Finishes => !matches!(unit, Unit::Cy | Unit::Cf),
            Category::Interior | Category::Mep | Category::Other => true,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Structural => write!(f, "structural"),
            Category::Exterior => write!(f, "exterior"),
            Category::Interior => write!(f, "interior"),
            Category::Mep => write!(f, "mep"),
            Category::Finishes => write!(f, "finishes"),
            Category::Other => write!(f, "other"),
        }
    }
}

/// Region of a sheet an item was measured from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// A quantified material/labor line extracted from a plan set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeoffItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub quantity: f64,
    pub unit: Unit,
    #[serde(default)]
    pub unit_cost: f64,
    #[serde(default)]
    pub location: String,
    pub category: Category,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub cost_code: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Sheet the provider cited for this item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    /// Page the provider cited for this item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Set when the item was recovered by pattern scanning rather than a parse
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partially_extracted: bool,
}

impl TakeoffItem {
    pub fn new(name: impl Into<String>, quantity: f64, unit: Unit, category: Category) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            quantity,
            unit,
            unit_cost: 0.0,
            location: String::new(),
            category,
            subcategory: String::new(),
            cost_code: String::new(),
            notes: String::new(),
            bounding_box: None,
            confidence: None,
            sheet: None,
            page: None,
            partially_extracted: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_unit_cost(mut self, unit_cost: f64) -> Self {
        self.unit_cost = unit_cost;
        self
    }

    pub fn with_bounding_box(mut self, bounding_box: BoundingBox) -> Self {
        self.bounding_box = Some(bounding_box);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn with_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    /// Extended cost of the line (quantity × unit cost)
    pub fn extended_cost(&self) -> f64 {
        self.quantity * self.unit_cost
    }
}

/// Severity of a plan quality finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn parse_lenient(raw: &str) -> Severity {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" | "high" | "error" | "severe" => Severity::Critical,
            "warning" | "medium" | "warn" | "moderate" => Severity::Warning,
            _ => Severity::Info,
        }
    }

    /// Sort rank, most severe first
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::Warning => 1,
            Severity::Info => 2,
        }
    }
}

/// A plan quality or coordination issue reported by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityIssue {
    pub severity: Severity,
    #[serde(default)]
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Document-level quality and audit summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityAnalysis {
    /// How complete the plan set appears (0.0–1.0)
    #[serde(default)]
    pub completeness: f64,
    /// Share of sheets/disciplines the audit covered (0.0–1.0)
    #[serde(default)]
    pub audit_coverage: f64,
    #[serde(default)]
    pub risk_flags: Vec<String>,
    #[serde(default)]
    pub missing_information: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl QualityAnalysis {
    /// Conservative stand-in used when no provider supplied an analysis
    pub fn placeholder() -> Self {
        Self {
            completeness: 0.0,
            audit_coverage: 0.0,
            risk_flags: vec!["No quality analysis was supplied by any provider".to_string()],
            missing_information: Vec::new(),
            notes: Some("Manual plan review recommended".to_string()),
        }
    }

    /// Composite richness score used to pick the most complete analysis
    pub fn composite_score(&self) -> f64 {
        let flags = self.risk_flags.len().min(10) as f64;
        self.completeness.clamp(0.0, 1.0) + self.audit_coverage.clamp(0.0, 1.0) + 0.1 * flags
    }
}

/// Project-level metadata for a plan set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_type: Option<String>,
}

/// One entry of the ordered sheet index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetRef {
    /// Sheet number as printed, e.g. `A-101`
    pub number: String,
    #[serde(default)]
    pub title: String,
}

/// A slice of extracted document content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub text: String,
    /// References to rendered page images (URLs or storage keys)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
}

/// The single shared payload sent to every provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedInput {
    pub project: ProjectMetadata,
    #[serde(default)]
    pub sheets: Vec<SheetRef>,
    #[serde(default)]
    pub chunks: Vec<ContentChunk>,
}

impl NormalizedInput {
    /// Approximate payload size in bytes, used to scale call timeouts
    pub fn size_bytes(&self) -> usize {
        let sheets: usize = self
            .sheets
            .iter()
            .map(|s| s.number.len() + s.title.len())
            .sum();
        let chunks: usize = self.chunks.iter().map(|c| c.text.len()).sum();
        self.project.name.len() + sheets + chunks
    }

    /// All image references in chunk order
    pub fn image_refs(&self) -> Vec<String> {
        self.chunks
            .iter()
            .flat_map(|c| c.images.iter().cloned())
            .collect()
    }
}

/// What the caller asked the providers to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Quantity takeoff only
    Takeoff,
    /// Plan quality audit only
    QualityAudit,
    /// Takeoff plus quality audit
    #[default]
    Full,
}

impl TaskType {
    /// Whether an items array is required for a response to be schema-valid
    pub fn requires_items(&self) -> bool {
        !matches!(self, TaskType::QualityAudit)
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            TaskType::Takeoff => "Produce a quantity takeoff for the plan set below as JSON.",
            TaskType::QualityAudit => "Audit the plan set below for quality issues as JSON.",
            TaskType::Full => {
                "Produce a quantity takeoff and a quality audit for the plan set below as JSON."
            }
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Takeoff => write!(f, "takeoff"),
            TaskType::QualityAudit => write!(f, "quality_audit"),
            TaskType::Full => write!(f, "full"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_synonyms() {
        assert_eq!(Unit::parse_lenient("sq ft"), Some(Unit::Sf));
        assert_eq!(Unit::parse_lenient("Linear Feet"), Some(Unit::Lf));
        assert_eq!(Unit::parse_lenient("cu. yd."), Some(Unit::Cy));
        assert_eq!(Unit::parse_lenient("EACH"), Some(Unit::Ea));
        assert_eq!(Unit::parse_lenient("squares"), Some(Unit::Sq));
        assert_eq!(Unit::parse_lenient("furlongs"), None);
    }

    #[test]
    fn test_unit_serde_uppercase() {
        assert_eq!(serde_json::to_string(&Unit::Cy).unwrap(), "\"CY\"");
        let parsed: Unit = serde_json::from_str("\"SQ\"").unwrap();
        assert_eq!(parsed, Unit::Sq);
        assert_eq!(Unit::Lf.to_string(), "LF");
    }

    #[test]
    fn test_category_synonyms() {
        assert_eq!(Category::parse_lenient("Electrical"), Some(Category::Mep));
        assert_eq!(Category::parse_lenient("drywall"), Some(Category::Finishes));
        assert_eq!(Category::parse_lenient("concrete"), Some(Category::Structural));
        assert_eq!(Category::parse_lenient("spaceship"), None);
    }

    #[test]
    fn test_category_unit_plausibility() {
        assert!(!Category::Structural.accepts_unit(Unit::Ea));
        assert!(!Category::Exterior.accepts_unit(Unit::Ea));
        assert!(Category::Exterior.accepts_unit(Unit::Sq));
        assert!(Category::Mep.accepts_unit(Unit::Ea));
        assert!(Category::Other.accepts_unit(Unit::Cy));
    }

    #[test]
    fn test_quality_composite_score() {
        let rich = QualityAnalysis {
            completeness: 0.9,
            audit_coverage: 0.8,
            risk_flags: vec!["a".into(), "b".into()],
            missing_information: vec![],
            notes: None,
        };
        assert!((rich.composite_score() - 1.9).abs() < 1e-9);
        assert!(QualityAnalysis::placeholder().composite_score() < rich.composite_score());
    }

    #[test]
    fn test_item_serializes_camel_case() {
        let item = TakeoffItem::new("Drywall", 500.0, Unit::Sf, Category::Finishes)
            .with_unit_cost(1.25);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["unitCost"], 1.25);
        assert_eq!(json["category"], "finishes");
        assert!(json.get("partiallyExtracted").is_none());
        assert!((item.extended_cost() - 625.0).abs() < 1e-9);
    }

    #[test]
    fn test_input_size_and_images() {
        let input = NormalizedInput {
            project: ProjectMetadata {
                name: "Clinic".into(),
                ..Default::default()
            },
            sheets: vec![SheetRef {
                number: "A-101".into(),
                title: "Floor Plan".into(),
            }],
            chunks: vec![ContentChunk {
                text: "0123456789".into(),
                images: vec!["img://1".into()],
                sheet: None,
            }],
        };
        assert_eq!(input.size_bytes(), 6 + 5 + 10 + 10);
        assert_eq!(input.image_refs(), vec!["img://1".to_string()]);
    }
}
