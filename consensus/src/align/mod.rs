//! Schema alignment for raw provider output
//!
//! Coerces each provider's raw text into the strict item/issue schema:
//!
//! 1. Direct parse of the payload.
//! 2. On failure, the ordered repair passes in [`repair`].
//! 3. If the repair budget is exhausted, pattern-based partial extraction
//!    from [`extract`].
//!
//! Every field is defaulted when absent (unit → EA, category → other,
//! quantity → 0). The output is always a usable [`AlignedResponse`], even
//! when nothing could be recovered.

pub mod extract;
pub mod repair;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::dispatch::ProviderResponse;
use crate::error::{ConsensusError, ConsensusResult};
use crate::provider::ProviderId;
use crate::types::{
    BoundingBox, Category, QualityAnalysis, QualityIssue, Severity, TakeoffItem, TaskType, Unit,
};

pub use repair::{PassOutcome, RepairPass, RepairReport, TruncatedElement, REPAIR_PASSES};

/// Confidence ceiling for items recovered by pattern scanning
pub const PARTIAL_ITEM_CONFIDENCE: f64 = 0.5;

const ITEM_KEYS: &[&str] = &["items", "takeoff", "takeoffItems", "takeoff_items", "lineItems"];
const ISSUE_KEYS: &[&str] = &["issues", "qualityIssues", "quality_issues"];
const QUALITY_KEYS: &[&str] = &["qualityAnalysis", "quality_analysis", "quality"];

static LEADING_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-?\d+(?:\.\d+)?").expect("LEADING_NUMBER_RE regex should compile")
});

/// A provider response coerced into the strict schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignedResponse {
    pub provider: ProviderId,
    pub items: Vec<TakeoffItem>,
    pub issues: Vec<QualityIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_analysis: Option<QualityAnalysis>,
    pub schema_valid: bool,
    pub repair_applied: bool,
    /// Repair passes applied, in order
    #[serde(default)]
    pub repair_passes: Vec<String>,
    /// Whether items came from pattern scanning rather than a parse
    #[serde(default)]
    pub partial_extraction: bool,
    /// Item-shaped entries dropped for lacking a name or cut off by truncation
    #[serde(default)]
    pub discarded_items: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_error: Option<String>,
    #[serde(default)]
    pub latency_ms: u64,
}

impl AlignedResponse {
    /// An empty, schema-invalid response
    pub fn empty(provider: ProviderId, reason: impl Into<String>) -> Self {
        Self {
            provider,
            items: Vec::new(),
            issues: Vec::new(),
            quality_analysis: None,
            schema_valid: false,
            repair_applied: false,
            repair_passes: Vec::new(),
            partial_extraction: false,
            discarded_items: 0,
            schema_error: Some(reason.into()),
            latency_ms: 0,
        }
    }

    /// Build a clean response directly from typed items
    pub fn from_items(provider: ProviderId, items: Vec<TakeoffItem>) -> Self {
        Self {
            provider,
            items,
            issues: Vec::new(),
            quality_analysis: None,
            schema_valid: true,
            repair_applied: false,
            repair_passes: Vec::new(),
            partial_extraction: false,
            discarded_items: 0,
            schema_error: None,
            latency_ms: 0,
        }
    }
}

/// A successfully parsed payload and how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPayload {
    pub value: Value,
    pub passes_applied: Vec<&'static str>,
    pub truncated: Option<TruncatedElement>,
}

/// Coerces raw provider text into [`AlignedResponse`]s
#[derive(Debug, Clone)]
pub struct SchemaAligner {
    repair_budget: usize,
    task_type: TaskType,
}

impl SchemaAligner {
    pub fn new(repair_budget: usize, task_type: TaskType) -> Self {
        Self {
            repair_budget,
            task_type,
        }
    }

    /// Parse the structured payload, running repair passes when needed.
    ///
    /// Returns `SchemaInvalid` when the budget is exhausted; `repairable`
    /// reports whether item-shaped fragments remain for partial extraction.
    pub fn parse_payload(&self, provider: ProviderId, raw: &str) -> ConsensusResult<ParsedPayload> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConsensusError::SchemaInvalid {
                provider,
                repairable: false,
                reason: "empty response".to_string(),
            });
        }

        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return Ok(ParsedPayload {
                value,
                passes_applied: Vec::new(),
                truncated: None,
            });
        }

        let report = repair::run_pipeline(trimmed, self.repair_budget);
        match report.value {
            Some(value) => {
                debug!(
                    %provider,
                    passes = ?report.passes_applied,
                    truncated = ?report.truncated,
                    "Repair pipeline recovered payload"
                );
                Ok(ParsedPayload {
                    value,
                    passes_applied: report.passes_applied,
                    truncated: report.truncated,
                })
            }
            None => Err(ConsensusError::SchemaInvalid {
                provider,
                repairable: !extract::extract_partial_items(trimmed).is_empty(),
                reason: report
                    .last_reason
                    .unwrap_or_else(|| "no repair pass applied".to_string()),
            }),
        }
    }

    /// Align one provider response. Never fails.
    pub fn align(&self, response: &ProviderResponse) -> AlignedResponse {
        let provider = response.provider;
        let mut aligned = match self.parse_payload(provider, &response.raw_text) {
            Ok(payload) => self.align_value(provider, payload),
            Err(ConsensusError::SchemaInvalid {
                repairable: true,
                reason,
                ..
            }) => self.align_partial(provider, &response.raw_text, reason),
            Err(e) => {
                warn!(%provider, error = %e, "Provider output unrecoverable");
                AlignedResponse::empty(provider, e.to_string())
            }
        };
        aligned.latency_ms = response.latency_ms;
        aligned
    }

    fn align_value(&self, provider: ProviderId, payload: ParsedPayload) -> AlignedResponse {
        let root = unwrap_envelope(&payload.value);

        let items_field = match root {
            Value::Array(_) => Some(root),
            Value::Object(map) => lookup(map, ITEM_KEYS),
            _ => None,
        };
        let issues_field = root.as_object().and_then(|m| lookup(m, ISSUE_KEYS));
        let quality_field = root.as_object().and_then(|m| lookup(m, QUALITY_KEYS));

        let mut discarded = 0;
        let mut items = Vec::new();
        let mut last_entry_kept = false;
        if let Some(Value::Array(entries)) = items_field {
            for entry in entries {
                match entry.as_object().and_then(coerce_item) {
                    Some(item) => {
                        items.push(item);
                        last_entry_kept = true;
                    }
                    None => {
                        discarded += 1;
                        last_entry_kept = false;
                    }
                }
            }
        }

        // An item cut off mid-payload is either gone or may carry a clipped value
        match payload.truncated.as_ref().filter(|t| holds_items(t)) {
            Some(t) if t.dropped => {
                warn!(%provider, "Dropped an item cut off by truncation");
                discarded += 1;
            }
            Some(_) if last_entry_kept => {
                if let Some(item) = items.last_mut() {
                    warn!(%provider, item = %item.name, "Closed an item cut off by truncation");
                    mark_partial(item);
                }
            }
            _ => {}
        }

        let issues: Vec<QualityIssue> = match issues_field {
            Some(Value::Array(entries)) => entries
                .iter()
                .filter_map(|e| e.as_object().and_then(coerce_issue))
                .collect(),
            _ => Vec::new(),
        };
        let quality_analysis = quality_field
            .and_then(|v| v.as_object())
            .map(coerce_quality);

        let has_items = matches!(items_field, Some(Value::Array(_)));
        let has_audit =
            matches!(issues_field, Some(Value::Array(_))) || quality_analysis.is_some();
        let schema_valid = if self.task_type.requires_items() {
            has_items
        } else {
            has_audit
        };
        let schema_error = (!schema_valid).then(|| {
            format!(
                "payload lacks the sections required for a {} task",
                self.task_type
            )
        });

        if discarded > 0 {
            debug!(%provider, discarded, "Discarded unnamed items");
        }

        AlignedResponse {
            provider,
            items,
            issues,
            quality_analysis,
            schema_valid,
            repair_applied: !payload.passes_applied.is_empty(),
            repair_passes: payload
                .passes_applied
                .iter()
                .map(|p| p.to_string())
                .collect(),
            partial_extraction: false,
            discarded_items: discarded,
            schema_error,
            latency_ms: 0,
        }
    }

    fn align_partial(&self, provider: ProviderId, raw: &str, reason: String) -> AlignedResponse {
        let fragments = extract::extract_partial_items(raw);
        let total = fragments.len();
        let items: Vec<TakeoffItem> = fragments
            .iter()
            .filter_map(coerce_item)
            .map(|mut item| {
                mark_partial(&mut item);
                item
            })
            .collect();

        warn!(
            %provider,
            recovered = items.len(),
            "Falling back to partial extraction"
        );

        let mut repair_passes: Vec<String> = REPAIR_PASSES
            .iter()
            .take(self.repair_budget)
            .map(|p| p.name.to_string())
            .collect();
        repair_passes.push("partial_extraction".to_string());

        AlignedResponse {
            provider,
            discarded_items: total - items.len(),
            items,
            issues: Vec::new(),
            quality_analysis: None,
            schema_valid: false,
            repair_applied: true,
            repair_passes,
            partial_extraction: true,
            schema_error: Some(reason),
            latency_ms: 0,
        }
    }
}

fn mark_partial(item: &mut TakeoffItem) {
    item.partially_extracted = true;
    item.confidence = Some(
        item.confidence
            .unwrap_or(PARTIAL_ITEM_CONFIDENCE)
            .min(PARTIAL_ITEM_CONFIDENCE),
    );
}

/// Whether a truncated element sat in the item list
fn holds_items(truncated: &TruncatedElement) -> bool {
    truncated
        .array_key
        .as_deref()
        .map_or(true, |key| ITEM_KEYS.contains(&key))
}

/// Step into a single wrapping object such as `{"takeoff": {"items": [...]}}`
/// or `{"result": {...}}`.
fn unwrap_envelope(value: &Value) -> &Value {
    let Some(map) = value.as_object() else {
        return value;
    };
    if lookup(map, ITEM_KEYS).is_some_and(Value::is_array) {
        return value;
    }
    for key in ["takeoff", "result", "data", "analysis", "response"] {
        if let Some(inner @ Value::Object(_)) = map.get(key) {
            return inner;
        }
    }
    value
}

fn lookup<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k))
}

fn text_field(map: &Map<String, Value>, keys: &[&str]) -> String {
    match lookup(map, keys) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn number_field(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    lookup(map, keys).and_then(coerce_number)
}

/// Numbers may arrive as strings with separators and trailing units.
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned = s.replace(',', "");
            LEADING_NUMBER_RE
                .find(&cleaned)
                .and_then(|m| m.as_str().parse::<f64>().ok())
        }
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn coerce_confidence(value: Option<f64>) -> Option<f64> {
    value.map(|c| if c > 1.0 && c <= 100.0 { c / 100.0 } else { c }.clamp(0.0, 1.0))
}

fn coerce_bounding_box(value: &Value) -> Option<BoundingBox> {
    match value {
        Value::Object(map) => Some(BoundingBox {
            x: number_field(map, &["x", "left"])?,
            y: number_field(map, &["y", "top"])?,
            width: number_field(map, &["width", "w"])?,
            height: number_field(map, &["height", "h"])?,
            page: number_field(map, &["page"]).map(|p| p.max(0.0) as u32),
        }),
        Value::Array(values) if values.len() == 4 => {
            let nums: Vec<f64> = values.iter().filter_map(coerce_number).collect();
            (nums.len() == 4).then(|| BoundingBox {
                x: nums[0],
                y: nums[1],
                width: nums[2],
                height: nums[3],
                page: None,
            })
        }
        _ => None,
    }
}

/// Coerce one item object, defaulting every absent field. Items without a
/// name are rejected.
pub fn coerce_item(map: &Map<String, Value>) -> Option<TakeoffItem> {
    let name = text_field(map, &["name", "item", "itemName", "item_name"]);
    if name.is_empty() {
        return None;
    }

    let raw_quantity = lookup(map, &["quantity", "qty", "amount"]);
    let quantity = raw_quantity
        .and_then(coerce_number)
        .unwrap_or(0.0)
        .max(0.0);

    let unit_text = text_field(map, &["unit", "units", "uom"]);
    let unit = Unit::parse_lenient(&unit_text)
        .or_else(|| {
            // "1,200 SF" carries its unit inside the quantity
            raw_quantity
                .and_then(Value::as_str)
                .and_then(|s| s.trim_start_matches(|c: char| !c.is_alphabetic()).split_whitespace().next())
                .and_then(Unit::parse_lenient)
        })
        .unwrap_or(Unit::Ea);

    let category = Category::parse_lenient(&text_field(map, &["category", "trade", "division"]))
        .unwrap_or(Category::Other);

    Some(TakeoffItem {
        name,
        description: text_field(map, &["description", "desc"]),
        quantity,
        unit,
        unit_cost: number_field(map, &["unitCost", "unit_cost", "unitPrice", "unit_price"])
            .unwrap_or(0.0)
            .max(0.0),
        location: text_field(map, &["location", "area", "room"]),
        category,
        subcategory: text_field(map, &["subcategory", "subCategory", "sub_category"]),
        cost_code: text_field(map, &["costCode", "cost_code", "csiCode", "csi_code"]),
        notes: text_field(map, &["notes", "note", "assumptions"]),
        bounding_box: lookup(map, &["boundingBox", "bounding_box", "bbox"])
            .and_then(coerce_bounding_box),
        confidence: coerce_confidence(number_field(map, &["confidence"])),
        sheet: Some(text_field(map, &["sheet", "sheetNumber", "sheet_number"]))
            .filter(|s| !s.is_empty()),
        page: number_field(map, &["page", "pageNumber", "page_number"]).map(|p| p.max(0.0) as u32),
        partially_extracted: false,
    })
}

fn coerce_issue(map: &Map<String, Value>) -> Option<QualityIssue> {
    let description = text_field(map, &["description", "issue", "title", "message"]);
    if description.is_empty() {
        return None;
    }
    Some(QualityIssue {
        severity: Severity::parse_lenient(&text_field(map, &["severity", "priority", "level"])),
        category: text_field(map, &["category", "type"]),
        description,
        location: text_field(map, &["location", "sheet"]),
        recommendation: Some(text_field(map, &["recommendation", "fix", "action"]))
            .filter(|s| !s.is_empty()),
        confidence: coerce_confidence(number_field(map, &["confidence"])),
    })
}

fn string_list(map: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    match lookup(map, keys) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Object(o) => Some(text_field(o, &["description", "flag", "name"]))
                    .filter(|s| !s.is_empty()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn coerce_quality(map: &Map<String, Value>) -> QualityAnalysis {
    let unit_score = |keys: &[&str]| {
        coerce_confidence(number_field(map, keys)).unwrap_or(0.0)
    };
    QualityAnalysis {
        completeness: unit_score(&["completeness", "completenessScore", "completeness_score"]),
        audit_coverage: unit_score(&["auditCoverage", "audit_coverage", "coverage"]),
        risk_flags: string_list(map, &["riskFlags", "risk_flags", "risks"]),
        missing_information: string_list(
            map,
            &["missingInformation", "missing_information", "missing"],
        ),
        notes: Some(text_field(map, &["notes", "summary"])).filter(|s| !s.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn aligner() -> SchemaAligner {
        SchemaAligner::new(4, TaskType::Full)
    }

    fn response(raw: &str) -> ProviderResponse {
        ProviderResponse::success(ProviderId::Claude, raw, 1200)
    }

    #[test]
    fn test_clean_payload_is_not_repaired() {
        let aligned = aligner().align(&response(
            r#"{"items":[{"name":"Drywall","quantity":500,"unit":"SF","category":"finishes"}],
                "issues":[{"severity":"critical","description":"Missing door schedule"}]}"#,
        ));
        assert!(aligned.schema_valid);
        assert!(!aligned.repair_applied);
        assert_eq!(aligned.items.len(), 1);
        assert_eq!(aligned.items[0].unit, Unit::Sf);
        assert_eq!(aligned.issues[0].severity, Severity::Critical);
        assert_eq!(aligned.latency_ms, 1200);
    }

    #[test]
    fn test_truncated_payload_recovers_single_item() {
        let aligned = aligner().align(&response(
            r#"{"items":[{"name":"Footing","quantity":10,"unit":"CY"}"#,
        ));
        assert!(aligned.repair_applied);
        assert!(aligned.schema_valid);
        assert_eq!(aligned.items.len(), 1);
        let item = &aligned.items[0];
        assert_eq!(item.name, "Footing");
        assert_eq!(item.quantity, 10.0);
        assert_eq!(item.unit, Unit::Cy);
        assert_eq!(aligned.repair_passes.last().map(String::as_str), Some("balance_brackets"));
    }

    #[test]
    fn test_item_cut_off_after_siblings_is_dropped_and_counted() {
        let aligned = aligner().align(&response(
            r#"{"items":[{"name":"Footing","quantity":10,"unit":"CY"},{"name":"Slab","unit":"CY","quantity":12"#,
        ));
        assert!(aligned.schema_valid);
        assert!(aligned.repair_applied);
        assert_eq!(aligned.items.len(), 1);
        assert_eq!(aligned.items[0].name, "Footing");
        assert!(!aligned.items[0].partially_extracted);
        assert_eq!(aligned.discarded_items, 1);
    }

    #[test]
    fn test_lone_cut_off_item_is_flagged_partial() {
        let aligned = aligner().align(&response(
            r#"{"items":[{"name":"Slab","unit":"CY","confidence":0.9,"quantity":12"#,
        ));
        assert!(aligned.repair_applied);
        assert_eq!(aligned.items.len(), 1);
        let slab = &aligned.items[0];
        assert_eq!(slab.name, "Slab");
        assert!(slab.partially_extracted);
        assert_eq!(slab.confidence, Some(PARTIAL_ITEM_CONFIDENCE));
        assert_eq!(aligned.discarded_items, 0);
    }

    #[test]
    fn test_cut_off_issue_leaves_items_alone() {
        let aligned = aligner().align(&response(
            r#"{"items":[{"name":"Slab","quantity":12,"unit":"CY"}],"issues":[{"severity":"high","description":"Missing sla"#,
        ));
        assert_eq!(aligned.items.len(), 1);
        assert!(!aligned.items[0].partially_extracted);
        assert_eq!(aligned.discarded_items, 0);
    }

    #[test]
    fn test_bracketed_prose_before_payload() {
        let aligned = aligner().align(&response(
            r#"Based on sheets [A-101] and [S-201], here is the takeoff: {"items":[{"name":"Stud","quantity":40,"unit":"EA"}]}"#,
        ));
        assert!(aligned.schema_valid);
        assert!(!aligned.partial_extraction);
        assert_eq!(aligned.repair_passes, vec!["isolate_payload".to_string()]);
        assert_eq!(aligned.items[0].name, "Stud");
        assert_eq!(aligned.items[0].quantity, 40.0);
    }

    #[test]
    fn test_fenced_payload_with_prose() {
        let aligned = aligner().align(&response(
            "Sure, here you go:\n```json\n{\"items\": [{\"name\": \"Stud\", \"qty\": \"1,200\", \"unit\": \"each\"},]}\n```",
        ));
        assert!(aligned.repair_applied);
        assert_eq!(aligned.items[0].quantity, 1200.0);
        assert_eq!(aligned.items[0].unit, Unit::Ea);
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let item = coerce_item(json!({"name": "Mystery"}).as_object().unwrap()).unwrap();
        assert_eq!(item.unit, Unit::Ea);
        assert_eq!(item.category, Category::Other);
        assert_eq!(item.quantity, 0.0);
        assert!(item.confidence.is_none());
    }

    #[test]
    fn test_coercion_of_units_in_quantity_and_negative_values() {
        let item = coerce_item(
            json!({"name": "Slab", "quantity": "2,400 SF", "unitCost": -3, "confidence": 85})
                .as_object()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(item.quantity, 2400.0);
        assert_eq!(item.unit, Unit::Sf);
        assert_eq!(item.unit_cost, 0.0);
        assert_eq!(item.confidence, Some(0.85));

        let negative = coerce_item(json!({"name": "X", "quantity": -4}).as_object().unwrap());
        assert_eq!(negative.unwrap().quantity, 0.0);
    }

    #[test]
    fn test_unnamed_items_are_discarded() {
        let aligned = aligner().align(&response(
            r#"{"items":[{"quantity":3},{"name":"Header","quantity":4,"unit":"LF"}]}"#,
        ));
        assert_eq!(aligned.items.len(), 1);
        assert_eq!(aligned.discarded_items, 1);
    }

    #[test]
    fn test_partial_extraction_fallback() {
        let raw = r#"Results: {"items": [{"name": "Rebar", "quantity": 2000, "unit": "LF"} {"name": "Mesh" "quantity": 50 "unit": "SF"}} {{{ ]]"#;
        let aligned = SchemaAligner::new(0, TaskType::Full).align(&response(raw));
        assert!(aligned.partial_extraction);
        assert!(aligned.repair_applied);
        assert!(!aligned.schema_valid);
        assert_eq!(aligned.items.len(), 2);
        assert!(aligned.items.iter().all(|i| i.partially_extracted));
        assert!(aligned
            .items
            .iter()
            .all(|i| i.confidence == Some(PARTIAL_ITEM_CONFIDENCE)));
        assert_eq!(aligned.repair_passes, vec!["partial_extraction".to_string()]);
    }

    #[test]
    fn test_unrecoverable_output_yields_empty_invalid_response() {
        let aligned = aligner().align(&response("I'm sorry, I can't read these plans."));
        assert!(!aligned.schema_valid);
        assert!(aligned.items.is_empty());
        assert!(aligned.issues.is_empty());
        assert!(aligned.schema_error.is_some());
    }

    #[test]
    fn test_parse_payload_reports_unrepairable() {
        let err = aligner()
            .parse_payload(ProviderId::Gpt, "no json here")
            .unwrap_err();
        assert!(matches!(
            err,
            ConsensusError::SchemaInvalid {
                repairable: false,
                ..
            }
        ));
    }

    #[test]
    fn test_envelope_and_top_level_array() {
        let wrapped = aligner().align(&response(
            r#"{"takeoff": {"lineItems": [{"name": "Joist", "quantity": 12, "unit": "EA"}]}}"#,
        ));
        assert_eq!(wrapped.items.len(), 1);

        let bare = aligner().align(&response(r#"[{"name": "Joist", "quantity": 12}]"#));
        assert!(bare.schema_valid);
        assert_eq!(bare.items[0].name, "Joist");
    }

    #[test]
    fn test_quality_audit_schema_validity() {
        let audit = SchemaAligner::new(4, TaskType::QualityAudit);
        let valid = audit.align(&response(
            r#"{"qualityAnalysis": {"completeness": 0.8, "riskFlags": ["No MEP sheets"]}}"#,
        ));
        assert!(valid.schema_valid);
        let quality = valid.quality_analysis.unwrap();
        assert_eq!(quality.completeness, 0.8);
        assert_eq!(quality.risk_flags, vec!["No MEP sheets".to_string()]);

        let takeoff_only = SchemaAligner::new(4, TaskType::Takeoff)
            .align(&response(r#"{"issues": []}"#));
        assert!(!takeoff_only.schema_valid);
    }

    #[test]
    fn test_bounding_box_forms() {
        let from_object = coerce_item(
            json!({"name": "A", "boundingBox": {"x": 1, "y": 2, "w": 3, "h": 4, "page": 2}})
                .as_object()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(from_object.bounding_box.unwrap().page, Some(2));

        let from_array =
            coerce_item(json!({"name": "B", "bbox": [1, 2, 3, 4]}).as_object().unwrap()).unwrap();
        assert_eq!(from_array.bounding_box.unwrap().height, 4.0);
    }
}
