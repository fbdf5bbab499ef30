//! Ordered text repair passes for malformed provider JSON
//!
//! Each pass is a pure, idempotent text transform. After transforming, the
//! pass attempts a parse and reports either the parsed value or the reason
//! the pipeline should continue with the next pass. Passes are applied in
//! the order of [`REPAIR_PASSES`] and each one receives the previous pass's
//! output.

use serde_json::Value;

/// Result of running one repair pass
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// The transformed text parsed successfully
    Parsed(Value),
    /// Still unparseable; carry the transformed text forward
    Continue { text: String, reason: String },
}

/// A named repair pass
#[derive(Debug, Clone, Copy)]
pub struct RepairPass {
    pub name: &'static str,
    pub transform: fn(&str) -> String,
}

impl RepairPass {
    /// Transform then try to parse.
    pub fn run(&self, text: &str) -> PassOutcome {
        let repaired = (self.transform)(text);
        match serde_json::from_str::<Value>(&repaired) {
            Ok(value) => PassOutcome::Parsed(value),
            Err(e) => PassOutcome::Continue {
                text: repaired,
                reason: format!("{}: {}", self.name, e),
            },
        }
    }
}

/// The repair pipeline, in application order
pub const REPAIR_PASSES: [RepairPass; 4] = [
    RepairPass {
        name: "isolate_payload",
        transform: isolate_payload,
    },
    RepairPass {
        name: "strip_trailing_separators",
        transform: strip_trailing_separators,
    },
    RepairPass {
        name: "insert_missing_separators",
        transform: insert_missing_separators,
    },
    RepairPass {
        name: "balance_brackets",
        transform: balance_brackets,
    },
];

/// An array element left open by the end of the text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncatedElement {
    /// Key of the array holding the element; `None` for a top-level array
    pub array_key: Option<String>,
    /// Whether the fragment was cut away rather than closed
    pub dropped: bool,
}

/// Summary of a repair attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RepairReport {
    /// Parsed payload, if any pass succeeded
    pub value: Option<Value>,
    /// Names of the passes that were applied
    pub passes_applied: Vec<&'static str>,
    /// Text after the last applied pass
    pub final_text: String,
    /// Why the last pass failed to parse
    pub last_reason: Option<String>,
    /// Element cut off by truncation, when bracket balancing produced the value
    pub truncated: Option<TruncatedElement>,
}

/// Run up to `budget` passes in order until one parses.
pub fn run_pipeline(raw: &str, budget: usize) -> RepairReport {
    let mut text = raw.to_string();
    let mut passes_applied = Vec::new();
    let mut last_reason = None;

    for pass in REPAIR_PASSES.iter().take(budget) {
        passes_applied.push(pass.name);
        match pass.run(&text) {
            PassOutcome::Parsed(value) => {
                let truncated = if pass.name == "balance_brackets" {
                    balance(&text).1
                } else {
                    None
                };
                return RepairReport {
                    value: Some(value),
                    passes_applied,
                    final_text: text,
                    last_reason: None,
                    truncated,
                };
            }
            PassOutcome::Continue { text: next, reason } => {
                text = next;
                last_reason = Some(reason);
            }
        }
    }

    RepairReport {
        value: None,
        passes_applied,
        final_text: text,
        last_reason,
        truncated: None,
    }
}

/// Strip code fences and surrounding prose, keeping the JSON object or
/// array that carries the payload.
///
/// Bracketed prose such as `[A-101]` ahead of the payload is skipped. The
/// first opener whose balanced span parses wins; otherwise the first opener
/// that starts like JSON is kept, up to its matching closer or to the end
/// of the text when the payload was cut off.
pub fn isolate_payload(text: &str) -> String {
    let mut body = text.trim();

    if let Some(fence_start) = body.find("```") {
        let after = &body[fence_start + 3..];
        let after = after
            .strip_prefix("json")
            .or_else(|| after.strip_prefix("JSON"))
            .unwrap_or(after);
        body = match after.find("```") {
            Some(end) => &after[..end],
            None => after,
        };
        body = body.trim();
    }

    let openers: Vec<usize> = body
        .char_indices()
        .filter(|(_, c)| matches!(c, '{' | '['))
        .map(|(i, _)| i)
        .collect();
    let Some(&first) = openers.first() else {
        return body.to_string();
    };

    let mut fallback = None;
    for &start in &openers {
        let end = matching_close(body, start);
        if let Some(end) = end {
            if serde_json::from_str::<Value>(&body[start..end]).is_ok() {
                return body[start..end].to_string();
            }
        }
        if starts_like_json(&body[start..]) {
            fallback = Some((start, end));
            break;
        }
    }

    match fallback.unwrap_or((first, matching_close(body, first))) {
        (start, Some(end)) => body[start..end].to_string(),
        // Truncated payload: keep everything from the opener onwards
        (start, None) => body[start..].to_string(),
    }
}

/// Byte offset just past the closer matching the opener at `start`.
fn matching_close(text: &str, start: usize) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' if stack.last() == Some(&c) => {
                stack.pop();
                if stack.is_empty() {
                    return Some(start + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Whether the text after an opener reads like a JSON value rather than prose.
fn starts_like_json(span: &str) -> bool {
    let mut chars = span.chars();
    let opener = chars.next();
    let next = chars.find(|c| !c.is_whitespace());
    match (opener, next) {
        (_, None) => true,
        (Some('{'), Some(c)) => matches!(c, '"' | '}'),
        (_, Some(c)) => matches!(c, '"' | '{' | '[' | ']' | '-') || c.is_ascii_digit(),
    }
}

/// Remove commas that directly precede a closing bracket.
pub fn strip_trailing_separators(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = text.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Insert commas between adjacent values that are missing a separator,
/// e.g. `"a" "b"]` or `} {`.
pub fn insert_missing_separators(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    // Whether the last significant token outside a string ended a value
    let mut value_ended = false;

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                value_ended = true;
            }
            continue;
        }

        if c.is_whitespace() {
            out.push(c);
            continue;
        }

        let starts_value = matches!(c, '"' | '{' | '[');
        if starts_value && value_ended {
            // Put the comma right after the previous value, before whitespace
            let trimmed_len = out.trim_end().len();
            out.insert(trimmed_len, ',');
        }

        match c {
            '"' => {
                in_string = true;
                value_ended = false;
            }
            '}' | ']' => value_ended = true,
            ',' | ':' | '{' | '[' => value_ended = false,
            c if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '+' => {
                value_ended = true
            }
            _ => value_ended = false,
        }
        out.push(c);
    }
    out
}

/// Close an unterminated string and append the closers for every bracket
/// left open. An array element cut off after complete siblings is dropped;
/// a lone cut-off element is closed. When the tail is an unfinished key or
/// element, fall back to cutting it off before closing.
pub fn balance_brackets(text: &str) -> String {
    balance(text).0
}

fn balance(text: &str) -> (String, Option<TruncatedElement>) {
    let open = open_element(text);

    if let Some((array_start, element_start)) = open {
        let has_sibling = !text[array_start + 1..element_start]
            .trim_matches(|c: char| c.is_whitespace() || c == ',')
            .is_empty();
        if has_sibling {
            let cut = close_open_structures(&text[..element_start]);
            if serde_json::from_str::<Value>(&cut).is_ok() {
                let truncated = TruncatedElement {
                    array_key: array_key(text, array_start),
                    dropped: true,
                };
                return (cut, Some(truncated));
            }
        }
    }

    let mut candidates = vec![close_open_structures(text)];
    if let Some(start) = open_string_start(text) {
        candidates.push(close_open_structures(&text[..start]));
    }
    if let Some(end) = last_complete_element_end(text) {
        candidates.push(close_open_structures(&text[..end]));
    }

    let repaired = match candidates
        .iter()
        .position(|c| serde_json::from_str::<Value>(c).is_ok())
    {
        Some(index) => candidates.swap_remove(index),
        None => candidates.swap_remove(0),
    };
    let truncated = open.map(|(array_start, _)| TruncatedElement {
        array_key: array_key(text, array_start),
        dropped: false,
    });
    (repaired, truncated)
}

/// Closers still owed at the end of the text, paired with the byte offset
/// of their opener, plus the string state.
fn open_structures(text: &str) -> (Vec<(char, usize)>, bool, bool) {
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push(('}', i)),
            '[' => stack.push((']', i)),
            '}' | ']' => {
                if stack.last().map(|(closer, _)| *closer) == Some(c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }
    (stack, in_string, escaped)
}

/// Offsets of the outermost open array and its open object element.
fn open_element(text: &str) -> Option<(usize, usize)> {
    let (stack, _, _) = open_structures(text);
    stack
        .windows(2)
        .find(|pair| pair[0].0 == ']' && pair[1].0 == '}')
        .map(|pair| (pair[0].1, pair[1].1))
}

/// The `"key":` naming the array that opens at `array_start`.
fn array_key(text: &str, array_start: usize) -> Option<String> {
    let before = text[..array_start].trim_end().strip_suffix(':')?;
    let before = before.trim_end().strip_suffix('"')?;
    let open = before.rfind('"')?;
    Some(before[open + 1..].to_string())
}

fn close_open_structures(text: &str) -> String {
    let (mut stack, in_string, escaped) = open_structures(text);

    let mut out = text.to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    // A dangling separator or key cannot be closed into valid JSON
    loop {
        let trimmed = out.trim_end();
        if let Some(stripped) = trimmed.strip_suffix(',') {
            out = stripped.to_string();
        } else if let Some(stripped) = trimmed.strip_suffix(':') {
            out = strip_dangling_key(stripped);
        } else {
            out.truncate(trimmed.len());
            break;
        }
    }

    while let Some((closer, _)) = stack.pop() {
        out.push(closer);
    }
    out
}

/// Drop a trailing `"key"` left behind after removing its colon.
fn strip_dangling_key(text: &str) -> String {
    let trimmed = text.trim_end();
    if let Some(without_quote) = trimmed.strip_suffix('"') {
        if let Some(open) = without_quote.rfind('"') {
            return without_quote[..open].to_string();
        }
    }
    trimmed.to_string()
}

/// Byte offset of the quote opening a string left unterminated at the end.
fn open_string_start(text: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
            start = i;
        }
    }
    in_string.then_some(start)
}

/// Byte offset just past the last `}` or `]` that sits outside a string.
fn last_complete_element_end(text: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    let mut last = None;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '}' | ']' => last = Some(i + 1),
            _ => {}
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_isolate_payload_strips_fence_and_prose() {
        let raw = "Here is the takeoff:\n```json\n{\"items\": []}\n```\nLet me know!";
        assert_eq!(isolate_payload(raw), "{\"items\": []}");
    }

    #[test]
    fn test_isolate_payload_keeps_truncated_tail() {
        let raw = "Sure! {\"items\":[{\"name\":\"Footing\"";
        assert_eq!(isolate_payload(raw), "{\"items\":[{\"name\":\"Footing\"");
    }

    #[test]
    fn test_isolate_payload_skips_bracketed_prose() {
        let raw = "Based on sheets [A-101, A-102] here is the takeoff: {\"items\": [{\"name\": \"Stud\"}]} Thanks";
        assert_eq!(isolate_payload(raw), "{\"items\": [{\"name\": \"Stud\"}]}");
    }

    #[test]
    fn test_isolate_payload_keeps_unbalanced_tail() {
        let raw = "{\"items\":[{\"name\":\"A\"},{\"name\":\"B\",\"quantity\":12";
        assert_eq!(isolate_payload(raw), raw);
    }

    #[test]
    fn test_isolate_payload_does_not_descend_into_broken_payload() {
        let raw = "Result: {\"items\":[{\"name\":\"A\"} {\"name\":\"B\"}]}";
        assert_eq!(
            isolate_payload(raw),
            "{\"items\":[{\"name\":\"A\"} {\"name\":\"B\"}]}"
        );
    }

    #[test]
    fn test_strip_trailing_separators() {
        let raw = "{\"a\": [1, 2, ], \"b\": {\"c\": 1,\n}, }";
        let fixed = strip_trailing_separators(raw);
        let value: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value, json!({"a": [1, 2], "b": {"c": 1}}));
    }

    #[test]
    fn test_strip_trailing_separators_ignores_strings() {
        let raw = "{\"note\": \"a, ]\"}";
        assert_eq!(strip_trailing_separators(raw), raw);
    }

    #[test]
    fn test_insert_missing_separators_before_closer() {
        let raw = "{\"tags\": [\"a\" \"b\"]}";
        let value: Value = serde_json::from_str(&insert_missing_separators(raw)).unwrap();
        assert_eq!(value, json!({"tags": ["a", "b"]}));
    }

    #[test]
    fn test_insert_missing_separators_between_objects() {
        let raw = "[{\"name\": \"A\"}\n{\"name\": \"B\"}]";
        let value: Value = serde_json::from_str(&insert_missing_separators(raw)).unwrap();
        assert_eq!(value, json!([{"name": "A"}, {"name": "B"}]));
    }

    #[test]
    fn test_insert_missing_separators_between_fields() {
        let raw = "{\"quantity\": 10 \"unit\": \"CY\"}";
        let value: Value = serde_json::from_str(&insert_missing_separators(raw)).unwrap();
        assert_eq!(value, json!({"quantity": 10, "unit": "CY"}));
    }

    #[test]
    fn test_balance_brackets_truncated_array() {
        let raw = "{\"items\":[{\"name\":\"Footing\",\"quantity\":10,\"unit\":\"CY\"}";
        let value: Value = serde_json::from_str(&balance_brackets(raw)).unwrap();
        assert_eq!(value["items"][0]["name"], "Footing");
        assert_eq!(value["items"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_balance_brackets_drops_dangling_key() {
        let raw = "{\"items\":[{\"name\":\"Footing\",\"quantity\":";
        let value: Value = serde_json::from_str(&balance_brackets(raw)).unwrap();
        assert_eq!(value, json!({"items": [{"name": "Footing"}]}));
    }

    #[test]
    fn test_balance_brackets_closes_open_string() {
        let raw = "{\"items\":[{\"name\":\"Foot";
        let value: Value = serde_json::from_str(&balance_brackets(raw)).unwrap();
        assert_eq!(value["items"][0]["name"], "Foot");
    }

    #[test]
    fn test_balance_brackets_drops_unfinished_key() {
        let raw = "{\"items\":[{\"name\":\"Footing\",\"quan";
        let value: Value = serde_json::from_str(&balance_brackets(raw)).unwrap();
        assert_eq!(value, json!({"items": [{"name": "Footing"}]}));
    }

    #[test]
    fn test_balance_brackets_drops_element_cut_off_after_siblings() {
        let raw = "{\"items\":[{\"name\":\"Footing\",\"quantity\":10},{\"name\":\"Slab\",\"quantity\":12";
        let (repaired, truncated) = balance(raw);
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value, json!({"items": [{"name": "Footing", "quantity": 10}]}));
        assert_eq!(
            truncated,
            Some(TruncatedElement {
                array_key: Some("items".to_string()),
                dropped: true,
            })
        );
    }

    #[test]
    fn test_balance_brackets_reports_closed_lone_element() {
        let (repaired, truncated) = balance("[{\"name\":\"Slab\",\"quantity\":12");
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value, json!([{"name": "Slab", "quantity": 12}]));
        assert_eq!(
            truncated,
            Some(TruncatedElement {
                array_key: None,
                dropped: false,
            })
        );
    }

    #[test]
    fn test_pipeline_reports_truncation_only_from_balancing() {
        let clean_close = run_pipeline("{\"items\":[{\"name\":\"Footing\"}", 4);
        assert!(clean_close.value.is_some());
        assert!(clean_close.truncated.is_none());

        let cut = run_pipeline("{\"items\":[{\"name\":\"A\"},{\"name\":\"B\",\"qu", 4);
        assert_eq!(cut.value, Some(json!({"items": [{"name": "A"}]})));
        assert!(cut.truncated.is_some_and(|t| t.dropped));
    }

    #[test]
    fn test_passes_are_idempotent() {
        let samples = [
            "```json\n{\"a\": [1,]}\n```",
            "{\"a\": [\"x\" \"y\"]}",
            "{\"items\":[{\"name\":\"Footing\"",
        ];
        for sample in samples {
            for pass in REPAIR_PASSES {
                let once = (pass.transform)(sample);
                let twice = (pass.transform)(&once);
                assert_eq!(once, twice, "pass {} not idempotent", pass.name);
            }
        }
    }

    #[test]
    fn test_pipeline_reports_applied_passes() {
        let report = run_pipeline("prose {\"a\": [1, 2,]}", 4);
        assert_eq!(report.value, Some(json!({"a": [1, 2]})));
        assert_eq!(
            report.passes_applied,
            vec!["isolate_payload", "strip_trailing_separators"]
        );
    }

    #[test]
    fn test_pipeline_respects_budget() {
        let report = run_pipeline("{\"items\":[{\"name\":\"Footing\"", 2);
        assert!(report.value.is_none());
        assert_eq!(report.passes_applied.len(), 2);
        assert!(report.last_reason.is_some());
    }
}
