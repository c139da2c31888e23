use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use crate::models::{ActivityLevel, AssessmentStatus, ParseQuality, SleepQuality};

static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).expect("valid list item pattern"));
static SCALAR_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#""([A-Za-z_][A-Za-z0-9_]*)"\s*:\s*("(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?|true|false|null)"#,
    )
    .expect("valid scalar pair pattern")
});

const STATUS_KEYS: [&str; 2] = ["mentalHealthStatus", "status"];
const REASONING_KEY: &str = "reasoning";
const REASONING_FIELDS: [&str; 6] = [
    "sleepHours",
    "sleepQuality",
    "activityLevel",
    "checkInMood",
    "notes",
    "significantChanges",
];
/// Top-level fields models sometimes nest inside `reasoning` by mistake.
const PROMOTABLE_FIELDS: [&str; 3] = ["needsSupport", "mentalHealthStatus", "confidenceScore"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReasoning {
    pub sleep_hours: Option<f64>,
    pub sleep_quality: Option<SleepQuality>,
    pub activity_level: Option<ActivityLevel>,
    pub check_in_mood: Option<f64>,
    pub notes: Option<String>,
    pub significant_changes: Option<Vec<String>>,
    pub extras: Map<String, Value>,
}

/// The model's opinion. `None` means the model did not say.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelAssessment {
    pub status: Option<AssessmentStatus>,
    pub confidence_score: Option<f64>,
    pub needs_support: Option<bool>,
    pub reasoning: ModelReasoning,
    pub support_reason: Option<String>,
    pub support_tips: Option<Vec<String>>,
}

impl ModelAssessment {
    fn failure_defaults() -> Self {
        Self {
            status: Some(AssessmentStatus::Stable),
            confidence_score: Some(0.5),
            needs_support: Some(false),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    Strict(ModelAssessment),
    Repaired {
        assessment: ModelAssessment,
        notes: Vec<String>,
    },
    Failed {
        defaults: ModelAssessment,
        reason: String,
    },
}

impl ParsedResponse {
    pub fn quality(&self) -> ParseQuality {
        match self {
            Self::Strict(_) => ParseQuality::Strict,
            Self::Repaired { .. } => ParseQuality::Repaired,
            Self::Failed { .. } => ParseQuality::Failed,
        }
    }

    pub fn assessment(&self) -> &ModelAssessment {
        match self {
            Self::Strict(assessment) => assessment,
            Self::Repaired { assessment, .. } => assessment,
            Self::Failed { defaults, .. } => defaults,
        }
    }
}

/// Result of scanning for the first brace-delimited block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BraceBlock<'a> {
    /// From the first `{` through its matching `}`.
    Balanced(&'a str),
    /// From the first `{` to the end of input; the block never closed.
    Unterminated(&'a str),
    Absent,
}

/// Finds the first `{` and its matching `}`. Nested braces raise the depth;
/// braces inside JSON string literals (escapes honoured) are ignored.
pub fn first_brace_block(text: &str) -> BraceBlock<'_> {
    match text.find('{') {
        Some(start) => block_at(text, start),
        None => BraceBlock::Absent,
    }
}

fn block_at(text: &str, start: usize) -> BraceBlock<'_> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
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
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start + offset;
                    return BraceBlock::Balanced(&text[start..=end]);
                }
            }
            _ => {}
        }
    }
    BraceBlock::Unterminated(&text[start..])
}

pub fn parse_model_response(text: &str) -> ParsedResponse {
    let parsed = match first_brace_block(text) {
        BraceBlock::Balanced(block) => match serde_json::from_str::<Value>(block) {
            Ok(Value::Object(map)) => {
                let mut notes = Vec::new();
                let assessment = from_object(&map, &mut notes);
                if notes.is_empty() {
                    ParsedResponse::Strict(assessment)
                } else {
                    ParsedResponse::Repaired { assessment, notes }
                }
            }
            Ok(_) => repair(block, "brace block is not an object".to_string()),
            Err(e) => repair(block, format!("malformed JSON: {e}")),
        },
        BraceBlock::Unterminated(rest) => repair(rest, "unterminated brace block".to_string()),
        BraceBlock::Absent => repair(text, "no brace block".to_string()),
    };

    match &parsed {
        ParsedResponse::Strict(_) => {}
        ParsedResponse::Repaired { notes, .. } => {
            warn!(notes = ?notes, "model response repaired");
        }
        ParsedResponse::Failed { reason, .. } => {
            warn!(reason = %reason, chars = text.len(), "model response unusable, using defaults");
        }
    }
    parsed
}

fn from_object(map: &Map<String, Value>, notes: &mut Vec<String>) -> ModelAssessment {
    let mut assessment = ModelAssessment {
        status: STATUS_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .and_then(AssessmentStatus::parse),
        confidence_score: map.get("confidenceScore").and_then(as_number).map(clamp_unit),
        needs_support: map.get("needsSupport").and_then(as_bool),
        support_reason: map.get("supportReason").and_then(as_text),
        support_tips: map.get("supportTips").and_then(as_string_list),
        ..ModelAssessment::default()
    };

    if let Some(Value::Object(reasoning)) = map.get(REASONING_KEY) {
        assessment.reasoning = ModelReasoning {
            sleep_hours: reasoning.get("sleepHours").and_then(as_number),
            sleep_quality: reasoning
                .get("sleepQuality")
                .and_then(Value::as_str)
                .and_then(SleepQuality::parse),
            activity_level: reasoning
                .get("activityLevel")
                .and_then(Value::as_str)
                .and_then(ActivityLevel::parse),
            check_in_mood: reasoning.get("checkInMood").and_then(normalize_mood),
            notes: reasoning.get("notes").and_then(as_text),
            significant_changes: reasoning.get("significantChanges").and_then(as_string_list),
            extras: reasoning
                .iter()
                .filter(|(key, _)| {
                    !REASONING_FIELDS.contains(&key.as_str())
                        && !PROMOTABLE_FIELDS.contains(&key.as_str())
                })
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        };

        if assessment.needs_support.is_none() {
            if let Some(flag) = reasoning.get("needsSupport").and_then(as_bool) {
                assessment.needs_support = Some(flag);
                notes.push("promoted needsSupport out of reasoning".to_string());
            }
        }
        if assessment.status.is_none() {
            if let Some(status) = reasoning
                .get("mentalHealthStatus")
                .and_then(Value::as_str)
                .and_then(AssessmentStatus::parse)
            {
                assessment.status = Some(status);
                notes.push("promoted mentalHealthStatus out of reasoning".to_string());
            }
        }
        if assessment.confidence_score.is_none() {
            if let Some(score) = reasoning.get("confidenceScore").and_then(as_number) {
                assessment.confidence_score = Some(clamp_unit(score));
                notes.push("promoted confidenceScore out of reasoning".to_string());
            }
        }
    }

    assessment
}

/// Unrecognized scalar `"key": value` pairs inside a broken reasoning object.
fn scalar_extras(nested: &str) -> Map<String, Value> {
    SCALAR_PAIR
        .captures_iter(nested)
        .filter(|caps| {
            !REASONING_FIELDS.contains(&&caps[1]) && !PROMOTABLE_FIELDS.contains(&&caps[1])
        })
        .filter_map(|caps| {
            let value = serde_json::from_str::<Value>(&caps[2]).ok()?;
            Some((caps[1].to_string(), value))
        })
        .collect()
}

/// Pattern-based extraction for text that is not valid JSON.
fn repair(text: &str, reason: String) -> ParsedResponse {
    let mut notes = vec![reason.clone()];

    let (top_level, nested) = match object_span(text, REASONING_KEY) {
        Some((start, end)) => (
            format!("{}{}", &text[..start], &text[end..]),
            Some(&text[start..end]),
        ),
        None => (text.to_string(), None),
    };

    let mut assessment = ModelAssessment {
        status: STATUS_KEYS
            .iter()
            .find_map(|key| string_field(&top_level, key))
            .and_then(|s| AssessmentStatus::parse(&s)),
        confidence_score: number_field(&top_level, "confidenceScore").map(clamp_unit),
        needs_support: bool_field(&top_level, "needsSupport"),
        support_reason: string_field(&top_level, "supportReason"),
        support_tips: string_list_field(&top_level, "supportTips"),
        ..ModelAssessment::default()
    };

    if let Some(nested) = nested {
        assessment.reasoning = ModelReasoning {
            sleep_hours: number_field(nested, "sleepHours"),
            sleep_quality: string_field(nested, "sleepQuality")
                .and_then(|s| SleepQuality::parse(&s)),
            activity_level: string_field(nested, "activityLevel")
                .and_then(|s| ActivityLevel::parse(&s)),
            check_in_mood: raw_field(nested, "checkInMood")
                .as_ref()
                .and_then(normalize_mood),
            notes: string_field(nested, "notes"),
            significant_changes: string_list_field(nested, "significantChanges"),
            extras: scalar_extras(nested),
        };

        if assessment.needs_support.is_none() {
            if let Some(flag) = bool_field(nested, "needsSupport") {
                assessment.needs_support = Some(flag);
                notes.push("promoted needsSupport out of reasoning".to_string());
            }
        }
        if assessment.status.is_none() {
            if let Some(status) =
                string_field(nested, "mentalHealthStatus").and_then(|s| AssessmentStatus::parse(&s))
            {
                assessment.status = Some(status);
                notes.push("promoted mentalHealthStatus out of reasoning".to_string());
            }
        }
        if assessment.confidence_score.is_none() {
            if let Some(score) = number_field(nested, "confidenceScore") {
                assessment.confidence_score = Some(clamp_unit(score));
                notes.push("promoted confidenceScore out of reasoning".to_string());
            }
        }
    }

    if assessment == ModelAssessment::default() {
        ParsedResponse::Failed {
            defaults: ModelAssessment::failure_defaults(),
            reason,
        }
    } else {
        ParsedResponse::Repaired { assessment, notes }
    }
}

/// Byte span of the object value under `"key": {`, through its closing brace
/// or to the end of input when it never closes.
fn object_span(text: &str, key: &str) -> Option<(usize, usize)> {
    let pattern = Regex::new(&format!(r#""{}"\s*:\s*\{{"#, regex::escape(key))).ok()?;
    let found = pattern.find(text)?;
    let open = found.end() - 1;
    match block_at(text, open) {
        BraceBlock::Balanced(block) => Some((open, open + block.len())),
        BraceBlock::Unterminated(_) => Some((open, text.len())),
        BraceBlock::Absent => None,
    }
}

fn field_capture(text: &str, key: &str, value_pattern: &str) -> Option<String> {
    let pattern = Regex::new(&format!(
        r#""{}"\s*:\s*{}"#,
        regex::escape(key),
        value_pattern
    ))
    .ok()?;
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn string_field(text: &str, key: &str) -> Option<String> {
    field_capture(text, key, r#""((?:[^"\\]|\\.)*)""#)
        .map(|s| s.replace("\\\"", "\"").trim().to_string())
        .filter(|s| !s.is_empty())
}

fn number_field(text: &str, key: &str) -> Option<f64> {
    field_capture(text, key, r#""?(-?\d+(?:\.\d+)?)"?"#).and_then(|s| s.parse().ok())
}

fn bool_field(text: &str, key: &str) -> Option<bool> {
    field_capture(text, key, r#""?(true|false)"?"#).map(|s| s == "true")
}

fn string_list_field(text: &str, key: &str) -> Option<Vec<String>> {
    let body = field_capture(text, key, r#"\[([^\]]*)\]"#)?;
    Some(
        LIST_ITEM
            .captures_iter(&body)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

fn raw_field(text: &str, key: &str) -> Option<Value> {
    if let Some(n) = field_capture(text, key, r#"(-?\d+(?:\.\d+)?)"#) {
        return n.parse::<f64>().ok().map(Value::from);
    }
    if let Some(s) = field_capture(text, key, r#""((?:[^"\\]|\\.)*)""#) {
        return Some(Value::String(s));
    }
    field_capture(text, key, r"(null)").map(|_| Value::Null)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn as_string_list(value: &Value) -> Option<Vec<String>> {
    value.as_array().map(|items| {
        items
            .iter()
            .filter_map(as_text)
            .collect()
    })
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Maps a model-supplied mood onto the 1-5 scale. Absent or null stays
/// undefined; unrecognised words land on neutral.
pub fn normalize_mood(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().map(|v| v.clamp(1.0, 5.0)),
        Value::String(s) => Some(mood_from_text(s)),
        _ => None,
    }
}

fn mood_from_text(text: &str) -> f64 {
    let text = text.trim().to_ascii_lowercase();
    if let Ok(score) = text.parse::<f64>() {
        return score.clamp(1.0, 5.0);
    }
    match text.as_str() {
        "very poor" | "very bad" | "terrible" | "awful" => 1.0,
        "poor" | "bad" | "low" => 2.0,
        "fair" | "okay" | "ok" | "neutral" | "average" => 3.0,
        "good" => 4.0,
        "very good" | "great" | "excellent" => 5.0,
        _ => 3.0,
    }
}
