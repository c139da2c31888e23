use crate::heuristics::HeuristicDraft;
use crate::models::{AssessmentStatus, ParseQuality, ReasoningData};
use crate::parser::{ModelAssessment, ParsedResponse};

pub const DEFAULT_SUPPORT_REASON: &str =
    "Recent signals point to a critical decline in wellbeing; a peer check-in is recommended.";

pub const DEFAULT_SUPPORT_TIPS: [&str; 3] = [
    "Reach out to someone you trust today",
    "Take a short walk or get some fresh air",
    "Use the app to connect with a support buddy",
];

#[derive(Debug, Clone)]
pub struct MergedAssessment {
    pub status: AssessmentStatus,
    pub confidence_score: f64,
    pub needs_support: bool,
    pub reasoning: ReasoningData,
    pub support_reason: Option<String>,
    pub support_tips: Vec<String>,
    pub parse_quality: ParseQuality,
}

/// Prefers the model's value field by field and falls back to the heuristic
/// draft where the model said nothing. A total parse failure contributes the
/// failure defaults, except that a critical draft stays critical. A critical
/// result always needs support.
pub fn merge(parsed: &ParsedResponse, draft: &HeuristicDraft) -> MergedAssessment {
    let model: &ModelAssessment = parsed.assessment();

    let mut extras = draft.reasoning.extras.clone();
    for (key, value) in &model.reasoning.extras {
        extras.insert(key.clone(), value.clone());
    }

    let fallback = &draft.reasoning;
    let reasoning = ReasoningData {
        sleep_hours: model.reasoning.sleep_hours.or(fallback.sleep_hours),
        sleep_quality: model.reasoning.sleep_quality.or(fallback.sleep_quality),
        activity_level: model.reasoning.activity_level.or(fallback.activity_level),
        check_in_mood: model.reasoning.check_in_mood.or(fallback.check_in_mood),
        notes: model
            .reasoning
            .notes
            .clone()
            .or_else(|| fallback.notes.clone()),
        significant_changes: model
            .reasoning
            .significant_changes
            .clone()
            .unwrap_or_else(|| fallback.significant_changes.clone()),
        extras,
    };

    let mut merged = MergedAssessment {
        status: model.status.unwrap_or(draft.status),
        confidence_score: model
            .confidence_score
            .unwrap_or(draft.confidence_score)
            .clamp(0.0, 1.0),
        needs_support: model.needs_support.unwrap_or(draft.needs_support),
        reasoning,
        support_reason: model.support_reason.clone(),
        support_tips: model.support_tips.clone().unwrap_or_default(),
        parse_quality: parsed.quality(),
    };

    if matches!(parsed, ParsedResponse::Failed { .. }) && draft.status == AssessmentStatus::Critical
    {
        merged.status = AssessmentStatus::Critical;
    }

    if merged.status == AssessmentStatus::Critical {
        merged.needs_support = true;
        if merged.support_reason.is_none() {
            merged.support_reason = Some(DEFAULT_SUPPORT_REASON.to_string());
        }
        if merged.support_tips.is_empty() {
            merged.support_tips = DEFAULT_SUPPORT_TIPS.iter().map(|t| t.to_string()).collect();
        }
    }

    merged
}
