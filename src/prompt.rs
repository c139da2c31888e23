use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::collector::SignalWindow;
use crate::heuristics::HeuristicDraft;
use crate::models::{AnalysisType, Baseline, ReasoningData};

const LARGE_SLEEP_DROP_HOURS: f64 = -1.5;
const LARGE_MOOD_DROP_POINTS: f64 = -1.0;

pub struct PromptContext<'a> {
    pub window: &'a SignalWindow,
    pub draft: &'a HeuristicDraft,
    pub baseline: Option<&'a Baseline>,
    pub now: DateTime<Utc>,
}

/// Current values measured against the user's baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BaselineComparison {
    pub sleep_delta: Option<f64>,
    pub mood_delta: Option<f64>,
}

impl BaselineComparison {
    pub fn large_negative_deviation(&self) -> bool {
        self.sleep_delta.is_some_and(|d| d <= LARGE_SLEEP_DROP_HOURS)
            || self.mood_delta.is_some_and(|d| d <= LARGE_MOOD_DROP_POINTS)
    }
}

pub fn compare_to_baseline(current: &ReasoningData, baseline: &Baseline) -> BaselineComparison {
    let delta = |now: Option<f64>, then: Option<f64>| match (now, then) {
        (Some(now), Some(then)) => Some(now - then),
        _ => None,
    };
    BaselineComparison {
        sleep_delta: delta(current.sleep_hours, baseline.metrics.sleep_hours),
        mood_delta: delta(current.check_in_mood, baseline.metrics.check_in_mood),
    }
}

/// Weight of a day's data relative to a sample three or more days old.
pub fn recency_weight(days_ago: i64) -> f64 {
    match days_ago {
        i64::MIN..=0 => 3.0,
        1 => 2.0,
        2 => 1.5,
        _ => 1.0,
    }
}

fn day_label(days_ago: i64) -> String {
    match days_ago {
        i64::MIN..=0 => "today".to_string(),
        1 => "yesterday".to_string(),
        n => format!("{n} days ago"),
    }
}

fn opt(value: Option<f64>, precision: usize, unit: &str) -> String {
    match value {
        Some(v) => format!("{v:.precision$}{unit}"),
        None => "not recorded".to_string(),
    }
}

pub fn build_prompt(ctx: &PromptContext<'_>) -> String {
    let window = ctx.window;
    let recent = window.analysis_type == AnalysisType::Recent;
    let today = ctx.now.date_naive();
    let mut output = String::new();

    let _ = writeln!(
        output,
        "You are assessing mental-health signals for a member of a peer-support community."
    );
    match window.analysis_type {
        AnalysisType::Recent => {
            let _ = writeln!(
                output,
                "Analysis type: recent ({} to {}).",
                window.start.date_naive(),
                today
            );
        }
        AnalysisType::Baseline => {
            let _ = writeln!(
                output,
                "Analysis type: baseline ({} to {}).",
                window
                    .samples
                    .first()
                    .map(|s| s.day)
                    .unwrap_or_else(|| window.start.date_naive()),
                today
            );
        }
    }
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "Missing data points are NOT negative signals. A day without sleep, activity or \
         check-in data only means nothing was recorded; never treat absence as decline."
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Check-in notes (highest priority)");
    if window.check_ins.is_empty() {
        let _ = writeln!(output, "No check-ins recorded.");
    } else {
        for check_in in window.check_ins.iter().rev() {
            let days_ago = (today - check_in.recorded_at.date_naive()).num_days();
            let mut line = format!(
                "- {} ({}): mood {}/5 ({})",
                check_in.recorded_at.date_naive(),
                day_label(days_ago),
                check_in.mood.score,
                check_in.mood.label
            );
            if recent {
                let _ = write!(line, " [weight {:.1}x]", recency_weight(days_ago));
            }
            if let Some(description) = check_in.mood.description.as_deref() {
                let _ = write!(line, " mood note: \"{}\"", description.trim());
            }
            if let Some(notes) = check_in.notes.as_deref().filter(|n| !n.trim().is_empty()) {
                let _ = write!(line, " notes: \"{}\"", notes.trim());
            }
            let _ = writeln!(output, "{line}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Sleep");
    let sleep_days: Vec<_> = window.samples.iter().filter(|s| s.sleep.is_some()).collect();
    if sleep_days.is_empty() {
        let _ = writeln!(output, "No sleep data recorded.");
    }
    for sample in sleep_days.iter().rev() {
        if let Some(sleep) = sample.sleep.as_ref() {
            let days_ago = (today - sample.day).num_days();
            let _ = write!(
                output,
                "- {} ({}): {:.1} h",
                sample.day,
                day_label(days_ago),
                sleep.duration_seconds as f64 / 3600.0
            );
            if let Some(quality) = sleep.quality {
                let _ = write!(output, ", quality {}", quality.as_str());
            }
            if recent {
                let _ = write!(output, " [weight {:.1}x]", recency_weight(days_ago));
            }
            let _ = writeln!(output);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Activity");
    let active_days: Vec<_> = window.samples.iter().filter(|s| s.has_activity()).collect();
    if active_days.is_empty() {
        let _ = writeln!(output, "No activity data recorded.");
    }
    for sample in active_days.iter().rev() {
        let days_ago = (today - sample.day).num_days();
        let _ = write!(output, "- {} ({}):", sample.day, day_label(days_ago));
        if let Some(steps) = sample.steps() {
            let _ = write!(output, " {steps} steps");
        }
        if let Some(seconds) = sample.exercise_seconds() {
            let _ = write!(output, " {} min exercise", seconds / 60);
        }
        if !sample.exercises.is_empty() {
            let kinds: Vec<&str> = sample.exercises.iter().map(|e| e.kind.as_str()).collect();
            let _ = write!(output, " ({})", kinds.join(", "));
        }
        if recent {
            let _ = write!(output, " [weight {:.1}x]", recency_weight(days_ago));
        }
        let _ = writeln!(output);
    }

    let draft = ctx.draft;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Rule-based estimate");
    let _ = writeln!(
        output,
        "- average sleep: {}",
        opt(draft.reasoning.sleep_hours, 1, " h")
    );
    let _ = writeln!(
        output,
        "- sleep quality: {}",
        draft
            .reasoning
            .sleep_quality
            .map(|q| q.as_str())
            .unwrap_or("not recorded")
    );
    let _ = writeln!(
        output,
        "- activity level: {}",
        draft
            .reasoning
            .activity_level
            .map(|a| a.as_str())
            .unwrap_or("not recorded")
    );
    let _ = writeln!(
        output,
        "- average mood: {}",
        opt(draft.reasoning.check_in_mood, 1, "/5")
    );
    let _ = writeln!(
        output,
        "- data completeness: {:.0}%",
        draft.data_completeness * 100.0
    );
    for change in &draft.reasoning.significant_changes {
        let _ = writeln!(output, "- change: {change}");
    }

    match window.analysis_type {
        AnalysisType::Recent => write_recent_guidance(&mut output, ctx),
        AnalysisType::Baseline => {
            let _ = writeln!(output);
            let _ = writeln!(output, "## Baseline run");
            let _ = writeln!(
                output,
                "This run only characterizes the user's normal patterns. Do NOT recommend \
                 support: needsSupport must be false, supportReason null and supportTips empty."
            );
        }
    }

    write_output_contract(&mut output);
    output
}

fn write_recent_guidance(output: &mut String, ctx: &PromptContext<'_>) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recency weighting");
    let _ = writeln!(
        output,
        "Weigh today's data about 3x and yesterday's about 2x as heavily as data from three \
         days ago. Recent notes outweigh older ones."
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Baseline comparison");
    match ctx.baseline {
        Some(baseline) => {
            let comparison = compare_to_baseline(&ctx.draft.reasoning, baseline);
            let _ = writeln!(
                output,
                "Baseline established {} from {} days of data.",
                baseline.established_at.date_naive(),
                baseline.data_points.total_days
            );
            let _ = writeln!(
                output,
                "- sleep: baseline {}, now {}, change {}",
                opt(baseline.metrics.sleep_hours, 1, " h"),
                opt(ctx.draft.reasoning.sleep_hours, 1, " h"),
                opt(comparison.sleep_delta, 1, " h")
            );
            let _ = writeln!(
                output,
                "- mood: baseline {}, now {}, change {}",
                opt(baseline.metrics.check_in_mood, 1, ""),
                opt(ctx.draft.reasoning.check_in_mood, 1, ""),
                opt(comparison.mood_delta, 1, "")
            );
            let _ = writeln!(
                output,
                "- activity: baseline {}, now {}",
                baseline
                    .metrics
                    .activity_level
                    .map(|a| a.as_str())
                    .unwrap_or("not recorded"),
                ctx.draft
                    .reasoning
                    .activity_level
                    .map(|a| a.as_str())
                    .unwrap_or("not recorded")
            );
            if comparison.large_negative_deviation() {
                let _ = writeln!(output, "LARGE NEGATIVE DEVIATION FROM BASELINE DETECTED.");
            }
        }
        None => {
            let _ = writeln!(output, "No baseline established yet; judge the data on its own.");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Support rules");
    let _ = writeln!(output, "Set needsSupport to true if ANY of the following hold:");
    let _ = writeln!(output, "1. mentalHealthStatus is \"critical\".");
    let _ = writeln!(
        output,
        "2. Any note expresses distress, hopelessness, self-harm or being unable to cope."
    );
    let _ = writeln!(output, "3. A large negative deviation from the baseline is present.");
    let _ = writeln!(
        output,
        "4. Two or more negative trend changes are happening at the same time."
    );
}

fn write_output_contract(output: &mut String) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## Response format");
    let _ = writeln!(
        output,
        "Respond with ONLY one JSON object, no prose, using exactly these fields:"
    );
    let _ = writeln!(
        output,
        r#"{{
  "mentalHealthStatus": "stable" | "declining" | "critical",
  "confidenceScore": number between 0 and 1,
  "needsSupport": true | false,
  "reasoning": {{
    "sleepHours": number or null,
    "sleepQuality": "poor" | "fair" | "good" | null,
    "activityLevel": "low" | "moderate" | "high" | null,
    "checkInMood": number from 1 to 5 or null,
    "notes": string or null,
    "significantChanges": [string]
  }},
  "supportReason": string or null,
  "supportTips": [string]
}}"#
    );
    let _ = writeln!(
        output,
        "checkInMood must be numeric on the 1-5 scale, never a word. needsSupport belongs at \
         the top level, not inside reasoning."
    );
}
