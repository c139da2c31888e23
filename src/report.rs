use std::collections::HashMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Assessment, Baseline, SupportDirection, SupportHistoryEntry, SupportTier};
use crate::stats::StatisticsSummary;

#[derive(Debug, Clone, PartialEq)]
pub struct TierSummary {
    pub tier: SupportTier,
    pub provided: usize,
    pub received: usize,
}

pub fn summarize_by_tier(history: &[SupportHistoryEntry]) -> Vec<TierSummary> {
    let mut map: HashMap<SupportTier, (usize, usize)> = HashMap::new();

    for entry in history {
        let counts = map.entry(entry.tier).or_insert((0, 0));
        match entry.direction {
            SupportDirection::Provided => counts.0 += 1,
            SupportDirection::Received => counts.1 += 1,
        }
    }

    let mut summaries: Vec<TierSummary> = map
        .into_iter()
        .map(|(tier, (provided, received))| TierSummary {
            tier,
            provided,
            received,
        })
        .collect();

    summaries.sort_by(|a, b| {
        (b.provided + b.received)
            .cmp(&(a.provided + a.received))
            .then_with(|| a.tier.as_str().cmp(b.tier.as_str()))
    });
    summaries
}

fn or_missing(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.precision$}"))
}

pub fn build_support_report(
    user_id: Uuid,
    generated_at: DateTime<Utc>,
    latest: Option<&Assessment>,
    baseline: Option<&Baseline>,
    statistics: &StatisticsSummary,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Wellbeing & Support Report");
    let _ = writeln!(output, "Generated for {} on {}", user_id, generated_at.date_naive());
    let _ = writeln!(output);
    let _ = writeln!(output, "## Latest Assessment");

    match latest {
        None => {
            let _ = writeln!(output, "No assessments recorded yet.");
        }
        Some(assessment) => {
            let _ = writeln!(
                output,
                "- {} ({} run, confidence {:.2}, parse {}) on {}",
                assessment.status,
                assessment.analysis_type.as_str(),
                assessment.confidence_score,
                assessment.parse_quality.as_str(),
                assessment.created_at.format("%Y-%m-%d %H:%M")
            );
            let reasoning = &assessment.reasoning;
            let _ = writeln!(
                output,
                "- sleep {} h, mood {}, activity {}",
                or_missing(reasoning.sleep_hours, 1),
                or_missing(reasoning.check_in_mood, 1),
                reasoning.activity_level.map_or("n/a", |a| a.as_str())
            );
            let _ = writeln!(
                output,
                "- support request: {}",
                assessment.support_request_status
            );
            if let Some(reason) = &assessment.support_reason {
                let _ = writeln!(output, "- reason: {reason}");
            }
            for change in &reasoning.significant_changes {
                let _ = writeln!(output, "- change: {change}");
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Baseline");

    match baseline {
        None => {
            let _ = writeln!(output, "No baseline established yet.");
        }
        Some(baseline) => {
            let points = &baseline.data_points;
            let _ = writeln!(
                output,
                "- established {} from {} days ({} with sleep, {} with activity, {} check-ins)",
                baseline.established_at.date_naive(),
                points.total_days,
                points.days_with_sleep_data,
                points.days_with_activity_data,
                points.check_ins_count
            );
            let _ = writeln!(
                output,
                "- typical sleep {} h, typical mood {}",
                or_missing(baseline.metrics.sleep_hours, 1),
                or_missing(baseline.metrics.check_in_mood, 1)
            );
        }
    }

    let stats = &statistics.statistics;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Peer Support");
    let _ = writeln!(output, "Impact score: {}/100", statistics.impact_score);
    let _ = writeln!(
        output,
        "- provided {} (buddy {}, community {}, global {})",
        stats.provided.total,
        stats.provided.buddy_tier,
        stats.provided.community_tier,
        stats.provided.global_tier
    );
    let _ = writeln!(
        output,
        "- received {} (buddy {}, community {}, global {})",
        stats.received.total,
        stats.received.buddy_tier,
        stats.received.community_tier,
        stats.received.global_tier
    );

    let summaries = summarize_by_tier(&stats.history);
    if !summaries.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Support by Tier");
        for summary in &summaries {
            let _ = writeln!(
                output,
                "- {}: {} provided, {} received",
                summary.tier, summary.provided, summary.received
            );
        }
    }

    let mut recent = stats.history.clone();
    recent.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Support");

    if recent.is_empty() {
        let _ = writeln!(output, "No support exchanged yet.");
    } else {
        for entry in recent.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} via {} tier with {} on {}",
                entry.direction.as_str(),
                entry.tier,
                entry.counterpart_id,
                entry.occurred_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    output
}
