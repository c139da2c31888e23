use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::collector::SignalWindow;
use crate::models::{
    ActivityLevel, AssessmentStatus, CheckIn, DataPoints, HealthSample, ReasoningData,
    SleepQuality,
};

const HIGH_AVG_STEPS: f64 = 10_000.0;
const HIGH_EXERCISE_MINUTES: f64 = 150.0;
const MODERATE_AVG_STEPS: f64 = 5_000.0;
const MODERATE_EXERCISE_MINUTES: f64 = 75.0;

const SLEEP_SHIFT_HOURS: f64 = 1.5;
const STEP_SHIFT_RATIO: f64 = 0.3;
const MOOD_SHIFT_POINTS: f64 = 1.0;

const CRITICAL_MOOD: f64 = 2.0;
const DECLINING_SLEEP_HOURS: f64 = 5.0;

#[derive(Debug, Clone)]
pub struct HeuristicDraft {
    pub status: AssessmentStatus,
    pub confidence_score: f64,
    pub needs_support: bool,
    pub reasoning: ReasoningData,
    pub data_completeness: f64,
    pub average_steps: Option<f64>,
    pub recent_exercise_minutes: Option<f64>,
    pub data_points: DataPoints,
}

pub fn preprocess(window: &SignalWindow) -> HeuristicDraft {
    let samples = &window.samples;
    let check_ins = &window.check_ins;

    let sleep_hours = average_sleep_hours(samples);
    let check_in_mood = average_mood(check_ins);
    let significant_changes = significant_changes(samples, check_ins);
    let status = derive_status(check_in_mood, sleep_hours, significant_changes.len());
    let data_completeness = data_completeness(window);
    let average_steps = average_steps(samples);
    let recent_exercise_minutes = recent_exercise_minutes(samples);

    let mut extras = Map::new();
    extras.insert("dataCompleteness".to_string(), Value::from(data_completeness));
    if let Some(steps) = average_steps {
        extras.insert("averageSteps".to_string(), Value::from(steps));
    }
    if let Some(minutes) = recent_exercise_minutes {
        extras.insert("recentExerciseMinutes".to_string(), Value::from(minutes));
    }

    HeuristicDraft {
        status,
        confidence_score: 0.2 + 0.3 * data_completeness,
        needs_support: status == AssessmentStatus::Critical,
        reasoning: ReasoningData {
            sleep_hours,
            sleep_quality: dominant_sleep_quality(samples),
            activity_level: activity_level(samples),
            check_in_mood,
            notes: latest_notes(check_ins),
            significant_changes,
            extras,
        },
        data_completeness,
        average_steps,
        recent_exercise_minutes,
        data_points: data_points(samples, check_ins),
    }
}

pub fn derive_status(
    average_mood: Option<f64>,
    average_sleep_hours: Option<f64>,
    change_count: usize,
) -> AssessmentStatus {
    if average_mood.is_some_and(|mood| mood < CRITICAL_MOOD) {
        AssessmentStatus::Critical
    } else if average_sleep_hours.is_some_and(|hours| hours < DECLINING_SLEEP_HOURS)
        || change_count > 2
    {
        AssessmentStatus::Declining
    } else {
        AssessmentStatus::Stable
    }
}

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

pub fn average_sleep_hours(samples: &[HealthSample]) -> Option<f64> {
    mean(
        samples
            .iter()
            .filter_map(|s| s.sleep.as_ref())
            .map(|sleep| sleep.duration_seconds as f64 / 3600.0),
    )
}

/// Most frequent recorded quality. Counts accumulate in chronological order
/// and the leader only changes when another category strictly overtakes it,
/// so the first category to reach the maximum count wins a tie.
pub fn dominant_sleep_quality(samples: &[HealthSample]) -> Option<SleepQuality> {
    fn slot(quality: SleepQuality) -> usize {
        match quality {
            SleepQuality::Poor => 0,
            SleepQuality::Fair => 1,
            SleepQuality::Good => 2,
        }
    }

    let mut counts = [0usize; 3];
    let mut leader: Option<SleepQuality> = None;
    for quality in samples
        .iter()
        .filter_map(|s| s.sleep.as_ref().and_then(|sleep| sleep.quality))
    {
        counts[slot(quality)] += 1;
        match leader {
            Some(current) if counts[slot(current)] >= counts[slot(quality)] => {}
            _ => leader = Some(quality),
        }
    }
    leader
}

pub fn classify_activity(average_steps: f64, total_exercise_minutes: f64) -> ActivityLevel {
    if average_steps > HIGH_AVG_STEPS || total_exercise_minutes > HIGH_EXERCISE_MINUTES {
        ActivityLevel::High
    } else if average_steps > MODERATE_AVG_STEPS
        || total_exercise_minutes > MODERATE_EXERCISE_MINUTES
    {
        ActivityLevel::Moderate
    } else {
        ActivityLevel::Low
    }
}

pub fn activity_level(samples: &[HealthSample]) -> Option<ActivityLevel> {
    let active: Vec<&HealthSample> = samples.iter().filter(|s| s.has_activity()).collect();
    if active.is_empty() {
        return None;
    }
    let average_steps = active
        .iter()
        .map(|s| s.steps().unwrap_or(0) as f64)
        .sum::<f64>()
        / active.len() as f64;
    let exercise_minutes = active
        .iter()
        .map(|s| s.exercise_seconds().unwrap_or(0) as f64)
        .sum::<f64>()
        / 60.0;
    Some(classify_activity(average_steps, exercise_minutes))
}

pub fn average_mood(check_ins: &[CheckIn]) -> Option<f64> {
    mean(check_ins.iter().map(|c| f64::from(c.mood.score)))
}

/// Most recent non-empty note, falling back to the mood description.
pub fn latest_notes(check_ins: &[CheckIn]) -> Option<String> {
    check_ins.iter().rev().find_map(|check_in| {
        check_in
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|note| !note.is_empty())
            .or_else(|| {
                check_in
                    .mood
                    .description
                    .as_deref()
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
            })
            .map(str::to_string)
    })
}

pub fn recent_exercise_minutes(samples: &[HealthSample]) -> Option<f64> {
    let days: Vec<&HealthSample> = samples.iter().filter(|s| !s.exercises.is_empty()).collect();
    if days.is_empty() {
        return None;
    }
    let seconds: i64 = days
        .iter()
        .flat_map(|s| s.exercises.iter())
        .map(|e| e.duration_seconds)
        .sum();
    Some(seconds as f64 / 60.0)
}

pub fn average_steps(samples: &[HealthSample]) -> Option<f64> {
    mean(
        samples
            .iter()
            .filter_map(HealthSample::steps)
            .filter(|steps| *steps > 0)
            .map(|steps| steps as f64),
    )
}

fn recorded_steps_mean(samples: &[HealthSample]) -> Option<f64> {
    mean(samples.iter().filter_map(HealthSample::steps).map(|s| s as f64))
}

pub fn significant_changes(samples: &[HealthSample], check_ins: &[CheckIn]) -> Vec<String> {
    let mut changes = Vec::new();

    if samples.len() >= 7 {
        let split = samples.len() - 3;
        let recent = &samples[split..];
        let previous = &samples[split - 4..split];

        if let (Some(now), Some(before)) =
            (average_sleep_hours(recent), average_sleep_hours(previous))
        {
            let delta = now - before;
            if delta.abs() > SLEEP_SHIFT_HOURS {
                changes.push(format!(
                    "Sleep {} by {:.1} hours (last 3 days vs previous 4)",
                    if delta < 0.0 { "decreased" } else { "increased" },
                    delta.abs()
                ));
            }
        }

        if let (Some(now), Some(before)) =
            (recorded_steps_mean(recent), recorded_steps_mean(previous))
        {
            if before > 0.0 {
                let ratio = (now - before) / before;
                if ratio.abs() > STEP_SHIFT_RATIO {
                    changes.push(format!(
                        "Step count {} by {:.0}% (last 3 days vs previous 4)",
                        if ratio < 0.0 { "decreased" } else { "increased" },
                        ratio.abs() * 100.0
                    ));
                }
            }
        }
    }

    if check_ins.len() >= 4 {
        let split = check_ins.len() - 2;
        let now = average_mood(&check_ins[split..]);
        let before = average_mood(&check_ins[split - 2..split]);
        if let (Some(now), Some(before)) = (now, before) {
            let delta = now - before;
            if delta.abs() >= MOOD_SHIFT_POINTS {
                changes.push(format!(
                    "Mood {} by {:.1} points (last 2 check-ins vs previous 2)",
                    if delta < 0.0 { "declined" } else { "improved" },
                    delta.abs()
                ));
            }
        }
    }

    changes
}

fn data_completeness(window: &SignalWindow) -> f64 {
    let requested = window.requested_days();
    if requested <= 0 {
        return 0.0;
    }
    let observed: BTreeSet<NaiveDate> = window
        .samples
        .iter()
        .map(|s| s.day)
        .chain(window.check_ins.iter().map(|c| c.recorded_at.date_naive()))
        .collect();
    (observed.len() as f64 / requested as f64).min(1.0)
}

fn data_points(samples: &[HealthSample], check_ins: &[CheckIn]) -> DataPoints {
    let days: BTreeSet<NaiveDate> = samples.iter().map(|s| s.day).collect();
    DataPoints {
        total_days: days.len() as i32,
        days_with_sleep_data: samples.iter().filter(|s| s.sleep.is_some()).count() as i32,
        days_with_activity_data: samples.iter().filter(|s| s.has_activity()).count() as i32,
        check_ins_count: check_ins.len() as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Window;
    use crate::models::{ActivityData, AnalysisType, ExerciseEntry, Mood, SleepData};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn sample(days_ago: i64, sleep_hours: Option<f64>, steps: Option<i64>) -> HealthSample {
        HealthSample {
            user_id: Uuid::nil(),
            day: Utc::now().date_naive() - Duration::days(days_ago),
            sleep: sleep_hours.map(|h| SleepData {
                duration_seconds: (h * 3600.0) as i64,
                quality: None,
            }),
            activity: steps.map(|s| ActivityData {
                steps: Some(s),
                exercise_seconds: None,
            }),
            exercises: Vec::new(),
        }
    }

    fn with_quality(days_ago: i64, quality: SleepQuality) -> HealthSample {
        let mut s = sample(days_ago, Some(7.0), None);
        if let Some(sleep) = s.sleep.as_mut() {
            sleep.quality = Some(quality);
        }
        s
    }

    fn check_in(hours_ago: i64, score: u8, notes: Option<&str>) -> CheckIn {
        CheckIn {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            recorded_at: Utc::now() - Duration::hours(hours_ago),
            mood: Mood {
                score,
                label: "okay".to_string(),
                description: None,
            },
            notes: notes.map(str::to_string),
        }
    }

    fn window(samples: Vec<HealthSample>, check_ins: Vec<CheckIn>, days: u32) -> SignalWindow {
        let now = Utc::now();
        SignalWindow {
            user_id: Uuid::nil(),
            analysis_type: AnalysisType::Recent,
            window: Window::Days(days),
            start: Window::Days(days).start(now),
            end: now,
            samples,
            check_ins,
        }
    }

    #[test]
    fn metrics_without_inputs_are_undefined() {
        let empty: Vec<HealthSample> = vec![sample(0, None, None)];
        assert_eq!(average_sleep_hours(&empty), None);
        assert_eq!(dominant_sleep_quality(&empty), None);
        assert_eq!(activity_level(&empty), None);
        assert_eq!(average_steps(&empty), None);
        assert_eq!(recent_exercise_minutes(&empty), None);
        assert_eq!(average_mood(&[]), None);
        assert_eq!(latest_notes(&[]), None);
    }

    #[test]
    fn activity_boundaries() {
        assert_eq!(classify_activity(10_001.0, 0.0), ActivityLevel::High);
        assert_eq!(classify_activity(5_001.0, 0.0), ActivityLevel::Moderate);
        assert_eq!(classify_activity(100.0, 0.0), ActivityLevel::Low);
        assert_eq!(classify_activity(0.0, 151.0), ActivityLevel::High);
        assert_eq!(classify_activity(0.0, 76.0), ActivityLevel::Moderate);
        assert_eq!(classify_activity(10_000.0, 150.0), ActivityLevel::Moderate);
    }

    #[test]
    fn activity_level_counts_exercise_entries() {
        let mut s = sample(0, None, None);
        s.exercises.push(ExerciseEntry {
            kind: "run".to_string(),
            duration_seconds: 160 * 60,
        });
        assert_eq!(activity_level(&[s.clone()]), Some(ActivityLevel::High));
        assert_eq!(recent_exercise_minutes(&[s]), Some(160.0));
    }

    #[test]
    fn average_steps_ignores_zero_days() {
        let samples = vec![sample(1, None, Some(0)), sample(0, None, Some(4000))];
        assert_eq!(average_steps(&samples), Some(4000.0));
    }

    #[test]
    fn sleep_quality_tie_goes_to_first_to_reach_max() {
        let samples = vec![
            with_quality(3, SleepQuality::Good),
            with_quality(2, SleepQuality::Poor),
            with_quality(1, SleepQuality::Poor),
            with_quality(0, SleepQuality::Good),
        ];
        assert_eq!(dominant_sleep_quality(&samples), Some(SleepQuality::Poor));

        let samples = vec![
            with_quality(1, SleepQuality::Fair),
            with_quality(0, SleepQuality::Good),
        ];
        assert_eq!(dominant_sleep_quality(&samples), Some(SleepQuality::Fair));
    }

    #[test]
    fn latest_notes_prefers_recent_and_falls_back_to_description() {
        let mut older = check_in(30, 3, Some("long week"));
        older.mood.description = Some("tired".to_string());
        let mut newer = check_in(2, 3, Some("   "));
        newer.mood.description = Some("anxious about exams".to_string());
        assert_eq!(
            latest_notes(&[older.clone(), newer]),
            Some("anxious about exams".to_string())
        );
        assert_eq!(latest_notes(&[older]), Some("long week".to_string()));
    }

    #[test]
    fn detects_sleep_step_and_mood_shifts() {
        let samples = vec![
            sample(6, Some(8.0), Some(9000)),
            sample(5, Some(8.0), Some(9000)),
            sample(4, Some(8.0), Some(9000)),
            sample(3, Some(8.0), Some(9000)),
            sample(2, Some(5.5), Some(3000)),
            sample(1, Some(5.5), Some(3000)),
            sample(0, Some(5.5), Some(3000)),
        ];
        let check_ins = vec![
            check_in(72, 4, None),
            check_in(48, 4, None),
            check_in(24, 2, None),
            check_in(1, 2, None),
        ];
        let changes = significant_changes(&samples, &check_ins);
        assert_eq!(changes.len(), 3);
        assert!(changes[0].starts_with("Sleep decreased by 2.5"));
        assert!(changes[1].starts_with("Step count decreased by 67%"));
        assert!(changes[2].starts_with("Mood declined by 2.0"));
    }

    #[test]
    fn short_histories_report_no_changes() {
        let samples: Vec<HealthSample> =
            (0..6).map(|d| sample(d, Some(4.0 + d as f64), Some(100))).collect();
        let check_ins = vec![check_in(3, 5, None), check_in(1, 1, None)];
        assert!(significant_changes(&samples, &check_ins).is_empty());
    }

    #[test]
    fn low_mood_is_critical_and_needs_support() {
        let draft = preprocess(&window(
            vec![sample(0, Some(7.0), None)],
            vec![check_in(2, 1, Some("can't cope")), check_in(1, 2, None)],
            3,
        ));
        assert_eq!(draft.status, AssessmentStatus::Critical);
        assert!(draft.needs_support);
        assert_eq!(draft.reasoning.check_in_mood, Some(1.5));
    }

    #[test]
    fn short_sleep_is_declining() {
        assert_eq!(
            derive_status(Some(3.0), Some(4.5), 0),
            AssessmentStatus::Declining
        );
        assert_eq!(derive_status(None, None, 3), AssessmentStatus::Declining);
        assert_eq!(derive_status(None, None, 2), AssessmentStatus::Stable);
    }

    #[test]
    fn completeness_and_data_points() {
        let draft = preprocess(&window(
            vec![sample(1, Some(7.0), Some(6000)), sample(0, None, None)],
            vec![check_in(1, 4, None)],
            4,
        ));
        assert!((draft.data_completeness - 0.5).abs() < 1e-9);
        assert!((draft.confidence_score - 0.35).abs() < 1e-9);
        assert_eq!(
            draft.data_points,
            DataPoints {
                total_days: 2,
                days_with_sleep_data: 1,
                days_with_activity_data: 1,
                check_ins_count: 1,
            }
        );
        assert_eq!(
            draft.reasoning.extras.get("averageSteps"),
            Some(&Value::from(6000.0))
        );
    }
}
