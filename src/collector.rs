use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{AnalysisType, CheckIn, HealthSample};
use crate::store::SignalSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Days(u32),
    AllHistory,
}

impl Window {
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Days(days) => now - Duration::days(i64::from((*days).max(1))),
            Self::AllHistory => DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Everything the downstream stages see about one user for one run.
#[derive(Debug, Clone)]
pub struct SignalWindow {
    pub user_id: Uuid,
    pub analysis_type: AnalysisType,
    pub window: Window,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub samples: Vec<HealthSample>,
    pub check_ins: Vec<CheckIn>,
}

impl SignalWindow {
    /// Days the run asked for. For full history, the span from the first sample to `end`.
    pub fn requested_days(&self) -> i64 {
        match self.window {
            Window::Days(days) => i64::from(days.max(1)),
            Window::AllHistory => {
                let first_sample = self.samples.first().map(|s| s.day);
                let first_check_in = self.check_ins.first().map(|c| c.recorded_at.date_naive());
                match first_sample.into_iter().chain(first_check_in).min() {
                    Some(first) => (self.end.date_naive() - first).num_days() + 1,
                    None => 0,
                }
            }
        }
    }
}

pub async fn collect_signals(
    source: &dyn SignalSource,
    user_id: Uuid,
    window: Window,
    analysis_type: AnalysisType,
    now: DateTime<Utc>,
) -> Result<SignalWindow> {
    let start = window.start(now);
    let mut samples = source.samples_between(user_id, start, now).await?;
    let mut check_ins = source.check_ins_between(user_id, start, now).await?;
    samples.sort_by_key(|s| s.day);
    check_ins.sort_by_key(|c| c.recorded_at);

    tracing::debug!(
        user_id = %user_id,
        analysis = analysis_type.as_str(),
        samples = samples.len(),
        check_ins = check_ins.len(),
        "collected health signals"
    );

    Ok(SignalWindow {
        user_id,
        analysis_type,
        window,
        start,
        end: now,
        samples,
        check_ins,
    })
}
