use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::collector::{collect_signals, SignalWindow, Window};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::escalation::EscalationEngine;
use crate::heuristics::{self, HeuristicDraft};
use crate::merge::{merge, MergedAssessment};
use crate::model_client::TextModel;
use crate::models::{AnalysisType, Assessment, Baseline, SupportRequestStatus};
use crate::parser::parse_model_response;
use crate::prompt::{build_prompt, compare_to_baseline, PromptContext};
use crate::store::{AssessmentStore, SignalSource};

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub assessment: Assessment,
    /// Status after escalation was initiated; `None` when no support was needed.
    pub escalation: Option<SupportRequestStatus>,
}

#[derive(Debug, Clone)]
pub struct BaselineOutcome {
    pub baseline: Baseline,
    pub assessment: Assessment,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub users: usize,
    pub assessed: usize,
    pub escalated: usize,
    pub failed: usize,
}

pub struct AssessmentPipeline {
    signals: Arc<dyn SignalSource>,
    assessments: Arc<dyn AssessmentStore>,
    model: Arc<dyn TextModel>,
    escalation: Arc<EscalationEngine>,
    config: PipelineConfig,
}

impl AssessmentPipeline {
    pub fn new(
        signals: Arc<dyn SignalSource>,
        assessments: Arc<dyn AssessmentStore>,
        model: Arc<dyn TextModel>,
        escalation: Arc<EscalationEngine>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            signals,
            assessments,
            model,
            escalation,
            config,
        }
    }

    async fn ensure_user(&self, user_id: Uuid) -> Result<()> {
        if !self.signals.user_exists(user_id).await? {
            return Err(PipelineError::NotFound {
                kind: "user",
                id: user_id,
            }
            .into());
        }
        Ok(())
    }

    /// Runs the shared stages up to the merged result.
    async fn assess(
        &self,
        window: &SignalWindow,
        draft: &HeuristicDraft,
        baseline: Option<&Baseline>,
        now: DateTime<Utc>,
    ) -> Result<MergedAssessment> {
        let prompt = build_prompt(&PromptContext {
            window,
            draft,
            baseline,
            now,
        });
        let text = self.model.generate(&prompt).await?;
        let parsed = parse_model_response(&text);
        Ok(merge(&parsed, draft))
    }

    fn assessment_from(
        user_id: Uuid,
        merged: MergedAssessment,
        analysis_type: AnalysisType,
        baseline_compared: bool,
        now: DateTime<Utc>,
    ) -> Assessment {
        Assessment {
            id: Uuid::new_v4(),
            user_id,
            created_at: now,
            status: merged.status,
            confidence_score: merged.confidence_score,
            reasoning: merged.reasoning,
            needs_support: merged.needs_support,
            support_request_status: SupportRequestStatus::None,
            support_request_time: None,
            support_provided_by: None,
            support_provided_time: None,
            analysis_type,
            support_reason: merged.support_reason,
            support_tips: merged.support_tips,
            baseline_compared,
            parse_quality: merged.parse_quality,
            next_escalation_due_at: None,
        }
    }

    /// Characterises the user's normal pattern over their full history (or the
    /// configured cap). Support is never recommended from this run.
    pub async fn establish_baseline(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<BaselineOutcome> {
        self.ensure_user(user_id).await?;
        let window = match self.config.baseline_cap_days {
            Some(days) => Window::Days(days),
            None => Window::AllHistory,
        };
        let signals = collect_signals(
            self.signals.as_ref(),
            user_id,
            window,
            AnalysisType::Baseline,
            now,
        )
        .await?;
        let draft = heuristics::preprocess(&signals);
        let mut merged = self.assess(&signals, &draft, None, now).await?;
        merged.needs_support = false;
        merged.support_reason = None;
        merged.support_tips.clear();

        let baseline = Baseline {
            id: Uuid::new_v4(),
            user_id,
            established_at: now,
            metrics: merged.reasoning.clone(),
            confidence_score: merged.confidence_score,
            data_points: draft.data_points,
        };
        self.assessments
            .insert_baseline(&baseline)
            .await
            .context("failed to store baseline")?;

        let assessment =
            Self::assessment_from(user_id, merged, AnalysisType::Baseline, false, now);
        self.assessments
            .insert_assessment(&assessment)
            .await
            .context("failed to store baseline assessment")?;

        info!(
            user_id = %user_id,
            total_days = baseline.data_points.total_days,
            check_ins = baseline.data_points.check_ins_count,
            confidence = baseline.confidence_score,
            "baseline established"
        );
        Ok(BaselineOutcome {
            baseline,
            assessment,
        })
    }

    /// Short-horizon assessment compared against the current baseline.
    pub async fn analyze_recent(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AnalysisOutcome> {
        self.ensure_user(user_id).await?;
        let signals = collect_signals(
            self.signals.as_ref(),
            user_id,
            Window::Days(self.config.recent_window_days),
            AnalysisType::Recent,
            now,
        )
        .await?;
        let draft = heuristics::preprocess(&signals);
        let baseline = self.assessments.current_baseline(user_id).await?;
        let mut merged = self.assess(&signals, &draft, baseline.as_ref(), now).await?;

        let extras = &mut merged.reasoning.extras;
        extras.insert(
            "baselineCompared".to_string(),
            Value::Bool(baseline.is_some()),
        );
        if let Some(baseline) = &baseline {
            let comparison = compare_to_baseline(&draft.reasoning, baseline);
            if let Some(delta) = comparison.sleep_delta {
                extras.insert("baselineSleepDelta".to_string(), Value::from(delta));
            }
            if let Some(delta) = comparison.mood_delta {
                extras.insert("baselineMoodDelta".to_string(), Value::from(delta));
            }
        }

        let mut assessment = Self::assessment_from(
            user_id,
            merged,
            AnalysisType::Recent,
            baseline.is_some(),
            now,
        );
        self.assessments
            .insert_assessment(&assessment)
            .await
            .context("failed to store assessment")?;
        info!(
            user_id = %user_id,
            assessment_id = %assessment.id,
            status = %assessment.status,
            needs_support = assessment.needs_support,
            parse_quality = assessment.parse_quality.as_str(),
            "recent assessment stored"
        );

        let escalation = if assessment.needs_support {
            let status = self
                .escalation
                .initiate_support_request(user_id, assessment.id, now)
                .await?;
            assessment.support_request_status = status;
            Some(status)
        } else {
            None
        };

        Ok(AnalysisOutcome {
            assessment,
            escalation,
        })
    }

    /// Recent analysis for every known user, one at a time. A failing user is skipped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        let users = self.signals.known_users().await?;
        let mut summary = SweepSummary {
            users: users.len(),
            ..SweepSummary::default()
        };

        for user_id in users {
            match self.analyze_recent(user_id, now).await {
                Ok(outcome) => {
                    summary.assessed += 1;
                    if outcome.escalation.is_some() {
                        summary.escalated += 1;
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(user_id = %user_id, error = %e, "sweep skipped user");
                }
            }
        }

        info!(
            users = summary.users,
            assessed = summary.assessed,
            escalated = summary.escalated,
            failed = summary.failed,
            "sweep finished"
        );
        Ok(summary)
    }
}
