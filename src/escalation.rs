use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EscalationTimeouts;
use crate::error::PipelineError;
use crate::models::{AnalysisType, Notification, SupportCredit, SupportRequestStatus, SupportTier};
use crate::store::{AssessmentStore, Notifier, PeerDirectory, StatsStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Requests opened for assessments whose initiation never completed.
    pub initiated: usize,
    pub due: usize,
    pub advanced: usize,
    pub failed: usize,
}

pub struct EscalationEngine {
    assessments: Arc<dyn AssessmentStore>,
    peers: Arc<dyn PeerDirectory>,
    stats: Arc<dyn StatsStore>,
    notifier: Arc<dyn Notifier>,
    timeouts: EscalationTimeouts,
}

impl EscalationEngine {
    pub fn new(
        assessments: Arc<dyn AssessmentStore>,
        peers: Arc<dyn PeerDirectory>,
        stats: Arc<dyn StatsStore>,
        notifier: Arc<dyn Notifier>,
        timeouts: EscalationTimeouts,
    ) -> Self {
        Self {
            assessments,
            peers,
            stats,
            notifier,
            timeouts,
        }
    }

    fn timeout(&self, tier: SupportTier) -> chrono::Duration {
        match tier {
            SupportTier::Buddy => self.timeouts.buddy,
            SupportTier::Community => self.timeouts.community,
            SupportTier::Global => self.timeouts.global,
        }
    }

    async fn recipients(&self, tier: SupportTier, user_id: Uuid) -> Result<Vec<Uuid>> {
        match tier {
            SupportTier::Buddy => self.peers.buddy_ids(user_id).await,
            SupportTier::Community => self.peers.community_peer_ids(user_id).await,
            SupportTier::Global => self.peers.global_peer_ids(user_id).await,
        }
    }

    /// Opens a support request. Users without buddies start at the community tier.
    pub async fn initiate_support_request(
        &self,
        user_id: Uuid,
        assessment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SupportRequestStatus> {
        let Some(assessment) = self.assessments.get_assessment(assessment_id).await? else {
            return Err(PipelineError::NotFound {
                kind: "assessment",
                id: assessment_id,
            }
            .into());
        };
        if assessment.analysis_type != AnalysisType::Recent {
            return Err(PipelineError::Validation {
                field: "assessment",
                value: assessment_id.to_string(),
                reason: "baseline assessments never open a support request".to_string(),
            }
            .into());
        }

        let buddies = self.peers.buddy_ids(user_id).await?;
        let tier = if buddies.is_empty() {
            info!(user_id = %user_id, "no buddies, starting at community tier");
            SupportTier::Community
        } else {
            SupportTier::Buddy
        };

        let next = tier.requested_status();
        let moved = self
            .assessments
            .transition_support_status(assessment_id, SupportRequestStatus::None, next, now)
            .await?;
        if !moved {
            let current = self
                .assessments
                .get_assessment(assessment_id)
                .await?
                .map(|a| a.support_request_status)
                .unwrap_or(SupportRequestStatus::None);
            warn!(
                assessment_id = %assessment_id,
                status = %current,
                "support request already open or not eligible"
            );
            return Ok(current);
        }
        info!(
            assessment_id = %assessment_id,
            from = %SupportRequestStatus::None,
            to = %next,
            "support status transition"
        );

        let recipients = match tier {
            SupportTier::Buddy => buddies,
            other => self.recipients(other, user_id).await?,
        };
        self.notify_tier(user_id, assessment_id, tier, &recipients).await;
        self.schedule_escalation(assessment_id, tier, now).await?;
        Ok(next)
    }

    /// Persists when the request waiting on `tier` should widen.
    pub async fn schedule_escalation(
        &self,
        assessment_id: Uuid,
        tier: SupportTier,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let due = now + self.timeout(tier);
        let scheduled = self
            .assessments
            .set_escalation_due(assessment_id, tier.requested_status(), Some(due))
            .await?;
        if scheduled {
            debug!(assessment_id = %assessment_id, tier = %tier, due = %due, "escalation scheduled");
        } else {
            debug!(assessment_id = %assessment_id, tier = %tier, "status moved on, nothing scheduled");
        }
        Ok(scheduled)
    }

    /// Timer fire for a request scheduled while waiting on `from_tier`.
    /// Returns the new status when the request actually widened.
    pub async fn on_escalation_due(
        &self,
        assessment_id: Uuid,
        from_tier: SupportTier,
        now: DateTime<Utc>,
    ) -> Result<Option<SupportRequestStatus>> {
        let Some(assessment) = self.assessments.get_assessment(assessment_id).await? else {
            warn!(assessment_id = %assessment_id, "escalation fired for missing assessment");
            return Ok(None);
        };
        let expected = from_tier.requested_status();
        if assessment.support_request_status != expected {
            debug!(
                assessment_id = %assessment_id,
                status = %assessment.support_request_status,
                tier = %from_tier,
                "stale escalation timer"
            );
            return Ok(None);
        }

        let Some(next_tier) = from_tier.next() else {
            self.assessments
                .set_escalation_due(assessment_id, expected, None)
                .await?;
            warn!(
                assessment_id = %assessment_id,
                "global tier timed out with no response, request stays open"
            );
            return Ok(None);
        };

        let next = next_tier.requested_status();
        if !self
            .assessments
            .transition_support_status(assessment_id, expected, next, now)
            .await?
        {
            debug!(assessment_id = %assessment_id, "status changed before escalation write");
            return Ok(None);
        }
        info!(
            assessment_id = %assessment_id,
            from = %expected,
            to = %next,
            "support status transition"
        );

        let recipients = self.recipients(next_tier, assessment.user_id).await?;
        self.notify_tier(assessment.user_id, assessment_id, next_tier, &recipients)
            .await;
        self.schedule_escalation(assessment_id, next_tier, now).await?;
        Ok(Some(next))
    }

    /// Opens requests left unopened by an interrupted run, then fires every
    /// escalation whose due time has passed. One failure does not stop the rest.
    pub async fn reconcile_due_escalations(&self, now: DateTime<Utc>) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();

        for assessment in self.assessments.pending_initiations(now).await? {
            match self
                .initiate_support_request(assessment.user_id, assessment.id, now)
                .await
            {
                Ok(SupportRequestStatus::None) => {}
                Ok(_) => summary.initiated += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(assessment_id = %assessment.id, error = %e, "support initiation failed");
                }
            }
        }

        let due = self.assessments.due_escalations(now).await?;
        summary.due = due.len();

        for assessment in due {
            let Some(tier) = assessment.support_request_status.active_tier() else {
                continue;
            };
            match self.on_escalation_due(assessment.id, tier, now).await {
                Ok(Some(_)) => summary.advanced += 1,
                Ok(None) => {}
                Err(e) => {
                    summary.failed += 1;
                    warn!(assessment_id = %assessment.id, error = %e, "escalation failed");
                }
            }
        }

        if summary.due > 0 || summary.initiated > 0 {
            info!(
                initiated = summary.initiated,
                due = summary.due,
                advanced = summary.advanced,
                failed = summary.failed,
                "escalation reconciliation finished"
            );
        }
        Ok(summary)
    }

    /// Closes a request and credits both parties. False when the assessment is
    /// missing, has no open request, or another call already closed it.
    pub async fn record_support_provided(
        &self,
        assessment_id: Uuid,
        provider_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(assessment) = self.assessments.get_assessment(assessment_id).await? else {
            return Ok(false);
        };
        let previous = assessment.support_request_status;
        let Some(tier) = previous.active_tier() else {
            debug!(assessment_id = %assessment_id, status = %previous, "no open request to credit");
            return Ok(false);
        };

        let credit = SupportCredit {
            provider_id,
            requester_id: assessment.user_id,
            tier,
            assessment_id,
            at: now,
        };
        if !self.stats.record_support(&credit, previous).await? {
            info!(assessment_id = %assessment_id, "support already recorded concurrently");
            return Ok(false);
        }
        info!(
            assessment_id = %assessment_id,
            from = %previous,
            to = %SupportRequestStatus::SupportProvided,
            provider_id = %provider_id,
            "support status transition"
        );

        let notification = Notification {
            user_id: assessment.user_id,
            title: "Someone is here for you".to_string(),
            body: "A member of your support circle has reached out. Open the app to connect."
                .to_string(),
            metadata: json!({
                "type": "support_provided",
                "assessmentId": assessment_id,
                "tier": tier.as_str(),
            }),
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(user_id = %assessment.user_id, error = %e, "support-arrived notification failed");
        }
        Ok(true)
    }

    /// Best effort: a failed delivery is logged and the rest still go out.
    async fn notify_tier(
        &self,
        requester_id: Uuid,
        assessment_id: Uuid,
        tier: SupportTier,
        recipients: &[Uuid],
    ) -> usize {
        let (title, body) = match tier {
            SupportTier::Buddy => (
                "Your buddy could use some support",
                "Someone you're paired with may be having a hard time. A short message can help.",
            ),
            SupportTier::Community => (
                "A community member needs support",
                "Someone in one of your communities may be having a hard time.",
            ),
            SupportTier::Global => (
                "Someone needs a helping hand",
                "A member of the app is looking for support right now.",
            ),
        };

        let mut delivered = 0;
        for recipient in recipients.iter().copied().filter(|id| *id != requester_id) {
            let notification = Notification {
                user_id: recipient,
                title: title.to_string(),
                body: body.to_string(),
                metadata: json!({
                    "type": "support_request",
                    "assessmentId": assessment_id,
                    "tier": tier.as_str(),
                }),
            };
            match self.notifier.notify(&notification).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(recipient = %recipient, tier = %tier, error = %e, "support notification failed");
                }
            }
        }
        debug!(
            assessment_id = %assessment_id,
            tier = %tier,
            delivered,
            recipients = recipients.len(),
            "tier notified"
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AnalysisType, Assessment, AssessmentStatus, ParseQuality, ReasoningData,
    };
    use crate::test_support::{MemoryStore, RecordingNotifier};
    use chrono::Duration;

    struct Harness {
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        engine: EscalationEngine,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = EscalationEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            notifier.clone(),
            EscalationTimeouts::default(),
        );
        Harness {
            store,
            notifier,
            engine,
        }
    }

    async fn open_assessment(store: &MemoryStore, user_id: Uuid) -> Uuid {
        stored_assessment(store, user_id, AnalysisType::Recent).await
    }

    async fn stored_assessment(
        store: &MemoryStore,
        user_id: Uuid,
        analysis_type: AnalysisType,
    ) -> Uuid {
        let assessment = Assessment {
            id: Uuid::new_v4(),
            user_id,
            created_at: Utc::now(),
            status: AssessmentStatus::Declining,
            confidence_score: 0.7,
            reasoning: ReasoningData::default(),
            needs_support: true,
            support_request_status: SupportRequestStatus::None,
            support_request_time: None,
            support_provided_by: None,
            support_provided_time: None,
            analysis_type,
            support_reason: None,
            support_tips: Vec::new(),
            baseline_compared: false,
            parse_quality: ParseQuality::Strict,
            next_escalation_due_at: None,
        };
        store.insert_assessment(&assessment).await.unwrap();
        assessment.id
    }

    #[tokio::test]
    async fn buddies_are_notified_first() {
        let h = harness();
        let user = h.store.add_user();
        let (a, b) = (h.store.add_user(), h.store.add_user());
        h.store.add_buddy(user, a);
        h.store.add_buddy(user, b);
        let id = open_assessment(&h.store, user).await;
        let now = Utc::now();

        let status = h.engine.initiate_support_request(user, id, now).await.unwrap();
        assert_eq!(status, SupportRequestStatus::BuddyRequested);
        assert_eq!(h.notifier.attempts().len(), 2);
        let stored = h.store.assessment(id).unwrap();
        assert_eq!(stored.support_request_time, Some(now));
        assert_eq!(stored.next_escalation_due_at, Some(now + Duration::minutes(30)));
    }

    #[tokio::test]
    async fn no_buddies_skips_straight_to_community() {
        let h = harness();
        let user = h.store.add_user();
        let neighbour = h.store.add_user();
        h.store.add_community(&[user, neighbour]);
        let id = open_assessment(&h.store, user).await;

        let status = h
            .engine
            .initiate_support_request(user, id, Utc::now())
            .await
            .unwrap();
        assert_eq!(status, SupportRequestStatus::CommunityRequested);
        let attempts = h.notifier.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].user_id, neighbour);
        assert!(attempts.iter().all(|n| n.metadata["tier"] != "buddy"));
    }

    #[tokio::test]
    async fn failed_delivery_does_not_block_others_or_transition() {
        let h = harness();
        let user = h.store.add_user();
        let (a, b) = (h.store.add_user(), h.store.add_user());
        h.store.add_buddy(user, a);
        h.store.add_buddy(user, b);
        h.notifier.fail_for(a);
        let id = open_assessment(&h.store, user).await;

        let status = h
            .engine
            .initiate_support_request(user, id, Utc::now())
            .await
            .unwrap();
        assert_eq!(status, SupportRequestStatus::BuddyRequested);
        assert_eq!(h.notifier.attempts_for(a), 1);
        assert_eq!(h.notifier.attempts_for(b), 1);
    }

    #[tokio::test]
    async fn second_initiation_is_a_no_op() {
        let h = harness();
        let user = h.store.add_user();
        let buddy = h.store.add_user();
        h.store.add_buddy(user, buddy);
        let id = open_assessment(&h.store, user).await;
        let now = Utc::now();

        h.engine.initiate_support_request(user, id, now).await.unwrap();
        let status = h.engine.initiate_support_request(user, id, now).await.unwrap();
        assert_eq!(status, SupportRequestStatus::BuddyRequested);
        assert_eq!(h.notifier.attempts().len(), 1);
    }

    #[tokio::test]
    async fn timeouts_walk_through_every_tier() {
        let h = harness();
        let user = h.store.add_user();
        let buddy = h.store.add_user();
        let neighbour = h.store.add_user();
        let stranger = h.store.add_user();
        h.store.add_buddy(user, buddy);
        h.store.add_community(&[user, neighbour]);
        let id = open_assessment(&h.store, user).await;
        let start = Utc::now();

        h.engine.initiate_support_request(user, id, start).await.unwrap();

        let early = h
            .engine
            .reconcile_due_escalations(start + Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(early, ReconcileSummary::default());

        let t1 = start + Duration::minutes(31);
        let summary = h.engine.reconcile_due_escalations(t1).await.unwrap();
        assert_eq!(summary.advanced, 1);
        let stored = h.store.assessment(id).unwrap();
        assert_eq!(stored.support_request_status, SupportRequestStatus::CommunityRequested);
        assert_eq!(stored.next_escalation_due_at, Some(t1 + Duration::minutes(60)));
        assert_eq!(h.notifier.attempts_for(neighbour), 1);

        let t2 = t1 + Duration::minutes(61);
        h.engine.reconcile_due_escalations(t2).await.unwrap();
        let stored = h.store.assessment(id).unwrap();
        assert_eq!(stored.support_request_status, SupportRequestStatus::GlobalRequested);
        assert_eq!(h.notifier.attempts_for(stranger), 1);
        assert_eq!(h.notifier.attempts_for(user), 0);

        let t3 = t2 + Duration::minutes(121);
        let summary = h.engine.reconcile_due_escalations(t3).await.unwrap();
        assert_eq!(summary.due, 1);
        assert_eq!(summary.advanced, 0);
        let stored = h.store.assessment(id).unwrap();
        assert_eq!(stored.support_request_status, SupportRequestStatus::GlobalRequested);
        assert_eq!(stored.next_escalation_due_at, None);
    }

    #[tokio::test]
    async fn stale_timer_after_support_does_nothing() {
        let h = harness();
        let user = h.store.add_user();
        let buddy = h.store.add_user();
        h.store.add_buddy(user, buddy);
        let id = open_assessment(&h.store, user).await;
        let now = Utc::now();
        h.engine.initiate_support_request(user, id, now).await.unwrap();
        assert!(h.engine.record_support_provided(id, buddy, now).await.unwrap());

        let advanced = h
            .engine
            .on_escalation_due(id, SupportTier::Buddy, now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(advanced, None);
        assert_eq!(
            h.store.assessment(id).unwrap().support_request_status,
            SupportRequestStatus::SupportProvided
        );
    }

    #[tokio::test]
    async fn support_credits_the_tier_that_was_waiting() {
        let h = harness();
        let user = h.store.add_user();
        let neighbour = h.store.add_user();
        h.store.add_community(&[user, neighbour]);
        let id = open_assessment(&h.store, user).await;
        let now = Utc::now();
        h.engine.initiate_support_request(user, id, now).await.unwrap();

        assert!(h.engine.record_support_provided(id, neighbour, now).await.unwrap());

        let stored = h.store.assessment(id).unwrap();
        assert_eq!(stored.support_request_status, SupportRequestStatus::SupportProvided);
        assert_eq!(stored.support_provided_by, Some(neighbour));
        assert_eq!(stored.support_provided_time, Some(now));
        assert_eq!(stored.next_escalation_due_at, None);

        let provider = h.store.statistics(neighbour).await.unwrap();
        assert_eq!(provider.provided.total, 1);
        assert_eq!(provider.provided.community_tier, 1);
        assert_eq!(provider.provided.last_at, Some(now));
        assert_eq!(provider.received.total, 0);
        let requester = h.store.statistics(user).await.unwrap();
        assert_eq!(requester.received.total, 1);
        assert_eq!(requester.received.community_tier, 1);
        assert_eq!(requester.history.len(), 1);
        assert_eq!(requester.history[0].counterpart_id, neighbour);

        let arrivals: Vec<_> = h
            .notifier
            .attempts()
            .into_iter()
            .filter(|n| n.metadata["type"] == "support_provided")
            .collect();
        assert_eq!(arrivals.len(), 1);
        assert_eq!(arrivals[0].user_id, user);
    }

    #[tokio::test]
    async fn missing_assessment_returns_false_without_crediting() {
        let h = harness();
        let provided = h
            .engine
            .record_support_provided(Uuid::new_v4(), Uuid::new_v4(), Utc::now())
            .await
            .unwrap();
        assert!(!provided);
        assert_eq!(h.store.credit_count(), 0);
    }

    #[tokio::test]
    async fn repeated_support_is_credited_once() {
        let h = harness();
        let user = h.store.add_user();
        let buddy = h.store.add_user();
        h.store.add_buddy(user, buddy);
        let id = open_assessment(&h.store, user).await;
        let now = Utc::now();
        h.engine.initiate_support_request(user, id, now).await.unwrap();

        assert!(h.engine.record_support_provided(id, buddy, now).await.unwrap());
        assert!(!h.engine.record_support_provided(id, buddy, now).await.unwrap());
        assert_eq!(h.store.credit_count(), 1);
        assert_eq!(h.store.statistics(buddy).await.unwrap().provided.buddy_tier, 1);
    }

    #[tokio::test]
    async fn request_without_open_tier_is_not_credited() {
        let h = harness();
        let user = h.store.add_user();
        let id = open_assessment(&h.store, user).await;
        let provided = h
            .engine
            .record_support_provided(id, Uuid::new_v4(), Utc::now())
            .await
            .unwrap();
        assert!(!provided);
        assert_eq!(h.store.credit_count(), 0);
    }

    #[tokio::test]
    async fn baseline_assessment_never_opens_a_request() {
        let h = harness();
        let user = h.store.add_user();
        let buddy = h.store.add_user();
        h.store.add_buddy(user, buddy);
        let id = stored_assessment(&h.store, user, AnalysisType::Baseline).await;

        let err = h
            .engine
            .initiate_support_request(user, id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Validation { field: "assessment", .. })
        ));
        assert_eq!(
            h.store.assessment(id).unwrap().support_request_status,
            SupportRequestStatus::None
        );
        assert!(h.notifier.attempts().is_empty());
    }

    #[tokio::test]
    async fn initiating_unknown_assessment_is_not_found() {
        let h = harness();
        let user = h.store.add_user();
        let err = h
            .engine
            .initiate_support_request(user, Uuid::new_v4(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NotFound { kind: "assessment", .. })
        ));
    }

    #[tokio::test]
    async fn failed_credit_leaves_request_open_for_retry() {
        let h = harness();
        let user = h.store.add_user();
        let buddy = h.store.add_user();
        h.store.add_buddy(user, buddy);
        let id = open_assessment(&h.store, user).await;
        let now = Utc::now();
        h.engine.initiate_support_request(user, id, now).await.unwrap();

        h.store.fail_next_credit();
        assert!(h.engine.record_support_provided(id, buddy, now).await.is_err());
        let stored = h.store.assessment(id).unwrap();
        assert_eq!(stored.support_request_status, SupportRequestStatus::BuddyRequested);
        assert_eq!(stored.support_provided_by, None);
        assert_eq!(h.store.credit_count(), 0);

        assert!(h.engine.record_support_provided(id, buddy, now).await.unwrap());
        assert_eq!(h.store.credit_count(), 1);
        assert_eq!(h.store.statistics(buddy).await.unwrap().provided.buddy_tier, 1);
        assert_eq!(h.store.statistics(user).await.unwrap().received.total, 1);
    }

    #[tokio::test]
    async fn reconcile_opens_requests_left_unopened() {
        let h = harness();
        let user = h.store.add_user();
        let buddy = h.store.add_user();
        h.store.add_buddy(user, buddy);
        let id = open_assessment(&h.store, user).await;
        let now = Utc::now() + Duration::minutes(1);

        let summary = h.engine.reconcile_due_escalations(now).await.unwrap();
        assert_eq!(summary.initiated, 1);
        assert_eq!(summary.due, 0);
        let stored = h.store.assessment(id).unwrap();
        assert_eq!(stored.support_request_status, SupportRequestStatus::BuddyRequested);
        assert_eq!(stored.next_escalation_due_at, Some(now + Duration::minutes(30)));
        assert_eq!(h.notifier.attempts_for(buddy), 1);

        let again = h.engine.reconcile_due_escalations(now).await.unwrap();
        assert_eq!(again, ReconcileSummary::default());
    }
}
