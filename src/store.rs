use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Assessment, Baseline, CheckIn, HealthSample, Notification, SupportCredit,
    SupportRequestStatus, SupportStatistics,
};

/// Read-only access to collected samples and check-ins.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn user_exists(&self, user_id: Uuid) -> Result<bool>;

    async fn known_users(&self) -> Result<Vec<Uuid>>;

    /// Samples whose day falls in `[start, end]`, ascending by day.
    async fn samples_between(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HealthSample>>;

    /// Check-ins recorded in `[start, end]`, ascending by time.
    async fn check_ins_between(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CheckIn>>;
}

#[async_trait]
pub trait AssessmentStore: Send + Sync {
    async fn insert_assessment(&self, assessment: &Assessment) -> Result<()>;

    async fn get_assessment(&self, id: Uuid) -> Result<Option<Assessment>>;

    async fn latest_assessment(&self, user_id: Uuid) -> Result<Option<Assessment>>;

    /// Moves the support status from `expected` to `next`, stamping the
    /// request time and clearing any pending due time. Returns false when
    /// the stored status no longer equals `expected`.
    async fn transition_support_status(
        &self,
        id: Uuid,
        expected: SupportRequestStatus,
        next: SupportRequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Persists the next escalation due time while the status still equals `expected`.
    async fn set_escalation_due(
        &self,
        id: Uuid,
        expected: SupportRequestStatus,
        due: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    async fn due_escalations(&self, now: DateTime<Utc>) -> Result<Vec<Assessment>>;

    /// Recent assessments that need support but never had a request opened.
    async fn pending_initiations(&self, now: DateTime<Utc>) -> Result<Vec<Assessment>>;

    /// Assessments needing support in `status`, owned by one of `user_ids`, newest first.
    async fn active_requests(
        &self,
        status: SupportRequestStatus,
        user_ids: &[Uuid],
    ) -> Result<Vec<Assessment>>;

    async fn insert_baseline(&self, baseline: &Baseline) -> Result<()>;

    /// Latest baseline by `established_at`.
    async fn current_baseline(&self, user_id: Uuid) -> Result<Option<Baseline>>;
}

#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Buddies linked in either direction.
    async fn buddy_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    /// Members of any community the user belongs to, the user excluded.
    async fn community_peer_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    /// Every other registered user.
    async fn global_peer_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>>;
}

#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Marks the assessment `supportProvided` while it still reads `expected`
    /// and credits both parties, all in one transaction. False, with nothing
    /// written, when the status has moved on.
    async fn record_support(
        &self,
        credit: &SupportCredit,
        expected: SupportRequestStatus,
    ) -> Result<bool>;

    async fn statistics(&self, user_id: Uuid) -> Result<SupportStatistics>;
}

/// Fire-and-forget delivery. Callers log failures and carry on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}
