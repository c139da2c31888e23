use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::model_client::TextModel;
use crate::models::{
    AnalysisType, Assessment, Baseline, CheckIn, HealthSample, Notification, SupportCounters,
    SupportCredit, SupportDirection, SupportHistoryEntry, SupportRequestStatus, SupportStatistics,
    SupportTier,
};
use crate::store::{AssessmentStore, Notifier, PeerDirectory, SignalSource, StatsStore};

#[derive(Default)]
struct State {
    users: Vec<Uuid>,
    samples: Vec<HealthSample>,
    check_ins: Vec<CheckIn>,
    assessments: Vec<Assessment>,
    baselines: Vec<Baseline>,
    buddies: HashMap<Uuid, Vec<Uuid>>,
    communities: Vec<Vec<Uuid>>,
    statistics: HashMap<Uuid, SupportStatistics>,
    credits: usize,
    fail_next_credit: bool,
    failing_users: HashSet<Uuid>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().users.push(id);
        id
    }

    /// Links two users as buddies of each other.
    pub fn add_buddy(&self, user_id: Uuid, buddy_id: Uuid) {
        let mut state = self.state.lock().unwrap();
        for (owner, peer) in [(user_id, buddy_id), (buddy_id, user_id)] {
            let peers = state.buddies.entry(owner).or_default();
            if !peers.contains(&peer) {
                peers.push(peer);
            }
        }
    }

    pub fn add_community(&self, members: &[Uuid]) {
        self.state.lock().unwrap().communities.push(members.to_vec());
    }

    pub fn add_sample(&self, sample: HealthSample) {
        self.state.lock().unwrap().samples.push(sample);
    }

    pub fn add_check_in(&self, check_in: CheckIn) {
        self.state.lock().unwrap().check_ins.push(check_in);
    }

    /// Makes every signal read for this user fail.
    pub fn fail_reads_for(&self, user_id: Uuid) {
        self.state.lock().unwrap().failing_users.insert(user_id);
    }

    /// Makes the next support recording fail before anything is written.
    pub fn fail_next_credit(&self) {
        self.state.lock().unwrap().fail_next_credit = true;
    }

    pub fn assessment(&self, id: Uuid) -> Option<Assessment> {
        self.state
            .lock()
            .unwrap()
            .assessments
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }

    pub fn assessments(&self) -> Vec<Assessment> {
        self.state.lock().unwrap().assessments.clone()
    }

    pub fn baselines(&self) -> Vec<Baseline> {
        self.state.lock().unwrap().baselines.clone()
    }

    pub fn credit_count(&self) -> usize {
        self.state.lock().unwrap().credits
    }

    fn check_readable(&self, user_id: Uuid) -> Result<()> {
        if self.state.lock().unwrap().failing_users.contains(&user_id) {
            return Err(anyhow!("storage unavailable for {user_id}"));
        }
        Ok(())
    }

    fn update<F>(&self, id: Uuid, expected: SupportRequestStatus, apply: F) -> bool
    where
        F: FnOnce(&mut Assessment),
    {
        let mut state = self.state.lock().unwrap();
        match state
            .assessments
            .iter_mut()
            .find(|a| a.id == id && a.support_request_status == expected)
        {
            Some(assessment) => {
                apply(assessment);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl SignalSource for MemoryStore {
    async fn user_exists(&self, user_id: Uuid) -> Result<bool> {
        Ok(self.state.lock().unwrap().users.contains(&user_id))
    }

    async fn known_users(&self) -> Result<Vec<Uuid>> {
        Ok(self.state.lock().unwrap().users.clone())
    }

    async fn samples_between(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HealthSample>> {
        self.check_readable(user_id)?;
        let (first, last) = (start.date_naive(), end.date_naive());
        Ok(self
            .state
            .lock()
            .unwrap()
            .samples
            .iter()
            .filter(|s| s.user_id == user_id && s.day >= first && s.day <= last)
            .cloned()
            .collect())
    }

    async fn check_ins_between(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CheckIn>> {
        self.check_readable(user_id)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .check_ins
            .iter()
            .filter(|c| c.user_id == user_id && c.recorded_at >= start && c.recorded_at <= end)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AssessmentStore for MemoryStore {
    async fn insert_assessment(&self, assessment: &Assessment) -> Result<()> {
        self.state.lock().unwrap().assessments.push(assessment.clone());
        Ok(())
    }

    async fn get_assessment(&self, id: Uuid) -> Result<Option<Assessment>> {
        Ok(self.assessment(id))
    }

    async fn latest_assessment(&self, user_id: Uuid) -> Result<Option<Assessment>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .assessments
            .iter()
            .filter(|a| a.user_id == user_id)
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn transition_support_status(
        &self,
        id: Uuid,
        expected: SupportRequestStatus,
        next: SupportRequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let recent = self
            .assessment(id)
            .is_some_and(|a| a.analysis_type == AnalysisType::Recent);
        if !recent {
            return Ok(false);
        }
        Ok(self.update(id, expected, |a| {
            a.support_request_status = next;
            a.support_request_time = Some(at);
            a.next_escalation_due_at = None;
        }))
    }

    async fn set_escalation_due(
        &self,
        id: Uuid,
        expected: SupportRequestStatus,
        due: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        Ok(self.update(id, expected, |a| a.next_escalation_due_at = due))
    }

    async fn due_escalations(&self, now: DateTime<Utc>) -> Result<Vec<Assessment>> {
        let mut due: Vec<Assessment> = self
            .state
            .lock()
            .unwrap()
            .assessments
            .iter()
            .filter(|a| {
                a.support_request_status.active_tier().is_some()
                    && a.next_escalation_due_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|a| a.next_escalation_due_at);
        Ok(due)
    }

    async fn pending_initiations(&self, now: DateTime<Utc>) -> Result<Vec<Assessment>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .assessments
            .iter()
            .filter(|a| {
                a.needs_support
                    && a.support_request_status == SupportRequestStatus::None
                    && a.analysis_type == AnalysisType::Recent
                    && a.created_at <= now
            })
            .cloned()
            .collect())
    }

    async fn active_requests(
        &self,
        status: SupportRequestStatus,
        user_ids: &[Uuid],
    ) -> Result<Vec<Assessment>> {
        let mut active: Vec<Assessment> = self
            .state
            .lock()
            .unwrap()
            .assessments
            .iter()
            .filter(|a| {
                a.needs_support
                    && a.support_request_status == status
                    && user_ids.contains(&a.user_id)
            })
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(active)
    }

    async fn insert_baseline(&self, baseline: &Baseline) -> Result<()> {
        self.state.lock().unwrap().baselines.push(baseline.clone());
        Ok(())
    }

    async fn current_baseline(&self, user_id: Uuid) -> Result<Option<Baseline>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .baselines
            .iter()
            .filter(|b| b.user_id == user_id)
            .max_by_key(|b| b.established_at)
            .cloned())
    }
}

#[async_trait]
impl PeerDirectory for MemoryStore {
    async fn buddy_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .buddies
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn community_peer_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        let mut peers: Vec<Uuid> = state
            .communities
            .iter()
            .filter(|members| members.contains(&user_id))
            .flatten()
            .copied()
            .filter(|id| *id != user_id)
            .collect();
        peers.sort();
        peers.dedup();
        Ok(peers)
    }

    async fn global_peer_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .iter()
            .copied()
            .filter(|id| *id != user_id)
            .collect())
    }
}

fn bump(counters: &mut SupportCounters, tier: SupportTier, at: DateTime<Utc>) {
    counters.total += 1;
    match tier {
        SupportTier::Buddy => counters.buddy_tier += 1,
        SupportTier::Community => counters.community_tier += 1,
        SupportTier::Global => counters.global_tier += 1,
    }
    counters.last_at = Some(counters.last_at.map_or(at, |last| last.max(at)));
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn record_support(
        &self,
        credit: &SupportCredit,
        expected: SupportRequestStatus,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.fail_next_credit) {
            return Err(anyhow!("statistics write rejected"));
        }
        let Some(assessment) = state
            .assessments
            .iter_mut()
            .find(|a| a.id == credit.assessment_id && a.support_request_status == expected)
        else {
            return Ok(false);
        };
        assessment.support_request_status = SupportRequestStatus::SupportProvided;
        assessment.support_provided_by = Some(credit.provider_id);
        assessment.support_provided_time = Some(credit.at);
        assessment.next_escalation_due_at = None;

        state.credits += 1;
        for (user_id, direction, counterpart_id) in [
            (credit.provider_id, SupportDirection::Provided, credit.requester_id),
            (credit.requester_id, SupportDirection::Received, credit.provider_id),
        ] {
            let stats = state
                .statistics
                .entry(user_id)
                .or_insert_with(|| SupportStatistics::empty(user_id));
            match direction {
                SupportDirection::Provided => bump(&mut stats.provided, credit.tier, credit.at),
                SupportDirection::Received => bump(&mut stats.received, credit.tier, credit.at),
            }
            stats.history.push(SupportHistoryEntry {
                direction,
                tier: credit.tier,
                occurred_at: credit.at,
                counterpart_id,
                assessment_id: credit.assessment_id,
            });
        }
        Ok(true)
    }

    async fn statistics(&self, user_id: Uuid) -> Result<SupportStatistics> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .statistics
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| SupportStatistics::empty(user_id)))
    }
}

/// Records every delivery attempt; recipients in `failing` get an error.
#[derive(Default)]
pub struct RecordingNotifier {
    attempts: Mutex<Vec<Notification>>,
    failing: Mutex<HashSet<Uuid>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, user_id: Uuid) {
        self.failing.lock().unwrap().insert(user_id);
    }

    pub fn attempts(&self) -> Vec<Notification> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, user_id: Uuid) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.user_id == user_id)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.attempts.lock().unwrap().push(notification.clone());
        if self.failing.lock().unwrap().contains(&notification.user_id) {
            return Err(anyhow!("push transport rejected {}", notification.user_id));
        }
        Ok(())
    }
}

/// Replays queued replies in order, then repeats the last one.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn replying(text: &str) -> Self {
        Self::script(vec![Ok(text.to_string())])
    }

    pub fn unreachable() -> Self {
        Self::script(vec![Err("connection refused".to_string())])
    }

    pub fn script(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextModel for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut replies = self.replies.lock().unwrap();
        let reply = if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        };
        match reply {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => Err(PipelineError::Transport(reason)),
            None => Err(PipelineError::Transport("no scripted reply".to_string())),
        }
    }
}
