use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Assessment, SupportStatistics, SupportTier};
use crate::store::{AssessmentStore, PeerDirectory, StatsStore};

const IMPACT_CAP: i64 = 20;

/// 0-100, weighting support given over support received and saturating at 20 of each.
pub fn impact_score(provided_total: i64, received_total: i64) -> u8 {
    let cap = IMPACT_CAP as f64;
    let provided = provided_total.clamp(0, IMPACT_CAP) as f64 / cap;
    let received = received_total.clamp(0, IMPACT_CAP) as f64 / cap;
    (100.0 * (0.6 * provided + 0.4 * received)).round() as u8
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSummary {
    #[serde(flatten)]
    pub statistics: SupportStatistics,
    pub impact_score: u8,
}

pub struct SupportAggregator {
    assessments: Arc<dyn AssessmentStore>,
    peers: Arc<dyn PeerDirectory>,
    stats: Arc<dyn StatsStore>,
}

impl SupportAggregator {
    pub fn new(
        assessments: Arc<dyn AssessmentStore>,
        peers: Arc<dyn PeerDirectory>,
        stats: Arc<dyn StatsStore>,
    ) -> Self {
        Self {
            assessments,
            peers,
            stats,
        }
    }

    /// Open requests at `tier` that `requesting_user` is eligible to answer, newest first.
    pub async fn get_active_support_requests(
        &self,
        tier: SupportTier,
        requesting_user: Uuid,
    ) -> Result<Vec<Assessment>> {
        let eligible = match tier {
            SupportTier::Buddy => self.peers.buddy_ids(requesting_user).await?,
            SupportTier::Community => self.peers.community_peer_ids(requesting_user).await?,
            SupportTier::Global => self.peers.global_peer_ids(requesting_user).await?,
        };
        if eligible.is_empty() {
            debug!(user_id = %requesting_user, tier = %tier, "no eligible peers");
            return Ok(Vec::new());
        }
        self.assessments
            .active_requests(tier.requested_status(), &eligible)
            .await
    }

    pub async fn get_support_statistics(&self, user_id: Uuid) -> Result<StatisticsSummary> {
        let statistics = self.stats.statistics(user_id).await?;
        let impact_score = impact_score(statistics.provided.total, statistics.received.total);
        Ok(StatisticsSummary {
            statistics,
            impact_score,
        })
    }
}
