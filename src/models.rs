use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SleepQuality {
    Poor,
    Fair,
    Good,
}

impl SleepQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poor => "poor",
            Self::Fair => "fair",
            Self::Good => "good",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "poor" => Some(Self::Poor),
            "fair" => Some(Self::Fair),
            "good" => Some(Self::Good),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Low,
    Moderate,
    High,
}

impl ActivityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "moderate" => Some(Self::Moderate),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepData {
    pub duration_seconds: i64,
    pub quality: Option<SleepQuality>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityData {
    pub steps: Option<i64>,
    pub exercise_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExerciseEntry {
    pub kind: String,
    pub duration_seconds: i64,
}

/// One row per user per calendar day, filled in as partial data arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSample {
    pub user_id: Uuid,
    pub day: NaiveDate,
    pub sleep: Option<SleepData>,
    pub activity: Option<ActivityData>,
    pub exercises: Vec<ExerciseEntry>,
}

impl HealthSample {
    pub fn steps(&self) -> Option<i64> {
        self.activity.as_ref().and_then(|a| a.steps)
    }

    /// Recorded exercise seconds, falling back to the sum of logged entries.
    pub fn exercise_seconds(&self) -> Option<i64> {
        let recorded = self.activity.as_ref().and_then(|a| a.exercise_seconds);
        if recorded.is_some() {
            return recorded;
        }
        if self.exercises.is_empty() {
            None
        } else {
            Some(self.exercises.iter().map(|e| e.duration_seconds).sum())
        }
    }

    pub fn has_activity(&self) -> bool {
        self.steps().is_some() || self.exercise_seconds().is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mood {
    pub score: u8,
    pub label: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckIn {
    pub id: Uuid,
    pub user_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub mood: Mood,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentStatus {
    Stable,
    Declining,
    Critical,
}

impl AssessmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Declining => "declining",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stable" => Some(Self::Stable),
            "declining" => Some(Self::Declining),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for AssessmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    Baseline,
    Recent,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Recent => "recent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "baseline" => Some(Self::Baseline),
            "recent" => Some(Self::Recent),
            _ => None,
        }
    }
}

/// Concentric circles of potential support providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportTier {
    Buddy,
    Community,
    Global,
}

impl SupportTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buddy => "buddy",
            Self::Community => "community",
            Self::Global => "global",
        }
    }

    pub fn requested_status(&self) -> SupportRequestStatus {
        match self {
            Self::Buddy => SupportRequestStatus::BuddyRequested,
            Self::Community => SupportRequestStatus::CommunityRequested,
            Self::Global => SupportRequestStatus::GlobalRequested,
        }
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Buddy => Some(Self::Community),
            Self::Community => Some(Self::Global),
            Self::Global => None,
        }
    }
}

impl fmt::Display for SupportTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupportTier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buddy" => Ok(Self::Buddy),
            "community" => Ok(Self::Community),
            "global" => Ok(Self::Global),
            other => Err(format!("unknown support tier '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SupportRequestStatus {
    None,
    BuddyRequested,
    CommunityRequested,
    GlobalRequested,
    SupportProvided,
}

impl SupportRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BuddyRequested => "buddyRequested",
            Self::CommunityRequested => "communityRequested",
            Self::GlobalRequested => "globalRequested",
            Self::SupportProvided => "supportProvided",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "buddyRequested" => Some(Self::BuddyRequested),
            "communityRequested" => Some(Self::CommunityRequested),
            "globalRequested" => Some(Self::GlobalRequested),
            "supportProvided" => Some(Self::SupportProvided),
            _ => None,
        }
    }

    /// The tier a request in this state is currently waiting on.
    pub fn active_tier(&self) -> Option<SupportTier> {
        match self {
            Self::BuddyRequested => Some(SupportTier::Buddy),
            Self::CommunityRequested => Some(SupportTier::Community),
            Self::GlobalRequested => Some(SupportTier::Global),
            Self::None | Self::SupportProvided => None,
        }
    }
}

impl fmt::Display for SupportRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much the model's text can be trusted after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseQuality {
    Strict,
    Repaired,
    Failed,
}

impl ParseQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Repaired => "repaired",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "strict" => Some(Self::Strict),
            "repaired" => Some(Self::Repaired),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningData {
    pub sleep_hours: Option<f64>,
    pub sleep_quality: Option<SleepQuality>,
    pub activity_level: Option<ActivityLevel>,
    pub check_in_mood: Option<f64>,
    pub notes: Option<String>,
    #[serde(default)]
    pub significant_changes: Vec<String>,
    #[serde(default, flatten)]
    pub extras: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub status: AssessmentStatus,
    pub confidence_score: f64,
    pub reasoning: ReasoningData,
    pub needs_support: bool,
    pub support_request_status: SupportRequestStatus,
    pub support_request_time: Option<DateTime<Utc>>,
    pub support_provided_by: Option<Uuid>,
    pub support_provided_time: Option<DateTime<Utc>>,
    pub analysis_type: AnalysisType,
    pub support_reason: Option<String>,
    pub support_tips: Vec<String>,
    pub baseline_compared: bool,
    pub parse_quality: ParseQuality,
    pub next_escalation_due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoints {
    pub total_days: i32,
    pub days_with_sleep_data: i32,
    pub days_with_activity_data: i32,
    pub check_ins_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Baseline {
    pub id: Uuid,
    pub user_id: Uuid,
    pub established_at: DateTime<Utc>,
    pub metrics: ReasoningData,
    pub confidence_score: f64,
    pub data_points: DataPoints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportDirection {
    Provided,
    Received,
}

impl SupportDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provided => "provided",
            Self::Received => "received",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "provided" => Some(Self::Provided),
            "received" => Some(Self::Received),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportCounters {
    pub total: i64,
    pub buddy_tier: i64,
    pub community_tier: i64,
    pub global_tier: i64,
    pub last_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportHistoryEntry {
    pub direction: SupportDirection,
    pub tier: SupportTier,
    pub occurred_at: DateTime<Utc>,
    pub counterpart_id: Uuid,
    pub assessment_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportStatistics {
    pub user_id: Uuid,
    pub provided: SupportCounters,
    pub received: SupportCounters,
    pub history: Vec<SupportHistoryEntry>,
}

impl SupportStatistics {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            provided: SupportCounters::default(),
            received: SupportCounters::default(),
            history: Vec::new(),
        }
    }
}

/// One successful support-provided event, credited to both parties.
#[derive(Debug, Clone)]
pub struct SupportCredit {
    pub provider_id: Uuid,
    pub requester_id: Uuid,
    pub tier: SupportTier,
    pub assessment_id: Uuid,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    pub metadata: Value,
}
