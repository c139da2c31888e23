use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    ActivityData, AnalysisType, Assessment, AssessmentStatus, Baseline, CheckIn, DataPoints,
    ExerciseEntry, HealthSample, Mood, Notification, ParseQuality, ReasoningData, SleepData,
    SleepQuality, SupportCounters, SupportCredit, SupportDirection, SupportHistoryEntry,
    SupportRequestStatus, SupportStatistics, SupportTier,
};
use crate::store::{AssessmentStore, Notifier, PeerDirectory, SignalSource, StatsStore};

const ASSESSMENT_COLUMNS: &str = "id, user_id, created_at, status, confidence_score, reasoning, \
     needs_support, support_request_status, support_request_time, support_provided_by, \
     support_provided_time, analysis_type, support_reason, support_tips, baseline_compared, \
     parse_quality, next_escalation_due_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed implementation of every persistence contract.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_sample(&self, sample: &HealthSample) -> anyhow::Result<()> {
        let sleep = sample.sleep.as_ref();
        sqlx::query(
            r#"
            INSERT INTO peer_support.health_samples
            (user_id, day, sleep_duration_seconds, sleep_quality, steps, exercise_seconds, exercises)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, day) DO UPDATE
            SET sleep_duration_seconds = COALESCE(EXCLUDED.sleep_duration_seconds, health_samples.sleep_duration_seconds),
                sleep_quality = COALESCE(EXCLUDED.sleep_quality, health_samples.sleep_quality),
                steps = COALESCE(EXCLUDED.steps, health_samples.steps),
                exercise_seconds = COALESCE(EXCLUDED.exercise_seconds, health_samples.exercise_seconds),
                exercises = health_samples.exercises || EXCLUDED.exercises,
                updated_at = now()
            "#,
        )
        .bind(sample.user_id)
        .bind(sample.day)
        .bind(sleep.map(|s| s.duration_seconds))
        .bind(sleep.and_then(|s| s.quality).map(|q| q.as_str()))
        .bind(sample.steps())
        .bind(sample.activity.as_ref().and_then(|a| a.exercise_seconds))
        .bind(Json(&sample.exercises))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_check_in(&self, check_in: &CheckIn) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO peer_support.check_ins
            (id, user_id, recorded_at, mood_score, mood_label, mood_description, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(check_in.id)
        .bind(check_in.user_id)
        .bind(check_in.recorded_at)
        .bind(i16::from(check_in.mood.score))
        .bind(&check_in.mood.label)
        .bind(&check_in.mood.description)
        .bind(&check_in.notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub async fn seed(store: &PgStore) -> anyhow::Result<()> {
    let avery = Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?;
    let jules = Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?;
    let kiara = Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?;
    let users = vec![
        (avery, "Avery Lee", "avery.lee@example.com"),
        (jules, "Jules Moreno", "jules.moreno@example.com"),
        (kiara, "Kiara Patel", "kiara.patel@example.com"),
    ];

    for (id, name, email) in users {
        sqlx::query(
            r#"
            INSERT INTO peer_support.users (id, display_name, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE
            SET display_name = EXCLUDED.display_name
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .execute(&store.pool)
        .await?;
    }

    for (user_id, buddy_id) in [(avery, jules), (avery, kiara), (jules, avery)] {
        sqlx::query(
            "INSERT INTO peer_support.buddy_links (user_id, buddy_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(buddy_id)
        .execute(&store.pool)
        .await?;
    }

    let community_id: Uuid = sqlx::query(
        r#"
        INSERT INTO peer_support.communities (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind("Evening Walkers")
    .fetch_one(&store.pool)
    .await?
    .try_get("id")?;

    for member in [avery, jules, kiara] {
        sqlx::query(
            "INSERT INTO peer_support.community_members (community_id, user_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(community_id)
        .bind(member)
        .execute(&store.pool)
        .await?;
    }

    let today = Utc::now().date_naive();
    for days_ago in 0..10i64 {
        let declining = days_ago < 3;
        store
            .upsert_sample(&HealthSample {
                user_id: avery,
                day: today - Duration::days(days_ago),
                sleep: Some(SleepData {
                    duration_seconds: if declining { 4 * 3600 + 1800 } else { 7 * 3600 + 900 },
                    quality: Some(if declining {
                        SleepQuality::Poor
                    } else {
                        SleepQuality::Good
                    }),
                }),
                activity: Some(ActivityData {
                    steps: Some(if declining { 1800 } else { 8200 }),
                    exercise_seconds: None,
                }),
                exercises: Vec::new(),
            })
            .await?;
    }

    let seeded_check_ins = [
        ("6f1c9a2e-2b1e-4c1a-9a53-0a4e6f0b2d11", 6, 4, "good", Some("Nice walk with the group")),
        ("6f1c9a2e-2b1e-4c1a-9a53-0a4e6f0b2d12", 4, 4, "good", None),
        ("6f1c9a2e-2b1e-4c1a-9a53-0a4e6f0b2d13", 2, 2, "low", Some("Couldn't sleep again")),
        ("6f1c9a2e-2b1e-4c1a-9a53-0a4e6f0b2d14", 0, 2, "low", Some("Feeling overwhelmed lately")),
    ];
    for (id, days_ago, score, label, notes) in seeded_check_ins {
        store
            .insert_check_in(&CheckIn {
                id: Uuid::parse_str(id)?,
                user_id: avery,
                recorded_at: Utc::now() - Duration::days(days_ago),
                mood: Mood {
                    score,
                    label: label.to_string(),
                    description: None,
                },
                notes: notes.map(str::to_string),
            })
            .await?;
    }

    Ok(())
}

fn parse_column<T>(value: String, parse: fn(&str) -> Option<T>, column: &str) -> anyhow::Result<T> {
    parse(&value).with_context(|| format!("unexpected {column} value '{value}'"))
}

fn assessment_from_row(row: &PgRow) -> anyhow::Result<Assessment> {
    Ok(Assessment {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        created_at: row.try_get("created_at")?,
        status: parse_column(row.try_get("status")?, AssessmentStatus::parse, "status")?,
        confidence_score: row.try_get("confidence_score")?,
        reasoning: row.try_get::<Json<ReasoningData>, _>("reasoning")?.0,
        needs_support: row.try_get("needs_support")?,
        support_request_status: parse_column(
            row.try_get("support_request_status")?,
            SupportRequestStatus::parse,
            "support_request_status",
        )?,
        support_request_time: row.try_get("support_request_time")?,
        support_provided_by: row.try_get("support_provided_by")?,
        support_provided_time: row.try_get("support_provided_time")?,
        analysis_type: parse_column(
            row.try_get("analysis_type")?,
            AnalysisType::parse,
            "analysis_type",
        )?,
        support_reason: row.try_get("support_reason")?,
        support_tips: row.try_get::<Json<Vec<String>>, _>("support_tips")?.0,
        baseline_compared: row.try_get("baseline_compared")?,
        parse_quality: parse_column(row.try_get("parse_quality")?, ParseQuality::parse, "parse_quality")?,
        next_escalation_due_at: row.try_get("next_escalation_due_at")?,
    })
}

fn counters_from_row(row: &PgRow, direction: SupportDirection) -> anyhow::Result<SupportCounters> {
    let prefix = direction.as_str();
    Ok(SupportCounters {
        total: row.try_get(format!("{prefix}_total").as_str())?,
        buddy_tier: row.try_get(format!("{prefix}_buddy_tier").as_str())?,
        community_tier: row.try_get(format!("{prefix}_community_tier").as_str())?,
        global_tier: row.try_get(format!("{prefix}_global_tier").as_str())?,
        last_at: row.try_get(format!("{prefix}_last_at").as_str())?,
    })
}

#[async_trait]
impl SignalSource for PgStore {
    async fn user_exists(&self, user_id: Uuid) -> anyhow::Result<bool> {
        let row = sqlx::query("SELECT 1 FROM peer_support.users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn known_users(&self) -> anyhow::Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM peer_support.users ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<Uuid, _>("id").map_err(Into::into))
            .collect()
    }

    async fn samples_between(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<HealthSample>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, day, sleep_duration_seconds, sleep_quality, steps,
                   exercise_seconds, exercises
            FROM peer_support.health_samples
            WHERE user_id = $1 AND day BETWEEN $2 AND $3
            ORDER BY day
            "#,
        )
        .bind(user_id)
        .bind(start.date_naive())
        .bind(end.date_naive())
        .fetch_all(&self.pool)
        .await?;

        let mut samples = Vec::with_capacity(rows.len());
        for row in rows {
            let sleep_seconds: Option<i64> = row.try_get("sleep_duration_seconds")?;
            let sleep_quality: Option<String> = row.try_get("sleep_quality")?;
            let steps: Option<i64> = row.try_get("steps")?;
            let exercise_seconds: Option<i64> = row.try_get("exercise_seconds")?;
            let day: NaiveDate = row.try_get("day")?;

            samples.push(HealthSample {
                user_id: row.try_get("user_id")?,
                day,
                sleep: sleep_seconds.map(|duration_seconds| SleepData {
                    duration_seconds,
                    quality: sleep_quality.as_deref().and_then(SleepQuality::parse),
                }),
                activity: if steps.is_some() || exercise_seconds.is_some() {
                    Some(ActivityData {
                        steps,
                        exercise_seconds,
                    })
                } else {
                    None
                },
                exercises: row.try_get::<Json<Vec<ExerciseEntry>>, _>("exercises")?.0,
            });
        }
        Ok(samples)
    }

    async fn check_ins_between(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<CheckIn>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, recorded_at, mood_score, mood_label, mood_description, notes
            FROM peer_support.check_ins
            WHERE user_id = $1 AND recorded_at BETWEEN $2 AND $3
            ORDER BY recorded_at
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut check_ins = Vec::with_capacity(rows.len());
        for row in rows {
            let score: i16 = row.try_get("mood_score")?;
            check_ins.push(CheckIn {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                recorded_at: row.try_get("recorded_at")?,
                mood: Mood {
                    score: u8::try_from(score).context("mood score out of range")?,
                    label: row.try_get("mood_label")?,
                    description: row.try_get("mood_description")?,
                },
                notes: row.try_get("notes")?,
            });
        }
        Ok(check_ins)
    }
}

#[async_trait]
impl AssessmentStore for PgStore {
    async fn insert_assessment(&self, assessment: &Assessment) -> anyhow::Result<()> {
        sqlx::query(&format!(
            "INSERT INTO peer_support.assessments ({ASSESSMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        ))
        .bind(assessment.id)
        .bind(assessment.user_id)
        .bind(assessment.created_at)
        .bind(assessment.status.as_str())
        .bind(assessment.confidence_score)
        .bind(Json(&assessment.reasoning))
        .bind(assessment.needs_support)
        .bind(assessment.support_request_status.as_str())
        .bind(assessment.support_request_time)
        .bind(assessment.support_provided_by)
        .bind(assessment.support_provided_time)
        .bind(assessment.analysis_type.as_str())
        .bind(&assessment.support_reason)
        .bind(Json(&assessment.support_tips))
        .bind(assessment.baseline_compared)
        .bind(assessment.parse_quality.as_str())
        .bind(assessment.next_escalation_due_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_assessment(&self, id: Uuid) -> anyhow::Result<Option<Assessment>> {
        let row = sqlx::query(&format!(
            "SELECT {ASSESSMENT_COLUMNS} FROM peer_support.assessments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(assessment_from_row).transpose()
    }

    async fn latest_assessment(&self, user_id: Uuid) -> anyhow::Result<Option<Assessment>> {
        let row = sqlx::query(&format!(
            "SELECT {ASSESSMENT_COLUMNS} FROM peer_support.assessments \
             WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(assessment_from_row).transpose()
    }

    async fn transition_support_status(
        &self,
        id: Uuid,
        expected: SupportRequestStatus,
        next: SupportRequestStatus,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE peer_support.assessments
            SET support_request_status = $3,
                support_request_time = $4,
                next_escalation_due_at = NULL
            WHERE id = $1 AND support_request_status = $2 AND analysis_type = 'recent'
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_escalation_due(
        &self,
        id: Uuid,
        expected: SupportRequestStatus,
        due: Option<DateTime<Utc>>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE peer_support.assessments
            SET next_escalation_due_at = $3
            WHERE id = $1 AND support_request_status = $2
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(due)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn due_escalations(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Assessment>> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSESSMENT_COLUMNS} FROM peer_support.assessments \
             WHERE next_escalation_due_at <= $1 \
               AND support_request_status IN ('buddyRequested', 'communityRequested', 'globalRequested') \
             ORDER BY next_escalation_due_at"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(assessment_from_row).collect()
    }

    async fn pending_initiations(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Assessment>> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSESSMENT_COLUMNS} FROM peer_support.assessments \
             WHERE needs_support AND support_request_status = 'none' \
               AND analysis_type = 'recent' AND created_at <= $1 \
             ORDER BY created_at"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(assessment_from_row).collect()
    }

    async fn active_requests(
        &self,
        status: SupportRequestStatus,
        user_ids: &[Uuid],
    ) -> anyhow::Result<Vec<Assessment>> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSESSMENT_COLUMNS} FROM peer_support.assessments \
             WHERE needs_support AND support_request_status = $1 AND user_id = ANY($2) \
             ORDER BY created_at DESC"
        ))
        .bind(status.as_str())
        .bind(user_ids.to_vec())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(assessment_from_row).collect()
    }

    async fn insert_baseline(&self, baseline: &Baseline) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO peer_support.baselines
            (id, user_id, established_at, metrics, confidence_score, total_days,
             days_with_sleep_data, days_with_activity_data, check_ins_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(baseline.id)
        .bind(baseline.user_id)
        .bind(baseline.established_at)
        .bind(Json(&baseline.metrics))
        .bind(baseline.confidence_score)
        .bind(baseline.data_points.total_days)
        .bind(baseline.data_points.days_with_sleep_data)
        .bind(baseline.data_points.days_with_activity_data)
        .bind(baseline.data_points.check_ins_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn current_baseline(&self, user_id: Uuid) -> anyhow::Result<Option<Baseline>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, established_at, metrics, confidence_score, total_days,
                   days_with_sleep_data, days_with_activity_data, check_ins_count
            FROM peer_support.baselines
            WHERE user_id = $1
            ORDER BY established_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Baseline {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            established_at: row.try_get("established_at")?,
            metrics: row.try_get::<Json<ReasoningData>, _>("metrics")?.0,
            confidence_score: row.try_get("confidence_score")?,
            data_points: DataPoints {
                total_days: row.try_get("total_days")?,
                days_with_sleep_data: row.try_get("days_with_sleep_data")?,
                days_with_activity_data: row.try_get("days_with_activity_data")?,
                check_ins_count: row.try_get("check_ins_count")?,
            },
        }))
    }
}

#[async_trait]
impl PeerDirectory for PgStore {
    async fn buddy_ids(&self, user_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT buddy_id AS peer_id FROM peer_support.buddy_links WHERE user_id = $1
            UNION
            SELECT user_id AS peer_id FROM peer_support.buddy_links WHERE buddy_id = $1
            ORDER BY peer_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<Uuid, _>("peer_id").map_err(Into::into))
            .collect()
    }

    async fn community_peer_ids(&self, user_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT peer.user_id
            FROM peer_support.community_members own
            JOIN peer_support.community_members peer ON peer.community_id = own.community_id
            WHERE own.user_id = $1 AND peer.user_id <> $1
            ORDER BY peer.user_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<Uuid, _>("user_id").map_err(Into::into))
            .collect()
    }

    async fn global_peer_ids(&self, user_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM peer_support.users WHERE id <> $1 ORDER BY id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<Uuid, _>("id").map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl StatsStore for PgStore {
    async fn record_support(
        &self,
        credit: &SupportCredit,
        expected: SupportRequestStatus,
    ) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            r#"
            UPDATE peer_support.assessments
            SET support_request_status = $3,
                support_provided_by = $4,
                support_provided_time = $5,
                next_escalation_due_at = NULL
            WHERE id = $1 AND support_request_status = $2
            "#,
        )
        .bind(credit.assessment_id)
        .bind(expected.as_str())
        .bind(SupportRequestStatus::SupportProvided.as_str())
        .bind(credit.provider_id)
        .bind(credit.at)
        .execute(&mut *tx)
        .await?;
        if marked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let parties = [
            (credit.provider_id, SupportDirection::Provided, credit.requester_id),
            (credit.requester_id, SupportDirection::Received, credit.provider_id),
        ];
        for (user_id, direction, counterpart_id) in parties {
            let prefix = direction.as_str();
            let tier_column = format!("{prefix}_{}_tier", credit.tier.as_str());
            sqlx::query(&format!(
                "INSERT INTO peer_support.support_statistics AS s \
                 (user_id, {prefix}_total, {tier_column}, {prefix}_last_at) \
                 VALUES ($1, 1, 1, $2) \
                 ON CONFLICT (user_id) DO UPDATE SET \
                 {prefix}_total = s.{prefix}_total + 1, \
                 {tier_column} = s.{tier_column} + 1, \
                 {prefix}_last_at = GREATEST(s.{prefix}_last_at, EXCLUDED.{prefix}_last_at)"
            ))
            .bind(user_id)
            .bind(credit.at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO peer_support.support_history
                (id, user_id, direction, tier, occurred_at, counterpart_id, assessment_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(prefix)
            .bind(credit.tier.as_str())
            .bind(credit.at)
            .bind(counterpart_id)
            .bind(credit.assessment_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn statistics(&self, user_id: Uuid) -> anyhow::Result<SupportStatistics> {
        let mut statistics = SupportStatistics::empty(user_id);

        let row = sqlx::query("SELECT * FROM peer_support.support_statistics WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            statistics.provided = counters_from_row(&row, SupportDirection::Provided)?;
            statistics.received = counters_from_row(&row, SupportDirection::Received)?;
        }

        let rows = sqlx::query(
            r#"
            SELECT direction, tier, occurred_at, counterpart_id, assessment_id
            FROM peer_support.support_history
            WHERE user_id = $1
            ORDER BY occurred_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let tier: String = row.try_get("tier")?;
            statistics.history.push(SupportHistoryEntry {
                direction: parse_column(row.try_get("direction")?, SupportDirection::parse, "direction")?,
                tier: tier
                    .parse::<SupportTier>()
                    .map_err(|e| anyhow::anyhow!("unexpected tier value: {e}"))?,
                occurred_at: row.try_get("occurred_at")?,
                counterpart_id: row.try_get("counterpart_id")?,
                assessment_id: row.try_get("assessment_id")?,
            });
        }

        Ok(statistics)
    }
}

/// Writes to the notification outbox; the push transport drains it.
#[async_trait]
impl Notifier for PgStore {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO peer_support.notifications (id, user_id, title, body, metadata)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(Json(&notification.metadata))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
