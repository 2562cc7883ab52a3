//! Postgres-backed `StatsRepository`, feature-gated behind `postgres`.
//!
//! Queries are written with the runtime `sqlx::query_as`/`query` functions rather than the
//! compile-time `query!`/`query_as!` macros, since those macros need a live `DATABASE_URL` at
//! compile time and this crate is authored without a reachable database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::error::RepositoryError;
use crate::evaluator;
use crate::model::{
    ApproachingRecord, GainerEntry, MilestoneKind, MilestoneRecord, NearMilestoneCandidate,
    Observation, StatsChange,
};

use super::StatsRepository;

fn read_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Read { message: e.to_string() }
}

fn write_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Write { message: e.to_string() }
}

fn milestone_kind_str(kind: MilestoneKind) -> &'static str {
    match kind {
        MilestoneKind::Subscribers => "subscribers",
    }
}

fn parse_milestone_kind(s: &str) -> MilestoneKind {
    match s {
        _ => MilestoneKind::Subscribers,
    }
}

/// Postgres-backed implementation of `StatsRepository`, over four tables: `stats_history`,
/// `stats_changes`, `milestones`, `approaching_notifications`.
pub struct PgStatsRepository {
    pool: PgPool,
}

impl PgStatsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatsRepository for PgStatsRepository {
    async fn save_observation(&self, observation: Observation) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO stats_history
                (channel_id, display_name, subscribers, videos, views, sampled_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (sampled_at, channel_id) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                subscribers = EXCLUDED.subscribers,
                videos = EXCLUDED.videos,
                views = EXCLUDED.views
            "#,
        )
        .bind(&observation.channel_id)
        .bind(&observation.display_name_at_sample)
        .bind(observation.subscribers as i64)
        .bind(observation.videos as i64)
        .bind(observation.views as i64)
        .bind(observation.sampled_at)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn latest_observation(
        &self,
        channel_id: &str,
    ) -> Result<Option<Observation>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT channel_id, display_name, subscribers, videos, views, sampled_at
            FROM stats_history
            WHERE channel_id = $1
            ORDER BY sampled_at DESC
            LIMIT 1
            "#,
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(read_err)?;

        Ok(row.map(|r| Observation {
            channel_id: r.get("channel_id"),
            display_name_at_sample: r.get("display_name"),
            subscribers: r.get::<i64, _>("subscribers") as u64,
            videos: r.get::<i64, _>("videos") as u64,
            views: r.get::<i64, _>("views") as u64,
            sampled_at: r.get("sampled_at"),
        }))
    }

    async fn record_change(
        &self,
        before: &Observation,
        after: &Observation,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO stats_changes
                (channel_id, before_subscribers, after_subscribers, before_videos, after_videos, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&after.channel_id)
        .bind(before.subscribers as i64)
        .bind(after.subscribers as i64)
        .bind(before.videos as i64)
        .bind(after.videos as i64)
        .bind(after.sampled_at)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn has_achieved_milestone(
        &self,
        channel_id: &str,
        kind: MilestoneKind,
        value: u64,
    ) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            "SELECT 1 FROM milestones WHERE channel_id = $1 AND kind = $2 AND value = $3",
        )
        .bind(channel_id)
        .bind(milestone_kind_str(kind))
        .bind(value as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(read_err)?;
        Ok(row.is_some())
    }

    async fn save_milestone(&self, record: MilestoneRecord) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(write_err)?;
        let result = sqlx::query(
            r#"
            INSERT INTO milestones
                (channel_id, kind, value, display_name, achieved_at, notified)
            VALUES ($1, $2, $3, $4, $5, false)
            ON CONFLICT (channel_id, kind, value) DO NOTHING
            "#,
        )
        .bind(&record.channel_id)
        .bind(milestone_kind_str(record.kind))
        .bind(record.value as i64)
        .bind(&record.display_name_at_achievement)
        .bind(record.achieved_at)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;
        tx.commit().await.map_err(write_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn unnotified_milestones(
        &self,
        limit: usize,
    ) -> Result<Vec<MilestoneRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT channel_id, kind, value, display_name, achieved_at, notified
            FROM milestones
            WHERE notified = false
            ORDER BY achieved_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)?;

        Ok(rows
            .into_iter()
            .map(|r| MilestoneRecord {
                channel_id: r.get("channel_id"),
                kind: parse_milestone_kind(r.get::<String, _>("kind").as_str()),
                value: r.get::<i64, _>("value") as u64,
                display_name_at_achievement: r.get("display_name"),
                achieved_at: r.get("achieved_at"),
                notified: r.get("notified"),
            })
            .collect())
    }

    async fn mark_milestone_notified(
        &self,
        channel_id: &str,
        kind: MilestoneKind,
        value: u64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE milestones SET notified = true WHERE channel_id = $1 AND kind = $2 AND value = $3",
        )
        .bind(channel_id)
        .bind(milestone_kind_str(kind))
        .bind(value as i64)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn near_milestone_candidates(
        &self,
        threshold_ratio: f64,
        ladder: &[u64],
        limit: usize,
    ) -> Result<Vec<NearMilestoneCandidate>, RepositoryError> {
        // The ladder comparison involves per-channel achieved-milestone state that doesn't map
        // cleanly onto a single SQL expression without a ladder table, so the candidate set is
        // computed in two round trips: fetch the latest-per-channel rows plus each channel's
        // achieved values, then apply the pure evaluator (component G) exactly as the in-memory
        // implementation does.
        let latest_rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (channel_id) channel_id, subscribers
            FROM stats_history
            ORDER BY channel_id, sampled_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)?;

        let mut out = Vec::new();
        for row in latest_rows {
            let channel_id: String = row.get("channel_id");
            let subscribers = row.get::<i64, _>("subscribers") as u64;

            let achieved_rows = sqlx::query("SELECT value FROM milestones WHERE channel_id = $1")
                .bind(&channel_id)
                .fetch_all(&self.pool)
                .await
                .map_err(read_err)?;
            let achieved: Vec<u64> =
                achieved_rows.iter().map(|r| r.get::<i64, _>("value") as u64).collect();

            let Some(next_rung) = evaluator::next_unachieved(subscribers, &achieved, ladder)
            else {
                continue;
            };
            let ratio = evaluator::progress_ratio(subscribers, next_rung);
            if ratio >= threshold_ratio {
                out.push((
                    ratio,
                    NearMilestoneCandidate {
                        channel_id,
                        current_subscribers: subscribers,
                        next_milestone: next_rung,
                    },
                ));
            }
        }
        out.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let mut candidates: Vec<NearMilestoneCandidate> =
            out.into_iter().map(|(_, c)| c).collect();
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn has_approaching_notified(
        &self,
        channel_id: &str,
        milestone_value: u64,
    ) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            "SELECT 1 FROM approaching_notifications WHERE channel_id = $1 AND milestone_value = $2",
        )
        .bind(channel_id)
        .bind(milestone_value as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(read_err)?;
        Ok(row.is_some())
    }

    async fn save_approaching_notification(
        &self,
        channel_id: &str,
        display_name: &str,
        milestone_value: u64,
        current_subscribers: u64,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO approaching_notifications
                (channel_id, display_name, milestone_value, subscribers_at_alert, created_at, chat_notified)
            VALUES ($1, $2, $3, $4, $5, false)
            ON CONFLICT (channel_id, milestone_value) DO NOTHING
            "#,
        )
        .bind(channel_id)
        .bind(display_name)
        .bind(milestone_value as i64)
        .bind(current_subscribers as i64)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn unnotified_approaching(
        &self,
        limit: usize,
    ) -> Result<Vec<ApproachingRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT channel_id, display_name, milestone_value, subscribers_at_alert, created_at, chat_notified
            FROM approaching_notifications
            WHERE chat_notified = false
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)?;

        Ok(rows
            .into_iter()
            .map(|r| ApproachingRecord {
                channel_id: r.get("channel_id"),
                display_name_at_alert: r.get("display_name"),
                milestone_value: r.get::<i64, _>("milestone_value") as u64,
                subscribers_at_alert: r.get::<i64, _>("subscribers_at_alert") as u64,
                created_at: r.get("created_at"),
                chat_notified: r.get("chat_notified"),
            })
            .collect())
    }

    async fn mark_approaching_chat_notified(
        &self,
        channel_id: &str,
        milestone_value: u64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE approaching_notifications SET chat_notified = true WHERE channel_id = $1 AND milestone_value = $2",
        )
        .bind(channel_id)
        .bind(milestone_value as i64)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn top_gainers(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<GainerEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            WITH windowed AS (
                SELECT channel_id, display_name, subscribers, sampled_at,
                       FIRST_VALUE(subscribers) OVER w AS earliest_subs,
                       LAST_VALUE(subscribers) OVER w AS latest_subs
                FROM stats_history
                WHERE sampled_at >= $1
                WINDOW w AS (
                    PARTITION BY channel_id ORDER BY sampled_at
                    ROWS BETWEEN UNBOUNDED PRECEDING AND UNBOUNDED FOLLOWING
                )
            )
            SELECT DISTINCT channel_id, display_name, earliest_subs, latest_subs
            FROM windowed
            WHERE latest_subs > earliest_subs
            ORDER BY (latest_subs - earliest_subs) DESC
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let from = r.get::<i64, _>("earliest_subs") as u64;
                let to = r.get::<i64, _>("latest_subs") as u64;
                GainerEntry {
                    channel_id: r.get("channel_id"),
                    display_name: r.get("display_name"),
                    gained_subscribers: to - from,
                    from_subscribers: from,
                    to_subscribers: to,
                }
            })
            .collect())
    }
}
