/// Catalog-derived signals computed in PostgreSQL
///
/// Trending, engagement and exploration signals are aggregates over the
/// `interactions`, `recommendations` and `tracks` tables.
use std::collections::HashMap;

use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{AlgorithmPerformance, ExplorationProfile, TrackMetadata, TrendingCandidate},
    services::providers::{
        AlgorithmPerformanceSource, ExplorationProfileSource, TrackMetadataSource, TrendingSource,
    },
};

/// Window over which play activity counts towards trending
const TRENDING_WINDOW_DAYS: i32 = 7;

#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct TrackRow {
    id: Uuid,
    genre: Option<String>,
    artist: Option<String>,
}

#[derive(Debug, FromRow)]
struct TrendingRow {
    track_id: Uuid,
    activity: f64,
}

/// Scales raw activity counts into (0, 1] relative to the hottest track
fn normalize_trending(rows: Vec<TrendingRow>) -> Vec<TrendingCandidate> {
    let max = rows.iter().map(|r| r.activity).fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return Vec::new();
    }

    rows.into_iter()
        .map(|r| TrendingCandidate {
            track_id: r.track_id,
            score: r.activity / max,
        })
        .collect()
}

#[async_trait::async_trait]
impl TrendingSource for PgCatalog {
    async fn get_trending_candidates(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<TrendingCandidate>> {
        let rows = sqlx::query_as::<_, TrendingRow>(
            r#"
            SELECT track_id, COUNT(*)::float8 AS activity
            FROM interactions
            WHERE occurred_at > NOW() - make_interval(days => $2)
              AND interaction_type IN ('play', 'like', 'add_to_playlist', 'download', 'share')
              AND track_id NOT IN (SELECT track_id FROM interactions WHERE user_id = $1)
            GROUP BY track_id
            ORDER BY activity DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(TRENDING_WINDOW_DAYS)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(normalize_trending(rows))
    }
}

#[async_trait::async_trait]
impl AlgorithmPerformanceSource for PgCatalog {
    /// Share of past recommendations per source that the user later engaged with
    async fn get_algorithm_performance(&self, user_id: Uuid) -> AppResult<AlgorithmPerformance> {
        let (collaborative, content_based): (Option<f64>, Option<f64>) = sqlx::query_as(
            r#"
            WITH outcomes AS (
                SELECT r.sources,
                       EXISTS (
                           SELECT 1 FROM interactions i
                           WHERE i.user_id = r.user_id
                             AND i.track_id = r.track_id
                             AND i.occurred_at >= r.created_at
                             AND i.interaction_type IN ('play', 'like', 'add_to_playlist', 'download', 'share')
                       ) AS engaged
                FROM recommendations r
                WHERE r.user_id = $1
            )
            SELECT
                (AVG(CASE WHEN engaged THEN 1.0 ELSE 0.0 END)
                    FILTER (WHERE 'collaborative' = ANY(sources)))::float8,
                (AVG(CASE WHEN engaged THEN 1.0 ELSE 0.0 END)
                    FILTER (WHERE 'content_based' = ANY(sources)))::float8
            FROM outcomes
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(AlgorithmPerformance {
            collaborative: collaborative.unwrap_or(0.0),
            content_based: content_based.unwrap_or(0.0),
        })
    }
}

#[async_trait::async_trait]
impl ExplorationProfileSource for PgCatalog {
    /// Genre breadth of the user's history: distinct genres per distinct track
    async fn get_user_exploration_profile(
        &self,
        user_id: Uuid,
    ) -> AppResult<Option<ExplorationProfile>> {
        let breadth: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT t.genre)::float8 / NULLIF(COUNT(DISTINCT i.track_id), 0)::float8
            FROM interactions i
            JOIN tracks t ON t.id = i.track_id
            WHERE i.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(breadth.map(|b| ExplorationProfile {
            exploration_tendency: b.clamp(0.0, 1.0),
        }))
    }
}

#[async_trait::async_trait]
impl TrackMetadataSource for PgCatalog {
    async fn get_track_metadata(
        &self,
        track_ids: &[Uuid],
    ) -> AppResult<HashMap<Uuid, TrackMetadata>> {
        if track_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, TrackRow>(
            "SELECT id, genre, artist FROM tracks WHERE id = ANY($1)",
        )
        .bind(track_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.id,
                    TrackMetadata {
                        genre: r.genre,
                        artist: r.artist,
                    },
                )
            })
            .collect())
    }

    async fn find_interested_users(&self, track_id: Uuid, limit: usize) -> AppResult<Vec<Uuid>> {
        let users: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT i.user_id
            FROM interactions i
            JOIN tracks t ON t.id = i.track_id
            JOIN tracks target ON target.id = $1
            WHERE i.track_id <> $1
              AND (t.genre = target.genre OR t.artist = target.artist)
            LIMIT $2
            "#,
        )
        .bind(track_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trending_scales_to_hottest() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![
            TrendingRow {
                track_id: a,
                activity: 40.0,
            },
            TrendingRow {
                track_id: b,
                activity: 10.0,
            },
        ];

        let candidates = normalize_trending(rows);
        assert_eq!(candidates[0].track_id, a);
        assert_eq!(candidates[0].score, 1.0);
        assert_eq!(candidates[1].score, 0.25);
    }

    #[test]
    fn test_normalize_trending_empty() {
        assert!(normalize_trending(Vec::new()).is_empty());
    }
}
