use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use sqlx::{types::Json, FromRow, PgPool};
use uuid::Uuid;

use super::{InteractionStore, RecommendationStore};
use crate::{
    error::{AppError, AppResult},
    models::{
        Algorithm, HybridExplanation, InteractionEvent, InteractionType, Recommendation,
        RecommendationType,
    },
};

#[derive(Debug, FromRow)]
struct InteractionRow {
    user_id: Uuid,
    track_id: Uuid,
    interaction_type: String,
    occurred_at: DateTime<Utc>,
    context: Option<Json<serde_json::Value>>,
}

impl From<InteractionRow> for InteractionEvent {
    fn from(row: InteractionRow) -> Self {
        let interaction_type = row
            .interaction_type
            .parse()
            .unwrap_or(InteractionType::Unknown);

        InteractionEvent {
            user_id: row.user_id,
            track_id: row.track_id,
            interaction_type,
            timestamp: row.occurred_at,
            context: row.context.map(|c| c.0),
        }
    }
}

/// Interaction log backed by the `interactions` table
#[derive(Clone)]
pub struct PgInteractionStore {
    pool: PgPool,
}

impl PgInteractionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InteractionStore for PgInteractionStore {
    async fn record_interaction(&self, event: &InteractionEvent) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO interactions (id, user_id, track_id, interaction_type, occurred_at, context)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.user_id)
        .bind(event.track_id)
        .bind(event.interaction_type.as_str())
        .bind(event.timestamp)
        .bind(event.context.clone().map(Json))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn user_interactions(&self, user_id: Uuid) -> BoxStream<'_, AppResult<InteractionEvent>> {
        sqlx::query_as::<_, InteractionRow>(
            r#"
            SELECT user_id, track_id, interaction_type, occurred_at, context
            FROM interactions
            WHERE user_id = $1
            ORDER BY occurred_at DESC
            "#,
        )
        .bind(user_id)
        .fetch(&self.pool)
        .map_ok(InteractionEvent::from)
        .map_err(AppError::from)
        .boxed()
    }

    fn all_interactions(&self) -> BoxStream<'_, AppResult<InteractionEvent>> {
        sqlx::query_as::<_, InteractionRow>(
            r#"
            SELECT user_id, track_id, interaction_type, occurred_at, context
            FROM interactions
            "#,
        )
        .fetch(&self.pool)
        .map_ok(InteractionEvent::from)
        .map_err(AppError::from)
        .boxed()
    }
}

#[derive(Debug, FromRow)]
struct RecommendationRow {
    id: Uuid,
    user_id: Uuid,
    track_id: Uuid,
    recommendation_type: String,
    score: f64,
    confidence: f64,
    explanation: Json<HybridExplanation>,
    sources: Vec<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<RecommendationRow> for Recommendation {
    type Error = AppError;

    fn try_from(row: RecommendationRow) -> Result<Self, Self::Error> {
        let sources = row
            .sources
            .iter()
            .map(|s| s.parse::<Algorithm>())
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Recommendation {
            id: row.id,
            user_id: row.user_id,
            track_id: row.track_id,
            recommendation_type: row.recommendation_type.parse()?,
            score: row.score,
            confidence: row.confidence,
            explanation: row.explanation.0,
            sources,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

fn source_names(sources: &[Algorithm]) -> Vec<String> {
    sources.iter().map(|s| s.as_str().to_string()).collect()
}

/// Recommendation rows backed by the `recommendations` table.
///
/// The natural key is enforced by a partial unique index over
/// (user_id, track_id, recommendation_type) WHERE is_active.
#[derive(Clone)]
pub struct PgRecommendationStore {
    pool: PgPool,
}

impl PgRecommendationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RecommendationStore for PgRecommendationStore {
    async fn replace_user_recommendations(
        &self,
        user_id: Uuid,
        recommendations: &[Recommendation],
    ) -> AppResult<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE recommendations
            SET is_active = false
            WHERE user_id = $1 AND is_active AND recommendation_type = $2
            "#,
        )
        .bind(user_id)
        .bind(RecommendationType::Hybrid.as_str())
        .execute(&mut *tx)
        .await?;

        for rec in recommendations {
            sqlx::query(
                r#"
                INSERT INTO recommendations
                    (id, user_id, track_id, recommendation_type, score, confidence,
                     explanation, sources, is_active, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, true, $9)
                ON CONFLICT (user_id, track_id, recommendation_type) WHERE is_active
                DO UPDATE SET
                    score = EXCLUDED.score,
                    confidence = EXCLUDED.confidence,
                    explanation = EXCLUDED.explanation,
                    sources = EXCLUDED.sources,
                    created_at = EXCLUDED.created_at
                "#,
            )
            .bind(rec.id)
            .bind(rec.user_id)
            .bind(rec.track_id)
            .bind(rec.recommendation_type.as_str())
            .bind(rec.score)
            .bind(rec.confidence)
            .bind(Json(&rec.explanation))
            .bind(source_names(&rec.sources))
            .bind(rec.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(recommendations.len())
    }

    async fn insert_if_absent(&self, rec: &Recommendation) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO recommendations
                (id, user_id, track_id, recommendation_type, score, confidence,
                 explanation, sources, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, true, $9)
            ON CONFLICT (user_id, track_id, recommendation_type) WHERE is_active
            DO NOTHING
            "#,
        )
        .bind(rec.id)
        .bind(rec.user_id)
        .bind(rec.track_id)
        .bind(rec.recommendation_type.as_str())
        .bind(rec.score)
        .bind(rec.confidence)
        .bind(Json(&rec.explanation))
        .bind(source_names(&rec.sources))
        .bind(rec.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn deactivate_user_recommendations(&self, user_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE recommendations SET is_active = false WHERE user_id = $1 AND is_active",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn deactivate_stale(&self, user_id: Uuid, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE recommendations
            SET is_active = false
            WHERE user_id = $1 AND is_active AND created_at < $2
            "#,
        )
        .bind(user_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn active_recommendations(
        &self,
        user_id: Uuid,
        fresh_since: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<Recommendation>> {
        let rows = sqlx::query_as::<_, RecommendationRow>(
            r#"
            SELECT id, user_id, track_id, recommendation_type, score, confidence,
                   explanation, sources, is_active, created_at
            FROM recommendations
            WHERE user_id = $1 AND is_active AND created_at >= $2
            ORDER BY score DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(fresh_since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Recommendation::try_from).collect()
    }

    async fn latest_active_at(&self, user_id: Uuid) -> AppResult<Option<DateTime<Utc>>> {
        let latest: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(created_at) FROM recommendations \
             WHERE user_id = $1 AND is_active AND recommendation_type = 'hybrid'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(latest)
    }
}
