use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{InteractionStore, RecommendationStore};
use crate::{
    error::{AppError, AppResult},
    models::{InteractionEvent, Recommendation, RecommendationType},
};

/// Interaction log held in process memory
#[derive(Default)]
pub struct InMemoryInteractionStore {
    events: RwLock<Vec<InteractionEvent>>,
}

impl InMemoryInteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the whole log in insertion order
    pub async fn snapshot(&self) -> Vec<InteractionEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait::async_trait]
impl InteractionStore for InMemoryInteractionStore {
    async fn record_interaction(&self, event: &InteractionEvent) -> AppResult<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    fn user_interactions(&self, user_id: Uuid) -> BoxStream<'_, AppResult<InteractionEvent>> {
        stream::once(async move {
            let mut events: Vec<InteractionEvent> = self
                .events
                .read()
                .await
                .iter()
                .filter(|e| e.user_id == user_id)
                .cloned()
                .collect();
            // Stable sort keeps later appends first among equal timestamps
            events.reverse();
            events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            stream::iter(events.into_iter().map(Ok::<_, AppError>))
        })
        .flatten()
        .boxed()
    }

    fn all_interactions(&self) -> BoxStream<'_, AppResult<InteractionEvent>> {
        stream::once(async move {
            let events = self.events.read().await.clone();
            stream::iter(events.into_iter().map(Ok::<_, AppError>))
        })
        .flatten()
        .boxed()
    }
}

/// Recommendation rows held in process memory
#[derive(Default)]
pub struct InMemoryRecommendationStore {
    rows: RwLock<Vec<Recommendation>>,
}

impl InMemoryRecommendationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row ever written, active or not
    pub async fn all_rows(&self) -> Vec<Recommendation> {
        self.rows.read().await.clone()
    }
}

#[async_trait::async_trait]
impl RecommendationStore for InMemoryRecommendationStore {
    async fn replace_user_recommendations(
        &self,
        user_id: Uuid,
        recommendations: &[Recommendation],
    ) -> AppResult<usize> {
        let mut rows = self.rows.write().await;

        for row in rows.iter_mut() {
            if row.user_id == user_id
                && row.is_active
                && row.recommendation_type == RecommendationType::Hybrid
            {
                row.is_active = false;
            }
        }

        let mut written = 0;
        for rec in recommendations {
            // Same natural key inside one batch: last one wins
            for row in rows.iter_mut() {
                if row.is_active && row.key() == rec.key() {
                    row.is_active = false;
                }
            }
            rows.push(rec.clone());
            written += 1;
        }

        Ok(written)
    }

    async fn insert_if_absent(&self, recommendation: &Recommendation) -> AppResult<bool> {
        let mut rows = self.rows.write().await;
        let exists = rows
            .iter()
            .any(|row| row.is_active && row.key() == recommendation.key());

        if exists {
            return Ok(false);
        }

        rows.push(recommendation.clone());
        Ok(true)
    }

    async fn deactivate_user_recommendations(&self, user_id: Uuid) -> AppResult<u64> {
        let mut rows = self.rows.write().await;
        let mut count = 0;
        for row in rows.iter_mut().filter(|r| r.user_id == user_id && r.is_active) {
            row.is_active = false;
            count += 1;
        }
        Ok(count)
    }

    async fn deactivate_stale(&self, user_id: Uuid, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let mut rows = self.rows.write().await;
        let mut count = 0;
        for row in rows
            .iter_mut()
            .filter(|r| r.user_id == user_id && r.is_active && r.created_at < cutoff)
        {
            row.is_active = false;
            count += 1;
        }
        Ok(count)
    }

    async fn active_recommendations(
        &self,
        user_id: Uuid,
        fresh_since: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<Recommendation>> {
        let rows = self.rows.read().await;
        let mut active: Vec<Recommendation> = rows
            .iter()
            .filter(|r| r.user_id == user_id && r.is_active && r.created_at >= fresh_since)
            .cloned()
            .collect();

        active.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        active.truncate(limit);

        Ok(active)
    }

    async fn latest_active_at(&self, user_id: Uuid) -> AppResult<Option<DateTime<Utc>>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|r| {
                r.user_id == user_id
                    && r.is_active
                    && r.recommendation_type == RecommendationType::Hybrid
            })
            .map(|r| r.created_at)
            .max())
    }
}
