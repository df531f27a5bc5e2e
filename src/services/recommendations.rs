use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    config::RecommenderSettings,
    models::{Recommendation, ServedRecommendation},
    services::fusion::HybridFusionEngine,
    store::RecommendationStore,
};

/// Serves personalized track recommendations
///
/// Reads the user's active, non-stale rows. When nothing is servable the
/// hybrid pipeline runs inline and its result is persisted and served.
/// Failures never reach the caller: the worst case is an empty list.
pub struct RecommendationService {
    recommendations: Arc<dyn RecommendationStore>,
    fusion: Arc<HybridFusionEngine>,
    settings: RecommenderSettings,
}

impl RecommendationService {
    pub fn new(
        recommendations: Arc<dyn RecommendationStore>,
        fusion: Arc<HybridFusionEngine>,
        settings: RecommenderSettings,
    ) -> Self {
        Self {
            recommendations,
            fusion,
            settings,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_recommendations(&self, user_id: Uuid, limit: usize) -> Vec<ServedRecommendation> {
        if limit == 0 {
            return Vec::new();
        }

        let stored = self.stored(user_id, limit).await;
        if !stored.is_empty() {
            tracing::debug!(count = stored.len(), "Serving stored recommendations");
            return stored;
        }

        let fused = self
            .fusion
            .generate_hybrid_recommendations(user_id, limit, None)
            .await;
        if fused.is_empty() {
            return Vec::new();
        }

        let rows: Vec<Recommendation> = fused
            .iter()
            .cloned()
            .map(|rec| Recommendation::from_fused(user_id, rec))
            .collect();
        if let Err(e) = self
            .recommendations
            .replace_user_recommendations(user_id, &rows)
            .await
        {
            tracing::warn!(error = %e, "Generated recommendations not persisted");
        }

        tracing::debug!(count = fused.len(), "Serving freshly generated recommendations");
        fused.into_iter().map(ServedRecommendation::from).collect()
    }

    /// Active fresh rows, one per track, best score first
    async fn stored(&self, user_id: Uuid, limit: usize) -> Vec<ServedRecommendation> {
        let fresh_since = Utc::now() - self.settings.staleness_horizon;

        // A track can hold both a hybrid and a trending row
        let rows = match self
            .recommendations
            .active_recommendations(user_id, fresh_since, limit * 2)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "Stored recommendations unavailable");
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        rows.into_iter()
            .filter(|row| seen.insert(row.track_id))
            .take(limit)
            .map(ServedRecommendation::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemorySimilarityCache;
    use crate::error::{AppError, AppResult};
    use crate::models::{InteractionEvent, InteractionType, RecommendationType};
    use crate::services::collaborative::CollaborativeRecommender;
    use crate::services::fusion::FusionSources;
    use crate::services::providers::InMemoryCatalog;
    use crate::services::similarity::SimilarityEngine;
    use crate::store::{InMemoryInteractionStore, InMemoryRecommendationStore, InteractionStore};
    use chrono::DateTime;
    use std::time::Duration;

    fn service_over(
        store: Arc<InMemoryInteractionStore>,
        rows: Arc<dyn RecommendationStore>,
    ) -> RecommendationService {
        let settings = RecommenderSettings {
            shuffle_seed: Some(9),
            ..Default::default()
        };
        let catalog = Arc::new(InMemoryCatalog::new(store.clone()));
        let cache = Arc::new(InMemorySimilarityCache::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        let similarity = Arc::new(SimilarityEngine::new(store.clone(), settings.clone()));
        let collaborative = Arc::new(CollaborativeRecommender::new(
            store.clone(),
            similarity,
            cache,
        ));
        let fusion = Arc::new(HybridFusionEngine::new(
            collaborative,
            store,
            FusionSources {
                content: catalog.clone(),
                trending: catalog.clone(),
                performance: catalog.clone(),
                exploration: catalog.clone(),
                metadata: catalog,
            },
            settings.clone(),
        ));
        RecommendationService::new(rows, fusion, settings)
    }

    async fn seed(store: &InMemoryInteractionStore) -> (Uuid, Uuid) {
        let (u1, u2, t1, t2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for (user, track, kind) in [
            (u1, t1, InteractionType::Like),
            (u2, t1, InteractionType::Like),
            (u2, t2, InteractionType::Play),
        ] {
            store
                .record_interaction(&InteractionEvent::new(user, track, kind))
                .await
                .unwrap();
        }
        (u1, t2)
    }

    #[tokio::test]
    async fn test_serves_stored_rows_once_per_track() {
        let store = Arc::new(InMemoryInteractionStore::new());
        let rows = Arc::new(InMemoryRecommendationStore::new());
        let service = service_over(store, rows.clone());
        let (user, track) = (Uuid::new_v4(), Uuid::new_v4());

        let trending = Recommendation::trending(user, track);
        let mut hybrid = Recommendation::trending(user, track);
        hybrid.recommendation_type = RecommendationType::Hybrid;
        hybrid.score = 1.5;
        rows.insert_if_absent(&trending).await.unwrap();
        rows.insert_if_absent(&hybrid).await.unwrap();

        let served = service.get_recommendations(user, 10).await;
        assert_eq!(served.len(), 1);
        assert_eq!(served[0].score, 1.5);
    }

    #[tokio::test]
    async fn test_generates_and_persists_when_nothing_is_servable() {
        let store = Arc::new(InMemoryInteractionStore::new());
        let rows = Arc::new(InMemoryRecommendationStore::new());
        let (u1, t2) = seed(&store).await;
        let service = service_over(store, rows.clone());

        let mut stale = Recommendation::trending(u1, Uuid::new_v4());
        stale.created_at = Utc::now() - chrono::Duration::hours(48);
        rows.insert_if_absent(&stale).await.unwrap();

        let served = service.get_recommendations(u1, 5).await;
        assert!(served.len() <= 5);
        assert!(served.iter().any(|r| r.track_id == t2));
        assert!(served.iter().all(|r| r.track_id != stale.track_id));

        let persisted = rows
            .all_rows()
            .await
            .into_iter()
            .filter(|r| r.is_active && r.recommendation_type == RecommendationType::Hybrid)
            .count();
        assert_eq!(persisted, served.len());
    }

    #[tokio::test]
    async fn test_unknown_user_without_trending_gets_empty_list() {
        let store = Arc::new(InMemoryInteractionStore::new());
        let rows = Arc::new(InMemoryRecommendationStore::new());
        let service = service_over(store, rows);

        assert!(service.get_recommendations(Uuid::new_v4(), 10).await.is_empty());
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl RecommendationStore for BrokenStore {
        async fn replace_user_recommendations(
            &self,
            _user_id: Uuid,
            _recommendations: &[Recommendation],
        ) -> AppResult<usize> {
            Err(AppError::Internal("disk full".to_string()))
        }

        async fn insert_if_absent(&self, _recommendation: &Recommendation) -> AppResult<bool> {
            Err(AppError::Internal("disk full".to_string()))
        }

        async fn deactivate_user_recommendations(&self, _user_id: Uuid) -> AppResult<u64> {
            Err(AppError::Internal("disk full".to_string()))
        }

        async fn deactivate_stale(
            &self,
            _user_id: Uuid,
            _cutoff: DateTime<Utc>,
        ) -> AppResult<u64> {
            Err(AppError::Internal("disk full".to_string()))
        }

        async fn active_recommendations(
            &self,
            _user_id: Uuid,
            _fresh_since: DateTime<Utc>,
            _limit: usize,
        ) -> AppResult<Vec<Recommendation>> {
            Err(AppError::Internal("disk full".to_string()))
        }

        async fn latest_active_at(&self, _user_id: Uuid) -> AppResult<Option<DateTime<Utc>>> {
            Err(AppError::Internal("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failures_still_serve_generated_list() {
        let store = Arc::new(InMemoryInteractionStore::new());
        let (u1, t2) = seed(&store).await;
        let service = service_over(store, Arc::new(BrokenStore));

        let served = service.get_recommendations(u1, 5).await;
        assert!(served.iter().any(|r| r.track_id == t2));
    }
}
