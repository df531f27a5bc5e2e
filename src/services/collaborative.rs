use futures::TryStreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    db::SimilarityCache,
    error::AppResult,
    models::{Candidate, Explanation},
    services::similarity::{SimilarityEngine, SimilarUser},
    store::{collect_user_interactions, InteractionStore},
};

/// Contributing users kept in a user-based explanation
const MAX_EXPLAINING_USERS: usize = 5;
/// Source tracks kept in an item-based explanation
const MAX_EXPLAINING_TRACKS: usize = 3;
/// Score at which user-based confidence saturates
const USER_BASED_CONFIDENCE_SCALE: f64 = 10.0;
/// Score at which item-based confidence saturates
const ITEM_BASED_CONFIDENCE_SCALE: f64 = 5.0;

struct Accumulator {
    score: f64,
    contributors: Vec<Uuid>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            score: 0.0,
            contributors: Vec::new(),
        }
    }

    fn add(&mut self, amount: f64, contributor: Uuid, max_contributors: usize) {
        self.score += amount;
        if self.contributors.len() < max_contributors && !self.contributors.contains(&contributor)
        {
            self.contributors.push(contributor);
        }
    }
}

/// Highest score first; track id breaks ties so output is reproducible
fn rank(mut candidates: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.track_id.cmp(&b.track_id))
    });
    candidates.truncate(limit);
    candidates
}

/// User-based and item-based collaborative filtering.
///
/// Best-effort: every public generator logs failures and returns an empty
/// list instead of an error.
pub struct CollaborativeRecommender {
    interactions: Arc<dyn InteractionStore>,
    similarity: Arc<SimilarityEngine>,
    cache: Arc<dyn SimilarityCache>,
}

impl CollaborativeRecommender {
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        similarity: Arc<SimilarityEngine>,
        cache: Arc<dyn SimilarityCache>,
    ) -> Self {
        Self {
            interactions,
            similarity,
            cache,
        }
    }

    pub async fn generate_user_based_recommendations(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Vec<Candidate> {
        match self.user_based(user_id, limit).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "User-based recommendation failed");
                Vec::new()
            }
        }
    }

    pub async fn generate_item_based_recommendations(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Vec<Candidate> {
        match self.item_based(user_id, limit).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Item-based recommendation failed");
                Vec::new()
            }
        }
    }

    /// Union of user-based and item-based candidates.
    ///
    /// A track proposed by both keeps the higher-scoring entry.
    pub async fn generate_recommendations(&self, user_id: Uuid, limit: usize) -> Vec<Candidate> {
        let (user_based, item_based) = tokio::join!(
            self.generate_user_based_recommendations(user_id, limit),
            self.generate_item_based_recommendations(user_id, limit)
        );

        let mut merged: HashMap<Uuid, Candidate> = HashMap::new();
        for candidate in user_based.into_iter().chain(item_based) {
            let replace = merged
                .get(&candidate.track_id)
                .map_or(true, |existing| candidate.score > existing.score);
            if replace {
                merged.insert(candidate.track_id, candidate);
            }
        }

        rank(merged.into_values().collect(), limit)
    }

    /// Recomputes the user's neighbourhood and caches it
    pub async fn refresh_similar_users(&self, user_id: Uuid) -> AppResult<Vec<SimilarUser>> {
        let similar = self.similarity.similar_users_for(user_id).await?;
        self.cache.store_similar_users(user_id, &similar).await?;

        tracing::debug!(user_id = %user_id, neighbours = similar.len(), "Similar users refreshed");
        Ok(similar)
    }

    /// Cached neighbourhood if present, otherwise computed and cached
    async fn similar_users(&self, user_id: Uuid) -> AppResult<Vec<SimilarUser>> {
        match self.cache.similar_users(user_id).await {
            Ok(Some(similar)) => return Ok(similar),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Similar users cache read failed");
            }
        }

        self.refresh_similar_users(user_id).await
    }

    async fn user_based(&self, user_id: Uuid, limit: usize) -> AppResult<Vec<Candidate>> {
        let already_heard = self.interactions.interacted_tracks(user_id).await?;
        let similar = self.similar_users(user_id).await?;

        let mut scores: HashMap<Uuid, Accumulator> = HashMap::new();
        for neighbour in &similar {
            let mut events = self.interactions.user_interactions(neighbour.user_id);
            while let Some(event) = events.try_next().await? {
                if already_heard.contains(&event.track_id) {
                    continue;
                }
                scores
                    .entry(event.track_id)
                    .or_insert_with(Accumulator::new)
                    .add(
                        neighbour.similarity * event.weight(),
                        neighbour.user_id,
                        MAX_EXPLAINING_USERS,
                    );
            }
        }

        let candidates = scores
            .into_iter()
            .filter(|(_, acc)| acc.score > 0.0)
            .map(|(track_id, acc)| Candidate {
                track_id,
                score: acc.score,
                confidence: (acc.score / USER_BASED_CONFIDENCE_SCALE).min(1.0),
                explanation: Explanation::UserBased {
                    similar_users: acc.contributors,
                },
            })
            .collect();

        let ranked = rank(candidates, limit);
        tracing::debug!(
            user_id = %user_id,
            neighbours = similar.len(),
            candidates = ranked.len(),
            "User-based candidates generated"
        );

        Ok(ranked)
    }

    async fn item_based(&self, user_id: Uuid, limit: usize) -> AppResult<Vec<Candidate>> {
        let history = collect_user_interactions(self.interactions.as_ref(), user_id).await?;
        let already_heard: HashSet<Uuid> = history.iter().map(|e| e.track_id).collect();

        let mut neighbourhoods: HashMap<Uuid, Option<HashMap<Uuid, f64>>> = HashMap::new();
        let mut scores: HashMap<Uuid, Accumulator> = HashMap::new();

        for event in &history {
            if !neighbourhoods.contains_key(&event.track_id) {
                let neighbours = self.cache.item_neighbors(event.track_id).await?;
                neighbourhoods.insert(event.track_id, neighbours);
            }
            let Some(Some(neighbours)) = neighbourhoods.get(&event.track_id) else {
                continue;
            };

            for (candidate, similarity) in neighbours {
                if already_heard.contains(candidate) {
                    continue;
                }
                scores
                    .entry(*candidate)
                    .or_insert_with(Accumulator::new)
                    .add(
                        similarity * event.weight(),
                        event.track_id,
                        MAX_EXPLAINING_TRACKS,
                    );
            }
        }

        let candidates = scores
            .into_iter()
            .filter(|(_, acc)| acc.score > 0.0)
            .map(|(track_id, acc)| Candidate {
                track_id,
                score: acc.score,
                confidence: (acc.score / ITEM_BASED_CONFIDENCE_SCALE).min(1.0),
                explanation: Explanation::ItemBased {
                    source_tracks: acc.contributors,
                },
            })
            .collect();

        Ok(rank(candidates, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecommenderSettings;
    use crate::db::InMemorySimilarityCache;
    use crate::models::{InteractionEvent, InteractionType};
    use crate::services::similarity::ItemSimilarityMatrix;
    use crate::store::InMemoryInteractionStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryInteractionStore>,
        cache: Arc<InMemorySimilarityCache>,
        recommender: CollaborativeRecommender,
    }

    fn fixture() -> Fixture {
        let settings = RecommenderSettings::default();
        let store = Arc::new(InMemoryInteractionStore::new());
        let cache = Arc::new(InMemorySimilarityCache::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        let similarity = Arc::new(SimilarityEngine::new(store.clone(), settings.clone()));
        let recommender =
            CollaborativeRecommender::new(store.clone(), similarity, cache.clone());
        Fixture {
            store,
            cache,
            recommender,
        }
    }

    async fn record(store: &InMemoryInteractionStore, user: Uuid, track: Uuid, kind: InteractionType) {
        store
            .record_interaction(&InteractionEvent::new(user, track, kind))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_user_based_reference_scenario() {
        let f = fixture();
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        let (t1, t2) = (Uuid::new_v4(), Uuid::new_v4());

        record(&f.store, u1, t1, InteractionType::Like).await;
        record(&f.store, u2, t1, InteractionType::Like).await;
        record(&f.store, u2, t2, InteractionType::Play).await;

        let recs = f.recommender.generate_user_based_recommendations(u1, 10).await;

        assert_eq!(recs.len(), 1);
        let rec = &recs[0];
        assert_eq!(rec.track_id, t2);
        let similarity = 25.0 / (5.0 * 29f64.sqrt());
        assert!((rec.score - similarity * 2.0).abs() < 1e-9);
        assert!((rec.score - 1.857).abs() < 1e-3);
        assert!((rec.confidence - rec.score / 10.0).abs() < 1e-12);
        assert_eq!(
            rec.explanation,
            Explanation::UserBased {
                similar_users: vec![u2]
            }
        );
    }

    #[tokio::test]
    async fn test_user_based_never_returns_known_tracks() {
        let f = fixture();
        let me = Uuid::new_v4();
        let tracks: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();

        record(&f.store, me, tracks[0], InteractionType::Like).await;
        record(&f.store, me, tracks[1], InteractionType::Dislike).await;
        for _ in 0..3 {
            let other = Uuid::new_v4();
            for track in &tracks {
                record(&f.store, other, *track, InteractionType::Like).await;
            }
        }

        let known = f.store.interacted_tracks(me).await.unwrap();
        let recs = f.recommender.generate_user_based_recommendations(me, 10).await;
        assert!(!recs.is_empty());
        assert!(recs.iter().all(|r| !known.contains(&r.track_id)));
        assert!(recs.iter().all(|r| match &r.explanation {
            Explanation::UserBased { similar_users } => similar_users.len() <= 5,
            _ => false,
        }));
    }

    #[tokio::test]
    async fn test_user_based_uses_cached_neighbourhood() {
        let f = fixture();
        let (me, cached_neighbour) = (Uuid::new_v4(), Uuid::new_v4());
        let track = Uuid::new_v4();

        record(&f.store, me, Uuid::new_v4(), InteractionType::Play).await;
        record(&f.store, cached_neighbour, track, InteractionType::Like).await;
        f.cache
            .store_similar_users(
                me,
                &[SimilarUser {
                    user_id: cached_neighbour,
                    similarity: 0.5,
                }],
            )
            .await
            .unwrap();

        let recs = f.recommender.generate_user_based_recommendations(me, 10).await;
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].track_id, track);
        assert!((recs[0].score - 2.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_item_based_scores_and_excludes_history() {
        let f = fixture();
        let me = Uuid::new_v4();
        let (liked, played, candidate, heard) =
            (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        record(&f.store, me, liked, InteractionType::Like).await;
        record(&f.store, me, played, InteractionType::Play).await;
        record(&f.store, me, heard, InteractionType::Skip).await;

        let mut matrix = ItemSimilarityMatrix::new();
        matrix.entry(liked).or_default().insert(candidate, 0.5);
        matrix.entry(liked).or_default().insert(heard, 0.9);
        matrix.entry(played).or_default().insert(candidate, 0.25);
        f.cache.store_item_similarity(&matrix).await.unwrap();

        let recs = f.recommender.generate_item_based_recommendations(me, 10).await;
        assert_eq!(recs.len(), 1);
        let rec = &recs[0];
        assert_eq!(rec.track_id, candidate);
        // 0.5 * 5 (like) + 0.25 * 2 (play)
        assert!((rec.score - 3.0).abs() < 1e-12);
        assert!((rec.confidence - 0.6).abs() < 1e-12);
        match &rec.explanation {
            Explanation::ItemBased { source_tracks } => {
                assert_eq!(source_tracks.len(), 2);
                assert!(source_tracks.contains(&liked) && source_tracks.contains(&played));
            }
            other => panic!("unexpected explanation {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_item_based_without_matrix_is_empty() {
        let f = fixture();
        let me = Uuid::new_v4();
        record(&f.store, me, Uuid::new_v4(), InteractionType::Like).await;

        assert!(f
            .recommender
            .generate_item_based_recommendations(me, 10)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_merged_keeps_higher_scoring_entry() {
        let f = fixture();
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        let (t1, t2) = (Uuid::new_v4(), Uuid::new_v4());

        record(&f.store, u1, t1, InteractionType::Like).await;
        record(&f.store, u2, t1, InteractionType::Like).await;
        record(&f.store, u2, t2, InteractionType::Play).await;

        let mut matrix = ItemSimilarityMatrix::new();
        matrix.entry(t1).or_default().insert(t2, 0.9);
        f.cache.store_item_similarity(&matrix).await.unwrap();

        let recs = f.recommender.generate_recommendations(u1, 10).await;
        assert_eq!(recs.len(), 1);
        // item-based 0.9 * 5 = 4.5 beats user-based ≈ 1.857
        assert!((recs[0].score - 4.5).abs() < 1e-12);
        assert!(matches!(recs[0].explanation, Explanation::ItemBased { .. }));
    }
}
