/// In-process catalog for local runs and tests
///
/// Trending is derived from the shared interaction store; metadata, engagement,
/// exploration profiles and content candidates are registered explicitly.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::TryStreamExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        AlgorithmPerformance, ContentCandidate, ExplorationProfile, InteractionType,
        TrackMetadata, TrendingCandidate,
    },
    services::providers::{
        AlgorithmPerformanceSource, ContentBasedRecommender, ExplorationProfileSource,
        TrackMetadataSource, TrendingSource,
    },
    store::InteractionStore,
};

const TRENDING_WINDOW_DAYS: i64 = 7;

#[derive(Default)]
struct CatalogState {
    metadata: HashMap<Uuid, TrackMetadata>,
    performance: HashMap<Uuid, AlgorithmPerformance>,
    profiles: HashMap<Uuid, ExplorationProfile>,
    content: HashMap<Uuid, Vec<ContentCandidate>>,
}

pub struct InMemoryCatalog {
    interactions: Arc<dyn InteractionStore>,
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new(interactions: Arc<dyn InteractionStore>) -> Self {
        Self {
            interactions,
            state: RwLock::new(CatalogState::default()),
        }
    }

    pub async fn register_track(&self, track_id: Uuid, genre: &str, artist: &str) {
        self.state.write().await.metadata.insert(
            track_id,
            TrackMetadata {
                genre: Some(genre.to_string()),
                artist: Some(artist.to_string()),
            },
        );
    }

    pub async fn set_performance(&self, user_id: Uuid, performance: AlgorithmPerformance) {
        self.state
            .write()
            .await
            .performance
            .insert(user_id, performance);
    }

    pub async fn set_exploration_tendency(&self, user_id: Uuid, tendency: f64) {
        self.state.write().await.profiles.insert(
            user_id,
            ExplorationProfile {
                exploration_tendency: tendency,
            },
        );
    }

    pub async fn set_content_candidates(&self, user_id: Uuid, candidates: Vec<ContentCandidate>) {
        self.state.write().await.content.insert(user_id, candidates);
    }
}

fn counts_towards_trending(kind: InteractionType) -> bool {
    matches!(
        kind,
        InteractionType::Play
            | InteractionType::Like
            | InteractionType::AddToPlaylist
            | InteractionType::Download
            | InteractionType::Share
    )
}

#[async_trait::async_trait]
impl TrendingSource for InMemoryCatalog {
    async fn get_trending_candidates(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<TrendingCandidate>> {
        let since = Utc::now() - chrono::Duration::days(TRENDING_WINDOW_DAYS);
        let own = self.interactions.interacted_tracks(user_id).await?;

        let mut activity: HashMap<Uuid, f64> = HashMap::new();
        let mut events = self.interactions.all_interactions();
        while let Some(event) = events.try_next().await? {
            if event.timestamp > since
                && counts_towards_trending(event.interaction_type)
                && !own.contains(&event.track_id)
            {
                *activity.entry(event.track_id).or_insert(0.0) += 1.0;
            }
        }

        let max = activity.values().copied().fold(0.0_f64, f64::max);
        if max <= 0.0 {
            return Ok(Vec::new());
        }

        let mut trending: Vec<TrendingCandidate> = activity
            .into_iter()
            .map(|(track_id, count)| TrendingCandidate {
                track_id,
                score: count / max,
            })
            .collect();
        trending.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.track_id.cmp(&b.track_id))
        });
        trending.truncate(limit);

        Ok(trending)
    }
}

#[async_trait::async_trait]
impl AlgorithmPerformanceSource for InMemoryCatalog {
    async fn get_algorithm_performance(&self, user_id: Uuid) -> AppResult<AlgorithmPerformance> {
        Ok(self
            .state
            .read()
            .await
            .performance
            .get(&user_id)
            .copied()
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl ExplorationProfileSource for InMemoryCatalog {
    async fn get_user_exploration_profile(
        &self,
        user_id: Uuid,
    ) -> AppResult<Option<ExplorationProfile>> {
        Ok(self.state.read().await.profiles.get(&user_id).copied())
    }
}

#[async_trait::async_trait]
impl ContentBasedRecommender for InMemoryCatalog {
    async fn generate_content_based_recommendations(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<ContentCandidate>> {
        let state = self.state.read().await;
        let mut candidates = state.content.get(&user_id).cloned().unwrap_or_default();
        candidates.truncate(limit);
        Ok(candidates)
    }
}

#[async_trait::async_trait]
impl TrackMetadataSource for InMemoryCatalog {
    async fn get_track_metadata(
        &self,
        track_ids: &[Uuid],
    ) -> AppResult<HashMap<Uuid, TrackMetadata>> {
        let state = self.state.read().await;
        Ok(track_ids
            .iter()
            .filter_map(|id| state.metadata.get(id).map(|m| (*id, m.clone())))
            .collect())
    }

    async fn find_interested_users(&self, track_id: Uuid, limit: usize) -> AppResult<Vec<Uuid>> {
        let neighbours: HashSet<Uuid> = {
            let state = self.state.read().await;
            let Some(target) = state.metadata.get(&track_id) else {
                return Ok(Vec::new());
            };

            state
                .metadata
                .iter()
                .filter(|(id, meta)| {
                    **id != track_id
                        && ((target.genre.is_some() && meta.genre == target.genre)
                            || (target.artist.is_some() && meta.artist == target.artist))
                })
                .map(|(id, _)| *id)
                .collect()
        };

        let mut users: Vec<Uuid> = Vec::new();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut events = self.interactions.all_interactions();
        while let Some(event) = events.try_next().await? {
            if users.len() >= limit {
                break;
            }
            if neighbours.contains(&event.track_id) && seen.insert(event.user_id) {
                users.push(event.user_id);
            }
        }

        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InteractionEvent;
    use crate::store::InMemoryInteractionStore;

    #[tokio::test]
    async fn test_trending_excludes_own_tracks_and_normalizes() {
        let store = Arc::new(InMemoryInteractionStore::new());
        let catalog = InMemoryCatalog::new(store.clone());
        let me = Uuid::new_v4();
        let (hot, warm, mine) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let events = [
            (Uuid::new_v4(), hot, InteractionType::Play),
            (Uuid::new_v4(), hot, InteractionType::Like),
            (Uuid::new_v4(), warm, InteractionType::Play),
            (Uuid::new_v4(), warm, InteractionType::Skip),
            (Uuid::new_v4(), mine, InteractionType::Play),
            (me, mine, InteractionType::Play),
        ];
        for (user, track, kind) in events {
            store
                .record_interaction(&InteractionEvent::new(user, track, kind))
                .await
                .unwrap();
        }

        let trending = catalog.get_trending_candidates(me, 10).await.unwrap();
        let ids: Vec<Uuid> = trending.iter().map(|t| t.track_id).collect();
        assert_eq!(ids, vec![hot, warm]);
        assert_eq!(trending[0].score, 1.0);
        assert_eq!(trending[1].score, 0.5);
    }

    #[tokio::test]
    async fn test_find_interested_users_by_genre_or_artist() {
        let store = Arc::new(InMemoryInteractionStore::new());
        let catalog = InMemoryCatalog::new(store.clone());
        let (target, same_genre, same_artist, other) =
            (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        catalog.register_track(target, "jazz", "Ella").await;
        catalog.register_track(same_genre, "jazz", "Miles").await;
        catalog.register_track(same_artist, "swing", "Ella").await;
        catalog.register_track(other, "metal", "Iron").await;

        let (u1, u2, u3, u4) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for (user, track) in [(u1, same_genre), (u2, same_artist), (u3, other), (u4, target)] {
            store
                .record_interaction(&InteractionEvent::new(user, track, InteractionType::Play))
                .await
                .unwrap();
        }

        let users = catalog.find_interested_users(target, 100).await.unwrap();
        assert_eq!(users, vec![u1, u2]);
    }

    #[tokio::test]
    async fn test_unregistered_signals_fall_back() {
        let store = Arc::new(InMemoryInteractionStore::new());
        let catalog = InMemoryCatalog::new(store);
        let user = Uuid::new_v4();

        assert_eq!(
            catalog.get_algorithm_performance(user).await.unwrap(),
            AlgorithmPerformance::default()
        );
        assert_eq!(
            catalog.get_user_exploration_profile(user).await.unwrap(),
            None
        );
        assert!(catalog
            .get_track_metadata(&[Uuid::new_v4()])
            .await
            .unwrap()
            .is_empty());
    }
}
