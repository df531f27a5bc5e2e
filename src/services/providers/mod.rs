/// External collaborators of the recommendation core
///
/// Each signal the fusion engine and the realtime pipeline consume from
/// outside this core sits behind a trait, so adapters (HTTP, Postgres,
/// in-memory) can be swapped without touching the ranking logic.
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        AlgorithmPerformance, ContentCandidate, DomainEvent, ExplorationProfile, TrackMetadata,
        TrendingCandidate,
    },
};

pub mod catalog;
pub mod content_api;
pub mod events;
pub mod memory;

pub use catalog::PgCatalog;
pub use content_api::{DisabledContentRecommender, HttpContentRecommender};
pub use events::{LogEventPublisher, RedisEventPublisher};
pub use memory::InMemoryCatalog;

/// Content-similarity candidates (algorithm internals live elsewhere)
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ContentBasedRecommender: Send + Sync {
    async fn generate_content_based_recommendations(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<ContentCandidate>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TrendingSource: Send + Sync {
    async fn get_trending_candidates(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<TrendingCandidate>>;
}

/// Historical engagement per algorithm, used to shift fusion weights
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AlgorithmPerformanceSource: Send + Sync {
    async fn get_algorithm_performance(&self, user_id: Uuid) -> AppResult<AlgorithmPerformance>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ExplorationProfileSource: Send + Sync {
    /// `None` when the user has no profile yet
    async fn get_user_exploration_profile(
        &self,
        user_id: Uuid,
    ) -> AppResult<Option<ExplorationProfile>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TrackMetadataSource: Send + Sync {
    /// Metadata for the given tracks; unknown tracks are absent from the map
    async fn get_track_metadata(
        &self,
        track_ids: &[Uuid],
    ) -> AppResult<HashMap<Uuid, TrackMetadata>>;

    /// Users who interacted with tracks sharing the track's genre or artist,
    /// not counting interactions with the track itself
    async fn find_interested_users(&self, track_id: Uuid, limit: usize) -> AppResult<Vec<Uuid>>;
}

/// Publishes domain events to other subscribers
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> AppResult<()>;
}
