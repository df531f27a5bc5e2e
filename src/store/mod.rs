/// Durable stores of the recommendation core
///
/// The interaction log is the source of truth every computation derives from;
/// the recommendation store holds the rows the serving layer reads. Both come
/// in an in-memory flavour (tests, local runs) and a PostgreSQL flavour.
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use std::collections::HashSet;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{InteractionEvent, Recommendation},
};

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryInteractionStore, InMemoryRecommendationStore};
pub use postgres::{PgInteractionStore, PgRecommendationStore};

/// Append-only log of user↔track interactions
#[async_trait::async_trait]
pub trait InteractionStore: Send + Sync {
    /// Appends one event. Events are never merged or updated.
    async fn record_interaction(&self, event: &InteractionEvent) -> AppResult<()>;

    /// Lazily streams a user's events, most recent first.
    ///
    /// Each call starts a fresh pass over the log.
    fn user_interactions(&self, user_id: Uuid) -> BoxStream<'_, AppResult<InteractionEvent>>;

    /// Streams the full log for batch matrix building
    fn all_interactions(&self) -> BoxStream<'_, AppResult<InteractionEvent>>;

    /// Tracks the user has interacted with in any way
    async fn interacted_tracks(&self, user_id: Uuid) -> AppResult<HashSet<Uuid>> {
        self.user_interactions(user_id)
            .map_ok(|event| event.track_id)
            .try_collect()
            .await
    }

    async fn has_interactions(&self, user_id: Uuid) -> AppResult<bool> {
        let first = self.user_interactions(user_id).try_next().await?;
        Ok(first.is_some())
    }
}

/// Store of persisted recommendation rows
#[async_trait::async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Deactivates the user's active hybrid rows and inserts `recommendations`
    /// in their place, atomically.
    async fn replace_user_recommendations(
        &self,
        user_id: Uuid,
        recommendations: &[Recommendation],
    ) -> AppResult<usize>;

    /// Inserts the row unless an active row with the same
    /// (user, track, type) exists. Returns whether a row was written.
    async fn insert_if_absent(&self, recommendation: &Recommendation) -> AppResult<bool>;

    /// Deactivates every active row of the user
    async fn deactivate_user_recommendations(&self, user_id: Uuid) -> AppResult<u64>;

    /// Deactivates the user's active rows created before `cutoff`
    async fn deactivate_stale(&self, user_id: Uuid, cutoff: DateTime<Utc>) -> AppResult<u64>;

    /// Active rows created at or after `fresh_since`, highest score first
    async fn active_recommendations(
        &self,
        user_id: Uuid,
        fresh_since: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<Recommendation>>;

    /// Creation time of the user's newest active hybrid row
    async fn latest_active_at(&self, user_id: Uuid) -> AppResult<Option<DateTime<Utc>>>;
}

/// Collects a user's events into memory, most recent first
pub async fn collect_user_interactions(
    store: &dyn InteractionStore,
    user_id: Uuid,
) -> AppResult<Vec<InteractionEvent>> {
    store.user_interactions(user_id).try_collect().await
}
