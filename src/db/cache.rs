use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::AppResult,
    services::similarity::{ItemSimilarityMatrix, SimilarUser},
};

/// Cache of derived similarity structures.
///
/// Entries are eventually consistent with the interaction log: they are
/// refreshed by background jobs and expire after their TTL.
#[async_trait::async_trait]
pub trait SimilarityCache: Send + Sync {
    async fn similar_users(&self, user_id: Uuid) -> AppResult<Option<Vec<SimilarUser>>>;

    async fn store_similar_users(&self, user_id: Uuid, users: &[SimilarUser]) -> AppResult<()>;

    /// Neighbours of one track from the last batch-built item-item matrix
    async fn item_neighbors(&self, track_id: Uuid) -> AppResult<Option<HashMap<Uuid, f64>>>;

    async fn store_item_similarity(&self, matrix: &ItemSimilarityMatrix) -> AppResult<()>;
}

struct Expiring<T> {
    value: T,
    stored_at: Instant,
}

/// Process-local similarity cache with TTL expiry
pub struct InMemorySimilarityCache {
    similar_users: RwLock<HashMap<Uuid, Expiring<Vec<SimilarUser>>>>,
    item_similarity: RwLock<Option<Expiring<ItemSimilarityMatrix>>>,
    similar_users_ttl: Duration,
    item_similarity_ttl: Duration,
}

impl InMemorySimilarityCache {
    pub fn new(similar_users_ttl: Duration, item_similarity_ttl: Duration) -> Self {
        Self {
            similar_users: RwLock::new(HashMap::new()),
            item_similarity: RwLock::new(None),
            similar_users_ttl,
            item_similarity_ttl,
        }
    }
}

#[async_trait::async_trait]
impl SimilarityCache for InMemorySimilarityCache {
    async fn similar_users(&self, user_id: Uuid) -> AppResult<Option<Vec<SimilarUser>>> {
        let entries = self.similar_users.read().await;
        Ok(entries
            .get(&user_id)
            .filter(|e| e.stored_at.elapsed() < self.similar_users_ttl)
            .map(|e| e.value.clone()))
    }

    async fn store_similar_users(&self, user_id: Uuid, users: &[SimilarUser]) -> AppResult<()> {
        self.similar_users.write().await.insert(
            user_id,
            Expiring {
                value: users.to_vec(),
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn item_neighbors(&self, track_id: Uuid) -> AppResult<Option<HashMap<Uuid, f64>>> {
        let matrix = self.item_similarity.read().await;
        Ok(matrix
            .as_ref()
            .filter(|e| e.stored_at.elapsed() < self.item_similarity_ttl)
            .and_then(|e| e.value.get(&track_id).cloned()))
    }

    async fn store_item_similarity(&self, matrix: &ItemSimilarityMatrix) -> AppResult<()> {
        *self.item_similarity.write().await = Some(Expiring {
            value: matrix.clone(),
            stored_at: Instant::now(),
        });
        Ok(())
    }
}
