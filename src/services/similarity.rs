use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::{config::RecommenderSettings, error::AppResult, store::InteractionStore};

/// Sparse vector keyed by user or track id.
///
/// Ordered keys make the floating-point summation order identical for
/// `cosine_similarity(a, b)` and `cosine_similarity(b, a)`.
pub type SparseVector = BTreeMap<Uuid, f64>;

/// user → (track → accumulated interaction weight); also used transposed
pub type UserItemMatrix = HashMap<Uuid, SparseVector>;

/// track → (track → similarity), symmetric, pruned at the threshold
pub type ItemSimilarityMatrix = HashMap<Uuid, HashMap<Uuid, f64>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarUser {
    pub user_id: Uuid,
    pub similarity: f64,
}

/// Cosine similarity of two sparse vectors.
///
/// Returns 0 when the key intersection is empty or either norm is 0.
pub fn cosine_similarity(a: &SparseVector, b: &SparseVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };

    let mut dot = 0.0;
    let mut shared = 0usize;
    for (key, x) in small {
        if let Some(y) = large.get(key) {
            dot += x * y;
            shared += 1;
        }
    }

    if shared == 0 {
        return 0.0;
    }

    let norm_a = norm(a);
    let norm_b = norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let similarity = dot / (norm_a * norm_b);
    if similarity.is_finite() {
        similarity.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

fn norm(v: &SparseVector) -> f64 {
    v.values().map(|w| w * w).sum::<f64>().sqrt()
}

/// Top-K users most similar to `target_user`, similarity > 0, descending
pub fn find_similar_users(
    target_user: Uuid,
    matrix: &UserItemMatrix,
    top_k: usize,
) -> Vec<SimilarUser> {
    let Some(target) = matrix.get(&target_user) else {
        return Vec::new();
    };

    let mut similar: Vec<SimilarUser> = matrix
        .iter()
        .filter(|(user_id, _)| **user_id != target_user)
        .map(|(user_id, vector)| SimilarUser {
            user_id: *user_id,
            similarity: cosine_similarity(target, vector),
        })
        .filter(|s| s.similarity > 0.0)
        .collect();

    similar.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    similar.truncate(top_k);

    similar
}

/// Pairwise item-item cosine similarity, keeping entries above `threshold`.
///
/// Only pairs sharing at least one user are scored; all others have an empty
/// key intersection and therefore similarity 0.
pub fn item_item_similarity(
    item_vectors: &UserItemMatrix,
    user_vectors: &UserItemMatrix,
    threshold: f64,
) -> ItemSimilarityMatrix {
    let mut matrix: ItemSimilarityMatrix = HashMap::new();

    for (item, users) in item_vectors {
        let co_occurring: BTreeSet<Uuid> = users
            .keys()
            .filter_map(|user| user_vectors.get(user))
            .flat_map(|tracks| tracks.keys().copied())
            .filter(|other| other > item)
            .collect();

        for other in co_occurring {
            let Some(other_users) = item_vectors.get(&other) else {
                continue;
            };

            let similarity = cosine_similarity(users, other_users);
            if similarity > threshold {
                matrix.entry(*item).or_default().insert(other, similarity);
                matrix.entry(other).or_default().insert(*item, similarity);
            }
        }
    }

    matrix
}

/// Builds interaction matrices and similarity structures from the log
pub struct SimilarityEngine {
    interactions: Arc<dyn InteractionStore>,
    settings: RecommenderSettings,
}

impl SimilarityEngine {
    pub fn new(interactions: Arc<dyn InteractionStore>, settings: RecommenderSettings) -> Self {
        Self {
            interactions,
            settings,
        }
    }

    /// Streams the full log into user → track weights
    pub async fn build_user_item_matrix(&self) -> AppResult<UserItemMatrix> {
        let (by_user, _) = self.build_matrices().await?;
        Ok(by_user)
    }

    /// Top-K similar users computed from a fresh user-item matrix
    pub async fn similar_users_for(&self, user_id: Uuid) -> AppResult<Vec<SimilarUser>> {
        let matrix = self.build_user_item_matrix().await?;
        Ok(find_similar_users(
            user_id,
            &matrix,
            self.settings.user_similarity_top_k,
        ))
    }

    /// Full item-item pass. Batch only: cost grows with items².
    #[tracing::instrument(skip(self))]
    pub async fn build_item_item_similarity_matrix(&self) -> AppResult<ItemSimilarityMatrix> {
        let start = Instant::now();
        let (by_user, by_item) = self.build_matrices().await?;
        let threshold = self.settings.item_similarity_threshold;
        let item_count = by_item.len();

        let matrix = tokio::task::spawn_blocking(move || {
            item_item_similarity(&by_item, &by_user, threshold)
        })
        .await?;

        tracing::info!(
            items = item_count,
            items_with_neighbors = matrix.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Item-item similarity matrix built"
        );

        Ok(matrix)
    }

    /// One pass over the log producing both orientations
    async fn build_matrices(&self) -> AppResult<(UserItemMatrix, UserItemMatrix)> {
        let mut by_user: UserItemMatrix = HashMap::new();
        let mut by_item: UserItemMatrix = HashMap::new();

        let mut events = self.interactions.all_interactions();
        while let Some(event) = events.try_next().await? {
            let weight = event.weight();
            *by_user
                .entry(event.user_id)
                .or_default()
                .entry(event.track_id)
                .or_insert(0.0) += weight;
            *by_item
                .entry(event.track_id)
                .or_default()
                .entry(event.user_id)
                .or_insert(0.0) += weight;
        }

        Ok((by_user, by_item))
    }
}
