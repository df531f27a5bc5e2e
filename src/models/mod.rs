use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod interaction;
pub mod recommendation;
pub mod weights;

pub use interaction::{InteractionEvent, InteractionType};
pub use recommendation::{
    Algorithm, Candidate, Explanation, FusedRecommendation, HybridExplanation, Recommendation,
    RecommendationType, ServedRecommendation, Strategy,
};
pub use weights::{AlgorithmPerformance, AlgorithmWeights, WeightOverrides};

// ============================================================================
// Collaborator payloads
// ============================================================================

/// Catalog attributes used by the diversity filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub genre: Option<String>,
    pub artist: Option<String>,
}

/// Per-user appetite for novel recommendations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExplorationProfile {
    /// In [0, 1]
    pub exploration_tendency: f64,
}

/// Candidate returned by the content-based recommender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentCandidate {
    pub track_id: Uuid,
    pub score: f64,
    #[serde(default)]
    pub based_on_tracks: Vec<Uuid>,
}

/// Candidate returned by the trending source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingCandidate {
    pub track_id: Uuid,
    pub score: f64,
}

// ============================================================================
// Domain events
// ============================================================================

/// Events emitted for other subscribers of the recommendation core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    InteractionProcessed {
        user_id: Uuid,
        track_id: Uuid,
        interaction_type: InteractionType,
        high_impact: bool,
        occurred_at: DateTime<Utc>,
    },
    RecommendationsRefreshed {
        user_id: Uuid,
        count: usize,
    },
    TrendingPropagated {
        track_id: Uuid,
        users: usize,
    },
}
