use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};
use uuid::Uuid;

use crate::error::AppError;

/// Candidate sources merged by the fusion engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Collaborative,
    ContentBased,
    Trending,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Collaborative => "collaborative",
            Algorithm::ContentBased => "content_based",
            Algorithm::Trending => "trending",
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collaborative" => Ok(Algorithm::Collaborative),
            "content_based" => Ok(Algorithm::ContentBased),
            "trending" => Ok(Algorithm::Trending),
            other => Err(AppError::InvalidInput(format!("Unknown algorithm: {}", other))),
        }
    }
}

/// Why a single source proposed a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Explanation {
    /// Users with similar taste interacted with the track
    UserBased { similar_users: Vec<Uuid> },
    /// The track is close to tracks the user already interacted with
    ItemBased { source_tracks: Vec<Uuid> },
    ContentBased { based_on_tracks: Vec<Uuid> },
    Trending { trending_score: f64 },
}

/// A scored candidate produced by one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub track_id: Uuid,
    pub score: f64,
    pub confidence: f64,
    pub explanation: Explanation,
}

/// Exploration/exploitation tag attached after balancing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Exploitation,
    Exploration,
}

/// Explanation of a fused recommendation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HybridExplanation {
    /// One entry per contributing source, in merge order
    pub hybrid_components: Vec<Explanation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation_type: Option<Strategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Output of the fusion pipeline for one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedRecommendation {
    pub track_id: Uuid,
    pub score: f64,
    pub confidence: f64,
    pub sources: Vec<Algorithm>,
    pub explanation: HybridExplanation,
}

impl FusedRecommendation {
    pub fn has_source(&self, algorithm: Algorithm) -> bool {
        self.sources.contains(&algorithm)
    }
}

/// Persisted recommendation kind, part of the natural key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    Hybrid,
    Trending,
}

impl RecommendationType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecommendationType::Hybrid => "hybrid",
            RecommendationType::Trending => "trending",
        }
    }
}

impl FromStr for RecommendationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hybrid" => Ok(RecommendationType::Hybrid),
            "trending" => Ok(RecommendationType::Trending),
            other => Err(AppError::InvalidInput(format!(
                "Unknown recommendation type: {}",
                other
            ))),
        }
    }
}

/// Score and confidence of rows written by the trending path
pub const TRENDING_ROW_SCORE: f64 = 0.8;
pub const TRENDING_ROW_CONFIDENCE: f64 = 0.9;

/// Persisted recommendation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub track_id: Uuid,
    pub recommendation_type: RecommendationType,
    pub score: f64,
    pub confidence: f64,
    pub explanation: HybridExplanation,
    pub sources: Vec<Algorithm>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Recommendation {
    /// Builds an active hybrid row from a fused recommendation
    pub fn from_fused(user_id: Uuid, fused: FusedRecommendation) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            track_id: fused.track_id,
            recommendation_type: RecommendationType::Hybrid,
            score: fused.score,
            confidence: fused.confidence,
            explanation: fused.explanation,
            sources: fused.sources,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Builds an active trending row for a newly trending track
    pub fn trending(user_id: Uuid, track_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            track_id,
            recommendation_type: RecommendationType::Trending,
            score: TRENDING_ROW_SCORE,
            confidence: TRENDING_ROW_CONFIDENCE,
            explanation: HybridExplanation {
                hybrid_components: vec![Explanation::Trending {
                    trending_score: TRENDING_ROW_SCORE,
                }],
                recommendation_type: Some(Strategy::Exploration),
                reason: Some("Trending with listeners who share your taste".to_string()),
            },
            sources: vec![Algorithm::Trending],
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Natural key: unique among active rows
    pub fn key(&self) -> (Uuid, Uuid, RecommendationType) {
        (self.user_id, self.track_id, self.recommendation_type)
    }
}

/// Recommendation as handed to the serving layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServedRecommendation {
    pub track_id: Uuid,
    pub score: f64,
    pub confidence: f64,
    pub explanation: HybridExplanation,
    pub sources: Vec<Algorithm>,
}

impl From<Recommendation> for ServedRecommendation {
    fn from(rec: Recommendation) -> Self {
        Self {
            track_id: rec.track_id,
            score: rec.score,
            confidence: rec.confidence,
            explanation: rec.explanation,
            sources: rec.sources,
        }
    }
}

impl From<FusedRecommendation> for ServedRecommendation {
    fn from(fused: FusedRecommendation) -> Self {
        Self {
            track_id: fused.track_id,
            score: fused.score,
            confidence: fused.confidence,
            explanation: fused.explanation,
            sources: fused.sources,
        }
    }
}
