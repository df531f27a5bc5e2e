use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};
use uuid::Uuid;

/// Kind of user↔track interaction reported by the playback layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    Play,
    Skip,
    Like,
    Dislike,
    AddToPlaylist,
    Download,
    Share,
    #[serde(other)]
    Unknown,
}

impl InteractionType {
    /// Implicit rating contributed by one event of this type
    pub fn weight(self) -> f64 {
        match self {
            InteractionType::Like => 5.0,
            InteractionType::AddToPlaylist => 4.0,
            InteractionType::Download => 4.0,
            InteractionType::Share => 3.0,
            InteractionType::Play => 2.0,
            InteractionType::Skip => -1.0,
            InteractionType::Dislike => -3.0,
            InteractionType::Unknown => 1.0,
        }
    }

    /// Events strong enough to refresh recommendations synchronously
    pub fn is_high_impact(self) -> bool {
        matches!(
            self,
            InteractionType::Like
                | InteractionType::Dislike
                | InteractionType::AddToPlaylist
                | InteractionType::Download
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InteractionType::Play => "play",
            InteractionType::Skip => "skip",
            InteractionType::Like => "like",
            InteractionType::Dislike => "dislike",
            InteractionType::AddToPlaylist => "add_to_playlist",
            InteractionType::Download => "download",
            InteractionType::Share => "share",
            InteractionType::Unknown => "unknown",
        }
    }
}

impl Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InteractionType {
    type Err = std::convert::Infallible;

    /// Unrecognised types are kept as `Unknown` so stored history is never dropped
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "play" => InteractionType::Play,
            "skip" => InteractionType::Skip,
            "like" => InteractionType::Like,
            "dislike" => InteractionType::Dislike,
            "add_to_playlist" => InteractionType::AddToPlaylist,
            "download" => InteractionType::Download,
            "share" => InteractionType::Share,
            _ => InteractionType::Unknown,
        })
    }
}

/// Immutable, append-only interaction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub user_id: Uuid,
    pub track_id: Uuid,
    pub interaction_type: InteractionType,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

impl InteractionEvent {
    /// Creates an event stamped with the current time
    pub fn new(user_id: Uuid, track_id: Uuid, interaction_type: InteractionType) -> Self {
        Self {
            user_id,
            track_id,
            interaction_type,
            timestamp: Utc::now(),
            context: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn weight(&self) -> f64 {
        self.interaction_type.weight()
    }
}
