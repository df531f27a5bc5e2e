/// Inbound message consumers for the worker binary
///
/// Interaction events and trending notifications arrive either on Redis
/// pub/sub channels or as JSON lines (one message per line).
use futures::StreamExt;
use redis::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::InteractionEvent,
    services::RealtimeUpdatePipeline,
};

pub const INTERACTIONS_CHANNEL: &str = "track-recs.interactions";
pub const TRENDING_CHANNEL: &str = "track-recs.trending";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestMessage {
    Interaction(InteractionEvent),
    Trending { track_id: Uuid },
}

#[derive(Debug, Deserialize)]
struct TrendingNotice {
    track_id: Uuid,
}

/// Decodes a payload received on `channel`
pub fn decode_channel_message(channel: &str, payload: &str) -> AppResult<IngestMessage> {
    match channel {
        INTERACTIONS_CHANNEL => Ok(IngestMessage::Interaction(serde_json::from_str(payload)?)),
        TRENDING_CHANNEL => {
            let notice: TrendingNotice = serde_json::from_str(payload)?;
            Ok(IngestMessage::Trending {
                track_id: notice.track_id,
            })
        }
        other => Err(AppError::InvalidInput(format!(
            "Unexpected channel: {}",
            other
        ))),
    }
}

/// Hands one message to the pipeline. Failures are logged, never returned.
pub async fn dispatch(pipeline: &RealtimeUpdatePipeline, message: IngestMessage) {
    match message {
        IngestMessage::Interaction(event) => {
            let user_id = event.user_id;
            match pipeline.process_user_interaction(event).await {
                Ok(outcome) => tracing::debug!(user_id = %user_id, outcome = ?outcome, "Interaction handled"),
                Err(e) => tracing::error!(user_id = %user_id, error = %e, "Interaction not processed"),
            }
        }
        IngestMessage::Trending { track_id } => {
            if let Err(e) = pipeline.handle_trending_update(track_id).await {
                tracing::error!(track_id = %track_id, error = %e, "Trending update failed");
            }
        }
    }
}

/// Consumes the interaction and trending channels until the connection ends
pub async fn consume_redis(client: Client, pipeline: Arc<RealtimeUpdatePipeline>) -> AppResult<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(INTERACTIONS_CHANNEL).await?;
    pubsub.subscribe(TRENDING_CHANNEL).await?;
    tracing::info!(
        channels = ?[INTERACTIONS_CHANNEL, TRENDING_CHANNEL],
        "Subscribed to ingest channels"
    );

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let channel = msg.get_channel_name().to_string();
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "Unreadable payload skipped");
                continue;
            }
        };

        match decode_channel_message(&channel, &payload) {
            Ok(message) => dispatch(&pipeline, message).await,
            Err(e) => tracing::warn!(channel = %channel, error = %e, "Malformed message skipped"),
        }
    }

    tracing::warn!("Ingest subscription closed");
    Ok(())
}

/// Consumes JSON lines until EOF, returning how many messages were dispatched
pub async fn consume_lines<R>(reader: R, pipeline: Arc<RealtimeUpdatePipeline>) -> AppResult<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut dispatched = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to read input: {}", e)))?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<IngestMessage>(line) {
            Ok(message) => {
                dispatch(&pipeline, message).await;
                dispatched += 1;
            }
            Err(e) => tracing::warn!(error = %e, "Malformed input line skipped"),
        }
    }

    Ok(dispatched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Collaborators, Core};
    use crate::config::RecommenderSettings;
    use crate::models::InteractionType;
    use crate::store::InteractionStore;
    use futures::TryStreamExt;

    #[test]
    fn test_decode_channel_messages() {
        let (user, track) = (Uuid::new_v4(), Uuid::new_v4());

        let interaction = decode_channel_message(
            INTERACTIONS_CHANNEL,
            &format!(
                r#"{{"user_id":"{}","track_id":"{}","interaction_type":"share"}}"#,
                user, track
            ),
        )
        .unwrap();
        match interaction {
            IngestMessage::Interaction(event) => {
                assert_eq!(event.user_id, user);
                assert_eq!(event.interaction_type, InteractionType::Share);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let trending =
            decode_channel_message(TRENDING_CHANNEL, &format!(r#"{{"track_id":"{}"}}"#, track))
                .unwrap();
        assert_eq!(trending, IngestMessage::Trending { track_id: track });

        assert!(decode_channel_message("elsewhere", "{}").is_err());
        assert!(decode_channel_message(TRENDING_CHANNEL, "not json").is_err());
    }

    #[tokio::test]
    async fn test_consume_lines_skips_garbage() {
        let settings = RecommenderSettings::default();
        let (collaborators, _catalog) = Collaborators::in_memory(&settings);
        let (core, worker) = Core::assemble(collaborators, settings);
        let handle = worker.start(core.pipeline.clone());

        let (user, track) = (Uuid::new_v4(), Uuid::new_v4());
        let input = format!(
            "{}\n\nnot json\n{}\n",
            serde_json::json!({
                "kind": "interaction",
                "user_id": user,
                "track_id": track,
                "interaction_type": "like",
            }),
            serde_json::json!({ "kind": "trending", "track_id": Uuid::new_v4() }),
        );

        let dispatched = consume_lines(
            tokio::io::BufReader::new(input.as_bytes()),
            core.pipeline.clone(),
        )
        .await
        .unwrap();
        assert_eq!(dispatched, 2);

        let stored: Vec<InteractionEvent> = core
            .interactions
            .user_interactions(user)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].track_id, track);

        handle.shutdown().await;
    }
}
