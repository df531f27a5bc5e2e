use redis::AsyncCommands;
use redis::Client;
use std::collections::HashMap;
use std::fmt::Display;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::db::cache::SimilarityCache;
use crate::error::AppError;
use crate::error::AppResult;
use crate::services::similarity::{ItemSimilarityMatrix, SimilarUser};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    SimilarUsers(Uuid),
    ItemNeighbors(Uuid),
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::SimilarUsers(user_id) => write!(f, "simusers:{}", user_id),
            CacheKey::ItemNeighbors(track_id) => write!(f, "itemsim:{}", track_id),
        }
    }
}

/// Creates a Redis client for caching
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Message for asynchronous cache writes
struct CacheWriteMessage {
    key: String,
    value: String,
    ttl: u64,
}

/// Cache handler for storing and retrieving data from Redis
#[derive(Clone)]
pub struct Cache {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheWriterHandle {
    /// Signals the writer task to flush pending writes and stop
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
    }
}

impl Cache {
    /// Creates a new Cache instance with an async write background task
    ///
    /// Writes go through a channel to a spawned task so that a large
    /// similarity refresh never blocks on Redis round-trips.
    pub async fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        tokio::spawn(async move {
            Self::cache_writer_task(client, write_rx, shutdown_rx).await;
        });

        let cache = Self {
            redis_client,
            write_tx,
        };

        let handle = CacheWriterHandle { shutdown_tx };

        (cache, handle)
    }

    /// Background task that processes cache write messages
    ///
    /// On shutdown signal, flushes all remaining messages before exiting.
    async fn cache_writer_task(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");
        let mut pending_writes = 0;

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    pending_writes += 1;
                    if let Err(e) = Self::write_to_redis(&client, msg).await {
                        tracing::error!(error = %e, "Failed to write to Redis cache");
                    } else {
                        pending_writes -= 1;
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!(pending = pending_writes, "Cache writer shutting down, flushing remaining writes");

                    write_rx.close();
                    while let Some(msg) = write_rx.recv().await {
                        if let Err(e) = Self::write_to_redis(&client, msg).await {
                            tracing::error!(error = %e, "Failed to flush cache write during shutdown");
                        }
                    }

                    tracing::info!("Cache writer task stopped");
                    break;
                }
            }
        }
    }

    async fn write_to_redis(client: &Client, msg: CacheWriteMessage) -> AppResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(msg.key, msg.value, msg.ttl).await?;
        Ok(())
    }

    /// Retrieves and deserializes a value; `None` on a miss
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<T>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(format!("{}", key)).await?;

        match cached {
            Some(json) => {
                let data = serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("Cache deserialization error: {}", e))
                })?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    /// Queues a write for the background task and returns immediately
    pub fn set_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Cache serialization error");
                return;
            }
        };

        let msg = CacheWriteMessage {
            key: format!("{}", key),
            value: json,
            ttl,
        };

        if let Err(e) = self.write_tx.send(msg) {
            tracing::error!(error = %e, "Failed to send cache write message");
        }
    }
}

/// Similarity cache stored in Redis, one key per user / per track
#[derive(Clone)]
pub struct RedisSimilarityCache {
    cache: Cache,
    similar_users_ttl: u64,
    item_similarity_ttl: u64,
}

impl RedisSimilarityCache {
    pub fn new(cache: Cache, similar_users_ttl: u64, item_similarity_ttl: u64) -> Self {
        Self {
            cache,
            similar_users_ttl,
            item_similarity_ttl,
        }
    }
}

#[async_trait::async_trait]
impl SimilarityCache for RedisSimilarityCache {
    async fn similar_users(&self, user_id: Uuid) -> AppResult<Option<Vec<SimilarUser>>> {
        self.cache
            .get_from_cache(&CacheKey::SimilarUsers(user_id))
            .await
    }

    async fn store_similar_users(&self, user_id: Uuid, users: &[SimilarUser]) -> AppResult<()> {
        self.cache.set_in_background(
            &CacheKey::SimilarUsers(user_id),
            &users,
            self.similar_users_ttl,
        );
        Ok(())
    }

    async fn item_neighbors(&self, track_id: Uuid) -> AppResult<Option<HashMap<Uuid, f64>>> {
        self.cache
            .get_from_cache(&CacheKey::ItemNeighbors(track_id))
            .await
    }

    async fn store_item_similarity(&self, matrix: &ItemSimilarityMatrix) -> AppResult<()> {
        for (track_id, neighbours) in matrix {
            self.cache.set_in_background(
                &CacheKey::ItemNeighbors(*track_id),
                neighbours,
                self.item_similarity_ttl,
            );
        }

        tracing::debug!(tracks = matrix.len(), "Queued item similarity cache writes");
        Ok(())
    }
}
