use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use track_recs::{
    app::{Collaborators, Core},
    config::{Config, RecommenderSettings, StorageBackend},
    db::{create_pool, create_redis_client, Cache, RedisSimilarityCache},
    error::AppResult,
    ingest,
    services::{
        fusion::FusionSources,
        providers::{
            ContentBasedRecommender, DisabledContentRecommender, HttpContentRecommender,
            PgCatalog, RedisEventPublisher,
        },
        BackgroundJob, RealtimeUpdatePipeline, RetryPolicy, TaskScheduler, TokioScheduler,
    },
    store::{PgInteractionStore, PgRecommendationStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let settings = config.recommender_settings();
    let refresh_every = Duration::from_secs(config.item_similarity_refresh_secs.max(1));

    tracing::info!(backend = ?config.storage_backend, "Starting track-recs worker");

    match config.storage_backend {
        StorageBackend::Memory => {
            let (collaborators, _catalog) = Collaborators::in_memory(&settings);
            run(collaborators, settings, refresh_every, |pipeline| async move {
                let stdin = tokio::io::BufReader::new(tokio::io::stdin());
                let dispatched = ingest::consume_lines(stdin, pipeline).await?;
                tracing::info!(dispatched, "Input exhausted");
                Ok(())
            })
            .await
        }
        StorageBackend::Postgres => {
            let pool = create_pool(&config.database_url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            let redis_client = create_redis_client(&config.redis_url)?;
            let (cache, cache_writer) = Cache::new(redis_client.clone()).await;

            let catalog = Arc::new(PgCatalog::new(pool.clone()));
            let content: Arc<dyn ContentBasedRecommender> = match &config.content_service_url {
                Some(url) => Arc::new(HttpContentRecommender::new(url.clone())),
                None => {
                    tracing::warn!("CONTENT_SERVICE_URL not set, content-based source disabled");
                    Arc::new(DisabledContentRecommender)
                }
            };

            let collaborators = Collaborators {
                interactions: Arc::new(PgInteractionStore::new(pool.clone())),
                recommendations: Arc::new(PgRecommendationStore::new(pool)),
                similarity_cache: Arc::new(RedisSimilarityCache::new(
                    cache,
                    settings.similar_users_ttl.as_secs(),
                    settings.item_similarity_ttl.as_secs(),
                )),
                sources: FusionSources {
                    content,
                    trending: catalog.clone(),
                    performance: catalog.clone(),
                    exploration: catalog.clone(),
                    metadata: catalog,
                },
                events: Arc::new(
                    RedisEventPublisher::new(redis_client.clone())
                        .await
                        .context("Failed to connect event publisher to Redis")?,
                ),
            };

            let result = run(collaborators, settings, refresh_every, |pipeline| {
                ingest::consume_redis(redis_client, pipeline)
            })
            .await;

            cache_writer.shutdown().await;
            result
        }
    }
}

/// Wires the core, starts background work and ingests until shutdown
async fn run<F, Fut>(
    collaborators: Collaborators,
    settings: RecommenderSettings,
    refresh_every: Duration,
    consume: F,
) -> anyhow::Result<()>
where
    F: FnOnce(Arc<RealtimeUpdatePipeline>) -> Fut,
    Fut: Future<Output = AppResult<()>>,
{
    let (core, worker) = Core::assemble(collaborators, settings);
    let scheduler = worker.start(core.pipeline.clone());
    let refresher = tokio::spawn(schedule_item_similarity_refresh(
        core.scheduler.clone(),
        refresh_every,
    ));

    tokio::select! {
        result = consume(core.pipeline.clone()) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Ingestion stopped");
            }
            // Queued background work keeps running until shutdown
            tracing::info!("Waiting for shutdown signal");
            tokio::signal::ctrl_c().await?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
        }
    }

    tracing::info!("Shutting down");
    refresher.abort();
    scheduler.shutdown().await;
    Ok(())
}

/// Periodically queues the batch item-item similarity rebuild
async fn schedule_item_similarity_refresh(scheduler: TokioScheduler, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let job = BackgroundJob::RefreshItemSimilarity {
            trigger_track_id: None,
        };
        match scheduler
            .submit(job, Duration::ZERO, RetryPolicy::background())
            .await
        {
            Ok(outcome) => tracing::debug!(outcome = ?outcome, "Item similarity refresh queued"),
            Err(e) => tracing::warn!(error = %e, "Item similarity refresh not queued"),
        }
    }
}
