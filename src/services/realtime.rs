/// Realtime update pipeline
///
/// Every interaction walks RECEIVED → STORED → {IMMEDIATE_RECOMPUTE | QUEUED}
/// → COMPLETED. High-impact interactions rebuild the user's recommendations
/// before returning; everything else defers the expensive refreshes to the
/// background scheduler.
use chrono::Utc;
use futures::future::join_all;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::{
    config::RecommenderSettings,
    db::SimilarityCache,
    error::AppResult,
    models::{DomainEvent, InteractionEvent, Recommendation},
    services::{
        collaborative::CollaborativeRecommender,
        fusion::HybridFusionEngine,
        providers::{EventPublisher, TrackMetadataSource},
        scheduler::{with_retry, BackgroundJob, JobRunner, RetryPolicy, SubmitOutcome, TaskScheduler},
        similarity::SimilarityEngine,
    },
    store::{InteractionStore, RecommendationStore},
};

pub const PROFILE_UPDATE_DELAY: Duration = Duration::from_secs(10);
pub const SIMILAR_USERS_REFRESH_DELAY: Duration = Duration::from_secs(30);
pub const ITEM_SIMILARITY_REFRESH_DELAY: Duration = Duration::from_secs(60);
/// Window in which bursts of recompute requests collapse into one
pub const RECOMPUTE_COALESCE_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on users reached by one trending notification
const TRENDING_AUDIENCE_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineStage {
    Received,
    Stored,
    ImmediateRecompute,
    Queued,
    Completed,
}

impl Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match self {
            PipelineStage::Received => "RECEIVED",
            PipelineStage::Stored => "STORED",
            PipelineStage::ImmediateRecompute => "IMMEDIATE_RECOMPUTE",
            PipelineStage::Queued => "QUEUED",
            PipelineStage::Completed => "COMPLETED",
        };
        write!(f, "{}", stage)
    }
}

fn transition(event: &InteractionEvent, stage: PipelineStage) {
    tracing::debug!(
        user_id = %event.user_id,
        track_id = %event.track_id,
        interaction_type = %event.interaction_type,
        stage = %stage,
        "Interaction pipeline transition"
    );
}

/// How an interaction was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionOutcome {
    /// Recommendations were rebuilt before returning
    Recomputed { count: usize },
    /// Background refreshes were requested; `accepted` counts jobs the
    /// scheduler took (scheduled or coalesced)
    Queued { accepted: usize },
}

/// Result of a recommendation update request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Recomputed { count: usize },
    Queued(SubmitOutcome),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub queued: usize,
    pub failed: usize,
}

/// Components the pipeline drives
pub struct PipelineComponents {
    pub interactions: Arc<dyn InteractionStore>,
    pub recommendations: Arc<dyn RecommendationStore>,
    pub fusion: Arc<HybridFusionEngine>,
    pub collaborative: Arc<CollaborativeRecommender>,
    pub similarity: Arc<SimilarityEngine>,
    pub similarity_cache: Arc<dyn SimilarityCache>,
    pub metadata: Arc<dyn TrackMetadataSource>,
    pub scheduler: Arc<dyn TaskScheduler>,
    pub events: Arc<dyn EventPublisher>,
}

pub struct RealtimeUpdatePipeline {
    interactions: Arc<dyn InteractionStore>,
    recommendations: Arc<dyn RecommendationStore>,
    fusion: Arc<HybridFusionEngine>,
    collaborative: Arc<CollaborativeRecommender>,
    similarity: Arc<SimilarityEngine>,
    similarity_cache: Arc<dyn SimilarityCache>,
    metadata: Arc<dyn TrackMetadataSource>,
    scheduler: Arc<dyn TaskScheduler>,
    events: Arc<dyn EventPublisher>,
    settings: RecommenderSettings,
}

impl RealtimeUpdatePipeline {
    pub fn new(components: PipelineComponents, settings: RecommenderSettings) -> Self {
        Self {
            interactions: components.interactions,
            recommendations: components.recommendations,
            fusion: components.fusion,
            collaborative: components.collaborative,
            similarity: components.similarity,
            similarity_cache: components.similarity_cache,
            metadata: components.metadata,
            scheduler: components.scheduler,
            events: components.events,
            settings,
        }
    }

    /// Stores the event and refreshes recommendations according to its impact.
    ///
    /// Only a storage failure is returned as an error; scheduling and event
    /// publishing failures are logged.
    #[tracing::instrument(skip_all, fields(user_id = %event.user_id))]
    pub async fn process_user_interaction(
        &self,
        event: InteractionEvent,
    ) -> AppResult<InteractionOutcome> {
        transition(&event, PipelineStage::Received);

        self.interactions.record_interaction(&event).await?;
        transition(&event, PipelineStage::Stored);

        let high_impact = event.interaction_type.is_high_impact();
        let outcome = if high_impact {
            transition(&event, PipelineStage::ImmediateRecompute);

            let invalidated = self
                .recommendations
                .deactivate_user_recommendations(event.user_id)
                .await?;
            tracing::debug!(invalidated, "Active recommendations invalidated");

            let count = self.regenerate(event.user_id).await?;
            InteractionOutcome::Recomputed { count }
        } else {
            transition(&event, PipelineStage::Queued);
            let accepted = self.queue_background_refresh(&event).await;
            InteractionOutcome::Queued { accepted }
        };

        self.publish(DomainEvent::InteractionProcessed {
            user_id: event.user_id,
            track_id: event.track_id,
            interaction_type: event.interaction_type,
            high_impact,
            occurred_at: event.timestamp,
        })
        .await;

        transition(&event, PipelineStage::Completed);
        Ok(outcome)
    }

    async fn queue_background_refresh(&self, event: &InteractionEvent) -> usize {
        let jobs = [
            (
                BackgroundJob::UpdateProfile {
                    user_id: event.user_id,
                },
                PROFILE_UPDATE_DELAY,
            ),
            (
                BackgroundJob::RefreshSimilarUsers {
                    user_id: event.user_id,
                },
                SIMILAR_USERS_REFRESH_DELAY,
            ),
            (
                BackgroundJob::RefreshItemSimilarity {
                    trigger_track_id: Some(event.track_id),
                },
                ITEM_SIMILARITY_REFRESH_DELAY,
            ),
        ];

        let mut accepted = 0;
        for (job, delay) in jobs {
            let name = job.name();
            match self.submit(job, delay, RetryPolicy::background()).await {
                Ok(_) => accepted += 1,
                Err(e) => tracing::error!(
                    job = name,
                    error = %e,
                    "Background job could not be queued, keeping last known recommendations"
                ),
            }
        }
        accepted
    }

    async fn submit(
        &self,
        job: BackgroundJob,
        delay: Duration,
        policy: RetryPolicy,
    ) -> AppResult<SubmitOutcome> {
        with_retry(&policy, || {
            self.scheduler.submit(job.clone(), delay, policy.clone())
        })
        .await
    }

    /// Rebuilds the user's recommendations now, or requests a coalesced
    /// background recompute.
    pub async fn update_user_recommendations(
        &self,
        user_id: Uuid,
        immediate: bool,
    ) -> AppResult<UpdateOutcome> {
        if immediate {
            let count = self.regenerate(user_id).await?;
            return Ok(UpdateOutcome::Recomputed { count });
        }

        let job = BackgroundJob::RecomputeRecommendations {
            user_id,
            requested_at: Utc::now(),
        };
        let outcome = self
            .submit(job, RECOMPUTE_COALESCE_DELAY, RetryPolicy::recompute())
            .await?;
        Ok(UpdateOutcome::Queued(outcome))
    }

    /// Deactivates the user's rows older than the staleness horizon
    pub async fn invalidate_stale_recommendations(&self, user_id: Uuid) -> AppResult<u64> {
        let cutoff = Utc::now() - self.settings.staleness_horizon;
        let invalidated = self
            .recommendations
            .deactivate_stale(user_id, cutoff)
            .await?;

        if invalidated > 0 {
            tracing::info!(user_id = %user_id, invalidated, "Stale recommendations invalidated");
        }
        Ok(invalidated)
    }

    /// Requests background recomputes in fixed-size batches, pausing between
    /// batches
    pub async fn batch_update_recommendations(&self, user_ids: &[Uuid]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let batch_size = self.settings.batch_size.max(1);

        for (i, batch) in user_ids.chunks(batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.settings.batch_pause).await;
            }

            let results = join_all(
                batch
                    .iter()
                    .map(|user_id| self.update_user_recommendations(*user_id, false)),
            )
            .await;

            for (user_id, result) in batch.iter().zip(results) {
                match result {
                    Ok(_) => summary.queued += 1,
                    Err(e) => {
                        summary.failed += 1;
                        tracing::error!(user_id = %user_id, error = %e, "Batch recompute not queued");
                    }
                }
            }

            tracing::debug!(batch = i, size = batch.len(), "Recompute batch queued");
        }

        tracing::info!(queued = summary.queued, failed = summary.failed, "Batch update finished");
        summary
    }

    /// Offers a newly trending track to users with neighbouring taste.
    ///
    /// Idempotent: users who already hold an active trending row for the
    /// track are skipped. Returns the number of rows written.
    #[tracing::instrument(skip(self))]
    pub async fn handle_trending_update(&self, track_id: Uuid) -> AppResult<usize> {
        let users = self
            .metadata
            .find_interested_users(track_id, TRENDING_AUDIENCE_LIMIT)
            .await?;

        let mut written = 0;
        for user_id in &users {
            let row = Recommendation::trending(*user_id, track_id);
            if self.recommendations.insert_if_absent(&row).await? {
                written += 1;
            }
        }

        tracing::info!(audience = users.len(), written, "Trending track propagated");
        self.publish(DomainEvent::TrendingPropagated {
            track_id,
            users: written,
        })
        .await;

        Ok(written)
    }

    /// Generates and persists a fresh hybrid set.
    ///
    /// An empty fusion result leaves the current rows in place.
    async fn regenerate(&self, user_id: Uuid) -> AppResult<usize> {
        let fused = self
            .fusion
            .generate_hybrid_recommendations(user_id, self.settings.default_limit, None)
            .await;

        if fused.is_empty() {
            tracing::warn!(user_id = %user_id, "Fusion produced nothing, keeping current recommendations");
            return Ok(0);
        }

        let rows: Vec<Recommendation> = fused
            .into_iter()
            .map(|rec| Recommendation::from_fused(user_id, rec))
            .collect();
        let count = self
            .recommendations
            .replace_user_recommendations(user_id, &rows)
            .await?;

        self.publish(DomainEvent::RecommendationsRefreshed { user_id, count })
            .await;
        Ok(count)
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(&event).await {
            tracing::warn!(error = %e, "Domain event not published");
        }
    }
}

#[async_trait::async_trait]
impl JobRunner for RealtimeUpdatePipeline {
    async fn run(&self, job: &BackgroundJob) -> AppResult<()> {
        match job {
            BackgroundJob::UpdateProfile { user_id } => {
                self.invalidate_stale_recommendations(*user_id).await?;
                self.update_user_recommendations(*user_id, false).await?;
            }
            BackgroundJob::RefreshSimilarUsers { user_id } => {
                self.collaborative.refresh_similar_users(*user_id).await?;
            }
            BackgroundJob::RefreshItemSimilarity { trigger_track_id } => {
                tracing::debug!(trigger_track_id = ?trigger_track_id, "Rebuilding item similarity");
                let matrix = self.similarity.build_item_item_similarity_matrix().await?;
                self.similarity_cache.store_item_similarity(&matrix).await?;
            }
            BackgroundJob::RecomputeRecommendations {
                user_id,
                requested_at,
            } => {
                let latest = self.recommendations.latest_active_at(*user_id).await?;
                if latest.is_some_and(|at| at > *requested_at) {
                    tracing::debug!(user_id = %user_id, "Recompute superseded by a newer set");
                    return Ok(());
                }
                self.regenerate(*user_id).await?;
            }
        }
        Ok(())
    }
}
