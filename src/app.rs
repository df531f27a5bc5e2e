use std::sync::Arc;

use crate::{
    config::RecommenderSettings,
    db::{InMemorySimilarityCache, SimilarityCache},
    services::{
        fusion::FusionSources,
        providers::{EventPublisher, InMemoryCatalog, LogEventPublisher},
        CollaborativeRecommender, HybridFusionEngine, PipelineComponents, RealtimeUpdatePipeline,
        RecommendationService, SchedulerWorker, SimilarityEngine, TokioScheduler,
    },
    store::{InMemoryInteractionStore, InMemoryRecommendationStore, InteractionStore, RecommendationStore},
};

/// Storage, caching and external signal adapters the core runs against
#[derive(Clone)]
pub struct Collaborators {
    pub interactions: Arc<dyn InteractionStore>,
    pub recommendations: Arc<dyn RecommendationStore>,
    pub similarity_cache: Arc<dyn SimilarityCache>,
    pub sources: FusionSources,
    pub events: Arc<dyn EventPublisher>,
}

impl Collaborators {
    /// Fully in-process collaborators. The returned catalog is the one backing
    /// every signal source, so callers can register tracks and profiles.
    pub fn in_memory(settings: &RecommenderSettings) -> (Self, Arc<InMemoryCatalog>) {
        let interactions = Arc::new(InMemoryInteractionStore::new());
        let catalog = Arc::new(InMemoryCatalog::new(interactions.clone()));

        let collaborators = Self {
            interactions,
            recommendations: Arc::new(InMemoryRecommendationStore::new()),
            similarity_cache: Arc::new(InMemorySimilarityCache::new(
                settings.similar_users_ttl,
                settings.item_similarity_ttl,
            )),
            sources: FusionSources {
                content: catalog.clone(),
                trending: catalog.clone(),
                performance: catalog.clone(),
                exploration: catalog.clone(),
                metadata: catalog.clone(),
            },
            events: Arc::new(LogEventPublisher),
        };

        (collaborators, catalog)
    }
}

/// The wired recommendation core
pub struct Core {
    pub interactions: Arc<dyn InteractionStore>,
    pub recommendations: Arc<dyn RecommendationStore>,
    pub similarity: Arc<SimilarityEngine>,
    pub collaborative: Arc<CollaborativeRecommender>,
    pub fusion: Arc<HybridFusionEngine>,
    pub pipeline: Arc<RealtimeUpdatePipeline>,
    pub service: Arc<RecommendationService>,
    pub scheduler: TokioScheduler,
}

impl Core {
    /// Wires every component. The scheduler worker is returned unstarted;
    /// start it with the pipeline as its job runner.
    pub fn assemble(
        collaborators: Collaborators,
        settings: RecommenderSettings,
    ) -> (Self, SchedulerWorker) {
        let Collaborators {
            interactions,
            recommendations,
            similarity_cache,
            sources,
            events,
        } = collaborators;

        let (scheduler, worker) = TokioScheduler::new();

        let similarity = Arc::new(SimilarityEngine::new(interactions.clone(), settings.clone()));
        let collaborative = Arc::new(CollaborativeRecommender::new(
            interactions.clone(),
            similarity.clone(),
            similarity_cache.clone(),
        ));
        let metadata = sources.metadata.clone();
        let fusion = Arc::new(HybridFusionEngine::new(
            collaborative.clone(),
            interactions.clone(),
            sources,
            settings.clone(),
        ));

        let pipeline = Arc::new(RealtimeUpdatePipeline::new(
            PipelineComponents {
                interactions: interactions.clone(),
                recommendations: recommendations.clone(),
                fusion: fusion.clone(),
                collaborative: collaborative.clone(),
                similarity: similarity.clone(),
                similarity_cache,
                metadata,
                scheduler: Arc::new(scheduler.clone()),
                events,
            },
            settings.clone(),
        ));
        let service = Arc::new(RecommendationService::new(
            recommendations.clone(),
            fusion.clone(),
            settings,
        ));

        let core = Self {
            interactions,
            recommendations,
            similarity,
            collaborative,
            fusion,
            pipeline,
            service,
            scheduler,
        };

        (core, worker)
    }
}
