pub mod collaborative;
pub mod fusion;
pub mod providers;
pub mod realtime;
pub mod recommendations;
pub mod scheduler;
pub mod similarity;

pub use collaborative::CollaborativeRecommender;
pub use fusion::{FusionSources, HybridFusionEngine};
pub use realtime::{
    BatchSummary, InteractionOutcome, PipelineComponents, RealtimeUpdatePipeline, UpdateOutcome,
};
pub use recommendations::RecommendationService;
pub use scheduler::{
    BackgroundJob, JobRunner, RetryPolicy, SchedulerHandle, SchedulerWorker, SubmitOutcome,
    TaskScheduler, TokioScheduler,
};
pub use similarity::{SimilarUser, SimilarityEngine};
