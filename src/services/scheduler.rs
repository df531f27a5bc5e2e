/// Delay- and retry-aware background task scheduling
///
/// Jobs are submitted with a delay and a retry policy. A job whose
/// coalescing key is already waiting is absorbed into the pending one, so a
/// burst of interactions results in a single recompute carrying the newest
/// request time. Execution is at-least-once with bounded retries.
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Work the realtime pipeline defers to the background
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum BackgroundJob {
    UpdateProfile {
        user_id: Uuid,
    },
    RefreshSimilarUsers {
        user_id: Uuid,
    },
    /// Full item-item rebuild; the trigger is kept for logging only
    RefreshItemSimilarity {
        trigger_track_id: Option<Uuid>,
    },
    RecomputeRecommendations {
        user_id: Uuid,
        requested_at: DateTime<Utc>,
    },
}

impl BackgroundJob {
    pub fn name(&self) -> &'static str {
        match self {
            BackgroundJob::UpdateProfile { .. } => "update_profile",
            BackgroundJob::RefreshSimilarUsers { .. } => "refresh_similar_users",
            BackgroundJob::RefreshItemSimilarity { .. } => "refresh_item_similarity",
            BackgroundJob::RecomputeRecommendations { .. } => "recompute_recommendations",
        }
    }

    /// Jobs sharing a key while one is still waiting are coalesced
    pub fn coalesce_key(&self) -> String {
        match self {
            BackgroundJob::UpdateProfile { user_id } => format!("profile:{}", user_id),
            BackgroundJob::RefreshSimilarUsers { user_id } => format!("simusers:{}", user_id),
            BackgroundJob::RefreshItemSimilarity { .. } => "itemsim".to_string(),
            BackgroundJob::RecomputeRecommendations { user_id, .. } => {
                format!("recompute:{}", user_id)
            }
        }
    }

    /// Folds a later job with the same key into this pending one
    fn absorb(&mut self, later: BackgroundJob) {
        match (self, later) {
            (
                BackgroundJob::RecomputeRecommendations { requested_at, .. },
                BackgroundJob::RecomputeRecommendations {
                    requested_at: later_at,
                    ..
                },
            ) => *requested_at = (*requested_at).max(later_at),
            (
                BackgroundJob::RefreshItemSimilarity { trigger_track_id },
                BackgroundJob::RefreshItemSimilarity {
                    trigger_track_id: Some(later),
                },
            ) => *trigger_track_id = Some(later),
            _ => {}
        }
    }
}

/// Retry policy with exponential backoff and jitter
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// ±30% random jitter on each backoff
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy for the profile / similarity refresh jobs
    pub fn background() -> Self {
        Self::default()
    }

    /// Policy for coalesced recommendation recomputes
    pub fn recompute() -> Self {
        Self {
            max_retries: 3,
            ..Self::default()
        }
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        Duration::from_millis(
            ((current.as_millis() as f64 * self.backoff_multiplier)
                .min(self.max_backoff.as_millis() as f64)) as u64,
        )
    }
}

fn calculate_backoff(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let mut rng = rand::thread_rng();
        let jitter_factor = 1.0 + rng.gen_range(-0.3..0.3);
        Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
    } else {
        base
    }
}

/// Runs `f` until it succeeds or the policy's retries are exhausted.
///
/// Returns the last error on exhaustion.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut f: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;

                if attempt > policy.max_retries {
                    tracing::warn!(max_retries = policy.max_retries, error = %e, "Max retries reached");
                    return Err(e);
                }

                let delay = calculate_backoff(backoff, policy.jitter);
                tracing::warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after failure"
                );

                tokio::time::sleep(delay).await;
                backoff = policy.next_backoff(backoff);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Scheduled,
    /// An identical job is already waiting and will cover this one
    Coalesced,
}

/// Generic delayed-task scheduler
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TaskScheduler: Send + Sync {
    async fn submit(
        &self,
        job: BackgroundJob,
        delay: Duration,
        policy: RetryPolicy,
    ) -> AppResult<SubmitOutcome>;
}

/// Executes background jobs
#[async_trait::async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &BackgroundJob) -> AppResult<()>;
}

/// A due coalescing key; the job itself is taken from the pending map
struct DueJob {
    key: String,
    policy: RetryPolicy,
}

type PendingJobs = Arc<Mutex<HashMap<String, BackgroundJob>>>;

/// In-process scheduler: one timer task per job feeding a worker channel
#[derive(Clone)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<DueJob>,
    pending: PendingJobs,
}

/// Receiving side of a [`TokioScheduler`], started once a runner exists
pub struct SchedulerWorker {
    rx: mpsc::UnboundedReceiver<DueJob>,
    pending: PendingJobs,
}

/// Handle for gracefully shutting down the scheduler worker
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    worker: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops dispatching new jobs; jobs already running finish on their own
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "Scheduler worker panicked");
        }
        tracing::info!("Scheduler worker stopped");
    }
}

impl TokioScheduler {
    pub fn new() -> (Self, SchedulerWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(HashMap::new()));

        let scheduler = Self {
            tx,
            pending: pending.clone(),
        };
        let worker = SchedulerWorker { rx, pending };

        (scheduler, worker)
    }

    /// Number of jobs waiting for their delay to elapse
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[async_trait::async_trait]
impl TaskScheduler for TokioScheduler {
    async fn submit(
        &self,
        job: BackgroundJob,
        delay: Duration,
        policy: RetryPolicy,
    ) -> AppResult<SubmitOutcome> {
        if self.tx.is_closed() {
            return Err(AppError::Queue("Scheduler worker is not running".to_string()));
        }

        let key = job.coalesce_key();
        let name = job.name();
        {
            let mut pending = self.pending.lock().await;
            if let Some(waiting) = pending.get_mut(&key) {
                waiting.absorb(job);
                tracing::debug!(job = name, key = %key, "Job coalesced into pending one");
                return Ok(SubmitOutcome::Coalesced);
            }
            pending.insert(key.clone(), job);
        }

        tracing::debug!(
            job = name,
            delay_ms = delay.as_millis() as u64,
            "Job scheduled"
        );

        let tx = self.tx.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(mpsc::error::SendError(due)) = tx.send(DueJob { key, policy }) {
                pending.lock().await.remove(&due.key);
                tracing::error!(key = %due.key, "Scheduler worker gone, job dropped");
            }
        });

        Ok(SubmitOutcome::Scheduled)
    }
}

impl SchedulerWorker {
    /// Spawns the dispatch loop. Each due job runs in its own task.
    pub fn start(self, runner: Arc<dyn JobRunner>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = tokio::spawn(self.dispatch(runner, shutdown_rx));

        SchedulerHandle {
            shutdown_tx,
            worker,
        }
    }

    async fn dispatch(mut self, runner: Arc<dyn JobRunner>, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!("Scheduler worker started");

        loop {
            tokio::select! {
                Some(DueJob { key, policy }) = self.rx.recv() => {
                    // New submissions for this key must schedule a fresh run
                    let Some(job) = self.pending.lock().await.remove(&key) else {
                        tracing::warn!(key = %key, "Due job no longer pending");
                        continue;
                    };

                    let runner = runner.clone();
                    tokio::spawn(async move {
                        match with_retry(&policy, || runner.run(&job)).await {
                            Ok(()) => tracing::debug!(job = job.name(), "Job completed"),
                            Err(e) => tracing::error!(
                                job = job.name(),
                                error = %e,
                                "Job failed after retries"
                            ),
                        }
                    });
                }
                _ = shutdown_rx.recv() => {
                    self.rx.close();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingRunner {
        runs: AtomicU32,
        failures_before_success: u32,
        seen: Mutex<Vec<BackgroundJob>>,
    }

    #[async_trait::async_trait]
    impl JobRunner for CountingRunner {
        async fn run(&self, job: &BackgroundJob) -> AppResult<()> {
            let attempt = self.runs.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().await.push(job.clone());
            if attempt < self.failures_before_success {
                Err(AppError::Computation("transient".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(10),
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let counter = AtomicU32::new(0);

        let result = with_retry(&fast_policy(3), || {
            let count = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(AppError::Queue("busy".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(tokio_test::assert_ok!(result), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error_when_exhausted() {
        let counter = AtomicU32::new(0);

        let result: AppResult<()> = with_retry(&fast_policy(2), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Queue("down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(AppError::Queue(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_backoff: Duration::from_secs(5),
            ..RetryPolicy::background()
        };
        assert_eq!(policy.initial_backoff, Duration::from_secs(2));
        let second = policy.next_backoff(policy.initial_backoff);
        assert_eq!(second, Duration::from_secs(4));
        assert_eq!(policy.next_backoff(second), Duration::from_secs(5));
        assert_eq!(RetryPolicy::recompute().max_retries, 3);
    }

    #[test]
    fn test_coalesce_keys() {
        let user = Uuid::new_v4();
        let a = BackgroundJob::RecomputeRecommendations {
            user_id: user,
            requested_at: Utc::now(),
        };
        let b = BackgroundJob::RecomputeRecommendations {
            user_id: user,
            requested_at: Utc::now() + chrono::Duration::seconds(1),
        };
        assert_eq!(a.coalesce_key(), b.coalesce_key());

        let x = BackgroundJob::RefreshItemSimilarity {
            trigger_track_id: Some(Uuid::new_v4()),
        };
        let y = BackgroundJob::RefreshItemSimilarity {
            trigger_track_id: None,
        };
        assert_eq!(x.coalesce_key(), y.coalesce_key());
        assert_ne!(
            BackgroundJob::UpdateProfile { user_id: user }.coalesce_key(),
            BackgroundJob::RefreshSimilarUsers { user_id: user }.coalesce_key()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_coalesced_into_one_run() {
        let (scheduler, worker) = TokioScheduler::new();
        let runner = Arc::new(CountingRunner::default());
        let handle = worker.start(runner.clone());
        let user = Uuid::new_v4();

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            let job = BackgroundJob::RecomputeRecommendations {
                user_id: user,
                requested_at: Utc::now(),
            };
            outcomes.push(
                scheduler
                    .submit(job, Duration::from_secs(5), fast_policy(0))
                    .await
                    .unwrap(),
            );
        }

        assert_eq!(outcomes[0], SubmitOutcome::Scheduled);
        assert!(outcomes[1..].iter().all(|o| *o == SubmitOutcome::Coalesced));
        assert_eq!(scheduler.pending_count().await, 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_count().await, 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalesced_recompute_runs_with_latest_request_time() {
        let (scheduler, worker) = TokioScheduler::new();
        let runner = Arc::new(CountingRunner::default());
        let handle = worker.start(runner.clone());
        let user = Uuid::new_v4();
        let later = Utc::now();
        let earlier = later - chrono::Duration::seconds(10);

        for requested_at in [earlier, later, earlier] {
            scheduler
                .submit(
                    BackgroundJob::RecomputeRecommendations {
                        user_id: user,
                        requested_at,
                    },
                    Duration::from_secs(5),
                    fast_policy(0),
                )
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            *runner.seen.lock().await,
            vec![BackgroundJob::RecomputeRecommendations {
                user_id: user,
                requested_at: later,
            }]
        );

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_is_retried() {
        let (scheduler, worker) = TokioScheduler::new();
        let runner = Arc::new(CountingRunner {
            failures_before_success: 2,
            ..Default::default()
        });
        let handle = worker.start(runner.clone());

        scheduler
            .submit(
                BackgroundJob::RefreshSimilarUsers {
                    user_id: Uuid::new_v4(),
                },
                Duration::from_secs(1),
                RetryPolicy {
                    jitter: false,
                    ..RetryPolicy::background()
                },
            )
            .await
            .unwrap();

        // 1s delay, then 2s and 4s backoffs
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 3);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_respects_delay() {
        let (scheduler, worker) = TokioScheduler::new();
        let runner = Arc::new(CountingRunner::default());
        let handle = worker.start(runner.clone());

        scheduler
            .submit(
                BackgroundJob::UpdateProfile {
                    user_id: Uuid::new_v4(),
                },
                Duration::from_secs(10),
                fast_policy(0),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert_eq!(runner.seen.lock().await.len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_fails_once_worker_is_gone() {
        let (scheduler, worker) = TokioScheduler::new();
        drop(worker);

        let result = scheduler
            .submit(
                BackgroundJob::UpdateProfile {
                    user_id: Uuid::new_v4(),
                },
                Duration::from_secs(1),
                fast_policy(0),
            )
            .await;

        let err = tokio_test::assert_err!(result);
        assert!(matches!(err, AppError::Queue(_)));
    }
}
