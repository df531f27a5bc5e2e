use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::{
    config::RecommenderSettings,
    error::AppResult,
    models::{
        Algorithm, AlgorithmPerformance, AlgorithmWeights, Candidate, ContentCandidate,
        Explanation, FusedRecommendation, HybridExplanation, Strategy, TrackMetadata,
        TrendingCandidate, WeightOverrides,
    },
    services::{
        collaborative::CollaborativeRecommender,
        providers::{
            AlgorithmPerformanceSource, ContentBasedRecommender, ExplorationProfileSource,
            TrackMetadataSource, TrendingSource,
        },
    },
    store::InteractionStore,
};

/// Share of the output slots where novelty is rewarded
const DIVERSITY_BOOST_SLOTS: f64 = 0.3;
const NOVELTY_BOOST: f64 = 0.1;
const GENRE_REPEAT_LIMIT: usize = 3;
const GENRE_REPEAT_PENALTY: f64 = 0.05;
const ARTIST_REPEAT_LIMIT: usize = 2;
const ARTIST_REPEAT_PENALTY: f64 = 0.1;

/// Confidence assigned to trending candidates, which carry none of their own
const TRENDING_CONFIDENCE: f64 = 0.5;

const EXPLOITATION_REASON: &str = "Strong match for your listening history";
const EXPLORATION_REASON: &str = "Something new to explore";
const COLD_START_REASON: &str = "Popular with listeners right now";

/// External signals consumed by the fusion engine
#[derive(Clone)]
pub struct FusionSources {
    pub content: Arc<dyn ContentBasedRecommender>,
    pub trending: Arc<dyn TrendingSource>,
    pub performance: Arc<dyn AlgorithmPerformanceSource>,
    pub exploration: Arc<dyn ExplorationProfileSource>,
    pub metadata: Arc<dyn TrackMetadataSource>,
}

/// Merges collaborative, content-based and trending candidates into one
/// ranked, diversified list.
pub struct HybridFusionEngine {
    collaborative: Arc<CollaborativeRecommender>,
    interactions: Arc<dyn InteractionStore>,
    sources: FusionSources,
    settings: RecommenderSettings,
}

impl HybridFusionEngine {
    pub fn new(
        collaborative: Arc<CollaborativeRecommender>,
        interactions: Arc<dyn InteractionStore>,
        sources: FusionSources,
        settings: RecommenderSettings,
    ) -> Self {
        Self {
            collaborative,
            interactions,
            sources,
            settings,
        }
    }

    /// Defaults shifted by measured engagement, then overridden and normalized
    pub async fn get_algorithm_weights(
        &self,
        user_id: Uuid,
        overrides: Option<&WeightOverrides>,
    ) -> AlgorithmWeights {
        let performance = match self
            .sources
            .performance
            .get_algorithm_performance(user_id)
            .await
        {
            Ok(performance) => performance,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Algorithm performance unavailable");
                AlgorithmPerformance::default()
            }
        };

        let weights = AlgorithmWeights::default().shifted_by(&performance);
        match overrides {
            Some(overrides) => weights.with_overrides(overrides).normalized(),
            None => weights.normalized(),
        }
    }

    /// Runs the full fusion pipeline. Never fails: errors are logged and an
    /// empty list is returned.
    #[tracing::instrument(skip_all, fields(user_id = %user_id, limit = limit))]
    pub async fn generate_hybrid_recommendations(
        &self,
        user_id: Uuid,
        limit: usize,
        overrides: Option<&WeightOverrides>,
    ) -> Vec<FusedRecommendation> {
        if limit == 0 {
            return Vec::new();
        }

        match self.fuse(user_id, limit, overrides).await {
            Ok(recommendations) => {
                tracing::debug!(count = recommendations.len(), "Hybrid recommendations generated");
                recommendations
            }
            Err(e) => {
                tracing::error!(error = %e, "Hybrid recommendation failed");
                Vec::new()
            }
        }
    }

    async fn fuse(
        &self,
        user_id: Uuid,
        limit: usize,
        overrides: Option<&WeightOverrides>,
    ) -> AppResult<Vec<FusedRecommendation>> {
        if !self.interactions.has_interactions(user_id).await? {
            tracing::info!("No interaction history, serving trending only");
            return Ok(self.cold_start(user_id, limit).await);
        }

        let weights = self.get_algorithm_weights(user_id, overrides).await;
        let timeout = self.settings.source_timeout;

        let (collaborative, content, trending) = tokio::join!(
            fetch_source(Algorithm::Collaborative, timeout, async {
                Ok(self
                    .collaborative
                    .generate_recommendations(user_id, 2 * limit)
                    .await)
            }),
            fetch_source(
                Algorithm::ContentBased,
                timeout,
                self.sources
                    .content
                    .generate_content_based_recommendations(user_id, 2 * limit)
            ),
            fetch_source(
                Algorithm::Trending,
                timeout,
                self.sources.trending.get_trending_candidates(user_id, limit)
            ),
        );

        tracing::debug!(
            collaborative = collaborative.len(),
            content_based = content.len(),
            trending = trending.len(),
            "Candidate sources fetched"
        );

        let content: Vec<Candidate> = content.into_iter().map(content_candidate).collect();
        let trending: Vec<Candidate> = trending.into_iter().map(trending_candidate).collect();

        let combined = combine_candidates(
            vec![
                (Algorithm::Collaborative, collaborative),
                (Algorithm::ContentBased, content),
                (Algorithm::Trending, trending),
            ],
            &weights,
        );

        let track_ids: Vec<Uuid> = combined.iter().map(|c| c.track_id).collect();
        let metadata = match self.sources.metadata.get_track_metadata(&track_ids).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(error = %e, "Track metadata unavailable, diversity limited");
                HashMap::new()
            }
        };
        let diversified = apply_diversity_filter(combined, limit, &metadata);

        let tendency = self.exploration_tendency(user_id).await;
        let mut balanced = balance_exploration_exploitation(
            diversified,
            limit,
            tendency,
            self.settings.exploitation_confidence,
        );

        let mut rng = self.rng();
        shuffle_within_windows(&mut balanced, self.settings.shuffle_window, &mut rng);

        Ok(finalize(balanced, limit))
    }

    /// Trending-only list for users without history
    async fn cold_start(&self, user_id: Uuid, limit: usize) -> Vec<FusedRecommendation> {
        let trending = fetch_source(
            Algorithm::Trending,
            self.settings.source_timeout,
            self.sources.trending.get_trending_candidates(user_id, limit),
        )
        .await;

        let candidates = trending.into_iter().map(trending_candidate).collect();
        let combined = combine_candidates(
            vec![(Algorithm::Trending, candidates)],
            &AlgorithmWeights::trending_only(),
        );

        let tagged = combined
            .into_iter()
            .map(|mut rec| {
                rec.explanation.recommendation_type = Some(Strategy::Exploration);
                rec.explanation.reason = Some(COLD_START_REASON.to_string());
                rec
            })
            .collect();

        finalize(sort_by_score(tagged), limit)
    }

    async fn exploration_tendency(&self, user_id: Uuid) -> f64 {
        match self
            .sources
            .exploration
            .get_user_exploration_profile(user_id)
            .await
        {
            Ok(Some(profile)) if profile.exploration_tendency.is_finite() => {
                profile.exploration_tendency
            }
            Ok(_) => self.settings.default_exploration_tendency,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Exploration profile unavailable");
                self.settings.default_exploration_tendency
            }
        }
    }

    fn rng(&self) -> StdRng {
        match self.settings.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// Awaits one candidate source, degrading to an empty list on error or timeout
async fn fetch_source<T, F>(algorithm: Algorithm, timeout: Duration, fut: F) -> Vec<T>
where
    F: Future<Output = AppResult<Vec<T>>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(candidates)) => candidates,
        Ok(Err(e)) => {
            tracing::warn!(source = %algorithm, error = %e, "Candidate source failed");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!(
                source = %algorithm,
                timeout_ms = timeout.as_millis() as u64,
                "Candidate source timed out"
            );
            Vec::new()
        }
    }
}

fn content_candidate(candidate: ContentCandidate) -> Candidate {
    Candidate {
        track_id: candidate.track_id,
        score: candidate.score,
        confidence: candidate.score.clamp(0.0, 1.0),
        explanation: Explanation::ContentBased {
            based_on_tracks: candidate.based_on_tracks,
        },
    }
}

fn trending_candidate(candidate: TrendingCandidate) -> Candidate {
    Candidate {
        track_id: candidate.track_id,
        score: candidate.score,
        confidence: TRENDING_CONFIDENCE,
        explanation: Explanation::Trending {
            trending_score: candidate.score,
        },
    }
}

/// Merges per-source candidates into one entry per track.
///
/// Each source's score is scaled by its weight; a track proposed by several
/// sources accumulates scores and confidences and lists every contributor.
/// Output order is first appearance.
pub fn combine_candidates(
    sources: Vec<(Algorithm, Vec<Candidate>)>,
    weights: &AlgorithmWeights,
) -> Vec<FusedRecommendation> {
    let mut combined: Vec<FusedRecommendation> = Vec::new();
    let mut index: HashMap<Uuid, usize> = HashMap::new();

    for (algorithm, candidates) in sources {
        let weight = weights.weight_for(algorithm);

        for candidate in candidates {
            let weighted = candidate.score * weight;

            match index.get(&candidate.track_id) {
                Some(&i) => {
                    let existing = &mut combined[i];
                    existing.score += weighted;
                    existing.confidence += candidate.confidence;
                    if !existing.has_source(algorithm) {
                        existing.sources.push(algorithm);
                    }
                    existing
                        .explanation
                        .hybrid_components
                        .push(candidate.explanation);
                }
                None => {
                    index.insert(candidate.track_id, combined.len());
                    combined.push(FusedRecommendation {
                        track_id: candidate.track_id,
                        score: weighted,
                        confidence: candidate.confidence,
                        sources: vec![algorithm],
                        explanation: HybridExplanation {
                            hybrid_components: vec![candidate.explanation],
                            ..Default::default()
                        },
                    });
                }
            }
        }
    }

    combined
}

fn sort_by_score(mut recommendations: Vec<FusedRecommendation>) -> Vec<FusedRecommendation> {
    recommendations.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.track_id.cmp(&b.track_id))
    });
    recommendations
}

/// Keeps the best `limit` candidates, nudging scores towards genre and
/// artist variety, then re-sorts by adjusted score.
///
/// Within the first 30% of slots a track bringing a new genre or artist gets
/// +0.1. A genre already seen more than 3 times costs 0.05 and an artist
/// already seen more than 2 times costs 0.1. Tracks without metadata are
/// left untouched.
pub fn apply_diversity_filter(
    candidates: Vec<FusedRecommendation>,
    limit: usize,
    metadata: &HashMap<Uuid, TrackMetadata>,
) -> Vec<FusedRecommendation> {
    let mut selected: Vec<FusedRecommendation> =
        sort_by_score(candidates).into_iter().take(limit).collect();

    let boost_slots = limit as f64 * DIVERSITY_BOOST_SLOTS;
    let mut genre_counts: HashMap<&str, usize> = HashMap::new();
    let mut artist_counts: HashMap<&str, usize> = HashMap::new();

    for (slot, rec) in selected.iter_mut().enumerate() {
        let Some(meta) = metadata.get(&rec.track_id) else {
            continue;
        };

        let genre_seen = meta
            .genre
            .as_deref()
            .map(|g| genre_counts.get(g).copied().unwrap_or(0));
        let artist_seen = meta
            .artist
            .as_deref()
            .map(|a| artist_counts.get(a).copied().unwrap_or(0));

        let mut adjustment = 0.0;
        if (slot as f64) < boost_slots && (genre_seen == Some(0) || artist_seen == Some(0)) {
            adjustment += NOVELTY_BOOST;
        }
        if genre_seen.is_some_and(|n| n > GENRE_REPEAT_LIMIT) {
            adjustment -= GENRE_REPEAT_PENALTY;
        }
        if artist_seen.is_some_and(|n| n > ARTIST_REPEAT_LIMIT) {
            adjustment -= ARTIST_REPEAT_PENALTY;
        }
        rec.score += adjustment;

        if let Some(genre) = meta.genre.as_deref() {
            *genre_counts.entry(genre).or_insert(0) += 1;
        }
        if let Some(artist) = meta.artist.as_deref() {
            *artist_counts.entry(artist).or_insert(0) += 1;
        }
    }

    sort_by_score(selected)
}

fn tag(mut rec: FusedRecommendation, strategy: Strategy) -> FusedRecommendation {
    let reason = match strategy {
        Strategy::Exploitation => EXPLOITATION_REASON,
        Strategy::Exploration => EXPLORATION_REASON,
    };
    rec.explanation.recommendation_type = Some(strategy);
    rec.explanation.reason = Some(reason.to_string());
    rec
}

/// Splits `limit` slots between confident matches and exploratory picks.
///
/// `floor(limit * (1 - tendency))` slots go to candidates whose confidence
/// exceeds `confidence_threshold`; the rest go to lower-confidence or
/// trending candidates. Slots a pool cannot fill are backfilled from the
/// leftovers in score order.
pub fn balance_exploration_exploitation(
    candidates: Vec<FusedRecommendation>,
    limit: usize,
    exploration_tendency: f64,
    confidence_threshold: f64,
) -> Vec<FusedRecommendation> {
    let tendency = exploration_tendency.clamp(0.0, 1.0);
    let exploitation_count = (limit as f64 * (1.0 - tendency)).floor() as usize;
    let exploration_count = limit - exploitation_count.min(limit);

    let mut exploitation = Vec::new();
    let mut exploration = Vec::new();
    let mut leftovers = Vec::new();

    for rec in candidates {
        let confident = rec.confidence > confidence_threshold;
        if confident && exploitation.len() < exploitation_count {
            exploitation.push(tag(rec, Strategy::Exploitation));
        } else if (!confident || rec.has_source(Algorithm::Trending))
            && exploration.len() < exploration_count
        {
            exploration.push(tag(rec, Strategy::Exploration));
        } else {
            leftovers.push(rec);
        }
    }

    let mut balanced = exploitation;
    balanced.append(&mut exploration);

    for rec in leftovers {
        if balanced.len() >= limit {
            break;
        }
        let strategy = if rec.confidence > confidence_threshold {
            Strategy::Exploitation
        } else {
            Strategy::Exploration
        };
        balanced.push(tag(rec, strategy));
    }

    balanced
}

/// Fisher-Yates shuffle inside each contiguous window of `window` items
pub fn shuffle_within_windows<T, R: rand::Rng + ?Sized>(items: &mut [T], window: usize, rng: &mut R) {
    if window < 2 {
        return;
    }
    for chunk in items.chunks_mut(window) {
        chunk.shuffle(rng);
    }
}

/// Caps the list and clamps accumulated confidence into [0, 1]
fn finalize(recommendations: Vec<FusedRecommendation>, limit: usize) -> Vec<FusedRecommendation> {
    recommendations
        .into_iter()
        .take(limit)
        .map(|mut rec| {
            rec.confidence = rec.confidence.clamp(0.0, 1.0);
            rec
        })
        .collect()
}
