use serde::{Deserialize, Serialize};

use super::Algorithm;

/// Amount moved between collaborative and content-based by measured engagement
pub const PERFORMANCE_SHIFT: f64 = 0.1;

/// Per-user blend of the fusion sources, always normalized to sum 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmWeights {
    pub collaborative: f64,
    pub content_based: f64,
    pub trending: f64,
    pub diversity: f64,
}

impl Default for AlgorithmWeights {
    fn default() -> Self {
        Self {
            collaborative: 0.4,
            content_based: 0.3,
            trending: 0.2,
            diversity: 0.1,
        }
    }
}

/// Caller-supplied weight overrides; unset fields keep the computed value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightOverrides {
    pub collaborative: Option<f64>,
    pub content_based: Option<f64>,
    pub trending: Option<f64>,
    pub diversity: Option<f64>,
}

/// Measured engagement per collaborative/content source
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmPerformance {
    pub collaborative: f64,
    pub content_based: f64,
}

impl AlgorithmWeights {
    pub fn sum(&self) -> f64 {
        self.collaborative + self.content_based + self.trending + self.diversity
    }

    pub fn weight_for(&self, algorithm: Algorithm) -> f64 {
        match algorithm {
            Algorithm::Collaborative => self.collaborative,
            Algorithm::ContentBased => self.content_based,
            Algorithm::Trending => self.trending,
        }
    }

    /// Moves weight towards whichever source users engaged with more
    pub fn shifted_by(mut self, performance: &AlgorithmPerformance) -> Self {
        if performance.collaborative > performance.content_based {
            let shift = PERFORMANCE_SHIFT.min(self.content_based);
            self.collaborative += shift;
            self.content_based -= shift;
        } else if performance.content_based > performance.collaborative {
            let shift = PERFORMANCE_SHIFT.min(self.collaborative);
            self.content_based += shift;
            self.collaborative -= shift;
        }
        self
    }

    pub fn with_overrides(mut self, overrides: &WeightOverrides) -> Self {
        if let Some(w) = overrides.collaborative {
            self.collaborative = w;
        }
        if let Some(w) = overrides.content_based {
            self.content_based = w;
        }
        if let Some(w) = overrides.trending {
            self.trending = w;
        }
        if let Some(w) = overrides.diversity {
            self.diversity = w;
        }
        self
    }

    /// Scales the four weights to sum 1.0.
    ///
    /// Negative or non-finite weights count as zero; if nothing positive is
    /// left the defaults are returned.
    pub fn normalized(self) -> Self {
        let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let cleaned = Self {
            collaborative: clean(self.collaborative),
            content_based: clean(self.content_based),
            trending: clean(self.trending),
            diversity: clean(self.diversity),
        };

        let total = cleaned.sum();
        if !total.is_finite() || total <= 0.0 {
            return Self::default();
        }

        Self {
            collaborative: cleaned.collaborative / total,
            content_based: cleaned.content_based / total,
            trending: cleaned.trending / total,
            diversity: cleaned.diversity / total,
        }
    }

    /// Weights used for users without any interaction history
    pub fn trending_only() -> Self {
        Self {
            collaborative: 0.0,
            content_based: 0.0,
            trending: 1.0,
            diversity: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    #[test]
    fn test_defaults_sum_to_one() {
        assert!((AlgorithmWeights::default().sum() - 1.0).abs() < EPS);
    }

    #[test]
    fn test_shift_towards_collaborative() {
        let perf = AlgorithmPerformance {
            collaborative: 0.6,
            content_based: 0.2,
        };
        let w = AlgorithmWeights::default().shifted_by(&perf);
        assert!((w.collaborative - 0.5).abs() < EPS);
        assert!((w.content_based - 0.2).abs() < EPS);
    }

    #[test]
    fn test_shift_towards_content() {
        let perf = AlgorithmPerformance {
            collaborative: 0.1,
            content_based: 0.3,
        };
        let w = AlgorithmWeights::default().shifted_by(&perf);
        assert!((w.collaborative - 0.3).abs() < EPS);
        assert!((w.content_based - 0.4).abs() < EPS);
    }

    #[test]
    fn test_equal_performance_keeps_defaults() {
        let w = AlgorithmWeights::default().shifted_by(&AlgorithmPerformance::default());
        assert_eq!(w, AlgorithmWeights::default());
    }

    #[test]
    fn test_overrides_are_renormalized() {
        let overrides = WeightOverrides {
            trending: Some(2.0),
            ..Default::default()
        };
        let w = AlgorithmWeights::default()
            .with_overrides(&overrides)
            .normalized();
        assert!((w.sum() - 1.0).abs() < EPS);
        assert!((w.trending - 2.0 / 2.8).abs() < EPS);
    }

    #[test]
    fn test_degenerate_overrides_fall_back_to_defaults() {
        let overrides = WeightOverrides {
            collaborative: Some(-1.0),
            content_based: Some(f64::NAN),
            trending: Some(0.0),
            diversity: Some(0.0),
        };
        let w = AlgorithmWeights::default()
            .with_overrides(&overrides)
            .normalized();
        assert_eq!(w, AlgorithmWeights::default());
    }

    #[test]
    fn test_weight_for_maps_sources() {
        let w = AlgorithmWeights::default();
        assert_eq!(w.weight_for(Algorithm::Collaborative), 0.4);
        assert_eq!(w.weight_for(Algorithm::ContentBased), 0.3);
        assert_eq!(w.weight_for(Algorithm::Trending), 0.2);
    }
}
