use serde::{Deserialize, Serialize};

/// Running aggregate of scores.
///
/// Only sums, counts, minimums and maximums are kept, so the result does not depend on the order in
/// which scores arrive.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
pub struct ScoreStats {
    count: usize,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl ScoreStats {
    pub fn from_scores(scores: impl IntoIterator<Item = f64>) -> Self {
        let mut stats = Self::default();
        scores.into_iter().for_each(|score| stats.push(score));
        stats
    }

    pub fn push(&mut self, score: f64) {
        self.count += 1;
        self.sum += score;
        self.min = Some(self.min.map_or(score, |min| min.min(score)));
        self.max = Some(self.max.map_or(score, |max| max.max(score)));
    }

    pub fn merge(&mut self, other: &ScoreStats) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Mean of recorded scores, `0.0` when nothing was recorded.
    ///
    /// The result is kept within `[min, max]` to absorb floating point rounding.
    pub fn average(&self) -> f64 {
        match (self.min, self.max) {
            (Some(min), Some(max)) => (self.sum / self.count as f64).clamp(min, max),
            _ => 0.0,
        }
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_empty_average_is_zero() {
        let stats = ScoreStats::default();
        assert_eq!(stats.average(), 0.0);
        assert_eq!(stats.min(), None);
        assert!(stats.is_empty());
    }

    #[test]
    fn test_average_of_equal_scores_stays_in_bounds() {
        let stats = ScoreStats::from_scores([0.1, 0.1, 0.1]);
        assert_eq!(stats.average(), 0.1);
    }

    proptest! {
        #[test]
        fn merge_is_order_independent(
            left in prop::collection::vec(0.0..1.0f64, 0..50),
            right in prop::collection::vec(0.0..1.0f64, 0..50),
        ) {
            let mut a = ScoreStats::from_scores(left.iter().copied());
            a.merge(&ScoreStats::from_scores(right.iter().copied()));

            let b = ScoreStats::from_scores(right.iter().chain(left.iter()).copied());

            prop_assert_eq!(a.count(), b.count());
            prop_assert_eq!(a.min(), b.min());
            prop_assert_eq!(a.max(), b.max());
            assert_relative_eq!(a.average(), b.average(), epsilon = 1e-9);
        }
    }
}
