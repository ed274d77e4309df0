use std::cmp::Reverse;
use std::collections::BTreeMap;

use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::stats::ScoreStats;
use crate::trajectory::Trajectory;
use crate::types::ExampleId;

/// Trajectories sharing a grouping key, summarized by score statistics.
///
/// Trajectories are ordered from the best to the worst score, so the result does not depend on the
/// order in which they were produced.
#[derive(Debug, Clone)]
pub struct Bucket<K = ExampleId> {
    pub key: K,
    pub trajectories: Vec<Trajectory>,
    pub max_score: f64,
    pub min_score: f64,
    pub avg_score: f64,
    pub max_to_min_gap: f64,
    pub max_to_avg_gap: f64,
}

impl<K> Bucket<K> {
    fn new(key: K, mut trajectories: Vec<Trajectory>) -> Self {
        trajectories.sort_by_key(|trajectory| {
            (
                Reverse(OrderedFloat(trajectory.score)),
                trajectory.program_id,
                trajectory.sample_index,
            )
        });

        let stats = ScoreStats::from_scores(trajectories.iter().map(|t| t.score));
        let max_score = stats.max().unwrap_or_default();
        let min_score = stats.min().unwrap_or_default();
        let avg_score = stats.average();

        let bucket = Bucket {
            key,
            trajectories,
            max_score,
            min_score,
            avg_score,
            max_to_min_gap: max_score - min_score,
            max_to_avg_gap: max_score - avg_score,
        };
        debug_assert!(
            bucket.min_score <= bucket.avg_score && bucket.avg_score <= bucket.max_score,
            "bucket statistics out of order: min {} avg {} max {}",
            bucket.min_score,
            bucket.avg_score,
            bucket.max_score,
        );
        debug_assert!(bucket.max_to_min_gap >= 0.0 && bucket.max_to_avg_gap >= 0.0);
        bucket
    }

    /// Highest scoring trajectory
    pub fn best(&self) -> Option<&Trajectory> {
        self.trajectories.first()
    }

    /// Lowest scoring trajectory
    pub fn worst(&self) -> Option<&Trajectory> {
        self.trajectories.last()
    }

    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }
}

/// Group trajectories by `key_fn`.
///
/// Buckets are sorted by `max_to_avg_gap` descending, then by `max_score` descending, then by key.
pub fn bucket_by<K, F>(trajectories: impl IntoIterator<Item = Trajectory>, key_fn: F) -> Vec<Bucket<K>>
where
    K: Ord,
    F: Fn(&Trajectory) -> K,
{
    let mut groups: BTreeMap<K, Vec<Trajectory>> = BTreeMap::new();
    for trajectory in trajectories {
        groups.entry(key_fn(&trajectory)).or_default().push(trajectory);
    }

    // BTreeMap iteration is ordered by key, a stable sort keeps that order among equal buckets
    groups
        .into_iter()
        .map(|(key, trajectories)| Bucket::new(key, trajectories))
        .sorted_by_key(|bucket| {
            (
                Reverse(OrderedFloat(bucket.max_to_avg_gap)),
                Reverse(OrderedFloat(bucket.max_score)),
            )
        })
        .collect()
}

/// Group trajectories by their originating example.
pub fn bucket_by_example(trajectories: impl IntoIterator<Item = Trajectory>) -> Vec<Bucket> {
    bucket_by(trajectories, |trajectory| trajectory.example_id)
}
