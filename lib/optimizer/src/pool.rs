use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::stats::ScoreStats;
use crate::types::{Program, ProgramId};

/// Program variant together with the scores of every trajectory that used it.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    program: Arc<Program>,
    scores: ScoreStats,
    /// Round in which the entry was inserted
    inserted_round: usize,
}

impl PoolEntry {
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn scores(&self) -> &ScoreStats {
        &self.scores
    }

    pub fn inserted_round(&self) -> usize {
        self.inserted_round
    }
}

/// Candidate program variants of one optimization run.
///
/// The pool has a single owner (the round loop), score updates coming from concurrent workers are
/// applied by that owner as they arrive.
#[derive(Debug, Clone)]
pub struct ProgramPool {
    entries: BTreeMap<ProgramId, PoolEntry>,
    next_id: u64,
}

impl ProgramPool {
    /// Create a pool holding only the baseline program, with no scores yet.
    pub fn with_baseline(baseline: Program) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            ProgramId::BASELINE,
            PoolEntry {
                program: Arc::new(baseline.with_id(ProgramId::BASELINE)),
                scores: ScoreStats::default(),
                inserted_round: 0,
            },
        );
        Self {
            entries,
            next_id: ProgramId::BASELINE.0 + 1,
        }
    }

    /// Reserve an identity for a program which is about to be evaluated.
    pub fn next_program_id(&mut self) -> ProgramId {
        let id = ProgramId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert an evaluated candidate.
    ///
    /// Candidates without scores are not eligible for selection and are rejected.
    pub fn insert_scored(&mut self, program: Arc<Program>, scores: ScoreStats, round: usize) -> bool {
        let Some(id) = program.id() else {
            debug_assert!(false, "candidate program must have an identity");
            return false;
        };
        if scores.is_empty() || id.is_baseline() || self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(
            id,
            PoolEntry {
                program,
                scores,
                inserted_round: round,
            },
        );
        true
    }

    /// Record a trajectory score. Returns `false` if the program is not in the pool anymore.
    pub fn record(&mut self, id: ProgramId, score: f64) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.scores.push(score);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: ProgramId) -> Option<&PoolEntry> {
        self.entries.get(&id)
    }

    pub fn program(&self, id: ProgramId) -> Option<&Arc<Program>> {
        self.entries.get(&id).map(PoolEntry::program)
    }

    pub fn baseline(&self) -> &PoolEntry {
        // The baseline is never evicted
        &self.entries[&ProgramId::BASELINE]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ProgramId> + '_ {
        self.entries.keys().copied()
    }

    /// Programs which may be used as sampling sources: every scored entry plus the baseline.
    pub fn eligible_ids(&self) -> Vec<ProgramId> {
        self.entries
            .iter()
            .filter(|(id, entry)| id.is_baseline() || !entry.scores.is_empty())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Average of all recorded scores of the program, `0.0` if there are none.
    pub fn calculate_average_score(&self, id: ProgramId) -> f64 {
        self.entries
            .get(&id)
            .map_or(0.0, |entry| entry.scores.average())
    }

    /// Pick one of `candidates` with probability proportional to `exp(average_score / temperature)`.
    ///
    /// Returns `None` only if `candidates` is empty.
    pub fn softmax_sample<R: Rng + ?Sized>(
        &self,
        candidates: &[ProgramId],
        temperature: f64,
        rng: &mut R,
    ) -> Option<ProgramId> {
        let (first, _) = candidates.split_first()?;
        let weights = softmax_weights(
            candidates
                .iter()
                .map(|id| self.calculate_average_score(*id)),
            temperature,
        );
        match WeightedIndex::new(&weights) {
            Ok(distribution) => Some(candidates[distribution.sample(rng)]),
            Err(err) => {
                log::warn!("Can't build sampling distribution from {weights:?}: {err}");
                Some(*first)
            }
        }
    }

    /// The `k` programs with the highest average score, plus the baseline if it is not among them.
    ///
    /// Ties are resolved in favour of older programs.
    pub fn top_k_plus_baseline(&self, k: usize) -> Vec<ProgramId> {
        let mut top = self
            .eligible_ids()
            .into_iter()
            .sorted_by_key(|id| (Reverse(OrderedFloat(self.calculate_average_score(*id))), *id))
            .take(k)
            .collect_vec();
        if !top.contains(&ProgramId::BASELINE) {
            top.push(ProgramId::BASELINE);
        }
        top
    }

    /// Keep only [`top_k_plus_baseline`] entries. Returns ids of evicted programs.
    ///
    /// [`top_k_plus_baseline`]: ProgramPool::top_k_plus_baseline
    pub fn prune(&mut self, k: usize) -> Vec<ProgramId> {
        let keep: HashSet<_> = self.top_k_plus_baseline(k).into_iter().collect();
        let evicted = self
            .entries
            .keys()
            .filter(|id| !keep.contains(id))
            .copied()
            .collect_vec();
        for id in &evicted {
            self.entries.remove(id);
        }
        evicted
    }

    /// Program with the highest average score, baseline included. Ties go to the older program.
    pub fn best(&self) -> (ProgramId, f64) {
        self.eligible_ids()
            .into_iter()
            .map(|id| (id, self.calculate_average_score(id)))
            .min_by_key(|(id, score)| (Reverse(OrderedFloat(*score)), *id))
            .unwrap_or((ProgramId::BASELINE, 0.0))
    }
}

/// Normalized `exp(score / temperature)` weights, shifted by the maximum score to avoid overflow.
pub fn softmax_weights(scores: impl IntoIterator<Item = f64>, temperature: f64) -> Vec<f64> {
    let scores = scores.into_iter().collect_vec();
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let weights = scores
        .iter()
        .map(|score| ((score - max) / temperature).exp())
        .collect_vec();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|weight| weight / total).collect()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    /// Pool with a baseline and one candidate per given score list
    fn pool_with_scores(baseline: &[f64], candidates: &[&[f64]]) -> ProgramPool {
        let mut pool = ProgramPool::with_baseline(Program::new("baseline"));
        for score in baseline {
            pool.record(ProgramId::BASELINE, *score);
        }
        for scores in candidates {
            let id = pool.next_program_id();
            let program = Arc::new(Program::new(format!("candidate {}", id.0)).with_id(id));
            assert!(pool.insert_scored(program, ScoreStats::from_scores(scores.iter().copied()), 1));
        }
        pool
    }

    #[test]
    fn test_average_score_of_unscored_program_is_zero() {
        let pool = ProgramPool::with_baseline(Program::new("baseline"));
        assert_eq!(pool.calculate_average_score(ProgramId::BASELINE), 0.0);
        assert_eq!(pool.calculate_average_score(ProgramId(42)), 0.0);
    }

    #[test]
    fn test_average_score_uses_all_records() {
        let pool = pool_with_scores(&[0.2, 0.4, 0.6], &[]);
        assert_relative_eq!(pool.calculate_average_score(ProgramId::BASELINE), 0.4);
    }

    #[test]
    fn test_unscored_candidate_is_rejected() {
        let mut pool = ProgramPool::with_baseline(Program::new("baseline"));
        let id = pool.next_program_id();
        let program = Arc::new(Program::new("candidate").with_id(id));
        assert!(!pool.insert_scored(program, ScoreStats::default(), 1));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_softmax_low_temperature_is_greedy() {
        let pool = pool_with_scores(&[0.4], &[&[0.5], &[0.9], &[0.3]]);
        let candidates = pool.eligible_ids();
        let mut rng = StdRng::seed_from_u64(42);

        let best_hits = (0..1000)
            .filter(|_| pool.softmax_sample(&candidates, 1e-4, &mut rng) == Some(ProgramId(2)))
            .count();

        assert_eq!(best_hits, 1000);
    }

    #[test]
    fn test_softmax_high_temperature_is_uniform() {
        let pool = pool_with_scores(&[0.0], &[&[1.0]]);
        let candidates = pool.eligible_ids();
        let mut rng = StdRng::seed_from_u64(7);

        let baseline_hits = (0..10_000)
            .filter(|_| {
                pool.softmax_sample(&candidates, 1e6, &mut rng) == Some(ProgramId::BASELINE)
            })
            .count();

        // Expect ~5000 hits
        assert!((4500..5500).contains(&baseline_hits), "{baseline_hits}");
    }

    #[test]
    fn test_softmax_prefers_live_scores() {
        // Same structure, swapped scores: the preferred program must follow the data
        let mut rng = StdRng::seed_from_u64(1);
        for (baseline, candidate, expected) in [
            (0.9, 0.1, ProgramId::BASELINE),
            (0.1, 0.9, ProgramId(1)),
        ] {
            let pool = pool_with_scores(&[baseline], &[&[candidate]]);
            let hits = (0..1000)
                .filter(|_| pool.softmax_sample(&pool.eligible_ids(), 0.1, &mut rng) == Some(expected))
                .count();
            assert!(hits > 900, "{hits}");
        }
    }

    #[test]
    fn test_softmax_empty_candidates() {
        let pool = ProgramPool::with_baseline(Program::new("baseline"));
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(pool.softmax_sample(&[], 1.0, &mut rng), None);
    }

    #[test]
    fn test_top_k_keeps_baseline() {
        let pool = pool_with_scores(&[0.1], &[&[0.5], &[0.9], &[0.3]]);
        assert_eq!(
            pool.top_k_plus_baseline(2),
            vec![ProgramId(2), ProgramId(1), ProgramId::BASELINE]
        );
        assert_eq!(
            pool.top_k_plus_baseline(4),
            vec![ProgramId(2), ProgramId(1), ProgramId(3), ProgramId::BASELINE]
        );
    }

    #[test]
    fn test_prune_evicts_lowest() {
        let mut pool = pool_with_scores(&[0.1], &[&[0.5], &[0.9], &[0.3]]);
        let evicted = pool.prune(2);
        assert_eq!(evicted, vec![ProgramId(3)]);
        assert_eq!(pool.len(), 3);
        assert!(pool.get(ProgramId::BASELINE).is_some());
        assert_eq!(pool.best(), (ProgramId(2), 0.9));
    }

    #[test]
    fn test_best_prefers_baseline_on_tie() {
        let pool = pool_with_scores(&[0.5], &[&[0.5]]);
        assert_eq!(pool.best(), (ProgramId::BASELINE, 0.5));
    }

    proptest! {
        #[test]
        fn top_k_always_contains_baseline(
            baseline in prop::collection::vec(0.0..1.0f64, 0..5),
            candidates in prop::collection::vec(prop::collection::vec(0.0..1.0f64, 1..5), 0..10),
            k in 1usize..12,
        ) {
            let candidates = candidates.iter().map(Vec::as_slice).collect_vec();
            let mut pool = pool_with_scores(&baseline, &candidates);

            let top = pool.top_k_plus_baseline(k);
            prop_assert!(top.contains(&ProgramId::BASELINE));
            prop_assert!(top.len() <= k + 1);

            pool.prune(k);
            prop_assert!(pool.len() <= k + 1);
            prop_assert!(pool.get(ProgramId::BASELINE).is_some());
        }

        #[test]
        fn softmax_weights_are_distribution(
            scores in prop::collection::vec(-10.0..10.0f64, 1..20),
            temperature in 1e-6..1e3f64,
        ) {
            let weights = softmax_weights(scores, temperature);
            let total: f64 = weights.iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
            prop_assert!(weights.iter().all(|w| w.is_finite() && *w >= 0.0));
        }
    }
}
