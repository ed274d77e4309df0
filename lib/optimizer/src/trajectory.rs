use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stats::ScoreStats;
use crate::types::{ExampleId, Fields, ProgramId};

pub const FAILURE_REASON_KEY: &str = "failure_reason";

/// Record of one program execution against one training example.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Trajectory {
    pub program_id: ProgramId,
    pub example_id: ExampleId,
    /// Round the trajectory was produced in
    pub round: usize,
    /// Position of the work item in the sampling plan
    pub sample_index: usize,
    pub inputs: Fields,
    /// `None` when execution failed
    pub outputs: Option<Fields>,
    pub score: f64,
    pub success: bool,
    pub duration: Duration,
    #[serde(default)]
    pub metadata: Fields,
}

impl Trajectory {
    pub fn failure_reason(&self) -> Option<&str> {
        self.metadata
            .get(FAILURE_REASON_KEY)
            .and_then(|reason| reason.as_str())
    }

    /// Execution was aborted by run cancellation, the score says nothing about the program
    pub fn was_cancelled(&self) -> bool {
        !self.success
            && self
                .failure_reason()
                .is_some_and(|reason| reason == cancel::Error::Cancelled.to_string())
    }
}

/// Bounded store of recent trajectories.
///
/// Trajectories over the retention cap are folded into per-example summaries on [`compact`],
/// oldest first. Compaction is expected to run between rounds only.
///
/// [`compact`]: TrajectoryStore::compact
#[derive(Debug, Clone)]
pub struct TrajectoryStore {
    retention: usize,
    recent: VecDeque<Trajectory>,
    summaries: BTreeMap<ExampleId, ScoreStats>,
    evicted: usize,
}

impl TrajectoryStore {
    pub fn new(retention: usize) -> Self {
        Self {
            retention,
            recent: VecDeque::new(),
            summaries: BTreeMap::new(),
            evicted: 0,
        }
    }

    pub fn push(&mut self, trajectory: Trajectory) {
        self.recent.push_back(trajectory);
    }

    pub fn extend(&mut self, trajectories: impl IntoIterator<Item = Trajectory>) {
        self.recent.extend(trajectories);
    }

    /// Evict trajectories over the retention cap, returns how many were summarized.
    pub fn compact(&mut self) -> usize {
        let excess = self.recent.len().saturating_sub(self.retention);
        for trajectory in self.recent.drain(..excess) {
            self.summaries
                .entry(trajectory.example_id)
                .or_default()
                .push(trajectory.score);
        }
        self.evicted += excess;
        excess
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    /// Number of trajectories folded into summaries so far
    pub fn evicted(&self) -> usize {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trajectory> {
        self.recent.iter()
    }

    /// Score statistics of an example over every trajectory ever stored, evicted ones included.
    pub fn example_stats(&self, example_id: ExampleId) -> ScoreStats {
        let mut stats = self
            .summaries
            .get(&example_id)
            .copied()
            .unwrap_or_default();
        stats.merge(&ScoreStats::from_scores(
            self.recent
                .iter()
                .filter(|trajectory| trajectory.example_id == example_id)
                .map(|trajectory| trajectory.score),
        ));
        stats
    }
}
