use std::collections::HashSet;

use itertools::Itertools;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::StrategyError;
use crate::bucket::Bucket;
use crate::trajectory::Trajectory;
use crate::types::{Demo, Program};

#[derive(Debug, Deserialize, Serialize, JsonSchema, Clone, PartialEq)]
pub struct AppendDemoParams {
    /// Maximum number of demonstrations a program may hold
    #[serde(default = "default_max_demos")]
    pub max_demos: usize,
    /// Minimal trajectory score for it to become a demonstration.
    /// Defaults to `quality_threshold`.
    #[serde(default)]
    pub min_score: Option<f64>,
}

impl Default for AppendDemoParams {
    fn default() -> Self {
        AppendDemoParams {
            max_demos: default_max_demos(),
            min_score: None,
        }
    }
}

const fn default_max_demos() -> usize {
    4
}

/// Turn the best successful trajectory of a bucket into a demonstration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendDemo {
    pub max_demos: usize,
    pub min_score: f64,
}

impl AppendDemo {
    fn pick<'a>(&self, bucket: &'a Bucket, source: &Program) -> Option<&'a Trajectory> {
        bucket.trajectories.iter().find(|trajectory| {
            trajectory.success
                && trajectory.outputs.is_some()
                && trajectory.score >= self.min_score
                && !source.has_demo_for(&trajectory.inputs)
        })
    }

    pub fn check(&self, bucket: &Bucket, source: &Program) -> Result<(), StrategyError> {
        match self.pick(bucket, source) {
            Some(_) => Ok(()),
            None => Err(StrategyError::skipped(format!(
                "no new trajectory scoring at least {} in bucket {}",
                self.min_score, bucket.key
            ))),
        }
    }

    pub fn apply(&self, bucket: &Bucket, source: &Program) -> Result<Program, StrategyError> {
        let Some(trajectory) = self.pick(bucket, source) else {
            return Err(StrategyError::skipped("no demonstration candidate"));
        };
        let Some(outputs) = &trajectory.outputs else {
            return Err(StrategyError::skipped("trajectory has no outputs"));
        };

        let mut candidate = source.derive();
        let excess = (candidate.demos.len() + 1).saturating_sub(self.max_demos);
        if excess > 0 {
            // Evict the weakest demos, the oldest ones on ties
            let evicted = candidate
                .demos
                .iter()
                .enumerate()
                .sorted_by(|(a_idx, a), (b_idx, b)| {
                    a.score.total_cmp(&b.score).then(a_idx.cmp(b_idx))
                })
                .take(excess)
                .map(|(idx, _)| idx)
                .collect::<HashSet<_>>();
            let mut idx = 0;
            candidate.demos.retain(|_| {
                let keep = !evicted.contains(&idx);
                idx += 1;
                keep
            });
        }
        candidate.demos.push(Demo {
            inputs: trajectory.inputs.clone(),
            outputs: outputs.clone(),
            score: trajectory.score,
        });
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::bucket::bucket_by_example;
    use crate::fixtures::{fields, trajectory_with_io};
    use crate::types::{ExampleId, ProgramId};

    fn strategy(max_demos: usize) -> AppendDemo {
        AppendDemo {
            max_demos,
            min_score: 0.6,
        }
    }

    fn demo(question: &str, score: f64) -> Demo {
        Demo {
            inputs: fields([("question", json!(question))]),
            outputs: fields([("answer", json!("x"))]),
            score,
        }
    }

    #[test]
    fn test_appends_best_trajectory() {
        let buckets = bucket_by_example([
            trajectory_with_io(ProgramId(0), ExampleId(0), "q0", "wrong", 0.2),
            trajectory_with_io(ProgramId(1), ExampleId(0), "q0", "right", 1.0),
        ]);
        let source = Program::new("Answer.");

        let strategy = strategy(2);
        strategy.check(&buckets[0], &source).unwrap();
        let candidate = strategy.apply(&buckets[0], &source).unwrap();

        assert_eq!(candidate.demos.len(), 1);
        assert_eq!(candidate.demos[0].outputs["answer"], json!("right"));
        assert_eq!(candidate.demos[0].score, 1.0);
        assert!(source.demos.is_empty(), "source program must stay untouched");
    }

    #[test]
    fn test_skips_when_nothing_scores_high() {
        let buckets = bucket_by_example([trajectory_with_io(
            ProgramId(0),
            ExampleId(0),
            "q0",
            "wrong",
            0.5,
        )]);
        let err = strategy(2)
            .check(&buckets[0], &Program::new("Answer."))
            .unwrap_err();
        assert!(matches!(err, StrategyError::Skipped { .. }));
    }

    #[test]
    fn test_skips_already_present_demo() {
        let buckets = bucket_by_example([trajectory_with_io(
            ProgramId(0),
            ExampleId(0),
            "q0",
            "right",
            1.0,
        )]);
        let mut source = Program::new("Answer.");
        source.demos.push(demo("q0", 1.0));

        assert!(strategy(2).check(&buckets[0], &source).is_err());
    }

    #[test]
    fn test_evicts_weakest_demo_on_overflow() {
        let buckets = bucket_by_example([trajectory_with_io(
            ProgramId(0),
            ExampleId(0),
            "q-new",
            "right",
            0.9,
        )]);
        let mut source = Program::new("Answer.");
        source.demos = vec![demo("q-a", 0.8), demo("q-b", 0.7), demo("q-c", 0.7)];

        let candidate = strategy(3).apply(&buckets[0], &source).unwrap();

        let questions: Vec<_> = candidate
            .demos
            .iter()
            .map(|demo| demo.inputs["question"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(questions, vec!["q-a", "q-c", "q-new"]);
    }

    #[test]
    fn test_overfull_source_keeps_new_demo() {
        let buckets = bucket_by_example([trajectory_with_io(
            ProgramId(0),
            ExampleId(0),
            "q-new",
            "right",
            0.9,
        )]);
        let mut source = Program::new("Answer.");
        source.demos = [0.8, 0.7, 0.75, 0.95, 0.85, 0.65]
            .into_iter()
            .enumerate()
            .map(|(i, score)| demo(&format!("q{i}"), score))
            .collect();

        let candidate = strategy(4).apply(&buckets[0], &source).unwrap();

        let questions: Vec<_> = candidate
            .demos
            .iter()
            .map(|demo| demo.inputs["question"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(questions, vec!["q0", "q3", "q4", "q-new"]);
        assert_eq!(source.demos.len(), 6);
    }
}
