use std::collections::BTreeMap;
use std::sync::Arc;

use cancel::CancellationToken;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::bucket::bucket_by_example;
use crate::config::{ExampleOrder, OptimizerConfig};
use crate::context::RunContext;
use crate::convergence::{ConvergenceReason, ConvergenceSettings, ConvergenceState};
use crate::errors::{OptimizerError, OptimizerResult};
use crate::executor::ProgramExecutor;
use crate::metric::{Metric, MetricEvaluator};
use crate::pool::ProgramPool;
use crate::sampler::{ExampleSelector, TrajectorySampler};
use crate::stats::ScoreStats;
use crate::strategy::StrategyRegistry;
use crate::tracker::{RoundLog, RoundStatus, RoundSummary};
use crate::trajectory::{Trajectory, TrajectoryStore};
use crate::types::{Program, ProgramId, TrainingExample};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Converged(ConvergenceReason),
    /// Stopped by the caller through the run cancellation token
    Cancelled,
}

/// Result of a finished optimization run
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub run_id: Uuid,
    /// Best scoring program of the final pool, possibly the baseline
    pub program: Program,
    pub program_id: ProgramId,
    /// Average score of `program` over all of its trajectories
    pub score: f64,
    pub stop_reason: StopReason,
    pub convergence: ConvergenceState,
    pub rounds: RoundLog,
    pub trajectories: TrajectoryStore,
}

/// Everything a run mutates. Owned by the round loop only.
struct RunState {
    pool: ProgramPool,
    store: TrajectoryStore,
    selector: ExampleSelector,
    convergence: ConvergenceState,
    log: RoundLog,
    rng: StdRng,
}

/// Stochastic introspective mini-batch ascent over program variants.
///
/// Each round samples trajectories of pool programs on a mini-batch of training examples, proposes
/// mutated candidates from the most informative buckets, evaluates them and keeps the best ones.
pub struct Simba {
    config: OptimizerConfig,
    strategies: StrategyRegistry,
    executor: Arc<dyn ProgramExecutor>,
    evaluator: MetricEvaluator,
}

impl Simba {
    /// Validate the configuration and resolve strategies.
    ///
    /// Nothing is executed before the configuration is known to be valid.
    pub fn new(
        config: OptimizerConfig,
        executor: Arc<dyn ProgramExecutor>,
        metric: Arc<dyn Metric>,
    ) -> OptimizerResult<Self> {
        config.check()?;
        let strategies = StrategyRegistry::from_config(&config.strategies, config.quality_threshold)?;
        let evaluator = MetricEvaluator::new(metric, config.score_range);
        Ok(Self {
            config,
            strategies,
            executor,
            evaluator,
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Optimize `student` on `trainset` and return the best program found.
    pub async fn optimize(
        &self,
        student: Program,
        trainset: Vec<TrainingExample>,
    ) -> OptimizerResult<Program> {
        let outcome = self.run(student, trainset, RunContext::default()).await?;
        Ok(outcome.program)
    }

    /// Run the round loop until convergence or cancellation.
    pub async fn run(
        &self,
        student: Program,
        trainset: Vec<TrainingExample>,
        context: RunContext,
    ) -> OptimizerResult<OptimizationOutcome> {
        self.check_trainset(&trainset)?;

        let seed = context
            .seed
            .or(self.config.seed)
            .unwrap_or_else(rand::random);
        let run_id = context.run_id;
        log::info!(
            "Starting optimization run {run_id}: {} examples, seed {seed}",
            trainset.len()
        );

        let sampler = TrajectorySampler::new(
            self.executor.clone(),
            self.evaluator.clone(),
            trainset.into(),
            self.config.max_concurrency,
            self.config.call_timeout(),
        );
        let mut state = RunState {
            pool: ProgramPool::with_baseline(student.derive()),
            store: TrajectoryStore::new(self.config.trajectory_retention),
            selector: ExampleSelector::new(self.config.example_order.clone()),
            convergence: ConvergenceState::new(ConvergenceSettings {
                max_steps: self.config.max_steps,
                early_stopping_patience: self.config.early_stopping_patience,
                min_improvement_threshold: self.config.min_improvement_threshold,
                plateau_rounds: self.config.plateau_rounds,
            }),
            log: RoundLog::default(),
            rng: StdRng::seed_from_u64(seed),
        };

        let stop_reason = loop {
            if context.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if let Some(reason) = state.convergence.reason() {
                break StopReason::Converged(reason);
            }

            let round = state.convergence.rounds();
            let mut summary = self
                .run_round(round, &sampler, &mut state, &context.cancel)
                .await;

            if context.cancel.is_cancelled() {
                summary.finish(RoundStatus::Cancelled);
                log::info!("Run {run_id} cancelled during round {round}");
                state.log.register(summary);
                break StopReason::Cancelled;
            }

            summary.finish(RoundStatus::Completed);
            log::info!(
                "Run {run_id} round {round}: best {} scores {:.4}, pool {} programs, \
                 {} of {} candidates inserted, {} of {} trajectories failed",
                summary.best_program,
                summary.best_score,
                summary.pool_size,
                summary.candidates_inserted,
                summary.candidates_proposed,
                summary.failed_trajectories,
                summary.trajectories,
            );
            let converged = state.convergence.update(summary.best_score);
            state.log.register(summary);

            if let Some(reason) = converged {
                log::info!("Run {run_id} converged after round {round}: {reason}");
                break StopReason::Converged(reason);
            }
        };

        let (program_id, score) = state.pool.best();
        let program = state
            .pool
            .program(program_id)
            .map(|program| program.as_ref().clone())
            .ok_or_else(|| {
                OptimizerError::service_error(format!("best {program_id} is missing from the pool"))
            })?;

        Ok(OptimizationOutcome {
            run_id,
            program,
            program_id,
            score,
            stop_reason,
            convergence: state.convergence,
            rounds: state.log,
            trajectories: state.store,
        })
    }

    fn check_trainset(&self, trainset: &[TrainingExample]) -> OptimizerResult<()> {
        if trainset.is_empty() {
            return Err(OptimizerError::bad_input("trainset must not be empty"));
        }
        if let ExampleOrder::Custom(order) = &self.config.example_order {
            if let Some(index) = order.iter().find(|index| **index >= trainset.len()) {
                return Err(OptimizerError::bad_input(format!(
                    "custom example_order refers to example {index}, but the trainset has only {} examples",
                    trainset.len()
                )));
            }
        }
        Ok(())
    }

    async fn run_round(
        &self,
        round: usize,
        sampler: &TrajectorySampler,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> RoundSummary {
        let temperature = self.config.temperature_schedule.temperature_for(
            self.config.temperature,
            round,
            self.config.max_steps,
            state.convergence.stalled_rounds(),
        );
        let mut summary = RoundSummary::start(round, temperature);

        // Explore pool programs on a mini-batch
        let examples =
            state
                .selector
                .select(sampler.trainset().len(), self.config.bsize, &mut state.rng);
        let plan = sampler.plan(
            &state.pool,
            &examples,
            self.config.num_candidates,
            temperature,
            &mut state.rng,
        );
        let trajectories = receive_all(sampler.dispatch(plan, round, cancel.clone())).await;

        for trajectory in trajectories.iter().filter(|t| !t.was_cancelled()) {
            if !state.pool.record(trajectory.program_id, trajectory.score) {
                log::debug!(
                    "{} left the pool before its trajectory was recorded",
                    trajectory.program_id
                );
            }
        }
        count_trajectories(&mut summary, &trajectories);
        let buckets = bucket_by_example(trajectories.iter().cloned());
        state.store.extend(trajectories);

        // Propose candidates from the most informative buckets
        let mut candidates: Vec<Program> = Vec::new();
        for bucket in buckets.iter().take(self.config.num_candidates) {
            if cancel.is_cancelled() {
                break;
            }

            let eligible = state.pool.eligible_ids();
            let source_id = state
                .pool
                .softmax_sample(&eligible, temperature, &mut state.rng)
                .unwrap_or(ProgramId::BASELINE);
            let Some(source) = state.pool.program(source_id).cloned() else {
                continue;
            };

            let Some(strategy) = self.strategies.choose(bucket, &source, &mut state.rng) else {
                log::debug!("No strategy applies to {} with {source_id}", bucket.key);
                summary.candidates_skipped += 1;
                continue;
            };

            let proposal = strategy
                .apply(
                    bucket,
                    &source,
                    self.executor.as_ref(),
                    cancel,
                    self.config.call_timeout(),
                )
                .await;
            match proposal {
                Ok(candidate) => {
                    let pooled = state
                        .pool
                        .ids()
                        .filter_map(|id| state.pool.program(id))
                        .map(|program| program.as_ref());
                    let duplicate = candidates
                        .iter()
                        .chain(pooled)
                        .any(|known| known.same_content(&candidate));
                    if duplicate {
                        log::debug!(
                            "{} on {} reproduced a known program, skipping",
                            strategy.name(),
                            bucket.key
                        );
                        summary.candidates_skipped += 1;
                        continue;
                    }
                    log::debug!(
                        "{} proposed a candidate from {source_id} on {}",
                        strategy.name(),
                        bucket.key
                    );
                    summary.candidates_proposed += 1;
                    candidates.push(candidate);
                }
                Err(err) => {
                    log::warn!(
                        "Strategy {} on {} with {source_id} {err}, skipping candidate",
                        strategy.name(),
                        bucket.key
                    );
                    summary.candidates_skipped += 1;
                }
            }
        }

        // Evaluate candidates on the same mini-batch and insert them with their scores
        if !candidates.is_empty() && !cancel.is_cancelled() {
            let candidates = candidates
                .into_iter()
                .map(|candidate| Arc::new(candidate.with_id(state.pool.next_program_id())))
                .collect::<Vec<_>>();
            let plan = TrajectorySampler::plan_evaluation(&candidates, &examples);
            let evaluations = receive_all(sampler.dispatch(plan, round, cancel.clone())).await;

            let mut scores: BTreeMap<ProgramId, ScoreStats> = BTreeMap::new();
            for trajectory in &evaluations {
                scores
                    .entry(trajectory.program_id)
                    .or_default()
                    .push(trajectory.score);
            }
            count_trajectories(&mut summary, &evaluations);
            state.store.extend(evaluations);

            if !cancel.is_cancelled() {
                for candidate in candidates {
                    let Some(id) = candidate.id() else {
                        continue;
                    };
                    let stats = scores.remove(&id).unwrap_or_default();
                    let average = stats.average();
                    if state.pool.insert_scored(candidate, stats, round) {
                        log::debug!("Inserted {id} with average score {average:.4}");
                        summary.candidates_inserted += 1;
                    } else {
                        log::warn!("{id} has no evaluations, skipping candidate");
                        summary.candidates_skipped += 1;
                    }
                }
            }
        }

        let evicted = state.pool.prune(self.config.num_candidates);
        if !evicted.is_empty() {
            log::debug!("Evicted {} programs from the pool", evicted.len());
        }
        let compacted = state.store.compact();
        if compacted > 0 {
            log::debug!("Compacted {compacted} trajectories into example summaries");
        }

        let (best_program, best_score) = state.pool.best();
        summary.best_program = best_program;
        summary.best_score = best_score;
        summary.pool_size = state.pool.len();
        summary
    }
}

/// Drain a dispatch channel and order results by their position in the plan.
///
/// Aggregation is order independent, sorting only keeps the stored history reproducible.
async fn receive_all(mut receiver: mpsc::Receiver<Trajectory>) -> Vec<Trajectory> {
    let mut trajectories = Vec::new();
    while let Some(trajectory) = receiver.recv().await {
        trajectories.push(trajectory);
    }
    trajectories.sort_by_key(|trajectory| trajectory.sample_index);
    trajectories
}

fn count_trajectories(summary: &mut RoundSummary, trajectories: &[Trajectory]) {
    summary.trajectories += trajectories.len();
    summary.failed_trajectories += trajectories.iter().filter(|t| !t.success).count();
}
