//! Mutation strategies producing candidate programs from buckets.
//!
//! The set of strategies is closed: configuration is resolved into a [`StrategyRegistry`] once,
//! when the optimizer is created.

pub mod append_demo;
pub mod append_rule;

use std::collections::HashSet;
use std::time::Duration;

use cancel::CancellationToken;
use itertools::Itertools;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use thiserror::Error;

pub use self::append_demo::{AppendDemo, AppendDemoParams};
pub use self::append_rule::{AppendRule, AppendRuleParams};
use crate::bucket::Bucket;
use crate::config::StrategyConfig;
use crate::errors::{OptimizerError, OptimizerResult};
use crate::executor::ProgramExecutor;
use crate::types::Program;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    /// Strategy does not apply to the bucket
    #[error("skipped: {reason}")]
    Skipped { reason: String },
    /// Strategy applied but could not produce a valid candidate
    #[error("failed: {reason}")]
    Failed { reason: String },
}

impl StrategyError {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StrategyError::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        StrategyError::Failed {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    AppendDemo(AppendDemo),
    AppendRule(AppendRule),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::AppendDemo(_) => "append_demo",
            Strategy::AppendRule(_) => "append_rule",
        }
    }

    /// Check whether the strategy can produce a candidate for this bucket and source program.
    pub fn check(&self, bucket: &Bucket, source: &Program) -> Result<(), StrategyError> {
        match self {
            Strategy::AppendDemo(strategy) => strategy.check(bucket, source),
            Strategy::AppendRule(strategy) => strategy.check(bucket, source),
        }
    }

    /// Produce a new candidate program. The source program is never modified.
    ///
    /// Backend calls are bounded by `call_timeout` and stop once `cancel` is triggered.
    pub async fn apply(
        &self,
        bucket: &Bucket,
        source: &Program,
        executor: &dyn ProgramExecutor,
        cancel: &CancellationToken,
        call_timeout: Duration,
    ) -> Result<Program, StrategyError> {
        let candidate = match self {
            Strategy::AppendDemo(strategy) => strategy.apply(bucket, source)?,
            Strategy::AppendRule(strategy) => {
                strategy
                    .apply(bucket, source, executor, cancel, call_timeout)
                    .await?
            }
        };
        if candidate.same_content(source) || candidate.id().is_some() {
            return Err(StrategyError::failed(format!(
                "{} produced an invalid candidate",
                self.name()
            )));
        }
        Ok(candidate)
    }
}

/// Configured strategies with their normalized selection weights.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    strategies: Vec<(Strategy, f64)>,
}

impl StrategyRegistry {
    /// Resolve strategy configuration.
    ///
    /// Weights must be finite and non-negative. They are normalized to sum to 1, unless they are all
    /// zero, in which case strategies are chosen uniformly.
    pub fn from_config(
        configs: &[StrategyConfig],
        quality_threshold: f64,
    ) -> OptimizerResult<StrategyRegistry> {
        if configs.is_empty() {
            return Err(OptimizerError::bad_config(
                "at least one strategy must be configured",
            ));
        }

        let mut seen = HashSet::new();
        let mut strategies = Vec::with_capacity(configs.len());
        for config in configs {
            let weight = config.weight();
            if !weight.is_finite() || weight < 0.0 {
                return Err(OptimizerError::bad_config(format!(
                    "weight of strategy {} must be a non-negative number, got {weight}",
                    config.name()
                )));
            }
            if !seen.insert(config.name()) {
                return Err(OptimizerError::bad_config(format!(
                    "strategy {} is configured more than once",
                    config.name()
                )));
            }

            let strategy = match config {
                StrategyConfig::AppendDemo { params, .. } => {
                    if params.max_demos == 0 {
                        return Err(OptimizerError::bad_config(
                            "append_demo.max_demos must be 1 or larger",
                        ));
                    }
                    let min_score = params.min_score.unwrap_or(quality_threshold);
                    if !min_score.is_finite() {
                        return Err(OptimizerError::bad_config(
                            "append_demo.min_score must be a finite number",
                        ));
                    }
                    Strategy::AppendDemo(AppendDemo {
                        max_demos: params.max_demos,
                        min_score,
                    })
                }
                StrategyConfig::AppendRule { params, .. } => {
                    if !(params.gap_threshold.is_finite() && params.gap_threshold >= 0.0) {
                        return Err(OptimizerError::bad_config(
                            "append_rule.gap_threshold must be a non-negative number",
                        ));
                    }
                    Strategy::AppendRule(AppendRule {
                        gap_threshold: params.gap_threshold,
                    })
                }
            };
            strategies.push((strategy, weight));
        }

        let total: f64 = strategies.iter().map(|(_, weight)| weight).sum();
        let uniform = 1.0 / strategies.len() as f64;
        for (_, weight) in strategies.iter_mut() {
            *weight = if total > 0.0 { *weight / total } else { uniform };
        }

        Ok(StrategyRegistry { strategies })
    }

    pub fn strategies(&self) -> impl Iterator<Item = (&Strategy, f64)> {
        self.strategies
            .iter()
            .map(|(strategy, weight)| (strategy, *weight))
    }

    /// Weighted random choice among strategies applicable to the bucket.
    ///
    /// Strategies configured with zero weight are never chosen, unless every weight was zero.
    pub fn choose<R: Rng + ?Sized>(
        &self,
        bucket: &Bucket,
        source: &Program,
        rng: &mut R,
    ) -> Option<&Strategy> {
        let applicable = self
            .strategies
            .iter()
            .filter(|(strategy, weight)| *weight > 0.0 && strategy.check(bucket, source).is_ok())
            .collect_vec();
        let weights = applicable.iter().map(|(_, weight)| *weight).collect_vec();
        let distribution = WeightedIndex::new(&weights).ok()?;
        applicable
            .get(distribution.sample(rng))
            .copied()
            .map(|(strategy, _)| strategy)
    }
}
