use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{OptimizerError, OptimizerResult};
use crate::strategy::{AppendDemoParams, AppendRuleParams};
use crate::temperature::TemperatureSchedule;

/// Rough upper bound of the memory taken by one retained trajectory
pub const ESTIMATED_TRAJECTORY_BYTES: usize = 4 * 1024;

/// Order in which training examples are drawn for a round
#[derive(Debug, Deserialize, Serialize, JsonSchema, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExampleOrder {
    /// Uniform random, without replacement unless the trainset is smaller than the batch
    #[default]
    Random,
    /// Walk the trainset in order, wrapping around
    Sequential,
    /// Walk the given trainset indices in order, wrapping around
    Custom(Vec<usize>),
}

/// Mutation strategy with its selection weight
#[derive(Debug, Deserialize, Serialize, JsonSchema, Clone, PartialEq)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum StrategyConfig {
    AppendDemo {
        #[serde(default = "default_strategy_weight")]
        weight: f64,
        #[serde(default)]
        params: AppendDemoParams,
    },
    AppendRule {
        #[serde(default = "default_strategy_weight")]
        weight: f64,
        #[serde(default)]
        params: AppendRuleParams,
    },
}

impl StrategyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyConfig::AppendDemo { .. } => "append_demo",
            StrategyConfig::AppendRule { .. } => "append_rule",
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            StrategyConfig::AppendDemo { weight, .. } | StrategyConfig::AppendRule { weight, .. } => {
                *weight
            }
        }
    }
}

#[derive(Debug, Deserialize, Serialize, JsonSchema, Validate, Clone, PartialEq)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum number of optimization rounds
    #[validate(range(min = 1))]
    pub max_steps: usize,
    /// Number of training examples sampled per round
    #[validate(range(min = 1))]
    pub bsize: usize,
    /// Program variants sampled per example. Also the number of programs kept in the pool on top of
    /// the baseline, and the maximal number of candidates proposed per round.
    #[validate(range(min = 1))]
    pub num_candidates: usize,
    /// Maximal number of program executions running at the same time
    #[serde(alias = "num_threads")]
    #[validate(range(min = 1))]
    pub max_concurrency: usize,
    /// Timeout of a single program execution
    #[validate(range(min = 1))]
    pub call_timeout_ms: u64,
    /// Trajectories scoring at least this much are considered good enough to become demonstrations
    pub quality_threshold: f64,
    /// Number of rounds without sufficient improvement before stopping
    #[validate(range(min = 1))]
    pub early_stopping_patience: usize,
    /// Best score must grow by more than this to count as an improvement
    #[validate(range(min = 0.0))]
    pub min_improvement_threshold: f64,
    /// Number of rounds with exactly the same best score before stopping
    #[validate(range(min = 1))]
    pub plateau_rounds: usize,
    /// Maximal number of full trajectories kept in memory
    #[validate(range(min = 1))]
    pub trajectory_retention: usize,
    #[validate(range(min = 1))]
    pub memory_limit_mb: usize,
    /// Softmax temperature used to choose program variants
    pub temperature: f64,
    pub temperature_schedule: TemperatureSchedule,
    pub example_order: ExampleOrder,
    /// Inclusive range scores are clamped into
    pub score_range: (f64, f64),
    /// Seed of the run random generator. Random if not set.
    pub seed: Option<u64>,
    pub strategies: Vec<StrategyConfig>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            max_steps: 8,
            bsize: 32,
            num_candidates: 6,
            max_concurrency: default_max_concurrency(),
            call_timeout_ms: 60_000,
            quality_threshold: 0.5,
            early_stopping_patience: 3,
            min_improvement_threshold: 0.001,
            plateau_rounds: 5,
            trajectory_retention: 10_000,
            memory_limit_mb: 512,
            temperature: 0.2,
            temperature_schedule: TemperatureSchedule::default(),
            example_order: ExampleOrder::default(),
            score_range: (0.0, 1.0),
            seed: None,
            strategies: vec![
                StrategyConfig::AppendDemo {
                    weight: 0.5,
                    params: AppendDemoParams::default(),
                },
                StrategyConfig::AppendRule {
                    weight: 0.5,
                    params: AppendRuleParams::default(),
                },
            ],
        }
    }
}

impl OptimizerConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Check everything which can be checked without the trainset.
    ///
    /// Strategy settings are checked when they are resolved into a registry.
    pub fn check(&self) -> OptimizerResult<()> {
        self.validate()?;

        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(OptimizerError::bad_config(format!(
                "temperature must be a positive finite number, got {}",
                self.temperature
            )));
        }
        self.temperature_schedule
            .check(self.temperature)
            .map_err(|err| OptimizerError::bad_config(format!("temperature_schedule: {err}")))?;

        let (min_score, max_score) = self.score_range;
        if !(min_score.is_finite() && max_score.is_finite() && min_score < max_score) {
            return Err(OptimizerError::bad_config(format!(
                "score_range must be an ordered pair of finite numbers, got [{min_score}, {max_score}]"
            )));
        }
        if !self.quality_threshold.is_finite() {
            return Err(OptimizerError::bad_config(
                "quality_threshold must be a finite number",
            ));
        }
        if !self.min_improvement_threshold.is_finite() {
            return Err(OptimizerError::bad_config(
                "min_improvement_threshold must be a finite number",
            ));
        }

        if let ExampleOrder::Custom(order) = &self.example_order {
            if order.is_empty() {
                return Err(OptimizerError::bad_config(
                    "custom example_order must list at least one example",
                ));
            }
        }

        let retention_bytes = self
            .trajectory_retention
            .saturating_mul(ESTIMATED_TRAJECTORY_BYTES);
        if retention_bytes > self.memory_limit_mb.saturating_mul(1024 * 1024) {
            return Err(OptimizerError::bad_config(format!(
                "trajectory_retention {} needs about {} MB, above memory_limit_mb {}",
                self.trajectory_retention,
                retention_bytes.div_ceil(1024 * 1024),
                self.memory_limit_mb
            )));
        }
        // Sampling and candidate evaluation each take up to `bsize * num_candidates` per round
        let per_round = self
            .bsize
            .saturating_mul(self.num_candidates)
            .saturating_mul(2);
        if self.trajectory_retention < per_round {
            return Err(OptimizerError::bad_config(format!(
                "trajectory_retention {} can't hold the {per_round} trajectories produced per round",
                self.trajectory_retention
            )));
        }

        Ok(())
    }
}

fn default_max_concurrency() -> usize {
    std::cmp::max(1, num_cpus::get())
}

const fn default_strategy_weight() -> f64 {
    1.0
}
