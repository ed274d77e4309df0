pub mod bucket;
pub mod config;
pub mod context;
pub mod convergence;
pub mod errors;
pub mod executor;
pub mod metric;
pub mod optimizer;
pub mod pool;
pub mod sampler;
pub mod stats;
pub mod strategy;
pub mod temperature;
pub mod tracker;
pub mod trajectory;
pub mod types;
pub mod validation;

#[cfg(test)]
mod fixtures;
#[cfg(test)]
mod tests;

pub use crate::config::OptimizerConfig;
pub use crate::context::RunContext;
pub use crate::errors::{OptimizerError, OptimizerResult};
pub use crate::executor::ProgramExecutor;
pub use crate::metric::Metric;
pub use crate::optimizer::{OptimizationOutcome, Simba, StopReason};
pub use crate::types::{Program, TrainingExample};
