use async_trait::async_trait;
use thiserror::Error;

use crate::trajectory::Trajectory;
use crate::types::{Fields, Program};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Execution failed: {reason}")]
    Failed { reason: String },
    #[error("{what} is not supported by this executor")]
    Unsupported { what: String },
}

impl ExecutionError {
    pub fn failed(reason: impl Into<String>) -> Self {
        ExecutionError::Failed {
            reason: reason.into(),
        }
    }
}

/// Request to contrast two trajectories of the same bucket and derive an instruction addendum.
#[derive(Debug, Clone, Copy)]
pub struct RuleRequest<'a> {
    pub program: &'a Program,
    pub better: &'a Trajectory,
    pub worse: &'a Trajectory,
}

/// Runs programs against a language model backend.
///
/// Implementations are called concurrently from worker tasks and must not rely on call order.
#[async_trait]
pub trait ProgramExecutor: Send + Sync {
    async fn execute(&self, program: &Program, inputs: &Fields) -> Result<Fields, ExecutionError>;

    /// Ask the backend for a natural-language rule that would turn `worse` into `better`.
    async fn propose_rule(&self, _request: RuleRequest<'_>) -> Result<String, ExecutionError> {
        Err(ExecutionError::Unsupported {
            what: "rule synthesis".to_string(),
        })
    }
}
