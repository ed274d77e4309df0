use std::panic::AssertUnwindSafe;
use std::time::Duration;

use cancel::CancellationToken;
use futures::FutureExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::StrategyError;
use crate::bucket::Bucket;
use crate::executor::{ProgramExecutor, RuleRequest};
use crate::trajectory::Trajectory;
use crate::types::Program;

#[derive(Debug, Deserialize, Serialize, JsonSchema, Clone, PartialEq)]
pub struct AppendRuleParams {
    /// Minimal `max_to_avg_gap` of a bucket for a rule to be synthesized
    #[serde(default = "default_gap_threshold")]
    pub gap_threshold: f64,
}

impl Default for AppendRuleParams {
    fn default() -> Self {
        AppendRuleParams {
            gap_threshold: default_gap_threshold(),
        }
    }
}

const fn default_gap_threshold() -> f64 {
    0.1
}

/// Ask the backend to contrast a strong and a weak trajectory and append the resulting rule to
/// the program instructions.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendRule {
    pub gap_threshold: f64,
}

impl AppendRule {
    fn contrast<'a>(&self, bucket: &'a Bucket) -> Option<(&'a Trajectory, &'a Trajectory)> {
        if bucket.max_to_avg_gap <= self.gap_threshold {
            return None;
        }
        let better = bucket.best()?;
        let worse = bucket.worst()?;
        (better.score > worse.score).then_some((better, worse))
    }

    pub fn check(&self, bucket: &Bucket, _source: &Program) -> Result<(), StrategyError> {
        match self.contrast(bucket) {
            Some(_) => Ok(()),
            None => Err(StrategyError::skipped(format!(
                "max_to_avg_gap {:.3} of bucket {} is not above {}",
                bucket.max_to_avg_gap, bucket.key, self.gap_threshold
            ))),
        }
    }

    /// Synthesize a rule through the backend.
    ///
    /// The backend call is bounded by `call_timeout` and the run cancellation token. A panicking
    /// backend fails the candidate only.
    pub async fn apply(
        &self,
        bucket: &Bucket,
        source: &Program,
        executor: &dyn ProgramExecutor,
        cancel: &CancellationToken,
        call_timeout: Duration,
    ) -> Result<Program, StrategyError> {
        let Some((better, worse)) = self.contrast(bucket) else {
            return Err(StrategyError::skipped("bucket has no contrasting trajectories"));
        };

        let call = AssertUnwindSafe(executor.propose_rule(RuleRequest {
            program: source,
            better,
            worse,
        }))
        .catch_unwind();
        let rule = match cancel::future::timeout_on_token(cancel.clone(), call_timeout, call).await
        {
            Ok(Ok(Ok(rule))) => rule,
            Ok(Ok(Err(err))) => return Err(StrategyError::failed(err.to_string())),
            Ok(Err(_panic)) => return Err(StrategyError::failed("rule backend panicked")),
            Err(err) => return Err(StrategyError::failed(err.to_string())),
        };

        let rule = rule.trim();
        if rule.is_empty() {
            return Err(StrategyError::failed("backend proposed an empty rule"));
        }
        if source.instructions.contains(rule) {
            return Err(StrategyError::skipped("rule is already part of the instructions"));
        }

        let mut candidate = source.derive();
        if candidate.instructions.trim().is_empty() {
            candidate.instructions = rule.to_string();
        } else {
            candidate.instructions = format!("{}\n\n{rule}", candidate.instructions.trim_end());
        }
        Ok(candidate)
    }
}
