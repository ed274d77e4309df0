use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

use crate::types::{Fields, TrainingExample};

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Metric failed: {reason}")]
pub struct MetricError {
    pub reason: String,
}

impl MetricError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Caller supplied scoring function.
///
/// Implemented for plain closures `Fn(&TrainingExample, &Fields) -> f64`.
pub trait Metric: Send + Sync {
    fn score(&self, example: &TrainingExample, outputs: &Fields) -> Result<f64, MetricError>;
}

impl<F> Metric for F
where
    F: Fn(&TrainingExample, &Fields) -> f64 + Send + Sync,
{
    fn score(&self, example: &TrainingExample, outputs: &Fields) -> Result<f64, MetricError> {
        Ok(self(example, outputs))
    }
}

/// Outcome of scoring one program response
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub score: f64,
    pub success: bool,
    pub failure_reason: Option<String>,
}

/// Turns metric results into bounded scores, absorbing metric failures.
#[derive(Clone)]
pub struct MetricEvaluator {
    metric: Arc<dyn Metric>,
    min_score: f64,
    max_score: f64,
}

impl MetricEvaluator {
    pub fn new(metric: Arc<dyn Metric>, (min_score, max_score): (f64, f64)) -> Self {
        debug_assert!(min_score < max_score);
        Self {
            metric,
            min_score,
            max_score,
        }
    }

    pub fn min_score(&self) -> f64 {
        self.min_score
    }

    pub fn failure(&self, reason: impl Into<String>) -> Evaluation {
        Evaluation {
            score: self.min_score,
            success: false,
            failure_reason: Some(reason.into()),
        }
    }

    pub fn evaluate(&self, example: &TrainingExample, outputs: &Fields) -> Evaluation {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.metric.score(example, outputs)));

        match result {
            Ok(Ok(score)) if score.is_finite() => Evaluation {
                score: score.clamp(self.min_score, self.max_score),
                success: true,
                failure_reason: None,
            },
            Ok(Ok(score)) => self.failure(format!("metric returned non-finite score {score}")),
            Ok(Err(err)) => self.failure(err.to_string()),
            Err(panic) => self.failure(format!("metric panicked: {}", panic_message(&*panic))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
