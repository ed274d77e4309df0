use thiserror::Error;
use validator::ValidationErrors;

use crate::validation;

/// Fatal errors of an optimization run.
///
/// Per-trajectory and per-candidate failures are recovered inside the round loop and never
/// surface here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("Wrong configuration: {description}")]
    BadConfig { description: String },
    #[error("Wrong input: {description}")]
    BadInput { description: String },
    #[error("Service internal error: {error}")]
    ServiceError { error: String },
}

impl OptimizerError {
    pub fn bad_config(description: impl Into<String>) -> OptimizerError {
        OptimizerError::BadConfig {
            description: description.into(),
        }
    }

    pub fn bad_input(description: impl Into<String>) -> OptimizerError {
        OptimizerError::BadInput {
            description: description.into(),
        }
    }

    pub fn service_error(error: impl Into<String>) -> OptimizerError {
        OptimizerError::ServiceError {
            error: error.into(),
        }
    }
}

impl From<ValidationErrors> for OptimizerError {
    fn from(errs: ValidationErrors) -> Self {
        OptimizerError::BadConfig {
            description: validation::label_errors("Optimizer configuration", &errs),
        }
    }
}

pub type OptimizerResult<T> = Result<T, OptimizerError>;
