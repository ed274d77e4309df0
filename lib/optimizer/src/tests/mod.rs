
use crate::config::OptimizerConfig;
use crate::types::Program;

fn student() -> Program {
    Program::new("Answer the geography question with a single word.")
}

/// Small deterministic configuration for scenario runs
fn scenario_config() -> OptimizerConfig {
    OptimizerConfig {
        max_steps: 5,
        bsize: 10,
        num_candidates: 3,
        max_concurrency: 4,
        quality_threshold: 0.6,
        plateau_rounds: 10,
        seed: Some(42),
        ..Default::default()
    }
}
