use cancel::CancellationToken;
use uuid::Uuid;

/// Caller-owned state of one optimization run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Correlates log lines of the run
    pub run_id: Uuid,
    /// Stops the run at the next round boundary, in-flight executions are aborted
    pub cancel: CancellationToken,
    /// Overrides the configured seed
    pub seed: Option<u64>,
}

impl RunContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            cancel,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}
