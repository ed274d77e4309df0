use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Size of the rolling window of round scores kept for reporting
const SCORE_WINDOW: usize = 32;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceReason {
    /// Best score stayed exactly the same for `plateau_rounds` rounds
    ScorePlateau,
    /// Best score did not grow by more than `min_improvement_threshold` for
    /// `early_stopping_patience` rounds
    MinimalImprovement,
    /// Round limit reached
    MaxSteps,
}

impl fmt::Display for ConvergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConvergenceReason::ScorePlateau => "score_plateau",
            ConvergenceReason::MinimalImprovement => "minimal_improvement",
            ConvergenceReason::MaxSteps => "max_steps",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct ConvergenceSettings {
    pub max_steps: usize,
    pub early_stopping_patience: usize,
    pub min_improvement_threshold: f64,
    pub plateau_rounds: usize,
}

/// Decides when the round loop stops.
///
/// Once converged, the state never goes back to running and further updates are ignored.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ConvergenceState {
    settings: ConvergenceSettings,
    /// Best score of the latest rounds, oldest first
    history: VecDeque<f64>,
    rounds: usize,
    best_score: Option<f64>,
    stalled_rounds: usize,
    flat_rounds: usize,
    converged: bool,
    reason: Option<ConvergenceReason>,
}

impl ConvergenceState {
    pub fn new(settings: ConvergenceSettings) -> Self {
        Self {
            settings,
            history: VecDeque::with_capacity(SCORE_WINDOW),
            rounds: 0,
            best_score: None,
            stalled_rounds: 0,
            flat_rounds: 0,
            converged: false,
            reason: None,
        }
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn reason(&self) -> Option<ConvergenceReason> {
        self.reason
    }

    /// Number of rounds recorded so far
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best_score
    }

    /// Consecutive rounds without an improvement above the threshold
    pub fn stalled_rounds(&self) -> usize {
        self.stalled_rounds
    }

    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }

    /// Record the best score of a finished round.
    ///
    /// Returns the reason if this round made the run converge.
    pub fn update(&mut self, round_best: f64) -> Option<ConvergenceReason> {
        if self.converged {
            return None;
        }

        let previous = self.history.back().copied();
        if self.history.len() == SCORE_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(round_best);
        self.rounds += 1;

        match self.best_score {
            None => self.best_score = Some(round_best),
            Some(best) => {
                if round_best - best > self.settings.min_improvement_threshold {
                    self.stalled_rounds = 0;
                } else {
                    self.stalled_rounds += 1;
                }
                self.best_score = Some(best.max(round_best));
            }
        }

        if previous == Some(round_best) {
            self.flat_rounds += 1;
        } else {
            self.flat_rounds = 0;
        }

        let reason = if self.flat_rounds >= self.settings.plateau_rounds {
            Some(ConvergenceReason::ScorePlateau)
        } else if self.stalled_rounds >= self.settings.early_stopping_patience {
            Some(ConvergenceReason::MinimalImprovement)
        } else if self.rounds >= self.settings.max_steps {
            Some(ConvergenceReason::MaxSteps)
        } else {
            None
        };

        if reason.is_some() {
            self.converged = true;
            self.reason = reason;
        }
        reason
    }
}
