use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ProgramId;

/// Number of last round summaries to keep in the round log
const KEEP_LAST_ROUNDS: usize = 16;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Completed,
    /// Round was interrupted by cancellation, its numbers cover the work done until then
    Cancelled,
}

/// What happened in one optimization round
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RoundSummary {
    pub round: usize,
    pub status: RoundStatus,
    pub temperature: f64,
    /// Trajectories recorded in this round, candidate evaluations included
    pub trajectories: usize,
    pub failed_trajectories: usize,
    pub candidates_proposed: usize,
    pub candidates_inserted: usize,
    pub candidates_skipped: usize,
    pub best_program: ProgramId,
    pub best_score: f64,
    pub pool_size: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RoundSummary {
    pub fn start(round: usize, temperature: f64) -> Self {
        let now = Utc::now();
        Self {
            round,
            status: RoundStatus::Completed,
            temperature,
            trajectories: 0,
            failed_trajectories: 0,
            candidates_proposed: 0,
            candidates_inserted: 0,
            candidates_skipped: 0,
            best_program: ProgramId::BASELINE,
            best_score: 0.0,
            pool_size: 0,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn finish(&mut self, status: RoundStatus) {
        self.status = status;
        self.finished_at = Utc::now();
    }
}

/// Counters accumulated over the whole run
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct RunTotals {
    pub rounds: usize,
    pub trajectories: usize,
    pub failed_trajectories: usize,
    pub candidates_proposed: usize,
    pub candidates_inserted: usize,
    pub candidates_skipped: usize,
}

/// A log of the latest rounds of a run
#[derive(Default, Clone, Debug, Serialize, Deserialize)]
pub struct RoundLog {
    rounds: VecDeque<RoundSummary>,
    totals: RunTotals,
}

impl RoundLog {
    pub fn register(&mut self, summary: RoundSummary) {
        self.totals.rounds += 1;
        self.totals.trajectories += summary.trajectories;
        self.totals.failed_trajectories += summary.failed_trajectories;
        self.totals.candidates_proposed += summary.candidates_proposed;
        self.totals.candidates_inserted += summary.candidates_inserted;
        self.totals.candidates_skipped += summary.candidates_skipped;

        self.rounds.push_back(summary);
        while self.rounds.len() > KEEP_LAST_ROUNDS {
            self.rounds.pop_front();
        }
    }

    pub fn totals(&self) -> &RunTotals {
        &self.totals
    }

    pub fn last(&self) -> Option<&RoundSummary> {
        self.rounds.back()
    }

    /// Kept summaries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &RoundSummary> {
        self.rounds.iter()
    }

    /// Kept summaries for telemetry, latest first
    pub fn to_telemetry(&self) -> Vec<RoundSummary> {
        self.rounds.iter().rev().cloned().collect()
    }
}
