use std::f64::consts::PI;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How the sampling temperature evolves across rounds.
#[derive(Debug, Deserialize, Serialize, JsonSchema, Clone, Copy, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemperatureSchedule {
    /// Same temperature every round
    #[default]
    Constant,
    /// Linear interpolation from the base temperature down to `min_temperature` on the last round
    Linear { min_temperature: f64 },
    /// Multiply by `decay_rate` every round, never going below `min_temperature`
    Exponential {
        decay_rate: f64,
        min_temperature: f64,
    },
    /// Half cosine from the base temperature down to `min_temperature`
    Cosine { min_temperature: f64 },
    /// Grow by `boost` for every round without improvement, up to `max_temperature`
    Adaptive { boost: f64, max_temperature: f64 },
}

impl TemperatureSchedule {
    /// Check the schedule against the base temperature.
    pub fn check(&self, base: f64) -> Result<(), String> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(format!("{name} must be a positive finite number, got {value}"))
            }
        };

        match *self {
            TemperatureSchedule::Constant => Ok(()),
            TemperatureSchedule::Linear { min_temperature }
            | TemperatureSchedule::Cosine { min_temperature } => {
                positive("min_temperature", min_temperature)?;
                if min_temperature > base {
                    return Err(format!(
                        "min_temperature {min_temperature} is larger than temperature {base}"
                    ));
                }
                Ok(())
            }
            TemperatureSchedule::Exponential {
                decay_rate,
                min_temperature,
            } => {
                positive("min_temperature", min_temperature)?;
                if !(decay_rate > 0.0 && decay_rate <= 1.0) {
                    return Err(format!("decay_rate must be in (0, 1], got {decay_rate}"));
                }
                Ok(())
            }
            TemperatureSchedule::Adaptive {
                boost,
                max_temperature,
            } => {
                if !(boost.is_finite() && boost >= 0.0) {
                    return Err(format!("boost must be a non-negative number, got {boost}"));
                }
                positive("max_temperature", max_temperature)?;
                if max_temperature < base {
                    return Err(format!(
                        "max_temperature {max_temperature} is smaller than temperature {base}"
                    ));
                }
                Ok(())
            }
        }
    }

    /// Temperature for a zero-based `round`.
    ///
    /// Always finite and strictly positive for a checked schedule.
    pub fn temperature_for(
        &self,
        base: f64,
        round: usize,
        max_steps: usize,
        stalled_rounds: usize,
    ) -> f64 {
        let progress = if max_steps > 1 {
            (round as f64 / (max_steps - 1) as f64).min(1.0)
        } else {
            0.0
        };

        let temperature = match *self {
            TemperatureSchedule::Constant => base,
            TemperatureSchedule::Linear { min_temperature } => {
                base + (min_temperature - base) * progress
            }
            TemperatureSchedule::Exponential {
                decay_rate,
                min_temperature,
            } => (base * decay_rate.powi(round as i32)).max(min_temperature),
            TemperatureSchedule::Cosine { min_temperature } => {
                min_temperature + 0.5 * (base - min_temperature) * (1.0 + (PI * progress).cos())
            }
            TemperatureSchedule::Adaptive {
                boost,
                max_temperature,
            } => (base * (1.0 + boost * stalled_rounds as f64)).min(max_temperature),
        };

        temperature.max(f64::MIN_POSITIVE)
    }
}
