//! Turnaround-time constraints between consecutive routes.

use fcp_core::params::ConstraintConfig;
use fcp_core::{Route, Vehicle};

use super::{EvalContext, SequenceConstraint};

/// Hard minimum gap between consecutive routes (operational handover).
pub struct TurnaroundStrict {
    penalty: f64,
    minimum_minutes: i64,
}

impl TurnaroundStrict {
    pub fn new(config: &ConstraintConfig) -> Self {
        Self {
            penalty: config.penalty,
            minimum_minutes: config.param_i64("minimum_minutes", 45),
        }
    }
}

impl SequenceConstraint for TurnaroundStrict {
    fn name(&self) -> &'static str {
        "turnaround_time_strict"
    }

    fn hard(&self) -> bool {
        true
    }

    fn evaluate(&self, _vehicle: &Vehicle, sequence: &[Route], _ctx: &EvalContext<'_>) -> f64 {
        for pair in sequence.windows(2) {
            let gap_minutes =
                (pair[1].plan_start - pair[0].plan_end).num_seconds() as f64 / 60.0;
            if gap_minutes < self.minimum_minutes as f64 {
                return self.penalty;
            }
        }
        0.0
    }
}

/// Soft preference for comfortable turnaround gaps: a step penalty below
/// the standard threshold, a smaller one below the optimal threshold.
pub struct TurnaroundPreferred {
    standard_minutes: f64,
    optimal_minutes: f64,
    penalty_standard: f64,
    penalty_optimal: f64,
}

impl TurnaroundPreferred {
    pub fn new(config: &ConstraintConfig) -> Self {
        Self {
            standard_minutes: config.param_f64("standard_minutes", 75.0),
            optimal_minutes: config.param_f64("optimal_minutes", 90.0),
            penalty_standard: config.param_f64("penalty_standard", -2.0),
            penalty_optimal: config.param_f64("penalty_optimal", -1.0),
        }
    }
}

impl SequenceConstraint for TurnaroundPreferred {
    fn name(&self) -> &'static str {
        "turnaround_time_preferred"
    }

    fn hard(&self) -> bool {
        false
    }

    fn evaluate(&self, _vehicle: &Vehicle, sequence: &[Route], _ctx: &EvalContext<'_>) -> f64 {
        let mut total = 0.0;
        for pair in sequence.windows(2) {
            let gap_minutes =
                (pair[1].plan_start - pair[0].plan_end).num_seconds() as f64 / 60.0;
            if gap_minutes < self.standard_minutes {
                total += self.penalty_standard;
            } else if gap_minutes < self.optimal_minutes {
                total += self.penalty_optimal;
            }
        }
        total
    }
}
