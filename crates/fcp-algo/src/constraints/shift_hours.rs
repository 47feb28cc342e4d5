//! Maximum working-hours constraint for driver compliance.

use fcp_core::params::ConstraintConfig;
use fcp_core::{Route, Vehicle};

use super::{EvalContext, SequenceConstraint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CalculationMethod {
    /// First route start to last route end.
    FirstToLast,
    /// Sum of route durations.
    Cumulative,
}

pub struct ShiftHoursStrict {
    penalty: f64,
    max_hours: f64,
    method: CalculationMethod,
    pre_shift_buffer_hours: f64,
    post_shift_buffer_hours: f64,
}

impl ShiftHoursStrict {
    pub fn new(config: &ConstraintConfig) -> Self {
        let method = match config.param_text("calculation_method") {
            Some("cumulative") => CalculationMethod::Cumulative,
            _ => CalculationMethod::FirstToLast,
        };
        Self {
            penalty: config.penalty,
            max_hours: config.param_f64("max_hours", 16.0),
            method,
            pre_shift_buffer_hours: config.param_f64("pre_shift_buffer_hours", 0.5),
            post_shift_buffer_hours: config.param_f64("post_shift_buffer_hours", 0.5),
        }
    }
}

impl SequenceConstraint for ShiftHoursStrict {
    fn name(&self) -> &'static str {
        "shift_hours_strict"
    }

    fn hard(&self) -> bool {
        true
    }

    fn evaluate(&self, _vehicle: &Vehicle, sequence: &[Route], _ctx: &EvalContext<'_>) -> f64 {
        let Some(first) = sequence.first() else {
            return 0.0;
        };
        let last = sequence.last().expect("non-empty sequence has a last route");

        let worked_hours = match self.method {
            CalculationMethod::FirstToLast => {
                (last.plan_end - first.plan_start).num_seconds() as f64 / 3600.0
            }
            CalculationMethod::Cumulative => sequence.iter().map(Route::duration_hours).sum(),
        };

        let total = worked_hours + self.pre_shift_buffer_hours + self.post_shift_buffer_hours;
        if total > self.max_hours {
            self.penalty
        } else {
            0.0
        }
    }
}
