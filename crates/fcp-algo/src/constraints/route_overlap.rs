//! Temporal overlap prevention. Mandatory: a vehicle cannot run two routes
//! at once.

use fcp_core::params::ConstraintConfig;
use fcp_core::{Route, Vehicle};

use super::{EvalContext, SequenceConstraint};

pub struct RouteOverlap {
    penalty: f64,
}

impl RouteOverlap {
    pub fn new(config: &ConstraintConfig) -> Self {
        Self {
            penalty: config.penalty,
        }
    }
}

impl SequenceConstraint for RouteOverlap {
    fn name(&self) -> &'static str {
        "route_overlap"
    }

    fn hard(&self) -> bool {
        true
    }

    fn evaluate(&self, _vehicle: &Vehicle, sequence: &[Route], ctx: &EvalContext<'_>) -> f64 {
        if sequence.len() < 2 {
            return 0.0;
        }

        for i in 0..sequence.len() - 1 {
            for j in i + 1..sequence.len() {
                if sequence[i].overlaps_with(&sequence[j], ctx.turnaround_minutes) {
                    return self.penalty;
                }
            }
        }

        0.0
    }
}
