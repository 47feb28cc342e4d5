//! Pluggable constraint system for route-sequence feasibility.
//!
//! A constraint maps `(vehicle, route sequence, context)` to a cost:
//! negative values are penalties, positive values bonuses, zero neutral.
//! Hard constraints reject the sequence outright when they penalize it.
//!
//! The [`ConstraintSet`] evaluates the registered constraints in a fixed
//! order and fails fast: as soon as one *hard* constraint returns a
//! negative cost the sequence is infeasible and the remaining constraints
//! are skipped. New constraints are new registrations in
//! [`ConstraintSet::from_configs`]; nothing else branches on names.

mod charger_preference;
mod energy;
mod route_overlap;
mod shift_hours;
mod turnaround;

pub use charger_preference::ChargerPreference;
pub use energy::EnergyFeasibility;
pub use route_overlap::RouteOverlap;
pub use shift_hours::ShiftHoursStrict;
pub use turnaround::{TurnaroundPreferred, TurnaroundStrict};

use std::collections::HashMap;

use tracing::debug;

use fcp_core::params::ConstraintConfig;
use fcp_core::{Charger, ChargerId, Route, SiteId, SiteParams, Vehicle, VehicleId};

/// Shared evaluation context for one enumeration pass.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Minimum turnaround used for overlap padding.
    pub turnaround_minutes: i64,
    /// Every route in the allocation window (for global route ranking).
    pub all_routes: &'a [Route],
    /// Every vehicle under consideration (for vehicle ranking).
    pub all_vehicles: &'a [Vehicle],
    /// Current charger binding per vehicle; `None` means disconnected.
    pub vehicle_chargers: &'a HashMap<VehicleId, Option<ChargerId>>,
    /// Depot charger inventory, for power caps during gap charging.
    pub site_chargers: &'a [Charger],
    /// Fleet-average efficiency fallback (kWh/mile).
    pub fleet_efficiency: f64,
}

impl<'a> EvalContext<'a> {
    /// Max power of the charger a vehicle is bound to, when known.
    pub fn charger_cap(&self, vehicle: &Vehicle) -> Option<f64> {
        let charger_id = vehicle.charger_id?;
        self.site_chargers
            .iter()
            .find(|c| c.id == charger_id)
            .and_then(|c| c.max_power_kw)
    }
}

/// A single registered constraint.
pub trait SequenceConstraint: Send + Sync {
    fn name(&self) -> &'static str;

    /// Hard constraints reject the sequence when they return a penalty.
    fn hard(&self) -> bool;

    /// Cost contribution for this vehicle-sequence pair. The sequence is
    /// sorted by `plan_start`.
    fn evaluate(&self, vehicle: &Vehicle, sequence: &[Route], ctx: &EvalContext<'_>) -> f64;
}

/// Evaluation result for one (vehicle, sequence) pair.
#[derive(Debug, Clone)]
pub struct SequenceEvaluation {
    pub total_cost: f64,
    pub breakdown: Vec<(&'static str, f64)>,
    pub feasible: bool,
}

/// Ordered set of enabled constraints.
pub struct ConstraintSet {
    constraints: Vec<Box<dyn SequenceConstraint>>,
}

impl ConstraintSet {
    /// Builds the registered constraint list from per-constraint configs.
    /// `route_overlap` is mandatory and always registered.
    pub fn from_configs(configs: &HashMap<String, ConstraintConfig>) -> Self {
        let get = |name: &str| configs.get(name).cloned().unwrap_or_else(|| {
            let mut config = ConstraintConfig::disabled();
            config.enabled = name != "charger_preference";
            config.penalty = -20.0;
            config
        });

        let mut constraints: Vec<Box<dyn SequenceConstraint>> = Vec::new();

        let energy = get("energy_feasibility");
        if energy.enabled {
            constraints.push(Box::new(EnergyFeasibility::new(&energy)));
        }
        let strict = get("turnaround_time_strict");
        if strict.enabled {
            constraints.push(Box::new(TurnaroundStrict::new(&strict)));
        }
        let preferred = get("turnaround_time_preferred");
        if preferred.enabled {
            constraints.push(Box::new(TurnaroundPreferred::new(&preferred)));
        }
        let shift = get("shift_hours_strict");
        if shift.enabled {
            constraints.push(Box::new(ShiftHoursStrict::new(&shift)));
        }
        // Always enabled: a vehicle cannot be in two places at once.
        let mut overlap = get("route_overlap");
        overlap.enabled = true;
        constraints.push(Box::new(RouteOverlap::new(&overlap)));

        let charger = get("charger_preference");
        if charger.enabled {
            constraints.push(Box::new(ChargerPreference::new(&charger)));
        }

        Self { constraints }
    }

    /// Resolves constraint configs straight from site parameters.
    pub fn from_site_params(site_id: SiteId, params: &SiteParams) -> Self {
        let configs = fcp_core::params::all_constraint_configs(site_id, params)
            .into_iter()
            .map(|(name, config)| (name.to_string(), config))
            .collect();
        Self::from_configs(&configs)
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Runs the pipeline over one (vehicle, sequence) pair. Stops at the
    /// first violated hard constraint.
    pub fn evaluate(
        &self,
        vehicle: &Vehicle,
        sequence: &[Route],
        ctx: &EvalContext<'_>,
    ) -> SequenceEvaluation {
        let mut total_cost = 0.0;
        let mut breakdown = Vec::with_capacity(self.constraints.len());

        for constraint in &self.constraints {
            let cost = constraint.evaluate(vehicle, sequence, ctx);
            breakdown.push((constraint.name(), cost));
            total_cost += cost;

            if constraint.hard() && cost < 0.0 {
                debug!(
                    vehicle = %vehicle.id,
                    constraint = constraint.name(),
                    cost,
                    "hard constraint violated"
                );
                return SequenceEvaluation {
                    total_cost,
                    breakdown,
                    feasible: false,
                };
            }
        }

        SequenceEvaluation {
            total_cost,
            breakdown,
            feasible: true,
        }
    }
}

impl std::fmt::Debug for ConstraintSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.constraints.iter().map(|c| c.name()).collect();
        f.debug_struct("ConstraintSet").field("constraints", &names).finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{route, vehicle, CtxFixture};
    use super::*;

    fn default_set() -> ConstraintSet {
        ConstraintSet::from_configs(&HashMap::new())
    }

    #[test]
    fn default_registration_has_five_constraints() {
        // Everything except charger_preference.
        assert_eq!(default_set().len(), 5);
    }

    #[test]
    fn fail_fast_stops_after_hard_violation() {
        // Two strictly overlapping routes: route_overlap must reject, and
        // evaluation must not continue past it.
        let fixture = CtxFixture::new(
            vec![route("A", 6, 0, 9, 40.0), route("B", 8, 0, 11, 40.0)],
            vec![vehicle(1, 100.0, 90.0)],
        );
        let set = default_set();
        let eval = set.evaluate(
            &fixture.vehicles[0],
            &fixture.routes.clone(),
            &fixture.ctx(),
        );
        assert!(!eval.feasible);
        let violated: Vec<_> = eval
            .breakdown
            .iter()
            .filter(|(_, cost)| *cost < 0.0)
            .collect();
        assert_eq!(violated.len(), 1);
    }

    #[test]
    fn feasible_sequence_reports_zero_cost() {
        let fixture = CtxFixture::new(
            vec![route("A", 6, 0, 9, 40.0)],
            vec![vehicle(1, 100.0, 90.0)],
        );
        let set = default_set();
        let eval = set.evaluate(
            &fixture.vehicles[0],
            &fixture.routes.clone(),
            &fixture.ctx(),
        );
        assert!(eval.feasible);
        assert_eq!(eval.total_cost, 0.0);
    }
}
