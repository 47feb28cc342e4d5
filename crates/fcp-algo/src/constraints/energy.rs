//! Energy feasibility: can the vehicle actually drive the whole sequence?
//!
//! Simulates the battery across the sequence: start from the vehicle's
//! available energy, credit charging in the window before the first
//! departure and in the gaps between routes (at the vehicle rate, capped by
//! the bound charger), debit each route's consumption. The sequence fails
//! as soon as a departure would happen below the safety margin.

use fcp_core::params::ConstraintConfig;
use fcp_core::{Route, Vehicle};
use tracing::trace;

use super::{EvalContext, SequenceConstraint};

pub struct EnergyFeasibility {
    penalty: f64,
    safety_margin_kwh: f64,
    allow_dc_charging: bool,
}

impl EnergyFeasibility {
    pub fn new(config: &ConstraintConfig) -> Self {
        Self {
            penalty: config.penalty,
            safety_margin_kwh: config.param_f64("safety_margin_kwh", 5.0),
            allow_dc_charging: config.param_bool("allow_dc_charging", true),
        }
    }

    /// Runs the SOC walk and returns the energy remaining after the last
    /// route, or `None` when a departure falls below the margin.
    pub fn simulate_final_energy(
        &self,
        vehicle: &Vehicle,
        sequence: &[Route],
        ctx: &EvalContext<'_>,
    ) -> Option<f64> {
        let charger_cap = ctx.charger_cap(vehicle);
        let charge_power = vehicle.charge_power(self.allow_dc_charging, charger_cap);

        let mut energy = vehicle
            .available_energy_kwh
            .unwrap_or_else(|| vehicle.available_energy());

        // Charging between availability and the first departure.
        if let (Some(available_from), Some(first)) = (vehicle.available_from, sequence.first()) {
            let hours = (first.plan_start - available_from).num_seconds() as f64 / 3600.0;
            if hours > 0.0 {
                energy = (energy + hours * charge_power).min(vehicle.battery_kwh);
            }
        }

        for (idx, route) in sequence.iter().enumerate() {
            let required = vehicle.energy_required(route.plan_mileage, ctx.fleet_efficiency);
            trace!(
                vehicle = %vehicle.id,
                route = %route.id,
                required,
                on_board = energy,
                "energy walk step"
            );

            if energy < required + self.safety_margin_kwh {
                return None;
            }
            energy -= required;

            if let Some(next) = sequence.get(idx + 1) {
                let hours = (next.plan_start - route.plan_end).num_seconds() as f64 / 3600.0;
                if hours > 0.0 {
                    energy = (energy + hours * charge_power).min(vehicle.battery_kwh);
                }
            }
        }

        Some(energy)
    }
}

impl SequenceConstraint for EnergyFeasibility {
    fn name(&self) -> &'static str {
        "energy_feasibility"
    }

    fn hard(&self) -> bool {
        true
    }

    fn evaluate(&self, vehicle: &Vehicle, sequence: &[Route], ctx: &EvalContext<'_>) -> f64 {
        if sequence.is_empty() {
            return 0.0;
        }
        match self.simulate_final_energy(vehicle, sequence, ctx) {
            Some(_) => 0.0,
            None => self.penalty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{route, vehicle, CtxFixture};
    use super::*;
    use fcp_core::params::ConstraintConfig;
    use fcp_core::{Charger, ChargerId, SiteId};

    fn energy() -> EnergyFeasibility {
        let mut config = ConstraintConfig::disabled();
        config.enabled = true;
        config.penalty = -20.0;
        EnergyFeasibility::new(&config)
    }

    #[test]
    fn abundant_energy_is_feasible() {
        // 50 miles at 0.35 kWh/mile needs 17.5 kWh; 80 kWh on board.
        let fixture = CtxFixture::new(vec![], vec![vehicle(1, 100.0, 80.0)]);
        let seq = vec![route("A", 6, 0, 9, 50.0)];
        assert_eq!(
            energy().evaluate(&fixture.vehicles[0], &seq, &fixture.ctx()),
            0.0
        );
    }

    #[test]
    fn depleted_battery_fails_single_route() {
        // 5 kWh on board cannot cover 17.5 + 5 margin even after 2h at 11 kW.
        let mut v = vehicle(1, 100.0, 5.0);
        v.available_from = None; // no pre-departure charging window
        let fixture = CtxFixture::new(vec![], vec![v]);
        let seq = vec![route("A", 6, 0, 9, 50.0)];
        assert_eq!(
            energy().evaluate(&fixture.vehicles[0], &seq, &fixture.ctx()),
            -20.0
        );
    }

    #[test]
    fn gap_charging_rescues_second_route() {
        // 30 kWh on board; each route needs 24.5 kWh (70 mi · 0.35).
        // Without the 3h gap charge (33 kWh at 11 kW) the second departure
        // would be below margin.
        let fixture = CtxFixture::new(vec![], vec![vehicle(1, 100.0, 30.0)]);
        let seq = vec![route("A", 6, 0, 9, 70.0), route("B", 12, 0, 15, 70.0)];
        assert_eq!(
            energy().evaluate(&fixture.vehicles[0], &seq, &fixture.ctx()),
            0.0
        );
    }

    #[test]
    fn charger_cap_limits_gap_charging() {
        // Same shape as above but the bound charger only delivers 3 kW, so
        // the gap adds 9 kWh and the second departure fails.
        let mut v = vehicle(1, 100.0, 30.0);
        v.charger_id = Some(ChargerId::new(87));
        let mut fixture = CtxFixture::new(vec![], vec![v]);
        fixture.site_chargers.push(Charger {
            id: ChargerId::new(87),
            site_id: SiteId::new(10),
            max_power_kw: Some(3.0),
            dc: false,
        });
        let seq = vec![route("A", 6, 0, 9, 70.0), route("B", 12, 0, 15, 70.0)];
        assert_eq!(
            energy().evaluate(&fixture.vehicles[0], &seq, &fixture.ctx()),
            -20.0
        );
    }

    #[test]
    fn final_energy_walk_reports_arrival_soc_input() {
        let fixture = CtxFixture::new(vec![], vec![vehicle(1, 100.0, 80.0)]);
        let seq = vec![route("A", 6, 0, 9, 50.0)];
        let remaining = energy()
            .simulate_final_energy(&fixture.vehicles[0], &seq, &fixture.ctx())
            .unwrap();
        // 80 + 2h·11kW pre-charge (capped at 100) − 17.5.
        assert!((remaining - (100.0 - 17.5)).abs() < 1e-9);
    }
}
