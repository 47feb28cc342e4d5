//! Post-solve schedule validation.
//!
//! Re-checks the solver's output against the invariants the model was
//! supposed to enforce: checkpoint energy at every route departure, the
//! per-slot site-capacity cap, and the reported totals. Violations land in
//! the outcome's [`ValidationReport`] and on the offending vehicle.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use fcp_core::schedule::{SLOT_HOURS, SLOT_MINUTES};
use fcp_core::{ScheduleOutcome, SlotGrid, ValidationReport};

/// Slack for floating-point comparisons, in kWh / kW.
const EPSILON: f64 = 1e-6;

/// Validates a schedule outcome in place. Returns the report's pass flag.
pub fn validate_schedule(
    outcome: &mut ScheduleOutcome,
    forecast: &HashMap<DateTime<Utc>, f64>,
    site_capacity_kw: f64,
) -> bool {
    let mut report = ValidationReport::passing();
    let grid = outcome.grid;

    check_grid_alignment(outcome, &grid, &mut report);
    check_checkpoints(outcome, &mut report);
    check_site_capacity(outcome, &grid, forecast, site_capacity_kw, &mut report);
    check_totals(outcome, &mut report);

    if !report.passed {
        warn!(
            schedule = %outcome.schedule_id,
            errors = report.errors.len(),
            "schedule validation failed"
        );
    }
    outcome.validation = report;
    outcome.validation.passed
}

/// Every reported slot must sit on the grid's 30-minute lattice.
fn check_grid_alignment(outcome: &ScheduleOutcome, grid: &SlotGrid, report: &mut ValidationReport) {
    for vehicle in &outcome.vehicles {
        for slot in &vehicle.slots {
            let offset = (slot.slot_start - grid.start).num_minutes();
            if offset < 0 || offset % SLOT_MINUTES != 0 || slot.slot_start >= grid.end {
                report.fail(format!(
                    "vehicle {}: slot {} is off the scheduling grid",
                    vehicle.vehicle_id, slot.slot_start
                ));
            }
        }
    }
}

/// `initial_soc + Σ_{t<τ} 0.5·p ≥ required_cumulative` at every checkpoint.
fn check_checkpoints(outcome: &mut ScheduleOutcome, report: &mut ValidationReport) {
    for vehicle in &mut outcome.vehicles {
        for checkpoint in &vehicle.checkpoints {
            let banked: f64 = vehicle
                .slots
                .iter()
                .filter(|slot| slot.slot_start < checkpoint.departure)
                .map(|slot| slot.power_kw * SLOT_HOURS)
                .sum();
            let available = vehicle.initial_soc_kwh + banked;

            if available + EPSILON < checkpoint.cumulative_kwh {
                let shortfall = checkpoint.cumulative_kwh - available;
                vehicle.meets_requirements = false;
                vehicle.shortfall_kwh = vehicle.shortfall_kwh.max(shortfall);
                report.fail(format!(
                    "vehicle {}, route {}: energy shortfall of {shortfall:.2} kWh at departure",
                    vehicle.vehicle_id, checkpoint.route_id
                ));
            }
        }
    }
}

/// `Σ_v p(v,t) ≤ max(0, cap − forecast(t))` whenever capacity is tracked.
fn check_site_capacity(
    outcome: &ScheduleOutcome,
    grid: &SlotGrid,
    forecast: &HashMap<DateTime<Utc>, f64>,
    site_capacity_kw: f64,
    report: &mut ValidationReport,
) {
    if site_capacity_kw <= 0.0 {
        return;
    }
    for slot_start in grid.iter() {
        let draw: f64 = outcome
            .vehicles
            .iter()
            .flat_map(|v| &v.slots)
            .filter(|s| s.slot_start == slot_start)
            .map(|s| s.power_kw)
            .sum();
        let headroom =
            (site_capacity_kw - forecast.get(&slot_start).copied().unwrap_or(0.0)).max(0.0);
        if draw > headroom + EPSILON {
            report.fail(format!(
                "slot {slot_start}: combined draw {draw:.2} kW exceeds headroom {headroom:.2} kW"
            ));
        }
    }
}

/// Recomputes the reported totals from the slots.
fn check_totals(outcome: &ScheduleOutcome, report: &mut ValidationReport) {
    let energy: f64 = outcome
        .vehicles
        .iter()
        .flat_map(|v| &v.slots)
        .map(|s| s.power_kw * SLOT_HOURS)
        .sum();
    let cost: f64 = outcome
        .vehicles
        .iter()
        .flat_map(|v| &v.slots)
        .map(|s| s.power_kw * SLOT_HOURS * s.price)
        .sum();

    let tolerance = 1e-3;
    if (energy - outcome.total_energy_kwh).abs() > tolerance {
        report.warn(format!(
            "reported energy {:.3} kWh differs from recomputed {energy:.3} kWh",
            outcome.total_energy_kwh
        ));
    }
    if (cost - outcome.total_cost).abs() > tolerance {
        report.warn(format!(
            "reported cost {:.4} differs from recomputed {cost:.4}",
            outcome.total_cost
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fcp_core::{
        ChargeSlot, RouteEnergyRequirement, RouteId, ScheduleId, SiteId, SolveStatus,
        VehicleChargeSchedule, VehicleId,
    };

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, h, m, 0).unwrap()
    }

    fn outcome_with(vehicles: Vec<VehicleChargeSchedule>) -> ScheduleOutcome {
        let grid = SlotGrid::new(at(4, 0), at(12, 0));
        let total_energy: f64 = vehicles
            .iter()
            .flat_map(|v| &v.slots)
            .map(|s| s.power_kw * SLOT_HOURS)
            .sum();
        let total_cost: f64 = vehicles
            .iter()
            .flat_map(|v| &v.slots)
            .map(|s| s.power_kw * SLOT_HOURS * s.price)
            .sum();
        ScheduleOutcome {
            schedule_id: ScheduleId::new(1),
            site_id: SiteId::new(10),
            grid,
            actual_window_hours: grid.hours(),
            vehicles,
            total_cost,
            objective_value: total_cost,
            total_energy_kwh: total_energy,
            solve_time_seconds: 0.0,
            status: SolveStatus::Optimal,
            validation: ValidationReport::passing(),
            vehicles_scheduled: 1,
            routes_considered: 0,
            checkpoints_created: 0,
        }
    }

    fn vehicle_schedule(
        initial_soc: f64,
        slots: Vec<ChargeSlot>,
        checkpoints: Vec<RouteEnergyRequirement>,
    ) -> VehicleChargeSchedule {
        let energy: f64 = slots.iter().map(|s| s.power_kw * SLOT_HOURS).sum();
        VehicleChargeSchedule {
            vehicle_id: VehicleId::new(1),
            schedule_id: ScheduleId::new(1),
            initial_soc_kwh: initial_soc,
            target_soc_kwh: 75.0,
            energy_needed_kwh: 0.0,
            has_routes: !checkpoints.is_empty(),
            checkpoints,
            slots,
            energy_scheduled_kwh: energy,
            charger_id: None,
            charger_is_dc: false,
            meets_requirements: true,
            shortfall_kwh: 0.0,
        }
    }

    fn slot(start: DateTime<Utc>, power: f64) -> ChargeSlot {
        ChargeSlot {
            slot_start: start,
            power_kw: power,
            cumulative_kwh: 0.0,
            price: 0.10,
            is_triad: false,
        }
    }

    fn checkpoint(route: &str, departure: DateTime<Utc>, cumulative: f64) -> RouteEnergyRequirement {
        RouteEnergyRequirement {
            route_id: RouteId::from(route),
            vehicle_id: VehicleId::new(1),
            departure,
            arrival: departure,
            mileage: 0.0,
            efficiency_kwh_per_mile: 0.35,
            energy_kwh: cumulative,
            cumulative_kwh: cumulative,
            sequence_index: 0,
            is_back_to_back: false,
            gap_to_next_minutes: None,
        }
    }

    #[test]
    fn satisfied_checkpoint_passes() {
        // 10 kWh on board + 11 kWh banked before 08:00 covers 20 kWh.
        let slots = vec![slot(at(5, 0), 11.0), slot(at(5, 30), 11.0)];
        let mut outcome = outcome_with(vec![vehicle_schedule(
            10.0,
            slots,
            vec![checkpoint("A", at(8, 0), 20.0)],
        )]);
        assert!(validate_schedule(&mut outcome, &HashMap::new(), 0.0));
        assert!(outcome.vehicles[0].meets_requirements);
    }

    #[test]
    fn shortfall_is_reported_per_vehicle() {
        // Charging after departure does not count.
        let slots = vec![slot(at(9, 0), 11.0)];
        let mut outcome = outcome_with(vec![vehicle_schedule(
            10.0,
            slots,
            vec![checkpoint("A", at(8, 0), 20.0)],
        )]);
        assert!(!validate_schedule(&mut outcome, &HashMap::new(), 0.0));
        let vehicle = &outcome.vehicles[0];
        assert!(!vehicle.meets_requirements);
        assert!((vehicle.shortfall_kwh - 10.0).abs() < 1e-6);
        assert_eq!(outcome.validation.errors.len(), 1);
    }

    #[test]
    fn capacity_violation_fails() {
        let slots = vec![slot(at(5, 0), 20.0)];
        let mut outcome = outcome_with(vec![vehicle_schedule(50.0, slots, vec![])]);
        let mut forecast = HashMap::new();
        forecast.insert(at(5, 0), 5.0);
        // 20 kW draw against 15 - 5 = 10 kW headroom.
        assert!(!validate_schedule(&mut outcome, &forecast, 15.0));
        // Unconstrained capacity skips the check.
        assert!(validate_schedule(&mut outcome, &forecast, 0.0));
    }

    #[test]
    fn off_grid_slot_fails() {
        let slots = vec![slot(at(5, 17), 11.0)];
        let mut outcome = outcome_with(vec![vehicle_schedule(50.0, slots, vec![])]);
        assert!(!validate_schedule(&mut outcome, &HashMap::new(), 0.0));
    }

    #[test]
    fn total_mismatch_warns_but_passes() {
        let slots = vec![slot(at(5, 0), 11.0)];
        let mut outcome = outcome_with(vec![vehicle_schedule(50.0, slots, vec![])]);
        outcome.total_energy_kwh += 1.0;
        assert!(validate_schedule(&mut outcome, &HashMap::new(), 0.0));
        assert_eq!(outcome.validation.warnings.len(), 1);
    }
}
