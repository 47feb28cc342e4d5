//! Charge-scheduling run orchestration.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use fcp_algo::scheduling::{solve_scheduling, SchedulingProblem};
use fcp_core::{
    Route, ScheduleId, ScheduleOutcome, SchedulerConfig, SiteId, VehicleId,
};
use fcp_store::{ChargeScheduleRow, CheckpointRow, Store};

use crate::inputs::{
    apply_charger_kinds, availability_masks, energy_requirements, fleet_efficiency,
    load_charge_states, load_site_params, planning_window, series_to_map,
};
use crate::validate::validate_schedule;
use crate::{CancelFlag, EngineError, EngineResult};

/// Where the vehicle-route mapping comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    /// `t_route_plan.vehicle_id` directly.
    Plan,
    /// Routes joined through the allocation table.
    Allocated,
}

impl std::str::FromStr for RouteSource {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "route_plan" | "plan" => Ok(RouteSource::Plan),
            "allocated" => Ok(RouteSource::Allocated),
            other => Err(EngineError::Validation(format!(
                "unknown route source: {other}"
            ))),
        }
    }
}

/// Arguments for one scheduling run.
#[derive(Debug, Clone)]
pub struct SchedulingRunArgs {
    /// Site for a fresh schedule; ignored when `schedule_id` is set.
    pub site: Option<SiteId>,
    /// Re-run an existing schedule record.
    pub schedule_id: Option<ScheduleId>,
    pub at: DateTime<Utc>,
    pub route_source: RouteSource,
    pub window_hours: Option<f64>,
    pub persist: bool,
    pub cancel: CancelFlag,
}

/// Runs the charge-scheduling workflow and returns the outcome.
pub fn run_scheduling(
    store: &dyn Store,
    args: &SchedulingRunArgs,
) -> EngineResult<ScheduleOutcome> {
    // Resolve or create the scheduler record.
    let (schedule_id, site) = match args.schedule_id {
        Some(id) => {
            let row = store
                .scheduler_row(id)?
                .ok_or_else(|| EngineError::NotFound(format!("schedule {id}")))?;
            (id, row.site_id)
        }
        None => {
            let site = args.site.ok_or_else(|| {
                EngineError::Validation("site_id required for a new schedule".into())
            })?;
            (store.create_scheduler(site, "dynamic", "running")?, site)
        }
    };

    info!(schedule = %schedule_id, %site, at = %args.at, "starting scheduling run");

    match run_inner(store, args, schedule_id, site) {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            error!(%err, "scheduling run failed");
            let reason = match err {
                EngineError::Interrupted => "interrupted",
                _ => "failed",
            };
            if let Err(update_err) = store.update_scheduler_status(schedule_id, reason) {
                error!(%update_err, "failed to mark scheduler failed");
            }
            if let Err(log_err) = store.log_error("scheduler", &err.to_string(), args.at) {
                error!(%log_err, "failed to write error log");
            }
            Err(err)
        }
    }
}

fn run_inner(
    store: &dyn Store,
    args: &SchedulingRunArgs,
    schedule_id: ScheduleId,
    site: SiteId,
) -> EngineResult<ScheduleOutcome> {
    let params = load_site_params(store, site)?;
    let mut config = SchedulerConfig {
        agreed_site_capacity_kva: store.site_asc(site)?,
        ..SchedulerConfig::default()
    };
    if let Some(hours) = args.window_hours {
        config.planning_window_hours = hours;
    }
    config
        .validate()
        .map_err(|e| EngineError::Validation(e.to_string()))?;

    let window = planning_window(store, site, args.at, config.planning_window_hours)?;
    let grid = window.grid();
    let efficiency = fleet_efficiency(store, site)?;

    // Fleet, as-of state, charger bindings.
    let mut vehicles: Vec<_> = store
        .all_vehicles(site)?
        .into_iter()
        .filter(|v| params.vehicle_enabled(v.id))
        .collect();
    for vehicle in &mut vehicles {
        crate::inputs::merge_vehicle_state(store, vehicle, args.at)?;
    }
    let ids: Vec<VehicleId> = vehicles.iter().map(|v| v.id).collect();
    let charger_map = store.vehicle_chargers_in_window(&ids, args.at)?;
    let site_chargers = store.site_chargers(site)?;

    let mut states = load_charge_states(store, &vehicles, &charger_map, args.at)?;
    apply_charger_kinds(&mut states, &site_chargers);

    // Per-vehicle routes within the window.
    let mut routes_by_vehicle: HashMap<VehicleId, Vec<Route>> = HashMap::new();
    for state in &states {
        let routes = match args.route_source {
            RouteSource::Plan => {
                store.routes_for_vehicle_plan(state.vehicle_id, window.start, window.end)?
            }
            RouteSource::Allocated => {
                store.routes_for_vehicle_allocated(state.vehicle_id, window.start, window.end)?
            }
        };
        routes_by_vehicle.insert(state.vehicle_id, routes);
    }
    let routes_considered: usize = routes_by_vehicle.values().map(Vec::len).sum();

    let requirements = energy_requirements(
        &routes_by_vehicle,
        &states,
        config.route_energy_safety_factor,
        efficiency,
        config.back_to_back_threshold_minutes,
    );
    let checkpoints_created: usize = requirements.values().map(Vec::len).sum();
    let availability = availability_masks(
        &states,
        &routes_by_vehicle,
        &grid,
        config.min_departure_buffer_minutes,
    );

    let forecast = series_to_map(store.forecast(site, window.start, window.end)?);
    let price = series_to_map(
        store
            .price(window.start, window.end)?
            .into_iter()
            .map(|(t, p, triad)| (t, (p, triad)))
            .collect(),
    );
    args.cancel.check()?;

    info!(
        vehicles = states.len(),
        routes = routes_considered,
        checkpoints = checkpoints_created,
        slots = grid.len(),
        "scheduling context loaded"
    );

    let problem = SchedulingProblem {
        schedule_id,
        grid,
        vehicles: states,
        requirements: requirements.clone(),
        availability,
        forecast: forecast.clone(),
        price,
        site_capacity_kw: config.site_capacity_kw(),
        target_soc_percent: config.target_soc_percent,
        min_soc_percent: config.min_soc_percent,
        triad_penalty_factor: config.triad_penalty_factor,
        synthetic_time_price_factor: config.synthetic_time_price_factor,
        time_limit_seconds: config.time_limit_seconds,
    };
    let solution = solve_scheduling(&problem)?;
    args.cancel.check()?;

    let mut outcome = ScheduleOutcome {
        schedule_id,
        site_id: site,
        grid,
        actual_window_hours: window.actual_hours,
        vehicles_scheduled: solution.vehicles.len(),
        vehicles: solution.vehicles,
        total_cost: solution.total_cost,
        objective_value: solution.objective_value,
        total_energy_kwh: solution.total_energy_kwh,
        solve_time_seconds: solution.solve_time_seconds,
        status: solution.status,
        validation: Default::default(),
        routes_considered,
        checkpoints_created,
    };

    let passed = validate_schedule(&mut outcome, &forecast, config.site_capacity_kw());

    if args.persist {
        args.cancel.check()?;
        persist_schedule(store, &outcome, &requirements)?;
        let status = if passed { "completed" } else { "validation_failed" };
        store.update_scheduler_status(schedule_id, status)?;
    }

    info!(
        schedule = %schedule_id,
        status = outcome.status.as_str(),
        total_cost = outcome.total_cost,
        total_energy = outcome.total_energy_kwh,
        validation_passed = passed,
        "scheduling run finished"
    );
    Ok(outcome)
}

/// Writes the dense slot grid (zero rows included) and the checkpoint list
/// in one transaction.
pub(crate) fn persist_schedule(
    store: &dyn Store,
    outcome: &ScheduleOutcome,
    requirements: &HashMap<VehicleId, Vec<fcp_core::RouteEnergyRequirement>>,
) -> EngineResult<()> {
    let mut slot_rows = Vec::with_capacity(outcome.vehicles.len() * outcome.grid.len());
    for vehicle in &outcome.vehicles {
        let power_by_slot: HashMap<DateTime<Utc>, f64> = vehicle
            .slots
            .iter()
            .map(|s| (s.slot_start, s.power_kw))
            .collect();
        let connector_id = vehicle.charger_id.map(|c| c.to_string());
        for slot_start in outcome.grid.iter() {
            slot_rows.push(ChargeScheduleRow {
                schedule_id: outcome.schedule_id,
                vehicle_id: vehicle.vehicle_id,
                slot_start,
                power_kw: power_by_slot.get(&slot_start).copied().unwrap_or(0.0),
                connector_id: connector_id.clone(),
            });
        }
    }

    let mut checkpoint_rows = Vec::new();
    for requirement_list in requirements.values() {
        for requirement in requirement_list {
            checkpoint_rows.push(CheckpointRow {
                schedule_id: outcome.schedule_id,
                vehicle_id: requirement.vehicle_id,
                route_id: requirement.route_id.clone(),
                checkpoint_at: requirement.departure,
                required_cumulative_kwh: requirement.cumulative_kwh,
                route_energy_buffer_kwh: requirement.energy_kwh,
                efficiency_kwh_per_mile: requirement.efficiency_kwh_per_mile,
            });
        }
    }

    store.replace_schedule(outcome.schedule_id, &slot_rows, &checkpoint_rows)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fcp_core::{RouteId, RouteStatus, SolveStatus, Vehicle, VehicleStatus};
    use fcp_store::{SqliteStore, VsmRow};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, h, m, 0).unwrap()
    }

    fn vehicle(id: i64, soc_seed: bool, store: &SqliteStore) -> Vehicle {
        let v = Vehicle {
            id: VehicleId::new(id),
            site_id: SiteId::new(10),
            active: true,
            vor: false,
            charge_power_ac_kw: 11.0,
            charge_power_dc_kw: 50.0,
            battery_kwh: 100.0,
            efficiency_kwh_per_mile: Some(0.35),
            telematic_label: None,
            status: VehicleStatus::Idle,
            current_route_id: None,
            estimated_soc_pct: None,
            return_eta: None,
            return_soc_pct: None,
            available_from: None,
            available_energy_kwh: None,
            charger_id: None,
        };
        store.insert_vehicle(&v).unwrap();
        if soc_seed {
            store
                .insert_vsm(&VsmRow {
                    vehicle_id: v.id,
                    at: at(3, 0),
                    status: "Idle".into(),
                    route_id: None,
                    estimated_soc_pct: Some(50.0),
                    return_eta: None,
                    return_soc_pct: None,
                })
                .unwrap();
        }
        v
    }

    /// 12 hours of price/forecast data from 04:00.
    fn seed_market(store: &SqliteStore) {
        for i in 0..24 {
            let slot = at(4, 0) + Duration::minutes(30 * i);
            store.insert_forecast_point(SiteId::new(10), slot, 10.0).unwrap();
            store
                .insert_price_point(slot, if i < 6 { 0.08 } else { 0.25 }, false)
                .unwrap();
        }
        store.insert_site(SiteId::new(10), Some(200.0)).unwrap();
    }

    fn args() -> SchedulingRunArgs {
        SchedulingRunArgs {
            site: Some(SiteId::new(10)),
            schedule_id: None,
            at: at(4, 0),
            route_source: RouteSource::Plan,
            window_hours: Some(12.0),
            persist: true,
            cancel: CancelFlag::new(),
        }
    }

    #[test]
    fn idle_fleet_charges_toward_target() {
        let store = SqliteStore::open_in_memory().unwrap();
        vehicle(1, true, &store);
        seed_market(&store);

        let outcome = run_scheduling(&store, &args()).unwrap();
        assert!(outcome.validation.passed);
        // 50 -> 75% of 100 kWh.
        assert!(outcome.total_energy_kwh >= 25.0 - 1e-6);
        assert!(outcome.vehicles[0].energy_scheduled_kwh >= 25.0 - 1e-6);

        // Dense grid persisted: one row per slot.
        let rows = store.charge_schedule_rows(outcome.schedule_id).unwrap();
        assert_eq!(rows.len(), outcome.grid.len());

        let header = store.scheduler_row(outcome.schedule_id).unwrap().unwrap();
        assert_eq!(header.status, "completed");
    }

    #[test]
    fn planned_route_creates_checkpoint_and_blocks_slots() {
        let store = SqliteStore::open_in_memory().unwrap();
        let v = vehicle(1, true, &store);
        seed_market(&store);
        store
            .insert_route(&Route {
                id: RouteId::from("A"),
                site_id: SiteId::new(10),
                alias: "A".into(),
                status: RouteStatus::New,
                plan_start: at(8, 0),
                plan_end: at(11, 0),
                plan_mileage: 50.0,
                n_orders: 5,
                vehicle_id: Some(v.id),
                energy_kwh: None,
            })
            .unwrap();

        let outcome = run_scheduling(&store, &args()).unwrap();
        assert_eq!(outcome.checkpoints_created, 1);
        assert_eq!(outcome.routes_considered, 1);
        assert!(outcome.validation.passed);

        // No charging inside the blocked window (07:00 buffer to 11:00).
        for slot in &outcome.vehicles[0].slots {
            assert!(
                slot.slot_start < at(7, 0) || slot.slot_start >= at(11, 0),
                "charging at {}",
                slot.slot_start
            );
        }

        // Checkpoints persisted alongside the dense grid.
        let checkpoints = store.checkpoint_rows(outcome.schedule_id).unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].route_id, RouteId::from("A"));
        assert!((checkpoints[0].required_cumulative_kwh - 50.0 * 0.35 * 1.15).abs() < 1e-9);
    }

    #[test]
    fn rerun_with_schedule_id_replaces_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        vehicle(1, true, &store);
        seed_market(&store);

        let first = run_scheduling(&store, &args()).unwrap();
        let mut second_args = args();
        second_args.schedule_id = Some(first.schedule_id);
        let second = run_scheduling(&store, &second_args).unwrap();

        assert_eq!(first.schedule_id, second.schedule_id);
        let rows = store.charge_schedule_rows(first.schedule_id).unwrap();
        assert_eq!(rows.len(), first.grid.len());
        // Same inputs, same scheduled energy.
        assert!((first.total_energy_kwh - second.total_energy_kwh).abs() < 1e-6);
    }

    #[test]
    fn missing_schedule_id_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut a = args();
        a.schedule_id = Some(ScheduleId::new(999));
        assert!(matches!(
            run_scheduling(&store, &a),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn short_horizon_fails_half_window_rule() {
        let store = SqliteStore::open_in_memory().unwrap();
        vehicle(1, true, &store);
        // Only 5 hours of market data against a 12 hour target.
        for i in 0..10 {
            let slot = at(4, 0) + Duration::minutes(30 * i);
            store.insert_forecast_point(SiteId::new(10), slot, 10.0).unwrap();
            store.insert_price_point(slot, 0.1, false).unwrap();
        }

        let err = run_scheduling(&store, &args()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        // Scheduler record exists and is marked failed.
        let header = store.scheduler_row(ScheduleId::new(1)).unwrap().unwrap();
        assert_eq!(header.status, "failed");
    }

    #[test]
    fn vor_vehicle_is_not_scheduled() {
        let store = SqliteStore::open_in_memory().unwrap();
        vehicle(1, true, &store);
        let mut vor = vehicle(2, false, &store);
        vor.vor = true;
        store.insert_vehicle(&vor).unwrap();
        seed_market(&store);

        let outcome = run_scheduling(&store, &args()).unwrap();
        assert_eq!(outcome.vehicles.len(), 1);
        assert_eq!(outcome.vehicles[0].vehicle_id, VehicleId::new(1));
    }

    #[test]
    fn sentinel_soc_vehicle_is_excluded() {
        let store = SqliteStore::open_in_memory().unwrap();
        vehicle(1, true, &store);
        let excluded = vehicle(2, false, &store);
        store
            .insert_vsm(&VsmRow {
                vehicle_id: excluded.id,
                at: at(3, 0),
                status: "Idle".into(),
                route_id: None,
                estimated_soc_pct: Some(-111.0),
                return_eta: None,
                return_soc_pct: None,
            })
            .unwrap();
        seed_market(&store);

        let outcome = run_scheduling(&store, &args()).unwrap();
        assert_eq!(outcome.vehicles.len(), 1);
    }

    #[test]
    fn greedy_and_engine_agree_on_energy_for_trivial_case() {
        // One idle vehicle, flat prices: both paths deliver the same total
        // energy (the target gap).
        let store = SqliteStore::open_in_memory().unwrap();
        vehicle(1, true, &store);
        seed_market(&store);

        let outcome = run_scheduling(&store, &args()).unwrap();
        let expected = 25.0;
        assert!((outcome.total_energy_kwh - expected).abs() < 1e-3);
        match outcome.status {
            SolveStatus::Optimal | SolveStatus::GreedyFallback => {}
            other => panic!("unexpected status {other:?}"),
        }
    }
}
