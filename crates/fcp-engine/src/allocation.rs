//! Allocation run orchestration.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use fcp_algo::allocation::{solve_allocation, AllocationProblem};
use fcp_algo::constraints::{ConstraintSet, EvalContext};
use fcp_algo::sequences::enumerate_sequences;
use fcp_core::{
    AllocationOutcome, AllocationSettings, RouteAllocation, RunStatus, SiteId, TriggerType,
};
use fcp_store::Store;

use crate::inputs::{
    arrival_socs, fleet_efficiency, load_allocation_fleet, load_site_params,
    overlapping_route_count, planning_window,
};
use crate::{CancelFlag, EngineError, EngineResult};

/// Arguments for one allocation run.
#[derive(Debug, Clone)]
pub struct AllocationRunArgs {
    pub site: SiteId,
    pub trigger: TriggerType,
    /// Planning instant; vehicle state is read as of this time.
    pub at: DateTime<Utc>,
    /// Overrides the site's configured window length.
    pub window_hours: Option<f64>,
    pub persist: bool,
    pub cancel: CancelFlag,
}

/// Runs the full allocation workflow and returns the outcome.
///
/// On failure the allocation monitor is marked failed and the error is
/// rethrown. A rejected (low-score) allocation is not an error: it is
/// returned with status `F` and without persistence.
pub fn run_allocation(
    store: &dyn Store,
    args: &AllocationRunArgs,
) -> EngineResult<AllocationOutcome> {
    info!(site = %args.site, trigger = args.trigger.as_str(), at = %args.at,
          "starting allocation run");

    let params = load_site_params(store, args.site)?;
    let mut settings = AllocationSettings::from_site_params(&params);
    if let Some(hours) = args.window_hours {
        settings.window_hours = hours;
    }

    let window = planning_window(store, args.site, args.at, settings.window_hours)?;
    let allocation_id = store.create_allocation_monitor(
        args.site,
        args.trigger,
        args.at,
        window.start,
        window.end,
    )?;

    let run = || -> EngineResult<AllocationOutcome> {
        let (vehicles, charger_map) =
            load_allocation_fleet(store, args.site, &params, args.at)?;
        let routes = store.routes_in_window(args.site, window.start, window.end)?;
        let site_chargers = store.site_chargers(args.site)?;
        let efficiency = fleet_efficiency(store, args.site)?;
        args.cancel.check()?;

        info!(
            vehicles = vehicles.len(),
            routes = routes.len(),
            window_start = %window.start,
            window_end = %window.end,
            "allocation context loaded"
        );

        let mut outcome = AllocationOutcome::empty(
            allocation_id,
            args.site,
            args.at,
            window.start,
            window.end,
        );
        outcome.routes_in_window = routes.len();
        outcome.routes_overlapping =
            overlapping_route_count(&routes, settings.turnaround_minutes);

        if routes.is_empty() {
            warn!(site = %args.site, "no routes to allocate");
            outcome.status = RunStatus::Accepted;
            return Ok(outcome);
        }

        let constraints = ConstraintSet::from_site_params(args.site, &params);
        let ctx = EvalContext {
            turnaround_minutes: settings.turnaround_minutes,
            all_routes: &routes,
            all_vehicles: &vehicles,
            vehicle_chargers: &charger_map,
            site_chargers: &site_chargers,
            fleet_efficiency: efficiency,
        };

        let candidates = enumerate_sequences(
            &vehicles,
            &routes,
            &constraints,
            settings.max_routes_per_vehicle,
            &ctx,
        );
        let problem = AllocationProblem {
            candidates,
            route_ids: routes.iter().map(|r| r.id.clone()).collect(),
            route_count_weight: 1e2,
            time_limit_seconds: settings.time_limit_seconds,
        };
        let solution = solve_allocation(&problem)?;
        args.cancel.check()?;

        // Turn selected sequences into per-route allocations with arrival
        // SOC from the battery walk.
        let vehicle_by_id: HashMap<_, _> = vehicles.iter().map(|v| (v.id, v)).collect();
        for candidate in &solution.selected {
            let Some(vehicle) = vehicle_by_id.get(&candidate.vehicle_id) else {
                continue;
            };
            let charger_cap = vehicle.charger_id.and_then(|id| {
                site_chargers
                    .iter()
                    .find(|c| c.id == id)
                    .and_then(|c| c.max_power_kw)
            });
            let socs = arrival_socs(vehicle, &candidate.routes, charger_cap, efficiency);
            let per_route_cost = candidate.cost / candidate.routes.len() as f64;
            for (route, soc) in candidate.routes.iter().zip(socs) {
                outcome.push_allocation(RouteAllocation {
                    route_id: route.id.clone(),
                    vehicle_id: candidate.vehicle_id,
                    estimated_arrival: route.plan_end,
                    estimated_arrival_soc_pct: soc,
                    cost: per_route_cost,
                });
            }
        }
        // push_allocation accumulated per-route costs; report the solver's
        // exact score instead.
        outcome.total_score = solution.total_score;

        let allocated: std::collections::HashSet<_> =
            outcome.allocations.iter().map(|a| a.route_id.clone()).collect();
        for route in &routes {
            if !allocated.contains(&route.id) {
                outcome.mark_unallocated(route.id.clone());
            }
        }

        outcome.status = if outcome.is_acceptable(settings.min_acceptable_score) {
            RunStatus::Accepted
        } else {
            RunStatus::Failed
        };
        Ok(outcome)
    };

    match run() {
        Ok(outcome) => {
            if args.persist {
                args.cancel.check().inspect_err(|_| {
                    fail_monitor(store, args, allocation_id);
                })?;
                if outcome.status == RunStatus::Accepted {
                    store.replace_allocations(args.site, allocation_id, &outcome.allocations)?;
                } else {
                    warn!(
                        score = outcome.total_score,
                        "allocation rejected by acceptance gate, skipping persistence"
                    );
                }
                store.update_allocation_monitor(
                    allocation_id,
                    outcome.status,
                    outcome.total_score,
                    outcome.routes_in_window,
                    outcome.routes_allocated,
                    outcome.routes_overlapping,
                )?;
            }
            info!(
                allocation = %allocation_id,
                status = outcome.status.code(),
                allocated = outcome.routes_allocated,
                in_window = outcome.routes_in_window,
                score = outcome.total_score,
                "allocation run finished"
            );
            Ok(outcome)
        }
        Err(err) => {
            error!(%err, "allocation run failed");
            fail_monitor(store, args, allocation_id);
            Err(err)
        }
    }
}

fn fail_monitor(store: &dyn Store, args: &AllocationRunArgs, id: fcp_core::AllocationId) {
    if let Err(update_err) =
        store.update_allocation_monitor(id, RunStatus::Failed, 0.0, 0, 0, 0)
    {
        error!(%update_err, "failed to mark allocation monitor failed");
    }
    if let Err(log_err) = store.log_error("allocation", "allocation run failed", args.at) {
        error!(%log_err, "failed to write error log");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fcp_core::{Route, RouteId, RouteStatus, Vehicle, VehicleId, VehicleStatus};
    use fcp_store::{SqliteStore, VsmRow};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, h, m, 0).unwrap()
    }

    fn vehicle(id: i64) -> Vehicle {
        Vehicle {
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
        }
    }

    fn route(id: &str, start: DateTime<Utc>, end: DateTime<Utc>, miles: f64) -> Route {
        Route {
            id: RouteId::from(id),
            site_id: SiteId::new(10),
            alias: id.to_string(),
            status: RouteStatus::New,
            plan_start: start,
            plan_end: end,
            plan_mileage: miles,
            n_orders: 5,
            vehicle_id: None,
            energy_kwh: None,
        }
    }

    fn seed_soc(store: &SqliteStore, id: i64, soc: f64) {
        store
            .insert_vsm(&VsmRow {
                vehicle_id: VehicleId::new(id),
                at: at(3, 0),
                status: "Idle".into(),
                route_id: None,
                estimated_soc_pct: Some(soc),
                return_eta: None,
                return_soc_pct: None,
            })
            .unwrap();
    }

    fn args() -> AllocationRunArgs {
        AllocationRunArgs {
            site: SiteId::new(10),
            trigger: TriggerType::Initial,
            at: at(4, 0),
            window_hours: Some(18.0),
            persist: true,
            cancel: CancelFlag::new(),
        }
    }

    #[test]
    fn single_route_single_vehicle_is_accepted() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_vehicle(&vehicle(1)).unwrap();
        seed_soc(&store, 1, 80.0);
        store.insert_route(&route("A", at(6, 0), at(9, 0), 50.0)).unwrap();

        let outcome = run_allocation(&store, &args()).unwrap();
        assert_eq!(outcome.status, RunStatus::Accepted);
        assert_eq!(outcome.routes_allocated, 1);
        assert_eq!(outcome.routes_in_window, 1);
        assert!(outcome.unallocated.is_empty());

        // Persisted and visible through the read path.
        let rows = store
            .allocations_for_routes(SiteId::new(10), &[RouteId::from("A")])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vehicle_id, VehicleId::new(1));
    }

    #[test]
    fn overlapping_routes_leave_one_unallocated() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_vehicle(&vehicle(1)).unwrap();
        seed_soc(&store, 1, 90.0);
        store.insert_route(&route("A", at(6, 0), at(9, 0), 40.0)).unwrap();
        store.insert_route(&route("B", at(8, 0), at(11, 0), 40.0)).unwrap();

        let outcome = run_allocation(&store, &args()).unwrap();
        assert_eq!(outcome.routes_allocated, 1);
        assert_eq!(outcome.unallocated.len(), 1);
        assert!(outcome.routes_overlapping >= 1);
    }

    #[test]
    fn back_to_back_gap_below_strict_turnaround_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_vehicle(&vehicle(1)).unwrap();
        seed_soc(&store, 1, 90.0);
        // 30 minute gap < 45 strict minimum: no pair sequence, so two
        // routes for one vehicle cannot both be served.
        store.insert_route(&route("A", at(6, 0), at(9, 0), 40.0)).unwrap();
        store.insert_route(&route("B", at(9, 30), at(12, 0), 40.0)).unwrap();

        let outcome = run_allocation(&store, &args()).unwrap();
        assert_eq!(outcome.routes_allocated, 1);
        assert_eq!(outcome.unallocated.len(), 1);
    }

    #[test]
    fn two_vehicles_cover_two_routes() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_vehicle(&vehicle(1)).unwrap();
        store.insert_vehicle(&vehicle(2)).unwrap();
        seed_soc(&store, 1, 90.0);
        seed_soc(&store, 2, 90.0);
        store.insert_route(&route("A", at(6, 0), at(9, 0), 40.0)).unwrap();
        store.insert_route(&route("B", at(8, 0), at(11, 0), 40.0)).unwrap();

        let outcome = run_allocation(&store, &args()).unwrap();
        assert_eq!(outcome.routes_allocated, 2);
        let sequences = outcome.vehicle_sequences();
        assert_eq!(sequences.len(), 2);
    }

    #[test]
    fn enabled_vehicle_list_restricts_fleet() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_vehicle(&vehicle(1)).unwrap();
        store.insert_vehicle(&vehicle(2)).unwrap();
        seed_soc(&store, 1, 90.0);
        seed_soc(&store, 2, 90.0);
        store.insert_route(&route("A", at(6, 0), at(9, 0), 40.0)).unwrap();
        store.insert_route(&route("B", at(8, 0), at(11, 0), 40.0)).unwrap();
        // Only vehicle 1 is enabled for the site.
        store
            .insert_module_params(
                crate::APPLICATION_NAME,
                &serde_json::json!({
                    "clients": [{"sites": [{
                        "site_id": 10,
                        "parameters": [],
                        "vehicles": [
                            {"vehicle_id": 1, "enabled": "true"},
                            {"vehicle_id": 2, "enabled": "false"}
                        ]
                    }]}]
                }),
            )
            .unwrap();

        let outcome = run_allocation(&store, &args()).unwrap();
        // One vehicle cannot serve overlapping routes.
        assert_eq!(outcome.routes_allocated, 1);
    }

    #[test]
    fn rerun_replaces_rows_idempotently() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_vehicle(&vehicle(1)).unwrap();
        seed_soc(&store, 1, 80.0);
        store.insert_route(&route("A", at(6, 0), at(9, 0), 50.0)).unwrap();

        let first = run_allocation(&store, &args()).unwrap();
        let second = run_allocation(&store, &args()).unwrap();

        let rows = store
            .allocations_for_routes(SiteId::new(10), &[RouteId::from("A")])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(first.routes_allocated, second.routes_allocated);
        assert!((first.total_score - second.total_score).abs() < 1e-9);
    }

    #[test]
    fn cancelled_run_marks_monitor_failed() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_vehicle(&vehicle(1)).unwrap();
        seed_soc(&store, 1, 80.0);
        store.insert_route(&route("A", at(6, 0), at(9, 0), 50.0)).unwrap();

        let mut cancelled = args();
        cancelled.cancel.cancel();
        let err = run_allocation(&store, &cancelled).unwrap_err();
        assert!(matches!(err, EngineError::Interrupted));
    }

    #[test]
    fn no_routes_is_trivially_accepted() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_vehicle(&vehicle(1)).unwrap();
        seed_soc(&store, 1, 80.0);
        let outcome = run_allocation(&store, &args()).unwrap();
        assert_eq!(outcome.status, RunStatus::Accepted);
        assert_eq!(outcome.routes_in_window, 0);
    }
}
