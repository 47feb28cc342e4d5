//! Unified run orchestration: allocation and charge scheduling in one
//! model, or either alone, per the requested mode.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use fcp_algo::allocation::AllocationProblem;
use fcp_algo::constraints::{ConstraintSet, EvalContext};
use fcp_algo::scheduling::SchedulingProblem;
use fcp_algo::sequences::enumerate_sequences;
use fcp_algo::unified::{solve_unified, OptimizationMode, UnifiedProblem, UnifiedSolution};
use fcp_core::config::{
    DEFAULT_INTEGRATED_TIME_LIMIT_SECONDS, DEFAULT_PLANNING_WINDOW_HOURS,
};
use fcp_core::{
    AllocationId, AllocationOutcome, AllocationSettings, Route, RouteAllocation, RunStatus,
    ScheduleId, ScheduleOutcome, SchedulerConfig, SiteId, TriggerType, UnifiedWeights, VehicleId,
};
use fcp_store::Store;

use crate::inputs::{
    apply_charger_kinds, arrival_socs, availability_masks, energy_requirements,
    fleet_efficiency, load_allocation_fleet, load_charge_states, load_site_params,
    planning_window, series_to_map,
};
use crate::scheduling::persist_schedule;
use crate::validate::validate_schedule;
use crate::{CancelFlag, EngineError, EngineResult};

/// Arguments for one unified run.
#[derive(Debug, Clone)]
pub struct UnifiedRunArgs {
    pub site: SiteId,
    pub mode: OptimizationMode,
    pub trigger: TriggerType,
    pub at: DateTime<Utc>,
    /// Existing schedule record to re-run, when set.
    pub schedule_id: Option<ScheduleId>,
    /// Planning window length; defaults to 24 hours.
    pub window_hours: Option<f64>,
    pub persist: bool,
    pub weights: UnifiedWeights,
    pub cancel: CancelFlag,
}

/// Combined output of a unified run.
#[derive(Debug, Clone)]
pub struct UnifiedRunOutput {
    pub allocation: Option<AllocationOutcome>,
    pub schedule: Option<ScheduleOutcome>,
    pub unified: UnifiedSolution,
    pub allocation_id: Option<AllocationId>,
    pub schedule_id: Option<ScheduleId>,
}

struct Monitors {
    allocation_id: Option<AllocationId>,
    schedule_id: Option<ScheduleId>,
}

/// Runs the unified workflow for the requested mode.
pub fn run_unified(store: &dyn Store, args: &UnifiedRunArgs) -> EngineResult<UnifiedRunOutput> {
    info!(site = %args.site, mode = args.mode.as_str(), at = %args.at,
          "starting unified run");

    let wants_allocation = matches!(
        args.mode,
        OptimizationMode::AllocationOnly | OptimizationMode::Integrated
    );
    let wants_scheduling = matches!(
        args.mode,
        OptimizationMode::SchedulingOnly | OptimizationMode::Integrated
    );

    let params = load_site_params(store, args.site)?;
    let mut settings = AllocationSettings::from_site_params(&params);
    let window_hours = args.window_hours.unwrap_or(DEFAULT_PLANNING_WINDOW_HOURS);
    settings.window_hours = window_hours;
    let window = planning_window(store, args.site, args.at, window_hours)?;

    // Monitor records per mode.
    let allocation_id = if wants_allocation {
        Some(store.create_allocation_monitor(
            args.site,
            args.trigger,
            args.at,
            window.start,
            window.end,
        )?)
    } else {
        None
    };
    let schedule_id = if wants_scheduling {
        Some(match args.schedule_id {
            Some(id) => {
                store
                    .scheduler_row(id)?
                    .ok_or_else(|| EngineError::NotFound(format!("schedule {id}")))?;
                id
            }
            None => store.create_scheduler(args.site, "dynamic", "running")?,
        })
    } else {
        None
    };
    let monitors = Monitors {
        allocation_id,
        schedule_id,
    };

    match run_inner(store, args, &params, settings, window, &monitors) {
        Ok(output) => Ok(output),
        Err(err) => {
            error!(%err, "unified run failed");
            let reason = match err {
                EngineError::Interrupted => "interrupted",
                _ => "failed",
            };
            if let Some(id) = monitors.allocation_id {
                if let Err(e) = store.update_allocation_monitor(id, RunStatus::Failed, 0.0, 0, 0, 0)
                {
                    error!(%e, "failed to mark allocation monitor failed");
                }
            }
            if let Some(id) = monitors.schedule_id {
                if let Err(e) = store.update_scheduler_status(id, reason) {
                    error!(%e, "failed to mark scheduler failed");
                }
            }
            if let Err(e) = store.log_error("unified", &err.to_string(), args.at) {
                error!(%e, "failed to write error log");
            }
            Err(err)
        }
    }
}

fn run_inner(
    store: &dyn Store,
    args: &UnifiedRunArgs,
    params: &fcp_core::SiteParams,
    settings: AllocationSettings,
    window: crate::inputs::PlanningWindow,
    monitors: &Monitors,
) -> EngineResult<UnifiedRunOutput> {
    let wants_allocation = monitors.allocation_id.is_some();
    let wants_scheduling = monitors.schedule_id.is_some();

    let efficiency = fleet_efficiency(store, args.site)?;
    let (vehicles, charger_map) = load_allocation_fleet(store, args.site, params, args.at)?;
    let site_chargers = store.site_chargers(args.site)?;

    let mut states = load_charge_states(store, &vehicles, &charger_map, args.at)?;
    apply_charger_kinds(&mut states, &site_chargers);
    // Sequence selection and charging must agree on the fleet: only
    // vehicles with a usable charge state participate in allocation.
    let schedulable: std::collections::HashSet<VehicleId> =
        states.iter().map(|s| s.vehicle_id).collect();
    let vehicles: Vec<_> = vehicles
        .into_iter()
        .filter(|v| schedulable.contains(&v.id))
        .collect();

    // Allocation inputs.
    let mut window_routes: Vec<Route> = Vec::new();
    let allocation_problem = if wants_allocation {
        window_routes = store.routes_in_window(args.site, window.start, window.end)?;
        let constraints = ConstraintSet::from_site_params(args.site, params);
        let ctx = EvalContext {
            turnaround_minutes: settings.turnaround_minutes,
            all_routes: &window_routes,
            all_vehicles: &vehicles,
            vehicle_chargers: &charger_map,
            site_chargers: &site_chargers,
            fleet_efficiency: efficiency,
        };
        let candidates = enumerate_sequences(
            &vehicles,
            &window_routes,
            &constraints,
            settings.max_routes_per_vehicle,
            &ctx,
        );
        Some(AllocationProblem {
            candidates,
            route_ids: window_routes.iter().map(|r| r.id.clone()).collect(),
            route_count_weight: args.weights.route_count_weight,
            time_limit_seconds: settings.time_limit_seconds,
        })
    } else {
        None
    };

    // Scheduling inputs.
    let config = SchedulerConfig {
        agreed_site_capacity_kva: store.site_asc(args.site)?,
        ..SchedulerConfig::default()
    };
    let grid = window.grid();
    let mut requirements = HashMap::new();
    let mut forecast = HashMap::new();
    let scheduling_problem = if wants_scheduling {
        let mut routes_by_vehicle: HashMap<VehicleId, Vec<Route>> = HashMap::new();
        for state in &states {
            let routes = store.routes_for_vehicle_allocated(
                state.vehicle_id,
                window.start,
                window.end,
            )?;
            routes_by_vehicle.insert(state.vehicle_id, routes);
        }

        requirements = energy_requirements(
            &routes_by_vehicle,
            &states,
            config.route_energy_safety_factor,
            efficiency,
            config.back_to_back_threshold_minutes,
        );
        let availability = availability_masks(
            &states,
            &routes_by_vehicle,
            &grid,
            config.min_departure_buffer_minutes,
        );
        forecast = series_to_map(store.forecast(args.site, window.start, window.end)?);
        let price = series_to_map(
            store
                .price(window.start, window.end)?
                .into_iter()
                .map(|(t, p, triad)| (t, (p, triad)))
                .collect(),
        );

        Some(SchedulingProblem {
            schedule_id: monitors.schedule_id.unwrap_or(ScheduleId::new(0)),
            grid,
            vehicles: states.clone(),
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
        })
    } else {
        None
    };
    args.cancel.check()?;

    let problem = UnifiedProblem {
        mode: args.mode,
        allocation: allocation_problem,
        scheduling: scheduling_problem,
        weights: args.weights,
        route_energy_safety_factor: config.route_energy_safety_factor,
        fleet_efficiency: efficiency,
        time_limit_seconds: DEFAULT_INTEGRATED_TIME_LIMIT_SECONDS,
    };
    let unified = solve_unified(&problem)?;
    args.cancel.check()?;

    info!(
        status = unified.status.as_str(),
        objective = unified.objective_value,
        solve_time = unified.solve_time_seconds,
        "unified solve finished"
    );

    // Convert to per-domain outcomes.
    let allocation_outcome = monitors.allocation_id.map(|allocation_id| {
        let vehicle_by_id: HashMap<_, _> = vehicles.iter().map(|v| (v.id, v)).collect();
        let mut outcome = AllocationOutcome::empty(
            allocation_id,
            args.site,
            args.at,
            window.start,
            window.end,
        );
        outcome.routes_in_window = unified.routes_total;
        outcome.routes_overlapping =
            crate::inputs::overlapping_route_count(&window_routes, settings.turnaround_minutes);
        for candidate in &unified.selected {
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
        outcome.total_score = unified.allocation_score;
        let allocated: std::collections::HashSet<_> =
            outcome.allocations.iter().map(|a| a.route_id.clone()).collect();
        for route in &window_routes {
            if !allocated.contains(&route.id) {
                outcome.mark_unallocated(route.id.clone());
            }
        }
        outcome.status = if outcome.is_acceptable(settings.min_acceptable_score) {
            RunStatus::Accepted
        } else {
            RunStatus::Failed
        };
        outcome
    });

    let mut schedule_outcome = monitors.schedule_id.map(|schedule_id| {
        let routes_considered: usize = requirements.values().map(Vec::len).sum();
        let checkpoints_created = routes_considered;
        ScheduleOutcome {
            schedule_id,
            site_id: args.site,
            grid,
            actual_window_hours: window.actual_hours,
            vehicles_scheduled: unified.vehicle_schedules.len(),
            vehicles: unified.vehicle_schedules.clone(),
            total_cost: unified.total_charging_cost,
            objective_value: unified.objective_value,
            total_energy_kwh: unified.total_energy_kwh,
            solve_time_seconds: unified.solve_time_seconds,
            status: unified.status,
            validation: Default::default(),
            routes_considered,
            checkpoints_created,
        }
    });

    let mut schedule_passed = true;
    if let Some(outcome) = schedule_outcome.as_mut() {
        schedule_passed = validate_schedule(outcome, &forecast, config.site_capacity_kw());
    }

    // Persist: allocation first, then the schedule, each atomically.
    if args.persist {
        args.cancel.check()?;
        if let (Some(outcome), Some(allocation_id)) =
            (allocation_outcome.as_ref(), monitors.allocation_id)
        {
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
        if let (Some(outcome), Some(schedule_id)) =
            (schedule_outcome.as_ref(), monitors.schedule_id)
        {
            persist_schedule(store, outcome, &requirements)?;
            let status = if schedule_passed {
                "completed"
            } else {
                "validation_failed"
            };
            store.update_scheduler_status(schedule_id, status)?;
        }
    }

    Ok(UnifiedRunOutput {
        allocation: allocation_outcome,
        schedule: schedule_outcome,
        unified,
        allocation_id: monitors.allocation_id,
        schedule_id: monitors.schedule_id,
    })
}
