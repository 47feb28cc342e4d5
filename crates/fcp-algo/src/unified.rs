//! Unified allocation + charge-scheduling optimizer.
//!
//! One model, three modes:
//!
//! - `AllocationOnly`: the set-partition model of [`crate::allocation`].
//! - `SchedulingOnly`: the scheduling LP with a *soft* end-of-window
//!   target (shortfall slack weighted by λ) instead of the standalone
//!   solver's hard target.
//! - `Integrated`: both variable families under a weighted-sum objective
//!   `maximize α·(W_route·Σy + Σcost·x) − β·(Σ slot_cost·0.5·p + λ·Σ short)`.
//!
//! In integrated mode the energy checkpoint of a candidate sequence binds
//! only when that sequence is selected; the linking is the usual big-M
//! reformulation `c ≥ (E + M)·x − M` with `M` the battery capacity, which
//! is vacuous at `x = 0`. Checkpoints of already-fixed routes stay
//! unconditional.
//!
//! The scheduling cost term here uses tariff + synthetic time preference
//! only; the TRIAD surcharge applies to the standalone scheduler's
//! objective but not to the unified one. Reported `total_charging_cost` is
//! pure tariff cost either way.

use std::time::Instant;

use tracing::{info, warn};

use fcp_core::schedule::SLOT_HOURS;
use fcp_core::{SolveStatus, UnifiedWeights, VehicleChargeSchedule};

use crate::allocation::{greedy_allocation, solve_allocation, AllocationProblem};
use crate::scheduling::{greedy_scheduling, SchedulingProblem};
use crate::sequences::SequenceCandidate;
use crate::solver::engine_available;
use crate::{AlgoError, AlgoResult};

/// Which parts of the model are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationMode {
    AllocationOnly,
    SchedulingOnly,
    Integrated,
}

impl OptimizationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OptimizationMode::AllocationOnly => "allocation_only",
            OptimizationMode::SchedulingOnly => "scheduling_only",
            OptimizationMode::Integrated => "integrated",
        }
    }
}

impl std::str::FromStr for OptimizationMode {
    type Err = AlgoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allocation_only" | "allocation" => Ok(OptimizationMode::AllocationOnly),
            "scheduling_only" | "scheduling" => Ok(OptimizationMode::SchedulingOnly),
            "integrated" | "both" => Ok(OptimizationMode::Integrated),
            other => Err(AlgoError::InvalidProblem(format!(
                "invalid optimization mode: {other}"
            ))),
        }
    }
}

/// Inputs for a unified solve. Allocation and scheduling parts are present
/// according to the mode.
#[derive(Debug, Clone)]
pub struct UnifiedProblem {
    pub mode: OptimizationMode,
    pub allocation: Option<AllocationProblem>,
    pub scheduling: Option<SchedulingProblem>,
    pub weights: UnifiedWeights,
    /// Buffer factor for candidate-sequence route energy.
    pub route_energy_safety_factor: f64,
    /// Efficiency fallback for vehicles without their own figure.
    pub fleet_efficiency: f64,
    pub time_limit_seconds: u64,
}

impl UnifiedProblem {
    fn allocation_part(&self) -> AlgoResult<&AllocationProblem> {
        self.allocation.as_ref().ok_or_else(|| {
            AlgoError::InvalidProblem(format!(
                "mode {} requires allocation inputs",
                self.mode.as_str()
            ))
        })
    }

    fn scheduling_part(&self) -> AlgoResult<&SchedulingProblem> {
        self.scheduling.as_ref().ok_or_else(|| {
            AlgoError::InvalidProblem(format!(
                "mode {} requires scheduling inputs",
                self.mode.as_str()
            ))
        })
    }
}

/// Output of a unified solve.
#[derive(Debug, Clone)]
pub struct UnifiedSolution {
    pub mode: OptimizationMode,
    pub status: SolveStatus,
    pub solve_time_seconds: f64,
    pub selected: Vec<SequenceCandidate>,
    pub allocation_score: f64,
    pub routes_allocated: usize,
    pub routes_total: usize,
    pub vehicle_schedules: Vec<VehicleChargeSchedule>,
    /// Pure tariff cost of the schedule.
    pub total_charging_cost: f64,
    pub total_energy_kwh: f64,
    pub objective_value: f64,
}

/// Solves the unified problem per its mode, falling back to the greedy
/// heuristics when the MILP backend is unavailable or errors.
pub fn solve_unified(problem: &UnifiedProblem) -> AlgoResult<UnifiedSolution> {
    info!(mode = problem.mode.as_str(), "starting unified optimization");

    match problem.mode {
        OptimizationMode::AllocationOnly => {
            let allocation = problem.allocation_part()?;
            let solution = solve_allocation(allocation)?;
            Ok(UnifiedSolution {
                mode: problem.mode,
                status: solution.status,
                solve_time_seconds: solution.solve_time_seconds,
                allocation_score: solution.total_score,
                routes_allocated: solution.routes_allocated,
                routes_total: allocation.route_ids.len(),
                selected: solution.selected,
                vehicle_schedules: Vec::new(),
                total_charging_cost: 0.0,
                total_energy_kwh: 0.0,
                objective_value: solution.total_score,
            })
        }
        OptimizationMode::SchedulingOnly | OptimizationMode::Integrated => {
            if problem.mode == OptimizationMode::Integrated {
                problem.allocation_part()?;
            }
            let scheduling = problem.scheduling_part()?;
            if scheduling.grid.is_empty() {
                return Err(AlgoError::InvalidProblem(
                    "scheduling window contains no whole slots".into(),
                ));
            }

            if !engine_available() {
                warn!("MILP backend inactive, unified solve uses greedy fallback");
                return Ok(greedy_unified(problem));
            }

            #[cfg(feature = "solver-highs")]
            {
                match milp::solve(problem) {
                    Ok(solution) => return Ok(solution),
                    Err(err) => {
                        warn!(%err, "unified model failed, falling back to greedy");
                        return Ok(greedy_unified(problem));
                    }
                }
            }

            #[cfg(not(feature = "solver-highs"))]
            Ok(greedy_unified(problem))
        }
    }
}

/// Greedy composition: greedy allocation followed by greedy scheduling.
/// The scheduling pass ranks slots by tariff alone, matching the unified
/// objective's lack of a TRIAD term.
fn greedy_unified(problem: &UnifiedProblem) -> UnifiedSolution {
    let started = Instant::now();

    let (selected, allocation_score, routes_allocated, routes_total) = match &problem.allocation {
        Some(allocation) if problem.mode == OptimizationMode::Integrated => {
            let solution = greedy_allocation(allocation);
            (
                solution.selected,
                solution.total_score,
                solution.routes_allocated,
                allocation.route_ids.len(),
            )
        }
        _ => (Vec::new(), 0.0, 0, 0),
    };

    let (vehicle_schedules, total_cost, total_energy) = match &problem.scheduling {
        Some(scheduling) => {
            let solution = greedy_scheduling(scheduling, 0.0);
            (
                solution.vehicles,
                solution.total_cost,
                solution.total_energy_kwh,
            )
        }
        None => (Vec::new(), 0.0, 0.0),
    };

    UnifiedSolution {
        mode: problem.mode,
        status: SolveStatus::GreedyFallback,
        solve_time_seconds: started.elapsed().as_secs_f64(),
        selected,
        allocation_score,
        routes_allocated,
        routes_total,
        vehicle_schedules,
        total_charging_cost: total_cost,
        total_energy_kwh: total_energy,
        objective_value: allocation_score - total_cost,
    }
}

/// Per-route net charge requirements of a candidate sequence: the
/// cumulative buffered energy less what is on board, clamped at zero.
#[cfg(feature = "solver-highs")]
fn candidate_checkpoints(
    candidate: &SequenceCandidate,
    scheduling: &SchedulingProblem,
    safety_factor: f64,
    fleet_efficiency: f64,
) -> Vec<(usize, f64)> {
    let Some(state) = scheduling
        .vehicles
        .iter()
        .find(|s| s.vehicle_id == candidate.vehicle_id)
    else {
        return Vec::new();
    };
    let efficiency = state.efficiency_kwh_per_mile.unwrap_or(fleet_efficiency);

    let mut checkpoints = Vec::new();
    let mut cumulative = 0.0;
    for route in &candidate.routes {
        cumulative += route.plan_mileage * efficiency * safety_factor;
        let Some(slot_idx) = scheduling.grid.index_at(route.plan_start) else {
            continue;
        };
        if slot_idx == 0 {
            continue;
        }
        let net = (cumulative - state.soc_kwh).max(0.0);
        if net > 0.0 {
            checkpoints.push((slot_idx, net));
        }
    }
    checkpoints
}

#[cfg(feature = "solver-highs")]
mod milp {
    use super::*;
    use crate::allocation::route_coverage;
    use crate::scheduling::{checkpoint_required_kwh, extract_schedules};
    use good_lp::solvers::highs::highs;
    use good_lp::{constraint, variable, variables, Expression, Solution, SolverModel, Variable};
    use std::collections::HashMap;
    use fcp_core::VehicleId;

    pub(super) fn solve(problem: &UnifiedProblem) -> AlgoResult<UnifiedSolution> {
        let started = Instant::now();
        let scheduling = problem.scheduling_part()?;
        let integrated = problem.mode == OptimizationMode::Integrated;

        let n_slots = scheduling.grid.len();
        let n_vehicles = scheduling.vehicles.len();
        let vehicle_index: HashMap<VehicleId, usize> = scheduling
            .vehicles
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.vehicle_id, idx))
            .collect();

        info!(
            mode = problem.mode.as_str(),
            vehicles = n_vehicles,
            slots = n_slots,
            sequences = problem.allocation.as_ref().map_or(0, |a| a.candidates.len()),
            "building unified model"
        );

        let mut vars = variables!();

        // Allocation variables.
        let (sequence_vars, covered_vars) = if integrated {
            let allocation = problem.allocation_part()?;
            let sequence_vars: Vec<Variable> = (0..allocation.candidates.len())
                .map(|_| vars.add(variable().binary()))
                .collect();
            let coverage = route_coverage(allocation);
            let covered_vars: Vec<(usize, Variable)> = allocation
                .route_ids
                .iter()
                .enumerate()
                .filter(|(_, rid)| coverage.get(*rid).is_some_and(|c| !c.is_empty()))
                .map(|(idx, _)| (idx, vars.add(variable().binary())))
                .collect();
            (sequence_vars, covered_vars)
        } else {
            (Vec::new(), Vec::new())
        };

        // Scheduling variables.
        let power: Vec<Vec<Variable>> = scheduling
            .vehicles
            .iter()
            .map(|state| {
                (0..n_slots)
                    .map(|_| vars.add(variable().min(0.0).max(state.ac_rate_kw)))
                    .collect()
            })
            .collect();
        let cumulative: Vec<Vec<Variable>> = scheduling
            .vehicles
            .iter()
            .map(|state| {
                (0..n_slots)
                    .map(|_| vars.add(variable().min(0.0).max(state.headroom_kwh())))
                    .collect()
            })
            .collect();

        // Shortfall slack per vehicle with headroom to its target SOC.
        let target_kwh: Vec<f64> = scheduling
            .vehicles
            .iter()
            .map(|s| (scheduling.target_soc_percent / 100.0) * s.battery_kwh)
            .collect();
        let shortfall: Vec<Option<Variable>> = scheduling
            .vehicles
            .iter()
            .enumerate()
            .map(|(v_idx, s)| {
                let max_short = (target_kwh[v_idx] - s.soc_kwh).max(0.0);
                if max_short > 0.0 {
                    Some(vars.add(variable().min(0.0).max(max_short)))
                } else {
                    None
                }
            })
            .collect();

        // Objective. The scheduling term prices tariff + synthetic time
        // preference; no TRIAD term in the unified objective.
        let mut allocation_term = Expression::from(0.0);
        if integrated {
            let allocation = problem.allocation_part()?;
            for (_, y) in &covered_vars {
                allocation_term += allocation.route_count_weight * *y;
            }
            for (idx, candidate) in allocation.candidates.iter().enumerate() {
                allocation_term += candidate.cost * sequence_vars[idx];
            }
        }

        let mut scheduling_term = Expression::from(0.0);
        for t_idx in 0..n_slots {
            let (price, _) = scheduling.price_at(scheduling.grid.slot_start(t_idx));
            let synthetic = scheduling.synthetic_time_price_factor * (n_slots - t_idx) as f64
                / n_slots as f64;
            let slot_cost = price + synthetic;
            for v_idx in 0..n_vehicles {
                scheduling_term += slot_cost * SLOT_HOURS * power[v_idx][t_idx];
            }
        }
        for short in shortfall.iter().flatten() {
            scheduling_term += problem.weights.soc_shortfall_penalty * *short;
        }

        let objective = problem.weights.allocation_score_weight * allocation_term
            - problem.weights.scheduling_cost_weight * scheduling_term;
        let mut model = vars.maximise(objective).using(highs);

        // Allocation constraints.
        if integrated {
            let allocation = problem.allocation_part()?;
            let coverage = route_coverage(allocation);

            let mut by_vehicle: HashMap<VehicleId, Vec<usize>> = HashMap::new();
            for (idx, candidate) in allocation.candidates.iter().enumerate() {
                by_vehicle.entry(candidate.vehicle_id).or_default().push(idx);
            }
            for indices in by_vehicle.values() {
                let mut sum = Expression::from(0.0);
                for &idx in indices {
                    sum += sequence_vars[idx];
                }
                model = model.with(constraint!(sum <= 1.0));
            }

            for (route_idx, y) in &covered_vars {
                let rid = &allocation.route_ids[*route_idx];
                let covering = &coverage[rid];
                let mut sum = Expression::from(0.0);
                for &idx in covering {
                    sum += sequence_vars[idx];
                }
                model = model.with(constraint!(sum.clone() <= 1.0));
                model = model.with(constraint!(Expression::from(*y) <= sum.clone()));
                model = model.with(constraint!(sum <= covering.len() as f64 * *y));
            }

            // Sequence-conditional checkpoints: when x_s = 1, the vehicle
            // must have banked the sequence's cumulative energy before each
            // departure; when x_s = 0 the constraint is vacuous.
            for (seq_idx, candidate) in allocation.candidates.iter().enumerate() {
                let Some(&v_idx) = vehicle_index.get(&candidate.vehicle_id) else {
                    continue;
                };
                let big_m = scheduling.vehicles[v_idx].battery_kwh;
                for (slot_idx, net_kwh) in candidate_checkpoints(
                    candidate,
                    scheduling,
                    problem.route_energy_safety_factor,
                    problem.fleet_efficiency,
                ) {
                    model = model.with(constraint!(
                        cumulative[v_idx][slot_idx - 1]
                            >= (net_kwh + big_m) * sequence_vars[seq_idx] - big_m
                    ));
                }
            }
        }

        // Scheduling constraints.
        for v_idx in 0..n_vehicles {
            model = model.with(constraint!(
                cumulative[v_idx][0] == SLOT_HOURS * power[v_idx][0]
            ));
            for t_idx in 1..n_slots {
                model = model.with(constraint!(
                    cumulative[v_idx][t_idx]
                        == cumulative[v_idx][t_idx - 1] + SLOT_HOURS * power[v_idx][t_idx]
                ));
            }
        }

        // Fixed checkpoints of pre-allocated routes stay unconditional.
        for (v_idx, state) in scheduling.vehicles.iter().enumerate() {
            let Some(requirements) = scheduling.requirements.get(&state.vehicle_id) else {
                continue;
            };
            for requirement in requirements {
                let Some(checkpoint_idx) = scheduling.grid.index_at(requirement.departure)
                else {
                    warn!(
                        vehicle = %state.vehicle_id,
                        route = %requirement.route_id,
                        "fixed checkpoint outside grid, skipped"
                    );
                    continue;
                };
                if checkpoint_idx == 0 {
                    continue;
                }
                let required =
                    checkpoint_required_kwh(state, requirement, scheduling.min_soc_percent);
                if required > 0.0 {
                    model = model.with(constraint!(
                        cumulative[v_idx][checkpoint_idx - 1] >= required
                    ));
                }
            }
        }

        // Soft end-of-window target.
        for (v_idx, state) in scheduling.vehicles.iter().enumerate() {
            if let Some(short) = shortfall[v_idx] {
                model = model.with(constraint!(
                    Expression::from(short)
                        >= (target_kwh[v_idx] - state.soc_kwh) - cumulative[v_idx][n_slots - 1]
                ));
            }
        }

        // Site capacity, availability.
        for t_idx in 0..n_slots {
            if let Some(headroom) = scheduling.capacity_at(t_idx) {
                let mut slot_total = Expression::from(0.0);
                for v_idx in 0..n_vehicles {
                    slot_total += power[v_idx][t_idx];
                }
                model = model.with(constraint!(slot_total <= headroom));
            }
        }
        for (v_idx, state) in scheduling.vehicles.iter().enumerate() {
            for t_idx in 0..n_slots {
                if !scheduling.available(state.vehicle_id, t_idx) {
                    model = model.with(constraint!(power[v_idx][t_idx] == 0.0));
                }
            }
        }

        let solution = model
            .solve()
            .map_err(|e| AlgoError::Solver(format!("{e:?}")))?;

        // Extract allocation.
        let (selected, allocation_score, routes_allocated, routes_total) = if integrated {
            let allocation = problem.allocation_part()?;
            let mut selected = Vec::new();
            let mut score = 0.0;
            for (idx, candidate) in allocation.candidates.iter().enumerate() {
                if solution.value(sequence_vars[idx]) > 0.5 {
                    score += candidate.cost;
                    selected.push(candidate.clone());
                }
            }
            let covered = covered_vars
                .iter()
                .filter(|(_, y)| solution.value(*y) > 0.5)
                .count();
            (selected, score, covered, allocation.route_ids.len())
        } else {
            (Vec::new(), 0.0, 0, 0)
        };

        // Extract schedules and recompute the objective's scheduling term
        // from solved values.
        let (vehicle_schedules, total_cost, _, total_energy) =
            extract_schedules(scheduling, |v_idx, t_idx| {
                solution.value(power[v_idx][t_idx])
            });

        let mut scheduling_value = 0.0;
        for t_idx in 0..n_slots {
            let (price, _) = scheduling.price_at(scheduling.grid.slot_start(t_idx));
            let synthetic = scheduling.synthetic_time_price_factor * (n_slots - t_idx) as f64
                / n_slots as f64;
            for v_idx in 0..n_vehicles {
                scheduling_value +=
                    (price + synthetic) * SLOT_HOURS * solution.value(power[v_idx][t_idx]);
            }
        }
        for short in shortfall.iter().flatten() {
            scheduling_value += problem.weights.soc_shortfall_penalty * solution.value(*short);
        }

        let objective_value = problem.weights.allocation_score_weight
            * (problem
                .allocation
                .as_ref()
                .map_or(0.0, |a| a.route_count_weight * routes_allocated as f64)
                + allocation_score)
            - problem.weights.scheduling_cost_weight * scheduling_value;

        info!(
            routes_allocated,
            allocation_score,
            total_cost,
            total_energy,
            "unified model solved"
        );

        Ok(UnifiedSolution {
            mode: problem.mode,
            status: SolveStatus::Optimal,
            solve_time_seconds: started.elapsed().as_secs_f64(),
            selected,
            allocation_score,
            routes_allocated,
            routes_total,
            vehicle_schedules,
            total_charging_cost: total_cost,
            total_energy_kwh: total_energy,
            objective_value,
        })
    }
}
