//! Set-partition allocation solver.
//!
//! Selects at most one feasible sequence per vehicle and at most one
//! sequence per route, maximizing `W_route · routes_covered + Σ cost`, so
//! route coverage strictly dominates quality score. A route with no
//! selectable sequence stays uncovered.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{info, warn};

use fcp_core::{RouteId, SolveStatus, VehicleId};

use crate::sequences::SequenceCandidate;
use crate::solver::engine_available;
use crate::{AlgoError, AlgoResult};

/// Inputs for one allocation solve.
#[derive(Debug, Clone)]
pub struct AllocationProblem {
    pub candidates: Vec<SequenceCandidate>,
    /// Every route id that wants an assignment, window order.
    pub route_ids: Vec<RouteId>,
    /// Weight making route coverage dominate sequence scores.
    pub route_count_weight: f64,
    /// Advisory solve budget; the greedy fallback ignores it.
    pub time_limit_seconds: u64,
}

/// Output of one allocation solve.
#[derive(Debug, Clone)]
pub struct AllocationSolution {
    pub selected: Vec<SequenceCandidate>,
    pub total_score: f64,
    pub routes_allocated: usize,
    pub status: SolveStatus,
    pub solve_time_seconds: f64,
}

/// Solves the set-partition allocation, falling back to the greedy
/// heuristic when the MILP backend is unavailable or errors.
pub fn solve_allocation(problem: &AllocationProblem) -> AlgoResult<AllocationSolution> {
    if problem.route_ids.is_empty() {
        return Ok(AllocationSolution {
            selected: Vec::new(),
            total_score: 0.0,
            routes_allocated: 0,
            status: SolveStatus::Optimal,
            solve_time_seconds: 0.0,
        });
    }

    if !engine_available() {
        warn!("MILP backend inactive, solving allocation greedily");
        return Ok(greedy_allocation(problem));
    }

    #[cfg(feature = "solver-highs")]
    {
        match milp::solve(problem) {
            Ok(solution) => return Ok(solution),
            Err(err) => {
                warn!(%err, "allocation MILP failed, falling back to greedy");
                return Ok(greedy_allocation(problem));
            }
        }
    }

    #[cfg(not(feature = "solver-highs"))]
    Ok(greedy_allocation(problem))
}

/// Greedy fallback: best-scoring sequences first, selected when their
/// vehicle is unused and all their routes are uncovered.
pub fn greedy_allocation(problem: &AllocationProblem) -> AllocationSolution {
    let started = Instant::now();

    let mut order: Vec<usize> = (0..problem.candidates.len()).collect();
    order.sort_by(|&a, &b| {
        problem.candidates[b]
            .cost
            .partial_cmp(&problem.candidates[a].cost)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut selected = Vec::new();
    let mut covered: std::collections::HashSet<&RouteId> = std::collections::HashSet::new();
    let mut used_vehicles: std::collections::HashSet<VehicleId> =
        std::collections::HashSet::new();
    let mut total_score = 0.0;

    for idx in order {
        let candidate = &problem.candidates[idx];
        if used_vehicles.contains(&candidate.vehicle_id) {
            continue;
        }
        if candidate.route_ids().any(|rid| covered.contains(rid)) {
            continue;
        }

        used_vehicles.insert(candidate.vehicle_id);
        covered.extend(candidate.route_ids());
        total_score += candidate.cost;
        selected.push(candidate.clone());

        if covered.len() == problem.route_ids.len() {
            break;
        }
    }

    let routes_allocated = covered.len();
    info!(
        sequences = selected.len(),
        routes_allocated,
        total_score,
        "greedy allocation complete"
    );

    AllocationSolution {
        selected,
        total_score,
        routes_allocated,
        status: SolveStatus::GreedyFallback,
        solve_time_seconds: started.elapsed().as_secs_f64(),
    }
}

/// Coverage index: for each route, the candidate indices containing it.
pub(crate) fn route_coverage<'p>(
    problem: &'p AllocationProblem,
) -> HashMap<&'p RouteId, Vec<usize>> {
    let mut coverage: HashMap<&RouteId, Vec<usize>> = problem
        .route_ids
        .iter()
        .map(|rid| (rid, Vec::new()))
        .collect();
    for (idx, candidate) in problem.candidates.iter().enumerate() {
        for rid in candidate.route_ids() {
            if let Some(entry) = coverage.get_mut(rid) {
                entry.push(idx);
            }
        }
    }
    coverage
}

#[cfg(feature = "solver-highs")]
mod milp {
    use super::*;
    use good_lp::solvers::highs::highs;
    use good_lp::{constraint, variable, variables, Expression, Solution, SolverModel, Variable};

    pub(super) fn solve(problem: &AllocationProblem) -> AlgoResult<AllocationSolution> {
        let started = Instant::now();
        let n_sequences = problem.candidates.len();

        info!(
            sequences = n_sequences,
            routes = problem.route_ids.len(),
            "building allocation model"
        );

        let mut vars = variables!();

        // x_s: sequence selection.
        let sequence_vars: Vec<Variable> =
            (0..n_sequences).map(|_| vars.add(variable().binary())).collect();

        let coverage = route_coverage(problem);

        // y_r: route covered, only for coverable routes.
        let mut covered_vars: Vec<(&RouteId, Variable)> = Vec::new();
        for rid in &problem.route_ids {
            if coverage.get(rid).is_some_and(|c| !c.is_empty()) {
                covered_vars.push((rid, vars.add(variable().binary())));
            }
        }

        // Objective: W_route · Σ y_r + Σ cost_s · x_s.
        let mut objective = Expression::from(0.0);
        for (_, y) in &covered_vars {
            objective += problem.route_count_weight * *y;
        }
        for (idx, candidate) in problem.candidates.iter().enumerate() {
            objective += candidate.cost * sequence_vars[idx];
        }

        let mut model = vars.maximise(objective).using(highs);

        // Vehicle exclusivity: at most one sequence per vehicle.
        let mut by_vehicle: HashMap<VehicleId, Vec<usize>> = HashMap::new();
        for (idx, candidate) in problem.candidates.iter().enumerate() {
            by_vehicle.entry(candidate.vehicle_id).or_default().push(idx);
        }
        for indices in by_vehicle.values() {
            let mut sum = Expression::from(0.0);
            for &idx in indices {
                sum += sequence_vars[idx];
            }
            model = model.with(constraint!(sum <= 1.0));
        }

        // Route exclusivity + coverage linking.
        for (rid, y) in &covered_vars {
            let covering = &coverage[*rid];
            let mut sum = Expression::from(0.0);
            for &idx in covering {
                sum += sequence_vars[idx];
            }
            model = model.with(constraint!(sum.clone() <= 1.0));
            model = model.with(constraint!(Expression::from(*y) <= sum.clone()));
            model = model.with(constraint!(sum <= covering.len() as f64 * *y));
        }

        let solution = model
            .solve()
            .map_err(|e| AlgoError::Solver(format!("{e:?}")))?;

        let mut selected = Vec::new();
        let mut total_score = 0.0;
        for (idx, candidate) in problem.candidates.iter().enumerate() {
            if solution.value(sequence_vars[idx]) > 0.5 {
                total_score += candidate.cost;
                selected.push(candidate.clone());
            }
        }
        let routes_allocated = covered_vars
            .iter()
            .filter(|(_, y)| solution.value(*y) > 0.5)
            .count();

        info!(
            selected = selected.len(),
            routes_allocated,
            total_score,
            "allocation model solved"
        );

        Ok(AllocationSolution {
            selected,
            total_score,
            routes_allocated,
            status: SolveStatus::Optimal,
            solve_time_seconds: started.elapsed().as_secs_f64(),
        })
    }
}
